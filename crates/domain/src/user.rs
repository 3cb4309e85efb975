//! # ユーザー
//!
//! Google アカウントでログインする CRM の利用者。
//! 所属組織とロールは [`crate::organization::Membership`] で表現し、ユーザー自体は組織を持たない。

use chrono::{DateTime, Utc};

use crate::value_objects::Email;

define_uuid_id! {
   /// ユーザー ID
   pub struct UserId;
}

define_validated_string! {
   /// ユーザー表示名
   pub struct UserName {
      label: "ユーザー名",
      max_length: 100,
      pii: true,
   }
}

/// ユーザーエンティティ
///
/// # 不変条件
///
/// - `google_sub` はシステム内で一意（Google の subject 識別子）
/// - `email` は正規化済み
#[derive(Debug, Clone)]
pub struct User {
   id:         UserId,
   email:      Email,
   name:       UserName,
   google_sub: String,
   avatar_url: Option<String>,
   created_at: DateTime<Utc>,
   updated_at: DateTime<Utc>,
}

impl User {
   /// 初回ログイン時にユーザーを作成する
   pub fn new(
      id: UserId,
      email: Email,
      name: UserName,
      google_sub: String,
      avatar_url: Option<String>,
      now: DateTime<Utc>,
   ) -> Self {
      Self {
         id,
         email,
         name,
         google_sub,
         avatar_url,
         created_at: now,
         updated_at: now,
      }
   }

   /// データベースからユーザーを復元する
   pub fn from_db(
      id: UserId,
      email: Email,
      name: UserName,
      google_sub: String,
      avatar_url: Option<String>,
      created_at: DateTime<Utc>,
      updated_at: DateTime<Utc>,
   ) -> Self {
      Self {
         id,
         email,
         name,
         google_sub,
         avatar_url,
         created_at,
         updated_at,
      }
   }

   /// Google プロフィールの最新値を反映する
   pub fn with_profile(
      self,
      email: Email,
      name: UserName,
      avatar_url: Option<String>,
      now: DateTime<Utc>,
   ) -> Self {
      Self {
         email,
         name,
         avatar_url,
         updated_at: now,
         ..self
      }
   }

   pub fn id(&self) -> &UserId {
      &self.id
   }

   pub fn email(&self) -> &Email {
      &self.email
   }

   pub fn name(&self) -> &UserName {
      &self.name
   }

   pub fn google_sub(&self) -> &str {
      &self.google_sub
   }

   pub fn avatar_url(&self) -> Option<&str> {
      self.avatar_url.as_deref()
   }

   pub fn created_at(&self) -> DateTime<Utc> {
      self.created_at
   }

   pub fn updated_at(&self) -> DateTime<Utc> {
      self.updated_at
   }
}
