//! # 顧客
//!
//! 組織が管理する顧客レコード。キャンペーンの配信先は顧客から選ばれる。
//!
//! ## 配信可能性
//!
//! 顧客が配信対象になるのは、メールアドレスを持ち、かつ配信停止していない場合のみ。
//! 配信停止は署名付きリンクから顧客自身が行い、管理画面からの再購読でのみ解除できる。

use chrono::{DateTime, Utc};

use crate::{
   DomainError,
   organization::OrganizationId,
   tag::TagId,
   value_objects::{Email, normalize_optional_email, normalize_optional_text},
};

define_uuid_id! {
   /// 顧客 ID
   pub struct CustomerId;
}

define_validated_string! {
   /// 顧客名
   pub struct CustomerName {
      label: "顧客名",
      max_length: 200,
      pii: true,
   }
}

/// 顧客の入力項目（未検証）
///
/// 作成・更新 API のリクエストからそのまま組み立てる。
#[derive(Debug, Clone, Default)]
pub struct CustomerInput {
   pub name:     String,
   pub email:    Option<String>,
   pub phone:    Option<String>,
   pub company:  Option<String>,
   pub city:     Option<String>,
   pub category: Option<String>,
   pub notes:    Option<String>,
}

/// 検証済みの顧客プロフィール
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerProfile {
   pub name:     CustomerName,
   pub email:    Option<Email>,
   pub phone:    Option<String>,
   pub company:  Option<String>,
   pub city:     Option<String>,
   pub category: Option<String>,
   pub notes:    Option<String>,
}

impl TryFrom<CustomerInput> for CustomerProfile {
   type Error = DomainError;

   fn try_from(input: CustomerInput) -> Result<Self, Self::Error> {
      Ok(Self {
         name:     CustomerName::new(input.name)?,
         email:    normalize_optional_email(input.email)?,
         phone:    normalize_optional_text(input.phone, "電話番号", 50)?,
         company:  normalize_optional_text(input.company, "会社名", 200)?,
         city:     normalize_optional_text(input.city, "市区町村", 100)?,
         category: normalize_optional_text(input.category, "カテゴリ", 100)?,
         notes:    normalize_optional_text(input.notes, "メモ", 10_000)?,
      })
   }
}

/// 顧客エンティティ
///
/// # 不変条件
///
/// - `email` は組織内で一意（DB の部分ユニークインデックスで担保）
/// - `tag_ids` は同一組織のタグのみ
#[derive(Debug, Clone)]
pub struct Customer {
   id:              CustomerId,
   organization_id: OrganizationId,
   profile:         CustomerProfile,
   tag_ids:         Vec<TagId>,
   unsubscribed_at: Option<DateTime<Utc>>,
   created_at:      DateTime<Utc>,
   updated_at:      DateTime<Utc>,
}

impl Customer {
   pub fn new(
      id: CustomerId,
      organization_id: OrganizationId,
      profile: CustomerProfile,
      now: DateTime<Utc>,
   ) -> Self {
      Self {
         id,
         organization_id,
         profile,
         tag_ids: Vec::new(),
         unsubscribed_at: None,
         created_at: now,
         updated_at: now,
      }
   }

   pub fn from_db(
      id: CustomerId,
      organization_id: OrganizationId,
      profile: CustomerProfile,
      tag_ids: Vec<TagId>,
      unsubscribed_at: Option<DateTime<Utc>>,
      created_at: DateTime<Utc>,
      updated_at: DateTime<Utc>,
   ) -> Self {
      Self {
         id,
         organization_id,
         profile,
         tag_ids,
         unsubscribed_at,
         created_at,
         updated_at,
      }
   }

   /// プロフィールを置き換える
   pub fn with_profile(self, profile: CustomerProfile, now: DateTime<Utc>) -> Self {
      Self {
         profile,
         updated_at: now,
         ..self
      }
   }

   /// タグを置き換える（重複は除去）
   pub fn with_tags(self, tag_ids: Vec<TagId>, now: DateTime<Utc>) -> Self {
      let mut unique: Vec<TagId> = Vec::with_capacity(tag_ids.len());
      for tag_id in tag_ids {
         if !unique.contains(&tag_id) {
            unique.push(tag_id);
         }
      }
      Self {
         tag_ids: unique,
         updated_at: now,
         ..self
      }
   }

   /// 配信停止する（既に停止済みなら最初の停止日時を保持する）
   pub fn unsubscribe(self, now: DateTime<Utc>) -> Self {
      Self {
         unsubscribed_at: self.unsubscribed_at.or(Some(now)),
         updated_at: now,
         ..self
      }
   }

   /// 再購読する
   pub fn resubscribe(self, now: DateTime<Utc>) -> Self {
      Self {
         unsubscribed_at: None,
         updated_at: now,
         ..self
      }
   }

   /// キャンペーンの配信対象になり得るか
   pub fn is_mailable(&self) -> bool {
      self.profile.email.is_some() && self.unsubscribed_at.is_none()
   }

   /// 名（最初の空白までの部分）
   ///
   /// 差し込み変数 `{{first_name}}` に使う。
   pub fn first_name(&self) -> &str {
      let name = self.profile.name.as_str();
      name.split_whitespace().next().unwrap_or(name)
   }

   pub fn id(&self) -> &CustomerId {
      &self.id
   }

   pub fn organization_id(&self) -> &OrganizationId {
      &self.organization_id
   }

   pub fn profile(&self) -> &CustomerProfile {
      &self.profile
   }

   pub fn name(&self) -> &CustomerName {
      &self.profile.name
   }

   pub fn email(&self) -> Option<&Email> {
      self.profile.email.as_ref()
   }

   pub fn phone(&self) -> Option<&str> {
      self.profile.phone.as_deref()
   }

   pub fn company(&self) -> Option<&str> {
      self.profile.company.as_deref()
   }

   pub fn city(&self) -> Option<&str> {
      self.profile.city.as_deref()
   }

   pub fn category(&self) -> Option<&str> {
      self.profile.category.as_deref()
   }

   pub fn notes(&self) -> Option<&str> {
      self.profile.notes.as_deref()
   }

   pub fn tag_ids(&self) -> &[TagId] {
      &self.tag_ids
   }

   pub fn unsubscribed_at(&self) -> Option<DateTime<Utc>> {
      self.unsubscribed_at
   }

   pub fn created_at(&self) -> DateTime<Utc> {
      self.created_at
   }

   pub fn updated_at(&self) -> DateTime<Utc> {
      self.updated_at
   }
}

/// テスト用の顧客を組み立てる
#[cfg(any(test, feature = "test-support"))]
pub fn customer_fixture(
   organization_id: &OrganizationId,
   name: &str,
   email: Option<&str>,
   city: Option<&str>,
   category: Option<&str>,
) -> Customer {
   let profile = CustomerProfile::try_from(CustomerInput {
      name: name.to_string(),
      email: email.map(str::to_string),
      city: city.map(str::to_string),
      category: category.map(str::to_string),
      ..CustomerInput::default()
   })
   .expect("テスト用の顧客入力が不正");
   Customer::new(CustomerId::new(), organization_id.clone(), profile, Utc::now())
}

#[cfg(test)]
mod tests {
   use pretty_assertions::assert_eq;

   use super::*;

   fn input(name: &str, email: Option<&str>) -> CustomerInput {
      CustomerInput {
         name: name.to_string(),
         email: email.map(str::to_string),
         ..CustomerInput::default()
      }
   }

   #[test]
   fn test_入力は正規化されて検証済みプロフィールになる() {
      let profile = CustomerProfile::try_from(CustomerInput {
         name:     " 山田 太郎 ".to_string(),
         email:    Some(" Taro@Example.com ".to_string()),
         phone:    Some("".to_string()),
         company:  None,
         city:     Some(" 大阪市 ".to_string()),
         category: Some("VIP".to_string()),
         notes:    Some("   ".to_string()),
      })
      .unwrap();

      assert_eq!(profile.name.as_str(), "山田 太郎");
      assert_eq!(profile.email.unwrap().as_str(), "taro@example.com");
      assert_eq!(profile.phone, None);
      assert_eq!(profile.city.as_deref(), Some("大阪市"));
      assert_eq!(profile.notes, None);
   }

   #[test]
   fn test_名前が空なら拒否する() {
      assert!(CustomerProfile::try_from(input("  ", None)).is_err());
   }

   #[test]
   fn test_不正なメールアドレスは拒否する() {
      assert!(CustomerProfile::try_from(input("A", Some("broken"))).is_err());
   }

   #[test]
   fn test_メールアドレスのない顧客は配信対象外() {
      let org = OrganizationId::new();
      let customer = customer_fixture(&org, "A", None, None, None);
      assert!(!customer.is_mailable());
   }

   #[test]
   fn test_配信停止すると配信対象外になり再購読で戻る() {
      let org = OrganizationId::new();
      let now = Utc::now();
      let customer = customer_fixture(&org, "A", Some("a@example.com"), None, None);
      assert!(customer.is_mailable());

      let customer = customer.unsubscribe(now);
      assert!(!customer.is_mailable());
      assert_eq!(customer.unsubscribed_at(), Some(now));

      let customer = customer.resubscribe(now);
      assert!(customer.is_mailable());
   }

   #[test]
   fn test_二重の配信停止は最初の日時を保持する() {
      let org = OrganizationId::new();
      let first = Utc::now();
      let later = first + chrono::Duration::days(1);
      let customer = customer_fixture(&org, "A", Some("a@example.com"), None, None)
         .unsubscribe(first)
         .unsubscribe(later);

      assert_eq!(customer.unsubscribed_at(), Some(first));
   }

   #[test]
   fn test_タグの重複は除去される() {
      let org = OrganizationId::new();
      let tag = TagId::new();
      let customer = customer_fixture(&org, "A", None, None, None)
         .with_tags(vec![tag.clone(), tag.clone()], Utc::now());

      assert_eq!(customer.tag_ids(), &[tag]);
   }

   #[test]
   fn test_first_nameは最初の語を返す() {
      let org = OrganizationId::new();
      let customer = customer_fixture(&org, "Taro Yamada", None, None, None);
      assert_eq!(customer.first_name(), "Taro");
   }
}
