//! # UserRepository
//!
//! Google アカウントでログインしたユーザーの永続化を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **Google subject で upsert**: メールアドレスは変わり得るため、一意キーは `google_sub`
//! - **リフレッシュトークンの保持**: Gmail API 送信用。再同意なしのログインでは
//!   Google がトークンを返さないため、未取得時は保存済みの値を残す

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kokyaku_domain::{
   user::{User, UserId, UserName},
   value_objects::Email,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// ユーザーリポジトリトレイト
#[async_trait]
pub trait UserRepository: Send + Sync {
   /// ID でユーザーを検索
   async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, InfraError>;

   /// Google subject でユーザーを検索
   async fn find_by_google_sub(&self, google_sub: &str) -> Result<Option<User>, InfraError>;

   /// Google ログインの結果を保存する
   ///
   /// `google_sub` が既存ならプロフィールを更新し、保存後のユーザーを返す。
   /// `refresh_token` が `None` の場合は保存済みのトークンを維持する。
   async fn upsert_google_user(
      &self,
      user: &User,
      refresh_token: Option<&str>,
   ) -> Result<User, InfraError>;

   /// Gmail 送信用のリフレッシュトークンを取得する
   async fn find_refresh_token(&self, id: &UserId) -> Result<Option<String>, InfraError>;
}

#[derive(sqlx::FromRow)]
pub(crate) struct UserRow {
   pub id:         Uuid,
   pub email:      String,
   pub name:       String,
   pub google_sub: String,
   pub avatar_url: Option<String>,
   pub created_at: DateTime<Utc>,
   pub updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
   type Error = InfraError;

   fn try_from(row: UserRow) -> Result<Self, Self::Error> {
      Ok(User::from_db(
         UserId::from_uuid(row.id),
         Email::new(&row.email).map_err(|e| InfraError::unexpected(e.to_string()))?,
         UserName::new(&row.name).map_err(|e| InfraError::unexpected(e.to_string()))?,
         row.google_sub,
         row.avatar_url,
         row.created_at,
         row.updated_at,
      ))
   }
}

const USER_COLUMNS: &str = "id, email, name, google_sub, avatar_url, created_at, updated_at";

/// PostgreSQL 実装の UserRepository
#[derive(Debug, Clone)]
pub struct PostgresUserRepository {
   pool: PgPool,
}

impl PostgresUserRepository {
   pub fn new(pool: PgPool) -> Self {
      Self { pool }
   }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
   #[tracing::instrument(skip_all, level = "debug", fields(%id))]
   async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, InfraError> {
      let row = sqlx::query_as::<_, UserRow>(&format!(
         "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
      ))
      .bind(id.as_uuid())
      .fetch_optional(&self.pool)
      .await?;

      row.map(User::try_from).transpose()
   }

   #[tracing::instrument(skip_all, level = "debug")]
   async fn find_by_google_sub(&self, google_sub: &str) -> Result<Option<User>, InfraError> {
      let row = sqlx::query_as::<_, UserRow>(&format!(
         "SELECT {USER_COLUMNS} FROM users WHERE google_sub = $1"
      ))
      .bind(google_sub)
      .fetch_optional(&self.pool)
      .await?;

      row.map(User::try_from).transpose()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(user_id = %user.id()))]
   async fn upsert_google_user(
      &self,
      user: &User,
      refresh_token: Option<&str>,
   ) -> Result<User, InfraError> {
      let row = sqlx::query_as::<_, UserRow>(&format!(
         r#"
            INSERT INTO users (
                id, email, name, google_sub, avatar_url, google_refresh_token,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (google_sub) DO UPDATE SET
                email = EXCLUDED.email,
                name = EXCLUDED.name,
                avatar_url = EXCLUDED.avatar_url,
                google_refresh_token = COALESCE(
                    EXCLUDED.google_refresh_token,
                    users.google_refresh_token
                ),
                updated_at = EXCLUDED.updated_at
            RETURNING {USER_COLUMNS}
            "#
      ))
      .bind(user.id().as_uuid())
      .bind(user.email().as_str())
      .bind(user.name().as_str())
      .bind(user.google_sub())
      .bind(user.avatar_url())
      .bind(refresh_token)
      .bind(user.created_at())
      .bind(user.updated_at())
      .fetch_one(&self.pool)
      .await?;

      User::try_from(row)
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%id))]
   async fn find_refresh_token(&self, id: &UserId) -> Result<Option<String>, InfraError> {
      let token: Option<Option<String>> =
         sqlx::query_scalar("SELECT google_refresh_token FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

      Ok(token.flatten())
   }
}
