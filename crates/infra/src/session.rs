//! # セッション管理
//!
//! Redis を使用したセッション、CSRF トークン、OAuth state の管理を提供する。
//!
//! ## Redis キー設計
//!
//! | キー | 値 | TTL |
//! |-----|-----|-----|
//! | `session:{session_id}` | SessionData (JSON) | 28800秒（8時間） |
//! | `csrf:{session_id}` | CSRF トークン | 28800秒（8時間） |
//! | `oauth_state:{state}` | OAuthState (JSON) | 600秒（10分） |
//!
//! セッションは組織をまたいで 1 つ。アクティブな組織は `SessionData` に持ち、
//! 組織切り替え時に上書きする。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kokyaku_domain::{
   organization::{OrgRole, OrganizationId},
   user::UserId,
};
use redis::{AsyncCommands, aio::ConnectionManager};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::InfraError;

/// セッションの有効期限（秒）
/// 8時間 = 28800秒
pub const SESSION_TTL_SECONDS: u64 = 28800;

/// OAuth state の有効期限（秒）
pub const OAUTH_STATE_TTL_SECONDS: u64 = 600;

/// セッションデータ
///
/// Redis に JSON 形式で保存されるセッション情報。
/// ログイン成功時に作成され、ログアウトまたは TTL 経過で削除される。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
   user_id: UserId,
   organization_id: OrganizationId,
   role: OrgRole,
   email: String,
   name: String,
   created_at: DateTime<Utc>,
   last_accessed_at: DateTime<Utc>,
}

impl SessionData {
   /// 新しいセッションデータを作成する
   pub fn new(
      user_id: UserId,
      organization_id: OrganizationId,
      role: OrgRole,
      email: String,
      name: String,
   ) -> Self {
      let now = Utc::now();
      Self {
         user_id,
         organization_id,
         role,
         email,
         name,
         created_at: now,
         last_accessed_at: now,
      }
   }

   /// アクティブな組織を切り替えたセッションデータを返す
   pub fn with_organization(self, organization_id: OrganizationId, role: OrgRole) -> Self {
      Self {
         organization_id,
         role,
         last_accessed_at: Utc::now(),
         ..self
      }
   }

   pub fn user_id(&self) -> &UserId {
      &self.user_id
   }

   pub fn organization_id(&self) -> &OrganizationId {
      &self.organization_id
   }

   pub fn role(&self) -> OrgRole {
      self.role
   }

   pub fn email(&self) -> &str {
      &self.email
   }

   pub fn name(&self) -> &str {
      &self.name
   }

   pub fn created_at(&self) -> DateTime<Utc> {
      self.created_at
   }

   pub fn last_accessed_at(&self) -> DateTime<Utc> {
      self.last_accessed_at
   }
}

/// OAuth 認可リクエスト時に保存する state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthState {
   /// ログイン後のリダイレクト先（アプリ内パス）
   pub return_to: Option<String>,
   pub created_at: DateTime<Utc>,
}

/// セッション管理トレイト
#[async_trait]
pub trait SessionManager: Send + Sync {
   /// セッションを作成し、セッション ID を返す
   ///
   /// セッション ID は UUID v4（暗号論的に安全なランダム値）。
   async fn create(&self, data: &SessionData) -> Result<String, InfraError>;

   /// セッションを取得する
   async fn get(&self, session_id: &str) -> Result<Option<SessionData>, InfraError>;

   /// セッションを上書きする（TTL は更新時点から 8 時間）
   async fn update(&self, session_id: &str, data: &SessionData) -> Result<(), InfraError>;

   /// セッションと CSRF トークンを削除する
   ///
   /// 存在しないセッションを削除しても成功とする。
   async fn delete(&self, session_id: &str) -> Result<(), InfraError>;

   /// CSRF トークンを生成して保存する
   async fn create_csrf_token(&self, session_id: &str) -> Result<String, InfraError>;

   /// CSRF トークンを取得する
   async fn get_csrf_token(&self, session_id: &str) -> Result<Option<String>, InfraError>;

   /// OAuth state を保存する（10 分間有効）
   async fn store_oauth_state(&self, state: &str, data: &OAuthState) -> Result<(), InfraError>;

   /// OAuth state を取り出して削除する
   ///
   /// 同じ state は一度しか使えない。
   async fn take_oauth_state(&self, state: &str) -> Result<Option<OAuthState>, InfraError>;

   /// 疎通確認（readiness チェック用）
   async fn ping(&self) -> Result<(), InfraError>;
}

/// Redis を使用したセッションマネージャ
#[derive(Clone)]
pub struct RedisSessionManager {
   conn: ConnectionManager,
}

impl RedisSessionManager {
   /// 新しい RedisSessionManager を作成する
   ///
   /// # 引数
   ///
   /// - `redis_url`: Redis 接続 URL（例: `redis://localhost:6379`）
   pub async fn new(redis_url: &str) -> Result<Self, InfraError> {
      let client = redis::Client::open(redis_url)?;
      let conn = ConnectionManager::new(client).await?;
      Ok(Self { conn })
   }

   fn session_key(session_id: &str) -> String {
      format!("session:{session_id}")
   }

   fn csrf_key(session_id: &str) -> String {
      format!("csrf:{session_id}")
   }

   fn oauth_state_key(state: &str) -> String {
      format!("oauth_state:{state}")
   }
}

/// ランダムなトークンを生成する（UUID v4 2 つ分、64 文字の 16 進数）
pub fn random_token() -> String {
   format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

#[async_trait]
impl SessionManager for RedisSessionManager {
   async fn create(&self, data: &SessionData) -> Result<String, InfraError> {
      let session_id = Uuid::new_v4().to_string();
      let json = serde_json::to_string(data)?;

      let mut conn = self.conn.clone();
      let _: () = conn
         .set_ex(Self::session_key(&session_id), json, SESSION_TTL_SECONDS)
         .await?;

      Ok(session_id)
   }

   async fn get(&self, session_id: &str) -> Result<Option<SessionData>, InfraError> {
      let mut conn = self.conn.clone();
      let result: Option<String> = conn.get(Self::session_key(session_id)).await?;

      match result {
         Some(json) => Ok(Some(serde_json::from_str(&json)?)),
         None => Ok(None),
      }
   }

   async fn update(&self, session_id: &str, data: &SessionData) -> Result<(), InfraError> {
      let json = serde_json::to_string(data)?;
      let mut conn = self.conn.clone();
      let _: () = conn
         .set_ex(Self::session_key(session_id), json, SESSION_TTL_SECONDS)
         .await?;
      Ok(())
   }

   async fn delete(&self, session_id: &str) -> Result<(), InfraError> {
      let mut conn = self.conn.clone();
      let keys = vec![Self::session_key(session_id), Self::csrf_key(session_id)];
      let _: () = conn.del(&keys).await?;
      Ok(())
   }

   async fn create_csrf_token(&self, session_id: &str) -> Result<String, InfraError> {
      let token = random_token();
      let mut conn = self.conn.clone();
      let _: () = conn
         .set_ex(Self::csrf_key(session_id), &token, SESSION_TTL_SECONDS)
         .await?;
      Ok(token)
   }

   async fn get_csrf_token(&self, session_id: &str) -> Result<Option<String>, InfraError> {
      let mut conn = self.conn.clone();
      Ok(conn.get(Self::csrf_key(session_id)).await?)
   }

   async fn store_oauth_state(&self, state: &str, data: &OAuthState) -> Result<(), InfraError> {
      let json = serde_json::to_string(data)?;
      let mut conn = self.conn.clone();
      let _: () = conn
         .set_ex(Self::oauth_state_key(state), json, OAUTH_STATE_TTL_SECONDS)
         .await?;
      Ok(())
   }

   async fn take_oauth_state(&self, state: &str) -> Result<Option<OAuthState>, InfraError> {
      let mut conn = self.conn.clone();
      // GETDEL で取得と削除を原子的に行い、state の再利用を防ぐ
      let result: Option<String> = redis::cmd("GETDEL")
         .arg(Self::oauth_state_key(state))
         .query_async(&mut conn)
         .await?;

      match result {
         Some(json) => Ok(Some(serde_json::from_str(&json)?)),
         None => Ok(None),
      }
   }

   async fn ping(&self) -> Result<(), InfraError> {
      let mut conn = self.conn.clone();
      let _: String = redis::cmd("PING").query_async(&mut conn).await?;
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use pretty_assertions::assert_eq;

   use super::*;

   #[test]
   fn test_キーの形式() {
      assert_eq!(RedisSessionManager::session_key("abc"), "session:abc");
      assert_eq!(RedisSessionManager::csrf_key("abc"), "csrf:abc");
      assert_eq!(RedisSessionManager::oauth_state_key("xyz"), "oauth_state:xyz");
   }

   #[test]
   fn test_ランダムトークンは64文字の16進数() {
      let token = random_token();
      assert_eq!(token.len(), 64);
      assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
      assert_ne!(token, random_token());
   }

   #[test]
   fn test_組織を切り替えてもユーザー情報は保持される() {
      let user_id = UserId::new();
      let data = SessionData::new(
         user_id.clone(),
         OrganizationId::new(),
         OrgRole::Owner,
         "taro@example.com".to_string(),
         "山田 太郎".to_string(),
      );
      let other = OrganizationId::new();

      let switched = data.with_organization(other.clone(), OrgRole::Member);

      assert_eq!(switched.user_id(), &user_id);
      assert_eq!(switched.organization_id(), &other);
      assert_eq!(switched.role(), OrgRole::Member);
   }

   #[test]
   fn test_セッションデータはjsonで往復できる() {
      let data = SessionData::new(
         UserId::new(),
         OrganizationId::new(),
         OrgRole::Admin,
         "a@example.com".to_string(),
         "A".to_string(),
      );
      let json = serde_json::to_string(&data).unwrap();
      let restored: SessionData = serde_json::from_str(&json).unwrap();
      assert_eq!(restored.role(), OrgRole::Admin);
      assert_eq!(restored.organization_id(), data.organization_id());
   }
}
