//! SessionManager 統合テスト
//!
//! Redis を使用したテスト。テストごとにキーをクリーンアップする。
//!
//! 実行方法:
//! ```bash
//! docker compose up -d redis
//! cargo test -p kokyaku-infra --test session_test -- --ignored
//! ```

use chrono::Utc;
use kokyaku_domain::{
   organization::{OrgRole, OrganizationId},
   user::UserId,
};
use kokyaku_infra::session::{OAuthState, RedisSessionManager, SessionData, SessionManager};
use pretty_assertions::assert_eq;

/// テスト用の Redis URL
fn redis_url() -> String {
   std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

fn test_session_data() -> SessionData {
   SessionData::new(
      UserId::new(),
      OrganizationId::new(),
      OrgRole::Member,
      "test@example.com".to_string(),
      "Test User".to_string(),
   )
}

#[tokio::test]
#[ignore = "Redis が必要"]
async fn test_セッションを作成して取得できる() {
   let manager = RedisSessionManager::new(&redis_url()).await.unwrap();
   let data = test_session_data();

   let session_id = manager.create(&data).await.unwrap();
   let stored = manager.get(&session_id).await.unwrap().unwrap();

   assert_eq!(stored.user_id(), data.user_id());
   assert_eq!(stored.role(), OrgRole::Member);

   manager.delete(&session_id).await.unwrap();
}

#[tokio::test]
#[ignore = "Redis が必要"]
async fn test_削除したセッションとcsrfトークンは取得できない() {
   let manager = RedisSessionManager::new(&redis_url()).await.unwrap();
   let session_id = manager.create(&test_session_data()).await.unwrap();
   manager.create_csrf_token(&session_id).await.unwrap();

   manager.delete(&session_id).await.unwrap();

   assert!(manager.get(&session_id).await.unwrap().is_none());
   assert!(manager.get_csrf_token(&session_id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "Redis が必要"]
async fn test_oauth_stateは一度しか取り出せない() {
   let manager = RedisSessionManager::new(&redis_url()).await.unwrap();
   let state = kokyaku_infra::session::random_token();
   let data = OAuthState {
      return_to:  Some("/customers".to_string()),
      created_at: Utc::now(),
   };
   manager.store_oauth_state(&state, &data).await.unwrap();

   let first = manager.take_oauth_state(&state).await.unwrap();
   let second = manager.take_oauth_state(&state).await.unwrap();

   assert_eq!(first, Some(data));
   assert!(second.is_none());
}
