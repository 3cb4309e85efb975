//! # 認可ミドルウェア
//!
//! セッションを検証し、組織ロールによるアクセス制御を行う。
//! 通過したリクエストには [`CurrentSession`] を拡張として載せる。
//!
//! ロールはセッション作成時の値ではなく、リクエストごとに引き直した
//! メンバーシップの値で判定する。削除・降格は次のリクエストから効く。
//!
//! ## 使い方
//!
//! ```rust,ignore
//! use axum::middleware::from_fn_with_state;
//!
//! let admin = AuthzState {
//!     session_manager: session_manager.clone(),
//!     organizations:   organizations.clone(),
//!     required_role:   OrgRole::Admin,
//! };
//!
//! Router::new()
//!     .route("/api/v1/campaigns/{id}/send", post(send_campaign))
//!     .layer(from_fn_with_state(admin, require_role))
//! ```

use std::sync::Arc;

use axum::{
   body::Body,
   extract::State,
   http::Request,
   middleware::Next,
   response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use kokyaku_domain::organization::OrgRole;
use kokyaku_infra::{SessionManager, repository::OrganizationRepository};
use kokyaku_shared::event_log::error::{category, kind};

use crate::{
   error::ApiError,
   session::{CurrentSession, session_id_from},
};

/// 認可ミドルウェアの状態
#[derive(Clone)]
pub struct AuthzState {
   pub session_manager: Arc<dyn SessionManager>,
   pub organizations:   Arc<dyn OrganizationRepository>,
   pub required_role:   OrgRole,
}

/// 認可ミドルウェア
///
/// セッションがなければ 401、組織から外れているかロールが不足していれば 403 を返す。
pub async fn require_role(
   State(state): State<AuthzState>,
   jar: CookieJar,
   mut request: Request<Body>,
   next: Next,
) -> Response {
   let Some(session_id) = session_id_from(&jar) else {
      return ApiError::Unauthorized.into_response();
   };

   let data = match state.session_manager.get(&session_id).await {
      Ok(Some(data)) => data,
      Ok(None) => return ApiError::Unauthorized.into_response(),
      Err(e) => {
         tracing::error!(
            error.category = category::INFRASTRUCTURE,
            error.kind = kind::SESSION,
            "セッション取得で内部エラー: {}",
            e
         );
         return ApiError::Internal("セッションを取得できません".to_string()).into_response();
      }
   };

   let membership = match state
      .organizations
      .find_membership(data.organization_id(), data.user_id())
      .await
   {
      Ok(Some(membership)) => membership,
      Ok(None) => {
         tracing::info!(
            organization_id = %data.organization_id(),
            user_id = %data.user_id(),
            "組織から外れたユーザーのセッションを拒否しました"
         );
         return ApiError::Forbidden("この組織のメンバーではありません".to_string()).into_response();
      }
      Err(e) => {
         tracing::error!(
            error.category = category::INFRASTRUCTURE,
            error.kind = kind::DATABASE,
            "メンバーシップ取得で内部エラー: {}",
            e
         );
         return ApiError::Internal("メンバーシップを取得できません".to_string()).into_response();
      }
   };
   let organization_id = data.organization_id().clone();
   let data = data.with_organization(organization_id, membership.role());

   if !data.role().at_least(state.required_role) {
      return ApiError::Forbidden(format!(
         "この操作には {} 以上のロールが必要です",
         state.required_role
      ))
      .into_response();
   }

   let span = tracing::Span::current();
   span.record("organization_id", tracing::field::display(data.organization_id()));
   span.record("user_id", tracing::field::display(data.user_id()));

   request
      .extensions_mut()
      .insert(CurrentSession { session_id, data });
   next.run(request).await
}

#[cfg(test)]
mod tests {
   use axum::{
      Extension,
      Router,
      http::{Method, StatusCode},
      routing::get,
   };
   use chrono::DateTime;
   use kokyaku_domain::{
      organization::{Membership, OrganizationId},
      user::UserId,
   };
   use kokyaku_infra::{
      SessionData,
      mock::{MockOrganizationRepository, MockSessionManager, MockUserRepository},
   };
   use tower::ServiceExt;

   use super::*;

   async fn whoami(Extension(session): Extension<CurrentSession>) -> String {
      format!("{} {}", session.data.email(), session.data.role())
   }

   /// セッション上のロールと組織側の現在のロールを別々に持つフィクスチャ
   struct Fixture {
      sessions:      MockSessionManager,
      organizations: MockOrganizationRepository,
      session:       SessionData,
   }

   impl Fixture {
      /// セッションと同じロールのメンバーシップを持つ状態で作る
      fn with(role: OrgRole) -> Self {
         let fixture = Self::session_only(role);
         fixture.grant(role);
         fixture
      }

      /// セッションだけがあり、メンバーシップがない状態で作る
      fn session_only(role: OrgRole) -> Self {
         let session = SessionData::new(
            UserId::new(),
            OrganizationId::new(),
            role,
            "user@example.com".to_string(),
            "利用者".to_string(),
         );
         let sessions = MockSessionManager::new();
         sessions.insert_session("sid", session.clone(), "csrf");
         Self {
            sessions,
            organizations: MockOrganizationRepository::new(MockUserRepository::new()),
            session,
         }
      }

      fn grant(&self, role: OrgRole) {
         self.organizations.add_membership(Membership::new(
            self.session.organization_id().clone(),
            self.session.user_id().clone(),
            role,
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
         ));
      }

      fn app(&self, required_role: OrgRole) -> Router {
         let state = AuthzState {
            session_manager: Arc::new(self.sessions.clone()),
            organizations: Arc::new(self.organizations.clone()),
            required_role,
         };
         Router::new()
            .route("/test", get(whoami))
            .layer(axum::middleware::from_fn_with_state(state, require_role))
      }
   }

   fn request(cookie: Option<&str>) -> Request<Body> {
      let mut builder = Request::builder().method(Method::GET).uri("/test");
      if let Some(cookie) = cookie {
         builder = builder.header("Cookie", cookie);
      }
      builder.body(Body::empty()).unwrap()
   }

   #[tokio::test]
   async fn test_必要なロールを持つユーザーは通過しセッションを受け取れる() {
      let sut = Fixture::with(OrgRole::Admin).app(OrgRole::Admin);

      let response = sut.oneshot(request(Some("session_id=sid"))).await.unwrap();

      assert_eq!(response.status(), StatusCode::OK);
      let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
      assert_eq!(&body[..], "user@example.com admin".as_bytes());
   }

   #[tokio::test]
   async fn test_上位ロールは下位ロールのルートを通過する() {
      let sut = Fixture::with(OrgRole::Owner).app(OrgRole::Member);

      let response = sut.oneshot(request(Some("session_id=sid"))).await.unwrap();

      assert_eq!(response.status(), StatusCode::OK);
   }

   #[tokio::test]
   async fn test_ロール不足は403() {
      let sut = Fixture::with(OrgRole::Member).app(OrgRole::Admin);

      let response = sut.oneshot(request(Some("session_id=sid"))).await.unwrap();

      assert_eq!(response.status(), StatusCode::FORBIDDEN);
   }

   #[tokio::test]
   async fn test_cookieがなければ401() {
      let sut = Fixture::with(OrgRole::Owner).app(OrgRole::Member);

      let response = sut.oneshot(request(None)).await.unwrap();

      assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
   }

   #[tokio::test]
   async fn test_存在しないセッションは401() {
      let sut = Fixture::with(OrgRole::Owner).app(OrgRole::Member);

      let response = sut.oneshot(request(Some("session_id=unknown"))).await.unwrap();

      assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
   }

   #[tokio::test]
   async fn test_組織から外されたユーザーはセッションが残っていても403() {
      let sut = Fixture::session_only(OrgRole::Admin).app(OrgRole::Member);

      let response = sut.oneshot(request(Some("session_id=sid"))).await.unwrap();

      assert_eq!(response.status(), StatusCode::FORBIDDEN);
   }

   #[tokio::test]
   async fn test_降格されたadminは管理ルートで403() {
      let fixture = Fixture::session_only(OrgRole::Admin);
      fixture.grant(OrgRole::Member);
      let sut = fixture.app(OrgRole::Admin);

      let response = sut.oneshot(request(Some("session_id=sid"))).await.unwrap();

      assert_eq!(response.status(), StatusCode::FORBIDDEN);
   }

   #[tokio::test]
   async fn test_後続のハンドラには現在のロールが渡る() {
      let fixture = Fixture::session_only(OrgRole::Admin);
      fixture.grant(OrgRole::Member);
      let sut = fixture.app(OrgRole::Member);

      let response = sut.oneshot(request(Some("session_id=sid"))).await.unwrap();

      assert_eq!(response.status(), StatusCode::OK);
      let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
      assert_eq!(&body[..], "user@example.com member".as_bytes());
   }
}
