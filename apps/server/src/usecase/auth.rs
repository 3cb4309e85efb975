//! # 認証ユースケース
//!
//! Google OAuth によるログインと、ログイン時の組織メンバーシップの準備を行う。
//!
//! ## ログインの流れ
//!
//! 1. `start_login`: ランダムな state を Redis に保存し、Google の認可 URL を返す
//! 2. `complete_login`: state を一度だけ消費し、認可コードをトークンに交換する
//! 3. ユーザーを Google の subject で upsert（リフレッシュトークンがあれば保存）
//! 4. 招待を受諾し、それでも所属がなければ個人組織を作って owner にする
//! 5. 最も新しく参加した組織をアクティブにしてセッションを作る

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kokyaku_domain::{
   clock::Clock,
   organization::{Membership, OrgRole, Organization, OrganizationId},
   user::{User, UserId, UserName},
   value_objects::Email,
};
use kokyaku_infra::{
   GoogleOAuthClient,
   GoogleOAuthError,
   SessionData,
   SessionManager,
   repository::{InvitationRepository, OrganizationRepository, OrganizationSummary, UserRepository},
   session::{OAuthState, random_token},
};
use kokyaku_shared::{
   event_log::{
      error::{category as error_category, kind},
      event,
   },
   log_business_event,
};

use crate::error::ApiError;

/// ログイン完了後のリダイレクト先の既定値
const DEFAULT_RETURN_TO: &str = "/";

/// ログイン完了の結果
#[derive(Debug, Clone)]
pub struct LoginOutcome {
   pub session_id: String,
   pub csrf_token: String,
   pub return_to:  String,
   pub session:    SessionData,
}

/// ログイン中のユーザー情報
#[derive(Debug, Clone)]
pub struct CurrentUser {
   pub user:          User,
   pub organization:  Organization,
   pub role:          OrgRole,
   pub organizations: Vec<OrganizationSummary>,
}

/// 認証ユースケース
pub struct AuthUseCaseImpl {
   users:           Arc<dyn UserRepository>,
   organizations:   Arc<dyn OrganizationRepository>,
   invitations:     Arc<dyn InvitationRepository>,
   session_manager: Arc<dyn SessionManager>,
   google:          Arc<dyn GoogleOAuthClient>,
   clock:           Arc<dyn Clock>,
}

impl AuthUseCaseImpl {
   pub fn new(
      users: Arc<dyn UserRepository>,
      organizations: Arc<dyn OrganizationRepository>,
      invitations: Arc<dyn InvitationRepository>,
      session_manager: Arc<dyn SessionManager>,
      google: Arc<dyn GoogleOAuthClient>,
      clock: Arc<dyn Clock>,
   ) -> Self {
      Self {
         users,
         organizations,
         invitations,
         session_manager,
         google,
         clock,
      }
   }

   /// 認可 URL を返す
   ///
   /// `return_to` はアプリ内の相対パスのみ受け付け、それ以外は無視する。
   pub async fn start_login(&self, return_to: Option<String>) -> Result<String, ApiError> {
      let state = random_token();
      let data = OAuthState {
         return_to:  return_to.filter(|path| is_safe_return_path(path)),
         created_at: self.clock.now(),
      };
      self.session_manager.store_oauth_state(&state, &data).await?;
      Ok(self.google.authorization_url(&state))
   }

   /// OAuth コールバックを処理してセッションを作る
   pub async fn complete_login(&self, code: &str, state: &str) -> Result<LoginOutcome, ApiError> {
      let Some(oauth_state) = self.session_manager.take_oauth_state(state).await? else {
         log_business_event!(
            event.category = event::category::AUTH,
            event.action = event::action::LOGIN_FAILURE,
            event.result = event::result::FAILURE,
            event.reason = "invalid_state",
            "OAuth state が無効です"
         );
         return Err(ApiError::BadRequest(
            "ログインの有効期限が切れました。もう一度お試しください".to_string(),
         ));
      };

      let tokens = self
         .google
         .exchange_code(code)
         .await
         .map_err(oauth_error)?;
      let info = self
         .google
         .fetch_userinfo(&tokens.access_token)
         .await
         .map_err(oauth_error)?;
      if !info.email_verified {
         return Err(ApiError::Forbidden(
            "メールアドレスが確認されていない Google アカウントではログインできません".to_string(),
         ));
      }

      let now = self.clock.now();
      let email = Email::new(info.email)?;
      let name = info
         .name
         .filter(|n| !n.trim().is_empty())
         .unwrap_or_else(|| local_part(&email));
      let candidate = User::new(
         UserId::new(),
         email,
         UserName::new(name)?,
         info.sub,
         info.picture,
         now,
      );
      let user = self
         .users
         .upsert_google_user(&candidate, tokens.refresh_token.as_deref())
         .await?;

      let active = self.bootstrap_membership(&user, now).await?;
      let session = SessionData::new(
         user.id().clone(),
         active.organization.id().clone(),
         active.role,
         user.email().as_str().to_string(),
         user.name().as_str().to_string(),
      );
      let session_id = self.session_manager.create(&session).await?;
      let csrf_token = self.session_manager.create_csrf_token(&session_id).await?;

      log_business_event!(
         event.category = event::category::AUTH,
         event.action = event::action::LOGIN_SUCCESS,
         event.entity_type = event::entity_type::SESSION,
         event.organization_id = %active.organization.id(),
         event.actor_id = %user.id(),
         event.result = event::result::SUCCESS,
         "ログインしました"
      );

      Ok(LoginOutcome {
         session_id,
         csrf_token,
         return_to: oauth_state
            .return_to
            .unwrap_or_else(|| DEFAULT_RETURN_TO.to_string()),
         session,
      })
   }

   /// 招待の受諾と個人組織の作成を行い、アクティブにする組織を返す
   async fn bootstrap_membership(
      &self,
      user: &User,
      now: DateTime<Utc>,
   ) -> Result<OrganizationSummary, ApiError> {
      let invitations = self
         .invitations
         .find_pending_by_email(user.email(), now)
         .await?;
      for invitation in &invitations {
         self.invitations.accept(invitation, user.id(), now).await?;
         log_business_event!(
            event.category = event::category::AUTH,
            event.action = event::action::INVITATION_ACCEPTED,
            event.entity_type = event::entity_type::MEMBERSHIP,
            event.organization_id = %invitation.organization_id(),
            event.actor_id = %user.id(),
            event.result = event::result::SUCCESS,
            "招待を受諾しました"
         );
      }

      let mut memberships = self.organizations.list_for_user(user.id()).await?;
      if memberships.is_empty() {
         let organization = Organization::personal_for(user.name().as_str(), now)?;
         let owner = Membership::new(
            organization.id().clone(),
            user.id().clone(),
            OrgRole::Owner,
            now,
         );
         self
            .organizations
            .create_with_owner(&organization, &owner)
            .await?;
         log_business_event!(
            event.category = event::category::AUTH,
            event.action = event::action::ORGANIZATION_BOOTSTRAPPED,
            event.entity_type = event::entity_type::MEMBERSHIP,
            event.organization_id = %organization.id(),
            event.actor_id = %user.id(),
            event.result = event::result::SUCCESS,
            "個人組織を作成しました"
         );
         memberships = self.organizations.list_for_user(user.id()).await?;
      }

      memberships
         .into_iter()
         .next()
         .ok_or_else(|| ApiError::Internal("所属組織を作成できませんでした".to_string()))
   }

   /// ログイン中のユーザーと所属組織
   pub async fn me(&self, session: &SessionData) -> Result<CurrentUser, ApiError> {
      let user = self
         .users
         .find_by_id(session.user_id())
         .await?
         .ok_or(ApiError::Unauthorized)?;
      let organizations = self.organizations.list_for_user(user.id()).await?;
      let current = organizations
         .iter()
         .find(|s| s.organization.id() == session.organization_id())
         .cloned()
         .ok_or_else(|| ApiError::Forbidden("組織に所属していません".to_string()))?;

      Ok(CurrentUser {
         user,
         organization: current.organization,
         role: current.role,
         organizations,
      })
   }

   /// CSRF トークンを返す（なければ発行する）
   pub async fn csrf_token(&self, session_id: &str) -> Result<String, ApiError> {
      match self.session_manager.get_csrf_token(session_id).await? {
         Some(token) => Ok(token),
         None => Ok(self.session_manager.create_csrf_token(session_id).await?),
      }
   }

   /// アクティブな組織を切り替える
   pub async fn switch_organization(
      &self,
      session_id: &str,
      session: SessionData,
      organization_id: OrganizationId,
   ) -> Result<SessionData, ApiError> {
      let membership = self
         .organizations
         .find_membership(&organization_id, session.user_id())
         .await?
         .ok_or_else(|| ApiError::Forbidden("この組織に所属していません".to_string()))?;

      let updated = session.with_organization(organization_id, membership.role());
      self.session_manager.update(session_id, &updated).await?;
      Ok(updated)
   }

   /// セッションを削除する
   ///
   /// セッションストアの障害時もログアウト自体は成功させる。
   pub async fn logout(&self, session_id: &str) {
      if let Err(e) = self.session_manager.delete(session_id).await {
         tracing::error!(
            error.category = error_category::INFRASTRUCTURE,
            error.kind = kind::SESSION,
            "セッション削除に失敗: {}",
            e
         );
         return;
      }
      log_business_event!(
         event.category = event::category::AUTH,
         event.action = event::action::LOGOUT,
         event.entity_type = event::entity_type::SESSION,
         event.result = event::result::SUCCESS,
         "ログアウトしました"
      );
   }
}

fn oauth_error(err: GoogleOAuthError) -> ApiError {
   match err {
      GoogleOAuthError::InvalidGrant(_) => {
         log_business_event!(
            event.category = event::category::AUTH,
            event.action = event::action::LOGIN_FAILURE,
            event.result = event::result::FAILURE,
            event.reason = "invalid_grant",
            "認可コードが無効です"
         );
         ApiError::BadRequest("Google の認可に失敗しました。もう一度お試しください".to_string())
      }
      other => {
         tracing::warn!(
            error.category = error_category::EXTERNAL_SERVICE,
            error.kind = kind::OAUTH,
            "Google OAuth エラー: {}",
            other
         );
         ApiError::BadGateway("Google との通信に失敗しました".to_string())
      }
   }
}

/// ログイン後のリダイレクト先として許可するか（アプリ内の絶対パスのみ）
pub fn is_safe_return_path(path: &str) -> bool {
   path.starts_with('/') && !path.starts_with("//") && !path.contains('\\')
}

fn local_part(email: &Email) -> String {
   email
      .as_str()
      .split('@')
      .next()
      .unwrap_or_default()
      .to_string()
}

#[cfg(test)]
mod tests {
   use chrono::Duration;
   use kokyaku_domain::{clock::FixedClock, organization::Invitation};
   use kokyaku_infra::mock::{
      MockInvitationRepository,
      MockOrganizationRepository,
      MockSessionManager,
      MockUserRepository,
      StubGoogleOAuthClient,
   };
   use pretty_assertions::assert_eq;
   use rstest::rstest;

   use super::*;

   struct Fixture {
      users:         MockUserRepository,
      organizations: MockOrganizationRepository,
      invitations:   MockInvitationRepository,
      sessions:      MockSessionManager,
      usecase:       AuthUseCaseImpl,
   }

   fn fixture_with(google: StubGoogleOAuthClient) -> Fixture {
      let users = MockUserRepository::new();
      let organizations = MockOrganizationRepository::new(users.clone());
      let invitations = MockInvitationRepository::new(organizations.clone());
      let sessions = MockSessionManager::new();
      let usecase = AuthUseCaseImpl::new(
         Arc::new(users.clone()),
         Arc::new(organizations.clone()),
         Arc::new(invitations.clone()),
         Arc::new(sessions.clone()),
         Arc::new(google),
         Arc::new(FixedClock::new(Utc::now())),
      );
      Fixture {
         users,
         organizations,
         invitations,
         sessions,
         usecase,
      }
   }

   fn fixture() -> Fixture {
      fixture_with(StubGoogleOAuthClient::new("google-sub-1", "taro@example.com", "山田 太郎"))
   }

   async fn state_of(fixture: &Fixture, return_to: Option<&str>) -> String {
      let url = fixture
         .usecase
         .start_login(return_to.map(str::to_string))
         .await
         .unwrap();
      url.split("state=").nth(1).unwrap().to_string()
   }

   #[tokio::test]
   async fn test_初回ログインで個人組織を作りownerになる() {
      let fixture = fixture();
      let state = state_of(&fixture, Some("/campaigns")).await;

      let outcome = fixture.usecase.complete_login("code", &state).await.unwrap();

      assert_eq!(outcome.return_to, "/campaigns");
      assert_eq!(outcome.session.role(), OrgRole::Owner);
      assert_eq!(outcome.session.email(), "taro@example.com");
      let memberships = fixture.organizations.memberships();
      assert_eq!(memberships.len(), 1);
      assert_eq!(memberships[0].organization_id(), outcome.session.organization_id());
      assert!(fixture.sessions.session(&outcome.session_id).is_some());
      assert_eq!(
         fixture
            .sessions
            .get_csrf_token(&outcome.session_id)
            .await
            .unwrap(),
         Some(outcome.csrf_token)
      );
   }

   #[tokio::test]
   async fn test_リフレッシュトークンを保存する() {
      let fixture = fixture();
      let state = state_of(&fixture, None).await;

      let outcome = fixture.usecase.complete_login("code", &state).await.unwrap();

      assert_eq!(
         fixture
            .users
            .find_refresh_token(outcome.session.user_id())
            .await
            .unwrap()
            .as_deref(),
         Some("1//stub-refresh-token")
      );
   }

   #[tokio::test]
   async fn test_招待があれば受諾して個人組織は作らない() {
      let fixture = fixture();
      let now = Utc::now();
      let org = Organization::new(
         OrganizationId::new(),
         kokyaku_domain::organization::OrganizationName::new("山田商店").unwrap(),
         now,
      );
      fixture.organizations.add_organization(org.clone());
      let invitation = Invitation::new(
         org.id().clone(),
         Email::new("taro@example.com").unwrap(),
         OrgRole::Admin,
         UserId::new(),
         OrgRole::Owner,
         now - Duration::hours(1),
      )
      .unwrap();
      fixture.invitations.insert(&invitation).await.unwrap();
      let state = state_of(&fixture, None).await;

      let outcome = fixture.usecase.complete_login("code", &state).await.unwrap();

      assert_eq!(outcome.session.organization_id(), org.id());
      assert_eq!(outcome.session.role(), OrgRole::Admin);
      assert_eq!(fixture.organizations.memberships().len(), 1);
      assert!(fixture.invitations.invitations()[0].accepted_at().is_some());
   }

   #[tokio::test]
   async fn test_stateは一度しか使えない() {
      let fixture = fixture();
      let state = state_of(&fixture, None).await;
      fixture.usecase.complete_login("code", &state).await.unwrap();

      let result = fixture.usecase.complete_login("code", &state).await;

      assert!(matches!(result, Err(ApiError::BadRequest(_))));
   }

   #[tokio::test]
   async fn test_無効な認可コードは400() {
      let fixture = fixture();
      let state = state_of(&fixture, None).await;

      let result = fixture.usecase.complete_login("invalid", &state).await;

      assert!(matches!(result, Err(ApiError::BadRequest(_))));
      assert_eq!(fixture.sessions.session_count(), 0);
   }

   #[tokio::test]
   async fn test_未確認のメールアドレスは拒否する() {
      let mut google = StubGoogleOAuthClient::new("sub", "taro@example.com", "太郎");
      google.userinfo.email_verified = false;
      let fixture = fixture_with(google);
      let state = state_of(&fixture, None).await;

      let result = fixture.usecase.complete_login("code", &state).await;

      assert!(matches!(result, Err(ApiError::Forbidden(_))));
   }

   #[tokio::test]
   async fn test_2回目のログインでは組織を増やさない() {
      let fixture = fixture();
      let first = state_of(&fixture, None).await;
      fixture.usecase.complete_login("code", &first).await.unwrap();
      let second = state_of(&fixture, None).await;

      fixture.usecase.complete_login("code", &second).await.unwrap();

      assert_eq!(fixture.organizations.memberships().len(), 1);
   }

   #[tokio::test]
   async fn test_所属していない組織には切り替えられない() {
      let fixture = fixture();
      let state = state_of(&fixture, None).await;
      let outcome = fixture.usecase.complete_login("code", &state).await.unwrap();

      let result = fixture
         .usecase
         .switch_organization(&outcome.session_id, outcome.session, OrganizationId::new())
         .await;

      assert!(matches!(result, Err(ApiError::Forbidden(_))));
   }

   #[tokio::test]
   async fn test_ログアウトでセッションを削除する() {
      let fixture = fixture();
      let state = state_of(&fixture, None).await;
      let outcome = fixture.usecase.complete_login("code", &state).await.unwrap();

      fixture.usecase.logout(&outcome.session_id).await;

      assert!(fixture.sessions.session(&outcome.session_id).is_none());
   }

   #[rstest]
   #[case("/campaigns/1", true)]
   #[case("/", true)]
   #[case("//evil.example.com", false)]
   #[case("https://evil.example.com", false)]
   #[case("/\\evil.example.com", false)]
   fn test_リダイレクト先のパス判定(#[case] path: &str, #[case] expected: bool) {
      assert_eq!(is_safe_return_path(path), expected);
   }
}
