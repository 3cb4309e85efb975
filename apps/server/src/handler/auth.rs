//! # 認証ハンドラ
//!
//! ## エンドポイント
//!
//! - `GET /api/v1/auth/google/login` - Google の認可画面へリダイレクト
//! - `GET /api/v1/auth/google/callback` - ログイン完了、セッション Cookie を発行
//! - `GET /api/v1/auth/me` - ログイン中のユーザーと組織
//! - `GET /api/v1/auth/csrf` - CSRF トークン
//! - `POST /api/v1/auth/switch-organization` - アクティブな組織の切り替え
//! - `POST /api/v1/auth/logout` - ログアウト

use std::sync::Arc;

use axum::{
   Extension,
   Json,
   extract::{Query, State},
   http::StatusCode,
   response::{IntoResponse, Redirect},
};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Utc};
use kokyaku_domain::{
   organization::{OrgRole, OrganizationId},
   user::UserId,
};
use kokyaku_shared::ApiResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
   error::ApiError,
   session::{CurrentSession, build_clear_cookie, build_session_cookie, session_id_from},
   usecase::{AuthUseCaseImpl, CurrentUser},
};

/// 認証ハンドラの共有状態
pub struct AuthState {
   pub usecase:       AuthUseCaseImpl,
   pub cookie_secure: bool,
}

// --- リクエスト/レスポンス型 ---

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
   pub return_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
   pub code:  Option<String>,
   pub state: Option<String>,
   /// ユーザーが同意しなかった場合などに Google が付ける
   pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SwitchOrganizationRequest {
   pub organization_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct UserDto {
   pub id:         UserId,
   pub email:      String,
   pub name:       String,
   pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrganizationMembershipDto {
   pub id:   OrganizationId,
   pub name: String,
   pub role: OrgRole,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
   pub user:          UserDto,
   pub organization:  OrganizationMembershipDto,
   pub organizations: Vec<OrganizationMembershipDto>,
}

impl From<CurrentUser> for MeResponse {
   fn from(current: CurrentUser) -> Self {
      Self {
         user:          UserDto {
            id:         current.user.id().clone(),
            email:      current.user.email().as_str().to_string(),
            name:       current.user.name().as_str().to_string(),
            avatar_url: current.user.avatar_url().map(str::to_string),
         },
         organization:  OrganizationMembershipDto {
            id:   current.organization.id().clone(),
            name: current.organization.name().to_string(),
            role: current.role,
         },
         organizations: current
            .organizations
            .into_iter()
            .map(|s| OrganizationMembershipDto {
               id:   s.organization.id().clone(),
               name: s.organization.name().to_string(),
               role: s.role,
            })
            .collect(),
      }
   }
}

#[derive(Debug, Serialize)]
pub struct CsrfResponse {
   pub token: String,
}

#[derive(Debug, Serialize)]
pub struct SessionDto {
   pub organization_id: OrganizationId,
   pub role:            OrgRole,
   pub created_at:      DateTime<Utc>,
}

// --- ハンドラ ---

/// GET /api/v1/auth/google/login
pub async fn google_login(
   State(state): State<Arc<AuthState>>,
   Query(query): Query<LoginQuery>,
) -> Result<Redirect, ApiError> {
   let url = state.usecase.start_login(query.return_to).await?;
   Ok(Redirect::to(&url))
}

/// GET /api/v1/auth/google/callback
///
/// セッション Cookie を付けてアプリ内の `return_to` へリダイレクトする。
pub async fn google_callback(
   State(state): State<Arc<AuthState>>,
   Query(query): Query<CallbackQuery>,
   jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
   if let Some(error) = query.error {
      return Err(ApiError::BadRequest(format!(
         "Google ログインが完了しませんでした: {error}"
      )));
   }
   let (Some(code), Some(oauth_state)) = (query.code, query.state) else {
      return Err(ApiError::BadRequest(
         "code と state は必須です".to_string(),
      ));
   };

   let outcome = state.usecase.complete_login(&code, &oauth_state).await?;
   let jar = jar.add(build_session_cookie(&outcome.session_id, state.cookie_secure));
   Ok((jar, Redirect::to(&outcome.return_to)))
}

/// GET /api/v1/auth/me
pub async fn me(
   State(state): State<Arc<AuthState>>,
   Extension(session): Extension<CurrentSession>,
) -> Result<impl IntoResponse, ApiError> {
   let current = state.usecase.me(&session.data).await?;
   Ok(Json(ApiResponse::new(MeResponse::from(current))))
}

/// GET /api/v1/auth/csrf
pub async fn csrf(
   State(state): State<Arc<AuthState>>,
   Extension(session): Extension<CurrentSession>,
) -> Result<impl IntoResponse, ApiError> {
   let token = state.usecase.csrf_token(&session.session_id).await?;
   Ok(Json(ApiResponse::new(CsrfResponse { token })))
}

/// POST /api/v1/auth/switch-organization
pub async fn switch_organization(
   State(state): State<Arc<AuthState>>,
   Extension(session): Extension<CurrentSession>,
   Json(req): Json<SwitchOrganizationRequest>,
) -> Result<impl IntoResponse, ApiError> {
   let data = state
      .usecase
      .switch_organization(
         &session.session_id,
         session.data,
         OrganizationId::from_uuid(req.organization_id),
      )
      .await?;
   Ok(Json(ApiResponse::new(SessionDto {
      organization_id: data.organization_id().clone(),
      role:            data.role(),
      created_at:      data.created_at(),
   })))
}

/// POST /api/v1/auth/logout
///
/// セッションがなくても Cookie を消して 204 を返す。
pub async fn logout(State(state): State<Arc<AuthState>>, jar: CookieJar) -> impl IntoResponse {
   if let Some(session_id) = session_id_from(&jar) {
      state.usecase.logout(&session_id).await;
   }
   let jar = jar.add(build_clear_cookie(state.cookie_secure));
   (jar, StatusCode::NO_CONTENT)
}
