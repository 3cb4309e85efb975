//! # メール送信設定ハンドラ
//!
//! ## エンドポイント
//!
//! - `GET /api/v1/settings/email` - 送信設定（SMTP パスワードは返さない）
//! - `PUT /api/v1/settings/email` - 送信設定の保存（admin）

use std::sync::Arc;

use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::{DateTime, Utc};
use kokyaku_domain::email_settings::{
   EmailProvider,
   EmailSettings,
   EmailSettingsInput,
   SmtpSecurity,
};
use kokyaku_shared::ApiResponse;
use serde::Serialize;

use crate::{error::ApiError, session::CurrentSession, usecase::EmailSettingsUseCaseImpl};

pub struct EmailSettingsState {
   pub usecase: EmailSettingsUseCaseImpl,
}

// --- リクエスト/レスポンス型 ---

#[derive(Debug, Serialize)]
pub struct EmailSettingsDto {
   pub provider:          EmailProvider,
   pub from_name:         Option<String>,
   pub from_address:      Option<String>,
   pub reply_to:          Option<String>,
   pub smtp_host:         Option<String>,
   pub smtp_port:         Option<u16>,
   pub smtp_username:     Option<String>,
   pub smtp_security:     Option<SmtpSecurity>,
   pub has_smtp_password: bool,
   pub updated_at:        DateTime<Utc>,
}

impl From<EmailSettings> for EmailSettingsDto {
   fn from(s: EmailSettings) -> Self {
      let smtp = s.smtp();
      Self {
         provider:          s.provider(),
         from_name:         s.from_name().map(str::to_string),
         from_address:      s.from_address().map(|e| e.as_str().to_string()),
         reply_to:          s.reply_to().map(|e| e.as_str().to_string()),
         smtp_host:         smtp.map(|c| c.host.clone()),
         smtp_port:         smtp.map(|c| c.port),
         smtp_username:     smtp.and_then(|c| c.username.clone()),
         smtp_security:     smtp.map(|c| c.security),
         has_smtp_password: s.has_smtp_password(),
         updated_at:        s.updated_at(),
      }
   }
}

// --- ハンドラ ---

/// GET /api/v1/settings/email
pub async fn get_email_settings(
   State(state): State<Arc<EmailSettingsState>>,
   Extension(session): Extension<CurrentSession>,
) -> Result<impl IntoResponse, ApiError> {
   let settings = state.usecase.get(session.data.organization_id()).await?;
   Ok(Json(ApiResponse::new(EmailSettingsDto::from(settings))))
}

/// PUT /api/v1/settings/email
///
/// `smtp_password` を省略すると保存済みのパスワードを引き継ぐ。
pub async fn update_email_settings(
   State(state): State<Arc<EmailSettingsState>>,
   Extension(session): Extension<CurrentSession>,
   Json(input): Json<EmailSettingsInput>,
) -> Result<impl IntoResponse, ApiError> {
   let settings = state
      .usecase
      .update(session.data.organization_id(), input)
      .await?;
   Ok(Json(ApiResponse::new(EmailSettingsDto::from(settings))))
}

#[cfg(test)]
mod tests {
   use axum::{
      Router,
      body::{Body, to_bytes},
      http::{Request, StatusCode, header},
      routing::get,
   };
   use kokyaku_domain::{
      clock::FixedClock,
      organization::{OrgRole, OrganizationId},
      user::UserId,
   };
   use kokyaku_infra::{SessionData, mock::MockEmailSettingsRepository};
   use pretty_assertions::assert_eq;
   use serde_json::Value;
   use tower::ServiceExt;

   use super::*;

   fn create_test_app() -> Router {
      let state = Arc::new(EmailSettingsState {
         usecase: EmailSettingsUseCaseImpl::new(
            Arc::new(MockEmailSettingsRepository::new()),
            Arc::new(FixedClock::new(Utc::now())),
         ),
      });
      let session = CurrentSession {
         session_id: "session-1".to_string(),
         data:       SessionData::new(
            UserId::new(),
            OrganizationId::new(),
            OrgRole::Admin,
            "taro@example.com".to_string(),
            "山田 太郎".to_string(),
         ),
      };
      Router::new()
         .route(
            "/api/v1/settings/email",
            get(get_email_settings).put(update_email_settings),
         )
         .layer(Extension(session))
         .with_state(state)
   }

   #[tokio::test]
   async fn test_保存後のレスポンスにパスワードを含めない() {
      let sut = create_test_app();

      let response = sut
         .oneshot(
            Request::builder()
               .method("PUT")
               .uri("/api/v1/settings/email")
               .header(header::CONTENT_TYPE, "application/json")
               .body(Body::from(
                  r#"{"provider":"smtp","from_address":"info@example.com","smtp_host":"smtp.example.com","smtp_username":"info@example.com","smtp_password":"super-secret","smtp_security":"starttls"}"#,
               ))
               .unwrap(),
         )
         .await
         .unwrap();

      assert_eq!(response.status(), StatusCode::OK);
      let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
      assert!(!String::from_utf8_lossy(&bytes).contains("super-secret"));
      let body: Value = serde_json::from_slice(&bytes).unwrap();
      assert_eq!(body["data"]["has_smtp_password"], true);
      assert_eq!(body["data"]["smtp_port"], 587);
   }
}
