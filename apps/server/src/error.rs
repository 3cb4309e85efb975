//! # API エラー定義
//!
//! ユースケース・ハンドラで発生するエラーと、HTTP レスポンスへの変換を定義する。
//!
//! ## 設計方針
//!
//! - **本文は RFC 9457**: `kokyaku_shared::ErrorResponse` をそのまま返す
//! - **5xx は詳細を隠す**: 原因はログにだけ出し、レスポンスは固定文言
//! - **下位層のエラーは `From` で変換**: ドメインエラー・インフラエラー・送信エラーを
//!   ハンドラで個別に分岐させない

use axum::{
   Json,
   http::StatusCode,
   response::{IntoResponse, Response},
};
use kokyaku_domain::{DomainError, mail::MailError};
use kokyaku_infra::InfraError;
use kokyaku_shared::{
   ErrorResponse,
   event_log::error::{category, kind},
};
use thiserror::Error;

/// API で発生するエラー
#[derive(Debug, Error)]
pub enum ApiError {
   /// セッションがない、または期限切れ
   #[error("認証が必要です")]
   Unauthorized,

   /// リソースが見つからない
   #[error("リソースが見つかりません: {0}")]
   NotFound(String),

   /// 不正なリクエスト（入力値の検証失敗を含む）
   #[error("不正なリクエスト: {0}")]
   BadRequest(String),

   /// 組織ロールの不足
   #[error("権限がありません: {0}")]
   Forbidden(String),

   /// 状態遷移の不整合・重複
   #[error("競合が発生しました: {0}")]
   Conflict(String),

   /// 外部サービス（Google / Gmail API / SMTP）の失敗
   #[error("外部サービスエラー: {0}")]
   BadGateway(String),

   /// データベース・Redis のエラー
   #[error("インフラエラー: {0}")]
   Infra(InfraError),

   /// 内部エラー
   #[error("内部エラー: {0}")]
   Internal(String),
}

impl From<DomainError> for ApiError {
   fn from(err: DomainError) -> Self {
      match err {
         DomainError::Validation(msg) => Self::BadRequest(msg),
         DomainError::NotFound { .. } => Self::NotFound(err.to_string()),
         DomainError::Conflict(msg) => Self::Conflict(msg),
         DomainError::Forbidden(msg) => Self::Forbidden(msg),
      }
   }
}

impl From<InfraError> for ApiError {
   fn from(err: InfraError) -> Self {
      if let Some((entity, id)) = err.as_conflict() {
         return Self::Conflict(format!("{entity} が他の操作と競合しました: {id}"));
      }
      Self::Infra(err)
   }
}

impl From<MailError> for ApiError {
   fn from(err: MailError) -> Self {
      match err {
         MailError::Misconfigured(msg) => Self::BadRequest(msg),
         MailError::SendFailed(msg) | MailError::AuthFailed(msg) | MailError::RateLimited(msg) => {
            Self::BadGateway(msg)
         }
         MailError::TemplateFailed(msg) => Self::Internal(msg),
      }
   }
}

impl IntoResponse for ApiError {
   fn into_response(self) -> Response {
      let body = match &self {
         ApiError::Unauthorized => ErrorResponse::unauthorized("認証が必要です"),
         ApiError::NotFound(msg) => ErrorResponse::not_found(msg.clone()),
         ApiError::BadRequest(msg) => ErrorResponse::validation_error(msg.clone()),
         ApiError::Forbidden(msg) => ErrorResponse::forbidden(msg.clone()),
         ApiError::Conflict(msg) => ErrorResponse::conflict(msg.clone()),
         ApiError::BadGateway(msg) => {
            tracing::warn!(
               error.category = category::EXTERNAL_SERVICE,
               error.kind = kind::MAIL_TRANSPORT,
               "外部サービスエラー: {}",
               msg
            );
            ErrorResponse::bad_gateway(msg.clone())
         }
         ApiError::Infra(e) => {
            tracing::error!(
               error.category = category::INFRASTRUCTURE,
               error.kind = kind::DATABASE,
               "インフラエラー: {}\n{}",
               e,
               e.span_trace()
            );
            ErrorResponse::internal_error()
         }
         ApiError::Internal(msg) => {
            tracing::error!(error.kind = kind::INTERNAL, "内部エラー: {}", msg);
            ErrorResponse::internal_error()
         }
      };
      let status =
         StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
      (status, Json(body)).into_response()
   }
}
