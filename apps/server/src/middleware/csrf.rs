//! # CSRF 検証ミドルウェア
//!
//! `/api/v1` 配下の状態変更リクエスト（POST/PUT/PATCH/DELETE）で、
//! `X-CSRF-Token` ヘッダーとセッションに紐づくトークンを定数時間で比較する。
//!
//! トラッキング・配信停止・cron・OAuth のパスは対象外。メールクライアントや
//! 外部スケジューラから呼ばれ、Cookie セッションを持たないため。

use std::sync::Arc;

use axum::{
   Json,
   body::Body,
   extract::State,
   http::{Method, Request, StatusCode},
   middleware::Next,
   response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use kokyaku_infra::SessionManager;
use kokyaku_shared::{
   ErrorResponse,
   event_log::error::{category, kind},
};
use subtle::ConstantTimeEq;

use crate::session::session_id_from;

/// CSRF 検証用のヘッダー名
pub const CSRF_HEADER: &str = "X-CSRF-Token";

/// CSRF 検証の対象となるパスの接頭辞
const PROTECTED_PREFIX: &str = "/api/v1/";

/// `/api/v1` 配下でも検証しないパスの接頭辞
const CSRF_SKIP_PREFIXES: &[&str] = &["/api/v1/auth/google/"];

/// CSRF 検証の状態
#[derive(Clone)]
pub struct CsrfState {
   pub session_manager: Arc<dyn SessionManager>,
}

fn csrf_error_response(detail: &str) -> Response {
   (
      StatusCode::FORBIDDEN,
      Json(ErrorResponse::new(
         "csrf-validation-failed",
         "CSRF Validation Failed",
         403,
         detail,
      )),
   )
      .into_response()
}

/// CSRF 検証が必要なメソッドかどうか
fn requires_csrf_validation(method: &Method) -> bool {
   matches!(
      *method,
      Method::POST | Method::PUT | Method::PATCH | Method::DELETE
   )
}

/// CSRF 検証をスキップするパスかどうか
fn should_skip_csrf(path: &str) -> bool {
   !path.starts_with(PROTECTED_PREFIX)
      || CSRF_SKIP_PREFIXES
         .iter()
         .any(|prefix| path.starts_with(prefix))
}

/// CSRF 検証ミドルウェア
pub async fn csrf_middleware(
   State(state): State<CsrfState>,
   jar: CookieJar,
   request: Request<Body>,
   next: Next,
) -> Response {
   if !requires_csrf_validation(request.method()) || should_skip_csrf(request.uri().path()) {
      return next.run(request).await;
   }

   let Some(session_id) = session_id_from(&jar) else {
      return csrf_error_response("セッションが必要です");
   };

   let Some(provided_token) = request
      .headers()
      .get(CSRF_HEADER)
      .and_then(|v| v.to_str().ok())
      .map(str::to_string)
   else {
      return csrf_error_response("CSRF トークンが必要です");
   };

   match state.session_manager.get_csrf_token(&session_id).await {
      Ok(Some(stored_token)) => {
         let is_valid: bool = stored_token
            .as_bytes()
            .ct_eq(provided_token.as_bytes())
            .into();
         if !is_valid {
            return csrf_error_response("CSRF トークンが無効です");
         }
      }
      Ok(None) => return csrf_error_response("CSRF トークンが無効です"),
      Err(e) => {
         tracing::error!(
            error.category = category::INFRASTRUCTURE,
            error.kind = kind::CSRF_TOKEN,
            "CSRF トークン取得で内部エラー: {}",
            e
         );
         return csrf_error_response("内部エラーが発生しました");
      }
   }

   next.run(request).await
}
