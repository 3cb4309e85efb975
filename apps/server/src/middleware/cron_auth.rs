//! # cron 認証ミドルウェア
//!
//! 外部スケジューラから呼ばれる配信エンドポイントを
//! `Authorization: Bearer <CRON_SECRET>` で保護する。

use std::sync::Arc;

use axum::{
   body::Body,
   extract::State,
   http::{Request, header},
   middleware::Next,
   response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::error::ApiError;

/// cron 認証の状態
#[derive(Clone)]
pub struct CronAuthState {
   pub secret: Arc<str>,
}

fn bearer_token(request: &Request<Body>) -> Option<&str> {
   request
      .headers()
      .get(header::AUTHORIZATION)
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.strip_prefix("Bearer "))
      .map(str::trim)
}

/// Bearer トークンを定数時間で比較する
pub async fn require_cron_secret(
   State(state): State<CronAuthState>,
   request: Request<Body>,
   next: Next,
) -> Response {
   let authorized = bearer_token(&request).is_some_and(|token| {
      !state.secret.is_empty() && bool::from(token.as_bytes().ct_eq(state.secret.as_bytes()))
   });
   if !authorized {
      tracing::warn!("cron エンドポイントへの未認証アクセスを拒否しました");
      return ApiError::Unauthorized.into_response();
   }

   next.run(request).await
}
