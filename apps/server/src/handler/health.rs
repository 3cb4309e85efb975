//! # ヘルスチェックハンドラ
//!
//! ## エンドポイント
//!
//! - `GET /health` - プロセスが応答できるか（liveness）
//! - `GET /health/ready` - PostgreSQL と Redis に接続できるか（readiness）

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use kokyaku_infra::{SessionManager, db};
use kokyaku_shared::{CheckStatus, HealthResponse, ReadinessResponse, ReadinessStatus};
use sqlx::PgPool;

/// 依存サービスごとのチェックのタイムアウト
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Readiness チェックの共有状態
pub struct ReadinessState {
   pub pool:            PgPool,
   pub session_manager: Arc<dyn SessionManager>,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
   Json(HealthResponse::healthy(env!("CARGO_PKG_VERSION")))
}

/// GET /health/ready
///
/// どれか 1 つでも失敗したら 503 を返す。
#[tracing::instrument(skip_all)]
pub async fn readiness_check(State(state): State<Arc<ReadinessState>>) -> impl IntoResponse {
   let (database, redis) = tokio::join!(
      check("database", db::ping(&state.pool)),
      check("redis", state.session_manager.ping()),
   );
   let response = ReadinessResponse::from_checks(HashMap::from([
      ("database".to_string(), database),
      ("redis".to_string(), redis),
   ]));
   let status = match response.status {
      ReadinessStatus::Ready => StatusCode::OK,
      ReadinessStatus::NotReady => StatusCode::SERVICE_UNAVAILABLE,
   };
   (status, Json(response))
}

async fn check<E: std::fmt::Display>(
   name: &str,
   ping: impl Future<Output = Result<(), E>>,
) -> CheckStatus {
   match tokio::time::timeout(CHECK_TIMEOUT, ping).await {
      Ok(Ok(())) => CheckStatus::Ok,
      Ok(Err(e)) => {
         tracing::warn!(error = %e, "readiness check: {name} failed");
         CheckStatus::Error
      }
      Err(_) => {
         tracing::warn!("readiness check: {name} timed out");
         CheckStatus::Error
      }
   }
}

#[cfg(test)]
mod tests {
   use axum::{Router, body::Body, http::Request, routing::get};
   use tower::ServiceExt;

   use super::*;

   #[tokio::test]
   async fn test_healthは常に200を返す() {
      let sut = Router::new().route("/health", get(health_check));

      let response = sut
         .oneshot(Request::get("/health").body(Body::empty()).unwrap())
         .await
         .unwrap();

      assert_eq!(response.status(), StatusCode::OK);
      let body = axum::body::to_bytes(response.into_body(), usize::MAX)
         .await
         .unwrap();
      let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
      assert_eq!(json["status"], "healthy");
   }

   #[tokio::test]
   async fn test_失敗したチェックはエラー扱い() {
      let down = async { Err::<(), _>("connection refused") };

      assert_eq!(check("redis", down).await, CheckStatus::Error);
   }

   #[tokio::test]
   async fn test_成功したチェックはok() {
      assert_eq!(check("database", async { Ok::<(), String>(()) }).await, CheckStatus::Ok);
   }
}
