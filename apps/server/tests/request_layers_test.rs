//! # 共通レイヤーのテスト
//!
//! サーバーの外側に積むレイヤー（Request ID・キャッシュ制御）が
//! 正しく動作することを検証する。
//!
//! - レスポンスに `X-Request-Id` ヘッダーが含まれる
//! - クライアント提供の `X-Request-Id` がそのまま返される
//! - API レスポンスはキャッシュされない

use axum::{Json, Router, body::Body, middleware::from_fn, routing::get};
use http::{Request, StatusCode, header};
use kokyaku_server::middleware::no_cache;
use kokyaku_shared::observability::{MakeRequestUuidV7, make_request_span};
use pretty_assertions::assert_eq;
use tower::ServiceExt;
use tower_http::{
   request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
   trace::TraceLayer,
};

/// main.rs と同じ順序でレイヤーを積んだ最小限のルーター
fn test_app() -> Router {
   Router::new()
      .route(
         "/api/v1/customers",
         get(|| async { Json(serde_json::json!({"data": []})) }),
      )
      .layer(from_fn(no_cache))
      .layer(PropagateRequestIdLayer::x_request_id())
      .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
      .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
}

fn get_request(request_id: Option<&str>) -> Request<Body> {
   let mut builder = Request::builder().uri("/api/v1/customers");
   if let Some(id) = request_id {
      builder = builder.header("x-request-id", id);
   }
   builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_自動生成のx_request_idはuuid_v7() {
   let response = test_app().oneshot(get_request(None)).await.unwrap();

   assert_eq!(response.status(), StatusCode::OK);
   let value = response
      .headers()
      .get("x-request-id")
      .unwrap()
      .to_str()
      .unwrap();
   let id = uuid::Uuid::parse_str(value).unwrap();
   assert_eq!(id.get_version_num(), 7);
}

#[tokio::test]
async fn test_クライアント提供のx_request_idがそのまま返される() {
   let response = test_app()
      .oneshot(get_request(Some("client-request-1")))
      .await
      .unwrap();

   assert_eq!(
      response.headers().get("x-request-id").unwrap(),
      "client-request-1"
   );
}

#[tokio::test]
async fn test_apiレスポンスはキャッシュされない() {
   let response = test_app().oneshot(get_request(None)).await.unwrap();

   let cache_control = response
      .headers()
      .get(header::CACHE_CONTROL)
      .unwrap()
      .to_str()
      .unwrap();
   assert!(cache_control.contains("no-store"));
}
