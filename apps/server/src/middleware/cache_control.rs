//! # キャッシュ制御ミドルウェア
//!
//! 動的 API レスポンスがブラウザにキャッシュされないよう、
//! `Cache-Control: no-store` を設定する。開封ピクセルのようにハンドラが
//! 自前で指定した場合はそちらを残す。

use axum::{
   extract::Request,
   http::{HeaderValue, header},
   middleware::Next,
   response::Response,
};

/// レスポンスに `Cache-Control: no-store` を付与する
pub async fn no_cache(request: Request, next: Next) -> Response {
   let mut response = next.run(request).await;
   response
      .headers_mut()
      .entry(header::CACHE_CONTROL)
      .or_insert(HeaderValue::from_static("no-store"));
   response
}

#[cfg(test)]
mod tests {
   use axum::{Router, body::Body, http::StatusCode, routing::get};
   use tower::ServiceExt;

   use super::*;

   #[tokio::test]
   async fn test_cache_controlが未設定ならno_storeを付与する() {
      let app = Router::new()
         .route("/", get(|| async { StatusCode::OK }))
         .layer(axum::middleware::from_fn(no_cache));

      let response = app
         .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
         .await
         .unwrap();

      assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
   }

   #[tokio::test]
   async fn test_ハンドラが指定したcache_controlは上書きしない() {
      let app = Router::new()
         .route(
            "/",
            get(|| async { ([(header::CACHE_CONTROL, "no-cache, max-age=0")], "ok") }),
         )
         .layer(axum::middleware::from_fn(no_cache));

      let response = app
         .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
         .await
         .unwrap();

      assert_eq!(
         response.headers()[header::CACHE_CONTROL],
         "no-cache, max-age=0"
      );
   }
}
