//! # トラッキング・配信停止ハンドラ
//!
//! メール本文に埋め込まれた署名付き URL の受け口。セッションは不要。
//!
//! ## エンドポイント
//!
//! - `GET /t/open/{recipient_id}.gif?s=` - 開封ピクセル
//! - `GET /t/click/{recipient_id}?u=&s=` - クリックの記録とリダイレクト
//! - `GET /u/{recipient_id}?s=` - 配信停止の確認ページ
//! - `POST /u/{recipient_id}?s=` - 配信停止（ワンクリック配信停止を含む）

use std::sync::Arc;

use axum::{
   extract::{Path, Query, State},
   http::{HeaderMap, StatusCode, header},
   response::{Html, IntoResponse, Response},
};
use serde::Deserialize;

use crate::{
   error::ApiError,
   usecase::{HtmlPage, RequestMeta, TrackingUseCaseImpl},
};

/// 1x1 の透過 GIF
pub const TRANSPARENT_GIF: &[u8] = &[
   0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00,
   0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00, 0x00, 0x00,
   0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

pub struct TrackingState {
   pub usecase: TrackingUseCaseImpl,
}

// --- リクエスト/レスポンス型 ---

#[derive(Debug, Default, Deserialize)]
pub struct SignatureQuery {
   pub s: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClickQuery {
   pub u: Option<String>,
   pub s: Option<String>,
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
   headers
      .get(name)
      .and_then(|v| v.to_str().ok())
      .map(str::trim)
      .filter(|v| !v.is_empty())
}

fn request_meta(headers: &HeaderMap) -> RequestMeta {
   RequestMeta {
      user_agent: header_value(headers, header::USER_AGENT.as_str()).map(str::to_string),
      // 先頭がクライアントのアドレス
      ip:         header_value(headers, "x-forwarded-for")
         .and_then(|v| v.split(',').next())
         .map(|v| v.trim().to_string())
         .or_else(|| header_value(headers, "x-real-ip").map(str::to_string)),
   }
}

fn html_response(page: HtmlPage) -> Response {
   (page.status, Html(page.html)).into_response()
}

// --- ハンドラ ---

/// GET /t/open/{recipient_id}.gif
///
/// 署名が不正でも記録が失敗しても、常に 200 で画像を返す。
pub async fn track_open(
   State(state): State<Arc<TrackingState>>,
   Path(file): Path<String>,
   Query(query): Query<SignatureQuery>,
   headers: HeaderMap,
) -> impl IntoResponse {
   let recipient_id = file.strip_suffix(".gif").unwrap_or(&file);
   let signature = query.s.unwrap_or_default();
   state
      .usecase
      .record_open(recipient_id, &signature, &request_meta(&headers))
      .await;

   (
      StatusCode::OK,
      [
         (header::CONTENT_TYPE, "image/gif"),
         (
            header::CACHE_CONTROL,
            "no-store, no-cache, must-revalidate, private",
         ),
      ],
      TRANSPARENT_GIF,
   )
}

/// GET /t/click/{recipient_id}
pub async fn track_click(
   State(state): State<Arc<TrackingState>>,
   Path(recipient_id): Path<String>,
   Query(query): Query<ClickQuery>,
   headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
   let (Some(target), Some(signature)) = (query.u, query.s) else {
      return Err(ApiError::BadRequest("リンクが無効です".to_string()));
   };
   let target = state
      .usecase
      .record_click(&recipient_id, &target, &signature, &request_meta(&headers))
      .await?;
   Ok((StatusCode::FOUND, [(header::LOCATION, target)]))
}

/// GET /u/{recipient_id}
pub async fn unsubscribe_page(
   State(state): State<Arc<TrackingState>>,
   Path(recipient_id): Path<String>,
   Query(query): Query<SignatureQuery>,
) -> Result<Response, ApiError> {
   let page = state
      .usecase
      .unsubscribe_page(&recipient_id, query.s.as_deref().unwrap_or_default())
      .await?;
   Ok(html_response(page))
}

/// POST /u/{recipient_id}
///
/// 確認ページのフォームと、メールクライアントのワンクリック配信停止
/// （RFC 8058）の両方から呼ばれる。本文は参照しない。
pub async fn unsubscribe(
   State(state): State<Arc<TrackingState>>,
   Path(recipient_id): Path<String>,
   Query(query): Query<SignatureQuery>,
   headers: HeaderMap,
) -> Result<Response, ApiError> {
   let page = state
      .usecase
      .unsubscribe(
         &recipient_id,
         query.s.as_deref().unwrap_or_default(),
         &request_meta(&headers),
      )
      .await?;
   Ok(html_response(page))
}
