//! # セグメントハンドラ
//!
//! ## エンドポイント
//!
//! - `GET /api/v1/segments` - 一覧
//! - `POST /api/v1/segments` - 作成
//! - `POST /api/v1/segments/preview` - 保存前の定義で一致する顧客を確認
//! - `GET /api/v1/segments/{id}` - 詳細
//! - `PUT /api/v1/segments/{id}` - 更新
//! - `DELETE /api/v1/segments/{id}` - 削除
//! - `GET /api/v1/segments/{id}/preview` - 一致する顧客を確認

use std::sync::Arc;

use axum::{
   Extension,
   Json,
   extract::{Path, State},
   http::StatusCode,
   response::IntoResponse,
};
use chrono::{DateTime, Utc};
use kokyaku_domain::segment::{Segment, SegmentDefinition, SegmentId, SegmentInput};
use kokyaku_shared::ApiResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::customer::CustomerDto;
use crate::{
   error::ApiError,
   session::CurrentSession,
   usecase::{CustomerPreview, SegmentUseCaseImpl},
};

pub struct SegmentState {
   pub usecase: SegmentUseCaseImpl,
}

// --- リクエスト/レスポンス型 ---

#[derive(Debug, Deserialize)]
pub struct SegmentRequest {
   pub name:        String,
   pub description: Option<String>,
   #[serde(default)]
   pub definition:  SegmentDefinition,
}

impl From<SegmentRequest> for SegmentInput {
   fn from(req: SegmentRequest) -> Self {
      Self {
         name:        req.name,
         description: req.description,
         definition:  req.definition,
      }
   }
}

#[derive(Debug, Deserialize)]
pub struct PreviewSegmentRequest {
   #[serde(default)]
   pub definition: SegmentDefinition,
}

#[derive(Debug, Serialize)]
pub struct SegmentDto {
   pub id:          SegmentId,
   pub name:        String,
   pub description: Option<String>,
   pub definition:  SegmentDefinition,
   pub created_at:  DateTime<Utc>,
   pub updated_at:  DateTime<Utc>,
}

impl From<Segment> for SegmentDto {
   fn from(s: Segment) -> Self {
      Self {
         id:          s.id().clone(),
         name:        s.name().to_string(),
         description: s.description().map(str::to_string),
         definition:  s.definition().clone(),
         created_at:  s.created_at(),
         updated_at:  s.updated_at(),
      }
   }
}

/// 一致件数と先頭の顧客
#[derive(Debug, Serialize)]
pub struct CustomerPreviewDto {
   pub count:  usize,
   pub sample: Vec<CustomerDto>,
}

impl From<CustomerPreview> for CustomerPreviewDto {
   fn from(p: CustomerPreview) -> Self {
      Self {
         count:  p.count,
         sample: p.sample.into_iter().map(CustomerDto::from).collect(),
      }
   }
}

// --- ハンドラ ---

/// GET /api/v1/segments
pub async fn list_segments(
   State(state): State<Arc<SegmentState>>,
   Extension(session): Extension<CurrentSession>,
) -> Result<impl IntoResponse, ApiError> {
   let segments = state.usecase.list(session.data.organization_id()).await?;
   Ok(Json(ApiResponse::new(
      segments.into_iter().map(SegmentDto::from).collect::<Vec<_>>(),
   )))
}

/// GET /api/v1/segments/{id}
pub async fn get_segment(
   State(state): State<Arc<SegmentState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
   let segment = state
      .usecase
      .get(session.data.organization_id(), &SegmentId::from_uuid(id))
      .await?;
   Ok(Json(ApiResponse::new(SegmentDto::from(segment))))
}

/// POST /api/v1/segments
pub async fn create_segment(
   State(state): State<Arc<SegmentState>>,
   Extension(session): Extension<CurrentSession>,
   Json(req): Json<SegmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
   let segment = state
      .usecase
      .create(session.data.organization_id(), req.into())
      .await?;
   Ok((
      StatusCode::CREATED,
      Json(ApiResponse::new(SegmentDto::from(segment))),
   ))
}

/// PUT /api/v1/segments/{id}
pub async fn update_segment(
   State(state): State<Arc<SegmentState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
   Json(req): Json<SegmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
   let segment = state
      .usecase
      .update(
         session.data.organization_id(),
         &SegmentId::from_uuid(id),
         req.into(),
      )
      .await?;
   Ok(Json(ApiResponse::new(SegmentDto::from(segment))))
}

/// DELETE /api/v1/segments/{id}
pub async fn delete_segment(
   State(state): State<Arc<SegmentState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
   state
      .usecase
      .delete(session.data.organization_id(), &SegmentId::from_uuid(id))
      .await?;
   Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/segments/{id}/preview
pub async fn preview_segment(
   State(state): State<Arc<SegmentState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
   let preview = state
      .usecase
      .preview(session.data.organization_id(), &SegmentId::from_uuid(id))
      .await?;
   Ok(Json(ApiResponse::new(CustomerPreviewDto::from(preview))))
}

/// POST /api/v1/segments/preview
pub async fn preview_segment_definition(
   State(state): State<Arc<SegmentState>>,
   Extension(session): Extension<CurrentSession>,
   Json(req): Json<PreviewSegmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
   let preview = state
      .usecase
      .preview_definition(session.data.organization_id(), &req.definition)
      .await?;
   Ok(Json(ApiResponse::new(CustomerPreviewDto::from(preview))))
}
