//! # タグハンドラ
//!
//! ## エンドポイント
//!
//! - `GET /api/v1/tags` - 一覧（付与されている顧客数つき）
//! - `POST /api/v1/tags` - 作成
//! - `PUT /api/v1/tags/{id}` - 名前・色の変更
//! - `DELETE /api/v1/tags/{id}` - 削除（顧客との紐付けも外れる）

use std::sync::Arc;

use axum::{
   Extension,
   Json,
   extract::{Path, State},
   http::StatusCode,
   response::IntoResponse,
};
use chrono::{DateTime, Utc};
use kokyaku_domain::tag::{Tag, TagId};
use kokyaku_infra::repository::TagWithCount;
use kokyaku_shared::ApiResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::ApiError, session::CurrentSession, usecase::TagUseCaseImpl};

pub struct TagState {
   pub usecase: TagUseCaseImpl,
}

// --- リクエスト/レスポンス型 ---

#[derive(Debug, Deserialize)]
pub struct TagRequest {
   pub name:  String,
   pub color: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TagDto {
   pub id:             TagId,
   pub name:           String,
   pub color:          String,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub customer_count: Option<i64>,
   pub created_at:     DateTime<Utc>,
}

impl From<Tag> for TagDto {
   fn from(tag: Tag) -> Self {
      Self {
         id:             tag.id().clone(),
         name:           tag.name().to_string(),
         color:          tag.color().as_str().to_string(),
         customer_count: None,
         created_at:     tag.created_at(),
      }
   }
}

impl From<TagWithCount> for TagDto {
   fn from(t: TagWithCount) -> Self {
      Self {
         customer_count: Some(t.customer_count),
         ..Self::from(t.tag)
      }
   }
}

// --- ハンドラ ---

/// GET /api/v1/tags
pub async fn list_tags(
   State(state): State<Arc<TagState>>,
   Extension(session): Extension<CurrentSession>,
) -> Result<impl IntoResponse, ApiError> {
   let tags = state.usecase.list(session.data.organization_id()).await?;
   Ok(Json(ApiResponse::new(
      tags.into_iter().map(TagDto::from).collect::<Vec<_>>(),
   )))
}

/// POST /api/v1/tags
///
/// 組織内で同名のタグは作れない（409）。
pub async fn create_tag(
   State(state): State<Arc<TagState>>,
   Extension(session): Extension<CurrentSession>,
   Json(req): Json<TagRequest>,
) -> Result<impl IntoResponse, ApiError> {
   let tag = state
      .usecase
      .create(session.data.organization_id(), req.name, req.color)
      .await?;
   Ok((StatusCode::CREATED, Json(ApiResponse::new(TagDto::from(tag)))))
}

/// PUT /api/v1/tags/{id}
pub async fn update_tag(
   State(state): State<Arc<TagState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
   Json(req): Json<TagRequest>,
) -> Result<impl IntoResponse, ApiError> {
   let tag = state
      .usecase
      .update(
         session.data.organization_id(),
         &TagId::from_uuid(id),
         req.name,
         req.color,
      )
      .await?;
   Ok(Json(ApiResponse::new(TagDto::from(tag))))
}

/// DELETE /api/v1/tags/{id}
pub async fn delete_tag(
   State(state): State<Arc<TagState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
   state
      .usecase
      .delete(session.data.organization_id(), &TagId::from_uuid(id))
      .await?;
   Ok(StatusCode::NO_CONTENT)
}
