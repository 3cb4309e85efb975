//! # リードハンドラ
//!
//! ## エンドポイント
//!
//! - `GET /api/v1/leads` - 一覧（`status` / `q` で絞り込み）
//! - `POST /api/v1/leads` - 登録
//! - `GET /api/v1/leads/{id}` - 詳細
//! - `PUT /api/v1/leads/{id}` - 更新
//! - `DELETE /api/v1/leads/{id}` - 削除
//! - `PATCH /api/v1/leads/{id}/status` - ステータス変更
//! - `POST /api/v1/leads/{id}/convert` - 顧客への変換

use std::sync::Arc;

use axum::{
   Extension,
   Json,
   extract::{Path, Query, State},
   http::StatusCode,
   response::IntoResponse,
};
use chrono::{DateTime, Utc};
use kokyaku_domain::{
   customer::CustomerId,
   lead::{Lead, LeadId, LeadInput, LeadStatus},
};
use kokyaku_infra::repository::LeadQuery;
use kokyaku_shared::{ApiResponse, PageQuery, PaginatedResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{customer::CustomerDto, page_request};
use crate::{error::ApiError, session::CurrentSession, usecase::LeadUseCaseImpl};

pub struct LeadState {
   pub usecase: LeadUseCaseImpl,
}

// --- リクエスト/レスポンス型 ---

#[derive(Debug, Default, Deserialize)]
pub struct ListLeadsQuery {
   pub status:   Option<LeadStatus>,
   pub q:        Option<String>,
   pub page:     Option<u32>,
   pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LeadRequest {
   pub name:    String,
   pub email:   Option<String>,
   pub phone:   Option<String>,
   pub company: Option<String>,
   pub source:  Option<String>,
   pub notes:   Option<String>,
}

impl From<LeadRequest> for LeadInput {
   fn from(req: LeadRequest) -> Self {
      Self {
         name:    req.name,
         email:   req.email,
         phone:   req.phone,
         company: req.company,
         source:  req.source,
         notes:   req.notes,
      }
   }
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
   pub status: LeadStatus,
}

#[derive(Debug, Serialize)]
pub struct LeadDto {
   pub id:                    LeadId,
   pub name:                  String,
   pub email:                 Option<String>,
   pub phone:                 Option<String>,
   pub company:               Option<String>,
   pub source:                Option<String>,
   pub notes:                 Option<String>,
   pub status:                LeadStatus,
   pub converted_customer_id: Option<CustomerId>,
   pub converted_at:          Option<DateTime<Utc>>,
   pub created_at:            DateTime<Utc>,
   pub updated_at:            DateTime<Utc>,
}

impl From<Lead> for LeadDto {
   fn from(lead: Lead) -> Self {
      let profile = lead.profile();
      Self {
         id:                    lead.id().clone(),
         name:                  profile.name.as_str().to_string(),
         email:                 profile.email.as_ref().map(|e| e.as_str().to_string()),
         phone:                 profile.phone.clone(),
         company:               profile.company.clone(),
         source:                profile.source.clone(),
         notes:                 profile.notes.clone(),
         status:                lead.status(),
         converted_customer_id: lead.converted_customer_id().cloned(),
         converted_at:          lead.converted_at(),
         created_at:            lead.created_at(),
         updated_at:            lead.updated_at(),
      }
   }
}

#[derive(Debug, Serialize)]
pub struct ConvertLeadResponse {
   pub lead:             LeadDto,
   pub customer:         CustomerDto,
   /// 変換で新しく顧客を作成したか（既存顧客に紐付けた場合は false）
   pub customer_created: bool,
}

// --- ハンドラ ---

/// GET /api/v1/leads
pub async fn list_leads(
   State(state): State<Arc<LeadState>>,
   Extension(session): Extension<CurrentSession>,
   Query(query): Query<ListLeadsQuery>,
) -> Result<impl IntoResponse, ApiError> {
   let (page_req, page, per_page) = page_request(PageQuery {
      page:     query.page,
      per_page: query.per_page,
   });
   let query = LeadQuery {
      status: query.status,
      q:      query.q.filter(|q| !q.trim().is_empty()),
      page:   page_req,
   };
   let (leads, total) = state
      .usecase
      .list(session.data.organization_id(), &query)
      .await?;

   Ok(Json(PaginatedResponse {
      data: leads.into_iter().map(LeadDto::from).collect::<Vec<_>>(),
      total,
      page,
      per_page,
   }))
}

/// GET /api/v1/leads/{id}
pub async fn get_lead(
   State(state): State<Arc<LeadState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
   let lead = state
      .usecase
      .get(session.data.organization_id(), &LeadId::from_uuid(id))
      .await?;
   Ok(Json(ApiResponse::new(LeadDto::from(lead))))
}

/// POST /api/v1/leads
pub async fn create_lead(
   State(state): State<Arc<LeadState>>,
   Extension(session): Extension<CurrentSession>,
   Json(req): Json<LeadRequest>,
) -> Result<impl IntoResponse, ApiError> {
   let lead = state
      .usecase
      .create(session.data.organization_id(), req.into())
      .await?;
   Ok((StatusCode::CREATED, Json(ApiResponse::new(LeadDto::from(lead)))))
}

/// PUT /api/v1/leads/{id}
///
/// 変換済みのリードは更新できない（409）。
pub async fn update_lead(
   State(state): State<Arc<LeadState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
   Json(req): Json<LeadRequest>,
) -> Result<impl IntoResponse, ApiError> {
   let lead = state
      .usecase
      .update(
         session.data.organization_id(),
         &LeadId::from_uuid(id),
         req.into(),
      )
      .await?;
   Ok(Json(ApiResponse::new(LeadDto::from(lead))))
}

/// PATCH /api/v1/leads/{id}/status
pub async fn change_lead_status(
   State(state): State<Arc<LeadState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
   Json(req): Json<ChangeStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
   let lead = state
      .usecase
      .change_status(
         session.data.organization_id(),
         &LeadId::from_uuid(id),
         req.status,
      )
      .await?;
   Ok(Json(ApiResponse::new(LeadDto::from(lead))))
}

/// DELETE /api/v1/leads/{id}
pub async fn delete_lead(
   State(state): State<Arc<LeadState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
   state
      .usecase
      .delete(session.data.organization_id(), &LeadId::from_uuid(id))
      .await?;
   Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/leads/{id}/convert
///
/// 同じメールアドレスの顧客がいればそちらに紐付ける。
pub async fn convert_lead(
   State(state): State<Arc<LeadState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
   let conversion = state
      .usecase
      .convert(session.data.organization_id(), &LeadId::from_uuid(id))
      .await?;
   let status = if conversion.created {
      StatusCode::CREATED
   } else {
      StatusCode::OK
   };
   Ok((
      status,
      Json(ApiResponse::new(ConvertLeadResponse {
         lead:             LeadDto::from(conversion.lead),
         customer:         CustomerDto::from(conversion.customer),
         customer_created: conversion.created,
      })),
   ))
}
