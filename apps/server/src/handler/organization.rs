//! # 組織ハンドラ
//!
//! アクティブな組織（セッションの組織）とメンバーの管理。
//!
//! ## エンドポイント
//!
//! - `GET /api/v1/organization` - 組織
//! - `PATCH /api/v1/organization` - 組織名の変更（admin）
//! - `GET /api/v1/organization/members` - メンバーと未受諾の招待
//! - `POST /api/v1/organization/invitations` - 招待（admin）
//! - `PATCH /api/v1/organization/members/{user_id}` - ロール変更（owner）
//! - `DELETE /api/v1/organization/members/{user_id}` - メンバーの削除（admin）

use std::sync::Arc;

use axum::{
   Extension,
   Json,
   extract::{Path, State},
   http::StatusCode,
   response::IntoResponse,
};
use chrono::{DateTime, Utc};
use kokyaku_domain::{
   organization::{Invitation, InvitationId, OrgRole, Organization, OrganizationId},
   user::UserId,
};
use kokyaku_infra::repository::MemberSummary;
use kokyaku_shared::ApiResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::ApiError, session::CurrentSession, usecase::OrganizationUseCaseImpl};

pub struct OrganizationState {
   pub usecase: OrganizationUseCaseImpl,
}

// --- リクエスト/レスポンス型 ---

#[derive(Debug, Deserialize)]
pub struct RenameOrganizationRequest {
   pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
   pub email: String,
   pub role:  OrgRole,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
   pub role: OrgRole,
}

#[derive(Debug, Serialize)]
pub struct OrganizationDto {
   pub id:         OrganizationId,
   pub name:       String,
   pub created_at: DateTime<Utc>,
}

impl From<Organization> for OrganizationDto {
   fn from(org: Organization) -> Self {
      Self {
         id:         org.id().clone(),
         name:       org.name().to_string(),
         created_at: org.created_at(),
      }
   }
}

#[derive(Debug, Serialize)]
pub struct MemberDto {
   pub user_id:    UserId,
   pub email:      String,
   pub name:       String,
   pub avatar_url: Option<String>,
   pub role:       OrgRole,
   pub joined_at:  DateTime<Utc>,
}

impl From<MemberSummary> for MemberDto {
   fn from(m: MemberSummary) -> Self {
      Self {
         user_id:    m.user_id,
         email:      m.email,
         name:       m.name,
         avatar_url: m.avatar_url,
         role:       m.role,
         joined_at:  m.joined_at,
      }
   }
}

#[derive(Debug, Serialize)]
pub struct InvitationDto {
   pub id:         InvitationId,
   pub email:      String,
   pub role:       OrgRole,
   pub invited_by: UserId,
   pub expires_at: DateTime<Utc>,
   pub created_at: DateTime<Utc>,
}

impl From<Invitation> for InvitationDto {
   fn from(i: Invitation) -> Self {
      Self {
         id:         i.id().clone(),
         email:      i.email().as_str().to_string(),
         role:       i.role(),
         invited_by: i.invited_by().clone(),
         expires_at: i.expires_at(),
         created_at: i.created_at(),
      }
   }
}

#[derive(Debug, Serialize)]
pub struct MemberListResponse {
   pub members:     Vec<MemberDto>,
   pub invitations: Vec<InvitationDto>,
}

// --- ハンドラ ---

/// GET /api/v1/organization
pub async fn get_organization(
   State(state): State<Arc<OrganizationState>>,
   Extension(session): Extension<CurrentSession>,
) -> Result<impl IntoResponse, ApiError> {
   let org = state.usecase.get(session.data.organization_id()).await?;
   Ok(Json(ApiResponse::new(OrganizationDto::from(org))))
}

/// PATCH /api/v1/organization
pub async fn rename_organization(
   State(state): State<Arc<OrganizationState>>,
   Extension(session): Extension<CurrentSession>,
   Json(req): Json<RenameOrganizationRequest>,
) -> Result<impl IntoResponse, ApiError> {
   let org = state
      .usecase
      .rename(session.data.organization_id(), req.name)
      .await?;
   Ok(Json(ApiResponse::new(OrganizationDto::from(org))))
}

/// GET /api/v1/organization/members
pub async fn list_members(
   State(state): State<Arc<OrganizationState>>,
   Extension(session): Extension<CurrentSession>,
) -> Result<impl IntoResponse, ApiError> {
   let list = state
      .usecase
      .list_members(session.data.organization_id())
      .await?;
   Ok(Json(ApiResponse::new(MemberListResponse {
      members:     list.members.into_iter().map(MemberDto::from).collect(),
      invitations: list.invitations.into_iter().map(InvitationDto::from).collect(),
   })))
}

/// POST /api/v1/organization/invitations
///
/// 自分より上位のロールでは招待できない（403）。
pub async fn invite_member(
   State(state): State<Arc<OrganizationState>>,
   Extension(session): Extension<CurrentSession>,
   Json(req): Json<InviteRequest>,
) -> Result<impl IntoResponse, ApiError> {
   let invitation = state
      .usecase
      .invite(&session.data, &req.email, req.role)
      .await?;
   Ok((
      StatusCode::CREATED,
      Json(ApiResponse::new(InvitationDto::from(invitation))),
   ))
}

/// PATCH /api/v1/organization/members/{user_id}
pub async fn change_member_role(
   State(state): State<Arc<OrganizationState>>,
   Extension(session): Extension<CurrentSession>,
   Path(user_id): Path<Uuid>,
   Json(req): Json<ChangeRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
   state
      .usecase
      .change_role(&session.data, &UserId::from_uuid(user_id), req.role)
      .await?;
   Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/organization/members/{user_id}
///
/// 最後の owner は削除できない（409）。
pub async fn remove_member(
   State(state): State<Arc<OrganizationState>>,
   Extension(session): Extension<CurrentSession>,
   Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
   state
      .usecase
      .remove_member(&session.data, &UserId::from_uuid(user_id))
      .await?;
   Ok(StatusCode::NO_CONTENT)
}
