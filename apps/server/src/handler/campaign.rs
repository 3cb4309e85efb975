//! # キャンペーンハンドラ
//!
//! ## エンドポイント
//!
//! - `GET /api/v1/campaigns` - 一覧（`status` で絞り込み）
//! - `POST /api/v1/campaigns` - 下書きの作成
//! - `POST /api/v1/campaigns/preview-recipients` - フィルタで送信対象を確認
//! - `GET /api/v1/campaigns/{id}` - 詳細
//! - `PUT /api/v1/campaigns/{id}` - 下書きの更新
//! - `DELETE /api/v1/campaigns/{id}` - 削除（下書き・キャンセル済みのみ）
//! - `POST /api/v1/campaigns/{id}/send` - 即時送信・予約（admin）
//! - `POST /api/v1/campaigns/{id}/cancel` - キャンセル（admin）
//! - `POST /api/v1/campaigns/{id}/test-send` - テスト送信
//! - `GET /api/v1/campaigns/{id}/report` - 配信結果の集計
//! - `GET /api/v1/campaigns/{id}/recipients` - 受信者一覧

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
   campaign::{Campaign, CampaignId, CampaignInput, CampaignStats, CampaignStatus, EngagementStats},
   campaign_recipient::{CampaignRecipient, CampaignRecipientId, RecipientStatus},
   customer::CustomerId,
   recipient_filter::RecipientFilter,
   user::UserId,
};
use kokyaku_shared::{ApiResponse, PageQuery, PaginatedResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{page_request, segment::CustomerPreviewDto};
use crate::{
   error::ApiError,
   session::CurrentSession,
   usecase::{CampaignReport, CampaignUseCaseImpl},
};

pub struct CampaignState {
   pub usecase: CampaignUseCaseImpl,
}

// --- リクエスト/レスポンス型 ---

#[derive(Debug, Default, Deserialize)]
pub struct ListCampaignsQuery {
   pub status:   Option<CampaignStatus>,
   pub page:     Option<u32>,
   pub per_page: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListRecipientsQuery {
   pub status:   Option<RecipientStatus>,
   pub page:     Option<u32>,
   pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CampaignRequest {
   pub name:             String,
   pub subject:          String,
   pub content_html:     String,
   #[serde(default)]
   pub recipient_filter: RecipientFilter,
}

impl From<CampaignRequest> for CampaignInput {
   fn from(req: CampaignRequest) -> Self {
      Self {
         name:             req.name,
         subject:          req.subject,
         content_html:     req.content_html,
         recipient_filter: req.recipient_filter,
      }
   }
}

#[derive(Debug, Deserialize)]
pub struct PreviewRecipientsRequest {
   #[serde(default)]
   pub recipient_filter: RecipientFilter,
}

/// 送信リクエスト
///
/// 本文なし、または `scheduled_at` 省略で即時送信。
#[derive(Debug, Default, Deserialize)]
pub struct SendCampaignRequest {
   pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct TestSendRequest {
   pub to: String,
}

#[derive(Debug, Serialize)]
pub struct CampaignDto {
   pub id:               CampaignId,
   pub name:             String,
   pub subject:          String,
   pub content_html:     String,
   pub recipient_filter: RecipientFilter,
   pub status:           CampaignStatus,
   pub scheduled_at:     Option<DateTime<Utc>>,
   pub started_at:       Option<DateTime<Utc>>,
   pub completed_at:     Option<DateTime<Utc>>,
   pub created_by:       UserId,
   pub stats:            CampaignStats,
   pub created_at:       DateTime<Utc>,
   pub updated_at:       DateTime<Utc>,
}

impl From<Campaign> for CampaignDto {
   fn from(c: Campaign) -> Self {
      let schedule = *c.schedule();
      Self {
         id:               c.id().clone(),
         name:             c.name().to_string(),
         subject:          c.subject().to_string(),
         content_html:     c.content_html().to_string(),
         recipient_filter: c.recipient_filter().clone(),
         status:           c.status(),
         scheduled_at:     schedule.scheduled_at,
         started_at:       schedule.started_at,
         completed_at:     schedule.completed_at,
         created_by:       c.created_by().clone(),
         stats:            *c.stats(),
         created_at:       c.created_at(),
         updated_at:       c.updated_at(),
      }
   }
}

#[derive(Debug, Serialize)]
pub struct CampaignReportDto {
   #[serde(flatten)]
   pub stats:      CampaignStats,
   #[serde(flatten)]
   pub engagement: EngagementStats,
   /// 送信済みに対する開封率（%）
   pub open_rate:  f64,
   /// 送信済みに対するクリック率（%）
   pub click_rate: f64,
}

impl From<CampaignReport> for CampaignReportDto {
   fn from(r: CampaignReport) -> Self {
      Self {
         stats:      r.stats,
         engagement: r.engagement,
         open_rate:  r.open_rate,
         click_rate: r.click_rate,
      }
   }
}

#[derive(Debug, Serialize)]
pub struct RecipientDto {
   pub id:              CampaignRecipientId,
   pub customer_id:     CustomerId,
   pub email:           String,
   pub name:            String,
   pub status:          RecipientStatus,
   pub attempts:        i32,
   pub last_error:      Option<String>,
   pub sent_at:         Option<DateTime<Utc>>,
   pub opened_at:       Option<DateTime<Utc>>,
   pub clicked_at:      Option<DateTime<Utc>>,
   pub open_count:      i32,
   pub click_count:     i32,
   pub unsubscribed_at: Option<DateTime<Utc>>,
}

impl From<CampaignRecipient> for RecipientDto {
   fn from(r: CampaignRecipient) -> Self {
      let engagement = *r.engagement();
      let delivery = r.delivery().clone();
      Self {
         id:              r.id().clone(),
         customer_id:     r.customer_id().clone(),
         email:           r.email().as_str().to_string(),
         name:            r.name().to_string(),
         status:          r.status(),
         attempts:        delivery.attempts,
         last_error:      delivery.last_error,
         sent_at:         delivery.sent_at,
         opened_at:       engagement.opened_at,
         clicked_at:      engagement.clicked_at,
         open_count:      engagement.open_count,
         click_count:     engagement.click_count,
         unsubscribed_at: engagement.unsubscribed_at,
      }
   }
}

// --- ハンドラ ---

/// GET /api/v1/campaigns
pub async fn list_campaigns(
   State(state): State<Arc<CampaignState>>,
   Extension(session): Extension<CurrentSession>,
   Query(query): Query<ListCampaignsQuery>,
) -> Result<impl IntoResponse, ApiError> {
   let (page_req, page, per_page) = page_request(PageQuery {
      page:     query.page,
      per_page: query.per_page,
   });
   let (campaigns, total) = state
      .usecase
      .list(session.data.organization_id(), query.status, page_req)
      .await?;

   Ok(Json(PaginatedResponse {
      data: campaigns.into_iter().map(CampaignDto::from).collect::<Vec<_>>(),
      total,
      page,
      per_page,
   }))
}

/// GET /api/v1/campaigns/{id}
pub async fn get_campaign(
   State(state): State<Arc<CampaignState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
   let campaign = state
      .usecase
      .get(session.data.organization_id(), &CampaignId::from_uuid(id))
      .await?;
   Ok(Json(ApiResponse::new(CampaignDto::from(campaign))))
}

/// POST /api/v1/campaigns
pub async fn create_campaign(
   State(state): State<Arc<CampaignState>>,
   Extension(session): Extension<CurrentSession>,
   Json(req): Json<CampaignRequest>,
) -> Result<impl IntoResponse, ApiError> {
   let campaign = state.usecase.create(&session.data, req.into()).await?;
   Ok((
      StatusCode::CREATED,
      Json(ApiResponse::new(CampaignDto::from(campaign))),
   ))
}

/// PUT /api/v1/campaigns/{id}
///
/// 下書き以外は 409。
pub async fn update_campaign(
   State(state): State<Arc<CampaignState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
   Json(req): Json<CampaignRequest>,
) -> Result<impl IntoResponse, ApiError> {
   let campaign = state
      .usecase
      .update(
         session.data.organization_id(),
         &CampaignId::from_uuid(id),
         req.into(),
      )
      .await?;
   Ok(Json(ApiResponse::new(CampaignDto::from(campaign))))
}

/// DELETE /api/v1/campaigns/{id}
pub async fn delete_campaign(
   State(state): State<Arc<CampaignState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
   state
      .usecase
      .delete(session.data.organization_id(), &CampaignId::from_uuid(id))
      .await?;
   Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/campaigns/preview-recipients
pub async fn preview_recipients(
   State(state): State<Arc<CampaignState>>,
   Extension(session): Extension<CurrentSession>,
   Json(req): Json<PreviewRecipientsRequest>,
) -> Result<impl IntoResponse, ApiError> {
   let preview = state
      .usecase
      .preview_recipients(session.data.organization_id(), req.recipient_filter)
      .await?;
   Ok(Json(ApiResponse::new(CustomerPreviewDto::from(preview))))
}

/// POST /api/v1/campaigns/{id}/send
///
/// 受信者を確定してジョブを登録し、202 を返す。実際の送信は cron が行う。
pub async fn send_campaign(
   State(state): State<Arc<CampaignState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
   body: Option<Json<SendCampaignRequest>>,
) -> Result<impl IntoResponse, ApiError> {
   let scheduled_at = body.and_then(|Json(req)| req.scheduled_at);
   let campaign = state
      .usecase
      .send(&session.data, &CampaignId::from_uuid(id), scheduled_at)
      .await?;
   Ok((
      StatusCode::ACCEPTED,
      Json(ApiResponse::new(CampaignDto::from(campaign))),
   ))
}

/// POST /api/v1/campaigns/{id}/cancel
pub async fn cancel_campaign(
   State(state): State<Arc<CampaignState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
   let campaign = state
      .usecase
      .cancel(&session.data, &CampaignId::from_uuid(id))
      .await?;
   Ok(Json(ApiResponse::new(CampaignDto::from(campaign))))
}

/// POST /api/v1/campaigns/{id}/test-send
pub async fn test_send_campaign(
   State(state): State<Arc<CampaignState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
   Json(req): Json<TestSendRequest>,
) -> Result<impl IntoResponse, ApiError> {
   state
      .usecase
      .test_send(&session.data, &CampaignId::from_uuid(id), &req.to)
      .await?;
   Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/campaigns/{id}/report
pub async fn campaign_report(
   State(state): State<Arc<CampaignState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
   let report = state
      .usecase
      .report(session.data.organization_id(), &CampaignId::from_uuid(id))
      .await?;
   Ok(Json(ApiResponse::new(CampaignReportDto::from(report))))
}

/// GET /api/v1/campaigns/{id}/recipients
pub async fn list_recipients(
   State(state): State<Arc<CampaignState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
   Query(query): Query<ListRecipientsQuery>,
) -> Result<impl IntoResponse, ApiError> {
   let (page_req, page, per_page) = page_request(PageQuery {
      page:     query.page,
      per_page: query.per_page,
   });
   let (recipients, total) = state
      .usecase
      .recipients(
         session.data.organization_id(),
         &CampaignId::from_uuid(id),
         query.status,
         page_req,
      )
      .await?;

   Ok(Json(PaginatedResponse {
      data: recipients.into_iter().map(RecipientDto::from).collect::<Vec<_>>(),
      total,
      page,
      per_page,
   }))
}
