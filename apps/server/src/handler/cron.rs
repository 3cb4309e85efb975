//! # cron ハンドラ
//!
//! 外部スケジューラから定期的に呼ばれ、実行時刻を迎えた送信ジョブを処理する。
//! 認証は `Authorization: Bearer <CRON_SECRET>`（ミドルウェアで検証）。
//!
//! ## エンドポイント
//!
//! - `GET /api/cron/email-jobs` - 送信ジョブの実行
//! - `POST /api/cron/email-jobs` - 同上

use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;

use crate::{
   error::ApiError,
   usecase::{DeliveryUseCaseImpl, JobSummary},
};

pub struct CronState {
   pub usecase: DeliveryUseCaseImpl,
}

#[derive(Debug, Serialize)]
pub struct RunJobsResponse {
   pub processed: usize,
   pub jobs:      Vec<JobSummary>,
}

/// GET|POST /api/cron/email-jobs
pub async fn run_email_jobs(
   State(state): State<Arc<CronState>>,
) -> Result<impl IntoResponse, ApiError> {
   let jobs = state.usecase.run_due_jobs().await?;
   Ok(Json(RunJobsResponse {
      processed: jobs.len(),
      jobs,
   }))
}
