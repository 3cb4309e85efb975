//! # EmailJobRepository
//!
//! キャンペーン送信ジョブのキューを担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **取得は排他**: cron の多重起動に備え、`FOR UPDATE SKIP LOCKED` で
//!   他のワーカーが掴んだジョブを読み飛ばしつつ `processing` に更新する
//! - **古いロックの回収**: ワーカーが途中で落ちた `processing` ジョブは、
//!   `locked_at` が閾値より古ければ再び取得対象になる。回収は試行 1 回に数える
//! - **書き戻しはリース付き**: 取得時の `locked_at` が変わっていなければ更新する。
//!   別のワーカーが回収した、またはキャンセルされたジョブは `Conflict`
//! - **状態遷移はドメイン層**: 更新は [`EmailJob`] の状態をそのまま書き戻す

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kokyaku_domain::{
   campaign::CampaignId,
   email_job::{EmailJob, EmailJobId, EmailJobStatus, STALE_LOCK_ERROR},
   organization::OrganizationId,
};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::InfraError;

/// 送信ジョブリポジトリトレイト
#[async_trait]
pub trait EmailJobRepository: Send + Sync {
   async fn insert(&self, job: &EmailJob) -> Result<(), InfraError>;

   /// 実行可能なジョブを最大 `limit` 件取得し、`processing` に更新して返す
   ///
   /// 対象は `run_after <= now` の `pending` と、`locked_at < stale_before` の
   /// `processing`。`run_after` の古い順。古いロックを回収したジョブは
   /// `attempts` を 1 増やす。
   async fn claim_due(
      &self,
      now: DateTime<Utc>,
      stale_before: DateTime<Utc>,
      limit: i64,
   ) -> Result<Vec<EmailJob>, InfraError>;

   /// 取得したジョブの状態を書き戻す
   ///
   /// `lease` は取得時の `locked_at`。ジョブが `processing` のまま同じ `locked_at`
   /// を保っていなければ `Conflict`。
   async fn update(&self, job: &EmailJob, lease: DateTime<Utc>) -> Result<(), InfraError>;

   /// キャンペーンのジョブを作成日時の新しい順に取得する
   async fn find_by_campaign(
      &self,
      organization_id: &OrganizationId,
      campaign_id: &CampaignId,
   ) -> Result<Vec<EmailJob>, InfraError>;
}

#[derive(sqlx::FromRow)]
struct EmailJobRow {
   id:              Uuid,
   organization_id: Uuid,
   campaign_id:     Uuid,
   status:          String,
   attempts:        i32,
   max_attempts:    i32,
   last_error:      Option<String>,
   run_after:       DateTime<Utc>,
   locked_at:       Option<DateTime<Utc>>,
   completed_at:    Option<DateTime<Utc>>,
   created_at:      DateTime<Utc>,
   updated_at:      DateTime<Utc>,
}

impl TryFrom<EmailJobRow> for EmailJob {
   type Error = InfraError;

   fn try_from(row: EmailJobRow) -> Result<Self, Self::Error> {
      Ok(EmailJob::from_db(
         EmailJobId::from_uuid(row.id),
         OrganizationId::from_uuid(row.organization_id),
         CampaignId::from_uuid(row.campaign_id),
         row
            .status
            .parse::<EmailJobStatus>()
            .map_err(|e| InfraError::unexpected(e.to_string()))?,
         row.attempts,
         row.max_attempts,
         row.last_error,
         row.run_after,
         row.locked_at,
         row.completed_at,
         row.created_at,
         row.updated_at,
      ))
   }
}

const JOB_COLUMNS: &str = "id, organization_id, campaign_id, status, attempts, max_attempts, \
                           last_error, run_after, locked_at, completed_at, created_at, updated_at";

/// ジョブを登録する（トランザクション内で使う）
///
/// 同じキャンペーンに未完了のジョブが既にあれば `Conflict`。
pub(crate) async fn insert_job_row(
   conn: &mut PgConnection,
   job: &EmailJob,
) -> Result<(), InfraError> {
   sqlx::query(&format!(
      "INSERT INTO email_jobs ({JOB_COLUMNS}) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
   ))
   .bind(job.id().as_uuid())
   .bind(job.organization_id().as_uuid())
   .bind(job.campaign_id().as_uuid())
   .bind(job.status().as_str())
   .bind(job.attempts())
   .bind(job.max_attempts())
   .bind(job.last_error())
   .bind(job.run_after())
   .bind(job.locked_at())
   .bind(job.completed_at())
   .bind(job.created_at())
   .bind(job.updated_at())
   .execute(&mut *conn)
   .await
   .map_err(|e| InfraError::from_unique_violation(e, "EmailJob", job.campaign_id().to_string()))?;
   Ok(())
}

/// PostgreSQL 実装の EmailJobRepository
#[derive(Debug, Clone)]
pub struct PostgresEmailJobRepository {
   pool: PgPool,
}

impl PostgresEmailJobRepository {
   pub fn new(pool: PgPool) -> Self {
      Self { pool }
   }
}

#[async_trait]
impl EmailJobRepository for PostgresEmailJobRepository {
   #[tracing::instrument(skip_all, level = "debug", fields(id = %job.id()))]
   async fn insert(&self, job: &EmailJob) -> Result<(), InfraError> {
      let mut conn = self.pool.acquire().await?;
      insert_job_row(&mut *conn, job).await
   }

   #[tracing::instrument(skip_all, level = "debug", fields(limit = limit))]
   async fn claim_due(
      &self,
      now: DateTime<Utc>,
      stale_before: DateTime<Utc>,
      limit: i64,
   ) -> Result<Vec<EmailJob>, InfraError> {
      let rows = sqlx::query_as::<_, EmailJobRow>(&format!(
         r#"
            UPDATE email_jobs
            SET status = 'processing',
                attempts = attempts + CASE WHEN status = 'processing' THEN 1 ELSE 0 END,
                last_error = CASE WHEN status = 'processing' THEN $4 ELSE last_error END,
                locked_at = $1,
                updated_at = $1
            WHERE id IN (
                SELECT id FROM email_jobs
                WHERE (status = 'pending' AND run_after <= $1)
                   OR (status = 'processing' AND locked_at < $2)
                ORDER BY run_after ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
      ))
      .bind(now)
      .bind(stale_before)
      .bind(limit)
      .bind(STALE_LOCK_ERROR)
      .fetch_all(&self.pool)
      .await?;

      let mut jobs = rows
         .into_iter()
         .map(EmailJob::try_from)
         .collect::<Result<Vec<_>, _>>()?;
      // RETURNING は順序を保証しない
      jobs.sort_by_key(EmailJob::run_after);
      Ok(jobs)
   }

   #[tracing::instrument(skip_all, level = "debug", fields(id = %job.id(), status = %job.status()))]
   async fn update(&self, job: &EmailJob, lease: DateTime<Utc>) -> Result<(), InfraError> {
      let result = sqlx::query(
         r#"
            UPDATE email_jobs SET
                status = $2, attempts = $3, last_error = $4, run_after = $5,
                locked_at = $6, completed_at = $7, updated_at = $8
            WHERE id = $1 AND status = 'processing' AND locked_at = $9
            "#,
      )
      .bind(job.id().as_uuid())
      .bind(job.status().as_str())
      .bind(job.attempts())
      .bind(job.last_error())
      .bind(job.run_after())
      .bind(job.locked_at())
      .bind(job.completed_at())
      .bind(job.updated_at())
      .bind(lease)
      .execute(&self.pool)
      .await?;

      if result.rows_affected() == 0 {
         return Err(InfraError::conflict("EmailJob", job.id().to_string()));
      }
      Ok(())
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, %campaign_id))]
   async fn find_by_campaign(
      &self,
      organization_id: &OrganizationId,
      campaign_id: &CampaignId,
   ) -> Result<Vec<EmailJob>, InfraError> {
      let rows = sqlx::query_as::<_, EmailJobRow>(&format!(
         r#"
            SELECT {JOB_COLUMNS} FROM email_jobs
            WHERE organization_id = $1 AND campaign_id = $2
            ORDER BY created_at DESC
            "#
      ))
      .bind(organization_id.as_uuid())
      .bind(campaign_id.as_uuid())
      .fetch_all(&self.pool)
      .await?;

      rows.into_iter().map(EmailJob::try_from).collect()
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_トレイトはsendとsyncを実装している() {
      fn assert_send_sync<T: Send + Sync>() {}
      assert_send_sync::<PostgresEmailJobRepository>();
   }
}
