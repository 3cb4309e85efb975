//! # CampaignRepository
//!
//! キャンペーンの永続化と、送信キュー登録・キャンセル・集計を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **キュー登録は一括**: キャンペーンの状態更新・受信者の登録・送信ジョブの作成を
//!   同一トランザクションで行い、途中状態を残さない
//! - **状態の書き戻しは楽観的**: 読み込んだ時点のステータスを `WHERE` に含め、
//!   別のリクエストやワーカーが先に遷移させていれば `Conflict` を返す
//! - **集計値は非正規化して保持**: 一覧表示のため、受信者ステータスの件数を
//!   `campaigns` の列に書き戻す

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kokyaku_domain::{
   campaign::{
      Campaign,
      CampaignContent,
      CampaignId,
      CampaignName,
      CampaignSchedule,
      CampaignStats,
      CampaignStatus,
      CampaignSubject,
      EngagementStats,
   },
   campaign_recipient::CampaignRecipient,
   email_job::EmailJob,
   organization::OrganizationId,
   recipient_filter::RecipientFilter,
   user::UserId,
};
use sqlx::{PgConnection, PgPool, types::Json};
use uuid::Uuid;

use super::{
   PageRequest,
   campaign_recipient_repository::insert_recipient_rows,
   email_job_repository::insert_job_row,
};
use crate::error::InfraError;

/// キャンセル時に送信待ち受信者へ記録する理由
const CANCELLED_REASON: &str = "キャンペーンがキャンセルされました";

/// キャンペーンリポジトリトレイト
#[async_trait]
pub trait CampaignRepository: Send + Sync {
   /// キャンペーンを作成日時の新しい順に取得し、総件数と合わせて返す
   async fn search(
      &self,
      organization_id: &OrganizationId,
      status: Option<CampaignStatus>,
      page: PageRequest,
   ) -> Result<(Vec<Campaign>, i64), InfraError>;

   async fn find_by_id(
      &self,
      organization_id: &OrganizationId,
      id: &CampaignId,
   ) -> Result<Option<Campaign>, InfraError>;

   async fn insert(&self, campaign: &Campaign) -> Result<(), InfraError>;

   /// 内容・ステータス・予定時刻・集計値を書き戻す
   ///
   /// 保存済みのステータスが `expected` でなければ `Conflict`。
   async fn update(&self, campaign: &Campaign, expected: CampaignStatus) -> Result<(), InfraError>;

   /// 下書き・キャンセル済みのキャンペーンだけを削除する
   async fn delete(
      &self,
      organization_id: &OrganizationId,
      id: &CampaignId,
   ) -> Result<bool, InfraError>;

   /// 送信キューに登録する
   ///
   /// キャンペーンの更新・受信者の登録・送信ジョブの作成を 1 トランザクションで行う。
   /// 保存済みのキャンペーンが下書きでなければ `Conflict`。
   async fn queue_send(
      &self,
      campaign: &Campaign,
      recipients: &[CampaignRecipient],
      job: &EmailJob,
   ) -> Result<(), InfraError>;

   /// 送信をキャンセルする
   ///
   /// 未完了のジョブを `cancelled`、送信待ちの受信者を `skipped` にする。
   /// 保存済みのステータスが `expected` でなければ `Conflict`。
   async fn cancel_send(
      &self,
      campaign: &Campaign,
      expected: CampaignStatus,
   ) -> Result<(), InfraError>;

   /// 受信者ステータスを集計し、キャンペーンに書き戻して返す
   async fn refresh_stats(
      &self,
      organization_id: &OrganizationId,
      id: &CampaignId,
   ) -> Result<CampaignStats, InfraError>;

   /// 開封・クリック・配信停止した受信者数を集計する
   async fn engagement(
      &self,
      organization_id: &OrganizationId,
      id: &CampaignId,
   ) -> Result<EngagementStats, InfraError>;
}

#[derive(sqlx::FromRow)]
struct CampaignRow {
   id:               Uuid,
   organization_id:  Uuid,
   name:             String,
   subject:          String,
   content_html:     String,
   recipient_filter: Json<RecipientFilter>,
   status:           String,
   scheduled_at:     Option<DateTime<Utc>>,
   started_at:       Option<DateTime<Utc>>,
   completed_at:     Option<DateTime<Utc>>,
   created_by:       Uuid,
   sender_user_id:   Option<Uuid>,
   #[sqlx(flatten)]
   stats:            StatsRow,
   created_at:       DateTime<Utc>,
   updated_at:       DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct StatsRow {
   total_count:   i64,
   pending_count: i64,
   sent_count:    i64,
   failed_count:  i64,
   skipped_count: i64,
}

impl From<StatsRow> for CampaignStats {
   fn from(row: StatsRow) -> Self {
      Self {
         total:   row.total_count,
         pending: row.pending_count,
         sent:    row.sent_count,
         failed:  row.failed_count,
         skipped: row.skipped_count,
      }
   }
}

#[derive(sqlx::FromRow)]
struct EngagementRow {
   opened:       i64,
   clicked:      i64,
   unsubscribed: i64,
}

impl TryFrom<CampaignRow> for Campaign {
   type Error = InfraError;

   fn try_from(row: CampaignRow) -> Result<Self, Self::Error> {
      let to_infra = |e: kokyaku_domain::DomainError| InfraError::unexpected(e.to_string());
      let content = CampaignContent {
         name:             CampaignName::new(row.name).map_err(to_infra)?,
         subject:          CampaignSubject::new(row.subject).map_err(to_infra)?,
         content_html:     row.content_html,
         recipient_filter: row.recipient_filter.0,
      };
      Ok(Campaign::from_db(
         CampaignId::from_uuid(row.id),
         OrganizationId::from_uuid(row.organization_id),
         content,
         row.status.parse::<CampaignStatus>().map_err(to_infra)?,
         CampaignSchedule {
            scheduled_at: row.scheduled_at,
            started_at:   row.started_at,
            completed_at: row.completed_at,
         },
         UserId::from_uuid(row.created_by),
         row.sender_user_id.map(UserId::from_uuid),
         row.stats.into(),
         row.created_at,
         row.updated_at,
      ))
   }
}

const CAMPAIGN_COLUMNS: &str = "id, organization_id, name, subject, content_html, \
                                recipient_filter, status, scheduled_at, started_at, \
                                completed_at, created_by, sender_user_id, total_count, \
                                pending_count, sent_count, failed_count, skipped_count, \
                                created_at, updated_at";

/// キャンペーン行を書き戻す
///
/// 保存済みのステータスが `expected` と一致する行だけを更新する。
async fn update_campaign_row(
   conn: &mut PgConnection,
   campaign: &Campaign,
   expected: CampaignStatus,
) -> Result<(), InfraError> {
   let schedule = campaign.schedule();
   let stats = campaign.stats();

   let result = sqlx::query(
      r#"
         UPDATE campaigns SET
             name = $3, subject = $4, content_html = $5, recipient_filter = $6,
             status = $7, scheduled_at = $8, started_at = $9, completed_at = $10,
             sender_user_id = $11, total_count = $12, pending_count = $13,
             sent_count = $14, failed_count = $15, skipped_count = $16, updated_at = $17
         WHERE organization_id = $1 AND id = $2 AND status = $18
         "#,
   )
   .bind(campaign.organization_id().as_uuid())
   .bind(campaign.id().as_uuid())
   .bind(campaign.name().as_str())
   .bind(campaign.subject().as_str())
   .bind(campaign.content_html())
   .bind(Json(campaign.recipient_filter()))
   .bind(campaign.status().as_str())
   .bind(schedule.scheduled_at)
   .bind(schedule.started_at)
   .bind(schedule.completed_at)
   .bind(campaign.sender_user_id().map(UserId::as_uuid))
   .bind(stats.total)
   .bind(stats.pending)
   .bind(stats.sent)
   .bind(stats.failed)
   .bind(stats.skipped)
   .bind(campaign.updated_at())
   .bind(expected.as_str())
   .execute(&mut *conn)
   .await?;

   if result.rows_affected() == 0 {
      return Err(InfraError::conflict("Campaign", campaign.id().to_string()));
   }
   Ok(())
}

/// PostgreSQL 実装の CampaignRepository
#[derive(Debug, Clone)]
pub struct PostgresCampaignRepository {
   pool: PgPool,
}

impl PostgresCampaignRepository {
   pub fn new(pool: PgPool) -> Self {
      Self { pool }
   }
}

#[async_trait]
impl CampaignRepository for PostgresCampaignRepository {
   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id))]
   async fn search(
      &self,
      organization_id: &OrganizationId,
      status: Option<CampaignStatus>,
      page: PageRequest,
   ) -> Result<(Vec<Campaign>, i64), InfraError> {
      const FILTER: &str = "WHERE organization_id = $1 AND ($2::text IS NULL OR status = $2)";
      let status = status.map(CampaignStatus::as_str);

      let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM campaigns {FILTER}"))
         .bind(organization_id.as_uuid())
         .bind(status)
         .fetch_one(&self.pool)
         .await?;

      let rows = sqlx::query_as::<_, CampaignRow>(&format!(
         "SELECT {CAMPAIGN_COLUMNS} FROM campaigns {FILTER} \
          ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4"
      ))
      .bind(organization_id.as_uuid())
      .bind(status)
      .bind(page.limit)
      .bind(page.offset)
      .fetch_all(&self.pool)
      .await?;

      let campaigns = rows
         .into_iter()
         .map(Campaign::try_from)
         .collect::<Result<Vec<_>, _>>()?;
      Ok((campaigns, total))
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, %id))]
   async fn find_by_id(
      &self,
      organization_id: &OrganizationId,
      id: &CampaignId,
   ) -> Result<Option<Campaign>, InfraError> {
      let row = sqlx::query_as::<_, CampaignRow>(&format!(
         "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE organization_id = $1 AND id = $2"
      ))
      .bind(organization_id.as_uuid())
      .bind(id.as_uuid())
      .fetch_optional(&self.pool)
      .await?;

      row.map(Campaign::try_from).transpose()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(id = %campaign.id()))]
   async fn insert(&self, campaign: &Campaign) -> Result<(), InfraError> {
      let schedule = campaign.schedule();
      let stats = campaign.stats();

      sqlx::query(&format!(
         "INSERT INTO campaigns ({CAMPAIGN_COLUMNS}) VALUES \
          ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)"
      ))
      .bind(campaign.id().as_uuid())
      .bind(campaign.organization_id().as_uuid())
      .bind(campaign.name().as_str())
      .bind(campaign.subject().as_str())
      .bind(campaign.content_html())
      .bind(Json(campaign.recipient_filter()))
      .bind(campaign.status().as_str())
      .bind(schedule.scheduled_at)
      .bind(schedule.started_at)
      .bind(schedule.completed_at)
      .bind(campaign.created_by().as_uuid())
      .bind(campaign.sender_user_id().map(UserId::as_uuid))
      .bind(stats.total)
      .bind(stats.pending)
      .bind(stats.sent)
      .bind(stats.failed)
      .bind(stats.skipped)
      .bind(campaign.created_at())
      .bind(campaign.updated_at())
      .execute(&self.pool)
      .await?;
      Ok(())
   }

   #[tracing::instrument(
      skip_all,
      level = "debug",
      fields(id = %campaign.id(), status = %campaign.status(), %expected)
   )]
   async fn update(&self, campaign: &Campaign, expected: CampaignStatus) -> Result<(), InfraError> {
      let mut conn = self.pool.acquire().await?;
      update_campaign_row(&mut *conn, campaign, expected).await
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, %id))]
   async fn delete(
      &self,
      organization_id: &OrganizationId,
      id: &CampaignId,
   ) -> Result<bool, InfraError> {
      let result = sqlx::query(
         r#"
            DELETE FROM campaigns
            WHERE organization_id = $1 AND id = $2 AND status IN ('draft', 'cancelled')
            "#,
      )
      .bind(organization_id.as_uuid())
      .bind(id.as_uuid())
      .execute(&self.pool)
      .await?;
      Ok(result.rows_affected() > 0)
   }

   #[tracing::instrument(
      skip_all,
      level = "debug",
      fields(id = %campaign.id(), recipients = recipients.len(), job_id = %job.id())
   )]
   async fn queue_send(
      &self,
      campaign: &Campaign,
      recipients: &[CampaignRecipient],
      job: &EmailJob,
   ) -> Result<(), InfraError> {
      let mut tx = self.pool.begin().await?;

      update_campaign_row(&mut *tx, campaign, CampaignStatus::Draft).await?;
      insert_recipient_rows(&mut *tx, recipients).await?;
      insert_job_row(&mut *tx, job).await?;

      tx.commit().await?;
      Ok(())
   }

   #[tracing::instrument(skip_all, level = "debug", fields(id = %campaign.id(), %expected))]
   async fn cancel_send(
      &self,
      campaign: &Campaign,
      expected: CampaignStatus,
   ) -> Result<(), InfraError> {
      let mut tx = self.pool.begin().await?;
      let now = campaign.updated_at();

      update_campaign_row(&mut *tx, campaign, expected).await?;

      sqlx::query(
         r#"
            UPDATE email_jobs SET status = 'cancelled', locked_at = NULL, updated_at = $3
            WHERE organization_id = $1 AND campaign_id = $2
              AND status IN ('pending', 'processing')
            "#,
      )
      .bind(campaign.organization_id().as_uuid())
      .bind(campaign.id().as_uuid())
      .bind(now)
      .execute(&mut *tx)
      .await?;

      sqlx::query(
         r#"
            UPDATE campaign_recipients SET status = 'skipped', last_error = $3, updated_at = $4
            WHERE organization_id = $1 AND campaign_id = $2 AND status = 'pending'
            "#,
      )
      .bind(campaign.organization_id().as_uuid())
      .bind(campaign.id().as_uuid())
      .bind(CANCELLED_REASON)
      .bind(now)
      .execute(&mut *tx)
      .await?;

      tx.commit().await?;
      Ok(())
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, %id))]
   async fn refresh_stats(
      &self,
      organization_id: &OrganizationId,
      id: &CampaignId,
   ) -> Result<CampaignStats, InfraError> {
      let row = sqlx::query_as::<_, StatsRow>(
         r#"
            WITH s AS (
                SELECT
                    COUNT(*) AS total_count,
                    COUNT(*) FILTER (WHERE status = 'pending') AS pending_count,
                    COUNT(*) FILTER (WHERE status = 'sent') AS sent_count,
                    COUNT(*) FILTER (WHERE status = 'failed') AS failed_count,
                    COUNT(*) FILTER (WHERE status = 'skipped') AS skipped_count
                FROM campaign_recipients
                WHERE organization_id = $1 AND campaign_id = $2
            )
            UPDATE campaigns c SET
                total_count = s.total_count,
                pending_count = s.pending_count,
                sent_count = s.sent_count,
                failed_count = s.failed_count,
                skipped_count = s.skipped_count
            FROM s
            WHERE c.organization_id = $1 AND c.id = $2
            RETURNING c.total_count, c.pending_count, c.sent_count, c.failed_count,
                      c.skipped_count
            "#,
      )
      .bind(organization_id.as_uuid())
      .bind(id.as_uuid())
      .fetch_optional(&self.pool)
      .await?;

      Ok(row.map(CampaignStats::from).unwrap_or_default())
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, %id))]
   async fn engagement(
      &self,
      organization_id: &OrganizationId,
      id: &CampaignId,
   ) -> Result<EngagementStats, InfraError> {
      let row = sqlx::query_as::<_, EngagementRow>(
         r#"
            SELECT
                COUNT(*) FILTER (WHERE opened_at IS NOT NULL) AS opened,
                COUNT(*) FILTER (WHERE clicked_at IS NOT NULL) AS clicked,
                COUNT(*) FILTER (WHERE unsubscribed_at IS NOT NULL) AS unsubscribed
            FROM campaign_recipients
            WHERE organization_id = $1 AND campaign_id = $2
            "#,
      )
      .bind(organization_id.as_uuid())
      .bind(id.as_uuid())
      .fetch_one(&self.pool)
      .await?;

      Ok(EngagementStats {
         opened:       row.opened,
         clicked:      row.clicked,
         unsubscribed: row.unsubscribed,
      })
   }
}
