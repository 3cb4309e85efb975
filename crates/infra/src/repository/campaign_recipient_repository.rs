//! # CampaignRecipientRepository
//!
//! キャンペーン受信者（送信単位）の永続化を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **宛先はキュー登録時に確定**: 顧客の氏名・メールアドレスを行にコピーし、
//!   顧客の削除・変更後も送信記録を残す
//! - **重複送信の防止**: `(campaign_id, email)` の一意制約で同一キャンペーン内の
//!   同一アドレスを 1 行に制限する
//! - **トラッキングからの参照は組織横断**: 署名付き URL には受信者 ID しか含まれないため、
//!   [`CampaignRecipientRepository::find_for_tracking`] だけは組織 ID で絞り込まない

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kokyaku_domain::{
   campaign::CampaignId,
   campaign_recipient::{
      CampaignRecipient,
      CampaignRecipientId,
      DeliveryAttempts,
      RecipientEngagement,
      RecipientStatus,
   },
   customer::CustomerId,
   organization::OrganizationId,
   value_objects::Email,
};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::PageRequest;
use crate::error::InfraError;

/// 受信者リポジトリトレイト
#[async_trait]
pub trait CampaignRecipientRepository: Send + Sync {
   /// キャンペーンの受信者を登録順に取得し、総件数と合わせて返す
   async fn search(
      &self,
      organization_id: &OrganizationId,
      campaign_id: &CampaignId,
      status: Option<RecipientStatus>,
      page: PageRequest,
   ) -> Result<(Vec<CampaignRecipient>, i64), InfraError>;

   /// 送信待ちの受信者を登録順に最大 `limit` 件取得する
   async fn find_pending(
      &self,
      organization_id: &OrganizationId,
      campaign_id: &CampaignId,
      limit: i64,
   ) -> Result<Vec<CampaignRecipient>, InfraError>;

   /// 送信結果（ステータス・試行回数・エラー・送信日時）を書き戻す
   ///
   /// 送信待ちの行だけを更新する。キャンセルなどで既に確定していれば `Conflict`。
   async fn update_delivery(&self, recipient: &CampaignRecipient) -> Result<(), InfraError>;

   /// トラッキング URL の受信者 ID から取得する（組織横断）
   async fn find_for_tracking(
      &self,
      id: &CampaignRecipientId,
   ) -> Result<Option<CampaignRecipient>, InfraError>;
}

#[derive(sqlx::FromRow)]
struct RecipientRow {
   id:              Uuid,
   organization_id: Uuid,
   campaign_id:     Uuid,
   customer_id:     Uuid,
   email:           String,
   name:            String,
   status:          String,
   attempts:        i32,
   last_error:      Option<String>,
   sent_at:         Option<DateTime<Utc>>,
   opened_at:       Option<DateTime<Utc>>,
   clicked_at:      Option<DateTime<Utc>>,
   open_count:      i32,
   click_count:     i32,
   unsubscribed_at: Option<DateTime<Utc>>,
   created_at:      DateTime<Utc>,
   updated_at:      DateTime<Utc>,
}

impl TryFrom<RecipientRow> for CampaignRecipient {
   type Error = InfraError;

   fn try_from(row: RecipientRow) -> Result<Self, Self::Error> {
      let to_infra = |e: kokyaku_domain::DomainError| InfraError::unexpected(e.to_string());
      Ok(CampaignRecipient::from_db(
         CampaignRecipientId::from_uuid(row.id),
         OrganizationId::from_uuid(row.organization_id),
         CampaignId::from_uuid(row.campaign_id),
         CustomerId::from_uuid(row.customer_id),
         Email::new(row.email).map_err(to_infra)?,
         row.name,
         row.status.parse::<RecipientStatus>().map_err(to_infra)?,
         DeliveryAttempts {
            attempts:   row.attempts,
            last_error: row.last_error,
            sent_at:    row.sent_at,
         },
         RecipientEngagement {
            opened_at:       row.opened_at,
            clicked_at:      row.clicked_at,
            open_count:      row.open_count,
            click_count:     row.click_count,
            unsubscribed_at: row.unsubscribed_at,
         },
         row.created_at,
         row.updated_at,
      ))
   }
}

const RECIPIENT_COLUMNS: &str = "id, organization_id, campaign_id, customer_id, email, name, \
                                 status, attempts, last_error, sent_at, opened_at, clicked_at, \
                                 open_count, click_count, unsubscribed_at, created_at, updated_at";

/// 受信者をまとめて登録する（トランザクション内で使う）
///
/// 同一キャンペーン内で重複するメールアドレスは無視し、登録できた件数を返す。
pub(crate) async fn insert_recipient_rows(
   conn: &mut PgConnection,
   recipients: &[CampaignRecipient],
) -> Result<u64, InfraError> {
   let Some(first) = recipients.first() else {
      return Ok(0);
   };

   let ids: Vec<Uuid> = recipients.iter().map(|r| *r.id().as_uuid()).collect();
   let customer_ids: Vec<Uuid> = recipients.iter().map(|r| *r.customer_id().as_uuid()).collect();
   let emails: Vec<String> = recipients.iter().map(|r| r.email().as_str().to_string()).collect();
   let names: Vec<String> = recipients.iter().map(|r| r.name().to_string()).collect();

   let result = sqlx::query(
      r#"
         INSERT INTO campaign_recipients (
             id, organization_id, campaign_id, customer_id, email, name, status,
             created_at, updated_at
         )
         SELECT r.id, $1, $2, r.customer_id, r.email, r.name, 'pending', $3, $3
         FROM UNNEST($4::uuid[], $5::uuid[], $6::text[], $7::text[])
             AS r(id, customer_id, email, name)
         ON CONFLICT (campaign_id, email) DO NOTHING
         "#,
   )
   .bind(first.organization_id().as_uuid())
   .bind(first.campaign_id().as_uuid())
   .bind(first.created_at())
   .bind(ids)
   .bind(customer_ids)
   .bind(emails)
   .bind(names)
   .execute(&mut *conn)
   .await?;
   Ok(result.rows_affected())
}

/// PostgreSQL 実装の CampaignRecipientRepository
#[derive(Debug, Clone)]
pub struct PostgresCampaignRecipientRepository {
   pool: PgPool,
}

impl PostgresCampaignRecipientRepository {
   pub fn new(pool: PgPool) -> Self {
      Self { pool }
   }
}

#[async_trait]
impl CampaignRecipientRepository for PostgresCampaignRecipientRepository {
   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, %campaign_id))]
   async fn search(
      &self,
      organization_id: &OrganizationId,
      campaign_id: &CampaignId,
      status: Option<RecipientStatus>,
      page: PageRequest,
   ) -> Result<(Vec<CampaignRecipient>, i64), InfraError> {
      const FILTER: &str = r#"
         WHERE organization_id = $1 AND campaign_id = $2
           AND ($3::text IS NULL OR status = $3)
      "#;
      let status = status.map(RecipientStatus::as_str);

      let total: i64 =
         sqlx::query_scalar(&format!("SELECT COUNT(*) FROM campaign_recipients {FILTER}"))
            .bind(organization_id.as_uuid())
            .bind(campaign_id.as_uuid())
            .bind(status)
            .fetch_one(&self.pool)
            .await?;

      let rows = sqlx::query_as::<_, RecipientRow>(&format!(
         "SELECT {RECIPIENT_COLUMNS} FROM campaign_recipients {FILTER} \
          ORDER BY created_at ASC, email ASC LIMIT $4 OFFSET $5"
      ))
      .bind(organization_id.as_uuid())
      .bind(campaign_id.as_uuid())
      .bind(status)
      .bind(page.limit)
      .bind(page.offset)
      .fetch_all(&self.pool)
      .await?;

      let recipients = rows
         .into_iter()
         .map(CampaignRecipient::try_from)
         .collect::<Result<Vec<_>, _>>()?;
      Ok((recipients, total))
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, %campaign_id, limit = limit))]
   async fn find_pending(
      &self,
      organization_id: &OrganizationId,
      campaign_id: &CampaignId,
      limit: i64,
   ) -> Result<Vec<CampaignRecipient>, InfraError> {
      let rows = sqlx::query_as::<_, RecipientRow>(&format!(
         r#"
            SELECT {RECIPIENT_COLUMNS} FROM campaign_recipients
            WHERE organization_id = $1 AND campaign_id = $2 AND status = 'pending'
            ORDER BY created_at ASC, email ASC
            LIMIT $3
            "#
      ))
      .bind(organization_id.as_uuid())
      .bind(campaign_id.as_uuid())
      .bind(limit)
      .fetch_all(&self.pool)
      .await?;

      rows.into_iter().map(CampaignRecipient::try_from).collect()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(id = %recipient.id(), status = %recipient.status()))]
   async fn update_delivery(&self, recipient: &CampaignRecipient) -> Result<(), InfraError> {
      let delivery = recipient.delivery();

      let result = sqlx::query(
         r#"
            UPDATE campaign_recipients SET
                status = $3, attempts = $4, last_error = $5, sent_at = $6, updated_at = $7
            WHERE organization_id = $1 AND id = $2 AND status = 'pending'
            "#,
      )
      .bind(recipient.organization_id().as_uuid())
      .bind(recipient.id().as_uuid())
      .bind(recipient.status().as_str())
      .bind(delivery.attempts)
      .bind(delivery.last_error.as_deref())
      .bind(delivery.sent_at)
      .bind(recipient.updated_at())
      .execute(&self.pool)
      .await?;

      if result.rows_affected() == 0 {
         return Err(InfraError::conflict("CampaignRecipient", recipient.id().to_string()));
      }
      Ok(())
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%id))]
   async fn find_for_tracking(
      &self,
      id: &CampaignRecipientId,
   ) -> Result<Option<CampaignRecipient>, InfraError> {
      let row = sqlx::query_as::<_, RecipientRow>(&format!(
         "SELECT {RECIPIENT_COLUMNS} FROM campaign_recipients WHERE id = $1"
      ))
      .bind(id.as_uuid())
      .fetch_optional(&self.pool)
      .await?;

      row.map(CampaignRecipient::try_from).transpose()
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_トレイトはsendとsyncを実装している() {
      fn assert_send_sync<T: Send + Sync>() {}
      assert_send_sync::<PostgresCampaignRecipientRepository>();
   }
}
