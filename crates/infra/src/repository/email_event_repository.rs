//! # EmailEventRepository
//!
//! 開封・クリック・配信停止イベントの記録を担当するリポジトリ。
//!
//! イベント行の追加と、受信者のエンゲージメント列（初回日時・回数）の更新を
//! 同一トランザクションで行う。回数の加算は `open_count + 1` の形で SQL 側で行い、
//! 同時アクセスでも取りこぼさない。

use async_trait::async_trait;
use kokyaku_domain::tracking::{EmailEvent, EmailEventType};
use sqlx::PgPool;

use crate::error::InfraError;

/// メールイベントリポジトリトレイト
#[async_trait]
pub trait EmailEventRepository: Send + Sync {
   /// イベントを記録し、受信者のエンゲージメントを更新する
   ///
   /// 配信停止は受信者単位で 1 回だけ記録し、顧客の配信停止日時も設定する。
   /// 既に配信停止済みだった場合は何も書き込まず `false` を返す。
   async fn record(&self, event: &EmailEvent) -> Result<bool, InfraError>;
}

/// PostgreSQL 実装の EmailEventRepository
#[derive(Debug, Clone)]
pub struct PostgresEmailEventRepository {
   pool: PgPool,
}

impl PostgresEmailEventRepository {
   pub fn new(pool: PgPool) -> Self {
      Self { pool }
   }
}

#[async_trait]
impl EmailEventRepository for PostgresEmailEventRepository {
   #[tracing::instrument(
      skip_all,
      level = "debug",
      fields(recipient_id = %event.recipient_id, event_type = %event.event_type)
   )]
   async fn record(&self, event: &EmailEvent) -> Result<bool, InfraError> {
      let mut tx = self.pool.begin().await?;

      let engagement_sql = match event.event_type {
         EmailEventType::Open => {
            r#"
               UPDATE campaign_recipients SET
                   opened_at = COALESCE(opened_at, $2),
                   open_count = open_count + 1,
                   updated_at = $2
               WHERE id = $1
               "#
         }
         EmailEventType::Click => {
            r#"
               UPDATE campaign_recipients SET
                   opened_at = COALESCE(opened_at, $2),
                   clicked_at = COALESCE(clicked_at, $2),
                   click_count = click_count + 1,
                   updated_at = $2
               WHERE id = $1
               "#
         }
         EmailEventType::Unsubscribe => {
            r#"
               UPDATE campaign_recipients SET unsubscribed_at = $2, updated_at = $2
               WHERE id = $1 AND unsubscribed_at IS NULL
               "#
         }
      };

      let updated = sqlx::query(engagement_sql)
         .bind(event.recipient_id.as_uuid())
         .bind(event.occurred_at)
         .execute(&mut *tx)
         .await?
         .rows_affected();

      if event.event_type == EmailEventType::Unsubscribe {
         // 受信者が既に停止済みでも、顧客側の停止は漏れなく反映する
         sqlx::query(
            r#"
               UPDATE customers SET
                   unsubscribed_at = COALESCE(unsubscribed_at, $2),
                   updated_at = $2
               WHERE id = (SELECT customer_id FROM campaign_recipients WHERE id = $1)
                 AND unsubscribed_at IS NULL
               "#,
         )
         .bind(event.recipient_id.as_uuid())
         .bind(event.occurred_at)
         .execute(&mut *tx)
         .await?;
      }

      if updated == 0 {
         tx.commit().await?;
         return Ok(false);
      }

      sqlx::query(
         r#"
            INSERT INTO email_events (
                id, organization_id, campaign_id, recipient_id, event_type, url,
                user_agent, ip, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
      )
      .bind(event.id.as_uuid())
      .bind(event.organization_id.as_uuid())
      .bind(event.campaign_id.as_uuid())
      .bind(event.recipient_id.as_uuid())
      .bind(event.event_type.as_str())
      .bind(event.url.as_deref())
      .bind(event.user_agent.as_deref())
      .bind(event.ip.as_deref())
      .bind(event.occurred_at)
      .execute(&mut *tx)
      .await?;

      tx.commit().await?;
      Ok(true)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_トレイトはsendとsyncを実装している() {
      fn assert_send_sync<T: Send + Sync>() {}
      assert_send_sync::<PostgresEmailEventRepository>();
   }
}
