//! # メール送信ジョブ
//!
//! キャンペーン送信を表すキューの 1 行。cron から起動される配信ワーカーが
//! ポーリングして処理する。
//!
//! ## ステータス遷移
//!
//! ```text
//! pending ──(claim)──→ processing ──→ completed
//!    ↑                     │
//!    └──(未送信あり / 再試行)─┤
//!                          ├──(再試行上限)──→ failed
//!                          └──(キャンペーン取消)──→ cancelled
//! ```
//!
//! `processing` のままロックが [`STALE_LOCK_TIMEOUT_MINUTES`] 分以上経過した
//! ジョブは、ワーカーの異常終了とみなして再取得の対象になる。再取得は
//! 試行 1 回として数え、上限に達したジョブはそれ以上処理せず `failed` にする。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{DomainError, campaign::CampaignId, organization::OrganizationId};

define_uuid_id! {
   /// メール送信ジョブ ID
   pub struct EmailJobId;
}

/// ロックが古いとみなすまでの時間（分）
pub const STALE_LOCK_TIMEOUT_MINUTES: i64 = 15;

/// ジョブ単位の最大試行回数の既定値
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// 再試行間隔の単位（分）。n 回目の失敗後は n × この値だけ待つ
pub const BACKOFF_STEP_MINUTES: i64 = 5;

const MAX_ERROR_LENGTH: usize = 1000;

/// 古いロックを回収したときに記録するエラー
pub const STALE_LOCK_ERROR: &str = "ワーカーが応答しなくなったため再取得しました";

#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmailJobStatus {
   Pending,
   Processing,
   Completed,
   Failed,
   Cancelled,
}

impl EmailJobStatus {
   pub fn as_str(self) -> &'static str {
      self.into()
   }
}

impl std::str::FromStr for EmailJobStatus {
   type Err = DomainError;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      match s {
         "pending" => Ok(Self::Pending),
         "processing" => Ok(Self::Processing),
         "completed" => Ok(Self::Completed),
         "failed" => Ok(Self::Failed),
         "cancelled" => Ok(Self::Cancelled),
         _ => Err(DomainError::Validation(format!("不正なジョブステータス: {s}"))),
      }
   }
}

/// 失敗回数に応じた再実行までの待ち時間
pub fn backoff(attempts: i32) -> Duration {
   Duration::minutes(BACKOFF_STEP_MINUTES * i64::from(attempts.max(1)))
}

/// ロックが古いと判定する境界時刻
pub fn stale_lock_threshold(now: DateTime<Utc>) -> DateTime<Utc> {
   now - Duration::minutes(STALE_LOCK_TIMEOUT_MINUTES)
}

#[derive(Debug, Clone)]
pub struct EmailJob {
   id:              EmailJobId,
   organization_id: OrganizationId,
   campaign_id:     CampaignId,
   status:          EmailJobStatus,
   attempts:        i32,
   max_attempts:    i32,
   last_error:      Option<String>,
   run_after:       DateTime<Utc>,
   locked_at:       Option<DateTime<Utc>>,
   completed_at:    Option<DateTime<Utc>>,
   created_at:      DateTime<Utc>,
   updated_at:      DateTime<Utc>,
}

impl EmailJob {
   pub fn new(
      organization_id: OrganizationId,
      campaign_id: CampaignId,
      run_after: DateTime<Utc>,
      max_attempts: i32,
      now: DateTime<Utc>,
   ) -> Self {
      Self {
         id: EmailJobId::new(),
         organization_id,
         campaign_id,
         status: EmailJobStatus::Pending,
         attempts: 0,
         max_attempts: max_attempts.max(1),
         last_error: None,
         run_after,
         locked_at: None,
         completed_at: None,
         created_at: now,
         updated_at: now,
      }
   }

   #[allow(clippy::too_many_arguments)]
   pub fn from_db(
      id: EmailJobId,
      organization_id: OrganizationId,
      campaign_id: CampaignId,
      status: EmailJobStatus,
      attempts: i32,
      max_attempts: i32,
      last_error: Option<String>,
      run_after: DateTime<Utc>,
      locked_at: Option<DateTime<Utc>>,
      completed_at: Option<DateTime<Utc>>,
      created_at: DateTime<Utc>,
      updated_at: DateTime<Utc>,
   ) -> Self {
      Self {
         id,
         organization_id,
         campaign_id,
         status,
         attempts,
         max_attempts,
         last_error,
         run_after,
         locked_at,
         completed_at,
         created_at,
         updated_at,
      }
   }

   /// 取得可能か（実行時刻到来済みの pending、またはロックが古い processing）
   pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
      match self.status {
         EmailJobStatus::Pending => self.run_after <= now,
         EmailJobStatus::Processing => self
            .locked_at
            .is_none_or(|locked| locked < stale_lock_threshold(now)),
         _ => false,
      }
   }

   /// ワーカーが取得した状態にする
   ///
   /// 古いロックの回収は前回の処理が失敗したものとして試行回数を 1 増やす。
   pub fn claimed(self, now: DateTime<Utc>) -> Self {
      let (attempts, last_error) = if self.status == EmailJobStatus::Processing {
         (self.attempts + 1, Some(STALE_LOCK_ERROR.to_string()))
      } else {
         (self.attempts, self.last_error.clone())
      };
      Self {
         status: EmailJobStatus::Processing,
         attempts,
         last_error,
         locked_at: Some(now),
         updated_at: now,
         ..self
      }
   }

   /// 試行回数が上限に達しているか
   pub fn is_exhausted(&self) -> bool {
      self.attempts >= self.max_attempts
   }

   /// 試行回数を増やさずに `failed` にする
   ///
   /// 古いロックの回収で上限に達したジョブに使う。
   pub fn abandon(self, now: DateTime<Utc>) -> Self {
      Self {
         status: EmailJobStatus::Failed,
         locked_at: None,
         completed_at: Some(now),
         updated_at: now,
         ..self
      }
   }

   /// 未送信の受信者が残っているため次回の実行に回す
   ///
   /// ジョブ単位の失敗ではないので試行回数は増やさない。
   pub fn requeue(self, now: DateTime<Utc>) -> Self {
      Self {
         status: EmailJobStatus::Pending,
         run_after: now,
         locked_at: None,
         updated_at: now,
         ..self
      }
   }

   pub fn complete(self, now: DateTime<Utc>) -> Self {
      Self {
         status: EmailJobStatus::Completed,
         locked_at: None,
         completed_at: Some(now),
         updated_at: now,
         ..self
      }
   }

   pub fn cancel(self, now: DateTime<Utc>) -> Self {
      Self {
         status: EmailJobStatus::Cancelled,
         locked_at: None,
         completed_at: Some(now),
         updated_at: now,
         ..self
      }
   }

   /// ジョブ単位の失敗を記録する
   ///
   /// 上限未満なら [`backoff`] 後に再実行、上限に達したら `failed`。
   pub fn record_failure(self, error: &str, now: DateTime<Utc>) -> Self {
      let attempts = self.attempts + 1;
      let last_error = Some(error.chars().take(MAX_ERROR_LENGTH).collect());
      if attempts < self.max_attempts {
         Self {
            status: EmailJobStatus::Pending,
            attempts,
            last_error,
            run_after: now + backoff(attempts),
            locked_at: None,
            updated_at: now,
            ..self
         }
      } else {
         Self {
            status: EmailJobStatus::Failed,
            attempts,
            last_error,
            locked_at: None,
            completed_at: Some(now),
            updated_at: now,
            ..self
         }
      }
   }

   pub fn id(&self) -> &EmailJobId {
      &self.id
   }

   pub fn organization_id(&self) -> &OrganizationId {
      &self.organization_id
   }

   pub fn campaign_id(&self) -> &CampaignId {
      &self.campaign_id
   }

   pub fn status(&self) -> EmailJobStatus {
      self.status
   }

   pub fn attempts(&self) -> i32 {
      self.attempts
   }

   pub fn max_attempts(&self) -> i32 {
      self.max_attempts
   }

   pub fn last_error(&self) -> Option<&str> {
      self.last_error.as_deref()
   }

   pub fn run_after(&self) -> DateTime<Utc> {
      self.run_after
   }

   pub fn locked_at(&self) -> Option<DateTime<Utc>> {
      self.locked_at
   }

   pub fn completed_at(&self) -> Option<DateTime<Utc>> {
      self.completed_at
   }

   pub fn created_at(&self) -> DateTime<Utc> {
      self.created_at
   }

   pub fn updated_at(&self) -> DateTime<Utc> {
      self.updated_at
   }
}
