//! # 配信ワーカー
//!
//! cron から呼ばれ、実行時刻に達した送信ジョブを取得してメールを送る。
//!
//! ## 設計方針
//!
//! - **1 回の実行量を制限**: ジョブ数・受信者数の上限を超えた分は次回の実行に回す
//! - **失敗の単位を分ける**: 宛先ごとの失敗は受信者に記録し、送信設定や認証の
//!   失敗はジョブ全体の失敗として再試行する
//! - **ジョブ同士は独立**: 1 件の失敗で同じ実行内の他のジョブを止めない
//! - **書き込みは取得時の状態が条件**: ジョブは取得時の `locked_at`、キャンペーンは
//!   読み込んだステータス、受信者は `pending` を条件に書き戻す。競合したら
//!   別のワーカーかキャンセルが先に進めたものとして、それ以上は書かずに中断する
//!
//! ## 1 ジョブの流れ
//!
//! 1. 古いロックの回収で試行回数が上限に達していれば、処理せずに失敗にする
//! 2. キャンペーンを読み込む（キャンセル済みならジョブもキャンセル）
//! 3. 送信者を解決する
//! 4. 送信待ちの受信者をバッチに分けて送信し、バッチ間で待機する
//! 5. 集計を更新し、送信待ちが残れば再キュー、なければ完了

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kokyaku_domain::{
   DomainError,
   campaign::{Campaign, CampaignId, CampaignStatus},
   campaign_recipient::CampaignRecipient,
   clock::Clock,
   email_job::{EmailJob, EmailJobId, EmailJobStatus, STALE_LOCK_ERROR, stale_lock_threshold},
   mail::MailError,
};
use kokyaku_infra::{
   InfraError,
   repository::{
      CampaignRecipientRepository,
      CampaignRepository,
      CustomerRepository,
      EmailJobRepository,
   },
};
use kokyaku_shared::{
   event_log::{error, event},
   log_business_event,
};
use serde::Serialize;

use super::{
   message_builder::MessageBuilder,
   sender::{ResolvedSender, SenderResolver},
};
use crate::{config::DeliveryConfig, error::ApiError};

/// 配信停止済みの受信者に記録する理由
const UNSUBSCRIBED_REASON: &str = "配信停止済みのため送信しませんでした";

/// ジョブ 1 件の処理結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
   /// すべての受信者を処理し終えた
   Completed,
   /// 送信待ちが残っているため次回に回した
   Rescheduled,
   /// キャンペーンがキャンセル・削除されていた
   Cancelled,
   /// ジョブ単位の失敗。再試行を待つ
   Retrying,
   /// 再試行の上限に達した
   Failed,
   /// 処理中に別のワーカーやキャンセルが状態を変えたため中断した
   Interrupted,
}

/// cron レスポンスに載せるジョブごとの要約
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
   pub job_id:      EmailJobId,
   pub campaign_id: CampaignId,
   pub outcome:     JobOutcome,
   pub sent:        u32,
   pub failed:      u32,
   pub skipped:     u32,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub error:       Option<String>,
}

/// 1 回の実行で数えた件数
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
   sent:    u32,
   failed:  u32,
   skipped: u32,
}

/// ジョブの処理を途中で止める理由
#[derive(Debug)]
enum Halt {
   /// 条件付きの書き込みが競合した。以降は何も書かない
   Interrupted(String),
   /// ジョブ単位の失敗。再試行に回す
   Failed(ApiError),
}

impl From<InfraError> for Halt {
   fn from(err: InfraError) -> Self {
      if err.as_conflict().is_some() {
         Self::Interrupted(err.to_string())
      } else {
         Self::Failed(err.into())
      }
   }
}

impl From<ApiError> for Halt {
   fn from(err: ApiError) -> Self {
      Self::Failed(err)
   }
}

impl From<DomainError> for Halt {
   fn from(err: DomainError) -> Self {
      Self::Failed(err.into())
   }
}

impl From<MailError> for Halt {
   fn from(err: MailError) -> Self {
      Self::Failed(err.into())
   }
}

/// 配信ワーカーの依存
pub struct DeliveryDeps {
   pub jobs:       Arc<dyn EmailJobRepository>,
   pub campaigns:  Arc<dyn CampaignRepository>,
   pub recipients: Arc<dyn CampaignRecipientRepository>,
   pub customers:  Arc<dyn CustomerRepository>,
   pub senders:    Arc<SenderResolver>,
   pub messages:   Arc<MessageBuilder>,
   pub clock:      Arc<dyn Clock>,
}

pub struct DeliveryUseCaseImpl {
   deps:   DeliveryDeps,
   config: DeliveryConfig,
}

impl DeliveryUseCaseImpl {
   pub fn new(deps: DeliveryDeps, config: DeliveryConfig) -> Self {
      Self { deps, config }
   }

   /// 実行時刻に達したジョブを処理する
   ///
   /// ジョブの取得に失敗した場合だけエラーを返す。
   pub async fn run_due_jobs(&self) -> Result<Vec<JobSummary>, ApiError> {
      let now = self.deps.clock.now();
      let jobs = self
         .deps
         .jobs
         .claim_due(now, stale_lock_threshold(now), self.config.max_jobs_per_run)
         .await?;

      let mut summaries = Vec::with_capacity(jobs.len());
      for job in jobs {
         log_business_event!(
            event.category = event::category::DELIVERY,
            event.action = event::action::JOB_CLAIMED,
            event.entity_type = event::entity_type::EMAIL_JOB,
            event.entity_id = %job.id(),
            event.organization_id = %job.organization_id(),
            event.campaign_id = %job.campaign_id(),
            event.attempts = job.attempts(),
            event.result = event::result::SUCCESS,
            "送信ジョブを取得しました"
         );
         summaries.push(self.run_job(job).await);
      }
      Ok(summaries)
   }

   async fn run_job(&self, job: EmailJob) -> JobSummary {
      let mut tally = Tally::default();
      let (outcome, error) = match job.locked_at() {
         None => (
            JobOutcome::Interrupted,
            Some("取得済みのロックがありません".to_string()),
         ),
         Some(lease) if job.is_exhausted() => {
            let message = job.last_error().unwrap_or(STALE_LOCK_ERROR).to_string();
            (self.fail_job(job.clone(), lease, &message).await, Some(message))
         }
         Some(lease) => match self.process(&job, lease, &mut tally).await {
            Ok(outcome) => (outcome, None),
            Err(Halt::Interrupted(message)) => {
               self.log_interrupted(&job, &message);
               (JobOutcome::Interrupted, Some(message))
            }
            Err(Halt::Failed(err)) => {
               let message = err.to_string();
               (self.fail_job(job.clone(), lease, &message).await, Some(message))
            }
         },
      };
      JobSummary {
         job_id: job.id().clone(),
         campaign_id: job.campaign_id().clone(),
         outcome,
         sent: tally.sent,
         failed: tally.failed,
         skipped: tally.skipped,
         error,
      }
   }

   async fn process(
      &self,
      job: &EmailJob,
      lease: DateTime<Utc>,
      tally: &mut Tally,
   ) -> Result<JobOutcome, Halt> {
      let now = self.deps.clock.now();
      let found = self
         .deps
         .campaigns
         .find_by_id(job.organization_id(), job.campaign_id())
         .await?;
      let Some(campaign) = found.filter(|c| c.status() != CampaignStatus::Cancelled) else {
         self.deps.jobs.update(&job.clone().cancel(now), lease).await?;
         tracing::info!(job_id = %job.id(), "キャンペーンがないためジョブをキャンセルしました");
         return Ok(JobOutcome::Cancelled);
      };
      if campaign.status().is_terminal() {
         self.deps.jobs.update(&job.clone().complete(now), lease).await?;
         return Ok(JobOutcome::Completed);
      }

      let loaded = campaign.status();
      let campaign = campaign.start_sending(now)?;
      if loaded != CampaignStatus::Sending {
         self.deps.campaigns.update(&campaign, loaded).await?;
      }

      let sender_user_id = campaign.sender_user_id().cloned().ok_or_else(|| {
         ApiError::BadRequest("キャンペーンの送信者が設定されていません".to_string())
      })?;
      let resolved = self
         .deps
         .senders
         .resolve(campaign.organization_id(), &sender_user_id, now)
         .await?;

      let pending = self
         .deps
         .recipients
         .find_pending(
            campaign.organization_id(),
            campaign.id(),
            self.config.max_recipients_per_run,
         )
         .await?;
      for (index, batch) in pending.chunks(self.config.batch_size.max(1)).enumerate() {
         if index > 0 && !self.config.batch_delay.is_zero() {
            tokio::time::sleep(self.config.batch_delay).await;
         }
         for recipient in batch {
            self
               .deliver(&campaign, recipient.clone(), &resolved, tally)
               .await?;
         }
         log_business_event!(
            event.category = event::category::DELIVERY,
            event.action = event::action::BATCH_SENT,
            event.entity_type = event::entity_type::CAMPAIGN,
            event.entity_id = %campaign.id(),
            event.organization_id = %campaign.organization_id(),
            event.batch_index = index,
            event.batch_size = batch.len(),
            event.result = event::result::SUCCESS,
            "バッチを送信しました"
         );
      }

      let stats = self
         .deps
         .campaigns
         .refresh_stats(campaign.organization_id(), campaign.id())
         .await?;
      let now = self.deps.clock.now();
      if stats.has_pending() {
         self.deps.jobs.update(&job.clone().requeue(now), lease).await?;
         log_business_event!(
            event.category = event::category::DELIVERY,
            event.action = event::action::JOB_RESCHEDULED,
            event.entity_type = event::entity_type::EMAIL_JOB,
            event.entity_id = %job.id(),
            event.organization_id = %job.organization_id(),
            event.pending = stats.pending,
            event.result = event::result::SUCCESS,
            "送信待ちが残っているため次回に回します"
         );
         return Ok(JobOutcome::Rescheduled);
      }

      self.deps.jobs.update(&job.clone().complete(now), lease).await?;
      let campaign = campaign.complete(stats, now)?;
      self
         .deps
         .campaigns
         .update(&campaign, CampaignStatus::Sending)
         .await?;
      log_business_event!(
         event.category = event::category::CAMPAIGN,
         event.action = event::action::CAMPAIGN_COMPLETED,
         event.entity_type = event::entity_type::CAMPAIGN,
         event.entity_id = %campaign.id(),
         event.organization_id = %campaign.organization_id(),
         event.status = %campaign.status(),
         event.sent = stats.sent,
         event.failed = stats.failed,
         event.skipped = stats.skipped,
         event.result = event::result::SUCCESS,
         "キャンペーンの配信が完了しました"
      );
      Ok(JobOutcome::Completed)
   }

   /// 受信者 1 件に送信し、結果を書き戻す
   ///
   /// 後続の宛先にも影響する送信エラーと、受信者が送信待ちでなくなっていた場合だけ
   /// `Err` で返す。
   async fn deliver(
      &self,
      campaign: &Campaign,
      recipient: CampaignRecipient,
      resolved: &ResolvedSender,
      tally: &mut Tally,
   ) -> Result<(), Halt> {
      let customer = self
         .deps
         .customers
         .find_by_id(campaign.organization_id(), recipient.customer_id())
         .await?;
      let now = self.deps.clock.now();

      if customer.as_ref().is_some_and(|c| c.unsubscribed_at().is_some()) {
         let skipped = recipient.mark_skipped(UNSUBSCRIBED_REASON, now);
         self.deps.recipients.update_delivery(&skipped).await?;
         tally.skipped += 1;
         return Ok(());
      }

      let message = self.deps.messages.for_recipient(
         campaign,
         &recipient,
         customer.as_ref(),
         &resolved.identity,
      )?;
      match resolved.sender.send_email(&message).await {
         Ok(()) => {
            self
               .deps
               .recipients
               .update_delivery(&recipient.mark_sent(now))
               .await?;
            tally.sent += 1;
         }
         Err(err) if err.is_job_level() => return Err(err.into()),
         Err(err) => {
            tracing::warn!(
               error.category = error::category::EXTERNAL_SERVICE,
               error.kind = error::kind::MAIL_TRANSPORT,
               recipient_id = %recipient.id(),
               campaign_id = %campaign.id(),
               "送信に失敗しました: {}",
               err
            );
            let failed = recipient.record_failure(
               &err.to_string(),
               self.config.recipient_max_attempts,
               now,
            );
            self.deps.recipients.update_delivery(&failed).await?;
            tally.failed += 1;
         }
      }
      Ok(())
   }

   fn log_interrupted(&self, job: &EmailJob, reason: &str) {
      log_business_event!(
         event.category = event::category::DELIVERY,
         event.action = event::action::JOB_INTERRUPTED,
         event.entity_type = event::entity_type::EMAIL_JOB,
         event.entity_id = %job.id(),
         event.organization_id = %job.organization_id(),
         event.campaign_id = %job.campaign_id(),
         event.result = event::result::FAILURE,
         event.reason = reason,
         "別の処理が先に状態を変えたためジョブを中断しました"
      );
   }

   /// ジョブ単位の失敗を記録する
   ///
   /// 上限に達したらキャンペーンも `failed` にする。古いロックの回収で既に上限に
   /// 達していたジョブは試行回数を増やさずに `failed` にする。
   async fn fail_job(&self, job: EmailJob, lease: DateTime<Utc>, message: &str) -> JobOutcome {
      let now = self.deps.clock.now();
      let job = if job.is_exhausted() {
         job.abandon(now)
      } else {
         job.record_failure(message, now)
      };
      if let Err(e) = self.deps.jobs.update(&job, lease).await {
         if e.as_conflict().is_some() {
            self.log_interrupted(&job, &e.to_string());
            return JobOutcome::Interrupted;
         }
         tracing::error!(
            error.category = error::category::INFRASTRUCTURE,
            error.kind = error::kind::DATABASE,
            job_id = %job.id(),
            "ジョブの失敗を記録できませんでした: {}",
            e
         );
      }
      log_business_event!(
         event.category = event::category::DELIVERY,
         event.action = event::action::JOB_RESCHEDULED,
         event.entity_type = event::entity_type::EMAIL_JOB,
         event.entity_id = %job.id(),
         event.organization_id = %job.organization_id(),
         event.attempts = job.attempts(),
         event.status = %job.status(),
         event.result = event::result::FAILURE,
         event.reason = message,
         "送信ジョブが失敗しました"
      );

      if job.status() != EmailJobStatus::Failed {
         return JobOutcome::Retrying;
      }
      if let Err(e) = self.fail_campaign(&job, now).await {
         tracing::error!(
            error.category = error::category::INFRASTRUCTURE,
            error.kind = error::kind::DATABASE,
            campaign_id = %job.campaign_id(),
            "キャンペーンを失敗として記録できませんでした: {}",
            e
         );
      }
      JobOutcome::Failed
   }

   async fn fail_campaign(
      &self,
      job: &EmailJob,
      now: DateTime<Utc>,
   ) -> Result<(), ApiError> {
      let Some(campaign) = self
         .deps
         .campaigns
         .find_by_id(job.organization_id(), job.campaign_id())
         .await?
      else {
         return Ok(());
      };
      let loaded = campaign.status();
      if !matches!(loaded, CampaignStatus::Scheduled | CampaignStatus::Sending) {
         return Ok(());
      }
      let stats = self
         .deps
         .campaigns
         .refresh_stats(job.organization_id(), job.campaign_id())
         .await?;
      let campaign = campaign.with_stats(stats, now).fail(now)?;
      match self.deps.campaigns.update(&campaign, loaded).await {
         Ok(()) => {}
         Err(e) if e.as_conflict().is_some() => {
            tracing::info!(
               campaign_id = %campaign.id(),
               "キャンペーンの状態が先に変わったため失敗にしませんでした"
            );
            return Ok(());
         }
         Err(e) => return Err(e.into()),
      }

      log_business_event!(
         event.category = event::category::CAMPAIGN,
         event.action = event::action::CAMPAIGN_FAILED,
         event.entity_type = event::entity_type::CAMPAIGN,
         event.entity_id = %campaign.id(),
         event.organization_id = %campaign.organization_id(),
         event.result = event::result::FAILURE,
         "再試行の上限に達したためキャンペーンを失敗にしました"
      );
      Ok(())
   }
}
