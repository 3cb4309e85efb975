//! # キャンペーンユースケース
//!
//! キャンペーンの編集、受信者のプレビュー、送信キューへの登録とキャンセル、
//! 配信結果の集計、テスト送信を扱う。
//!
//! ## 送信キューへの登録
//!
//! 1. 受信者フィルタを配信可能な顧客とセグメントに対して解決する
//! 2. 受信者ごとに `pending` の行を作る（0 件ならエラー）
//! 3. キャンペーンを `scheduled`（未来の予約）または `sending` にする
//! 4. `run_after` を予約時刻（即時なら現在時刻）にしたジョブを作る
//!
//! 2〜4 はリポジトリ側で 1 トランザクションにまとめる。
//!
//! ## 同時操作
//!
//! 状態を変える書き込みは読み込んだ時点のステータスを条件にする。
//! 別のリクエストや配信ワーカーが先に遷移させていれば 409 を返す。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kokyaku_domain::{
   campaign::{
      Campaign,
      CampaignContent,
      CampaignId,
      CampaignInput,
      CampaignStats,
      CampaignStatus,
      EngagementStats,
   },
   campaign_recipient::{CampaignRecipient, CampaignRecipientId, RecipientStatus},
   clock::Clock,
   customer::Customer,
   email_job::EmailJob,
   organization::OrganizationId,
   personalization::PersonalizationContext,
   recipient_filter::RecipientFilter,
   value_objects::Email,
};
use kokyaku_infra::{
   InfraError,
   SessionData,
   repository::{
      CampaignRecipientRepository,
      CampaignRepository,
      CustomerRepository,
      PageRequest,
      SegmentRepository,
   },
};
use kokyaku_shared::{event_log::event, log_business_event};

use super::{message_builder::MessageBuilder, segment::CustomerPreview, sender::SenderResolver};
use crate::error::ApiError;

/// テスト送信の件名に付ける接頭辞
pub const TEST_SUBJECT_PREFIX: &str = "[テスト] ";

/// 条件付き更新の競合を、状態が変わったことを伝える 409 にする
fn state_changed(err: InfraError, id: &CampaignId) -> ApiError {
   if err.as_conflict().is_some() {
      ApiError::Conflict(format!(
         "キャンペーンの状態が他の操作で変更されました: {id}"
      ))
   } else {
      err.into()
   }
}

/// 配信結果の集計
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CampaignReport {
   pub stats:      CampaignStats,
   pub engagement: EngagementStats,
   pub open_rate:  f64,
   pub click_rate: f64,
}

/// キャンペーンユースケースの依存
pub struct CampaignDeps {
   pub campaigns:  Arc<dyn CampaignRepository>,
   pub recipients: Arc<dyn CampaignRecipientRepository>,
   pub customers:  Arc<dyn CustomerRepository>,
   pub segments:   Arc<dyn SegmentRepository>,
   pub senders:    Arc<SenderResolver>,
   pub messages:   Arc<MessageBuilder>,
   pub clock:      Arc<dyn Clock>,
}

/// キャンペーンユースケース
pub struct CampaignUseCaseImpl {
   deps:             CampaignDeps,
   job_max_attempts: i32,
}

impl CampaignUseCaseImpl {
   pub fn new(deps: CampaignDeps, job_max_attempts: i32) -> Self {
      Self {
         deps,
         job_max_attempts,
      }
   }

   pub async fn list(
      &self,
      organization_id: &OrganizationId,
      status: Option<CampaignStatus>,
      page: PageRequest,
   ) -> Result<(Vec<Campaign>, i64), ApiError> {
      Ok(self.deps.campaigns.search(organization_id, status, page).await?)
   }

   pub async fn get(
      &self,
      organization_id: &OrganizationId,
      id: &CampaignId,
   ) -> Result<Campaign, ApiError> {
      self
         .deps
         .campaigns
         .find_by_id(organization_id, id)
         .await?
         .ok_or_else(|| ApiError::NotFound(format!("キャンペーンが見つかりません: {id}")))
   }

   pub async fn create(
      &self,
      session: &SessionData,
      input: CampaignInput,
   ) -> Result<Campaign, ApiError> {
      let content = CampaignContent::try_from(input)?;
      let campaign = Campaign::new(
         CampaignId::new(),
         session.organization_id().clone(),
         content,
         session.user_id().clone(),
         self.deps.clock.now(),
      );
      self.deps.campaigns.insert(&campaign).await?;
      Ok(campaign)
   }

   /// 下書きの内容を更新する
   pub async fn update(
      &self,
      organization_id: &OrganizationId,
      id: &CampaignId,
      input: CampaignInput,
   ) -> Result<Campaign, ApiError> {
      let content = CampaignContent::try_from(input)?;
      let campaign = self
         .get(organization_id, id)
         .await?
         .with_content(content, self.deps.clock.now())?;
      self
         .deps
         .campaigns
         .update(&campaign, CampaignStatus::Draft)
         .await
         .map_err(|e| state_changed(e, id))?;
      Ok(campaign)
   }

   pub async fn delete(
      &self,
      organization_id: &OrganizationId,
      id: &CampaignId,
   ) -> Result<(), ApiError> {
      self.get(organization_id, id).await?.ensure_deletable()?;
      if !self.deps.campaigns.delete(organization_id, id).await? {
         // 確認後に送信キューへ登録されたか、既に削除された
         return Err(ApiError::Conflict(format!(
            "キャンペーンの状態が他の操作で変更されました: {id}"
         )));
      }
      Ok(())
   }

   /// フィルタを解決して送信対象の顧客を返す
   async fn resolve_recipients(
      &self,
      organization_id: &OrganizationId,
      filter: &RecipientFilter,
   ) -> Result<Vec<Customer>, ApiError> {
      let customers = self.deps.customers.find_all_mailable(organization_id).await?;
      let segments = if filter.segments.is_empty() {
         Vec::new()
      } else {
         self
            .deps
            .segments
            .find_by_ids(organization_id, &filter.segments)
            .await?
      };
      Ok(filter
         .resolve(&customers, &segments)?
         .into_iter()
         .cloned()
         .collect())
   }

   /// 保存前のフィルタで送信対象をプレビューする
   pub async fn preview_recipients(
      &self,
      organization_id: &OrganizationId,
      filter: RecipientFilter,
   ) -> Result<CustomerPreview, ApiError> {
      let recipients = self
         .resolve_recipients(organization_id, &filter.normalized())
         .await?;
      Ok(CustomerPreview::from_matches(&recipients))
   }

   /// 即時送信、または `scheduled_at` に予約する
   pub async fn send(
      &self,
      session: &SessionData,
      id: &CampaignId,
      scheduled_at: Option<DateTime<Utc>>,
   ) -> Result<Campaign, ApiError> {
      let organization_id = session.organization_id();
      let campaign = self.get(organization_id, id).await?;
      if campaign.status() != CampaignStatus::Draft {
         return Err(ApiError::Conflict(format!(
            "{} のキャンペーンは送信できません",
            campaign.status()
         )));
      }

      let now = self.deps.clock.now();
      let customers = self
         .resolve_recipients(organization_id, campaign.recipient_filter())
         .await?;
      if customers.is_empty() {
         return Err(ApiError::BadRequest(
            "送信対象の顧客がいません".to_string(),
         ));
      }
      let recipients = customers
         .iter()
         .map(|c| CampaignRecipient::pending_for(campaign.id(), c, now))
         .collect::<Result<Vec<_>, _>>()?;

      let total = recipients.len() as i64;
      let stats = CampaignStats {
         total,
         pending: total,
         ..CampaignStats::default()
      };
      let campaign = campaign.queue(scheduled_at, session.user_id().clone(), stats, now)?;
      let run_after = campaign
         .schedule()
         .scheduled_at
         .filter(|at| *at > now)
         .unwrap_or(now);
      let job = EmailJob::new(
         organization_id.clone(),
         campaign.id().clone(),
         run_after,
         self.job_max_attempts,
         now,
      );
      self
         .deps
         .campaigns
         .queue_send(&campaign, &recipients, &job)
         .await
         .map_err(|e| state_changed(e, id))?;

      log_business_event!(
         event.category = event::category::CAMPAIGN,
         event.action = event::action::CAMPAIGN_QUEUED,
         event.entity_type = event::entity_type::CAMPAIGN,
         event.entity_id = %campaign.id(),
         event.organization_id = %organization_id,
         event.actor_id = %session.user_id(),
         event.recipients = total,
         event.status = %campaign.status(),
         event.result = event::result::SUCCESS,
         "キャンペーンを送信キューに登録しました"
      );
      Ok(campaign)
   }

   /// 下書き・予約中のキャンペーンをキャンセルする
   pub async fn cancel(
      &self,
      session: &SessionData,
      id: &CampaignId,
   ) -> Result<Campaign, ApiError> {
      let organization_id = session.organization_id();
      let current = self.get(organization_id, id).await?;
      let expected = current.status();
      let campaign = current.cancel(self.deps.clock.now())?;
      self
         .deps
         .campaigns
         .cancel_send(&campaign, expected)
         .await
         .map_err(|e| state_changed(e, id))?;

      log_business_event!(
         event.category = event::category::CAMPAIGN,
         event.action = event::action::CAMPAIGN_CANCELLED,
         event.entity_type = event::entity_type::CAMPAIGN,
         event.entity_id = %campaign.id(),
         event.organization_id = %organization_id,
         event.actor_id = %session.user_id(),
         event.result = event::result::SUCCESS,
         "キャンペーンをキャンセルしました"
      );
      Ok(campaign)
   }

   pub async fn report(
      &self,
      organization_id: &OrganizationId,
      id: &CampaignId,
   ) -> Result<CampaignReport, ApiError> {
      let campaign = self.get(organization_id, id).await?;
      let engagement = self.deps.campaigns.engagement(organization_id, id).await?;
      let stats = *campaign.stats();
      Ok(CampaignReport {
         stats,
         engagement,
         open_rate: engagement.open_rate(stats.sent),
         click_rate: engagement.click_rate(stats.sent),
      })
   }

   pub async fn recipients(
      &self,
      organization_id: &OrganizationId,
      id: &CampaignId,
      status: Option<RecipientStatus>,
      page: PageRequest,
   ) -> Result<(Vec<CampaignRecipient>, i64), ApiError> {
      self.get(organization_id, id).await?;
      Ok(self
         .deps
         .recipients
         .search(organization_id, id, status, page)
         .await?)
   }

   /// 指定アドレスに 1 通だけ送る
   ///
   /// 受信者・イベントは記録しない。差し込みにはログイン中のユーザー名を使う。
   pub async fn test_send(
      &self,
      session: &SessionData,
      id: &CampaignId,
      to: &str,
   ) -> Result<(), ApiError> {
      let organization_id = session.organization_id();
      let campaign = self.get(organization_id, id).await?;
      let to = Email::new(to)?;
      let now = self.deps.clock.now();
      let resolved = self
         .deps
         .senders
         .resolve(organization_id, session.user_id(), now)
         .await?;

      let recipient_id = CampaignRecipientId::new();
      let ctx = PersonalizationContext {
         name: session.name().to_string(),
         email: to.as_str().to_string(),
         unsubscribe_url: self.deps.messages.urls().unsubscribe_url(&recipient_id),
         ..PersonalizationContext::default()
      };
      let mut message = self
         .deps
         .messages
         .build(&campaign, &recipient_id, &ctx, &resolved.identity)?;
      message.subject = format!("{TEST_SUBJECT_PREFIX}{}", message.subject);
      resolved.sender.send_email(&message).await?;

      tracing::info!(
         campaign_id = %campaign.id(),
         organization_id = %organization_id,
         "テストメールを送信しました"
      );
      Ok(())
   }
}
