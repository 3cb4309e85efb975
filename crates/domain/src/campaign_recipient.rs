//! # キャンペーン受信者
//!
//! 送信キュー登録時に確定した 1 件ごとの送信対象。送信結果、再試行回数、
//! 開封・クリック・配信停止の記録を持つ。
//!
//! メールアドレスと名前は登録時点のスナップショット。顧客が後から
//! 編集・削除されても送信結果の記録は残る。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{
   DomainError,
   campaign::CampaignId,
   customer::{Customer, CustomerId},
   organization::OrganizationId,
   value_objects::Email,
};

define_uuid_id! {
   /// キャンペーン受信者 ID
   ///
   /// トラッキング URL に埋め込まれる。
   pub struct CampaignRecipientId;
}

/// エラーメッセージの保存上限（文字数）
const MAX_ERROR_LENGTH: usize = 1000;

/// 受信者ごとの送信ステータス
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecipientStatus {
   Pending,
   Sent,
   Failed,
   Skipped,
}

impl RecipientStatus {
   pub fn as_str(self) -> &'static str {
      self.into()
   }
}

impl std::str::FromStr for RecipientStatus {
   type Err = DomainError;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      match s {
         "pending" => Ok(Self::Pending),
         "sent" => Ok(Self::Sent),
         "failed" => Ok(Self::Failed),
         "skipped" => Ok(Self::Skipped),
         _ => Err(DomainError::Validation(format!("不正な受信者ステータス: {s}"))),
      }
   }
}

/// 開封・クリック・配信停止の記録
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecipientEngagement {
   pub opened_at:       Option<DateTime<Utc>>,
   pub clicked_at:      Option<DateTime<Utc>>,
   pub open_count:      i32,
   pub click_count:     i32,
   pub unsubscribed_at: Option<DateTime<Utc>>,
}

/// 送信試行の記録
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryAttempts {
   pub attempts:   i32,
   pub last_error: Option<String>,
   pub sent_at:    Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CampaignRecipient {
   id:              CampaignRecipientId,
   organization_id: OrganizationId,
   campaign_id:     CampaignId,
   customer_id:     CustomerId,
   email:           Email,
   name:            String,
   status:          RecipientStatus,
   delivery:        DeliveryAttempts,
   engagement:      RecipientEngagement,
   created_at:      DateTime<Utc>,
   updated_at:      DateTime<Utc>,
}

impl CampaignRecipient {
   /// 顧客から送信待ちの受信者を作る
   ///
   /// メールアドレスを持たない顧客はバリデーションエラー。
   pub fn pending_for(
      campaign_id: &CampaignId,
      customer: &Customer,
      now: DateTime<Utc>,
   ) -> Result<Self, DomainError> {
      let email = customer.email().cloned().ok_or_else(|| {
         DomainError::Validation(format!(
            "メールアドレスのない顧客は送信対象にできません: {}",
            customer.id()
         ))
      })?;
      Ok(Self {
         id: CampaignRecipientId::new(),
         organization_id: customer.organization_id().clone(),
         campaign_id: campaign_id.clone(),
         customer_id: customer.id().clone(),
         email,
         name: customer.name().as_str().to_string(),
         status: RecipientStatus::Pending,
         delivery: DeliveryAttempts::default(),
         engagement: RecipientEngagement::default(),
         created_at: now,
         updated_at: now,
      })
   }

   #[allow(clippy::too_many_arguments)]
   pub fn from_db(
      id: CampaignRecipientId,
      organization_id: OrganizationId,
      campaign_id: CampaignId,
      customer_id: CustomerId,
      email: Email,
      name: String,
      status: RecipientStatus,
      delivery: DeliveryAttempts,
      engagement: RecipientEngagement,
      created_at: DateTime<Utc>,
      updated_at: DateTime<Utc>,
   ) -> Self {
      Self {
         id,
         organization_id,
         campaign_id,
         customer_id,
         email,
         name,
         status,
         delivery,
         engagement,
         created_at,
         updated_at,
      }
   }

   pub fn mark_sent(self, now: DateTime<Utc>) -> Self {
      Self {
         status: RecipientStatus::Sent,
         delivery: DeliveryAttempts {
            attempts: self.delivery.attempts + 1,
            last_error: None,
            sent_at: Some(now),
         },
         updated_at: now,
         ..self
      }
   }

   /// 送信失敗を記録する
   ///
   /// 試行回数が `max_attempts` に達したら `failed`、それ以外は次回の実行で
   /// 再送するため `pending` のまま残す。
   pub fn record_failure(self, error: &str, max_attempts: i32, now: DateTime<Utc>) -> Self {
      let attempts = self.delivery.attempts + 1;
      let status = if attempts >= max_attempts {
         RecipientStatus::Failed
      } else {
         RecipientStatus::Pending
      };
      Self {
         status,
         delivery: DeliveryAttempts {
            attempts,
            last_error: Some(error.chars().take(MAX_ERROR_LENGTH).collect()),
            sent_at: None,
         },
         updated_at: now,
         ..self
      }
   }

   pub fn mark_skipped(self, reason: &str, now: DateTime<Utc>) -> Self {
      Self {
         status: RecipientStatus::Skipped,
         delivery: DeliveryAttempts {
            last_error: Some(reason.to_string()),
            ..self.delivery
         },
         updated_at: now,
         ..self
      }
   }

   /// 開封を記録する（初回のみ `opened_at` を設定）
   pub fn record_open(self, now: DateTime<Utc>) -> Self {
      Self {
         engagement: RecipientEngagement {
            opened_at: self.engagement.opened_at.or(Some(now)),
            open_count: self.engagement.open_count + 1,
            ..self.engagement
         },
         updated_at: now,
         ..self
      }
   }

   /// クリックを記録する
   ///
   /// 画像を読み込まないクライアントもあるため、クリックは開封も意味する。
   pub fn record_click(self, now: DateTime<Utc>) -> Self {
      Self {
         engagement: RecipientEngagement {
            opened_at: self.engagement.opened_at.or(Some(now)),
            clicked_at: self.engagement.clicked_at.or(Some(now)),
            click_count: self.engagement.click_count + 1,
            ..self.engagement
         },
         updated_at: now,
         ..self
      }
   }

   pub fn record_unsubscribe(self, now: DateTime<Utc>) -> Self {
      Self {
         engagement: RecipientEngagement {
            unsubscribed_at: self.engagement.unsubscribed_at.or(Some(now)),
            ..self.engagement
         },
         updated_at: now,
         ..self
      }
   }

   pub fn id(&self) -> &CampaignRecipientId {
      &self.id
   }

   pub fn organization_id(&self) -> &OrganizationId {
      &self.organization_id
   }

   pub fn campaign_id(&self) -> &CampaignId {
      &self.campaign_id
   }

   pub fn customer_id(&self) -> &CustomerId {
      &self.customer_id
   }

   pub fn email(&self) -> &Email {
      &self.email
   }

   pub fn name(&self) -> &str {
      &self.name
   }

   pub fn status(&self) -> RecipientStatus {
      self.status
   }

   pub fn delivery(&self) -> &DeliveryAttempts {
      &self.delivery
   }

   pub fn engagement(&self) -> &RecipientEngagement {
      &self.engagement
   }

   pub fn created_at(&self) -> DateTime<Utc> {
      self.created_at
   }

   pub fn updated_at(&self) -> DateTime<Utc> {
      self.updated_at
   }
}
