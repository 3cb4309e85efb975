//! # キャンペーン
//!
//! 件名・本文・受信者フィルタを持つメール一斉配信の定義。
//!
//! ## ステータス遷移
//!
//! ```text
//! draft ──(送信予約)──→ scheduled ──(ワーカー開始)──→ sending ──→ sent
//!   │       └─(即時送信)──────────────────────────→ sending ──→ failed
//!   └──────────┴──(キャンセル)──→ cancelled
//! ```
//!
//! - 編集できるのは `draft` のみ
//! - 削除できるのは `draft` と `cancelled`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{
   DomainError,
   organization::OrganizationId,
   recipient_filter::RecipientFilter,
   user::UserId,
};

define_uuid_id! {
   /// キャンペーン ID
   pub struct CampaignId;
}

define_validated_string! {
   /// キャンペーン名（管理用）
   pub struct CampaignName {
      label: "キャンペーン名",
      max_length: 200,
   }
}

define_validated_string! {
   /// メール件名
   pub struct CampaignSubject {
      label: "件名",
      max_length: 255,
   }
}

/// 本文 HTML の最大長（文字数）
pub const MAX_CONTENT_LENGTH: usize = 500_000;

/// キャンペーンのステータス
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CampaignStatus {
   Draft,
   Scheduled,
   Sending,
   Sent,
   Failed,
   Cancelled,
}

impl CampaignStatus {
   pub fn as_str(self) -> &'static str {
      self.into()
   }

   pub fn is_editable(self) -> bool {
      self == Self::Draft
   }

   pub fn is_deletable(self) -> bool {
      matches!(self, Self::Draft | Self::Cancelled)
   }

   pub fn is_cancellable(self) -> bool {
      matches!(self, Self::Draft | Self::Scheduled)
   }

   pub fn is_terminal(self) -> bool {
      matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
   }
}

impl std::str::FromStr for CampaignStatus {
   type Err = DomainError;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      match s {
         "draft" => Ok(Self::Draft),
         "scheduled" => Ok(Self::Scheduled),
         "sending" => Ok(Self::Sending),
         "sent" => Ok(Self::Sent),
         "failed" => Ok(Self::Failed),
         "cancelled" => Ok(Self::Cancelled),
         _ => Err(DomainError::Validation(format!(
            "不正なキャンペーンステータス: {s}"
         ))),
      }
   }
}

/// キャンペーンの入力項目（未検証）
#[derive(Debug, Clone, Default)]
pub struct CampaignInput {
   pub name:             String,
   pub subject:          String,
   pub content_html:     String,
   pub recipient_filter: RecipientFilter,
}

/// 検証済みのキャンペーン内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignContent {
   pub name:             CampaignName,
   pub subject:          CampaignSubject,
   pub content_html:     String,
   pub recipient_filter: RecipientFilter,
}

impl TryFrom<CampaignInput> for CampaignContent {
   type Error = DomainError;

   fn try_from(input: CampaignInput) -> Result<Self, Self::Error> {
      let content_html = input.content_html.trim().to_string();
      if content_html.is_empty() {
         return Err(DomainError::Validation("本文は必須です".to_string()));
      }
      if content_html.chars().count() > MAX_CONTENT_LENGTH {
         return Err(DomainError::Validation(format!(
            "本文は {MAX_CONTENT_LENGTH} 文字以内である必要があります"
         )));
      }
      Ok(Self {
         name: CampaignName::new(input.name)?,
         subject: CampaignSubject::new(input.subject)?,
         content_html,
         recipient_filter: input.recipient_filter.normalized(),
      })
   }
}

/// 配信の予定・実績時刻
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CampaignSchedule {
   pub scheduled_at: Option<DateTime<Utc>>,
   pub started_at:   Option<DateTime<Utc>>,
   pub completed_at: Option<DateTime<Utc>>,
}

/// 受信者ステータスの集計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
   pub total:   i64,
   pub pending: i64,
   pub sent:    i64,
   pub failed:  i64,
   pub skipped: i64,
}

impl CampaignStats {
   pub fn has_pending(&self) -> bool {
      self.pending > 0
   }
}

/// 開封・クリック・配信停止の集計
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementStats {
   pub opened:       i64,
   pub clicked:      i64,
   pub unsubscribed: i64,
}

impl EngagementStats {
   /// 送信済み件数に対する開封率（0.0〜1.0）
   pub fn open_rate(&self, sent: i64) -> f64 {
      ratio(self.opened, sent)
   }

   /// 送信済み件数に対するクリック率（0.0〜1.0）
   pub fn click_rate(&self, sent: i64) -> f64 {
      ratio(self.clicked, sent)
   }
}

fn ratio(numerator: i64, denominator: i64) -> f64 {
   if denominator <= 0 {
      return 0.0;
   }
   numerator as f64 / denominator as f64
}

/// キャンペーンエンティティ
#[derive(Debug, Clone)]
pub struct Campaign {
   id:              CampaignId,
   organization_id: OrganizationId,
   content:         CampaignContent,
   status:          CampaignStatus,
   schedule:        CampaignSchedule,
   created_by:      UserId,
   sender_user_id:  Option<UserId>,
   stats:           CampaignStats,
   created_at:      DateTime<Utc>,
   updated_at:      DateTime<Utc>,
}

impl Campaign {
   pub fn new(
      id: CampaignId,
      organization_id: OrganizationId,
      content: CampaignContent,
      created_by: UserId,
      now: DateTime<Utc>,
   ) -> Self {
      Self {
         id,
         organization_id,
         content,
         status: CampaignStatus::Draft,
         schedule: CampaignSchedule::default(),
         created_by,
         sender_user_id: None,
         stats: CampaignStats::default(),
         created_at: now,
         updated_at: now,
      }
   }

   #[allow(clippy::too_many_arguments)]
   pub fn from_db(
      id: CampaignId,
      organization_id: OrganizationId,
      content: CampaignContent,
      status: CampaignStatus,
      schedule: CampaignSchedule,
      created_by: UserId,
      sender_user_id: Option<UserId>,
      stats: CampaignStats,
      created_at: DateTime<Utc>,
      updated_at: DateTime<Utc>,
   ) -> Self {
      Self {
         id,
         organization_id,
         content,
         status,
         schedule,
         created_by,
         sender_user_id,
         stats,
         created_at,
         updated_at,
      }
   }

   fn invalid_transition(&self, action: &str) -> DomainError {
      DomainError::Conflict(format!(
         "ステータスが {} のキャンペーンは{action}できません",
         self.status
      ))
   }

   /// 内容を更新する（draft のみ）
   pub fn with_content(self, content: CampaignContent, now: DateTime<Utc>) -> Result<Self, DomainError> {
      if !self.status.is_editable() {
         return Err(self.invalid_transition("編集"));
      }
      Ok(Self {
         content,
         updated_at: now,
         ..self
      })
   }

   pub fn ensure_deletable(&self) -> Result<(), DomainError> {
      if self.status.is_deletable() {
         Ok(())
      } else {
         Err(self.invalid_transition("削除"))
      }
   }

   /// 送信キューに登録する
   ///
   /// `scheduled_at` が未来なら `scheduled`、それ以外は即時送信として `sending`。
   /// 送信者はメール送信に使う Google アカウントの持ち主。
   pub fn queue(
      self,
      scheduled_at: Option<DateTime<Utc>>,
      sender_user_id: UserId,
      stats: CampaignStats,
      now: DateTime<Utc>,
   ) -> Result<Self, DomainError> {
      if self.status != CampaignStatus::Draft {
         return Err(self.invalid_transition("送信"));
      }
      let (status, schedule) = match scheduled_at {
         Some(at) if at > now => (
            CampaignStatus::Scheduled,
            CampaignSchedule {
               scheduled_at: Some(at),
               ..CampaignSchedule::default()
            },
         ),
         _ => (
            CampaignStatus::Sending,
            CampaignSchedule {
               scheduled_at: Some(now),
               started_at: Some(now),
               completed_at: None,
            },
         ),
      };
      Ok(Self {
         status,
         schedule,
         sender_user_id: Some(sender_user_id),
         stats,
         updated_at: now,
         ..self
      })
   }

   /// 配信ワーカーが送信を開始する
   pub fn start_sending(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
      match self.status {
         CampaignStatus::Sending => Ok(self),
         CampaignStatus::Scheduled => Ok(Self {
            status: CampaignStatus::Sending,
            schedule: CampaignSchedule {
               started_at: Some(now),
               ..self.schedule
            },
            updated_at: now,
            ..self
         }),
         _ => Err(self.invalid_transition("送信開始")),
      }
   }

   /// 配信を完了する
   ///
   /// 1 件も届かなかった場合は `failed` になる。
   pub fn complete(self, stats: CampaignStats, now: DateTime<Utc>) -> Result<Self, DomainError> {
      if self.status != CampaignStatus::Sending {
         return Err(self.invalid_transition("完了"));
      }
      let status = if stats.sent > 0 {
         CampaignStatus::Sent
      } else {
         CampaignStatus::Failed
      };
      Ok(Self {
         status,
         schedule: CampaignSchedule {
            completed_at: Some(now),
            ..self.schedule
         },
         stats,
         updated_at: now,
         ..self
      })
   }

   /// ジョブの再試行上限に達したなどの理由で失敗として終了する
   pub fn fail(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
      if !matches!(self.status, CampaignStatus::Scheduled | CampaignStatus::Sending) {
         return Err(self.invalid_transition("失敗として終了"));
      }
      Ok(Self {
         status: CampaignStatus::Failed,
         schedule: CampaignSchedule {
            completed_at: Some(now),
            ..self.schedule
         },
         updated_at: now,
         ..self
      })
   }

   pub fn cancel(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
      if !self.status.is_cancellable() {
         return Err(self.invalid_transition("キャンセル"));
      }
      Ok(Self {
         status: CampaignStatus::Cancelled,
         updated_at: now,
         ..self
      })
   }

   pub fn with_stats(self, stats: CampaignStats, now: DateTime<Utc>) -> Self {
      Self {
         stats,
         updated_at: now,
         ..self
      }
   }

   pub fn id(&self) -> &CampaignId {
      &self.id
   }

   pub fn organization_id(&self) -> &OrganizationId {
      &self.organization_id
   }

   pub fn content(&self) -> &CampaignContent {
      &self.content
   }

   pub fn name(&self) -> &CampaignName {
      &self.content.name
   }

   pub fn subject(&self) -> &CampaignSubject {
      &self.content.subject
   }

   pub fn content_html(&self) -> &str {
      &self.content.content_html
   }

   pub fn recipient_filter(&self) -> &RecipientFilter {
      &self.content.recipient_filter
   }

   pub fn status(&self) -> CampaignStatus {
      self.status
   }

   pub fn schedule(&self) -> &CampaignSchedule {
      &self.schedule
   }

   pub fn created_by(&self) -> &UserId {
      &self.created_by
   }

   pub fn sender_user_id(&self) -> Option<&UserId> {
      self.sender_user_id.as_ref()
   }

   pub fn stats(&self) -> &CampaignStats {
      &self.stats
   }

   pub fn created_at(&self) -> DateTime<Utc> {
      self.created_at
   }

   pub fn updated_at(&self) -> DateTime<Utc> {
      self.updated_at
   }
}

#[cfg(test)]
mod tests {
   use chrono::Duration;
   use pretty_assertions::assert_eq;
   use rstest::{fixture, rstest};

   use super::*;

   #[fixture]
   fn now() -> DateTime<Utc> {
      Utc::now()
   }

   #[fixture]
   fn draft(now: DateTime<Utc>) -> Campaign {
      let content = CampaignContent::try_from(CampaignInput {
         name:             "春のセール".to_string(),
         subject:          "{{name}} 様へ 春のご案内".to_string(),
         content_html:     "<p>こんにちは {{name}} 様</p>".to_string(),
         recipient_filter: RecipientFilter::default(),
      })
      .unwrap();
      Campaign::new(CampaignId::new(), OrganizationId::new(), content, UserId::new(), now)
   }

   fn stats(sent: i64, failed: i64) -> CampaignStats {
      CampaignStats {
         total: sent + failed,
         pending: 0,
         sent,
         failed,
         skipped: 0,
      }
   }

   #[rstest]
   fn test_即時送信はsendingになる(draft: Campaign, now: DateTime<Utc>) {
      let sender = UserId::new();
      let queued = draft.queue(None, sender.clone(), stats(0, 0), now).unwrap();

      assert_eq!(queued.status(), CampaignStatus::Sending);
      assert_eq!(queued.schedule().started_at, Some(now));
      assert_eq!(queued.sender_user_id(), Some(&sender));
   }

   #[rstest]
   fn test_未来の日時を指定するとscheduledになる(draft: Campaign, now: DateTime<Utc>) {
      let at = now + Duration::hours(3);
      let queued = draft.queue(Some(at), UserId::new(), stats(0, 0), now).unwrap();

      assert_eq!(queued.status(), CampaignStatus::Scheduled);
      assert_eq!(queued.schedule().scheduled_at, Some(at));
      assert_eq!(queued.schedule().started_at, None);
   }

   #[rstest]
   fn test_過去の日時は即時送信として扱う(draft: Campaign, now: DateTime<Utc>) {
      let queued = draft
         .queue(Some(now - Duration::minutes(1)), UserId::new(), stats(0, 0), now)
         .unwrap();
      assert_eq!(queued.status(), CampaignStatus::Sending);
   }

   #[rstest]
   fn test_送信済みのキャンペーンは編集できない(draft: Campaign, now: DateTime<Utc>) {
      let sending = draft.queue(None, UserId::new(), stats(0, 0), now).unwrap();
      let content = sending.content().clone();

      let result = sending.with_content(content, now);

      assert!(matches!(result, Err(DomainError::Conflict(_))));
   }

   #[rstest]
   #[case(stats(3, 1), CampaignStatus::Sent)]
   #[case(stats(0, 4), CampaignStatus::Failed)]
   fn test_完了時は送信成功件数で結果が決まる(
      draft: Campaign,
      now: DateTime<Utc>,
      #[case] final_stats: CampaignStats,
      #[case] expected: CampaignStatus,
   ) {
      let done = draft
         .queue(None, UserId::new(), stats(0, 0), now)
         .unwrap()
         .complete(final_stats, now)
         .unwrap();

      assert_eq!(done.status(), expected);
      assert_eq!(done.schedule().completed_at, Some(now));
   }

   #[rstest]
   fn test_予約済みはキャンセルできるが送信中はできない(draft: Campaign, now: DateTime<Utc>) {
      let scheduled = draft
         .queue(Some(now + Duration::days(1)), UserId::new(), stats(0, 0), now)
         .unwrap();
      assert_eq!(
         scheduled.clone().cancel(now).unwrap().status(),
         CampaignStatus::Cancelled
      );

      let sending = scheduled.start_sending(now).unwrap();
      assert!(sending.cancel(now).is_err());
   }

   #[rstest]
   #[case(CampaignStatus::Draft, true)]
   #[case(CampaignStatus::Cancelled, true)]
   #[case(CampaignStatus::Scheduled, false)]
   #[case(CampaignStatus::Sent, false)]
   fn test_削除できるステータス(#[case] status: CampaignStatus, #[case] expected: bool) {
      assert_eq!(status.is_deletable(), expected);
   }

   #[test]
   fn test_本文が空なら拒否する() {
      let result = CampaignContent::try_from(CampaignInput {
         name: "x".to_string(),
         subject: "y".to_string(),
         content_html: "   ".to_string(),
         ..CampaignInput::default()
      });
      assert!(matches!(result, Err(DomainError::Validation(_))));
   }

   #[test]
   fn test_送信済みがゼロなら開封率はゼロ() {
      let engagement = EngagementStats {
         opened: 3,
         clicked: 1,
         unsubscribed: 0,
      };
      assert_eq!(engagement.open_rate(0), 0.0);
      assert_eq!(engagement.click_rate(4), 0.25);
   }
}
