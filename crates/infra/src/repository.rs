//! # リポジトリ実装
//!
//! 永続化操作のトレイトと、その PostgreSQL 実装を提供する。
//!
//! ## 設計方針
//!
//! - **テナント分離**: トラッキング用の参照を除き、すべてのクエリで組織 ID を条件に含める
//! - **実行時クエリ**: `sqlx::query_as` と `FromRow` の行構造体で結果をマッピングし、
//!   `TryFrom` でドメインエンティティへの変換を一箇所に集約する
//! - **テスタビリティ**: トレイト経由でモック可能な設計（`mock` モジュール参照）

pub mod campaign_recipient_repository;
pub mod campaign_repository;
pub mod customer_repository;
pub mod email_event_repository;
pub mod email_job_repository;
pub mod email_settings_repository;
pub mod invitation_repository;
pub mod lead_repository;
pub mod organization_repository;
pub mod segment_repository;
pub mod tag_repository;
pub mod user_repository;

pub use campaign_recipient_repository::{
   CampaignRecipientRepository,
   PostgresCampaignRecipientRepository,
};
pub use campaign_repository::{CampaignRepository, PostgresCampaignRepository};
pub use customer_repository::{CustomerQuery, CustomerRepository, PostgresCustomerRepository};
pub use email_event_repository::{EmailEventRepository, PostgresEmailEventRepository};
pub use email_job_repository::{EmailJobRepository, PostgresEmailJobRepository};
pub use email_settings_repository::{EmailSettingsRepository, PostgresEmailSettingsRepository};
pub use invitation_repository::{InvitationRepository, PostgresInvitationRepository};
pub use lead_repository::{LeadQuery, LeadRepository, PostgresLeadRepository};
pub use organization_repository::{
   MemberSummary,
   OrganizationRepository,
   OrganizationSummary,
   PostgresOrganizationRepository,
};
pub use segment_repository::{PostgresSegmentRepository, SegmentRepository};
pub use tag_repository::{PostgresTagRepository, TagRepository, TagWithCount};
pub use user_repository::{PostgresUserRepository, UserRepository};

/// 一覧取得の既定件数
pub const DEFAULT_PER_PAGE: i64 = 20;

/// 一覧取得の上限件数
pub const MAX_PER_PAGE: i64 = 100;

/// ページング指定（LIMIT / OFFSET）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
   pub limit:  i64,
   pub offset: i64,
}

impl PageRequest {
   /// 1 始まりのページ番号と 1 ページあたりの件数から組み立てる
   ///
   /// 範囲外の値は丸める（ページは 1 以上、件数は 1〜[`MAX_PER_PAGE`]）。
   pub fn from_page(page: Option<i64>, per_page: Option<i64>) -> Self {
      let page = page.unwrap_or(1).max(1);
      let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
      Self {
         limit:  per_page,
         offset: (page - 1).saturating_mul(per_page),
      }
   }

   /// 1 始まりのページ番号
   pub fn page(&self) -> i64 {
      self.offset / self.limit.max(1) + 1
   }

   pub fn per_page(&self) -> i64 {
      self.limit
   }
}

impl Default for PageRequest {
   fn default() -> Self {
      Self::from_page(None, None)
   }
}

#[cfg(test)]
mod tests {
   use pretty_assertions::assert_eq;
   use rstest::rstest;

   use super::*;

   #[rstest]
   #[case(None, None, 20, 0)]
   #[case(Some(3), Some(10), 10, 20)]
   #[case(Some(0), Some(500), 100, 0)]
   #[case(Some(-2), Some(0), 1, 0)]
   fn test_ページ番号と件数からlimitとoffsetを求める(
      #[case] page: Option<i64>,
      #[case] per_page: Option<i64>,
      #[case] limit: i64,
      #[case] offset: i64,
   ) {
      assert_eq!(PageRequest::from_page(page, per_page), PageRequest { limit, offset });
   }

   #[test]
   fn test_ページ番号を復元できる() {
      let page = PageRequest::from_page(Some(4), Some(25));
      assert_eq!(page.page(), 4);
      assert_eq!(page.per_page(), 25);
   }
}
