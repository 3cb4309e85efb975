//! # HTTP リクエストハンドラ
//!
//! axum のルートに対応するハンドラ関数を定義する。
//!
//! ## 設計方針
//!
//! - 各ハンドラはサブモジュールに配置
//! - 親モジュールで re-export し、フラットな API を提供
//! - ハンドラは薄く保ち、ビジネスロジックはユースケースに委譲
//! - エンティティは直接返さず、ハンドラごとの DTO に変換する
//!
//! ## ハンドラ一覧
//!
//! - `health`: ヘルスチェック
//! - `auth`: Google ログイン、ログアウト、組織の切り替え
//! - `organization`: 組織とメンバー
//! - `customer` / `lead` / `tag` / `segment`: CRM
//! - `campaign`: キャンペーンと配信結果
//! - `email_settings`: メール送信設定
//! - `tracking`: 開封・クリック・配信停止（セッション不要）
//! - `cron`: 送信ジョブの実行（cron シークレットで認証）

pub mod auth;
pub mod campaign;
pub mod cron;
pub mod customer;
pub mod email_settings;
pub mod health;
pub mod lead;
pub mod organization;
pub mod segment;
pub mod tag;
pub mod tracking;

use kokyaku_infra::repository::PageRequest;
use kokyaku_shared::PageQuery;

pub use auth::{AuthState, csrf, google_callback, google_login, logout, me, switch_organization};
pub use campaign::{
   CampaignState,
   campaign_report,
   cancel_campaign,
   create_campaign,
   delete_campaign,
   get_campaign,
   list_campaigns,
   list_recipients,
   preview_recipients,
   send_campaign,
   test_send_campaign,
   update_campaign,
};
pub use cron::{CronState, run_email_jobs};
pub use customer::{
   CustomerState,
   create_customer,
   delete_customer,
   get_customer,
   list_categories,
   list_cities,
   list_customers,
   replace_customer_tags,
   resubscribe_customer,
   update_customer,
};
pub use email_settings::{EmailSettingsState, get_email_settings, update_email_settings};
pub use health::{ReadinessState, health_check, readiness_check};
pub use lead::{
   LeadState,
   change_lead_status,
   convert_lead,
   create_lead,
   delete_lead,
   get_lead,
   list_leads,
   update_lead,
};
pub use organization::{
   OrganizationState,
   change_member_role,
   get_organization,
   invite_member,
   list_members,
   remove_member,
   rename_organization,
};
pub use segment::{
   SegmentState,
   create_segment,
   delete_segment,
   get_segment,
   list_segments,
   preview_segment,
   preview_segment_definition,
   update_segment,
};
pub use tag::{TagState, create_tag, delete_tag, list_tags, update_tag};
pub use tracking::{TrackingState, track_click, track_open, unsubscribe, unsubscribe_page};

/// ページ指定クエリをリポジトリ用の範囲に変換する
///
/// レスポンスに載せる丸め後の `(page, per_page)` も合わせて返す。
pub(crate) fn page_request(query: PageQuery) -> (PageRequest, u32, u32) {
   let (page, per_page) = query.normalized();
   (
      PageRequest::from_page(Some(i64::from(page)), Some(i64::from(per_page))),
      page,
      per_page,
   )
}
