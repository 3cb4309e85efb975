//! # ユースケース層
//!
//! 顧客管理とメール配信のビジネスロジックを実装する。
//!
//! ## 設計方針
//!
//! - **依存性注入**: リポジトリ・送信クライアント・時計を `Arc<dyn Trait>` で外部から注入
//! - **薄いハンドラ**: ハンドラは薄く保ち、ロジックはユースケースに集約
//! - **組織スコープ**: すべての操作はセッションのアクティブ組織に閉じる
//!
//! ## モジュール構成
//!
//! - `auth`: Google ログイン、セッション、組織の切り替え
//! - `organization` / `customer` / `lead` / `tag` / `segment`: CRM の基本操作
//! - `campaign`: キャンペーンの作成・送信予約・集計
//! - `delivery`: cron から呼ばれる送信ジョブの実行
//! - `tracking`: 開封・クリック・配信停止の記録
//! - `email_settings` / `sender` / `message_builder` / `template_renderer`: メールの組み立てと送信経路

pub mod auth;
pub mod campaign;
pub mod customer;
pub mod delivery;
pub mod email_settings;
pub mod lead;
pub mod message_builder;
pub mod organization;
pub mod segment;
pub mod sender;
pub mod tag;
pub mod template_renderer;
pub mod tracking;

pub use auth::{AuthUseCaseImpl, CurrentUser, LoginOutcome, is_safe_return_path};
pub use campaign::{CampaignDeps, CampaignReport, CampaignUseCaseImpl, TEST_SUBJECT_PREFIX};
pub use customer::CustomerUseCaseImpl;
pub use delivery::{DeliveryDeps, DeliveryUseCaseImpl, JobOutcome, JobSummary};
pub use email_settings::EmailSettingsUseCaseImpl;
pub use lead::{LeadConversion, LeadUseCaseImpl};
pub use message_builder::{MessageBuilder, SenderIdentity};
pub use organization::{MemberList, OrganizationUseCaseImpl};
pub use segment::{CustomerPreview, PREVIEW_SAMPLE_SIZE, SegmentUseCaseImpl};
pub use sender::{ResolvedSender, SenderResolver};
pub use tag::TagUseCaseImpl;
pub use template_renderer::TemplateRenderer;
pub use tracking::{HtmlPage, RequestMeta, TrackingUseCaseImpl};
