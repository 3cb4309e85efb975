//! # ビジネスイベントログとエラーコンテキストの構造化ヘルパー
//!
//! `jq` で効率的に調査できるよう、ログフィールドの命名規約と
//! ヘルパーマクロを提供する。
//!
//! ## ビジネスイベント
//!
//! [`log_business_event!`] マクロで出力する。`event.kind = "business_event"` マーカーが
//! 自動付与され、`jq 'select(.["event.kind"] == "business_event")'` でフィルタできる。
//!
//! ## フィールド命名規約
//!
//! ドット記法（`event.category`、`error.kind`）を使用する。JSON 出力ではフラットなキーになる。

/// ビジネスイベントを構造化ログとして出力する。
///
/// `event.kind = "business_event"` マーカーを自動付与し、
/// `tracing::info!` レベルで出力する。
///
/// ## 必須フィールド（慣例）
///
/// - `event.category`: イベントカテゴリ（[`event::category`] の定数を使用）
/// - `event.action`: アクション名（[`event::action`] の定数を使用）
/// - `event.organization_id`: 組織 ID
/// - `event.result`: 結果（[`event::result`] の定数を使用）
///
/// ## 推奨フィールド
///
/// - `event.entity_type`: エンティティ種別（[`event::entity_type`] の定数を使用）
/// - `event.entity_id`: エンティティ ID
/// - `event.actor_id`: 操作者 ID
#[macro_export]
macro_rules! log_business_event {
    ($($args:tt)*) => {
        ::tracing::info!(
            event.kind = "business_event",
            $($args)*
        )
    };
}

/// イベントフィールドの定数
pub mod event {
    /// イベントカテゴリ
    pub mod category {
        pub const AUTH: &str = "auth";
        pub const ORGANIZATION: &str = "organization";
        pub const CUSTOMER: &str = "customer";
        pub const LEAD: &str = "lead";
        pub const CAMPAIGN: &str = "campaign";
        pub const DELIVERY: &str = "delivery";
        pub const TRACKING: &str = "tracking";
    }

    /// イベントアクション
    pub mod action {
        // 認証
        pub const LOGIN_SUCCESS: &str = "auth.login_success";
        pub const LOGIN_FAILURE: &str = "auth.login_failure";
        pub const LOGOUT: &str = "auth.logout";
        pub const ORGANIZATION_BOOTSTRAPPED: &str = "auth.organization_bootstrapped";
        pub const INVITATION_ACCEPTED: &str = "auth.invitation_accepted";

        // 組織
        pub const MEMBER_INVITED: &str = "organization.member_invited";
        pub const MEMBER_ROLE_CHANGED: &str = "organization.member_role_changed";
        pub const MEMBER_REMOVED: &str = "organization.member_removed";

        // 顧客・リード
        pub const CUSTOMER_CREATED: &str = "customer.created";
        pub const CUSTOMER_DELETED: &str = "customer.deleted";
        pub const LEAD_CONVERTED: &str = "lead.converted";

        // キャンペーン
        pub const CAMPAIGN_QUEUED: &str = "campaign.queued";
        pub const CAMPAIGN_CANCELLED: &str = "campaign.cancelled";
        pub const CAMPAIGN_COMPLETED: &str = "campaign.completed";
        pub const CAMPAIGN_FAILED: &str = "campaign.failed";

        // 配信
        pub const JOB_CLAIMED: &str = "delivery.job_claimed";
        pub const JOB_RESCHEDULED: &str = "delivery.job_rescheduled";
        pub const BATCH_SENT: &str = "delivery.batch_sent";
        pub const JOB_INTERRUPTED: &str = "delivery.job_interrupted";

        // トラッキング
        pub const EMAIL_OPENED: &str = "tracking.opened";
        pub const LINK_CLICKED: &str = "tracking.clicked";
        pub const UNSUBSCRIBED: &str = "tracking.unsubscribed";
        pub const SIGNATURE_REJECTED: &str = "tracking.signature_rejected";
    }

    /// エンティティ種別
    pub mod entity_type {
        pub const USER: &str = "user";
        pub const SESSION: &str = "session";
        pub const MEMBERSHIP: &str = "membership";
        pub const CUSTOMER: &str = "customer";
        pub const LEAD: &str = "lead";
        pub const CAMPAIGN: &str = "campaign";
        pub const EMAIL_JOB: &str = "email_job";
        pub const CAMPAIGN_RECIPIENT: &str = "campaign_recipient";
    }

    /// イベント結果
    pub mod result {
        pub const SUCCESS: &str = "success";
        pub const FAILURE: &str = "failure";
    }
}

/// エラーコンテキストフィールドの定数
pub mod error {
    /// エラーカテゴリ
    pub mod category {
        /// インフラストラクチャ（DB、Redis）
        pub const INFRASTRUCTURE: &str = "infrastructure";
        /// 外部サービス呼び出し（Gmail API、Google OAuth、SMTP）
        pub const EXTERNAL_SERVICE: &str = "external_service";
    }

    /// エラー種別
    pub mod kind {
        pub const DATABASE: &str = "database";
        pub const SESSION: &str = "session";
        pub const INTERNAL: &str = "internal";
        pub const CSRF_TOKEN: &str = "csrf_token";
        pub const OAUTH: &str = "oauth";
        pub const MAIL_TRANSPORT: &str = "mail_transport";
    }
}
