//! # ミドルウェア
//!
//! - [`authz`] - セッション認証と組織ロールによる認可
//! - [`csrf`] - 状態変更リクエストの CSRF トークン検証
//! - [`cron_auth`] - cron エンドポイントの Bearer 認証
//! - [`cache_control`] - `Cache-Control: no-store` の付与

pub mod authz;
pub mod cache_control;
pub mod cron_auth;
pub mod csrf;

pub use authz::{AuthzState, require_role};
pub use cache_control::no_cache;
pub use cron_auth::{CronAuthState, require_cron_secret};
pub use csrf::{CSRF_HEADER, CsrfState, csrf_middleware};
