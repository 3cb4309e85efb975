//! # Kokyaku ドメイン層
//!
//! 顧客管理とメールキャンペーン配信のビジネスルールを定義する。
//!
//! ## 設計方針
//!
//! - **エンティティ**: 一意の識別子を持つオブジェクト（例: Customer, Campaign）
//! - **値オブジェクト**: 識別子を持たない不変オブジェクト（例: Email, RecipientFilter）
//! - **純粋な変換**: 差し込み、リンク書き換え、署名などの I/O を伴わない処理
//! - **ドメインエラー**: ビジネスルール違反を表現するエラー型
//!
//! ## 依存関係の方向
//!
//! ```text
//! server → infra → domain
//! ```
//!
//! ドメイン層はデータベースや外部サービスに依存しない。
//!
//! ## モジュール構成
//!
//! | 分類 | モジュール |
//! |------|-----------|
//! | テナント・利用者 | [`organization`], [`user`] |
//! | 顧客管理 | [`customer`], [`lead`], [`tag`], [`segment`] |
//! | キャンペーン | [`campaign`], [`campaign_recipient`], [`recipient_filter`], [`email_job`] |
//! | 配信 | [`email_settings`], [`mail`], [`message`], [`personalization`], [`tracking`] |
//! | 共通 | [`clock`], [`error`], [`value_objects`] |
//!
//! ## 使用例
//!
//! ```rust
//! use kokyaku_domain::{DomainError, organization::OrganizationId};
//!
//! let organization_id = OrganizationId::new();
//!
//! let error = DomainError::NotFound {
//!     entity_type: "Campaign",
//!     id:          "0190".to_string(),
//! };
//! # let _ = (organization_id, error);
//! ```

#[macro_use]
mod macros;

pub mod campaign;
pub mod campaign_recipient;
pub mod clock;
pub mod customer;
pub mod email_job;
pub mod email_settings;
pub mod error;
pub mod lead;
pub mod mail;
pub mod message;
pub mod organization;
pub mod personalization;
pub mod recipient_filter;
pub mod segment;
pub mod tag;
pub mod tracking;
pub mod user;
pub mod value_objects;

pub use error::DomainError;
