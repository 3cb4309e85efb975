//! # Kokyaku インフラ層
//!
//! 外部システムとの接続・通信を担当するインフラストラクチャ層。
//!
//! ## 設計方針
//!
//! ドメイン層の型を永続化・送信する具体的な実装を提供する。
//! 外部システムの詳細をカプセル化し、ユースケース層にはトレイトだけを見せる。
//!
//! ## 責務
//!
//! - **データベース接続**: PostgreSQL への接続プールとマイグレーション
//! - **セッション**: Redis によるセッション・CSRF トークン・OAuth state
//! - **リポジトリ実装**: 組織単位でスコープされた永続化
//! - **外部 API クライアント**: Google OAuth、Gmail API、SMTP
//!
//! ## 依存関係
//!
//! ```text
//! server → infra → domain
//! ```
//!
//! ## モジュール構成
//!
//! - [`db`] - PostgreSQL データベース接続管理
//! - [`error`] - インフラ層エラー定義
//! - [`google`] - Google OAuth クライアント
//! - [`mail`] - メール送信（SMTP / Gmail API / Noop）
//! - [`repository`] - リポジトリ実装
//! - [`session`] - Redis セッション管理

pub mod db;
pub mod error;
pub mod google;
pub mod mail;
#[cfg(feature = "test-utils")]
pub mod mock;
pub mod repository;
pub mod session;

pub use error::InfraError;
pub use google::{GoogleOAuthClient, GoogleOAuthClientImpl, GoogleOAuthError};
pub use session::{RedisSessionManager, SessionData, SessionManager};
