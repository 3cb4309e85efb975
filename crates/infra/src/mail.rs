//! # メール送信
//!
//! キャンペーンメールの送信を担当するインフラストラクチャモジュール。
//!
//! ## 設計方針
//!
//! - **trait による抽象化**: `EmailSender` trait でメール送信を抽象化
//! - **3 つの実装**: SMTP（組織の SMTP サーバー）、Gmail API（送信者の Google アカウント）、
//!   Noop（メッセージを組み立ててログに残し、送信しない）
//! - **送信者は組織ごとに解決**: 送信設定と送信者のトークンから
//!   [`EmailSenderFactory`] がジョブ単位で送信者を組み立てる
//! - **メッセージ構築は共通**: RFC 5322 メッセージは lettre で組み立て、
//!   SMTP はそのまま、Gmail API は base64url で送る

mod factory;
mod gmail;
mod message;
mod noop;
mod smtp;

use async_trait::async_trait;
pub use factory::{EmailSenderFactory, LiveEmailSenderFactory, NoopEmailSenderFactory, SenderConfig};
pub use gmail::GmailEmailSender;
use kokyaku_domain::mail::{MailError, OutgoingEmail};
pub use message::build_message;
pub use noop::NoopEmailSender;
pub use smtp::SmtpEmailSender;

/// メール送信トレイト
///
/// 1 通ずつ送信する。宛先単位の失敗は [`MailError::SendFailed`]、
/// 設定不備や認証失敗など後続の宛先にも影響する失敗はそれ以外のバリアントで返す。
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// メールを送信する
    async fn send_email(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}
