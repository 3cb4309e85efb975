//! Gmail API メール送信実装
//!
//! 送信者の Google アカウントで Gmail API `users.messages.send` を呼び出す。
//! メッセージは lettre で RFC 5322 形式に組み立て、base64url で `raw` に詰める。

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use kokyaku_domain::mail::{MailError, OutgoingEmail};
use reqwest::StatusCode;
use serde::Serialize;

use super::{EmailSender, message::build_message};

/// Gmail API のベース URL
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com";

#[derive(Serialize)]
struct SendRequest<'a> {
    raw: &'a str,
}

/// Gmail API メール送信
///
/// アクセストークンはジョブ開始時にリフレッシュトークンから取得したもの。
/// 有効期限（1 時間）内にジョブが終わる前提で、送信中の再取得は行わない。
pub struct GmailEmailSender {
    client:       reqwest::Client,
    access_token: String,
    api_base:     String,
}

impl GmailEmailSender {
    pub fn new(client: reqwest::Client, access_token: String) -> Self {
        Self::with_api_base(client, access_token, GMAIL_API_BASE)
    }

    /// API のベース URL を指定して作成する
    pub fn with_api_base(
        client: reqwest::Client,
        access_token: String,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            client,
            access_token,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn send_url(&self) -> String {
        format!("{}/gmail/v1/users/me/messages/send", self.api_base)
    }
}

/// Gmail API のステータスコードを送信エラーに変換する
///
/// 401/403 はトークンやスコープの問題、429 は送信上限で、どちらも後続の宛先でも
/// 失敗するためジョブ単位の失敗とする。
fn classify_status(status: StatusCode, body: &str) -> MailError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            MailError::AuthFailed(format!("Gmail API 認証エラー ({status}): {body}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            MailError::RateLimited(format!("Gmail API 送信上限 ({status}): {body}"))
        }
        _ => MailError::SendFailed(format!("Gmail API エラー ({status}): {body}")),
    }
}

#[async_trait]
impl EmailSender for GmailEmailSender {
    async fn send_email(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let message = build_message(email)?;
        let raw = URL_SAFE_NO_PAD.encode(message.formatted());

        let response = self
            .client
            .post(self.send_url())
            .bearer_auth(&self.access_token)
            .json(&SendRequest { raw: &raw })
            .send()
            .await
            .map_err(|e| MailError::SendFailed(format!("Gmail API 通信失敗: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}
