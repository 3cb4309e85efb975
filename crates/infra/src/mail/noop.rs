//! 送信しない送信者
//!
//! 開発環境（`MAIL_BACKEND=noop`）で使う。メッセージは本番と同じく
//! [`build_message`] で組み立てるため、宛先や差出人の不正は本番と同じエラーになる。
//! 組み立てたメッセージは送らず、キャンペーン配信の確認に要る項目だけをログに残す。

use async_trait::async_trait;
use kokyaku_domain::mail::{MailError, OutgoingEmail};

use super::{EmailSender, SenderConfig, build_message};

/// 組み立てまで行い、送信は省略する送信者
#[derive(Debug, Clone)]
pub struct NoopEmailSender {
    /// 本番なら使われる送信方式（ログ用）
    transport: &'static str,
}

impl NoopEmailSender {
    pub fn for_config(config: &SenderConfig) -> Self {
        let transport = match config {
            SenderConfig::Gmail { .. } => "gmail",
            SenderConfig::Smtp(_) => "smtp",
        };
        Self { transport }
    }

    pub fn transport(&self) -> &'static str {
        self.transport
    }
}

#[async_trait]
impl EmailSender for NoopEmailSender {
    async fn send_email(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let message = build_message(email)?;
        tracing::info!(
            transport = self.transport,
            to = %email.to,
            from = %email.from_address,
            subject = %email.subject,
            list_unsubscribe = email.header("List-Unsubscribe").is_some(),
            bytes = message.formatted().len(),
            "キャンペーンメールの送信を省略しました"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            to: "taro@example.com".to_string(),
            from_address: "shop@example.com".to_string(),
            subject: "秋のお知らせ".to_string(),
            html_body: "<p>こんにちは</p>".to_string(),
            text_body: "こんにちは".to_string(),
            headers: vec![(
                "List-Unsubscribe".to_string(),
                "<https://crm.example.com/u/1?s=abc>".to_string(),
            )],
            ..OutgoingEmail::default()
        }
    }

    #[test]
    fn test_送信方式は接続情報から決まる() {
        let gmail = NoopEmailSender::for_config(&SenderConfig::Gmail {
            refresh_token: None,
        });
        let smtp = NoopEmailSender::for_config(&SenderConfig::Smtp(None));

        assert_eq!(gmail.transport(), "gmail");
        assert_eq!(smtp.transport(), "smtp");
    }

    #[tokio::test]
    async fn test_組み立てられるメールは成功として扱う() {
        let sender = NoopEmailSender::for_config(&SenderConfig::Smtp(None));

        assert!(sender.send_email(&email()).await.is_ok());
    }

    #[tokio::test]
    async fn test_宛先が不正なら本番と同じく宛先単位の失敗() {
        let sender = NoopEmailSender::for_config(&SenderConfig::Smtp(None));
        let result = sender
            .send_email(&OutgoingEmail {
                to: "not-an-address".to_string(),
                ..email()
            })
            .await;

        assert!(matches!(result, Err(MailError::SendFailed(_))));
    }

    #[tokio::test]
    async fn test_差出人が不正なら設定不備() {
        let sender = NoopEmailSender::for_config(&SenderConfig::Gmail {
            refresh_token: None,
        });
        let result = sender
            .send_email(&OutgoingEmail {
                from_address: String::new(),
                ..email()
            })
            .await;

        assert!(matches!(result, Err(MailError::Misconfigured(_))));
    }
}
