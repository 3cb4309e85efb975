//! SMTP メール送信実装
//!
//! lettre の `AsyncSmtpTransport` を使用して、組織が設定した SMTP サーバーから送信する。

use async_trait::async_trait;
use kokyaku_domain::{
    email_settings::{SmtpSecurity, SmtpSettings},
    mail::{MailError, OutgoingEmail},
};
use lettre::{
    AsyncSmtpTransport,
    AsyncTransport,
    Tokio1Executor,
    transport::smtp::authentication::Credentials,
};

use super::{EmailSender, message::build_message};

/// SMTP メール送信
///
/// `lettre::AsyncSmtpTransport<Tokio1Executor>` をラップする。
/// トランスポートは接続プールを持つため、ジョブ内の送信で使い回す。
pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpEmailSender {
    /// SMTP 設定から送信インスタンスを作成する
    ///
    /// - `tls`: 接続直後から TLS（通常 465 番）
    /// - `starttls`: 平文で接続して STARTTLS に昇格（通常 587 番）
    /// - `none`: TLS なし（ローカルの開発用 SMTP 向け）
    pub fn new(settings: &SmtpSettings) -> Result<Self, MailError> {
        let builder = match settings.security {
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| MailError::Misconfigured(format!("SMTP ホスト不正: {e}")))?,
            SmtpSecurity::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                    .map_err(|e| MailError::Misconfigured(format!("SMTP ホスト不正: {e}")))?
            }
            SmtpSecurity::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
            }
        };

        let builder = builder.port(settings.port);
        let builder = match (&settings.username, &settings.password) {
            (Some(username), Some(password)) => builder.credentials(Credentials::new(
                username.clone(),
                password.expose().to_string(),
            )),
            _ => builder,
        };

        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send_email(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let message = build_message(email)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::SendFailed(format!("SMTP 送信失敗: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use kokyaku_domain::email_settings::SmtpPassword;

    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SmtpEmailSender>();
    }

    #[tokio::test]
    async fn test_すべての暗号化方式でトランスポートを構築できる() {
        for security in [SmtpSecurity::Tls, SmtpSecurity::Starttls, SmtpSecurity::None] {
            let settings = SmtpSettings {
                host: "smtp.example.com".to_string(),
                port: security.default_port(),
                username: Some("user".to_string()),
                password: Some(SmtpPassword::new("secret")),
                security,
            };
            assert!(SmtpEmailSender::new(&settings).is_ok());
        }
    }
}
