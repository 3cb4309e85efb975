//! 送信者の組み立て
//!
//! 組織の送信設定と送信者ユーザーのトークンから、ジョブで使う [`EmailSender`] を作る。

use std::sync::Arc;

use async_trait::async_trait;
use kokyaku_domain::{
    email_settings::{EmailProvider, EmailSettings, SmtpSettings},
    mail::MailError,
};

use super::{EmailSender, GmailEmailSender, NoopEmailSender, SmtpEmailSender};
use crate::google::{GoogleOAuthClient, GoogleOAuthError};

/// 送信方式ごとの接続情報
#[derive(Debug, Clone)]
pub enum SenderConfig {
    /// 送信者の Google アカウントで Gmail API を使う
    Gmail { refresh_token: Option<String> },
    /// 組織の SMTP サーバーを使う（未設定なら `None`）
    Smtp(Option<SmtpSettings>),
}

impl SenderConfig {
    /// 送信設定と送信者のリフレッシュトークンから接続情報を決める
    pub fn resolve(settings: &EmailSettings, refresh_token: Option<String>) -> Self {
        match settings.provider() {
            EmailProvider::Gmail => Self::Gmail { refresh_token },
            EmailProvider::Smtp => Self::Smtp(settings.smtp().cloned()),
        }
    }
}

/// 送信者ファクトリトレイト
#[async_trait]
pub trait EmailSenderFactory: Send + Sync {
    /// 接続情報から送信者を作る
    ///
    /// 失敗は常にジョブ単位のエラー（[`MailError::Misconfigured`] または
    /// [`MailError::AuthFailed`]）で返す。
    async fn create(&self, config: &SenderConfig) -> Result<Arc<dyn EmailSender>, MailError>;
}

/// 本番用ファクトリ
pub struct LiveEmailSenderFactory {
    google: Arc<dyn GoogleOAuthClient>,
    http:   reqwest::Client,
}

impl LiveEmailSenderFactory {
    pub fn new(google: Arc<dyn GoogleOAuthClient>) -> Self {
        Self {
            google,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl EmailSenderFactory for LiveEmailSenderFactory {
    async fn create(&self, config: &SenderConfig) -> Result<Arc<dyn EmailSender>, MailError> {
        match config {
            SenderConfig::Gmail { refresh_token } => {
                let Some(refresh_token) = refresh_token else {
                    return Err(MailError::Misconfigured(
                        "送信者の Google アカウントが連携されていません".to_string(),
                    ));
                };
                let access_token = self
                    .google
                    .refresh_access_token(refresh_token)
                    .await
                    .map_err(|e| match e {
                        GoogleOAuthError::InvalidGrant(_) => MailError::AuthFailed(format!(
                            "Google アカウントの再連携が必要です: {e}"
                        )),
                        other => MailError::AuthFailed(other.to_string()),
                    })?;
                Ok(Arc::new(GmailEmailSender::new(self.http.clone(), access_token)))
            }
            SenderConfig::Smtp(Some(settings)) => Ok(Arc::new(SmtpEmailSender::new(settings)?)),
            SenderConfig::Smtp(None) => Err(MailError::Misconfigured(
                "SMTP サーバーが設定されていません".to_string(),
            )),
        }
    }
}

/// 開発環境用ファクトリ
///
/// トークンの更新や SMTP 接続をせず、[`NoopEmailSender`] を返す。
#[derive(Debug, Clone, Default)]
pub struct NoopEmailSenderFactory;

#[async_trait]
impl EmailSenderFactory for NoopEmailSenderFactory {
    async fn create(&self, config: &SenderConfig) -> Result<Arc<dyn EmailSender>, MailError> {
        Ok(Arc::new(NoopEmailSender::for_config(config)))
    }
}
