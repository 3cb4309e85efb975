//! # メール送信設定ユースケース
//!
//! 組織の送信方式（Gmail API / SMTP）と差出人情報の取得・更新。
//! 未保存の組織には Gmail の既定設定を返す。

use std::sync::Arc;

use kokyaku_domain::{
   clock::Clock,
   email_settings::{EmailSettings, EmailSettingsInput},
   organization::OrganizationId,
};
use kokyaku_infra::repository::EmailSettingsRepository;

use crate::error::ApiError;

/// メール送信設定ユースケース
pub struct EmailSettingsUseCaseImpl {
   settings: Arc<dyn EmailSettingsRepository>,
   clock:    Arc<dyn Clock>,
}

impl EmailSettingsUseCaseImpl {
   pub fn new(settings: Arc<dyn EmailSettingsRepository>, clock: Arc<dyn Clock>) -> Self {
      Self { settings, clock }
   }

   pub async fn get(&self, organization_id: &OrganizationId) -> Result<EmailSettings, ApiError> {
      Ok(self
         .settings
         .find(organization_id)
         .await?
         .unwrap_or_else(|| EmailSettings::default_for(organization_id.clone(), self.clock.now())))
   }

   /// 設定を保存する
   ///
   /// パスワードが空なら保存済みの値を引き継ぐ。
   pub async fn update(
      &self,
      organization_id: &OrganizationId,
      input: EmailSettingsInput,
   ) -> Result<EmailSettings, ApiError> {
      let settings = self
         .get(organization_id)
         .await?
         .updated(input, self.clock.now())?;
      self.settings.upsert(&settings).await?;
      Ok(settings)
   }
}

#[cfg(test)]
mod tests {
   use chrono::Utc;
   use kokyaku_domain::{
      clock::FixedClock,
      email_settings::{EmailProvider, SmtpSecurity},
   };
   use kokyaku_infra::mock::MockEmailSettingsRepository;
   use pretty_assertions::assert_eq;

   use super::*;

   fn setup() -> (EmailSettingsUseCaseImpl, OrganizationId) {
      (
         EmailSettingsUseCaseImpl::new(
            Arc::new(MockEmailSettingsRepository::new()),
            Arc::new(FixedClock::new(Utc::now())),
         ),
         OrganizationId::new(),
      )
   }

   fn smtp_input(password: Option<&str>) -> EmailSettingsInput {
      EmailSettingsInput {
         provider: EmailProvider::Smtp,
         from_name: Some("山田商店".to_string()),
         from_address: Some("info@example.com".to_string()),
         reply_to: None,
         smtp_host: Some("smtp.example.com".to_string()),
         smtp_port: None,
         smtp_username: Some("info@example.com".to_string()),
         smtp_password: password.map(str::to_string),
         smtp_security: SmtpSecurity::Starttls,
      }
   }

   #[tokio::test]
   async fn test_未設定ならgmailの既定値を返す() {
      let (usecase, org) = setup();

      let settings = usecase.get(&org).await.unwrap();

      assert_eq!(settings.provider(), EmailProvider::Gmail);
      assert!(settings.smtp().is_none());
   }

   #[tokio::test]
   async fn test_パスワード省略時は保存済みの値を引き継ぐ() {
      let (usecase, org) = setup();
      usecase.update(&org, smtp_input(Some("secret"))).await.unwrap();

      let settings = usecase.update(&org, smtp_input(None)).await.unwrap();

      assert!(settings.has_smtp_password());
      let stored = usecase.get(&org).await.unwrap();
      assert_eq!(stored.smtp().unwrap().port, 587);
      assert!(stored.has_smtp_password());
   }

   #[tokio::test]
   async fn test_smtpでホスト未指定は400() {
      let (usecase, org) = setup();
      let input = EmailSettingsInput {
         smtp_host: None,
         ..smtp_input(Some("secret"))
      };

      let result = usecase.update(&org, input).await;

      assert!(matches!(result, Err(ApiError::BadRequest(_))));
   }
}
