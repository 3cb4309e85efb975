//! # 送信者の解決
//!
//! 組織の送信設定と送信者ユーザーから、送信に使う [`EmailSender`] と差出人情報を決める。
//!
//! - Gmail: 送信者ユーザーのリフレッシュトークンを使う。差出人アドレスの既定は送信者のアドレス
//! - SMTP: 組織の SMTP 設定を使う。差出人アドレスは設定必須

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kokyaku_domain::{
   email_settings::{EmailProvider, EmailSettings},
   mail::MailError,
   organization::OrganizationId,
   user::UserId,
};
use kokyaku_infra::{
   mail::{EmailSender, EmailSenderFactory, SenderConfig},
   repository::{EmailSettingsRepository, UserRepository},
};

use super::message_builder::SenderIdentity;
use crate::error::ApiError;

/// 解決済みの送信者
pub struct ResolvedSender {
   pub sender:   Arc<dyn EmailSender>,
   pub identity: SenderIdentity,
}

/// 送信者の解決
pub struct SenderResolver {
   settings: Arc<dyn EmailSettingsRepository>,
   users:    Arc<dyn UserRepository>,
   factory:  Arc<dyn EmailSenderFactory>,
}

impl SenderResolver {
   pub fn new(
      settings: Arc<dyn EmailSettingsRepository>,
      users: Arc<dyn UserRepository>,
      factory: Arc<dyn EmailSenderFactory>,
   ) -> Self {
      Self {
         settings,
         users,
         factory,
      }
   }

   /// `sender_user_id` の Google アカウント（Gmail の場合）で送る送信者を作る
   pub async fn resolve(
      &self,
      organization_id: &OrganizationId,
      sender_user_id: &UserId,
      now: DateTime<Utc>,
   ) -> Result<ResolvedSender, ApiError> {
      let settings = self
         .settings
         .find(organization_id)
         .await?
         .unwrap_or_else(|| EmailSettings::default_for(organization_id.clone(), now));

      let (config, user_address) = match settings.provider() {
         EmailProvider::Gmail => {
            let user = self.users.find_by_id(sender_user_id).await?.ok_or_else(|| {
               MailError::Misconfigured("送信者のユーザーが見つかりません".to_string())
            })?;
            let token = self.users.find_refresh_token(sender_user_id).await?;
            (
               SenderConfig::resolve(&settings, token),
               Some(user.email().as_str().to_string()),
            )
         }
         EmailProvider::Smtp => (SenderConfig::resolve(&settings, None), None),
      };

      let from_address = settings
         .from_address()
         .map(|e| e.as_str().to_string())
         .or(user_address)
         .ok_or_else(|| MailError::Misconfigured("差出人アドレスが設定されていません".to_string()))?;
      let identity = SenderIdentity {
         from_address,
         from_name: settings.from_name().map(str::to_string),
         reply_to: settings.reply_to().map(|e| e.as_str().to_string()),
      };

      let sender = self.factory.create(&config).await?;
      Ok(ResolvedSender { sender, identity })
   }
}

#[cfg(test)]
mod tests {
   use kokyaku_domain::{
      email_settings::{EmailSettingsInput, SmtpSecurity},
      user::{User, UserName},
      value_objects::Email,
   };
   use kokyaku_infra::mock::{
      MockEmailSenderFactory,
      MockEmailSettingsRepository,
      MockUserRepository,
      RecordingEmailSender,
   };
   use pretty_assertions::assert_eq;

   use super::*;

   struct Fixture {
      settings: MockEmailSettingsRepository,
      users:    MockUserRepository,
      factory:  MockEmailSenderFactory,
      resolver: SenderResolver,
      org:      OrganizationId,
   }

   fn setup() -> Fixture {
      let settings = MockEmailSettingsRepository::new();
      let users = MockUserRepository::new();
      let factory = MockEmailSenderFactory::new(RecordingEmailSender::new());
      Fixture {
         resolver: SenderResolver::new(
            Arc::new(settings.clone()),
            Arc::new(users.clone()),
            Arc::new(factory.clone()),
         ),
         settings,
         users,
         factory,
         org: OrganizationId::new(),
      }
   }

   fn add_user(fixture: &Fixture, token: Option<&str>) -> UserId {
      let user = User::new(
         UserId::new(),
         Email::new("taro@example.com").unwrap(),
         UserName::new("山田 太郎").unwrap(),
         "sub-taro".to_string(),
         None,
         Utc::now(),
      );
      let id = user.id().clone();
      fixture.users.add_user(user, token);
      id
   }

   #[tokio::test]
   async fn test_gmailは送信者のトークンとアドレスを使う() {
      let fixture = setup();
      let user_id = add_user(&fixture, Some("1//token"));

      let resolved = fixture
         .resolver
         .resolve(&fixture.org, &user_id, Utc::now())
         .await
         .unwrap();

      assert_eq!(resolved.identity.from_address, "taro@example.com");
      assert!(matches!(
         fixture.factory.configs().as_slice(),
         [SenderConfig::Gmail { refresh_token: Some(t) }] if t == "1//token"
      ));
   }

   #[tokio::test]
   async fn test_smtpは組織の差出人を使う() {
      let fixture = setup();
      let user_id = add_user(&fixture, None);
      let settings = EmailSettings::default_for(fixture.org.clone(), Utc::now())
         .updated(
            EmailSettingsInput {
               provider: EmailProvider::Smtp,
               from_name: Some("山田商店".to_string()),
               from_address: Some("news@shop.example.com".to_string()),
               reply_to: Some("support@shop.example.com".to_string()),
               smtp_host: Some("smtp.example.com".to_string()),
               smtp_port: Some(465),
               smtp_username: None,
               smtp_password: None,
               smtp_security: SmtpSecurity::Tls,
            },
            Utc::now(),
         )
         .unwrap();
      fixture.settings.upsert(&settings).await.unwrap();

      let resolved = fixture
         .resolver
         .resolve(&fixture.org, &user_id, Utc::now())
         .await
         .unwrap();

      assert_eq!(
         resolved.identity,
         SenderIdentity {
            from_address: "news@shop.example.com".to_string(),
            from_name:    Some("山田商店".to_string()),
            reply_to:     Some("support@shop.example.com".to_string()),
         }
      );
      assert!(matches!(
         fixture.factory.configs().as_slice(),
         [SenderConfig::Smtp(Some(s))] if s.port == 465
      ));
   }

   #[tokio::test]
   async fn test_ファクトリの失敗は送信設定の不備として返す() {
      let fixture = setup();
      let user_id = add_user(&fixture, None);
      fixture.factory.fail_with_misconfiguration("トークンがありません");

      let result = fixture.resolver.resolve(&fixture.org, &user_id, Utc::now()).await;

      assert!(matches!(result, Err(ApiError::BadRequest(_))));
   }
}
