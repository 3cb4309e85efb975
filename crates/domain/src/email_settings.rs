//! # メール送信設定
//!
//! 組織ごとの送信方式（Gmail API / SMTP）と差出人情報。
//!
//! SMTP パスワードは `Debug` 出力でマスクし、API レスポンスにも含めない。
//! 更新時にパスワードが未指定なら保存済みの値を引き継ぐ。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{
   DomainError,
   organization::OrganizationId,
   value_objects::{Email, normalize_optional, normalize_optional_email, normalize_optional_text},
};

/// 送信方式
#[derive(
   Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmailProvider {
   /// 送信者の Google アカウントで Gmail API から送る
   #[default]
   Gmail,
   /// 組織の SMTP サーバーから送る
   Smtp,
}

impl EmailProvider {
   pub fn as_str(self) -> &'static str {
      self.into()
   }
}

impl std::str::FromStr for EmailProvider {
   type Err = DomainError;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      match s {
         "gmail" => Ok(Self::Gmail),
         "smtp" => Ok(Self::Smtp),
         _ => Err(DomainError::Validation(format!("不正な送信方式: {s}"))),
      }
   }
}

/// SMTP 接続の暗号化方式
#[derive(
   Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SmtpSecurity {
   #[default]
   Starttls,
   Tls,
   None,
}

impl SmtpSecurity {
   pub fn as_str(self) -> &'static str {
      self.into()
   }

   pub fn default_port(self) -> u16 {
      match self {
         Self::Starttls => 587,
         Self::Tls => 465,
         Self::None => 25,
      }
   }
}

impl std::str::FromStr for SmtpSecurity {
   type Err = DomainError;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      match s {
         "starttls" => Ok(Self::Starttls),
         "tls" => Ok(Self::Tls),
         "none" => Ok(Self::None),
         _ => Err(DomainError::Validation(format!("不正な SMTP 暗号化方式: {s}"))),
      }
   }
}

/// SMTP パスワード
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpPassword(String);

impl SmtpPassword {
   pub fn new(value: impl Into<String>) -> Self {
      Self(value.into())
   }

   pub fn expose(&self) -> &str {
      &self.0
   }
}

impl std::fmt::Debug for SmtpPassword {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.write_str("SmtpPassword([REDACTED])")
   }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
   pub host:     String,
   pub port:     u16,
   pub username: Option<String>,
   pub password: Option<SmtpPassword>,
   pub security: SmtpSecurity,
}

/// 設定更新の入力（未検証）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmailSettingsInput {
   pub provider:      EmailProvider,
   pub from_name:     Option<String>,
   pub from_address:  Option<String>,
   pub reply_to:      Option<String>,
   pub smtp_host:     Option<String>,
   pub smtp_port:     Option<u16>,
   pub smtp_username: Option<String>,
   pub smtp_password: Option<String>,
   #[serde(default)]
   pub smtp_security: SmtpSecurity,
}

#[derive(Debug, Clone)]
pub struct EmailSettings {
   organization_id: OrganizationId,
   provider:        EmailProvider,
   from_name:       Option<String>,
   from_address:    Option<Email>,
   reply_to:        Option<Email>,
   smtp:            Option<SmtpSettings>,
   updated_at:      DateTime<Utc>,
}

impl EmailSettings {
   /// 未設定の組織に適用する既定値（Gmail、差出人は送信者のアカウント）
   pub fn default_for(organization_id: OrganizationId, now: DateTime<Utc>) -> Self {
      Self {
         organization_id,
         provider: EmailProvider::Gmail,
         from_name: None,
         from_address: None,
         reply_to: None,
         smtp: None,
         updated_at: now,
      }
   }

   pub fn from_db(
      organization_id: OrganizationId,
      provider: EmailProvider,
      from_name: Option<String>,
      from_address: Option<Email>,
      reply_to: Option<Email>,
      smtp: Option<SmtpSettings>,
      updated_at: DateTime<Utc>,
   ) -> Self {
      Self {
         organization_id,
         provider,
         from_name,
         from_address,
         reply_to,
         smtp,
         updated_at,
      }
   }

   /// 入力を検証して新しい設定を作る
   ///
   /// SMTP の場合はホストと差出人アドレスが必須。パスワードが空なら
   /// `self` に保存済みの値を引き継ぐ。
   pub fn updated(self, input: EmailSettingsInput, now: DateTime<Utc>) -> Result<Self, DomainError> {
      let from_name = normalize_optional_text(input.from_name, "差出人名", 100)?;
      let from_address = normalize_optional_email(input.from_address)?;
      let reply_to = normalize_optional_email(input.reply_to)?;

      let stored_password = self.smtp.and_then(|s| s.password);
      let smtp = match normalize_optional(input.smtp_host) {
         Some(host) => {
            let password = normalize_optional(input.smtp_password)
               .map(SmtpPassword::new)
               .or(stored_password);
            Some(SmtpSettings {
               port: input
                  .smtp_port
                  .filter(|p| *p != 0)
                  .unwrap_or_else(|| input.smtp_security.default_port()),
               host,
               username: normalize_optional(input.smtp_username),
               password,
               security: input.smtp_security,
            })
         }
         None => None,
      };

      if input.provider == EmailProvider::Smtp {
         if smtp.is_none() {
            return Err(DomainError::Validation(
               "SMTP で送信する場合はホストを指定してください".to_string(),
            ));
         }
         if from_address.is_none() {
            return Err(DomainError::Validation(
               "SMTP で送信する場合は差出人アドレスを指定してください".to_string(),
            ));
         }
      }

      Ok(Self {
         organization_id: self.organization_id,
         provider: input.provider,
         from_name,
         from_address,
         reply_to,
         smtp,
         updated_at: now,
      })
   }

   pub fn organization_id(&self) -> &OrganizationId {
      &self.organization_id
   }

   pub fn provider(&self) -> EmailProvider {
      self.provider
   }

   pub fn from_name(&self) -> Option<&str> {
      self.from_name.as_deref()
   }

   pub fn from_address(&self) -> Option<&Email> {
      self.from_address.as_ref()
   }

   pub fn reply_to(&self) -> Option<&Email> {
      self.reply_to.as_ref()
   }

   pub fn smtp(&self) -> Option<&SmtpSettings> {
      self.smtp.as_ref()
   }

   pub fn has_smtp_password(&self) -> bool {
      self.smtp.as_ref().is_some_and(|s| s.password.is_some())
   }

   pub fn updated_at(&self) -> DateTime<Utc> {
      self.updated_at
   }
}
