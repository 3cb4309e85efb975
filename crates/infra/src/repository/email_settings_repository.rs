//! # EmailSettingsRepository
//!
//! 組織ごとのメール送信設定の永続化を担当するリポジトリ。
//!
//! 1 組織 1 行（主キーは `organization_id`）。行がない組織は
//! [`EmailSettings::default_for`] の既定値（Gmail）で扱う。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kokyaku_domain::{
   email_settings::{EmailProvider, EmailSettings, SmtpPassword, SmtpSecurity, SmtpSettings},
   organization::OrganizationId,
   value_objects::Email,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// 送信設定リポジトリトレイト
#[async_trait]
pub trait EmailSettingsRepository: Send + Sync {
   async fn find(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Option<EmailSettings>, InfraError>;

   /// 設定を保存する（なければ作成、あれば置き換え）
   async fn upsert(&self, settings: &EmailSettings) -> Result<(), InfraError>;
}

#[derive(sqlx::FromRow)]
struct EmailSettingsRow {
   organization_id: Uuid,
   provider:        String,
   from_name:       Option<String>,
   from_address:    Option<String>,
   reply_to:        Option<String>,
   smtp_host:       Option<String>,
   smtp_port:       Option<i32>,
   smtp_username:   Option<String>,
   smtp_password:   Option<String>,
   smtp_security:   String,
   updated_at:      DateTime<Utc>,
}

impl TryFrom<EmailSettingsRow> for EmailSettings {
   type Error = InfraError;

   fn try_from(row: EmailSettingsRow) -> Result<Self, Self::Error> {
      let to_infra = |e: kokyaku_domain::DomainError| InfraError::unexpected(e.to_string());
      let security = row.smtp_security.parse::<SmtpSecurity>().map_err(to_infra)?;
      let smtp = match row.smtp_host {
         Some(host) => {
            let port = match row.smtp_port {
               Some(p) => u16::try_from(p)
                  .map_err(|_| InfraError::unexpected(format!("不正な SMTP ポート: {p}")))?,
               None => security.default_port(),
            };
            Some(SmtpSettings {
               host,
               port,
               username: row.smtp_username,
               password: row.smtp_password.map(SmtpPassword::new),
               security,
            })
         }
         None => None,
      };

      Ok(EmailSettings::from_db(
         OrganizationId::from_uuid(row.organization_id),
         row.provider.parse::<EmailProvider>().map_err(to_infra)?,
         row.from_name,
         row.from_address.map(Email::new).transpose().map_err(to_infra)?,
         row.reply_to.map(Email::new).transpose().map_err(to_infra)?,
         smtp,
         row.updated_at,
      ))
   }
}

/// PostgreSQL 実装の EmailSettingsRepository
#[derive(Debug, Clone)]
pub struct PostgresEmailSettingsRepository {
   pool: PgPool,
}

impl PostgresEmailSettingsRepository {
   pub fn new(pool: PgPool) -> Self {
      Self { pool }
   }
}

#[async_trait]
impl EmailSettingsRepository for PostgresEmailSettingsRepository {
   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id))]
   async fn find(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Option<EmailSettings>, InfraError> {
      let row = sqlx::query_as::<_, EmailSettingsRow>(
         r#"
            SELECT organization_id, provider, from_name, from_address, reply_to, smtp_host,
                   smtp_port, smtp_username, smtp_password, smtp_security, updated_at
            FROM email_settings
            WHERE organization_id = $1
            "#,
      )
      .bind(organization_id.as_uuid())
      .fetch_optional(&self.pool)
      .await?;

      row.map(EmailSettings::try_from).transpose()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(organization_id = %settings.organization_id()))]
   async fn upsert(&self, settings: &EmailSettings) -> Result<(), InfraError> {
      let smtp = settings.smtp();

      sqlx::query(
         r#"
            INSERT INTO email_settings (
                organization_id, provider, from_name, from_address, reply_to, smtp_host,
                smtp_port, smtp_username, smtp_password, smtp_security, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (organization_id) DO UPDATE SET
                provider = EXCLUDED.provider,
                from_name = EXCLUDED.from_name,
                from_address = EXCLUDED.from_address,
                reply_to = EXCLUDED.reply_to,
                smtp_host = EXCLUDED.smtp_host,
                smtp_port = EXCLUDED.smtp_port,
                smtp_username = EXCLUDED.smtp_username,
                smtp_password = EXCLUDED.smtp_password,
                smtp_security = EXCLUDED.smtp_security,
                updated_at = EXCLUDED.updated_at
            "#,
      )
      .bind(settings.organization_id().as_uuid())
      .bind(settings.provider().as_str())
      .bind(settings.from_name())
      .bind(settings.from_address().map(Email::as_str))
      .bind(settings.reply_to().map(Email::as_str))
      .bind(smtp.map(|s| s.host.as_str()))
      .bind(smtp.map(|s| i32::from(s.port)))
      .bind(smtp.and_then(|s| s.username.as_deref()))
      .bind(smtp.and_then(|s| s.password.as_ref()).map(SmtpPassword::expose))
      .bind(smtp.map_or(SmtpSecurity::default(), |s| s.security).as_str())
      .bind(settings.updated_at())
      .execute(&self.pool)
      .await?;
      Ok(())
   }
}
