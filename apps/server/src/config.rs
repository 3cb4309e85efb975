//! # サーバー設定
//!
//! 環境変数からサーバーの設定を読み込む。
//!
//! ## 設計方針
//!
//! - **読み込みと解釈の分離**: 値の取得元を関数で受け取り、環境変数に触れずにテストする
//! - **必須値の欠落は起動時に失敗**: 設定不足のまま配信を始めない

use std::{env, str::FromStr, time::Duration};

use thiserror::Error;

/// 設定の読み込みエラー
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
   #[error("{0} が設定されていません")]
   Missing(&'static str),

   #[error("{name} の値が不正です: {value}")]
   Invalid { name: &'static str, value: String },
}

/// メール送信の実装
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailBackend {
   /// 組織の設定に従って Gmail API / SMTP で送信する
   Live,
   /// 送信せずにログだけ出す（開発用）
   Noop,
}

impl FromStr for MailBackend {
   type Err = ();

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      match s.trim().to_ascii_lowercase().as_str() {
         "live" => Ok(Self::Live),
         "noop" => Ok(Self::Noop),
         _ => Err(()),
      }
   }
}

/// 配信ワーカーの設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
   /// 1 バッチで送信する件数
   pub batch_size:             usize,
   /// バッチ間の待機時間
   pub batch_delay:            Duration,
   /// 1 ジョブ・1 回の実行で処理する受信者数の上限
   pub max_recipients_per_run: i64,
   /// 1 回の cron 呼び出しで処理するジョブ数の上限
   pub max_jobs_per_run:       i64,
   /// ジョブ単位の失敗を再試行する上限
   pub job_max_attempts:       i32,
   /// 受信者単位の送信失敗を再試行する上限
   pub recipient_max_attempts: i32,
}

impl Default for DeliveryConfig {
   fn default() -> Self {
      Self {
         batch_size:             10,
         batch_delay:            Duration::from_millis(1000),
         max_recipients_per_run: 100,
         max_jobs_per_run:       3,
         job_max_attempts:       3,
         recipient_max_attempts: 3,
      }
   }
}

/// サーバーの設定
#[derive(Debug, Clone)]
pub struct ServerConfig {
   pub host: String,
   pub port: u16,
   pub database_url: String,
   pub redis_url: String,
   /// 公開 URL（トラッキング URL・OAuth リダイレクトの組み立てに使う）
   pub app_base_url: String,
   /// トラッキング URL の署名鍵
   pub tracking_secret: String,
   /// cron エンドポイントの Bearer トークン
   pub cron_secret: String,
   pub google_client_id: String,
   pub google_client_secret: String,
   pub google_redirect_url: String,
   pub delivery: DeliveryConfig,
   pub mail_backend: MailBackend,
   /// セッション Cookie に `Secure` を付けるか
   pub cookie_secure: bool,
}

impl ServerConfig {
   /// 環境変数から設定を読み込む
   pub fn from_env() -> Result<Self, ConfigError> {
      Self::from_lookup(|name| env::var(name).ok())
   }

   /// 任意の取得元から設定を読み込む
   pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
      let required = |name: &'static str| {
         lookup(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing(name))
      };
      let optional = |name: &'static str| {
         lookup(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
      };

      let app_base_url = required("APP_BASE_URL")?.trim_end_matches('/').to_string();
      let google_redirect_url = optional("GOOGLE_REDIRECT_URL")
         .unwrap_or_else(|| default_redirect_url(&app_base_url));

      let defaults = DeliveryConfig::default();
      let delivery = DeliveryConfig {
         batch_size:             parse_or("DELIVERY_BATCH_SIZE", optional("DELIVERY_BATCH_SIZE"), defaults.batch_size)?
            .max(1),
         batch_delay:            Duration::from_millis(parse_or(
            "DELIVERY_BATCH_DELAY_MS",
            optional("DELIVERY_BATCH_DELAY_MS"),
            1000_u64,
         )?),
         max_recipients_per_run: parse_or(
            "DELIVERY_MAX_RECIPIENTS_PER_RUN",
            optional("DELIVERY_MAX_RECIPIENTS_PER_RUN"),
            defaults.max_recipients_per_run,
         )?
         .max(1),
         max_jobs_per_run:       parse_or(
            "DELIVERY_MAX_JOBS_PER_RUN",
            optional("DELIVERY_MAX_JOBS_PER_RUN"),
            defaults.max_jobs_per_run,
         )?
         .max(1),
         job_max_attempts:       parse_or(
            "EMAIL_JOB_MAX_ATTEMPTS",
            optional("EMAIL_JOB_MAX_ATTEMPTS"),
            defaults.job_max_attempts,
         )?
         .max(1),
         recipient_max_attempts: parse_or(
            "RECIPIENT_MAX_ATTEMPTS",
            optional("RECIPIENT_MAX_ATTEMPTS"),
            defaults.recipient_max_attempts,
         )?
         .max(1),
      };

      let mail_backend = match optional("MAIL_BACKEND") {
         Some(value) => value.parse().map_err(|()| ConfigError::Invalid {
            name: "MAIL_BACKEND",
            value,
         })?,
         None => MailBackend::Live,
      };

      Ok(Self {
         host: optional("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
         port: parse_or("SERVER_PORT", optional("SERVER_PORT"), 3000_u16)?,
         database_url: required("DATABASE_URL")?,
         redis_url: required("REDIS_URL")?,
         cookie_secure: optional("COOKIE_SECURE")
            .map(|v| parse_bool(&v))
            .unwrap_or_else(|| app_base_url.starts_with("https://")),
         app_base_url,
         tracking_secret: required("TRACKING_SECRET")?,
         cron_secret: required("CRON_SECRET")?,
         google_client_id: required("GOOGLE_CLIENT_ID")?,
         google_client_secret: required("GOOGLE_CLIENT_SECRET")?,
         google_redirect_url,
         delivery,
         mail_backend,
      })
   }
}

/// OAuth コールバックの既定 URL
fn default_redirect_url(app_base_url: &str) -> String {
   format!("{app_base_url}/api/v1/auth/google/callback")
}

fn parse_or<T: FromStr>(
   name: &'static str,
   value: Option<String>,
   default: T,
) -> Result<T, ConfigError> {
   match value {
      Some(value) => value
         .parse()
         .map_err(|_| ConfigError::Invalid { name, value }),
      None => Ok(default),
   }
}

fn parse_bool(value: &str) -> bool {
   matches!(
      value.trim().to_ascii_lowercase().as_str(),
      "true" | "1" | "yes" | "on"
   )
}

#[cfg(test)]
mod tests {
   use std::collections::HashMap;

   use pretty_assertions::assert_eq;
   use rstest::rstest;

   use super::*;

   fn base_env() -> HashMap<&'static str, &'static str> {
      HashMap::from([
         ("DATABASE_URL", "postgres://localhost/kokyaku"),
         ("REDIS_URL", "redis://localhost:6379"),
         ("APP_BASE_URL", "https://crm.example.com/"),
         ("TRACKING_SECRET", "0123456789abcdef0123456789abcdef"),
         ("CRON_SECRET", "cron-secret"),
         ("GOOGLE_CLIENT_ID", "client-id"),
         ("GOOGLE_CLIENT_SECRET", "client-secret"),
      ])
   }

   fn load(env: &HashMap<&'static str, &'static str>) -> Result<ServerConfig, ConfigError> {
      ServerConfig::from_lookup(|name| env.get(name).map(|v| v.to_string()))
   }

   #[test]
   fn test_必須項目だけで既定値が適用される() {
      let config = load(&base_env()).unwrap();

      assert_eq!(config.host, "0.0.0.0");
      assert_eq!(config.port, 3000);
      assert_eq!(config.app_base_url, "https://crm.example.com");
      assert_eq!(
         config.google_redirect_url,
         "https://crm.example.com/api/v1/auth/google/callback"
      );
      assert_eq!(config.delivery, DeliveryConfig::default());
      assert_eq!(config.mail_backend, MailBackend::Live);
      assert!(config.cookie_secure);
   }

   #[test]
   fn test_必須項目が欠けているとエラー() {
      let mut env = base_env();
      env.remove("CRON_SECRET");

      assert_eq!(load(&env).unwrap_err(), ConfigError::Missing("CRON_SECRET"));
   }

   #[test]
   fn test_空文字の必須項目は未設定として扱う() {
      let mut env = base_env();
      env.insert("TRACKING_SECRET", "  ");

      assert_eq!(load(&env).unwrap_err(), ConfigError::Missing("TRACKING_SECRET"));
   }

   #[test]
   fn test_配信設定を上書きできる() {
      let mut env = base_env();
      env.insert("DELIVERY_BATCH_SIZE", "25");
      env.insert("DELIVERY_BATCH_DELAY_MS", "0");
      env.insert("DELIVERY_MAX_RECIPIENTS_PER_RUN", "500");
      env.insert("EMAIL_JOB_MAX_ATTEMPTS", "5");

      let delivery = load(&env).unwrap().delivery;

      assert_eq!(delivery.batch_size, 25);
      assert_eq!(delivery.batch_delay, Duration::ZERO);
      assert_eq!(delivery.max_recipients_per_run, 500);
      assert_eq!(delivery.job_max_attempts, 5);
      assert_eq!(delivery.recipient_max_attempts, 3);
   }

   #[test]
   fn test_数値でない値はエラー() {
      let mut env = base_env();
      env.insert("SERVER_PORT", "http");

      assert_eq!(
         load(&env).unwrap_err(),
         ConfigError::Invalid {
            name:  "SERVER_PORT",
            value: "http".to_string(),
         }
      );
   }

   #[test]
   fn test_バッチサイズ0は1に丸める() {
      let mut env = base_env();
      env.insert("DELIVERY_BATCH_SIZE", "0");

      assert_eq!(load(&env).unwrap().delivery.batch_size, 1);
   }

   #[rstest]
   #[case("live", Some(MailBackend::Live))]
   #[case("NOOP", Some(MailBackend::Noop))]
   #[case(" noop ", Some(MailBackend::Noop))]
   #[case("ses", None)]
   fn test_mail_backendのパース(#[case] value: &str, #[case] expected: Option<MailBackend>) {
      assert_eq!(value.parse::<MailBackend>().ok(), expected);
   }

   #[rstest]
   #[case("true", true)]
   #[case("1", true)]
   #[case("ON", true)]
   #[case("false", false)]
   #[case("", false)]
   fn test_真偽値のパース(#[case] value: &str, #[case] expected: bool) {
      assert_eq!(parse_bool(value), expected);
   }

   #[test]
   fn test_httpのベースurlではsecure_cookieを既定で無効にする() {
      let mut env = base_env();
      env.insert("APP_BASE_URL", "http://localhost:3000");

      assert!(!load(&env).unwrap().cookie_secure);
   }
}
