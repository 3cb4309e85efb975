//! # Google OAuth クライアント
//!
//! Google OAuth 2.0 の認可コードフローと、Gmail 送信用のアクセストークン取得を担当する。
//!
//! ## エンドポイント
//!
//! - `https://accounts.google.com/o/oauth2/v2/auth` - 認可画面（リダイレクト先）
//! - `POST https://oauth2.googleapis.com/token` - 認可コード交換・トークン更新
//! - `GET https://openidconnect.googleapis.com/v1/userinfo` - プロフィール取得
//!
//! Gmail API での送信にはリフレッシュトークンが必要なため、認可リクエストは
//! `access_type=offline` と `prompt=consent` を付けて毎回同意画面を出す。

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// 認可リクエストで要求するスコープ
pub const GOOGLE_SCOPES: &str = "openid email profile https://www.googleapis.com/auth/gmail.send";

const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// Google OAuth クライアントエラー
#[derive(Debug, Clone, Error)]
pub enum GoogleOAuthError {
   /// 認可コードまたはリフレッシュトークンが無効（400 `invalid_grant` など）
   #[error("Google の認可が無効です: {0}")]
   InvalidGrant(String),

   /// ネットワークエラー
   #[error("ネットワークエラー: {0}")]
   Network(String),

   /// Google が利用不可（5xx、接続失敗、タイムアウト）
   #[error("Google の API が一時的に利用できません")]
   ServiceUnavailable,

   /// 予期しないエラー
   #[error("予期しないエラー: {0}")]
   Unexpected(String),
}

impl From<reqwest::Error> for GoogleOAuthError {
   fn from(err: reqwest::Error) -> Self {
      if err.is_connect() || err.is_timeout() {
         GoogleOAuthError::ServiceUnavailable
      } else {
         GoogleOAuthError::Network(err.to_string())
      }
   }
}

// --- レスポンス型 ---

/// トークンエンドポイントのレスポンス
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleTokens {
   pub access_token:  String,
   /// 初回同意時（`prompt=consent`）のみ返される
   #[serde(default)]
   pub refresh_token: Option<String>,
   #[serde(default)]
   pub expires_in:    Option<i64>,
}

/// userinfo エンドポイントのレスポンス
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleUserInfo {
   /// Google アカウントの不変 ID
   pub sub:            String,
   pub email:          String,
   #[serde(default)]
   pub email_verified: bool,
   #[serde(default)]
   pub name:           Option<String>,
   #[serde(default)]
   pub picture:        Option<String>,
}

/// Google OAuth クライアントトレイト
///
/// テスト時にスタブを使用できるようトレイトで定義。
#[async_trait]
pub trait GoogleOAuthClient: Send + Sync {
   /// 認可画面の URL を組み立てる
   fn authorization_url(&self, state: &str) -> String;

   /// 認可コードをトークンに交換する
   async fn exchange_code(&self, code: &str) -> Result<GoogleTokens, GoogleOAuthError>;

   /// アクセストークンでプロフィールを取得する
   async fn fetch_userinfo(&self, access_token: &str)
   -> Result<GoogleUserInfo, GoogleOAuthError>;

   /// リフレッシュトークンから新しいアクセストークンを取得する
   async fn refresh_access_token(&self, refresh_token: &str)
   -> Result<String, GoogleOAuthError>;
}

/// Google OAuth クライアント実装
pub struct GoogleOAuthClientImpl {
   client_id:         String,
   client_secret:     String,
   redirect_url:      String,
   token_endpoint:    String,
   userinfo_endpoint: String,
   client:            reqwest::Client,
}

impl GoogleOAuthClientImpl {
   pub fn new(client_id: String, client_secret: String, redirect_url: String) -> Self {
      Self {
         client_id,
         client_secret,
         redirect_url,
         token_endpoint: TOKEN_ENDPOINT.to_string(),
         userinfo_endpoint: USERINFO_ENDPOINT.to_string(),
         client: reqwest::Client::new(),
      }
   }

   async fn post_token(&self, form: &[(&str, &str)]) -> Result<GoogleTokens, GoogleOAuthError> {
      let response = self.client.post(&self.token_endpoint).form(form).send().await?;

      match response.status() {
         status if status.is_success() => Ok(response.json::<GoogleTokens>().await?),
         reqwest::StatusCode::BAD_REQUEST | reqwest::StatusCode::UNAUTHORIZED => {
            let body = response.text().await.unwrap_or_default();
            Err(GoogleOAuthError::InvalidGrant(body))
         }
         status if status.is_server_error() => Err(GoogleOAuthError::ServiceUnavailable),
         status => {
            let body = response.text().await.unwrap_or_default();
            Err(GoogleOAuthError::Unexpected(format!(
               "予期しないステータス {status}: {body}"
            )))
         }
      }
   }
}

#[async_trait]
impl GoogleOAuthClient for GoogleOAuthClientImpl {
   fn authorization_url(&self, state: &str) -> String {
      let params = [
         ("client_id", self.client_id.as_str()),
         ("redirect_uri", self.redirect_url.as_str()),
         ("response_type", "code"),
         ("scope", GOOGLE_SCOPES),
         ("access_type", "offline"),
         ("prompt", "consent"),
         ("include_granted_scopes", "true"),
         ("state", state),
      ];
      match Url::parse_with_params(AUTH_ENDPOINT, &params) {
         Ok(url) => url.into(),
         // AUTH_ENDPOINT は固定値のためパースに失敗しない
         Err(_) => AUTH_ENDPOINT.to_string(),
      }
   }

   #[tracing::instrument(skip_all, level = "debug")]
   async fn exchange_code(&self, code: &str) -> Result<GoogleTokens, GoogleOAuthError> {
      self
         .post_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("redirect_uri", &self.redirect_url),
         ])
         .await
   }

   #[tracing::instrument(skip_all, level = "debug")]
   async fn fetch_userinfo(
      &self,
      access_token: &str,
   ) -> Result<GoogleUserInfo, GoogleOAuthError> {
      let response = self
         .client
         .get(&self.userinfo_endpoint)
         .bearer_auth(access_token)
         .send()
         .await?;

      match response.status() {
         status if status.is_success() => Ok(response.json::<GoogleUserInfo>().await?),
         reqwest::StatusCode::UNAUTHORIZED => {
            Err(GoogleOAuthError::InvalidGrant("アクセストークンが無効です".to_string()))
         }
         status if status.is_server_error() => Err(GoogleOAuthError::ServiceUnavailable),
         status => {
            let body = response.text().await.unwrap_or_default();
            Err(GoogleOAuthError::Unexpected(format!(
               "予期しないステータス {status}: {body}"
            )))
         }
      }
   }

   #[tracing::instrument(skip_all, level = "debug")]
   async fn refresh_access_token(&self, refresh_token: &str) -> Result<String, GoogleOAuthError> {
      let tokens = self
         .post_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
         ])
         .await?;
      Ok(tokens.access_token)
   }
}

#[cfg(test)]
mod tests {
   use pretty_assertions::assert_eq;

   use super::*;

   fn client() -> GoogleOAuthClientImpl {
      GoogleOAuthClientImpl::new(
         "client-id.apps.googleusercontent.com".to_string(),
         "secret".to_string(),
         "https://crm.example.com/api/v1/auth/google/callback".to_string(),
      )
   }

   #[test]
   fn test_認可urlにオフラインアクセスとgmail送信スコープを含める() {
      let url = Url::parse(&client().authorization_url("state-123")).unwrap();
      let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

      assert_eq!(url.host_str(), Some("accounts.google.com"));
      assert_eq!(params["state"], "state-123");
      assert_eq!(params["access_type"], "offline");
      assert_eq!(params["prompt"], "consent");
      assert_eq!(params["response_type"], "code");
      assert_eq!(
         params["redirect_uri"],
         "https://crm.example.com/api/v1/auth/google/callback"
      );
      assert!(params["scope"].contains("https://www.googleapis.com/auth/gmail.send"));
   }

   #[test]
   fn test_userinfoは任意項目がなくても読める() {
      let info: GoogleUserInfo =
         serde_json::from_str(r#"{"sub": "1234", "email": "taro@example.com"}"#).unwrap();
      assert_eq!(info.sub, "1234");
      assert!(!info.email_verified);
      assert_eq!(info.name, None);
   }

   #[test]
   fn test_リフレッシュトークンのないトークン応答も読める() {
      let tokens: GoogleTokens =
         serde_json::from_str(r#"{"access_token": "ya29.x", "expires_in": 3599}"#).unwrap();
      assert_eq!(tokens.access_token, "ya29.x");
      assert_eq!(tokens.refresh_token, None);
   }
}
