//! # トラッキング URL 署名
//!
//! 開封ピクセル、クリックリダイレクト、配信停止の各 URL に HMAC-SHA256 署名を
//! 付与し、受信者 ID の改ざんや任意 URL へのリダイレクト悪用を防ぐ。
//!
//! ## 署名対象
//!
//! | 用途 | メッセージ |
//! |------|-----------|
//! | 開封 | `open:{recipient_id}` |
//! | クリック | `click:{recipient_id}:{url}` |
//! | 配信停止 | `unsubscribe:{recipient_id}` |
//!
//! 署名は base64url（パディングなし）でエンコードし、検証は定数時間で比較する。

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use strum::IntoStaticStr;
use subtle::ConstantTimeEq;

use crate::{
   DomainError,
   campaign::CampaignId,
   campaign_recipient::CampaignRecipientId,
   organization::OrganizationId,
};

type HmacSha256 = Hmac<Sha256>;

/// 署名の用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum SignaturePurpose {
   Open,
   Click,
   Unsubscribe,
}

/// トラッキング URL の署名・検証を行う
#[derive(Clone)]
pub struct TrackingSigner {
   secret: Vec<u8>,
}

impl std::fmt::Debug for TrackingSigner {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("TrackingSigner").finish_non_exhaustive()
   }
}

impl TrackingSigner {
   pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, DomainError> {
      let secret = secret.as_ref();
      if secret.len() < 16 {
         return Err(DomainError::Validation(
            "トラッキング署名鍵は 16 バイト以上必要です".to_string(),
         ));
      }
      Ok(Self {
         secret: secret.to_vec(),
      })
   }

   fn mac(&self, purpose: SignaturePurpose, recipient_id: &CampaignRecipientId, url: Option<&str>) -> Vec<u8> {
      let purpose: &'static str = purpose.into();
      let message = match url {
         Some(url) => format!("{purpose}:{recipient_id}:{url}"),
         None => format!("{purpose}:{recipient_id}"),
      };
      // HMAC は任意長の鍵を受け付けるため new_from_slice は失敗しない
      let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
         return Vec::new();
      };
      mac.update(message.as_bytes());
      mac.finalize().into_bytes().to_vec()
   }

   pub fn sign(
      &self,
      purpose: SignaturePurpose,
      recipient_id: &CampaignRecipientId,
      url: Option<&str>,
   ) -> String {
      URL_SAFE_NO_PAD.encode(self.mac(purpose, recipient_id, url))
   }

   /// 署名を定数時間で検証する
   pub fn verify(
      &self,
      purpose: SignaturePurpose,
      recipient_id: &CampaignRecipientId,
      url: Option<&str>,
      signature: &str,
   ) -> bool {
      let Ok(provided) = URL_SAFE_NO_PAD.decode(signature.trim()) else {
         return false;
      };
      let expected = self.mac(purpose, recipient_id, url);
      !expected.is_empty() && bool::from(expected.ct_eq(&provided))
   }
}

/// 受信者ごとの署名付き URL を組み立てる
#[derive(Debug, Clone)]
pub struct TrackingUrls {
   base_url: String,
   signer:   TrackingSigner,
}

impl TrackingUrls {
   pub fn new(base_url: &str, signer: TrackingSigner) -> Self {
      Self {
         base_url: base_url.trim_end_matches('/').to_string(),
         signer,
      }
   }

   pub fn signer(&self) -> &TrackingSigner {
      &self.signer
   }

   /// 開封ピクセルの URL
   pub fn open_url(&self, recipient_id: &CampaignRecipientId) -> String {
      let s = self.signer.sign(SignaturePurpose::Open, recipient_id, None);
      format!("{}/t/open/{recipient_id}.gif?s={s}", self.base_url)
   }

   /// クリックリダイレクトの URL
   pub fn click_url(&self, recipient_id: &CampaignRecipientId, target: &str) -> String {
      let s = self
         .signer
         .sign(SignaturePurpose::Click, recipient_id, Some(target));
      format!(
         "{}/t/click/{recipient_id}?u={}&s={s}",
         self.base_url,
         urlencoding::encode(target)
      )
   }

   /// 配信停止ページの URL
   pub fn unsubscribe_url(&self, recipient_id: &CampaignRecipientId) -> String {
      let s = self
         .signer
         .sign(SignaturePurpose::Unsubscribe, recipient_id, None);
      format!("{}/u/{recipient_id}?s={s}", self.base_url)
   }

   /// このサービスのトラッキング・配信停止 URL か
   pub fn is_tracking_url(&self, url: &str) -> bool {
      [
         format!("{}/t/", self.base_url),
         format!("{}/u/", self.base_url),
      ]
      .iter()
      .any(|prefix| url.starts_with(prefix.as_str()))
   }
}

/// クリックのリダイレクト先として許可するか（http / https の絶対 URL のみ）
pub fn is_safe_redirect_target(target: &str) -> bool {
   url::Url::parse(target)
      .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
      .unwrap_or(false)
}

/// メールイベントの種類
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmailEventType {
   Open,
   Click,
   Unsubscribe,
}

impl EmailEventType {
   pub fn as_str(self) -> &'static str {
      self.into()
   }
}

impl std::str::FromStr for EmailEventType {
   type Err = DomainError;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      match s {
         "open" => Ok(Self::Open),
         "click" => Ok(Self::Click),
         "unsubscribe" => Ok(Self::Unsubscribe),
         _ => Err(DomainError::Validation(format!("不正なイベント種別: {s}"))),
      }
   }
}

define_uuid_id! {
   pub struct EmailEventId;
}

/// 開封・クリック・配信停止の記録
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailEvent {
   pub id:              EmailEventId,
   pub organization_id: OrganizationId,
   pub campaign_id:     CampaignId,
   pub recipient_id:    CampaignRecipientId,
   pub event_type:      EmailEventType,
   pub url:             Option<String>,
   pub user_agent:      Option<String>,
   pub ip:              Option<String>,
   pub occurred_at:     DateTime<Utc>,
}

#[cfg(test)]
mod tests {
   use pretty_assertions::assert_eq;
   use rstest::rstest;

   use super::*;

   const SECRET: &str = "0123456789abcdef0123456789abcdef";

   fn urls() -> TrackingUrls {
      TrackingUrls::new("https://crm.example.com/", TrackingSigner::new(SECRET).unwrap())
   }

   #[test]
   fn test_短すぎる鍵を拒否する() {
      assert!(TrackingSigner::new("short").is_err());
   }

   #[test]
   fn test_署名は検証できる() {
      let signer = TrackingSigner::new(SECRET).unwrap();
      let id = CampaignRecipientId::new();
      let sig = signer.sign(SignaturePurpose::Open, &id, None);

      assert!(signer.verify(SignaturePurpose::Open, &id, None, &sig));
      assert!(!sig.contains('='));
   }

   #[test]
   fn test_用途が異なる署名は通らない() {
      let signer = TrackingSigner::new(SECRET).unwrap();
      let id = CampaignRecipientId::new();
      let sig = signer.sign(SignaturePurpose::Open, &id, None);

      assert!(!signer.verify(SignaturePurpose::Unsubscribe, &id, None, &sig));
   }

   #[test]
   fn test_クリック先urlの改ざんを検出する() {
      let signer = TrackingSigner::new(SECRET).unwrap();
      let id = CampaignRecipientId::new();
      let sig = signer.sign(SignaturePurpose::Click, &id, Some("https://example.com/a"));

      assert!(signer.verify(SignaturePurpose::Click, &id, Some("https://example.com/a"), &sig));
      assert!(!signer.verify(SignaturePurpose::Click, &id, Some("https://evil.example/"), &sig));
   }

   #[rstest]
   #[case("")]
   #[case("!!!not-base64!!!")]
   #[case("AAAA")]
   fn test_不正な署名文字列は通らない(#[case] sig: &str) {
      let signer = TrackingSigner::new(SECRET).unwrap();
      assert!(!signer.verify(SignaturePurpose::Open, &CampaignRecipientId::new(), None, sig));
   }

   #[test]
   fn test_別の鍵の署名は通らない() {
      let id = CampaignRecipientId::new();
      let other = TrackingSigner::new("fedcba9876543210fedcba9876543210").unwrap();
      let sig = other.sign(SignaturePurpose::Open, &id, None);

      assert!(!urls().signer().verify(SignaturePurpose::Open, &id, None, &sig));
   }

   #[test]
   fn test_urlの形式() {
      let urls = urls();
      let id = CampaignRecipientId::new();

      let open = urls.open_url(&id);
      let click = urls.click_url(&id, "https://example.com/?a=1&b=2");
      let unsub = urls.unsubscribe_url(&id);

      assert!(open.starts_with(&format!("https://crm.example.com/t/open/{id}.gif?s=")));
      assert!(click.contains("u=https%3A%2F%2Fexample.com%2F%3Fa%3D1%26b%3D2"));
      assert!(unsub.starts_with(&format!("https://crm.example.com/u/{id}?s=")));
      assert!(urls.is_tracking_url(&click));
      assert!(!urls.is_tracking_url("https://example.com/t/x"));
   }

   #[rstest]
   #[case("https://example.com/path", true)]
   #[case("http://example.com", true)]
   #[case("javascript:alert(1)", false)]
   #[case("//evil.example", false)]
   #[case("/relative", false)]
   fn test_リダイレクト先の検証(#[case] target: &str, #[case] expected: bool) {
      assert_eq!(is_safe_redirect_target(target), expected);
   }

   #[test]
   fn test_イベント種別の文字列表現() {
      assert_eq!(EmailEventType::Unsubscribe.as_str(), "unsubscribe");
      assert_eq!("click".parse::<EmailEventType>().unwrap(), EmailEventType::Click);
   }
}
