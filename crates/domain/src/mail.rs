//! # メール
//!
//! 送信するメール 1 通の表現と、送信時のエラー。
//!
//! ## 設計方針
//!
//! - **送信方式からの独立**: `OutgoingEmail` は SMTP / Gmail API のどちらでも同じ形で渡す
//! - **失敗の粒度**: 宛先単位の失敗（再送対象）とジョブ単位の失敗（設定不備・認証失敗）を区別する

use thiserror::Error;

/// メール送信エラー
#[derive(Debug, Error)]
pub enum MailError {
   /// 宛先 1 件への送信に失敗（その宛先だけ再試行する）
   #[error("メール送信に失敗: {0}")]
   SendFailed(String),

   /// テンプレートレンダリングに失敗
   #[error("テンプレートレンダリングに失敗: {0}")]
   TemplateFailed(String),

   /// 送信設定が不正（SMTP 未設定、送信者の Google 連携なしなど）
   #[error("送信設定が不正: {0}")]
   Misconfigured(String),

   /// 送信元サービスの認証に失敗（アクセストークン取得失敗など）
   #[error("認証に失敗: {0}")]
   AuthFailed(String),

   /// 送信元サービスのレート制限（送信上限など）
   #[error("送信レート制限: {0}")]
   RateLimited(String),
}

impl MailError {
   /// 後続の宛先にも同じ失敗が起きるか
   ///
   /// `true` の場合は宛先ごとの記録ではなくジョブ全体の失敗として扱う。
   pub fn is_job_level(&self) -> bool {
      matches!(
         self,
         Self::Misconfigured(_) | Self::AuthFailed(_) | Self::RateLimited(_)
      )
   }
}

/// 送信するメール
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingEmail {
   /// 送信先メールアドレス
   pub to:           String,
   pub to_name:      Option<String>,
   /// 送信元メールアドレス
   pub from_address: String,
   pub from_name:    Option<String>,
   pub reply_to:     Option<String>,
   pub subject:      String,
   /// HTML 本文
   pub html_body:    String,
   /// プレーンテキスト本文
   pub text_body:    String,
   /// 追加ヘッダ（`List-Unsubscribe` など）
   pub headers:      Vec<(String, String)>,
}

impl OutgoingEmail {
   pub fn header(&self, name: &str) -> Option<&str> {
      self
         .headers
         .iter()
         .find(|(n, _)| n.eq_ignore_ascii_case(name))
         .map(|(_, v)| v.as_str())
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_設定不備と認証失敗とレート制限はジョブ単位の失敗() {
      assert!(MailError::Misconfigured("x".into()).is_job_level());
      assert!(MailError::AuthFailed("x".into()).is_job_level());
      assert!(MailError::RateLimited("x".into()).is_job_level());
      assert!(!MailError::SendFailed("x".into()).is_job_level());
   }

   #[test]
   fn test_ヘッダ名は大文字小文字を区別しない() {
      let email = OutgoingEmail {
         headers: vec![("List-Unsubscribe".to_string(), "<https://x>".to_string())],
         ..OutgoingEmail::default()
      };
      assert_eq!(email.header("list-unsubscribe"), Some("<https://x>"));
      assert_eq!(email.header("X-Other"), None);
   }
}
