//! # 共通値オブジェクト
//!
//! 複数のエンティティ（ユーザー、顧客、リード、招待）で共有する値オブジェクト。

use serde::{Deserialize, Serialize};

use crate::DomainError;

/// メールアドレスの最大長（RFC 5321 のパス長制限）
const EMAIL_MAX_LENGTH: usize = 254;

/// メールアドレス（値オブジェクト）
///
/// 前後の空白を除去し、小文字に正規化して保持する。
/// 組織内の顧客重複判定と、配信時の宛先重複排除はこの正規化済みの値で行う。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
   /// メールアドレスを作成する
   ///
   /// # バリデーション
   ///
   /// - 空文字列ではない
   /// - `local@domain` の形式で、ドメインに `.` を含む
   /// - 空白を含まない
   /// - 最大 254 文字
   pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
      let value = value.into().trim().to_lowercase();

      if value.is_empty() {
         return Err(DomainError::Validation(
            "メールアドレスは必須です".to_string(),
         ));
      }

      if value.len() > EMAIL_MAX_LENGTH {
         return Err(DomainError::Validation(format!(
            "メールアドレスは{EMAIL_MAX_LENGTH}文字以内である必要があります"
         )));
      }

      let Some((local, domain)) = value.rsplit_once('@') else {
         return Err(invalid_format(&value));
      };

      let domain_ok = domain.contains('.')
         && !domain.starts_with('.')
         && !domain.ends_with('.')
         && !domain.contains("..");
      if local.is_empty() || !domain_ok || value.chars().any(char::is_whitespace) {
         return Err(invalid_format(&value));
      }

      Ok(Self(value))
   }

   pub fn as_str(&self) -> &str {
      &self.0
   }

   pub fn into_string(self) -> String {
      self.0
   }

   /// ドメイン部分を取得する
   pub fn domain(&self) -> &str {
      self.0.rsplit_once('@').map(|(_, d)| d).unwrap_or_default()
   }
}

fn invalid_format(value: &str) -> DomainError {
   DomainError::Validation(format!("メールアドレスの形式が不正です: {value}"))
}

impl std::fmt::Display for Email {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      write!(f, "{}", self.0)
   }
}

impl TryFrom<String> for Email {
   type Error = DomainError;

   fn try_from(value: String) -> Result<Self, Self::Error> {
      Self::new(value)
   }
}

impl From<Email> for String {
   fn from(value: Email) -> Self {
      value.0
   }
}

/// 任意入力の文字列を正規化する
///
/// trim した結果が空なら `None` にする。フォームの未入力欄をそのまま
/// 空文字列で保存しないために使う。
pub fn normalize_optional(value: Option<String>) -> Option<String> {
   value
      .map(|v| v.trim().to_string())
      .filter(|v| !v.is_empty())
}

/// 任意入力の文字列を正規化し、最大長を検証する
pub fn normalize_optional_text(
   value: Option<String>,
   label: &str,
   max_length: usize,
) -> Result<Option<String>, DomainError> {
   let value = normalize_optional(value);
   match value {
      Some(v) if v.chars().count() > max_length => Err(DomainError::Validation(format!(
         "{label}は {max_length} 文字以内である必要があります"
      ))),
      other => Ok(other),
   }
}

/// 任意入力のメールアドレスを正規化する
///
/// 空欄は `None`、入力がある場合は [`Email::new`] で検証する。
pub fn normalize_optional_email(value: Option<String>) -> Result<Option<Email>, DomainError> {
   normalize_optional(value).map(Email::new).transpose()
}

#[cfg(test)]
mod tests {
   use rstest::rstest;

   use super::*;

   #[rstest]
   #[case("user@example.com", "user@example.com")]
   #[case("  User@Example.COM ", "user@example.com")]
   #[case("first.last+tag@sub.example.co.jp", "first.last+tag@sub.example.co.jp")]
   fn test_メールアドレスは正規化して受け入れる(#[case] input: &str, #[case] expected: &str) {
      assert_eq!(Email::new(input).unwrap().as_str(), expected);
   }

   #[rstest]
   #[case("")]
   #[case("   ")]
   #[case("no-at-sign")]
   #[case("@example.com")]
   #[case("user@localhost")]
   #[case("user@.example.com")]
   #[case("user@example..com")]
   #[case("us er@example.com")]
   fn test_メールアドレスは不正な形式を拒否する(#[case] input: &str) {
      assert!(Email::new(input).is_err());
   }

   #[test]
   fn test_メールアドレスは254文字を超えると拒否する() {
      let local = "a".repeat(250);
      assert!(Email::new(format!("{local}@example.com")).is_err());
   }

   #[test]
   fn test_ドメイン部分を取得できる() {
      assert_eq!(Email::new("a@example.com").unwrap().domain(), "example.com");
   }

   #[test]
   fn test_デシリアライズ時にも検証される() {
      assert!(serde_json::from_str::<Email>("\"not-an-email\"").is_err());
      let email: Email = serde_json::from_str("\"A@Example.com\"").unwrap();
      assert_eq!(email.as_str(), "a@example.com");
   }

   #[test]
   fn test_任意入力の空欄はnoneになる() {
      assert_eq!(normalize_optional(Some("   ".to_string())), None);
      assert_eq!(normalize_optional(None), None);
      assert_eq!(
         normalize_optional(Some(" 大阪 ".to_string())),
         Some("大阪".to_string())
      );
   }

   #[test]
   fn test_任意入力の最大長を超えるとエラー() {
      let result = normalize_optional_text(Some("a".repeat(11)), "メモ", 10);
      assert!(result.is_err());
   }
}
