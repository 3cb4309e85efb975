//! # タグ
//!
//! 顧客に付与するラベル。キャンペーンの配信先フィルタとセグメント条件で参照される。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DomainError, organization::OrganizationId};

/// 色指定がない場合の既定色
pub const DEFAULT_TAG_COLOR: &str = "#6b7280";

define_uuid_id! {
   /// タグ ID
   pub struct TagId;
}

define_validated_string! {
   /// タグ名（組織内で一意）
   pub struct TagName {
      label: "タグ名",
      max_length: 50,
   }
}

/// タグの表示色（`#RRGGBB`、小文字に正規化）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagColor(String);

impl TagColor {
   pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
      let value = value.into().trim().to_lowercase();
      let valid = value.len() == 7
         && value.starts_with('#')
         && value[1..].chars().all(|c| c.is_ascii_hexdigit());
      if !valid {
         return Err(DomainError::Validation(format!(
            "タグの色は #RRGGBB 形式で指定してください: {value}"
         )));
      }
      Ok(Self(value))
   }

   /// 未指定なら既定色にする
   pub fn or_default(value: Option<String>) -> Result<Self, DomainError> {
      match value {
         Some(v) if !v.trim().is_empty() => Self::new(v),
         _ => Ok(Self(DEFAULT_TAG_COLOR.to_string())),
      }
   }

   pub fn as_str(&self) -> &str {
      &self.0
   }
}

/// タグエンティティ
#[derive(Debug, Clone)]
pub struct Tag {
   id:              TagId,
   organization_id: OrganizationId,
   name:            TagName,
   color:           TagColor,
   created_at:      DateTime<Utc>,
}

impl Tag {
   pub fn new(
      id: TagId,
      organization_id: OrganizationId,
      name: TagName,
      color: TagColor,
      now: DateTime<Utc>,
   ) -> Self {
      Self {
         id,
         organization_id,
         name,
         color,
         created_at: now,
      }
   }

   pub fn from_db(
      id: TagId,
      organization_id: OrganizationId,
      name: TagName,
      color: TagColor,
      created_at: DateTime<Utc>,
   ) -> Self {
      Self::new(id, organization_id, name, color, created_at)
   }

   pub fn with_name_and_color(self, name: TagName, color: TagColor) -> Self {
      Self {
         name,
         color,
         ..self
      }
   }

   pub fn id(&self) -> &TagId {
      &self.id
   }

   pub fn organization_id(&self) -> &OrganizationId {
      &self.organization_id
   }

   pub fn name(&self) -> &TagName {
      &self.name
   }

   pub fn color(&self) -> &TagColor {
      &self.color
   }

   pub fn created_at(&self) -> DateTime<Utc> {
      self.created_at
   }
}

#[cfg(test)]
mod tests {
   use rstest::rstest;

   use super::*;

   #[rstest]
   #[case("#FF8800", "#ff8800")]
   #[case(" #00aa11 ", "#00aa11")]
   fn test_色は小文字に正規化される(#[case] input: &str, #[case] expected: &str) {
      assert_eq!(TagColor::new(input).unwrap().as_str(), expected);
   }

   #[rstest]
   #[case("red")]
   #[case("#fff")]
   #[case("#gg0000")]
   #[case("ff00001")]
   fn test_不正な色は拒否する(#[case] input: &str) {
      assert!(TagColor::new(input).is_err());
   }

   #[test]
   fn test_未指定の色は既定色になる() {
      assert_eq!(TagColor::or_default(None).unwrap().as_str(), DEFAULT_TAG_COLOR);
      assert_eq!(
         TagColor::or_default(Some(" ".to_string())).unwrap().as_str(),
         DEFAULT_TAG_COLOR
      );
   }

   #[test]
   fn test_タグ名は50文字を超えると拒否する() {
      assert!(TagName::new("a".repeat(51)).is_err());
      assert!(TagName::new("a".repeat(50)).is_ok());
   }
}
