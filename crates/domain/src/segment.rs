//! # セグメント
//!
//! 顧客属性に対する再利用可能な条件式（セグメント DSL）。
//!
//! ## 定義の JSON 形式
//!
//! ```json
//! {
//!   "match": "all",
//!   "conditions": [
//!     { "field": "city", "operator": "in", "value": ["東京", "大阪"] },
//!     { "field": "tag", "operator": "equals", "value": "0190…" },
//!     { "field": "created_at", "operator": "after", "value": "2024-01-01" }
//!   ]
//! }
//! ```
//!
//! ## 評価規則
//!
//! - 文字列比較は trim + 小文字化した上で行う
//! - 値が未設定の属性は空文字列として扱う
//! - `tag` はタグ ID の集合に対して評価する
//! - `created_at` の日付のみの指定は UTC の 0 時とみなす。`after` はその日の翌日 0 時以降
//! - 条件が 0 件の定義はすべての顧客に一致する

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::IntoStaticStr;

use crate::{
   DomainError,
   customer::Customer,
   organization::OrganizationId,
   tag::TagId,
   value_objects::normalize_optional_text,
};

define_uuid_id! {
   /// セグメント ID
   pub struct SegmentId;
}

define_validated_string! {
   /// セグメント名
   pub struct SegmentName {
      label: "セグメント名",
      max_length: 100,
   }
}

/// 1 定義あたりの条件数の上限
pub const MAX_CONDITIONS: usize = 50;

/// 条件の結合方法
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
   /// すべての条件に一致（AND）
   #[default]
   All,
   /// いずれかの条件に一致（OR）
   Any,
}

/// 条件の対象となる顧客属性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SegmentField {
   Name,
   Email,
   Phone,
   Company,
   City,
   Category,
   Notes,
   Tag,
   CreatedAt,
}

/// 比較演算子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConditionOperator {
   Equals,
   NotEquals,
   Contains,
   NotContains,
   StartsWith,
   EndsWith,
   In,
   NotIn,
   IsEmpty,
   IsNotEmpty,
   Before,
   After,
}

impl ConditionOperator {
   fn takes_no_value(self) -> bool {
      matches!(self, Self::IsEmpty | Self::IsNotEmpty)
   }

   fn takes_list(self) -> bool {
      matches!(self, Self::In | Self::NotIn)
   }
}

impl SegmentField {
   fn supports(self, operator: ConditionOperator) -> bool {
      use ConditionOperator as Op;
      match self {
         Self::Tag => matches!(
            operator,
            Op::Equals | Op::NotEquals | Op::In | Op::NotIn | Op::IsEmpty | Op::IsNotEmpty
         ),
         Self::CreatedAt => matches!(operator, Op::Before | Op::After),
         _ => !matches!(operator, Op::Before | Op::After),
      }
   }
}

/// 単一の条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
   pub field:    SegmentField,
   pub operator: ConditionOperator,
   #[serde(default)]
   pub value:    Value,
}

impl Condition {
   fn validate(&self, index: usize) -> Result<(), DomainError> {
      let position = index + 1;
      let field: &'static str = self.field.into();
      let operator: &'static str = self.operator.into();

      if !self.field.supports(self.operator) {
         return Err(DomainError::Validation(format!(
            "条件 {position}: {field} に {operator} は使用できません"
         )));
      }

      if self.operator.takes_no_value() {
         return Ok(());
      }

      let values = if self.operator.takes_list() {
         let items = string_list(&self.value).ok_or_else(|| {
            DomainError::Validation(format!(
               "条件 {position}: {operator} には文字列の配列を指定してください"
            ))
         })?;
         if items.is_empty() {
            return Err(DomainError::Validation(format!(
               "条件 {position}: {operator} には 1 件以上の値が必要です"
            )));
         }
         items
      } else {
         match self.value.as_str().map(str::trim) {
            Some(v) if !v.is_empty() => vec![v.to_string()],
            _ => {
               return Err(DomainError::Validation(format!(
                  "条件 {position}: 値を指定してください"
               )));
            }
         }
      };

      match self.field {
         SegmentField::Tag => {
            for value in &values {
               TagId::parse_str(value)?;
            }
         }
         SegmentField::CreatedAt => {
            for value in &values {
               parse_instant(value).ok_or_else(|| {
                  DomainError::Validation(format!(
                     "条件 {position}: 日時は RFC 3339 または YYYY-MM-DD で指定してください"
                  ))
               })?;
            }
         }
         _ => {}
      }

      Ok(())
   }

   /// 顧客がこの条件に一致するか
   ///
   /// 検証済みの条件を前提とする。解釈できない値は不一致として扱う。
   pub fn matches(&self, customer: &Customer) -> bool {
      match self.field {
         SegmentField::Tag => self.matches_tags(customer),
         SegmentField::CreatedAt => self.matches_created_at(customer.created_at()),
         field => {
            let actual = text_attribute(customer, field)
               .map(normalize)
               .unwrap_or_default();
            self.matches_text(&actual)
         }
      }
   }

   fn matches_text(&self, actual: &str) -> bool {
      use ConditionOperator as Op;
      match self.operator {
         Op::IsEmpty => actual.is_empty(),
         Op::IsNotEmpty => !actual.is_empty(),
         Op::In | Op::NotIn => {
            let contained = string_list(&self.value)
               .unwrap_or_default()
               .iter()
               .any(|v| normalize(v) == actual);
            contained == (self.operator == Op::In)
         }
         operator => {
            let Some(expected) = self.value.as_str().map(normalize) else {
               return false;
            };
            match operator {
               Op::Equals => actual == expected,
               Op::NotEquals => actual != expected,
               Op::Contains => actual.contains(&expected),
               Op::NotContains => !actual.contains(&expected),
               Op::StartsWith => actual.starts_with(&expected),
               Op::EndsWith => actual.ends_with(&expected),
               _ => false,
            }
         }
      }
   }

   fn matches_tags(&self, customer: &Customer) -> bool {
      use ConditionOperator as Op;
      let has = |value: &str| {
         TagId::parse_str(value.trim())
            .map(|id| customer.tag_ids().contains(&id))
            .unwrap_or(false)
      };
      match self.operator {
         Op::IsEmpty => customer.tag_ids().is_empty(),
         Op::IsNotEmpty => !customer.tag_ids().is_empty(),
         Op::Equals => self.value.as_str().is_some_and(has),
         Op::NotEquals => !self.value.as_str().is_some_and(has),
         Op::In => string_list(&self.value)
            .unwrap_or_default()
            .iter()
            .any(|v| has(v.as_str())),
         Op::NotIn => !string_list(&self.value)
            .unwrap_or_default()
            .iter()
            .any(|v| has(v.as_str())),
         _ => false,
      }
   }

   fn matches_created_at(&self, created_at: DateTime<Utc>) -> bool {
      let Some(raw) = self.value.as_str() else {
         return false;
      };
      match (self.operator, parse_bound(raw)) {
         (ConditionOperator::Before, Some(Bound { start, .. })) => created_at < start,
         (ConditionOperator::After, Some(Bound { end, .. })) => created_at >= end,
         _ => false,
      }
   }
}

/// セグメント定義
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SegmentDefinition {
   #[serde(rename = "match", default)]
   pub match_mode: MatchMode,
   #[serde(default)]
   pub conditions: Vec<Condition>,
}

impl SegmentDefinition {
   /// 演算子と属性の組み合わせ、値の有無・形式を検証する
   pub fn validate(&self) -> Result<(), DomainError> {
      if self.conditions.len() > MAX_CONDITIONS {
         return Err(DomainError::Validation(format!(
            "条件は {MAX_CONDITIONS} 件以内で指定してください"
         )));
      }
      self
         .conditions
         .iter()
         .enumerate()
         .try_for_each(|(i, c)| c.validate(i))
   }

   /// 顧客がセグメントに一致するか
   pub fn matches(&self, customer: &Customer) -> bool {
      if self.conditions.is_empty() {
         return true;
      }
      match self.match_mode {
         MatchMode::All => self.conditions.iter().all(|c| c.matches(customer)),
         MatchMode::Any => self.conditions.iter().any(|c| c.matches(customer)),
      }
   }
}

/// セグメントの入力項目（未検証）
#[derive(Debug, Clone, Default)]
pub struct SegmentInput {
   pub name:        String,
   pub description: Option<String>,
   pub definition:  SegmentDefinition,
}

/// セグメントエンティティ
#[derive(Debug, Clone)]
pub struct Segment {
   id:              SegmentId,
   organization_id: OrganizationId,
   name:            SegmentName,
   description:     Option<String>,
   definition:      SegmentDefinition,
   created_at:      DateTime<Utc>,
   updated_at:      DateTime<Utc>,
}

impl Segment {
   pub fn new(
      id: SegmentId,
      organization_id: OrganizationId,
      input: SegmentInput,
      now: DateTime<Utc>,
   ) -> Result<Self, DomainError> {
      let (name, description, definition) = validate_input(input)?;
      Ok(Self {
         id,
         organization_id,
         name,
         description,
         definition,
         created_at: now,
         updated_at: now,
      })
   }

   pub fn from_db(
      id: SegmentId,
      organization_id: OrganizationId,
      name: SegmentName,
      description: Option<String>,
      definition: SegmentDefinition,
      created_at: DateTime<Utc>,
      updated_at: DateTime<Utc>,
   ) -> Self {
      Self {
         id,
         organization_id,
         name,
         description,
         definition,
         created_at,
         updated_at,
      }
   }

   pub fn updated(self, input: SegmentInput, now: DateTime<Utc>) -> Result<Self, DomainError> {
      let (name, description, definition) = validate_input(input)?;
      Ok(Self {
         name,
         description,
         definition,
         updated_at: now,
         ..self
      })
   }

   pub fn matches(&self, customer: &Customer) -> bool {
      self.definition.matches(customer)
   }

   pub fn id(&self) -> &SegmentId {
      &self.id
   }

   pub fn organization_id(&self) -> &OrganizationId {
      &self.organization_id
   }

   pub fn name(&self) -> &SegmentName {
      &self.name
   }

   pub fn description(&self) -> Option<&str> {
      self.description.as_deref()
   }

   pub fn definition(&self) -> &SegmentDefinition {
      &self.definition
   }

   pub fn created_at(&self) -> DateTime<Utc> {
      self.created_at
   }

   pub fn updated_at(&self) -> DateTime<Utc> {
      self.updated_at
   }
}

fn validate_input(
   input: SegmentInput,
) -> Result<(SegmentName, Option<String>, SegmentDefinition), DomainError> {
   let name = SegmentName::new(input.name)?;
   let description = normalize_optional_text(input.description, "説明", 1000)?;
   input.definition.validate()?;
   Ok((name, description, input.definition))
}

fn normalize(value: &str) -> String {
   value.trim().to_lowercase()
}

fn text_attribute(customer: &Customer, field: SegmentField) -> Option<&str> {
   match field {
      SegmentField::Name => Some(customer.name().as_str()),
      SegmentField::Email => customer.email().map(|e| e.as_str()),
      SegmentField::Phone => customer.phone(),
      SegmentField::Company => customer.company(),
      SegmentField::City => customer.city(),
      SegmentField::Category => customer.category(),
      SegmentField::Notes => customer.notes(),
      SegmentField::Tag | SegmentField::CreatedAt => None,
   }
}

fn string_list(value: &Value) -> Option<Vec<String>> {
   value
      .as_array()?
      .iter()
      .map(|v| v.as_str().map(|s| s.trim().to_string()))
      .collect()
}

/// 日時指定の解釈結果
///
/// RFC 3339 の場合は `start == end`。日付のみの場合は当日 0 時と翌日 0 時。
struct Bound {
   start: DateTime<Utc>,
   end:   DateTime<Utc>,
}

fn parse_bound(raw: &str) -> Option<Bound> {
   let raw = raw.trim();
   if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
      let at = at.with_timezone(&Utc);
      return Some(Bound { start: at, end: at });
   }
   let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
   let start = date.and_hms_opt(0, 0, 0)?.and_utc();
   let end = date.succ_opt()?.and_hms_opt(0, 0, 0)?.and_utc();
   Some(Bound { start, end })
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
   parse_bound(raw).map(|b| b.start)
}
