//! # 受信者フィルタ
//!
//! キャンペーンの送信対象を選ぶ条件。市区町村・タグ・セグメント・カテゴリの
//! 4 つのリストからなり、空のリストは「制約なし」を意味する。
//!
//! 顧客が一致する条件:
//!
//! - メールアドレスを持ち、配信停止していない
//! - 空でない各リストについて一致する（リスト間は AND）
//!   - `cities` / `categories`: 大文字小文字を区別せず完全一致
//!   - `tags`: いずれか 1 つのタグを持つ
//!   - `segments`: いずれか 1 つのセグメント定義に一致する
//!
//! 解決結果は作成日時順に並べ、正規化済みメールアドレスで重複を除く。

use std::collections::HashMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
   DomainError,
   customer::Customer,
   segment::{Segment, SegmentDefinition, SegmentId},
   tag::TagId,
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecipientFilter {
   #[serde(default)]
   pub cities:     Vec<String>,
   #[serde(default)]
   pub tags:       Vec<TagId>,
   #[serde(default)]
   pub segments:   Vec<SegmentId>,
   #[serde(default)]
   pub categories: Vec<String>,
}

impl RecipientFilter {
   /// 空白の除去、空要素の除外、重複の除去を行う
   pub fn normalized(self) -> Self {
      let clean = |values: Vec<String>| {
         values
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unique_by(|v| v.to_lowercase())
            .collect::<Vec<_>>()
      };
      Self {
         cities:     clean(self.cities),
         tags:       self.tags.into_iter().unique().collect(),
         segments:   self.segments.into_iter().unique().collect(),
         categories: clean(self.categories),
      }
   }

   pub fn is_unrestricted(&self) -> bool {
      self.cities.is_empty()
         && self.tags.is_empty()
         && self.segments.is_empty()
         && self.categories.is_empty()
   }

   /// 参照しているセグメントがすべて存在するか検証する
   fn segment_definitions<'s>(
      &self,
      segments: &'s [Segment],
   ) -> Result<Vec<&'s SegmentDefinition>, DomainError> {
      let by_id: HashMap<&SegmentId, &Segment> = segments.iter().map(|s| (s.id(), s)).collect();
      self
         .segments
         .iter()
         .map(|id| {
            by_id
               .get(id)
               .map(|s| s.definition())
               .ok_or_else(|| DomainError::Validation(format!("セグメントが存在しません: {id}")))
         })
         .collect()
   }

   fn matches(&self, customer: &Customer, definitions: &[&SegmentDefinition]) -> bool {
      if !customer.is_mailable() {
         return false;
      }
      if !self.cities.is_empty() && !contains_ignore_case(&self.cities, customer.city()) {
         return false;
      }
      if !self.categories.is_empty()
         && !contains_ignore_case(&self.categories, customer.category())
      {
         return false;
      }
      if !self.tags.is_empty() && !customer.tag_ids().iter().any(|t| self.tags.contains(t)) {
         return false;
      }
      definitions.is_empty() || definitions.iter().any(|d| d.matches(customer))
   }

   /// 顧客一覧から送信対象を解決する
   ///
   /// `segments` には組織のセグメントを渡す。フィルタが参照する
   /// セグメントが見つからない場合はバリデーションエラー。
   pub fn resolve<'c>(
      &self,
      customers: &'c [Customer],
      segments: &[Segment],
   ) -> Result<Vec<&'c Customer>, DomainError> {
      let definitions = self.segment_definitions(segments)?;
      Ok(customers
         .iter()
         .filter(|c| self.matches(c, &definitions))
         .sorted_by(|a, b| {
            a.created_at()
               .cmp(&b.created_at())
               .then_with(|| a.id().as_uuid().cmp(b.id().as_uuid()))
         })
         .unique_by(|c| c.email().map(|e| e.as_str().to_string()))
         .collect())
   }
}

fn contains_ignore_case(candidates: &[String], value: Option<&str>) -> bool {
   let Some(value) = value.map(|v| v.trim().to_lowercase()) else {
      return false;
   };
   candidates.iter().any(|c| c.trim().to_lowercase() == value)
}

#[cfg(test)]
mod tests {
   use chrono::{Duration, Utc};
   use pretty_assertions::assert_eq;
   use rstest::rstest;
   use serde_json::json;

   use super::*;
   use crate::{
      customer::customer_fixture,
      organization::OrganizationId,
      segment::{Condition, ConditionOperator, MatchMode, SegmentField, SegmentInput},
   };

   fn customers() -> Vec<Customer> {
      let org = OrganizationId::new();
      vec![
         customer_fixture(&org, "A", Some("a@example.com"), Some("Tokyo"), Some("VIP")),
         customer_fixture(&org, "B", Some("b@example.com"), Some("Osaka"), Some("一般")),
         customer_fixture(&org, "C", None, Some("Tokyo"), Some("VIP")),
         customer_fixture(&org, "D", Some("d@example.com"), Some("tokyo"), None),
      ]
   }

   fn names(resolved: &[&Customer]) -> Vec<String> {
      resolved.iter().map(|c| c.name().as_str().to_string()).collect()
   }

   #[test]
   fn test_制約なしならメールを持つ顧客すべて() {
      let customers = customers();
      let resolved = RecipientFilter::default().resolve(&customers, &[]).unwrap();
      assert_eq!(names(&resolved), vec!["A", "B", "D"]);
   }

   #[rstest]
   #[case(vec!["TOKYO"], vec![], vec!["A", "D"])]
   #[case(vec!["Tokyo"], vec!["vip"], vec!["A"])]
   #[case(vec![], vec!["一般", "VIP"], vec!["A", "B"])]
   #[case(vec!["Nagoya"], vec![], vec![])]
   fn test_市区町村とカテゴリで絞り込む(
      #[case] cities: Vec<&str>,
      #[case] categories: Vec<&str>,
      #[case] expected: Vec<&str>,
   ) {
      let customers = customers();
      let filter = RecipientFilter {
         cities: cities.into_iter().map(String::from).collect(),
         categories: categories.into_iter().map(String::from).collect(),
         ..RecipientFilter::default()
      };

      let resolved = filter.resolve(&customers, &[]).unwrap();

      assert_eq!(names(&resolved), expected);
   }

   #[test]
   fn test_配信停止した顧客は除外される() {
      let mut customers = customers();
      customers[0] = customers[0].clone().unsubscribe(Utc::now());

      let resolved = RecipientFilter::default().resolve(&customers, &[]).unwrap();

      assert_eq!(names(&resolved), vec!["B", "D"]);
   }

   #[test]
   fn test_タグはいずれかを持てば一致する() {
      let vip = TagId::new();
      let new = TagId::new();
      let mut customers = customers();
      customers[1] = customers[1].clone().with_tags(vec![new.clone()], Utc::now());

      let filter = RecipientFilter {
         tags: vec![vip, new],
         ..RecipientFilter::default()
      };

      assert_eq!(names(&filter.resolve(&customers, &[]).unwrap()), vec!["B"]);
   }

   #[test]
   fn test_セグメントに一致する顧客を選ぶ() {
      let customers = customers();
      let segment = Segment::new(
         SegmentId::new(),
         customers[0].organization_id().clone(),
         SegmentInput {
            name: "大阪".to_string(),
            description: None,
            definition: SegmentDefinition {
               match_mode: MatchMode::All,
               conditions: vec![Condition {
                  field:    SegmentField::City,
                  operator: ConditionOperator::Equals,
                  value:    json!("osaka"),
               }],
            },
         },
         Utc::now(),
      )
      .unwrap();
      let filter = RecipientFilter {
         segments: vec![segment.id().clone()],
         ..RecipientFilter::default()
      };

      let resolved = filter.resolve(&customers, &[segment]).unwrap();

      assert_eq!(names(&resolved), vec!["B"]);
   }

   #[test]
   fn test_存在しないセグメントはバリデーションエラー() {
      let filter = RecipientFilter {
         segments: vec![SegmentId::new()],
         ..RecipientFilter::default()
      };
      let customers = customers();
      let result = filter.resolve(&customers, &[]);
      assert!(matches!(result, Err(DomainError::Validation(_))));
   }

   #[test]
   fn test_同じメールアドレスは作成日時が古い顧客を残す() {
      let org = OrganizationId::new();
      let newer = customer_fixture(&org, "新", Some("dup@example.com"), None, None);
      let older = {
         let c = customer_fixture(&org, "旧", Some("DUP@example.com"), None, None);
         Customer::from_db(
            c.id().clone(),
            org.clone(),
            c.profile().clone(),
            vec![],
            None,
            c.created_at() - Duration::days(1),
            c.updated_at(),
         )
      };

      let customers = vec![newer, older];
      let resolved = RecipientFilter::default().resolve(&customers, &[]).unwrap();

      assert_eq!(names(&resolved), vec!["旧"]);
   }

   #[test]
   fn test_正規化で空要素と重複を除く() {
      let filter = RecipientFilter {
         cities: vec![" Tokyo ".to_string(), "tokyo".to_string(), "".to_string()],
         ..RecipientFilter::default()
      }
      .normalized();

      assert_eq!(filter.cities, vec!["Tokyo".to_string()]);
      assert!(!filter.is_unrestricted());
   }
}
