//! # セグメントユースケース
//!
//! セグメント定義の管理と、一致する顧客のプレビュー。
//! プレビューは配信可能な顧客（メールあり・配信停止なし）だけを対象にする。

use std::sync::Arc;

use kokyaku_domain::{
   clock::Clock,
   customer::Customer,
   organization::OrganizationId,
   segment::{Segment, SegmentDefinition, SegmentId, SegmentInput},
};
use kokyaku_infra::repository::{CustomerRepository, SegmentRepository};

use crate::error::ApiError;

/// プレビューで返す顧客数の上限
pub const PREVIEW_SAMPLE_SIZE: usize = 10;

/// 一致件数と先頭の顧客
#[derive(Debug, Clone)]
pub struct CustomerPreview {
   pub count:  usize,
   pub sample: Vec<Customer>,
}

impl CustomerPreview {
   pub fn from_matches<'a>(matches: impl IntoIterator<Item = &'a Customer>) -> Self {
      let mut count = 0;
      let mut sample = Vec::new();
      for customer in matches {
         count += 1;
         if sample.len() < PREVIEW_SAMPLE_SIZE {
            sample.push(customer.clone());
         }
      }
      Self { count, sample }
   }
}

/// セグメントユースケース
pub struct SegmentUseCaseImpl {
   segments:  Arc<dyn SegmentRepository>,
   customers: Arc<dyn CustomerRepository>,
   clock:     Arc<dyn Clock>,
}

impl SegmentUseCaseImpl {
   pub fn new(
      segments: Arc<dyn SegmentRepository>,
      customers: Arc<dyn CustomerRepository>,
      clock: Arc<dyn Clock>,
   ) -> Self {
      Self {
         segments,
         customers,
         clock,
      }
   }

   pub async fn list(&self, organization_id: &OrganizationId) -> Result<Vec<Segment>, ApiError> {
      Ok(self.segments.list(organization_id).await?)
   }

   pub async fn get(
      &self,
      organization_id: &OrganizationId,
      id: &SegmentId,
   ) -> Result<Segment, ApiError> {
      self
         .segments
         .find_by_id(organization_id, id)
         .await?
         .ok_or_else(|| ApiError::NotFound(format!("セグメントが見つかりません: {id}")))
   }

   pub async fn create(
      &self,
      organization_id: &OrganizationId,
      input: SegmentInput,
   ) -> Result<Segment, ApiError> {
      let segment = Segment::new(
         SegmentId::new(),
         organization_id.clone(),
         input,
         self.clock.now(),
      )?;
      self.segments.insert(&segment).await?;
      Ok(segment)
   }

   pub async fn update(
      &self,
      organization_id: &OrganizationId,
      id: &SegmentId,
      input: SegmentInput,
   ) -> Result<Segment, ApiError> {
      let segment = self
         .get(organization_id, id)
         .await?
         .updated(input, self.clock.now())?;
      self.segments.update(&segment).await?;
      Ok(segment)
   }

   pub async fn delete(
      &self,
      organization_id: &OrganizationId,
      id: &SegmentId,
   ) -> Result<(), ApiError> {
      if !self.segments.delete(organization_id, id).await? {
         return Err(ApiError::NotFound(format!("セグメントが見つかりません: {id}")));
      }
      Ok(())
   }

   /// 保存済みセグメントに一致する顧客
   pub async fn preview(
      &self,
      organization_id: &OrganizationId,
      id: &SegmentId,
   ) -> Result<CustomerPreview, ApiError> {
      let segment = self.get(organization_id, id).await?;
      self.preview_definition(organization_id, segment.definition()).await
   }

   /// 保存前の定義に一致する顧客
   pub async fn preview_definition(
      &self,
      organization_id: &OrganizationId,
      definition: &SegmentDefinition,
   ) -> Result<CustomerPreview, ApiError> {
      definition.validate()?;
      let customers = self.customers.find_all_mailable(organization_id).await?;
      Ok(CustomerPreview::from_matches(
         customers.iter().filter(|c| definition.matches(c)),
      ))
   }
}

#[cfg(test)]
mod tests {
   use chrono::Utc;
   use kokyaku_domain::{
      clock::FixedClock,
      customer::customer_fixture,
      segment::{Condition, ConditionOperator, MatchMode, SegmentField},
   };
   use kokyaku_infra::mock::{MockCustomerRepository, MockSegmentRepository};
   use pretty_assertions::assert_eq;
   use serde_json::json;

   use super::*;

   fn setup() -> (SegmentUseCaseImpl, MockCustomerRepository, OrganizationId) {
      let customers = MockCustomerRepository::new();
      let usecase = SegmentUseCaseImpl::new(
         Arc::new(MockSegmentRepository::new()),
         Arc::new(customers.clone()),
         Arc::new(FixedClock::new(Utc::now())),
      );
      (usecase, customers, OrganizationId::new())
   }

   fn city_is(city: &str) -> SegmentDefinition {
      SegmentDefinition {
         match_mode: MatchMode::All,
         conditions: vec![Condition {
            field:    SegmentField::City,
            operator: ConditionOperator::Equals,
            value:    json!(city),
         }],
      }
   }

   #[tokio::test]
   async fn test_保存したセグメントでプレビューできる() {
      let (usecase, customers, org) = setup();
      customers.add_customer(customer_fixture(&org, "a", Some("a@example.com"), Some("札幌市"), None));
      customers.add_customer(customer_fixture(&org, "b", Some("b@example.com"), Some("旭川市"), None));
      customers.add_customer(customer_fixture(&org, "c", None, Some("札幌市"), None));
      let segment = usecase
         .create(
            &org,
            SegmentInput {
               name: "札幌".to_string(),
               description: None,
               definition: city_is(" 札幌市 "),
            },
         )
         .await
         .unwrap();

      let preview = usecase.preview(&org, segment.id()).await.unwrap();

      assert_eq!(preview.count, 1);
      assert_eq!(preview.sample[0].name().as_str(), "a");
   }

   #[tokio::test]
   async fn test_サンプルは上限件数まで() {
      let (usecase, customers, org) = setup();
      for i in 0..15 {
         customers.add_customer(customer_fixture(
            &org,
            &format!("c{i}"),
            Some(&format!("c{i}@example.com")),
            None,
            None,
         ));
      }

      let preview = usecase
         .preview_definition(&org, &SegmentDefinition::default())
         .await
         .unwrap();

      assert_eq!(preview.count, 15);
      assert_eq!(preview.sample.len(), PREVIEW_SAMPLE_SIZE);
   }

   #[tokio::test]
   async fn test_不正な定義は400() {
      let (usecase, _, org) = setup();
      let definition = SegmentDefinition {
         match_mode: MatchMode::All,
         conditions: vec![Condition {
            field:    SegmentField::City,
            operator: ConditionOperator::Before,
            value:    json!("2024-01-01"),
         }],
      };

      let result = usecase.preview_definition(&org, &definition).await;

      assert!(matches!(result, Err(ApiError::BadRequest(_))));
   }

   #[tokio::test]
   async fn test_名前が空のセグメントは作れない() {
      let (usecase, _, org) = setup();

      let result = usecase
         .create(
            &org,
            SegmentInput {
               name: " ".to_string(),
               ..SegmentInput::default()
            },
         )
         .await;

      assert!(matches!(result, Err(ApiError::BadRequest(_))));
   }

   #[tokio::test]
   async fn test_更新できる() {
      let (usecase, _, org) = setup();
      let segment = usecase
         .create(
            &org,
            SegmentInput {
               name: "札幌".to_string(),
               description: None,
               definition: city_is("札幌市"),
            },
         )
         .await
         .unwrap();

      let updated = usecase
         .update(
            &org,
            segment.id(),
            SegmentInput {
               name: "旭川".to_string(),
               description: Some("旭川の顧客".to_string()),
               definition: city_is("旭川市"),
            },
         )
         .await
         .unwrap();

      assert_eq!(updated.name().as_str(), "旭川");
      let stored = usecase.get(&org, segment.id()).await.unwrap();
      assert_eq!(stored.definition(), &city_is("旭川市"));
   }
}
