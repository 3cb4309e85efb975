//! # 顧客ユースケース
//!
//! 顧客の検索・登録・更新・削除と、タグ付け・配信再開を扱う。
//!
//! ## 設計方針
//!
//! - **タグは組織内の既存タグのみ**: 他組織や存在しないタグ ID は 400 にする
//! - **メールアドレスの一意性は DB 制約に任せる**: 重複は `InfraError` の競合として 409 になる

use std::sync::Arc;

use itertools::Itertools;
use kokyaku_domain::{
   clock::Clock,
   customer::{Customer, CustomerId, CustomerInput, CustomerProfile},
   organization::OrganizationId,
   tag::TagId,
};
use kokyaku_infra::repository::{CustomerQuery, CustomerRepository, TagRepository};
use kokyaku_shared::{event_log::event, log_business_event};

use crate::error::ApiError;

/// 顧客ユースケース
pub struct CustomerUseCaseImpl {
   customers: Arc<dyn CustomerRepository>,
   tags:      Arc<dyn TagRepository>,
   clock:     Arc<dyn Clock>,
}

impl CustomerUseCaseImpl {
   pub fn new(
      customers: Arc<dyn CustomerRepository>,
      tags: Arc<dyn TagRepository>,
      clock: Arc<dyn Clock>,
   ) -> Self {
      Self {
         customers,
         tags,
         clock,
      }
   }

   pub async fn list(
      &self,
      organization_id: &OrganizationId,
      query: &CustomerQuery,
   ) -> Result<(Vec<Customer>, i64), ApiError> {
      Ok(self.customers.search(organization_id, query).await?)
   }

   pub async fn get(
      &self,
      organization_id: &OrganizationId,
      id: &CustomerId,
   ) -> Result<Customer, ApiError> {
      self
         .customers
         .find_by_id(organization_id, id)
         .await?
         .ok_or_else(|| ApiError::NotFound(format!("顧客が見つかりません: {id}")))
   }

   pub async fn create(
      &self,
      organization_id: &OrganizationId,
      input: CustomerInput,
      tag_ids: Vec<TagId>,
   ) -> Result<Customer, ApiError> {
      let profile = CustomerProfile::try_from(input)?;
      let tag_ids = self.validate_tags(organization_id, tag_ids).await?;
      let now = self.clock.now();
      let customer = Customer::new(CustomerId::new(), organization_id.clone(), profile, now)
         .with_tags(tag_ids, now);
      self.customers.insert(&customer).await?;

      log_business_event!(
         event.category = event::category::CUSTOMER,
         event.action = event::action::CUSTOMER_CREATED,
         event.entity_type = event::entity_type::CUSTOMER,
         event.entity_id = %customer.id(),
         event.organization_id = %organization_id,
         event.result = event::result::SUCCESS,
         "顧客を登録しました"
      );
      Ok(customer)
   }

   /// プロフィールを更新する
   ///
   /// `tag_ids` が `Some` のときはタグ付けも置き換える。
   pub async fn update(
      &self,
      organization_id: &OrganizationId,
      id: &CustomerId,
      input: CustomerInput,
      tag_ids: Option<Vec<TagId>>,
   ) -> Result<Customer, ApiError> {
      let profile = CustomerProfile::try_from(input)?;
      let now = self.clock.now();
      let mut customer = self.get(organization_id, id).await?.with_profile(profile, now);
      self.customers.update(&customer).await?;

      if let Some(tag_ids) = tag_ids {
         let tag_ids = self.validate_tags(organization_id, tag_ids).await?;
         customer = customer.with_tags(tag_ids, now);
         self.customers.replace_tags(&customer).await?;
      }
      Ok(customer)
   }

   pub async fn replace_tags(
      &self,
      organization_id: &OrganizationId,
      id: &CustomerId,
      tag_ids: Vec<TagId>,
   ) -> Result<Customer, ApiError> {
      let tag_ids = self.validate_tags(organization_id, tag_ids).await?;
      let customer = self
         .get(organization_id, id)
         .await?
         .with_tags(tag_ids, self.clock.now());
      self.customers.replace_tags(&customer).await?;
      Ok(customer)
   }

   /// 配信停止を解除する
   pub async fn resubscribe(
      &self,
      organization_id: &OrganizationId,
      id: &CustomerId,
   ) -> Result<Customer, ApiError> {
      let customer = self
         .get(organization_id, id)
         .await?
         .resubscribe(self.clock.now());
      self.customers.update(&customer).await?;
      Ok(customer)
   }

   pub async fn delete(
      &self,
      organization_id: &OrganizationId,
      id: &CustomerId,
   ) -> Result<(), ApiError> {
      if !self.customers.delete(organization_id, id).await? {
         return Err(ApiError::NotFound(format!("顧客が見つかりません: {id}")));
      }
      log_business_event!(
         event.category = event::category::CUSTOMER,
         event.action = event::action::CUSTOMER_DELETED,
         event.entity_type = event::entity_type::CUSTOMER,
         event.entity_id = %id,
         event.organization_id = %organization_id,
         event.result = event::result::SUCCESS,
         "顧客を削除しました"
      );
      Ok(())
   }

   pub async fn cities(&self, organization_id: &OrganizationId) -> Result<Vec<String>, ApiError> {
      Ok(self.customers.distinct_cities(organization_id).await?)
   }

   pub async fn categories(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Vec<String>, ApiError> {
      Ok(self.customers.distinct_categories(organization_id).await?)
   }

   /// 重複を除き、組織に存在しないタグがあればエラーにする
   async fn validate_tags(
      &self,
      organization_id: &OrganizationId,
      tag_ids: Vec<TagId>,
   ) -> Result<Vec<TagId>, ApiError> {
      let tag_ids: Vec<TagId> = tag_ids.into_iter().unique().collect();
      if tag_ids.is_empty() {
         return Ok(tag_ids);
      }
      let found = self.tags.find_by_ids(organization_id, &tag_ids).await?;
      if let Some(missing) = tag_ids
         .iter()
         .find(|id| !found.iter().any(|tag| tag.id() == *id))
      {
         return Err(ApiError::BadRequest(format!("タグが存在しません: {missing}")));
      }
      Ok(tag_ids)
   }
}

#[cfg(test)]
mod tests {
   use chrono::Utc;
   use kokyaku_domain::{
      clock::FixedClock,
      customer::customer_fixture,
      tag::{Tag, TagColor, TagName},
   };
   use kokyaku_infra::{
      mock::{MockCustomerRepository, MockTagRepository},
      repository::PageRequest,
   };
   use pretty_assertions::assert_eq;

   use super::*;

   struct Fixture {
      customers: MockCustomerRepository,
      tags:      MockTagRepository,
      usecase:   CustomerUseCaseImpl,
      org:       OrganizationId,
   }

   fn setup() -> Fixture {
      let customers = MockCustomerRepository::new();
      let tags = MockTagRepository::new(customers.clone());
      let usecase = CustomerUseCaseImpl::new(
         Arc::new(customers.clone()),
         Arc::new(tags.clone()),
         Arc::new(FixedClock::new(Utc::now())),
      );
      Fixture {
         customers,
         tags,
         usecase,
         org: OrganizationId::new(),
      }
   }

   fn input(name: &str, email: &str) -> CustomerInput {
      CustomerInput {
         name: name.to_string(),
         email: Some(email.to_string()),
         ..CustomerInput::default()
      }
   }

   fn add_tag(fixture: &Fixture, org: &OrganizationId, name: &str) -> TagId {
      let tag = Tag::new(
         TagId::new(),
         org.clone(),
         TagName::new(name).unwrap(),
         TagColor::or_default(None).unwrap(),
         Utc::now(),
      );
      let id = tag.id().clone();
      fixture.tags.add_tag(tag);
      id
   }

   #[tokio::test]
   async fn test_タグ付きで顧客を登録できる() {
      let fixture = setup();
      let vip = add_tag(&fixture, &fixture.org, "VIP");

      let customer = fixture
         .usecase
         .create(&fixture.org, input("山田 太郎", " Taro@Example.com "), vec![vip.clone(), vip.clone()])
         .await
         .unwrap();

      assert_eq!(customer.email().unwrap().as_str(), "taro@example.com");
      assert_eq!(customer.tag_ids(), &[vip][..]);
      assert_eq!(fixture.customers.customers().len(), 1);
   }

   #[tokio::test]
   async fn test_他組織のタグは付与できない() {
      let fixture = setup();
      let other = add_tag(&fixture, &OrganizationId::new(), "VIP");

      let result = fixture
         .usecase
         .create(&fixture.org, input("山田 太郎", "taro@example.com"), vec![other])
         .await;

      assert!(matches!(result, Err(ApiError::BadRequest(_))));
      assert!(fixture.customers.customers().is_empty());
   }

   #[tokio::test]
   async fn test_同じメールアドレスは409() {
      let fixture = setup();
      fixture
         .usecase
         .create(&fixture.org, input("山田 太郎", "taro@example.com"), vec![])
         .await
         .unwrap();

      let result = fixture
         .usecase
         .create(&fixture.org, input("山田 次郎", "TARO@example.com"), vec![])
         .await;

      assert!(matches!(result, Err(ApiError::Conflict(_))));
   }

   #[tokio::test]
   async fn test_名前が空なら400() {
      let fixture = setup();

      let result = fixture
         .usecase
         .create(&fixture.org, input("  ", "taro@example.com"), vec![])
         .await;

      assert!(matches!(result, Err(ApiError::BadRequest(_))));
   }

   #[tokio::test]
   async fn test_更新でタグを置き換える() {
      let fixture = setup();
      let vip = add_tag(&fixture, &fixture.org, "VIP");
      let customer = customer_fixture(&fixture.org, "山田 太郎", Some("taro@example.com"), None, None);
      fixture.customers.add_customer(customer.clone());

      let updated = fixture
         .usecase
         .update(
            &fixture.org,
            customer.id(),
            CustomerInput {
               city: Some("札幌市".to_string()),
               ..input("山田 太郎", "taro@example.com")
            },
            Some(vec![vip.clone()]),
         )
         .await
         .unwrap();

      assert_eq!(updated.city(), Some("札幌市"));
      let stored = fixture.usecase.get(&fixture.org, customer.id()).await.unwrap();
      assert_eq!(stored.tag_ids(), &[vip][..]);
      assert_eq!(stored.city(), Some("札幌市"));
   }

   #[tokio::test]
   async fn test_他組織の顧客は見えない() {
      let fixture = setup();
      let customer =
         customer_fixture(&OrganizationId::new(), "山田 太郎", Some("taro@example.com"), None, None);
      fixture.customers.add_customer(customer.clone());

      let result = fixture.usecase.get(&fixture.org, customer.id()).await;

      assert!(matches!(result, Err(ApiError::NotFound(_))));
   }

   #[tokio::test]
   async fn test_配信停止を解除できる() {
      let fixture = setup();
      let customer = customer_fixture(&fixture.org, "山田 太郎", Some("taro@example.com"), None, None)
         .unsubscribe(Utc::now());
      fixture.customers.add_customer(customer.clone());

      let resubscribed = fixture
         .usecase
         .resubscribe(&fixture.org, customer.id())
         .await
         .unwrap();

      assert!(resubscribed.is_mailable());
      assert!(fixture.customers.customers()[0].unsubscribed_at().is_none());
   }

   #[tokio::test]
   async fn test_削除済みの顧客を削除すると404() {
      let fixture = setup();

      let result = fixture.usecase.delete(&fixture.org, &CustomerId::new()).await;

      assert!(matches!(result, Err(ApiError::NotFound(_))));
   }

   #[tokio::test]
   async fn test_市区町村の一覧は重複なし() {
      let fixture = setup();
      for (name, city) in [("a", "札幌市"), ("b", "札幌市"), ("c", "旭川市")] {
         fixture
            .customers
            .add_customer(customer_fixture(&fixture.org, name, None, Some(city), None));
      }

      let cities = fixture.usecase.cities(&fixture.org).await.unwrap();

      assert_eq!(cities, vec!["旭川市".to_string(), "札幌市".to_string()]);
   }

   #[tokio::test]
   async fn test_検索結果は総件数を返す() {
      let fixture = setup();
      for name in ["a", "b", "c"] {
         fixture
            .customers
            .add_customer(customer_fixture(&fixture.org, name, None, None, None));
      }
      let query = CustomerQuery {
         page: PageRequest::from_page(Some(1), Some(2)),
         ..CustomerQuery::default()
      };

      let (customers, total) = fixture.usecase.list(&fixture.org, &query).await.unwrap();

      assert_eq!(customers.len(), 2);
      assert_eq!(total, 3);
   }
}
