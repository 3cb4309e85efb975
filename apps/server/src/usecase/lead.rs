//! # リードユースケース
//!
//! リードの管理と顧客への変換。
//!
//! 変換時に同じメールアドレスの顧客が既にいれば、新しく作らずにその顧客へ紐付ける。

use std::sync::Arc;

use kokyaku_domain::{
   clock::Clock,
   customer::{Customer, CustomerId, CustomerProfile},
   lead::{Lead, LeadId, LeadInput, LeadProfile, LeadStatus},
   organization::OrganizationId,
};
use kokyaku_infra::repository::{CustomerRepository, LeadQuery, LeadRepository};
use kokyaku_shared::{event_log::event, log_business_event};

use crate::error::ApiError;

/// 変換の結果
#[derive(Debug, Clone)]
pub struct LeadConversion {
   pub lead:     Lead,
   pub customer: Customer,
   /// 既存の顧客に紐付けた場合は `false`
   pub created:  bool,
}

/// リードユースケース
pub struct LeadUseCaseImpl {
   leads:     Arc<dyn LeadRepository>,
   customers: Arc<dyn CustomerRepository>,
   clock:     Arc<dyn Clock>,
}

impl LeadUseCaseImpl {
   pub fn new(
      leads: Arc<dyn LeadRepository>,
      customers: Arc<dyn CustomerRepository>,
      clock: Arc<dyn Clock>,
   ) -> Self {
      Self {
         leads,
         customers,
         clock,
      }
   }

   pub async fn list(
      &self,
      organization_id: &OrganizationId,
      query: &LeadQuery,
   ) -> Result<(Vec<Lead>, i64), ApiError> {
      Ok(self.leads.search(organization_id, query).await?)
   }

   pub async fn get(&self, organization_id: &OrganizationId, id: &LeadId) -> Result<Lead, ApiError> {
      self
         .leads
         .find_by_id(organization_id, id)
         .await?
         .ok_or_else(|| ApiError::NotFound(format!("リードが見つかりません: {id}")))
   }

   pub async fn create(
      &self,
      organization_id: &OrganizationId,
      input: LeadInput,
   ) -> Result<Lead, ApiError> {
      let profile = LeadProfile::try_from(input)?;
      let lead = Lead::new(LeadId::new(), organization_id.clone(), profile, self.clock.now());
      self.leads.insert(&lead).await?;
      Ok(lead)
   }

   pub async fn update(
      &self,
      organization_id: &OrganizationId,
      id: &LeadId,
      input: LeadInput,
   ) -> Result<Lead, ApiError> {
      let profile = LeadProfile::try_from(input)?;
      let lead = self
         .get(organization_id, id)
         .await?
         .with_profile(profile, self.clock.now())?;
      self.leads.update(&lead).await?;
      Ok(lead)
   }

   pub async fn change_status(
      &self,
      organization_id: &OrganizationId,
      id: &LeadId,
      status: LeadStatus,
   ) -> Result<Lead, ApiError> {
      let lead = self
         .get(organization_id, id)
         .await?
         .change_status(status, self.clock.now())?;
      self.leads.update(&lead).await?;
      Ok(lead)
   }

   pub async fn delete(&self, organization_id: &OrganizationId, id: &LeadId) -> Result<(), ApiError> {
      if !self.leads.delete(organization_id, id).await? {
         return Err(ApiError::NotFound(format!("リードが見つかりません: {id}")));
      }
      Ok(())
   }

   /// 顧客に変換する
   pub async fn convert(
      &self,
      organization_id: &OrganizationId,
      id: &LeadId,
   ) -> Result<LeadConversion, ApiError> {
      let lead = self.get(organization_id, id).await?;
      let now = self.clock.now();

      let existing = match lead.profile().email.as_ref() {
         Some(email) => self.customers.find_by_email(organization_id, email).await?,
         None => None,
      };
      let (customer, created) = match existing {
         Some(customer) => (customer, false),
         None => {
            let profile = CustomerProfile::try_from(lead.to_customer_input())?;
            (
               Customer::new(CustomerId::new(), organization_id.clone(), profile, now),
               true,
            )
         }
      };

      let lead = lead.convert(customer.id().clone(), now)?;
      self
         .leads
         .save_conversion(&lead, created.then_some(&customer))
         .await?;

      log_business_event!(
         event.category = event::category::LEAD,
         event.action = event::action::LEAD_CONVERTED,
         event.entity_type = event::entity_type::LEAD,
         event.entity_id = %lead.id(),
         event.organization_id = %organization_id,
         event.customer_id = %customer.id(),
         event.customer_created = created,
         event.result = event::result::SUCCESS,
         "リードを顧客に変換しました"
      );

      Ok(LeadConversion {
         lead,
         customer,
         created,
      })
   }
}

#[cfg(test)]
mod tests {
   use chrono::Utc;
   use kokyaku_domain::{clock::FixedClock, customer::customer_fixture};
   use kokyaku_infra::mock::{MockCustomerRepository, MockLeadRepository};
   use pretty_assertions::assert_eq;

   use super::*;

   struct Fixture {
      customers: MockCustomerRepository,
      leads:     MockLeadRepository,
      usecase:   LeadUseCaseImpl,
      org:       OrganizationId,
   }

   fn setup() -> Fixture {
      let customers = MockCustomerRepository::new();
      let leads = MockLeadRepository::new(customers.clone());
      Fixture {
         usecase: LeadUseCaseImpl::new(
            Arc::new(leads.clone()),
            Arc::new(customers.clone()),
            Arc::new(FixedClock::new(Utc::now())),
         ),
         customers,
         leads,
         org: OrganizationId::new(),
      }
   }

   fn input(email: Option<&str>) -> LeadInput {
      LeadInput {
         name: "佐藤 花子".to_string(),
         email: email.map(str::to_string),
         company: Some("佐藤工務店".to_string()),
         source: Some("展示会".to_string()),
         ..LeadInput::default()
      }
   }

   #[tokio::test]
   async fn test_リードを顧客に変換する() {
      let fixture = setup();
      let lead = fixture
         .usecase
         .create(&fixture.org, input(Some("hanako@example.com")))
         .await
         .unwrap();

      let conversion = fixture.usecase.convert(&fixture.org, lead.id()).await.unwrap();

      assert!(conversion.created);
      assert_eq!(conversion.lead.status(), LeadStatus::Converted);
      assert_eq!(conversion.lead.converted_customer_id(), Some(conversion.customer.id()));
      assert_eq!(conversion.customer.company(), Some("佐藤工務店"));
      assert_eq!(conversion.customer.notes(), Some("獲得経路: 展示会"));
      assert_eq!(fixture.customers.customers().len(), 1);
   }

   #[tokio::test]
   async fn test_同じメールアドレスの顧客がいれば紐付ける() {
      let fixture = setup();
      let existing =
         customer_fixture(&fixture.org, "佐藤 花子", Some("hanako@example.com"), None, None);
      fixture.customers.add_customer(existing.clone());
      let lead = fixture
         .usecase
         .create(&fixture.org, input(Some("Hanako@Example.com")))
         .await
         .unwrap();

      let conversion = fixture.usecase.convert(&fixture.org, lead.id()).await.unwrap();

      assert!(!conversion.created);
      assert_eq!(conversion.customer.id(), existing.id());
      assert_eq!(fixture.customers.customers().len(), 1);
   }

   #[tokio::test]
   async fn test_2回目の変換は409() {
      let fixture = setup();
      let lead = fixture.usecase.create(&fixture.org, input(None)).await.unwrap();
      fixture.usecase.convert(&fixture.org, lead.id()).await.unwrap();

      let result = fixture.usecase.convert(&fixture.org, lead.id()).await;

      assert!(matches!(result, Err(ApiError::Conflict(_))));
      assert_eq!(fixture.customers.customers().len(), 1);
   }

   #[tokio::test]
   async fn test_並行した変換の後着は顧客を作らずに409() {
      let fixture = setup();
      let lead = fixture
         .usecase
         .create(&fixture.org, input(Some("hanako@example.com")))
         .await
         .unwrap();
      let stale = fixture.usecase.get(&fixture.org, lead.id()).await.unwrap();
      fixture.usecase.convert(&fixture.org, lead.id()).await.unwrap();

      // 先の変換を見ずに作った顧客と変換
      let now = Utc::now();
      let duplicate =
         customer_fixture(&fixture.org, "佐藤 花子", Some("hanako2@example.com"), None, None);
      let converted = stale.convert(duplicate.id().clone(), now).unwrap();
      let result = fixture
         .leads
         .save_conversion(&converted, Some(&duplicate))
         .await;

      assert!(result.unwrap_err().as_conflict().is_some());
      assert_eq!(fixture.customers.customers().len(), 1);
   }

   #[tokio::test]
   async fn test_変換済みのリードは編集できない() {
      let fixture = setup();
      let lead = fixture.usecase.create(&fixture.org, input(None)).await.unwrap();
      fixture.usecase.convert(&fixture.org, lead.id()).await.unwrap();

      let result = fixture
         .usecase
         .update(&fixture.org, lead.id(), input(Some("new@example.com")))
         .await;

      assert!(matches!(result, Err(ApiError::Conflict(_))));
   }

   #[tokio::test]
   async fn test_ステータスを変更できる() {
      let fixture = setup();
      let lead = fixture.usecase.create(&fixture.org, input(None)).await.unwrap();

      let changed = fixture
         .usecase
         .change_status(&fixture.org, lead.id(), LeadStatus::Qualified)
         .await
         .unwrap();

      assert_eq!(changed.status(), LeadStatus::Qualified);
      let stored = fixture.usecase.get(&fixture.org, lead.id()).await.unwrap();
      assert_eq!(stored.status(), LeadStatus::Qualified);
   }

   #[tokio::test]
   async fn test_ステータス変更でconvertedにはできない() {
      let fixture = setup();
      let lead = fixture.usecase.create(&fixture.org, input(None)).await.unwrap();

      let result = fixture
         .usecase
         .change_status(&fixture.org, lead.id(), LeadStatus::Converted)
         .await;

      assert!(matches!(result, Err(ApiError::BadRequest(_))));
   }

   #[tokio::test]
   async fn test_ステータスで絞り込める() {
      let fixture = setup();
      let lead = fixture.usecase.create(&fixture.org, input(None)).await.unwrap();
      fixture.usecase.create(&fixture.org, input(None)).await.unwrap();
      fixture
         .usecase
         .change_status(&fixture.org, lead.id(), LeadStatus::Lost)
         .await
         .unwrap();
      let query = LeadQuery {
         status: Some(LeadStatus::Lost),
         ..LeadQuery::default()
      };

      let (leads, total) = fixture.usecase.list(&fixture.org, &query).await.unwrap();

      assert_eq!(total, 1);
      assert_eq!(leads[0].id(), lead.id());
   }
}
