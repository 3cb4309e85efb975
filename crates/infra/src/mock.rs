//! # テスト用モック
//!
//! ユースケース・ハンドラのテストで使用するインメモリ実装。
//! `test-utils` feature を有効にすることで、他クレートからも利用可能。
//!
//! ```toml
//! [dev-dependencies]
//! kokyaku-infra = { workspace = true, features = ["test-utils"] }
//! ```
//!
//! キャンペーン・受信者・ジョブ・顧客のモックは `Clone` で内部状態を共有する。
//! 送信キュー登録やイベント記録のように複数テーブルにまたがる操作は、
//! 関連するモックを渡して組み立てる。

use std::{
   collections::HashMap,
   sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kokyaku_domain::{
   campaign::{Campaign, CampaignId, CampaignStats, CampaignStatus, EngagementStats},
   campaign_recipient::{CampaignRecipient, CampaignRecipientId, RecipientStatus},
   customer::{Customer, CustomerId},
   email_job::{EmailJob, EmailJobStatus},
   email_settings::EmailSettings,
   lead::{Lead, LeadId, LeadStatus},
   mail::{MailError, OutgoingEmail},
   organization::{Invitation, Membership, OrgRole, Organization, OrganizationId},
   segment::{Segment, SegmentId},
   tag::{Tag, TagId},
   tracking::{EmailEvent, EmailEventType},
   user::{User, UserId},
   value_objects::Email,
};

use crate::{
   error::InfraError,
   google::{GoogleOAuthClient, GoogleOAuthError, GoogleTokens, GoogleUserInfo},
   mail::{EmailSender, EmailSenderFactory, SenderConfig},
   repository::{
      CampaignRecipientRepository,
      CampaignRepository,
      CustomerQuery,
      CustomerRepository,
      EmailEventRepository,
      EmailJobRepository,
      EmailSettingsRepository,
      InvitationRepository,
      LeadQuery,
      LeadRepository,
      MemberSummary,
      OrganizationRepository,
      OrganizationSummary,
      PageRequest,
      SegmentRepository,
      TagRepository,
      TagWithCount,
      UserRepository,
   },
   session::{OAuthState, SessionData, SessionManager},
};

fn paginate<T>(items: Vec<T>, page: PageRequest) -> (Vec<T>, i64) {
   let total = items.len() as i64;
   let items = items
      .into_iter()
      .skip(page.offset.max(0) as usize)
      .take(page.limit.max(0) as usize)
      .collect();
   (items, total)
}

fn contains_ignore_case(value: Option<&str>, q: &str) -> bool {
   value.is_some_and(|v| v.to_lowercase().contains(&q.to_lowercase()))
}

// ===== MockUserRepository =====

#[derive(Clone, Default)]
pub struct MockUserRepository {
   users:          Arc<Mutex<Vec<User>>>,
   refresh_tokens: Arc<Mutex<HashMap<UserId, String>>>,
}

impl MockUserRepository {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn add_user(&self, user: User, refresh_token: Option<&str>) {
      if let Some(token) = refresh_token {
         self
            .refresh_tokens
            .lock()
            .unwrap()
            .insert(user.id().clone(), token.to_string());
      }
      self.users.lock().unwrap().push(user);
   }
}

#[async_trait]
impl UserRepository for MockUserRepository {
   async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, InfraError> {
      Ok(self
         .users
         .lock()
         .unwrap()
         .iter()
         .find(|u| u.id() == id)
         .cloned())
   }

   async fn find_by_google_sub(&self, google_sub: &str) -> Result<Option<User>, InfraError> {
      Ok(self
         .users
         .lock()
         .unwrap()
         .iter()
         .find(|u| u.google_sub() == google_sub)
         .cloned())
   }

   async fn upsert_google_user(
      &self,
      user: &User,
      refresh_token: Option<&str>,
   ) -> Result<User, InfraError> {
      let mut users = self.users.lock().unwrap();
      let stored = match users.iter_mut().find(|u| u.google_sub() == user.google_sub()) {
         Some(existing) => {
            *existing = existing.clone().with_profile(
               user.email().clone(),
               user.name().clone(),
               user.avatar_url().map(str::to_string),
               user.updated_at(),
            );
            existing.clone()
         }
         None => {
            users.push(user.clone());
            user.clone()
         }
      };
      if let Some(token) = refresh_token {
         self
            .refresh_tokens
            .lock()
            .unwrap()
            .insert(stored.id().clone(), token.to_string());
      }
      Ok(stored)
   }

   async fn find_refresh_token(&self, id: &UserId) -> Result<Option<String>, InfraError> {
      Ok(self.refresh_tokens.lock().unwrap().get(id).cloned())
   }
}

// ===== MockOrganizationRepository =====

#[derive(Clone, Default)]
pub struct MockOrganizationRepository {
   organizations: Arc<Mutex<Vec<Organization>>>,
   memberships:   Arc<Mutex<Vec<Membership>>>,
   users:         MockUserRepository,
}

impl MockOrganizationRepository {
   /// メンバー一覧でユーザー情報を引くため、ユーザーのモックを共有する
   pub fn new(users: MockUserRepository) -> Self {
      Self {
         users,
         ..Self::default()
      }
   }

   pub fn add_organization(&self, organization: Organization) {
      self.organizations.lock().unwrap().push(organization);
   }

   pub fn add_membership(&self, membership: Membership) {
      self.memberships.lock().unwrap().push(membership);
   }

   pub fn memberships(&self) -> Vec<Membership> {
      self.memberships.lock().unwrap().clone()
   }
}

#[async_trait]
impl OrganizationRepository for MockOrganizationRepository {
   async fn find_by_id(&self, id: &OrganizationId) -> Result<Option<Organization>, InfraError> {
      Ok(self
         .organizations
         .lock()
         .unwrap()
         .iter()
         .find(|o| o.id() == id)
         .cloned())
   }

   async fn update(&self, organization: &Organization) -> Result<(), InfraError> {
      let mut organizations = self.organizations.lock().unwrap();
      if let Some(existing) = organizations.iter_mut().find(|o| o.id() == organization.id()) {
         *existing = organization.clone();
      }
      Ok(())
   }

   async fn create_with_owner(
      &self,
      organization: &Organization,
      owner: &Membership,
   ) -> Result<(), InfraError> {
      self.add_organization(organization.clone());
      self.add_membership(owner.clone());
      Ok(())
   }

   async fn find_membership(
      &self,
      organization_id: &OrganizationId,
      user_id: &UserId,
   ) -> Result<Option<Membership>, InfraError> {
      Ok(self
         .memberships
         .lock()
         .unwrap()
         .iter()
         .find(|m| m.organization_id() == organization_id && m.user_id() == user_id)
         .cloned())
   }

   async fn list_for_user(
      &self,
      user_id: &UserId,
   ) -> Result<Vec<OrganizationSummary>, InfraError> {
      let organizations = self.organizations.lock().unwrap();
      let mut memberships: Vec<Membership> = self
         .memberships
         .lock()
         .unwrap()
         .iter()
         .filter(|m| m.user_id() == user_id)
         .cloned()
         .collect();
      memberships.sort_by_key(|m| std::cmp::Reverse(m.created_at()));
      Ok(memberships
         .iter()
         .filter_map(|m| {
            organizations
               .iter()
               .find(|o| o.id() == m.organization_id())
               .map(|o| OrganizationSummary {
                  organization: o.clone(),
                  role:         m.role(),
               })
         })
         .collect())
   }

   async fn list_members(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Vec<MemberSummary>, InfraError> {
      let users = self.users.users.lock().unwrap();
      Ok(self
         .memberships
         .lock()
         .unwrap()
         .iter()
         .filter(|m| m.organization_id() == organization_id)
         .filter_map(|m| {
            users.iter().find(|u| u.id() == m.user_id()).map(|u| MemberSummary {
               user_id:    u.id().clone(),
               email:      u.email().as_str().to_string(),
               name:       u.name().as_str().to_string(),
               avatar_url: u.avatar_url().map(str::to_string),
               role:       m.role(),
               joined_at:  m.created_at(),
            })
         })
         .collect())
   }

   async fn update_member_role(
      &self,
      organization_id: &OrganizationId,
      user_id: &UserId,
      role: OrgRole,
   ) -> Result<(), InfraError> {
      let mut memberships = self.memberships.lock().unwrap();
      let owners = owner_count(&memberships, organization_id);
      let Some(m) = memberships
         .iter_mut()
         .find(|m| m.organization_id() == organization_id && m.user_id() == user_id)
      else {
         return Err(InfraError::conflict("Membership", user_id.to_string()));
      };
      if m.role() == OrgRole::Owner && role != OrgRole::Owner && owners <= 1 {
         return Err(InfraError::conflict("Membership", user_id.to_string()));
      }
      *m = Membership::new(organization_id.clone(), user_id.clone(), role, m.created_at());
      Ok(())
   }

   async fn delete_membership(
      &self,
      organization_id: &OrganizationId,
      user_id: &UserId,
   ) -> Result<(), InfraError> {
      let mut memberships = self.memberships.lock().unwrap();
      let owners = owner_count(&memberships, organization_id);
      let Some(index) = memberships
         .iter()
         .position(|m| m.organization_id() == organization_id && m.user_id() == user_id)
      else {
         return Err(InfraError::conflict("Membership", user_id.to_string()));
      };
      if memberships[index].role() == OrgRole::Owner && owners <= 1 {
         return Err(InfraError::conflict("Membership", user_id.to_string()));
      }
      memberships.remove(index);
      Ok(())
   }

   async fn count_owners(&self, organization_id: &OrganizationId) -> Result<i64, InfraError> {
      Ok(owner_count(&self.memberships.lock().unwrap(), organization_id))
   }
}

fn owner_count(memberships: &[Membership], organization_id: &OrganizationId) -> i64 {
   memberships
      .iter()
      .filter(|m| m.organization_id() == organization_id && m.role() == OrgRole::Owner)
      .count() as i64
}

// ===== MockInvitationRepository =====

#[derive(Clone, Default)]
pub struct MockInvitationRepository {
   invitations:   Arc<Mutex<Vec<Invitation>>>,
   organizations: MockOrganizationRepository,
}

impl MockInvitationRepository {
   /// 招待の承諾でメンバーシップを作るため、組織のモックを共有する
   pub fn new(organizations: MockOrganizationRepository) -> Self {
      Self {
         invitations: Arc::default(),
         organizations,
      }
   }

   pub fn invitations(&self) -> Vec<Invitation> {
      self.invitations.lock().unwrap().clone()
   }
}

#[async_trait]
impl InvitationRepository for MockInvitationRepository {
   async fn insert(&self, invitation: &Invitation) -> Result<(), InfraError> {
      let mut invitations = self.invitations.lock().unwrap();
      let duplicated = invitations.iter().any(|i| {
         i.organization_id() == invitation.organization_id()
            && i.email() == invitation.email()
            && i.accepted_at().is_none()
      });
      if duplicated {
         return Err(InfraError::conflict("Invitation", invitation.email().as_str()));
      }
      invitations.push(invitation.clone());
      Ok(())
   }

   async fn find_pending_by_email(
      &self,
      email: &Email,
      now: DateTime<Utc>,
   ) -> Result<Vec<Invitation>, InfraError> {
      Ok(self
         .invitations
         .lock()
         .unwrap()
         .iter()
         .filter(|i| i.email() == email && i.is_pending(now))
         .cloned()
         .collect())
   }

   async fn list_pending(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Vec<Invitation>, InfraError> {
      let now = Utc::now();
      Ok(self
         .invitations
         .lock()
         .unwrap()
         .iter()
         .filter(|i| i.organization_id() == organization_id && i.is_pending(now))
         .cloned()
         .collect())
   }

   async fn accept(
      &self,
      invitation: &Invitation,
      user_id: &UserId,
      now: DateTime<Utc>,
   ) -> Result<(), InfraError> {
      let already_member = self
         .organizations
         .find_membership(invitation.organization_id(), user_id)
         .await?
         .is_some();
      if !already_member {
         self.organizations.add_membership(Membership::new(
            invitation.organization_id().clone(),
            user_id.clone(),
            invitation.role(),
            now,
         ));
      }
      let mut invitations = self.invitations.lock().unwrap();
      if let Some(i) = invitations.iter_mut().find(|i| i.id() == invitation.id()) {
         *i = Invitation::from_db(
            i.id().clone(),
            i.organization_id().clone(),
            i.email().clone(),
            i.role(),
            i.invited_by().clone(),
            i.created_at(),
            i.expires_at(),
            Some(now),
         );
      }
      Ok(())
   }
}

// ===== MockCustomerRepository =====

#[derive(Clone, Default)]
pub struct MockCustomerRepository {
   customers: Arc<Mutex<Vec<Customer>>>,
}

impl MockCustomerRepository {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn add_customer(&self, customer: Customer) {
      self.customers.lock().unwrap().push(customer);
   }

   pub fn customers(&self) -> Vec<Customer> {
      self.customers.lock().unwrap().clone()
   }

   fn email_taken(customers: &[Customer], customer: &Customer) -> bool {
      customer.email().is_some_and(|email| {
         customers.iter().any(|c| {
            c.organization_id() == customer.organization_id()
               && c.id() != customer.id()
               && c.email() == Some(email)
         })
      })
   }
}

#[async_trait]
impl CustomerRepository for MockCustomerRepository {
   async fn search(
      &self,
      organization_id: &OrganizationId,
      query: &CustomerQuery,
   ) -> Result<(Vec<Customer>, i64), InfraError> {
      let mut matched: Vec<Customer> = self
         .customers
         .lock()
         .unwrap()
         .iter()
         .filter(|c| c.organization_id() == organization_id)
         .filter(|c| {
            query.q.as_deref().is_none_or(|q| {
               contains_ignore_case(Some(c.name().as_str()), q)
                  || contains_ignore_case(c.email().map(Email::as_str), q)
                  || contains_ignore_case(c.company(), q)
            })
         })
         .filter(|c| query.city.as_deref().is_none_or(|city| c.city() == Some(city)))
         .filter(|c| {
            query
               .category
               .as_deref()
               .is_none_or(|category| c.category() == Some(category))
         })
         .filter(|c| query.tag_id.as_ref().is_none_or(|t| c.tag_ids().contains(t)))
         .cloned()
         .collect();
      matched.sort_by_key(|c| std::cmp::Reverse(c.created_at()));
      Ok(paginate(matched, query.page))
   }

   async fn find_by_id(
      &self,
      organization_id: &OrganizationId,
      id: &CustomerId,
   ) -> Result<Option<Customer>, InfraError> {
      Ok(self
         .customers
         .lock()
         .unwrap()
         .iter()
         .find(|c| c.organization_id() == organization_id && c.id() == id)
         .cloned())
   }

   async fn find_by_email(
      &self,
      organization_id: &OrganizationId,
      email: &Email,
   ) -> Result<Option<Customer>, InfraError> {
      Ok(self
         .customers
         .lock()
         .unwrap()
         .iter()
         .find(|c| c.organization_id() == organization_id && c.email() == Some(email))
         .cloned())
   }

   async fn find_all_mailable(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Vec<Customer>, InfraError> {
      Ok(self
         .customers
         .lock()
         .unwrap()
         .iter()
         .filter(|c| c.organization_id() == organization_id && c.is_mailable())
         .cloned()
         .collect())
   }

   async fn insert(&self, customer: &Customer) -> Result<(), InfraError> {
      let mut customers = self.customers.lock().unwrap();
      if Self::email_taken(&customers, customer) {
         return Err(InfraError::conflict(
            "Customer",
            customer.email().map(Email::as_str).unwrap_or_default(),
         ));
      }
      customers.push(customer.clone());
      Ok(())
   }

   async fn update(&self, customer: &Customer) -> Result<(), InfraError> {
      let mut customers = self.customers.lock().unwrap();
      if Self::email_taken(&customers, customer) {
         return Err(InfraError::conflict(
            "Customer",
            customer.email().map(Email::as_str).unwrap_or_default(),
         ));
      }
      if let Some(existing) = customers.iter_mut().find(|c| c.id() == customer.id()) {
         *existing = customer.clone();
      }
      Ok(())
   }

   async fn replace_tags(&self, customer: &Customer) -> Result<(), InfraError> {
      let mut customers = self.customers.lock().unwrap();
      if let Some(existing) = customers.iter_mut().find(|c| c.id() == customer.id()) {
         *existing = existing
            .clone()
            .with_tags(customer.tag_ids().to_vec(), customer.updated_at());
      }
      Ok(())
   }

   async fn delete(
      &self,
      organization_id: &OrganizationId,
      id: &CustomerId,
   ) -> Result<bool, InfraError> {
      let mut customers = self.customers.lock().unwrap();
      let before = customers.len();
      customers.retain(|c| !(c.organization_id() == organization_id && c.id() == id));
      Ok(customers.len() < before)
   }

   async fn distinct_cities(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Vec<String>, InfraError> {
      let mut values: Vec<String> = self
         .customers
         .lock()
         .unwrap()
         .iter()
         .filter(|c| c.organization_id() == organization_id)
         .filter_map(|c| c.city().map(str::to_string))
         .collect();
      values.sort();
      values.dedup();
      Ok(values)
   }

   async fn distinct_categories(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Vec<String>, InfraError> {
      let mut values: Vec<String> = self
         .customers
         .lock()
         .unwrap()
         .iter()
         .filter(|c| c.organization_id() == organization_id)
         .filter_map(|c| c.category().map(str::to_string))
         .collect();
      values.sort();
      values.dedup();
      Ok(values)
   }
}

// ===== MockLeadRepository =====

#[derive(Clone, Default)]
pub struct MockLeadRepository {
   leads:     Arc<Mutex<Vec<Lead>>>,
   customers: MockCustomerRepository,
}

impl MockLeadRepository {
   /// 変換時に顧客を作るため、顧客のモックを共有する
   pub fn new(customers: MockCustomerRepository) -> Self {
      Self {
         leads: Arc::default(),
         customers,
      }
   }

   pub fn add_lead(&self, lead: Lead) {
      self.leads.lock().unwrap().push(lead);
   }
}

#[async_trait]
impl LeadRepository for MockLeadRepository {
   async fn search(
      &self,
      organization_id: &OrganizationId,
      query: &LeadQuery,
   ) -> Result<(Vec<Lead>, i64), InfraError> {
      let mut matched: Vec<Lead> = self
         .leads
         .lock()
         .unwrap()
         .iter()
         .filter(|l| l.organization_id() == organization_id)
         .filter(|l| query.status.is_none_or(|s| l.status() == s))
         .filter(|l| {
            query.q.as_deref().is_none_or(|q| {
               contains_ignore_case(Some(l.profile().name.as_str()), q)
                  || contains_ignore_case(l.profile().email.as_ref().map(Email::as_str), q)
                  || contains_ignore_case(l.profile().company.as_deref(), q)
            })
         })
         .cloned()
         .collect();
      matched.sort_by_key(|l| std::cmp::Reverse(l.created_at()));
      Ok(paginate(matched, query.page))
   }

   async fn find_by_id(
      &self,
      organization_id: &OrganizationId,
      id: &LeadId,
   ) -> Result<Option<Lead>, InfraError> {
      Ok(self
         .leads
         .lock()
         .unwrap()
         .iter()
         .find(|l| l.organization_id() == organization_id && l.id() == id)
         .cloned())
   }

   async fn insert(&self, lead: &Lead) -> Result<(), InfraError> {
      self.add_lead(lead.clone());
      Ok(())
   }

   async fn update(&self, lead: &Lead) -> Result<(), InfraError> {
      let mut leads = self.leads.lock().unwrap();
      if let Some(existing) = leads.iter_mut().find(|l| l.id() == lead.id()) {
         *existing = lead.clone();
      }
      Ok(())
   }

   async fn delete(
      &self,
      organization_id: &OrganizationId,
      id: &LeadId,
   ) -> Result<bool, InfraError> {
      let mut leads = self.leads.lock().unwrap();
      let before = leads.len();
      leads.retain(|l| !(l.organization_id() == organization_id && l.id() == id));
      Ok(leads.len() < before)
   }

   async fn save_conversion(
      &self,
      lead: &Lead,
      new_customer: Option<&Customer>,
   ) -> Result<(), InfraError> {
      let converted = self
         .leads
         .lock()
         .unwrap()
         .iter()
         .any(|l| l.id() == lead.id() && l.status() == LeadStatus::Converted);
      if converted {
         return Err(InfraError::conflict("Lead", lead.id().to_string()));
      }
      if let Some(customer) = new_customer {
         self.customers.insert(customer).await?;
      }
      self.update(lead).await
   }
}

// ===== MockTagRepository =====

#[derive(Clone, Default)]
pub struct MockTagRepository {
   tags:      Arc<Mutex<Vec<Tag>>>,
   customers: MockCustomerRepository,
}

impl MockTagRepository {
   /// 顧客数の集計のため、顧客のモックを共有する
   pub fn new(customers: MockCustomerRepository) -> Self {
      Self {
         tags: Arc::default(),
         customers,
      }
   }

   pub fn add_tag(&self, tag: Tag) {
      self.tags.lock().unwrap().push(tag);
   }

   fn name_taken(tags: &[Tag], tag: &Tag) -> bool {
      tags.iter().any(|t| {
         t.organization_id() == tag.organization_id()
            && t.id() != tag.id()
            && t.name().as_str().eq_ignore_ascii_case(tag.name().as_str())
      })
   }
}

#[async_trait]
impl TagRepository for MockTagRepository {
   async fn list_with_counts(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Vec<TagWithCount>, InfraError> {
      let customers = self.customers.customers();
      let mut tags: Vec<TagWithCount> = self
         .tags
         .lock()
         .unwrap()
         .iter()
         .filter(|t| t.organization_id() == organization_id)
         .map(|t| TagWithCount {
            customer_count: customers
               .iter()
               .filter(|c| c.tag_ids().contains(t.id()))
               .count() as i64,
            tag:            t.clone(),
         })
         .collect();
      tags.sort_by_key(|t| t.tag.name().as_str().to_lowercase());
      Ok(tags)
   }

   async fn find_by_id(
      &self,
      organization_id: &OrganizationId,
      id: &TagId,
   ) -> Result<Option<Tag>, InfraError> {
      Ok(self
         .tags
         .lock()
         .unwrap()
         .iter()
         .find(|t| t.organization_id() == organization_id && t.id() == id)
         .cloned())
   }

   async fn find_by_ids(
      &self,
      organization_id: &OrganizationId,
      ids: &[TagId],
   ) -> Result<Vec<Tag>, InfraError> {
      Ok(self
         .tags
         .lock()
         .unwrap()
         .iter()
         .filter(|t| t.organization_id() == organization_id && ids.contains(t.id()))
         .cloned()
         .collect())
   }

   async fn insert(&self, tag: &Tag) -> Result<(), InfraError> {
      let mut tags = self.tags.lock().unwrap();
      if Self::name_taken(&tags, tag) {
         return Err(InfraError::conflict("Tag", tag.name().as_str()));
      }
      tags.push(tag.clone());
      Ok(())
   }

   async fn update(&self, tag: &Tag) -> Result<(), InfraError> {
      let mut tags = self.tags.lock().unwrap();
      if Self::name_taken(&tags, tag) {
         return Err(InfraError::conflict("Tag", tag.name().as_str()));
      }
      if let Some(existing) = tags.iter_mut().find(|t| t.id() == tag.id()) {
         *existing = tag.clone();
      }
      Ok(())
   }

   async fn delete(&self, organization_id: &OrganizationId, id: &TagId) -> Result<bool, InfraError> {
      let mut tags = self.tags.lock().unwrap();
      let before = tags.len();
      tags.retain(|t| !(t.organization_id() == organization_id && t.id() == id));
      Ok(tags.len() < before)
   }
}

// ===== MockSegmentRepository =====

#[derive(Clone, Default)]
pub struct MockSegmentRepository {
   segments: Arc<Mutex<Vec<Segment>>>,
}

impl MockSegmentRepository {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn add_segment(&self, segment: Segment) {
      self.segments.lock().unwrap().push(segment);
   }
}

#[async_trait]
impl SegmentRepository for MockSegmentRepository {
   async fn list(&self, organization_id: &OrganizationId) -> Result<Vec<Segment>, InfraError> {
      let mut segments: Vec<Segment> = self
         .segments
         .lock()
         .unwrap()
         .iter()
         .filter(|s| s.organization_id() == organization_id)
         .cloned()
         .collect();
      segments.sort_by_key(|s| s.name().as_str().to_lowercase());
      Ok(segments)
   }

   async fn find_by_id(
      &self,
      organization_id: &OrganizationId,
      id: &SegmentId,
   ) -> Result<Option<Segment>, InfraError> {
      Ok(self
         .segments
         .lock()
         .unwrap()
         .iter()
         .find(|s| s.organization_id() == organization_id && s.id() == id)
         .cloned())
   }

   async fn find_by_ids(
      &self,
      organization_id: &OrganizationId,
      ids: &[SegmentId],
   ) -> Result<Vec<Segment>, InfraError> {
      Ok(self
         .segments
         .lock()
         .unwrap()
         .iter()
         .filter(|s| s.organization_id() == organization_id && ids.contains(s.id()))
         .cloned()
         .collect())
   }

   async fn insert(&self, segment: &Segment) -> Result<(), InfraError> {
      self.add_segment(segment.clone());
      Ok(())
   }

   async fn update(&self, segment: &Segment) -> Result<(), InfraError> {
      let mut segments = self.segments.lock().unwrap();
      if let Some(existing) = segments.iter_mut().find(|s| s.id() == segment.id()) {
         *existing = segment.clone();
      }
      Ok(())
   }

   async fn delete(
      &self,
      organization_id: &OrganizationId,
      id: &SegmentId,
   ) -> Result<bool, InfraError> {
      let mut segments = self.segments.lock().unwrap();
      let before = segments.len();
      segments.retain(|s| !(s.organization_id() == organization_id && s.id() == id));
      Ok(segments.len() < before)
   }
}

// ===== MockEmailJobRepository =====

#[derive(Clone, Default)]
pub struct MockEmailJobRepository {
   jobs: Arc<Mutex<Vec<EmailJob>>>,
}

impl MockEmailJobRepository {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn add_job(&self, job: EmailJob) {
      self.jobs.lock().unwrap().push(job);
   }

   fn has_active_job(&self, campaign_id: &CampaignId) -> bool {
      self.jobs.lock().unwrap().iter().any(|j| {
         j.campaign_id() == campaign_id
            && matches!(j.status(), EmailJobStatus::Pending | EmailJobStatus::Processing)
      })
   }

   pub fn jobs(&self) -> Vec<EmailJob> {
      self.jobs.lock().unwrap().clone()
   }

   /// ワーカーを通さずにジョブの状態を置き換える
   pub fn put(&self, job: EmailJob) {
      let mut jobs = self.jobs.lock().unwrap();
      if let Some(existing) = jobs.iter_mut().find(|j| j.id() == job.id()) {
         *existing = job;
      }
   }
}

#[async_trait]
impl EmailJobRepository for MockEmailJobRepository {
   async fn insert(&self, job: &EmailJob) -> Result<(), InfraError> {
      self.add_job(job.clone());
      Ok(())
   }

   async fn claim_due(
      &self,
      now: DateTime<Utc>,
      stale_before: DateTime<Utc>,
      limit: i64,
   ) -> Result<Vec<EmailJob>, InfraError> {
      let mut jobs = self.jobs.lock().unwrap();
      let mut due: Vec<usize> = jobs
         .iter()
         .enumerate()
         .filter(|(_, j)| match j.status() {
            EmailJobStatus::Pending => j.run_after() <= now,
            EmailJobStatus::Processing => j.locked_at().is_none_or(|l| l < stale_before),
            _ => false,
         })
         .map(|(i, _)| i)
         .collect();
      due.sort_by_key(|&i| jobs[i].run_after());
      due.truncate(limit.max(0) as usize);

      Ok(due
         .into_iter()
         .map(|i| {
            jobs[i] = jobs[i].clone().claimed(now);
            jobs[i].clone()
         })
         .collect())
   }

   async fn update(&self, job: &EmailJob, lease: DateTime<Utc>) -> Result<(), InfraError> {
      let mut jobs = self.jobs.lock().unwrap();
      let Some(existing) = jobs.iter_mut().find(|j| {
         j.id() == job.id()
            && j.status() == EmailJobStatus::Processing
            && j.locked_at() == Some(lease)
      }) else {
         return Err(InfraError::conflict("EmailJob", job.id().to_string()));
      };
      *existing = job.clone();
      Ok(())
   }

   async fn find_by_campaign(
      &self,
      organization_id: &OrganizationId,
      campaign_id: &CampaignId,
   ) -> Result<Vec<EmailJob>, InfraError> {
      Ok(self
         .jobs
         .lock()
         .unwrap()
         .iter()
         .filter(|j| j.organization_id() == organization_id && j.campaign_id() == campaign_id)
         .cloned()
         .collect())
   }
}

// ===== MockCampaignRecipientRepository =====

#[derive(Clone, Default)]
pub struct MockCampaignRecipientRepository {
   recipients: Arc<Mutex<Vec<CampaignRecipient>>>,
}

impl MockCampaignRecipientRepository {
   pub fn new() -> Self {
      Self::default()
   }

   /// (campaign_id, email) が重複する受信者は追加しない
   pub fn add_recipients(&self, new: &[CampaignRecipient]) {
      let mut recipients = self.recipients.lock().unwrap();
      for r in new {
         let duplicated = recipients
            .iter()
            .any(|e| e.campaign_id() == r.campaign_id() && e.email() == r.email());
         if !duplicated {
            recipients.push(r.clone());
         }
      }
   }

   pub fn recipients(&self) -> Vec<CampaignRecipient> {
      self.recipients.lock().unwrap().clone()
   }

   /// ワーカーを通さずに受信者の状態を置き換える
   pub fn put(&self, recipient: CampaignRecipient) {
      let mut recipients = self.recipients.lock().unwrap();
      if let Some(existing) = recipients.iter_mut().find(|r| r.id() == recipient.id()) {
         *existing = recipient;
      }
   }
}

#[async_trait]
impl CampaignRecipientRepository for MockCampaignRecipientRepository {
   async fn search(
      &self,
      organization_id: &OrganizationId,
      campaign_id: &CampaignId,
      status: Option<RecipientStatus>,
      page: PageRequest,
   ) -> Result<(Vec<CampaignRecipient>, i64), InfraError> {
      let matched: Vec<CampaignRecipient> = self
         .recipients
         .lock()
         .unwrap()
         .iter()
         .filter(|r| r.organization_id() == organization_id && r.campaign_id() == campaign_id)
         .filter(|r| status.is_none_or(|s| r.status() == s))
         .cloned()
         .collect();
      Ok(paginate(matched, page))
   }

   async fn find_pending(
      &self,
      organization_id: &OrganizationId,
      campaign_id: &CampaignId,
      limit: i64,
   ) -> Result<Vec<CampaignRecipient>, InfraError> {
      Ok(self
         .recipients
         .lock()
         .unwrap()
         .iter()
         .filter(|r| {
            r.organization_id() == organization_id
               && r.campaign_id() == campaign_id
               && r.status() == RecipientStatus::Pending
         })
         .take(limit.max(0) as usize)
         .cloned()
         .collect())
   }

   async fn update_delivery(&self, recipient: &CampaignRecipient) -> Result<(), InfraError> {
      let mut recipients = self.recipients.lock().unwrap();
      let Some(existing) = recipients
         .iter_mut()
         .find(|r| r.id() == recipient.id() && r.status() == RecipientStatus::Pending)
      else {
         return Err(InfraError::conflict("CampaignRecipient", recipient.id().to_string()));
      };
      *existing = recipient.clone();
      Ok(())
   }

   async fn find_for_tracking(
      &self,
      id: &CampaignRecipientId,
   ) -> Result<Option<CampaignRecipient>, InfraError> {
      Ok(self
         .recipients
         .lock()
         .unwrap()
         .iter()
         .find(|r| r.id() == id)
         .cloned())
   }
}

// ===== MockCampaignRepository =====

#[derive(Clone, Default)]
pub struct MockCampaignRepository {
   campaigns:  Arc<Mutex<Vec<Campaign>>>,
   recipients: MockCampaignRecipientRepository,
   jobs:       MockEmailJobRepository,
}

impl MockCampaignRepository {
   /// 送信キュー登録と集計のため、受信者とジョブのモックを共有する
   pub fn new(recipients: MockCampaignRecipientRepository, jobs: MockEmailJobRepository) -> Self {
      Self {
         campaigns: Arc::default(),
         recipients,
         jobs,
      }
   }

   pub fn add_campaign(&self, campaign: Campaign) {
      self.campaigns.lock().unwrap().push(campaign);
   }

   /// 保存済みのステータスを確認せずにキャンペーンを置き換える
   pub fn put(&self, campaign: Campaign) {
      let mut campaigns = self.campaigns.lock().unwrap();
      if let Some(existing) = campaigns.iter_mut().find(|c| c.id() == campaign.id()) {
         *existing = campaign;
      }
   }

   fn replace_if(&self, campaign: &Campaign, expected: CampaignStatus) -> Result<(), InfraError> {
      let mut campaigns = self.campaigns.lock().unwrap();
      let Some(existing) = campaigns
         .iter_mut()
         .find(|c| c.id() == campaign.id() && c.status() == expected)
      else {
         return Err(InfraError::conflict("Campaign", campaign.id().to_string()));
      };
      *existing = campaign.clone();
      Ok(())
   }

   pub fn get(&self, id: &CampaignId) -> Option<Campaign> {
      self
         .campaigns
         .lock()
         .unwrap()
         .iter()
         .find(|c| c.id() == id)
         .cloned()
   }

   fn stats_of(&self, id: &CampaignId) -> CampaignStats {
      let recipients = self.recipients.recipients();
      let count = |status: RecipientStatus| {
         recipients
            .iter()
            .filter(|r| r.campaign_id() == id && r.status() == status)
            .count() as i64
      };
      CampaignStats {
         total:   recipients.iter().filter(|r| r.campaign_id() == id).count() as i64,
         pending: count(RecipientStatus::Pending),
         sent:    count(RecipientStatus::Sent),
         failed:  count(RecipientStatus::Failed),
         skipped: count(RecipientStatus::Skipped),
      }
   }
}

#[async_trait]
impl CampaignRepository for MockCampaignRepository {
   async fn search(
      &self,
      organization_id: &OrganizationId,
      status: Option<CampaignStatus>,
      page: PageRequest,
   ) -> Result<(Vec<Campaign>, i64), InfraError> {
      let mut matched: Vec<Campaign> = self
         .campaigns
         .lock()
         .unwrap()
         .iter()
         .filter(|c| c.organization_id() == organization_id)
         .filter(|c| status.is_none_or(|s| c.status() == s))
         .cloned()
         .collect();
      matched.sort_by_key(|c| std::cmp::Reverse(c.created_at()));
      Ok(paginate(matched, page))
   }

   async fn find_by_id(
      &self,
      organization_id: &OrganizationId,
      id: &CampaignId,
   ) -> Result<Option<Campaign>, InfraError> {
      Ok(self
         .get(id)
         .filter(|c| c.organization_id() == organization_id))
   }

   async fn insert(&self, campaign: &Campaign) -> Result<(), InfraError> {
      self.add_campaign(campaign.clone());
      Ok(())
   }

   async fn update(&self, campaign: &Campaign, expected: CampaignStatus) -> Result<(), InfraError> {
      self.replace_if(campaign, expected)
   }

   async fn delete(
      &self,
      organization_id: &OrganizationId,
      id: &CampaignId,
   ) -> Result<bool, InfraError> {
      let mut campaigns = self.campaigns.lock().unwrap();
      let before = campaigns.len();
      campaigns.retain(|c| {
         !(c.organization_id() == organization_id && c.id() == id && c.status().is_deletable())
      });
      Ok(campaigns.len() < before)
   }

   async fn queue_send(
      &self,
      campaign: &Campaign,
      recipients: &[CampaignRecipient],
      job: &EmailJob,
   ) -> Result<(), InfraError> {
      if self.jobs.has_active_job(campaign.id()) {
         return Err(InfraError::conflict("EmailJob", campaign.id().to_string()));
      }
      self.replace_if(campaign, CampaignStatus::Draft)?;
      self.recipients.add_recipients(recipients);
      self.jobs.add_job(job.clone());
      Ok(())
   }

   async fn cancel_send(
      &self,
      campaign: &Campaign,
      expected: CampaignStatus,
   ) -> Result<(), InfraError> {
      let now = campaign.updated_at();
      self.replace_if(campaign, expected)?;
      for job in self.jobs.jobs() {
         let active = matches!(
            job.status(),
            EmailJobStatus::Pending | EmailJobStatus::Processing
         );
         if job.campaign_id() == campaign.id() && active {
            self.jobs.put(job.cancel(now));
         }
      }
      for r in self.recipients.recipients() {
         if r.campaign_id() == campaign.id() && r.status() == RecipientStatus::Pending {
            self
               .recipients
               .put(r.mark_skipped("キャンペーンがキャンセルされました", now));
         }
      }
      Ok(())
   }

   async fn refresh_stats(
      &self,
      _organization_id: &OrganizationId,
      id: &CampaignId,
   ) -> Result<CampaignStats, InfraError> {
      let stats = self.stats_of(id);
      let mut campaigns = self.campaigns.lock().unwrap();
      if let Some(existing) = campaigns.iter_mut().find(|c| c.id() == id) {
         *existing = existing.clone().with_stats(stats, existing.updated_at());
      }
      Ok(stats)
   }

   async fn engagement(
      &self,
      _organization_id: &OrganizationId,
      id: &CampaignId,
   ) -> Result<EngagementStats, InfraError> {
      let recipients = self.recipients.recipients();
      let of_campaign = || recipients.iter().filter(|r| r.campaign_id() == id);
      Ok(EngagementStats {
         opened:       of_campaign()
            .filter(|r| r.engagement().opened_at.is_some())
            .count() as i64,
         clicked:      of_campaign()
            .filter(|r| r.engagement().clicked_at.is_some())
            .count() as i64,
         unsubscribed: of_campaign()
            .filter(|r| r.engagement().unsubscribed_at.is_some())
            .count() as i64,
      })
   }
}

// ===== MockEmailSettingsRepository =====

#[derive(Clone, Default)]
pub struct MockEmailSettingsRepository {
   settings: Arc<Mutex<Vec<EmailSettings>>>,
}

impl MockEmailSettingsRepository {
   pub fn new() -> Self {
      Self::default()
   }
}

#[async_trait]
impl EmailSettingsRepository for MockEmailSettingsRepository {
   async fn find(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Option<EmailSettings>, InfraError> {
      Ok(self
         .settings
         .lock()
         .unwrap()
         .iter()
         .find(|s| s.organization_id() == organization_id)
         .cloned())
   }

   async fn upsert(&self, settings: &EmailSettings) -> Result<(), InfraError> {
      let mut stored = self.settings.lock().unwrap();
      stored.retain(|s| s.organization_id() != settings.organization_id());
      stored.push(settings.clone());
      Ok(())
   }
}

// ===== MockEmailEventRepository =====

#[derive(Clone, Default)]
pub struct MockEmailEventRepository {
   events:     Arc<Mutex<Vec<EmailEvent>>>,
   recipients: MockCampaignRecipientRepository,
   customers:  MockCustomerRepository,
}

impl MockEmailEventRepository {
   /// 受信者の集計列と顧客の配信停止を更新するため、それぞれのモックを共有する
   pub fn new(recipients: MockCampaignRecipientRepository, customers: MockCustomerRepository) -> Self {
      Self {
         events: Arc::default(),
         recipients,
         customers,
      }
   }

   pub fn events(&self) -> Vec<EmailEvent> {
      self.events.lock().unwrap().clone()
   }
}

#[async_trait]
impl EmailEventRepository for MockEmailEventRepository {
   async fn record(&self, event: &EmailEvent) -> Result<bool, InfraError> {
      let Some(recipient) = self.recipients.find_for_tracking(&event.recipient_id).await? else {
         return Ok(false);
      };
      let now = event.occurred_at;
      let updated = match event.event_type {
         EmailEventType::Open => recipient.record_open(now),
         EmailEventType::Click => recipient.record_click(now),
         EmailEventType::Unsubscribe => {
            let mut customers = self.customers.customers.lock().unwrap();
            if let Some(c) = customers
               .iter_mut()
               .find(|c| c.id() == recipient.customer_id() && c.unsubscribed_at().is_none())
            {
               *c = c.clone().unsubscribe(now);
            }
            if recipient.engagement().unsubscribed_at.is_some() {
               return Ok(false);
            }
            recipient.record_unsubscribe(now)
         }
      };
      self.recipients.put(updated);
      self.events.lock().unwrap().push(event.clone());
      Ok(true)
   }
}

// ===== MockSessionManager =====

#[derive(Clone, Default)]
pub struct MockSessionManager {
   sessions:     Arc<Mutex<HashMap<String, SessionData>>>,
   csrf_tokens:  Arc<Mutex<HashMap<String, String>>>,
   oauth_states: Arc<Mutex<HashMap<String, OAuthState>>>,
}

impl MockSessionManager {
   pub fn new() -> Self {
      Self::default()
   }

   /// 既知の ID でセッションと CSRF トークンを登録する
   pub fn insert_session(&self, session_id: &str, data: SessionData, csrf_token: &str) {
      self
         .sessions
         .lock()
         .unwrap()
         .insert(session_id.to_string(), data);
      self
         .csrf_tokens
         .lock()
         .unwrap()
         .insert(session_id.to_string(), csrf_token.to_string());
   }

   pub fn session(&self, session_id: &str) -> Option<SessionData> {
      self.sessions.lock().unwrap().get(session_id).cloned()
   }

   pub fn session_count(&self) -> usize {
      self.sessions.lock().unwrap().len()
   }
}

#[async_trait]
impl SessionManager for MockSessionManager {
   async fn create(&self, data: &SessionData) -> Result<String, InfraError> {
      let session_id = uuid::Uuid::new_v4().to_string();
      self
         .sessions
         .lock()
         .unwrap()
         .insert(session_id.clone(), data.clone());
      Ok(session_id)
   }

   async fn get(&self, session_id: &str) -> Result<Option<SessionData>, InfraError> {
      Ok(self.session(session_id))
   }

   async fn update(&self, session_id: &str, data: &SessionData) -> Result<(), InfraError> {
      self
         .sessions
         .lock()
         .unwrap()
         .insert(session_id.to_string(), data.clone());
      Ok(())
   }

   async fn delete(&self, session_id: &str) -> Result<(), InfraError> {
      self.sessions.lock().unwrap().remove(session_id);
      self.csrf_tokens.lock().unwrap().remove(session_id);
      Ok(())
   }

   async fn create_csrf_token(&self, session_id: &str) -> Result<String, InfraError> {
      let token = crate::session::random_token();
      self
         .csrf_tokens
         .lock()
         .unwrap()
         .insert(session_id.to_string(), token.clone());
      Ok(token)
   }

   async fn get_csrf_token(&self, session_id: &str) -> Result<Option<String>, InfraError> {
      Ok(self.csrf_tokens.lock().unwrap().get(session_id).cloned())
   }

   async fn store_oauth_state(&self, state: &str, data: &OAuthState) -> Result<(), InfraError> {
      self
         .oauth_states
         .lock()
         .unwrap()
         .insert(state.to_string(), data.clone());
      Ok(())
   }

   async fn take_oauth_state(&self, state: &str) -> Result<Option<OAuthState>, InfraError> {
      Ok(self.oauth_states.lock().unwrap().remove(state))
   }

   async fn ping(&self) -> Result<(), InfraError> {
      Ok(())
   }
}

// ===== StubGoogleOAuthClient =====

/// 固定のプロフィールを返す Google OAuth クライアント
#[derive(Clone)]
pub struct StubGoogleOAuthClient {
   pub userinfo:      GoogleUserInfo,
   pub refresh_token: Option<String>,
   /// `refresh_access_token` を失敗させる
   pub fail_refresh:  bool,
}

impl StubGoogleOAuthClient {
   pub fn new(sub: &str, email: &str, name: &str) -> Self {
      Self {
         userinfo:      GoogleUserInfo {
            sub:            sub.to_string(),
            email:          email.to_string(),
            email_verified: true,
            name:           Some(name.to_string()),
            picture:        None,
         },
         refresh_token: Some("1//stub-refresh-token".to_string()),
         fail_refresh:  false,
      }
   }
}

#[async_trait]
impl GoogleOAuthClient for StubGoogleOAuthClient {
   fn authorization_url(&self, state: &str) -> String {
      format!("https://accounts.google.com/o/oauth2/v2/auth?state={state}")
   }

   async fn exchange_code(&self, code: &str) -> Result<GoogleTokens, GoogleOAuthError> {
      if code == "invalid" {
         return Err(GoogleOAuthError::InvalidGrant("invalid_grant".to_string()));
      }
      Ok(GoogleTokens {
         access_token:  "ya29.stub".to_string(),
         refresh_token: self.refresh_token.clone(),
         expires_in:    Some(3599),
      })
   }

   async fn fetch_userinfo(
      &self,
      _access_token: &str,
   ) -> Result<GoogleUserInfo, GoogleOAuthError> {
      Ok(self.userinfo.clone())
   }

   async fn refresh_access_token(
      &self,
      _refresh_token: &str,
   ) -> Result<String, GoogleOAuthError> {
      if self.fail_refresh {
         return Err(GoogleOAuthError::InvalidGrant("invalid_grant".to_string()));
      }
      Ok("ya29.refreshed".to_string())
   }
}

// ===== RecordingEmailSender =====

/// 送信したメールを記録する送信者
///
/// `fail_for` に含まれる宛先には [`MailError::SendFailed`] を返す。
/// `job_error` を設定するとすべての送信がそのエラーで失敗する。
/// `on_send` は送信のたびに記録より先に呼ばれ、送信中に他の処理が割り込む状況を作る。
#[derive(Clone, Default)]
pub struct RecordingEmailSender {
   sent:      Arc<Mutex<Vec<OutgoingEmail>>>,
   fail_for:  Arc<Mutex<Vec<String>>>,
   job_error: Arc<Mutex<Option<JobError>>>,
   on_send:   Arc<Mutex<Option<SendHook>>>,
}

type SendHook = Arc<dyn Fn(&OutgoingEmail) + Send + Sync>;

#[derive(Clone)]
enum JobError {
   Auth(String),
   RateLimit(String),
}

impl RecordingEmailSender {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn fail_for(&self, to: &str) {
      self.fail_for.lock().unwrap().push(to.to_string());
   }

   pub fn fail_with_auth_error(&self, message: &str) {
      *self.job_error.lock().unwrap() = Some(JobError::Auth(message.to_string()));
   }

   pub fn fail_with_rate_limit(&self, message: &str) {
      *self.job_error.lock().unwrap() = Some(JobError::RateLimit(message.to_string()));
   }

   pub fn on_send(&self, hook: impl Fn(&OutgoingEmail) + Send + Sync + 'static) {
      *self.on_send.lock().unwrap() = Some(Arc::new(hook));
   }

   pub fn sent(&self) -> Vec<OutgoingEmail> {
      self.sent.lock().unwrap().clone()
   }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
   async fn send_email(&self, email: &OutgoingEmail) -> Result<(), MailError> {
      let hook = self.on_send.lock().unwrap().clone();
      if let Some(hook) = hook {
         hook(email);
      }
      match self.job_error.lock().unwrap().clone() {
         Some(JobError::Auth(message)) => return Err(MailError::AuthFailed(message)),
         Some(JobError::RateLimit(message)) => return Err(MailError::RateLimited(message)),
         None => {}
      }
      if self.fail_for.lock().unwrap().contains(&email.to) {
         return Err(MailError::SendFailed(format!("宛先に送信できません: {}", email.to)));
      }
      self.sent.lock().unwrap().push(email.clone());
      Ok(())
   }
}

// ===== MockEmailSenderFactory =====

/// 常に同じ [`RecordingEmailSender`] を返すファクトリ
#[derive(Clone, Default)]
pub struct MockEmailSenderFactory {
   sender:   RecordingEmailSender,
   configs:  Arc<Mutex<Vec<SenderConfig>>>,
   /// 設定するとファクトリ自体が失敗する
   error:    Arc<Mutex<Option<String>>>,
}

impl MockEmailSenderFactory {
   pub fn new(sender: RecordingEmailSender) -> Self {
      Self {
         sender,
         ..Self::default()
      }
   }

   pub fn fail_with_misconfiguration(&self, message: &str) {
      *self.error.lock().unwrap() = Some(message.to_string());
   }

   pub fn configs(&self) -> Vec<SenderConfig> {
      self.configs.lock().unwrap().clone()
   }
}

#[async_trait]
impl EmailSenderFactory for MockEmailSenderFactory {
   async fn create(&self, config: &SenderConfig) -> Result<Arc<dyn EmailSender>, MailError> {
      self.configs.lock().unwrap().push(config.clone());
      if let Some(message) = self.error.lock().unwrap().clone() {
         return Err(MailError::Misconfigured(message));
      }
      Ok(Arc::new(self.sender.clone()))
   }
}
