//! # 組織ユースケース
//!
//! 組織名の変更、メンバー一覧、招待、ロール変更、メンバー削除。
//!
//! ## 設計方針
//!
//! - **必要ロールはルーティングで判定**: ここでは操作対象との関係だけを検証する
//! - **owner を 0 人にしない**: 降格・削除の前に組織の owner 数を数える

use std::sync::Arc;

use kokyaku_domain::{
   clock::Clock,
   organization::{
      Invitation,
      OrgRole,
      Organization,
      OrganizationId,
      OrganizationName,
      ensure_owner_remains,
   },
   user::UserId,
   value_objects::Email,
};
use kokyaku_infra::{
   SessionData,
   repository::{InvitationRepository, MemberSummary, OrganizationRepository},
};
use kokyaku_shared::{event_log::event, log_business_event};

use crate::error::ApiError;

/// メンバー一覧と未受諾の招待
#[derive(Debug, Clone)]
pub struct MemberList {
   pub members:     Vec<MemberSummary>,
   pub invitations: Vec<Invitation>,
}

/// 組織ユースケース
pub struct OrganizationUseCaseImpl {
   organizations: Arc<dyn OrganizationRepository>,
   invitations:   Arc<dyn InvitationRepository>,
   clock:         Arc<dyn Clock>,
}

impl OrganizationUseCaseImpl {
   pub fn new(
      organizations: Arc<dyn OrganizationRepository>,
      invitations: Arc<dyn InvitationRepository>,
      clock: Arc<dyn Clock>,
   ) -> Self {
      Self {
         organizations,
         invitations,
         clock,
      }
   }

   pub async fn get(&self, organization_id: &OrganizationId) -> Result<Organization, ApiError> {
      self
         .organizations
         .find_by_id(organization_id)
         .await?
         .ok_or_else(|| ApiError::NotFound(format!("組織が見つかりません: {organization_id}")))
   }

   pub async fn rename(
      &self,
      organization_id: &OrganizationId,
      name: String,
   ) -> Result<Organization, ApiError> {
      let name = OrganizationName::new(name)?;
      let renamed = self.get(organization_id).await?.renamed(name, self.clock.now());
      self.organizations.update(&renamed).await?;
      Ok(renamed)
   }

   pub async fn list_members(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<MemberList, ApiError> {
      let members = self.organizations.list_members(organization_id).await?;
      let invitations = self.invitations.list_pending(organization_id).await?;
      Ok(MemberList {
         members,
         invitations,
      })
   }

   /// メールアドレスで招待する
   ///
   /// 招待者より上のロールでは招待できない。
   pub async fn invite(
      &self,
      session: &SessionData,
      email: &str,
      role: OrgRole,
   ) -> Result<Invitation, ApiError> {
      let invitation = Invitation::new(
         session.organization_id().clone(),
         Email::new(email)?,
         role,
         session.user_id().clone(),
         session.role(),
         self.clock.now(),
      )?;
      self.invitations.insert(&invitation).await?;

      log_business_event!(
         event.category = event::category::ORGANIZATION,
         event.action = event::action::MEMBER_INVITED,
         event.entity_type = event::entity_type::MEMBERSHIP,
         event.organization_id = %session.organization_id(),
         event.actor_id = %session.user_id(),
         event.role = %role,
         event.result = event::result::SUCCESS,
         "メンバーを招待しました"
      );
      Ok(invitation)
   }

   /// メンバーのロールを変更する
   pub async fn change_role(
      &self,
      session: &SessionData,
      user_id: &UserId,
      role: OrgRole,
   ) -> Result<(), ApiError> {
      let organization_id = session.organization_id();
      let membership = self
         .organizations
         .find_membership(organization_id, user_id)
         .await?
         .ok_or_else(|| ApiError::NotFound(format!("メンバーが見つかりません: {user_id}")))?;

      let owners = self.organizations.count_owners(organization_id).await?;
      ensure_owner_remains(membership.role(), Some(role), owners)?;
      self
         .organizations
         .update_member_role(organization_id, user_id, role)
         .await?;

      log_business_event!(
         event.category = event::category::ORGANIZATION,
         event.action = event::action::MEMBER_ROLE_CHANGED,
         event.entity_type = event::entity_type::MEMBERSHIP,
         event.entity_id = %user_id,
         event.organization_id = %organization_id,
         event.actor_id = %session.user_id(),
         event.role = %role,
         event.result = event::result::SUCCESS,
         "メンバーのロールを変更しました"
      );
      Ok(())
   }

   /// メンバーを削除する
   ///
   /// owner を削除できるのは owner だけ。
   pub async fn remove_member(
      &self,
      session: &SessionData,
      user_id: &UserId,
   ) -> Result<(), ApiError> {
      let organization_id = session.organization_id();
      let membership = self
         .organizations
         .find_membership(organization_id, user_id)
         .await?
         .ok_or_else(|| ApiError::NotFound(format!("メンバーが見つかりません: {user_id}")))?;

      if membership.role() == OrgRole::Owner && session.role() != OrgRole::Owner {
         return Err(ApiError::Forbidden(
            "owner を削除できるのは owner だけです".to_string(),
         ));
      }
      let owners = self.organizations.count_owners(organization_id).await?;
      ensure_owner_remains(membership.role(), None, owners)?;
      self
         .organizations
         .delete_membership(organization_id, user_id)
         .await?;

      log_business_event!(
         event.category = event::category::ORGANIZATION,
         event.action = event::action::MEMBER_REMOVED,
         event.entity_type = event::entity_type::MEMBERSHIP,
         event.entity_id = %user_id,
         event.organization_id = %organization_id,
         event.actor_id = %session.user_id(),
         event.result = event::result::SUCCESS,
         "メンバーを削除しました"
      );
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use chrono::Utc;
   use kokyaku_domain::{
      clock::FixedClock,
      organization::Membership,
      user::{User, UserName},
   };
   use kokyaku_infra::mock::{
      MockInvitationRepository,
      MockOrganizationRepository,
      MockUserRepository,
   };
   use pretty_assertions::assert_eq;

   use super::*;

   struct Fixture {
      organizations: MockOrganizationRepository,
      usecase:       OrganizationUseCaseImpl,
      organization:  Organization,
      owner:         SessionData,
   }

   fn add_member(fixture: &Fixture, users: &MockUserRepository, name: &str, role: OrgRole) -> UserId {
      let user = User::new(
         UserId::new(),
         Email::new(format!("{name}@example.com")).unwrap(),
         UserName::new(name).unwrap(),
         format!("sub-{name}"),
         None,
         Utc::now(),
      );
      let id = user.id().clone();
      users.add_user(user, None);
      fixture.organizations.add_membership(Membership::new(
         fixture.organization.id().clone(),
         id.clone(),
         role,
         Utc::now(),
      ));
      id
   }

   fn setup() -> (Fixture, MockUserRepository) {
      let users = MockUserRepository::new();
      let organizations = MockOrganizationRepository::new(users.clone());
      let invitations = MockInvitationRepository::new(organizations.clone());
      let organization = Organization::new(
         OrganizationId::new(),
         OrganizationName::new("山田商店").unwrap(),
         Utc::now(),
      );
      organizations.add_organization(organization.clone());
      let owner_id = UserId::new();
      users.add_user(
         User::new(
            owner_id.clone(),
            Email::new("owner@example.com").unwrap(),
            UserName::new("owner").unwrap(),
            "sub-owner".to_string(),
            None,
            Utc::now(),
         ),
         None,
      );
      organizations.add_membership(Membership::new(
         organization.id().clone(),
         owner_id.clone(),
         OrgRole::Owner,
         Utc::now(),
      ));
      let usecase = OrganizationUseCaseImpl::new(
         Arc::new(organizations.clone()),
         Arc::new(invitations),
         Arc::new(FixedClock::new(Utc::now())),
      );
      let fixture = Fixture {
         organizations,
         usecase,
         owner: SessionData::new(
            owner_id,
            organization.id().clone(),
            OrgRole::Owner,
            "owner@example.com".to_string(),
            "owner".to_string(),
         ),
         organization,
      };
      (fixture, users)
   }

   #[tokio::test]
   async fn test_組織名を変更できる() {
      let (fixture, _) = setup();

      let renamed = fixture
         .usecase
         .rename(fixture.organization.id(), "山田商事".to_string())
         .await
         .unwrap();

      assert_eq!(renamed.name().as_str(), "山田商事");
      let stored = fixture.usecase.get(fixture.organization.id()).await.unwrap();
      assert_eq!(stored.name().as_str(), "山田商事");
   }

   #[tokio::test]
   async fn test_招待は一覧に表示される() {
      let (fixture, _) = setup();

      fixture
         .usecase
         .invite(&fixture.owner, "hanako@example.com", OrgRole::Admin)
         .await
         .unwrap();

      let list = fixture
         .usecase
         .list_members(fixture.organization.id())
         .await
         .unwrap();
      assert_eq!(list.members.len(), 1);
      assert_eq!(list.invitations.len(), 1);
      assert_eq!(list.invitations[0].email().as_str(), "hanako@example.com");
   }

   #[tokio::test]
   async fn test_adminはownerとして招待できない() {
      let (fixture, _) = setup();
      let admin = fixture
         .owner
         .clone()
         .with_organization(fixture.organization.id().clone(), OrgRole::Admin);

      let result = fixture
         .usecase
         .invite(&admin, "hanako@example.com", OrgRole::Owner)
         .await;

      assert!(matches!(result, Err(ApiError::Forbidden(_))));
   }

   #[tokio::test]
   async fn test_同じアドレスへの重複招待は409() {
      let (fixture, _) = setup();
      fixture
         .usecase
         .invite(&fixture.owner, "hanako@example.com", OrgRole::Member)
         .await
         .unwrap();

      let result = fixture
         .usecase
         .invite(&fixture.owner, "hanako@example.com", OrgRole::Member)
         .await;

      assert!(matches!(result, Err(ApiError::Conflict(_))));
   }

   #[tokio::test]
   async fn test_最後のownerは降格できない() {
      let (fixture, _) = setup();

      let result = fixture
         .usecase
         .change_role(&fixture.owner, fixture.owner.user_id(), OrgRole::Admin)
         .await;

      assert!(matches!(result, Err(ApiError::Conflict(_))));
   }

   #[tokio::test]
   async fn test_ownerが2人いれば降格できる() {
      let (fixture, users) = setup();
      let second = add_member(&fixture, &users, "second", OrgRole::Owner);

      fixture
         .usecase
         .change_role(&fixture.owner, &second, OrgRole::Member)
         .await
         .unwrap();

      let membership = fixture
         .organizations
         .find_membership(fixture.organization.id(), &second)
         .await
         .unwrap()
         .unwrap();
      assert_eq!(membership.role(), OrgRole::Member);
   }

   #[tokio::test]
   async fn test_ownerが互いを同時に降格しても1人は残る() {
      let (fixture, users) = setup();
      let org = fixture.organization.id();
      let second = add_member(&fixture, &users, "second", OrgRole::Owner);

      // どちらのリクエストも owner 2 人の状態を読んでから書き込む
      fixture
         .organizations
         .update_member_role(org, &second, OrgRole::Admin)
         .await
         .unwrap();
      let result = fixture
         .organizations
         .update_member_role(org, fixture.owner.user_id(), OrgRole::Admin)
         .await;

      assert!(result.unwrap_err().as_conflict().is_some());
      assert_eq!(fixture.organizations.count_owners(org).await.unwrap(), 1);
   }

   #[tokio::test]
   async fn test_ownerが互いを同時に削除しても1人は残る() {
      let (fixture, users) = setup();
      let org = fixture.organization.id();
      let second = add_member(&fixture, &users, "second", OrgRole::Owner);

      fixture
         .organizations
         .delete_membership(org, &second)
         .await
         .unwrap();
      let result = fixture
         .organizations
         .delete_membership(org, fixture.owner.user_id())
         .await;

      assert!(result.unwrap_err().as_conflict().is_some());
      assert_eq!(fixture.organizations.memberships().len(), 1);
   }

   #[tokio::test]
   async fn test_adminはownerを削除できない() {
      let (fixture, users) = setup();
      add_member(&fixture, &users, "second", OrgRole::Owner);
      let admin = fixture
         .owner
         .clone()
         .with_organization(fixture.organization.id().clone(), OrgRole::Admin);

      let result = fixture
         .usecase
         .remove_member(&admin, fixture.owner.user_id())
         .await;

      assert!(matches!(result, Err(ApiError::Forbidden(_))));
   }

   #[tokio::test]
   async fn test_メンバーを削除できる() {
      let (fixture, users) = setup();
      let member = add_member(&fixture, &users, "member", OrgRole::Member);

      fixture
         .usecase
         .remove_member(&fixture.owner, &member)
         .await
         .unwrap();

      assert_eq!(fixture.organizations.memberships().len(), 1);
   }

   #[tokio::test]
   async fn test_存在しないメンバーは404() {
      let (fixture, _) = setup();

      let result = fixture
         .usecase
         .remove_member(&fixture.owner, &UserId::new())
         .await;

      assert!(matches!(result, Err(ApiError::NotFound(_))));
   }
}
