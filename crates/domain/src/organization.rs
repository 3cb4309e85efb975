//! # 組織（テナント）とメンバーシップ
//!
//! CRM のデータはすべていずれか 1 つの組織に属する。ユーザーはメンバーシップを
//! 介して複数の組織に所属でき、組織ごとにロールを持つ。
//!
//! ## ドメイン用語
//!
//! | 型 | ドメイン用語 | 説明 |
//! |---|------------|------|
//! | [`Organization`] | 組織 | テナント。全業務テーブルが `organization_id` を持つ |
//! | [`OrgRole`] | 組織ロール | `owner` > `admin` > `member` の順序を持つ |
//! | [`Membership`] | メンバーシップ | ユーザーと組織の所属関係 |
//! | [`Invitation`] | 招待 | メールアドレス宛の参加招待。初回ログイン時に受諾される |
//!
//! ## ロールと操作
//!
//! | 操作 | 必要ロール |
//! |------|-----------|
//! | 顧客・リード・タグ・セグメント・キャンペーン下書きの編集 | member |
//! | キャンペーン送信・キャンセル、メール設定、メンバー招待・削除 | admin |
//! | メンバーのロール変更 | owner |

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{DomainError, user::UserId, value_objects::Email};

/// 招待の有効期間（日）
pub const INVITATION_TTL_DAYS: i64 = 7;

define_uuid_id! {
   /// 組織 ID
   ///
   /// セッションのアクティブ組織から取得し、クライアントからの直接指定は受け付けない。
   pub struct OrganizationId;
}

define_uuid_id! {
   /// 招待 ID
   pub struct InvitationId;
}

define_validated_string! {
   /// 組織名
   pub struct OrganizationName {
      label: "組織名",
      max_length: 255,
   }
}

// =========================================================================
// Organization
// =========================================================================

/// 組織エンティティ
#[derive(Debug, Clone)]
pub struct Organization {
   id:         OrganizationId,
   name:       OrganizationName,
   created_at: DateTime<Utc>,
   updated_at: DateTime<Utc>,
}

impl Organization {
   pub fn new(id: OrganizationId, name: OrganizationName, now: DateTime<Utc>) -> Self {
      Self {
         id,
         name,
         created_at: now,
         updated_at: now,
      }
   }

   /// 初回ログインしたユーザー向けの個人組織を作成する
   ///
   /// 組織名は「{ユーザー名} の組織」。長すぎる場合はユーザー名を切り詰める。
   pub fn personal_for(user_name: &str, now: DateTime<Utc>) -> Result<Self, DomainError> {
      let base: String = user_name.chars().take(240).collect();
      let name = OrganizationName::new(format!("{base} の組織"))?;
      Ok(Self::new(OrganizationId::new(), name, now))
   }

   pub fn from_db(
      id: OrganizationId,
      name: OrganizationName,
      created_at: DateTime<Utc>,
      updated_at: DateTime<Utc>,
   ) -> Self {
      Self {
         id,
         name,
         created_at,
         updated_at,
      }
   }

   pub fn renamed(self, name: OrganizationName, now: DateTime<Utc>) -> Self {
      Self {
         name,
         updated_at: now,
         ..self
      }
   }

   pub fn id(&self) -> &OrganizationId {
      &self.id
   }

   pub fn name(&self) -> &OrganizationName {
      &self.name
   }

   pub fn created_at(&self) -> DateTime<Utc> {
      self.created_at
   }

   pub fn updated_at(&self) -> DateTime<Utc> {
      self.updated_at
   }
}

// =========================================================================
// OrgRole
// =========================================================================

/// 組織内ロール
#[derive(
   Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrgRole {
   Owner,
   Admin,
   Member,
}

impl OrgRole {
   fn rank(self) -> u8 {
      match self {
         Self::Owner => 3,
         Self::Admin => 2,
         Self::Member => 1,
      }
   }

   /// 要求ロール以上の権限を持つか
   pub fn at_least(self, required: OrgRole) -> bool {
      self.rank() >= required.rank()
   }

   /// このロールのユーザーが `target` ロールで招待できるか
   ///
   /// admin 以上が、自分以下のロールでのみ招待できる。
   pub fn can_invite_as(self, target: OrgRole) -> bool {
      self.at_least(OrgRole::Admin) && self.rank() >= target.rank()
   }

   pub fn as_str(self) -> &'static str {
      self.into()
   }
}

impl std::str::FromStr for OrgRole {
   type Err = DomainError;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      match s {
         "owner" => Ok(Self::Owner),
         "admin" => Ok(Self::Admin),
         "member" => Ok(Self::Member),
         _ => Err(DomainError::Validation(format!("不正な組織ロール: {s}"))),
      }
   }
}

// =========================================================================
// Membership
// =========================================================================

/// メンバーシップ（ユーザーと組織の所属関係）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
   organization_id: OrganizationId,
   user_id:         UserId,
   role:            OrgRole,
   created_at:      DateTime<Utc>,
}

impl Membership {
   pub fn new(
      organization_id: OrganizationId,
      user_id: UserId,
      role: OrgRole,
      created_at: DateTime<Utc>,
   ) -> Self {
      Self {
         organization_id,
         user_id,
         role,
         created_at,
      }
   }

   pub fn organization_id(&self) -> &OrganizationId {
      &self.organization_id
   }

   pub fn user_id(&self) -> &UserId {
      &self.user_id
   }

   pub fn role(&self) -> OrgRole {
      self.role
   }

   pub fn created_at(&self) -> DateTime<Utc> {
      self.created_at
   }
}

/// ロール変更・メンバー削除で最後の owner がいなくならないことを検証する
///
/// - `current`: 対象メンバーの現在のロール
/// - `next`: 変更後のロール（削除の場合は `None`）
/// - `owner_count`: 組織内の owner 数
pub fn ensure_owner_remains(
   current: OrgRole,
   next: Option<OrgRole>,
   owner_count: i64,
) -> Result<(), DomainError> {
   let loses_owner = current == OrgRole::Owner && next != Some(OrgRole::Owner);
   if loses_owner && owner_count <= 1 {
      return Err(DomainError::Conflict(
         "組織には少なくとも 1 人の owner が必要です".to_string(),
      ));
   }
   Ok(())
}

// =========================================================================
// Invitation
// =========================================================================

/// 招待エンティティ
///
/// 招待されたメールアドレスで初めてログインしたとき、メンバーシップに変換される。
#[derive(Debug, Clone)]
pub struct Invitation {
   id:              InvitationId,
   organization_id: OrganizationId,
   email:           Email,
   role:            OrgRole,
   invited_by:      UserId,
   created_at:      DateTime<Utc>,
   expires_at:      DateTime<Utc>,
   accepted_at:     Option<DateTime<Utc>>,
}

impl Invitation {
   /// 招待を作成する
   ///
   /// 招待者のロールが招待ロール以上であることを検証する。
   pub fn new(
      organization_id: OrganizationId,
      email: Email,
      role: OrgRole,
      invited_by: UserId,
      inviter_role: OrgRole,
      now: DateTime<Utc>,
   ) -> Result<Self, DomainError> {
      if !inviter_role.can_invite_as(role) {
         return Err(DomainError::Forbidden(format!(
            "{inviter_role} は {role} として招待できません"
         )));
      }
      Ok(Self {
         id: InvitationId::new(),
         organization_id,
         email,
         role,
         invited_by,
         created_at: now,
         expires_at: now + Duration::days(INVITATION_TTL_DAYS),
         accepted_at: None,
      })
   }

   #[allow(clippy::too_many_arguments)]
   pub fn from_db(
      id: InvitationId,
      organization_id: OrganizationId,
      email: Email,
      role: OrgRole,
      invited_by: UserId,
      created_at: DateTime<Utc>,
      expires_at: DateTime<Utc>,
      accepted_at: Option<DateTime<Utc>>,
   ) -> Self {
      Self {
         id,
         organization_id,
         email,
         role,
         invited_by,
         created_at,
         expires_at,
         accepted_at,
      }
   }

   /// 受諾可能か（未受諾かつ期限内）
   pub fn is_pending(&self, now: DateTime<Utc>) -> bool {
      self.accepted_at.is_none() && now < self.expires_at
   }

   pub fn id(&self) -> &InvitationId {
      &self.id
   }

   pub fn organization_id(&self) -> &OrganizationId {
      &self.organization_id
   }

   pub fn email(&self) -> &Email {
      &self.email
   }

   pub fn role(&self) -> OrgRole {
      self.role
   }

   pub fn invited_by(&self) -> &UserId {
      &self.invited_by
   }

   pub fn created_at(&self) -> DateTime<Utc> {
      self.created_at
   }

   pub fn expires_at(&self) -> DateTime<Utc> {
      self.expires_at
   }

   pub fn accepted_at(&self) -> Option<DateTime<Utc>> {
      self.accepted_at
   }
}

#[cfg(test)]
mod tests {
   use rstest::rstest;

   use super::*;

   #[rstest]
   #[case(OrgRole::Owner, OrgRole::Admin, true)]
   #[case(OrgRole::Admin, OrgRole::Admin, true)]
   #[case(OrgRole::Member, OrgRole::Admin, false)]
   #[case(OrgRole::Member, OrgRole::Member, true)]
   #[case(OrgRole::Admin, OrgRole::Owner, false)]
   fn test_ロールの包含関係(#[case] held: OrgRole, #[case] required: OrgRole, #[case] expected: bool) {
      assert_eq!(held.at_least(required), expected);
   }

   #[rstest]
   #[case(OrgRole::Owner, OrgRole::Owner, true)]
   #[case(OrgRole::Admin, OrgRole::Member, true)]
   #[case(OrgRole::Admin, OrgRole::Owner, false)]
   #[case(OrgRole::Member, OrgRole::Member, false)]
   fn test_招待できるロール(#[case] inviter: OrgRole, #[case] target: OrgRole, #[case] expected: bool) {
      assert_eq!(inviter.can_invite_as(target), expected);
   }

   #[test]
   fn test_ロールは文字列と相互変換できる() {
      assert_eq!("admin".parse::<OrgRole>().unwrap(), OrgRole::Admin);
      assert_eq!(OrgRole::Owner.as_str(), "owner");
      assert!("superuser".parse::<OrgRole>().is_err());
   }

   #[test]
   fn test_最後のownerは降格できない() {
      assert!(ensure_owner_remains(OrgRole::Owner, Some(OrgRole::Admin), 1).is_err());
      assert!(ensure_owner_remains(OrgRole::Owner, None, 1).is_err());
   }

   #[test]
   fn test_ownerが複数いれば降格できる() {
      assert!(ensure_owner_remains(OrgRole::Owner, Some(OrgRole::Member), 2).is_ok());
      assert!(ensure_owner_remains(OrgRole::Admin, None, 1).is_ok());
   }

   #[test]
   fn test_個人組織の名前はユーザー名から作られる() {
      let org = Organization::personal_for("山田太郎", Utc::now()).unwrap();
      assert_eq!(org.name().as_str(), "山田太郎 の組織");
   }

   #[test]
   fn test_招待は期限切れと受諾済みでpendingでなくなる() {
      let now = Utc::now();
      let invitation = Invitation::new(
         OrganizationId::new(),
         Email::new("new@example.com").unwrap(),
         OrgRole::Member,
         UserId::new(),
         OrgRole::Admin,
         now,
      )
      .unwrap();

      assert!(invitation.is_pending(now));
      assert!(!invitation.is_pending(now + Duration::days(INVITATION_TTL_DAYS)));
   }

   #[test]
   fn test_memberは招待を作成できない() {
      let result = Invitation::new(
         OrganizationId::new(),
         Email::new("new@example.com").unwrap(),
         OrgRole::Member,
         UserId::new(),
         OrgRole::Member,
         Utc::now(),
      );
      assert!(matches!(result, Err(DomainError::Forbidden(_))));
   }
}
