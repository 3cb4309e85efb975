//! # InvitationRepository
//!
//! 組織への招待の永続化を担当するリポジトリ。
//!
//! 招待は招待先のメールアドレスで Google ログインしたときに受諾される。
//! 受諾はメンバーシップ作成と招待の受諾済みマークを同一トランザクションで行う。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kokyaku_domain::{
   organization::{Invitation, InvitationId, OrganizationId},
   user::UserId,
   value_objects::Email,
};
use sqlx::PgPool;
use uuid::Uuid;

use super::organization_repository::parse_role;
use crate::error::InfraError;

/// 招待リポジトリトレイト
#[async_trait]
pub trait InvitationRepository: Send + Sync {
   /// 招待を登録する
   ///
   /// 同一組織・同一アドレスの未受諾招待が既にある場合は `Conflict`。
   async fn insert(&self, invitation: &Invitation) -> Result<(), InfraError>;

   /// メールアドレス宛ての受諾可能な招待を取得する（組織横断）
   async fn find_pending_by_email(
      &self,
      email: &Email,
      now: DateTime<Utc>,
   ) -> Result<Vec<Invitation>, InfraError>;

   /// 組織の未受諾招待を作成日時の新しい順に取得する
   async fn list_pending(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Vec<Invitation>, InfraError>;

   /// 招待を受諾する
   ///
   /// 既にメンバーの場合はロールを変更せず、招待だけを受諾済みにする。
   async fn accept(
      &self,
      invitation: &Invitation,
      user_id: &UserId,
      now: DateTime<Utc>,
   ) -> Result<(), InfraError>;
}

#[derive(sqlx::FromRow)]
struct InvitationRow {
   id:              Uuid,
   organization_id: Uuid,
   email:           String,
   role:            String,
   invited_by:      Uuid,
   created_at:      DateTime<Utc>,
   expires_at:      DateTime<Utc>,
   accepted_at:     Option<DateTime<Utc>>,
}

impl TryFrom<InvitationRow> for Invitation {
   type Error = InfraError;

   fn try_from(row: InvitationRow) -> Result<Self, Self::Error> {
      Ok(Invitation::from_db(
         InvitationId::from_uuid(row.id),
         OrganizationId::from_uuid(row.organization_id),
         Email::new(row.email).map_err(|e| InfraError::unexpected(e.to_string()))?,
         parse_role(&row.role)?,
         UserId::from_uuid(row.invited_by),
         row.created_at,
         row.expires_at,
         row.accepted_at,
      ))
   }
}

const INVITATION_COLUMNS: &str =
   "id, organization_id, email, role, invited_by, created_at, expires_at, accepted_at";

/// PostgreSQL 実装の InvitationRepository
#[derive(Debug, Clone)]
pub struct PostgresInvitationRepository {
   pool: PgPool,
}

impl PostgresInvitationRepository {
   pub fn new(pool: PgPool) -> Self {
      Self { pool }
   }
}

#[async_trait]
impl InvitationRepository for PostgresInvitationRepository {
   #[tracing::instrument(skip_all, level = "debug", fields(id = %invitation.id()))]
   async fn insert(&self, invitation: &Invitation) -> Result<(), InfraError> {
      sqlx::query(
         r#"
            INSERT INTO invitations (
                id, organization_id, email, role, invited_by, created_at, expires_at, accepted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
      )
      .bind(invitation.id().as_uuid())
      .bind(invitation.organization_id().as_uuid())
      .bind(invitation.email().as_str())
      .bind(invitation.role().as_str())
      .bind(invitation.invited_by().as_uuid())
      .bind(invitation.created_at())
      .bind(invitation.expires_at())
      .bind(invitation.accepted_at())
      .execute(&self.pool)
      .await
      .map_err(|e| {
         InfraError::from_unique_violation(e, "Invitation", invitation.email().as_str())
      })?;
      Ok(())
   }

   #[tracing::instrument(skip_all, level = "debug")]
   async fn find_pending_by_email(
      &self,
      email: &Email,
      now: DateTime<Utc>,
   ) -> Result<Vec<Invitation>, InfraError> {
      let rows = sqlx::query_as::<_, InvitationRow>(&format!(
         r#"
            SELECT {INVITATION_COLUMNS}
            FROM invitations
            WHERE email = $1 AND accepted_at IS NULL AND expires_at > $2
            ORDER BY created_at ASC
            "#
      ))
      .bind(email.as_str())
      .bind(now)
      .fetch_all(&self.pool)
      .await?;

      rows.into_iter().map(Invitation::try_from).collect()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id))]
   async fn list_pending(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Vec<Invitation>, InfraError> {
      let rows = sqlx::query_as::<_, InvitationRow>(&format!(
         r#"
            SELECT {INVITATION_COLUMNS}
            FROM invitations
            WHERE organization_id = $1 AND accepted_at IS NULL
            ORDER BY created_at DESC
            "#
      ))
      .bind(organization_id.as_uuid())
      .fetch_all(&self.pool)
      .await?;

      rows.into_iter().map(Invitation::try_from).collect()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(id = %invitation.id(), %user_id))]
   async fn accept(
      &self,
      invitation: &Invitation,
      user_id: &UserId,
      now: DateTime<Utc>,
   ) -> Result<(), InfraError> {
      let mut tx = self.pool.begin().await?;

      sqlx::query(
         r#"
            INSERT INTO organization_members (organization_id, user_id, role, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (organization_id, user_id) DO NOTHING
            "#,
      )
      .bind(invitation.organization_id().as_uuid())
      .bind(user_id.as_uuid())
      .bind(invitation.role().as_str())
      .bind(now)
      .execute(&mut *tx)
      .await?;

      sqlx::query("UPDATE invitations SET accepted_at = $2 WHERE id = $1")
         .bind(invitation.id().as_uuid())
         .bind(now)
         .execute(&mut *tx)
         .await?;

      tx.commit().await?;
      Ok(())
   }
}
