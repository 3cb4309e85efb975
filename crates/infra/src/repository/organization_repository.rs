//! # OrganizationRepository
//!
//! 組織とメンバーシップの永続化を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **組織作成は owner 登録とセット**: 組織と最初のメンバーシップを同一トランザクションで作成
//! - **最後の owner は DB でも守る**: ロール変更・メンバー削除は組織行をロックし、
//!   owner が 0 人になる変更を `Conflict` にする
//! - **一覧は結合済みの読み取りモデル**: 組織一覧・メンバー一覧は画面表示用に名前を結合して返す

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kokyaku_domain::{
   organization::{Membership, OrgRole, Organization, OrganizationId, OrganizationName},
   user::UserId,
};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::InfraError;

/// ユーザーが所属する組織（組織切り替え画面用）
#[derive(Debug, Clone)]
pub struct OrganizationSummary {
   pub organization: Organization,
   pub role:         OrgRole,
}

/// 組織のメンバー（メンバー管理画面用）
#[derive(Debug, Clone)]
pub struct MemberSummary {
   pub user_id:    UserId,
   pub email:      String,
   pub name:       String,
   pub avatar_url: Option<String>,
   pub role:       OrgRole,
   pub joined_at:  DateTime<Utc>,
}

/// メンバー構成を変える操作を組織単位で直列化する
async fn lock_organization(
   conn: &mut PgConnection,
   organization_id: &OrganizationId,
) -> Result<(), InfraError> {
   sqlx::query("SELECT id FROM organizations WHERE id = $1 FOR UPDATE")
      .bind(organization_id.as_uuid())
      .fetch_optional(&mut *conn)
      .await?;
   Ok(())
}

/// 組織リポジトリトレイト
#[async_trait]
pub trait OrganizationRepository: Send + Sync {
   async fn find_by_id(&self, id: &OrganizationId) -> Result<Option<Organization>, InfraError>;

   /// 組織名などを更新する
   async fn update(&self, organization: &Organization) -> Result<(), InfraError>;

   /// 組織と owner のメンバーシップを同一トランザクションで作成する
   async fn create_with_owner(
      &self,
      organization: &Organization,
      owner: &Membership,
   ) -> Result<(), InfraError>;

   async fn find_membership(
      &self,
      organization_id: &OrganizationId,
      user_id: &UserId,
   ) -> Result<Option<Membership>, InfraError>;

   /// ユーザーの所属組織を新しい所属順に取得する
   async fn list_for_user(&self, user_id: &UserId)
   -> Result<Vec<OrganizationSummary>, InfraError>;

   /// 組織のメンバーを参加順に取得する
   async fn list_members(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Vec<MemberSummary>, InfraError>;

   /// メンバーのロールを変更する
   ///
   /// 最後の owner を owner 以外にする変更は `Conflict`。
   async fn update_member_role(
      &self,
      organization_id: &OrganizationId,
      user_id: &UserId,
      role: OrgRole,
   ) -> Result<(), InfraError>;

   /// メンバーシップを削除する
   ///
   /// 最後の owner の削除は `Conflict`。
   async fn delete_membership(
      &self,
      organization_id: &OrganizationId,
      user_id: &UserId,
   ) -> Result<(), InfraError>;

   /// 組織内の owner 数
   async fn count_owners(&self, organization_id: &OrganizationId) -> Result<i64, InfraError>;
}

#[derive(sqlx::FromRow)]
struct OrganizationRow {
   id:         Uuid,
   name:       String,
   created_at: DateTime<Utc>,
   updated_at: DateTime<Utc>,
}

impl TryFrom<OrganizationRow> for Organization {
   type Error = InfraError;

   fn try_from(row: OrganizationRow) -> Result<Self, Self::Error> {
      Ok(Organization::from_db(
         OrganizationId::from_uuid(row.id),
         OrganizationName::new(row.name).map_err(|e| InfraError::unexpected(e.to_string()))?,
         row.created_at,
         row.updated_at,
      ))
   }
}

#[derive(sqlx::FromRow)]
struct MembershipRow {
   organization_id: Uuid,
   user_id:         Uuid,
   role:            String,
   created_at:      DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrganizationSummaryRow {
   id:         Uuid,
   name:       String,
   created_at: DateTime<Utc>,
   updated_at: DateTime<Utc>,
   role:       String,
}

#[derive(sqlx::FromRow)]
struct MemberRow {
   user_id:    Uuid,
   email:      String,
   name:       String,
   avatar_url: Option<String>,
   role:       String,
   joined_at:  DateTime<Utc>,
}

pub(crate) fn parse_role(value: &str) -> Result<OrgRole, InfraError> {
   value
      .parse::<OrgRole>()
      .map_err(|e| InfraError::unexpected(e.to_string()))
}

/// PostgreSQL 実装の OrganizationRepository
#[derive(Debug, Clone)]
pub struct PostgresOrganizationRepository {
   pool: PgPool,
}

impl PostgresOrganizationRepository {
   pub fn new(pool: PgPool) -> Self {
      Self { pool }
   }
}

#[async_trait]
impl OrganizationRepository for PostgresOrganizationRepository {
   #[tracing::instrument(skip_all, level = "debug", fields(%id))]
   async fn find_by_id(&self, id: &OrganizationId) -> Result<Option<Organization>, InfraError> {
      let row = sqlx::query_as::<_, OrganizationRow>(
         "SELECT id, name, created_at, updated_at FROM organizations WHERE id = $1",
      )
      .bind(id.as_uuid())
      .fetch_optional(&self.pool)
      .await?;

      row.map(Organization::try_from).transpose()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(id = %organization.id()))]
   async fn update(&self, organization: &Organization) -> Result<(), InfraError> {
      sqlx::query("UPDATE organizations SET name = $2, updated_at = $3 WHERE id = $1")
         .bind(organization.id().as_uuid())
         .bind(organization.name().as_str())
         .bind(organization.updated_at())
         .execute(&self.pool)
         .await?;
      Ok(())
   }

   #[tracing::instrument(skip_all, level = "debug", fields(id = %organization.id()))]
   async fn create_with_owner(
      &self,
      organization: &Organization,
      owner: &Membership,
   ) -> Result<(), InfraError> {
      let mut tx = self.pool.begin().await?;

      sqlx::query(
         "INSERT INTO organizations (id, name, created_at, updated_at) VALUES ($1, $2, $3, $4)",
      )
      .bind(organization.id().as_uuid())
      .bind(organization.name().as_str())
      .bind(organization.created_at())
      .bind(organization.updated_at())
      .execute(&mut *tx)
      .await?;

      sqlx::query(
         r#"
            INSERT INTO organization_members (organization_id, user_id, role, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
      )
      .bind(owner.organization_id().as_uuid())
      .bind(owner.user_id().as_uuid())
      .bind(owner.role().as_str())
      .bind(owner.created_at())
      .execute(&mut *tx)
      .await?;

      tx.commit().await?;
      Ok(())
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, %user_id))]
   async fn find_membership(
      &self,
      organization_id: &OrganizationId,
      user_id: &UserId,
   ) -> Result<Option<Membership>, InfraError> {
      let row = sqlx::query_as::<_, MembershipRow>(
         r#"
            SELECT organization_id, user_id, role, created_at
            FROM organization_members
            WHERE organization_id = $1 AND user_id = $2
            "#,
      )
      .bind(organization_id.as_uuid())
      .bind(user_id.as_uuid())
      .fetch_optional(&self.pool)
      .await?;

      row.map(|r| {
         Ok(Membership::new(
            OrganizationId::from_uuid(r.organization_id),
            UserId::from_uuid(r.user_id),
            parse_role(&r.role)?,
            r.created_at,
         ))
      })
      .transpose()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%user_id))]
   async fn list_for_user(
      &self,
      user_id: &UserId,
   ) -> Result<Vec<OrganizationSummary>, InfraError> {
      let rows = sqlx::query_as::<_, OrganizationSummaryRow>(
         r#"
            SELECT o.id, o.name, o.created_at, o.updated_at, m.role
            FROM organization_members m
            JOIN organizations o ON o.id = m.organization_id
            WHERE m.user_id = $1
            ORDER BY m.created_at DESC
            "#,
      )
      .bind(user_id.as_uuid())
      .fetch_all(&self.pool)
      .await?;

      rows
         .into_iter()
         .map(|r| {
            let role = parse_role(&r.role)?;
            let organization = Organization::try_from(OrganizationRow {
               id:         r.id,
               name:       r.name,
               created_at: r.created_at,
               updated_at: r.updated_at,
            })?;
            Ok(OrganizationSummary { organization, role })
         })
         .collect()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id))]
   async fn list_members(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Vec<MemberSummary>, InfraError> {
      let rows = sqlx::query_as::<_, MemberRow>(
         r#"
            SELECT u.id AS user_id, u.email, u.name, u.avatar_url, m.role,
                   m.created_at AS joined_at
            FROM organization_members m
            JOIN users u ON u.id = m.user_id
            WHERE m.organization_id = $1
            ORDER BY m.created_at ASC
            "#,
      )
      .bind(organization_id.as_uuid())
      .fetch_all(&self.pool)
      .await?;

      rows
         .into_iter()
         .map(|r| {
            Ok(MemberSummary {
               user_id:    UserId::from_uuid(r.user_id),
               email:      r.email,
               name:       r.name,
               avatar_url: r.avatar_url,
               role:       parse_role(&r.role)?,
               joined_at:  r.joined_at,
            })
         })
         .collect()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, %user_id))]
   async fn update_member_role(
      &self,
      organization_id: &OrganizationId,
      user_id: &UserId,
      role: OrgRole,
   ) -> Result<(), InfraError> {
      let mut tx = self.pool.begin().await?;
      lock_organization(&mut *tx, organization_id).await?;

      let result = sqlx::query(
         r#"
            UPDATE organization_members SET role = $3
            WHERE organization_id = $1 AND user_id = $2
              AND ($3 = 'owner' OR role <> 'owner' OR (
                  SELECT COUNT(*) FROM organization_members
                  WHERE organization_id = $1 AND role = 'owner'
              ) > 1)
            "#,
      )
      .bind(organization_id.as_uuid())
      .bind(user_id.as_uuid())
      .bind(role.as_str())
      .execute(&mut *tx)
      .await?;

      if result.rows_affected() == 0 {
         return Err(InfraError::conflict("Membership", user_id.to_string()));
      }
      tx.commit().await?;
      Ok(())
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, %user_id))]
   async fn delete_membership(
      &self,
      organization_id: &OrganizationId,
      user_id: &UserId,
   ) -> Result<(), InfraError> {
      let mut tx = self.pool.begin().await?;
      lock_organization(&mut *tx, organization_id).await?;

      let result = sqlx::query(
         r#"
            DELETE FROM organization_members
            WHERE organization_id = $1 AND user_id = $2
              AND (role <> 'owner' OR (
                  SELECT COUNT(*) FROM organization_members
                  WHERE organization_id = $1 AND role = 'owner'
              ) > 1)
            "#,
      )
      .bind(organization_id.as_uuid())
      .bind(user_id.as_uuid())
      .execute(&mut *tx)
      .await?;

      if result.rows_affected() == 0 {
         return Err(InfraError::conflict("Membership", user_id.to_string()));
      }
      tx.commit().await?;
      Ok(())
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id))]
   async fn count_owners(&self, organization_id: &OrganizationId) -> Result<i64, InfraError> {
      let count: i64 = sqlx::query_scalar(
         "SELECT COUNT(*) FROM organization_members WHERE organization_id = $1 AND role = 'owner'",
      )
      .bind(organization_id.as_uuid())
      .fetch_one(&self.pool)
      .await?;
      Ok(count)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_トレイトはsendとsyncを実装している() {
      fn assert_send_sync<T: Send + Sync>() {}
      assert_send_sync::<PostgresOrganizationRepository>();
   }

   #[test]
   fn test_未知のロールは変換エラー() {
      assert!(parse_role("owner").is_ok());
      assert!(parse_role("guest").is_err());
   }
}
