//! # LeadRepository
//!
//! 見込み顧客（リード）の永続化を担当するリポジトリ。
//!
//! 顧客への変換は、顧客の新規登録（既存顧客に紐付ける場合は不要）と
//! リードの `converted` への更新を同一トランザクションで行う。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kokyaku_domain::{
   customer::{Customer, CustomerId},
   lead::{Lead, LeadId, LeadName, LeadProfile, LeadStatus},
   organization::OrganizationId,
   value_objects::Email,
};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{
   PageRequest,
   customer_repository::{contains_pattern, insert_customer_row},
};
use crate::error::InfraError;

/// リード一覧の検索条件
#[derive(Debug, Clone, Default)]
pub struct LeadQuery {
   pub status: Option<LeadStatus>,
   /// 名前・メールアドレス・会社名の部分一致
   pub q:      Option<String>,
   pub page:   PageRequest,
}

/// リードリポジトリトレイト
#[async_trait]
pub trait LeadRepository: Send + Sync {
   /// 条件に一致するリードを作成日時の新しい順に取得し、総件数と合わせて返す
   async fn search(
      &self,
      organization_id: &OrganizationId,
      query: &LeadQuery,
   ) -> Result<(Vec<Lead>, i64), InfraError>;

   async fn find_by_id(
      &self,
      organization_id: &OrganizationId,
      id: &LeadId,
   ) -> Result<Option<Lead>, InfraError>;

   async fn insert(&self, lead: &Lead) -> Result<(), InfraError>;

   /// プロフィールとステータスを更新する
   async fn update(&self, lead: &Lead) -> Result<(), InfraError>;

   async fn delete(&self, organization_id: &OrganizationId, id: &LeadId)
   -> Result<bool, InfraError>;

   /// 顧客への変換を保存する
   ///
   /// `new_customer` が `Some` の場合は同じトランザクションで顧客を登録する。
   /// リードが既に変換済みなら何も書かずに `Conflict`。
   async fn save_conversion(
      &self,
      lead: &Lead,
      new_customer: Option<&Customer>,
   ) -> Result<(), InfraError>;
}

#[derive(sqlx::FromRow)]
struct LeadRow {
   id:                    Uuid,
   organization_id:       Uuid,
   name:                  String,
   email:                 Option<String>,
   phone:                 Option<String>,
   company:               Option<String>,
   source:                Option<String>,
   status:                String,
   notes:                 Option<String>,
   converted_customer_id: Option<Uuid>,
   converted_at:          Option<DateTime<Utc>>,
   created_at:            DateTime<Utc>,
   updated_at:            DateTime<Utc>,
}

impl TryFrom<LeadRow> for Lead {
   type Error = InfraError;

   fn try_from(row: LeadRow) -> Result<Self, Self::Error> {
      let to_infra = |e: kokyaku_domain::DomainError| InfraError::unexpected(e.to_string());
      let profile = LeadProfile {
         name:    LeadName::new(row.name).map_err(to_infra)?,
         email:   row.email.map(Email::new).transpose().map_err(to_infra)?,
         phone:   row.phone,
         company: row.company,
         source:  row.source,
         notes:   row.notes,
      };
      Ok(Lead::from_db(
         LeadId::from_uuid(row.id),
         OrganizationId::from_uuid(row.organization_id),
         profile,
         row.status.parse::<LeadStatus>().map_err(to_infra)?,
         row.converted_customer_id.map(CustomerId::from_uuid),
         row.converted_at,
         row.created_at,
         row.updated_at,
      ))
   }
}

const LEAD_COLUMNS: &str = "id, organization_id, name, email, phone, company, source, status, \
                            notes, converted_customer_id, converted_at, created_at, updated_at";

/// 検索条件（$1 = 組織, $2 = status, $3 = q）
const LEAD_FILTER: &str = r#"
   WHERE organization_id = $1
     AND ($2::text IS NULL OR status = $2)
     AND ($3::text IS NULL
          OR name ILIKE $3 ESCAPE '\'
          OR email ILIKE $3 ESCAPE '\'
          OR company ILIKE $3 ESCAPE '\')
"#;

/// リード行を書き戻し、更新した行数を返す
///
/// `unconverted_only` のときは変換済みの行を更新しない。
async fn update_lead_row(
   conn: &mut PgConnection,
   lead: &Lead,
   unconverted_only: bool,
) -> Result<u64, InfraError> {
   let profile = lead.profile();

   let result = sqlx::query(
      r#"
         UPDATE leads SET
             name = $3, email = $4, phone = $5, company = $6, source = $7, status = $8,
             notes = $9, converted_customer_id = $10, converted_at = $11, updated_at = $12
         WHERE organization_id = $1 AND id = $2
           AND (NOT $13 OR status <> 'converted')
         "#,
   )
   .bind(lead.organization_id().as_uuid())
   .bind(lead.id().as_uuid())
   .bind(profile.name.as_str())
   .bind(profile.email.as_ref().map(Email::as_str))
   .bind(profile.phone.as_deref())
   .bind(profile.company.as_deref())
   .bind(profile.source.as_deref())
   .bind(lead.status().as_str())
   .bind(profile.notes.as_deref())
   .bind(lead.converted_customer_id().map(CustomerId::as_uuid))
   .bind(lead.converted_at())
   .bind(lead.updated_at())
   .bind(unconverted_only)
   .execute(&mut *conn)
   .await?;
   Ok(result.rows_affected())
}

/// PostgreSQL 実装の LeadRepository
#[derive(Debug, Clone)]
pub struct PostgresLeadRepository {
   pool: PgPool,
}

impl PostgresLeadRepository {
   pub fn new(pool: PgPool) -> Self {
      Self { pool }
   }
}

#[async_trait]
impl LeadRepository for PostgresLeadRepository {
   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id))]
   async fn search(
      &self,
      organization_id: &OrganizationId,
      query: &LeadQuery,
   ) -> Result<(Vec<Lead>, i64), InfraError> {
      let status = query.status.map(LeadStatus::as_str);
      let pattern = query
         .q
         .as_deref()
         .map(str::trim)
         .filter(|q| !q.is_empty())
         .map(contains_pattern);

      let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM leads {LEAD_FILTER}"))
         .bind(organization_id.as_uuid())
         .bind(status)
         .bind(pattern.as_deref())
         .fetch_one(&self.pool)
         .await?;

      let rows = sqlx::query_as::<_, LeadRow>(&format!(
         "SELECT {LEAD_COLUMNS} FROM leads {LEAD_FILTER} \
          ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5"
      ))
      .bind(organization_id.as_uuid())
      .bind(status)
      .bind(pattern.as_deref())
      .bind(query.page.limit)
      .bind(query.page.offset)
      .fetch_all(&self.pool)
      .await?;

      let leads = rows.into_iter().map(Lead::try_from).collect::<Result<Vec<_>, _>>()?;
      Ok((leads, total))
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, %id))]
   async fn find_by_id(
      &self,
      organization_id: &OrganizationId,
      id: &LeadId,
   ) -> Result<Option<Lead>, InfraError> {
      let row = sqlx::query_as::<_, LeadRow>(&format!(
         "SELECT {LEAD_COLUMNS} FROM leads WHERE organization_id = $1 AND id = $2"
      ))
      .bind(organization_id.as_uuid())
      .bind(id.as_uuid())
      .fetch_optional(&self.pool)
      .await?;

      row.map(Lead::try_from).transpose()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(id = %lead.id()))]
   async fn insert(&self, lead: &Lead) -> Result<(), InfraError> {
      let profile = lead.profile();

      sqlx::query(&format!(
         "INSERT INTO leads ({LEAD_COLUMNS}) \
          VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
      ))
      .bind(lead.id().as_uuid())
      .bind(lead.organization_id().as_uuid())
      .bind(profile.name.as_str())
      .bind(profile.email.as_ref().map(Email::as_str))
      .bind(profile.phone.as_deref())
      .bind(profile.company.as_deref())
      .bind(profile.source.as_deref())
      .bind(lead.status().as_str())
      .bind(profile.notes.as_deref())
      .bind(lead.converted_customer_id().map(CustomerId::as_uuid))
      .bind(lead.converted_at())
      .bind(lead.created_at())
      .bind(lead.updated_at())
      .execute(&self.pool)
      .await?;
      Ok(())
   }

   #[tracing::instrument(skip_all, level = "debug", fields(id = %lead.id()))]
   async fn update(&self, lead: &Lead) -> Result<(), InfraError> {
      let mut conn = self.pool.acquire().await?;
      update_lead_row(&mut *conn, lead, false).await?;
      Ok(())
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, %id))]
   async fn delete(
      &self,
      organization_id: &OrganizationId,
      id: &LeadId,
   ) -> Result<bool, InfraError> {
      let result = sqlx::query("DELETE FROM leads WHERE organization_id = $1 AND id = $2")
         .bind(organization_id.as_uuid())
         .bind(id.as_uuid())
         .execute(&self.pool)
         .await?;
      Ok(result.rows_affected() > 0)
   }

   #[tracing::instrument(skip_all, level = "debug", fields(id = %lead.id()))]
   async fn save_conversion(
      &self,
      lead: &Lead,
      new_customer: Option<&Customer>,
   ) -> Result<(), InfraError> {
      let mut tx = self.pool.begin().await?;

      // 先にリード行を更新してロックし、同時の変換を 1 件に絞る
      if update_lead_row(&mut *tx, lead, true).await? == 0 {
         return Err(InfraError::conflict("Lead", lead.id().to_string()));
      }
      if let Some(customer) = new_customer {
         insert_customer_row(&mut *tx, customer).await?;
      }

      tx.commit().await?;
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_トレイトはsendとsyncを実装している() {
      fn assert_send_sync<T: Send + Sync>() {}
      assert_send_sync::<PostgresLeadRepository>();
   }

   #[test]
   fn test_未知のステータスの行は変換エラー() {
      let row = LeadRow {
         id:                    Uuid::now_v7(),
         organization_id:       Uuid::now_v7(),
         name:                  "佐藤".to_string(),
         email:                 None,
         phone:                 None,
         company:               None,
         source:                None,
         status:                "archived".to_string(),
         notes:                 None,
         converted_customer_id: None,
         converted_at:          None,
         created_at:            Utc::now(),
         updated_at:            Utc::now(),
      };
      assert!(Lead::try_from(row).is_err());
   }
}
