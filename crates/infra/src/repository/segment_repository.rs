//! # SegmentRepository
//!
//! セグメント（顧客属性の条件式）の永続化を担当するリポジトリ。
//!
//! 条件式 [`SegmentDefinition`] は JSONB 列にそのまま保存する。
//! 評価は DB ではなくドメイン層で行うため、SQL 側で条件を解釈しない。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kokyaku_domain::{
   organization::OrganizationId,
   segment::{Segment, SegmentDefinition, SegmentId, SegmentName},
};
use sqlx::{PgPool, types::Json};
use uuid::Uuid;

use crate::error::InfraError;

/// セグメントリポジトリトレイト
#[async_trait]
pub trait SegmentRepository: Send + Sync {
   /// 組織のセグメントを名前順に取得する
   async fn list(&self, organization_id: &OrganizationId) -> Result<Vec<Segment>, InfraError>;

   async fn find_by_id(
      &self,
      organization_id: &OrganizationId,
      id: &SegmentId,
   ) -> Result<Option<Segment>, InfraError>;

   /// 指定 ID のうち組織に存在するセグメントを取得する
   async fn find_by_ids(
      &self,
      organization_id: &OrganizationId,
      ids: &[SegmentId],
   ) -> Result<Vec<Segment>, InfraError>;

   async fn insert(&self, segment: &Segment) -> Result<(), InfraError>;

   async fn update(&self, segment: &Segment) -> Result<(), InfraError>;

   async fn delete(
      &self,
      organization_id: &OrganizationId,
      id: &SegmentId,
   ) -> Result<bool, InfraError>;
}

#[derive(sqlx::FromRow)]
struct SegmentRow {
   id:              Uuid,
   organization_id: Uuid,
   name:            String,
   description:     Option<String>,
   definition:      Json<SegmentDefinition>,
   created_at:      DateTime<Utc>,
   updated_at:      DateTime<Utc>,
}

impl TryFrom<SegmentRow> for Segment {
   type Error = InfraError;

   fn try_from(row: SegmentRow) -> Result<Self, Self::Error> {
      Ok(Segment::from_db(
         SegmentId::from_uuid(row.id),
         OrganizationId::from_uuid(row.organization_id),
         SegmentName::new(row.name).map_err(|e| InfraError::unexpected(e.to_string()))?,
         row.description,
         row.definition.0,
         row.created_at,
         row.updated_at,
      ))
   }
}

const SEGMENT_COLUMNS: &str =
   "id, organization_id, name, description, definition, created_at, updated_at";

/// PostgreSQL 実装の SegmentRepository
#[derive(Debug, Clone)]
pub struct PostgresSegmentRepository {
   pool: PgPool,
}

impl PostgresSegmentRepository {
   pub fn new(pool: PgPool) -> Self {
      Self { pool }
   }
}

#[async_trait]
impl SegmentRepository for PostgresSegmentRepository {
   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id))]
   async fn list(&self, organization_id: &OrganizationId) -> Result<Vec<Segment>, InfraError> {
      let rows = sqlx::query_as::<_, SegmentRow>(&format!(
         "SELECT {SEGMENT_COLUMNS} FROM segments WHERE organization_id = $1 ORDER BY lower(name)"
      ))
      .bind(organization_id.as_uuid())
      .fetch_all(&self.pool)
      .await?;

      rows.into_iter().map(Segment::try_from).collect()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, %id))]
   async fn find_by_id(
      &self,
      organization_id: &OrganizationId,
      id: &SegmentId,
   ) -> Result<Option<Segment>, InfraError> {
      let row = sqlx::query_as::<_, SegmentRow>(&format!(
         "SELECT {SEGMENT_COLUMNS} FROM segments WHERE organization_id = $1 AND id = $2"
      ))
      .bind(organization_id.as_uuid())
      .bind(id.as_uuid())
      .fetch_optional(&self.pool)
      .await?;

      row.map(Segment::try_from).transpose()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, count = ids.len()))]
   async fn find_by_ids(
      &self,
      organization_id: &OrganizationId,
      ids: &[SegmentId],
   ) -> Result<Vec<Segment>, InfraError> {
      if ids.is_empty() {
         return Ok(Vec::new());
      }

      let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
      let rows = sqlx::query_as::<_, SegmentRow>(&format!(
         "SELECT {SEGMENT_COLUMNS} FROM segments WHERE organization_id = $1 AND id = ANY($2)"
      ))
      .bind(organization_id.as_uuid())
      .bind(uuids)
      .fetch_all(&self.pool)
      .await?;

      rows.into_iter().map(Segment::try_from).collect()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(id = %segment.id()))]
   async fn insert(&self, segment: &Segment) -> Result<(), InfraError> {
      sqlx::query(&format!(
         "INSERT INTO segments ({SEGMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
      ))
      .bind(segment.id().as_uuid())
      .bind(segment.organization_id().as_uuid())
      .bind(segment.name().as_str())
      .bind(segment.description())
      .bind(Json(segment.definition()))
      .bind(segment.created_at())
      .bind(segment.updated_at())
      .execute(&self.pool)
      .await?;
      Ok(())
   }

   #[tracing::instrument(skip_all, level = "debug", fields(id = %segment.id()))]
   async fn update(&self, segment: &Segment) -> Result<(), InfraError> {
      sqlx::query(
         r#"
            UPDATE segments
            SET name = $3, description = $4, definition = $5, updated_at = $6
            WHERE organization_id = $1 AND id = $2
            "#,
      )
      .bind(segment.organization_id().as_uuid())
      .bind(segment.id().as_uuid())
      .bind(segment.name().as_str())
      .bind(segment.description())
      .bind(Json(segment.definition()))
      .bind(segment.updated_at())
      .execute(&self.pool)
      .await?;
      Ok(())
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, %id))]
   async fn delete(
      &self,
      organization_id: &OrganizationId,
      id: &SegmentId,
   ) -> Result<bool, InfraError> {
      let result = sqlx::query("DELETE FROM segments WHERE organization_id = $1 AND id = $2")
         .bind(organization_id.as_uuid())
         .bind(id.as_uuid())
         .execute(&self.pool)
         .await?;
      Ok(result.rows_affected() > 0)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_トレイトはsendとsyncを実装している() {
      fn assert_send_sync<T: Send + Sync>() {}
      assert_send_sync::<PostgresSegmentRepository>();
   }
}
