//! # TagRepository
//!
//! 顧客タグの永続化を担当するリポジトリ。
//!
//! タグ名は組織内で大文字小文字を区別せず一意（`lower(name)` のユニークインデックス）。
//! タグの削除は `customer_tags` の外部キー（ON DELETE CASCADE）で顧客から外れる。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kokyaku_domain::{
   organization::OrganizationId,
   tag::{Tag, TagColor, TagId, TagName},
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// 付与されている顧客数つきのタグ
#[derive(Debug, Clone)]
pub struct TagWithCount {
   pub tag:            Tag,
   pub customer_count: i64,
}

/// タグリポジトリトレイト
#[async_trait]
pub trait TagRepository: Send + Sync {
   /// タグを名前順に、付与されている顧客数と合わせて取得する
   async fn list_with_counts(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Vec<TagWithCount>, InfraError>;

   async fn find_by_id(
      &self,
      organization_id: &OrganizationId,
      id: &TagId,
   ) -> Result<Option<Tag>, InfraError>;

   /// 指定 ID のうち組織に存在するタグを取得する
   async fn find_by_ids(
      &self,
      organization_id: &OrganizationId,
      ids: &[TagId],
   ) -> Result<Vec<Tag>, InfraError>;

   /// 登録する。同名タグがあれば `Conflict`
   async fn insert(&self, tag: &Tag) -> Result<(), InfraError>;

   /// 名前と色を更新する。同名タグがあれば `Conflict`
   async fn update(&self, tag: &Tag) -> Result<(), InfraError>;

   async fn delete(&self, organization_id: &OrganizationId, id: &TagId)
   -> Result<bool, InfraError>;
}

#[derive(sqlx::FromRow)]
struct TagRow {
   id:              Uuid,
   organization_id: Uuid,
   name:            String,
   color:           String,
   created_at:      DateTime<Utc>,
}

impl TryFrom<TagRow> for Tag {
   type Error = InfraError;

   fn try_from(row: TagRow) -> Result<Self, Self::Error> {
      let to_infra = |e: kokyaku_domain::DomainError| InfraError::unexpected(e.to_string());
      Ok(Tag::from_db(
         TagId::from_uuid(row.id),
         OrganizationId::from_uuid(row.organization_id),
         TagName::new(row.name).map_err(to_infra)?,
         TagColor::new(row.color).map_err(to_infra)?,
         row.created_at,
      ))
   }
}

#[derive(sqlx::FromRow)]
struct TagWithCountRow {
   #[sqlx(flatten)]
   tag:            TagRow,
   customer_count: i64,
}

/// PostgreSQL 実装の TagRepository
#[derive(Debug, Clone)]
pub struct PostgresTagRepository {
   pool: PgPool,
}

impl PostgresTagRepository {
   pub fn new(pool: PgPool) -> Self {
      Self { pool }
   }
}

#[async_trait]
impl TagRepository for PostgresTagRepository {
   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id))]
   async fn list_with_counts(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Vec<TagWithCount>, InfraError> {
      let rows = sqlx::query_as::<_, TagWithCountRow>(
         r#"
            SELECT t.id, t.organization_id, t.name, t.color, t.created_at,
                   COUNT(ct.customer_id) AS customer_count
            FROM tags t
            LEFT JOIN customer_tags ct ON ct.tag_id = t.id
            WHERE t.organization_id = $1
            GROUP BY t.id
            ORDER BY lower(t.name)
            "#,
      )
      .bind(organization_id.as_uuid())
      .fetch_all(&self.pool)
      .await?;

      rows
         .into_iter()
         .map(|r| {
            Ok(TagWithCount {
               tag:            Tag::try_from(r.tag)?,
               customer_count: r.customer_count,
            })
         })
         .collect()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, %id))]
   async fn find_by_id(
      &self,
      organization_id: &OrganizationId,
      id: &TagId,
   ) -> Result<Option<Tag>, InfraError> {
      let row = sqlx::query_as::<_, TagRow>(
         r#"
            SELECT id, organization_id, name, color, created_at
            FROM tags
            WHERE organization_id = $1 AND id = $2
            "#,
      )
      .bind(organization_id.as_uuid())
      .bind(id.as_uuid())
      .fetch_optional(&self.pool)
      .await?;

      row.map(Tag::try_from).transpose()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, count = ids.len()))]
   async fn find_by_ids(
      &self,
      organization_id: &OrganizationId,
      ids: &[TagId],
   ) -> Result<Vec<Tag>, InfraError> {
      if ids.is_empty() {
         return Ok(Vec::new());
      }

      let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
      let rows = sqlx::query_as::<_, TagRow>(
         r#"
            SELECT id, organization_id, name, color, created_at
            FROM tags
            WHERE organization_id = $1 AND id = ANY($2)
            ORDER BY lower(name)
            "#,
      )
      .bind(organization_id.as_uuid())
      .bind(uuids)
      .fetch_all(&self.pool)
      .await?;

      rows.into_iter().map(Tag::try_from).collect()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(id = %tag.id()))]
   async fn insert(&self, tag: &Tag) -> Result<(), InfraError> {
      sqlx::query(
         r#"
            INSERT INTO tags (id, organization_id, name, color, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
      )
      .bind(tag.id().as_uuid())
      .bind(tag.organization_id().as_uuid())
      .bind(tag.name().as_str())
      .bind(tag.color().as_str())
      .bind(tag.created_at())
      .execute(&self.pool)
      .await
      .map_err(|e| InfraError::from_unique_violation(e, "Tag", tag.name().as_str()))?;
      Ok(())
   }

   #[tracing::instrument(skip_all, level = "debug", fields(id = %tag.id()))]
   async fn update(&self, tag: &Tag) -> Result<(), InfraError> {
      sqlx::query("UPDATE tags SET name = $3, color = $4 WHERE organization_id = $1 AND id = $2")
         .bind(tag.organization_id().as_uuid())
         .bind(tag.id().as_uuid())
         .bind(tag.name().as_str())
         .bind(tag.color().as_str())
         .execute(&self.pool)
         .await
         .map_err(|e| InfraError::from_unique_violation(e, "Tag", tag.name().as_str()))?;
      Ok(())
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, %id))]
   async fn delete(&self, organization_id: &OrganizationId, id: &TagId) -> Result<bool, InfraError> {
      let result = sqlx::query("DELETE FROM tags WHERE organization_id = $1 AND id = $2")
         .bind(organization_id.as_uuid())
         .bind(id.as_uuid())
         .execute(&self.pool)
         .await?;
      Ok(result.rows_affected() > 0)
   }
}
