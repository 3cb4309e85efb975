//! # CustomerRepository
//!
//! 顧客とタグ付けの永続化を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **テナント分離**: すべてのクエリで組織 ID を条件に含める
//! - **タグは集約の一部**: `tag_ids` は `customer_tags` から `array_agg` で復元し、
//!   書き込み時は顧客行と同一トランザクションで置き換える
//! - **メール重複は Conflict**: 組織内の部分ユニークインデックス違反を
//!   `InfraErrorKind::Conflict` に変換する

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kokyaku_domain::{
   customer::{Customer, CustomerId, CustomerName, CustomerProfile},
   organization::OrganizationId,
   tag::TagId,
   value_objects::Email,
};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::PageRequest;
use crate::error::InfraError;

/// 顧客一覧の検索条件
#[derive(Debug, Clone, Default)]
pub struct CustomerQuery {
   /// 名前・メールアドレス・会社名の部分一致（大文字小文字を区別しない）
   pub q:        Option<String>,
   pub city:     Option<String>,
   pub category: Option<String>,
   pub tag_id:   Option<TagId>,
   pub page:     PageRequest,
}

/// 顧客リポジトリトレイト
#[async_trait]
pub trait CustomerRepository: Send + Sync {
   /// 条件に一致する顧客を作成日時の新しい順に取得し、総件数と合わせて返す
   async fn search(
      &self,
      organization_id: &OrganizationId,
      query: &CustomerQuery,
   ) -> Result<(Vec<Customer>, i64), InfraError>;

   async fn find_by_id(
      &self,
      organization_id: &OrganizationId,
      id: &CustomerId,
   ) -> Result<Option<Customer>, InfraError>;

   async fn find_by_email(
      &self,
      organization_id: &OrganizationId,
      email: &Email,
   ) -> Result<Option<Customer>, InfraError>;

   /// 配信可能な顧客（メールあり・配信停止なし）を作成日時順に取得する
   async fn find_all_mailable(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Vec<Customer>, InfraError>;

   /// 顧客をタグ付きで登録する
   async fn insert(&self, customer: &Customer) -> Result<(), InfraError>;

   /// プロフィールと配信停止状態を更新する（タグは変更しない）
   async fn update(&self, customer: &Customer) -> Result<(), InfraError>;

   /// タグ付けを置き換える
   ///
   /// 他組織のタグ ID は無視する。
   async fn replace_tags(&self, customer: &Customer) -> Result<(), InfraError>;

   /// 削除する。対象がなければ `false`
   async fn delete(
      &self,
      organization_id: &OrganizationId,
      id: &CustomerId,
   ) -> Result<bool, InfraError>;

   /// 登録済みの市区町村の一覧（重複なし、昇順）
   async fn distinct_cities(&self, organization_id: &OrganizationId)
   -> Result<Vec<String>, InfraError>;

   /// 登録済みのカテゴリの一覧（重複なし、昇順）
   async fn distinct_categories(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Vec<String>, InfraError>;
}

#[derive(sqlx::FromRow)]
struct CustomerRow {
   id:              Uuid,
   organization_id: Uuid,
   name:            String,
   email:           Option<String>,
   phone:           Option<String>,
   company:         Option<String>,
   city:            Option<String>,
   category:        Option<String>,
   notes:           Option<String>,
   tag_ids:         Vec<Uuid>,
   unsubscribed_at: Option<DateTime<Utc>>,
   created_at:      DateTime<Utc>,
   updated_at:      DateTime<Utc>,
}

impl TryFrom<CustomerRow> for Customer {
   type Error = InfraError;

   fn try_from(row: CustomerRow) -> Result<Self, Self::Error> {
      let to_infra = |e: kokyaku_domain::DomainError| InfraError::unexpected(e.to_string());
      let profile = CustomerProfile {
         name:     CustomerName::new(row.name).map_err(to_infra)?,
         email:    row.email.map(Email::new).transpose().map_err(to_infra)?,
         phone:    row.phone,
         company:  row.company,
         city:     row.city,
         category: row.category,
         notes:    row.notes,
      };
      Ok(Customer::from_db(
         CustomerId::from_uuid(row.id),
         OrganizationId::from_uuid(row.organization_id),
         profile,
         row.tag_ids.into_iter().map(TagId::from_uuid).collect(),
         row.unsubscribed_at,
         row.created_at,
         row.updated_at,
      ))
   }
}

const CUSTOMER_SELECT: &str = r#"
   SELECT c.id, c.organization_id, c.name, c.email, c.phone, c.company, c.city,
          c.category, c.notes,
          COALESCE(
              (SELECT array_agg(ct.tag_id ORDER BY ct.tag_id)
               FROM customer_tags ct WHERE ct.customer_id = c.id),
              '{}'
          ) AS tag_ids,
          c.unsubscribed_at, c.created_at, c.updated_at
   FROM customers c
"#;

/// 検索条件（$1 = 組織, $2 = q, $3 = city, $4 = category, $5 = tag_id）
const CUSTOMER_FILTER: &str = r#"
   WHERE c.organization_id = $1
     AND ($2::text IS NULL
          OR c.name ILIKE $2 ESCAPE '\'
          OR c.email ILIKE $2 ESCAPE '\'
          OR c.company ILIKE $2 ESCAPE '\')
     AND ($3::text IS NULL OR lower(c.city) = lower($3))
     AND ($4::text IS NULL OR lower(c.category) = lower($4))
     AND ($5::uuid IS NULL OR EXISTS (
          SELECT 1 FROM customer_tags ct WHERE ct.customer_id = c.id AND ct.tag_id = $5))
"#;

/// ILIKE 用の部分一致パターンを組み立てる（`%` `_` `\` はエスケープ）
pub(crate) fn contains_pattern(q: &str) -> String {
   let mut escaped = String::with_capacity(q.len() + 2);
   escaped.push('%');
   for c in q.chars() {
      if matches!(c, '%' | '_' | '\\') {
         escaped.push('\\');
      }
      escaped.push(c);
   }
   escaped.push('%');
   escaped
}

fn non_blank(value: &Option<String>) -> Option<&str> {
   value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn email_conflict(customer: &Customer) -> impl FnOnce(sqlx::Error) -> InfraError + '_ {
   move |e| {
      InfraError::from_unique_violation(
         e,
         "Customer",
         customer.email().map(Email::as_str).unwrap_or_default(),
      )
   }
}

/// 顧客行を登録する（トランザクション内で使う）
pub(crate) async fn insert_customer_row(
   conn: &mut PgConnection,
   customer: &Customer,
) -> Result<(), InfraError> {
   let profile = customer.profile();

   sqlx::query(
      r#"
         INSERT INTO customers (
             id, organization_id, name, email, phone, company, city, category, notes,
             unsubscribed_at, created_at, updated_at
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
         "#,
   )
   .bind(customer.id().as_uuid())
   .bind(customer.organization_id().as_uuid())
   .bind(profile.name.as_str())
   .bind(profile.email.as_ref().map(Email::as_str))
   .bind(profile.phone.as_deref())
   .bind(profile.company.as_deref())
   .bind(profile.city.as_deref())
   .bind(profile.category.as_deref())
   .bind(profile.notes.as_deref())
   .bind(customer.unsubscribed_at())
   .bind(customer.created_at())
   .bind(customer.updated_at())
   .execute(&mut *conn)
   .await
   .map_err(email_conflict(customer))?;

   write_tags(conn, customer).await
}

/// タグ付けを置き換える（トランザクション内で使う）
async fn write_tags(conn: &mut PgConnection, customer: &Customer) -> Result<(), InfraError> {
   sqlx::query("DELETE FROM customer_tags WHERE customer_id = $1")
      .bind(customer.id().as_uuid())
      .execute(&mut *conn)
      .await?;

   if customer.tag_ids().is_empty() {
      return Ok(());
   }

   let tag_ids: Vec<Uuid> = customer.tag_ids().iter().map(|t| *t.as_uuid()).collect();
   sqlx::query(
      r#"
         INSERT INTO customer_tags (customer_id, tag_id, organization_id)
         SELECT $1, t.id, t.organization_id
         FROM tags t
         WHERE t.id = ANY($2) AND t.organization_id = $3
         ON CONFLICT DO NOTHING
         "#,
   )
   .bind(customer.id().as_uuid())
   .bind(tag_ids)
   .bind(customer.organization_id().as_uuid())
   .execute(&mut *conn)
   .await?;
   Ok(())
}

/// PostgreSQL 実装の CustomerRepository
#[derive(Debug, Clone)]
pub struct PostgresCustomerRepository {
   pool: PgPool,
}

impl PostgresCustomerRepository {
   pub fn new(pool: PgPool) -> Self {
      Self { pool }
   }
}

#[async_trait]
impl CustomerRepository for PostgresCustomerRepository {
   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id))]
   async fn search(
      &self,
      organization_id: &OrganizationId,
      query: &CustomerQuery,
   ) -> Result<(Vec<Customer>, i64), InfraError> {
      let pattern = non_blank(&query.q).map(contains_pattern);
      let city = non_blank(&query.city);
      let category = non_blank(&query.category);
      let tag_id = query.tag_id.as_ref().map(|t| *t.as_uuid());

      let total: i64 =
         sqlx::query_scalar(&format!("SELECT COUNT(*) FROM customers c {CUSTOMER_FILTER}"))
            .bind(organization_id.as_uuid())
            .bind(pattern.as_deref())
            .bind(city)
            .bind(category)
            .bind(tag_id)
            .fetch_one(&self.pool)
            .await?;

      let rows = sqlx::query_as::<_, CustomerRow>(&format!(
         "{CUSTOMER_SELECT} {CUSTOMER_FILTER} ORDER BY c.created_at DESC, c.id DESC LIMIT $6 OFFSET $7"
      ))
      .bind(organization_id.as_uuid())
      .bind(pattern.as_deref())
      .bind(city)
      .bind(category)
      .bind(tag_id)
      .bind(query.page.limit)
      .bind(query.page.offset)
      .fetch_all(&self.pool)
      .await?;

      let customers = rows
         .into_iter()
         .map(Customer::try_from)
         .collect::<Result<Vec<_>, _>>()?;
      Ok((customers, total))
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, %id))]
   async fn find_by_id(
      &self,
      organization_id: &OrganizationId,
      id: &CustomerId,
   ) -> Result<Option<Customer>, InfraError> {
      let row = sqlx::query_as::<_, CustomerRow>(&format!(
         "{CUSTOMER_SELECT} WHERE c.organization_id = $1 AND c.id = $2"
      ))
      .bind(organization_id.as_uuid())
      .bind(id.as_uuid())
      .fetch_optional(&self.pool)
      .await?;

      row.map(Customer::try_from).transpose()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id))]
   async fn find_by_email(
      &self,
      organization_id: &OrganizationId,
      email: &Email,
   ) -> Result<Option<Customer>, InfraError> {
      let row = sqlx::query_as::<_, CustomerRow>(&format!(
         "{CUSTOMER_SELECT} WHERE c.organization_id = $1 AND c.email = $2"
      ))
      .bind(organization_id.as_uuid())
      .bind(email.as_str())
      .fetch_optional(&self.pool)
      .await?;

      row.map(Customer::try_from).transpose()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id))]
   async fn find_all_mailable(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Vec<Customer>, InfraError> {
      let rows = sqlx::query_as::<_, CustomerRow>(&format!(
         r#"
            {CUSTOMER_SELECT}
            WHERE c.organization_id = $1
              AND c.email IS NOT NULL
              AND c.unsubscribed_at IS NULL
            ORDER BY c.created_at ASC, c.id ASC
            "#
      ))
      .bind(organization_id.as_uuid())
      .fetch_all(&self.pool)
      .await?;

      rows.into_iter().map(Customer::try_from).collect()
   }

   #[tracing::instrument(skip_all, level = "debug", fields(id = %customer.id()))]
   async fn insert(&self, customer: &Customer) -> Result<(), InfraError> {
      let mut tx = self.pool.begin().await?;
      insert_customer_row(&mut *tx, customer).await?;
      tx.commit().await?;
      Ok(())
   }

   #[tracing::instrument(skip_all, level = "debug", fields(id = %customer.id()))]
   async fn update(&self, customer: &Customer) -> Result<(), InfraError> {
      let profile = customer.profile();

      sqlx::query(
         r#"
            UPDATE customers SET
                name = $3, email = $4, phone = $5, company = $6, city = $7,
                category = $8, notes = $9, unsubscribed_at = $10, updated_at = $11
            WHERE organization_id = $1 AND id = $2
            "#,
      )
      .bind(customer.organization_id().as_uuid())
      .bind(customer.id().as_uuid())
      .bind(profile.name.as_str())
      .bind(profile.email.as_ref().map(Email::as_str))
      .bind(profile.phone.as_deref())
      .bind(profile.company.as_deref())
      .bind(profile.city.as_deref())
      .bind(profile.category.as_deref())
      .bind(profile.notes.as_deref())
      .bind(customer.unsubscribed_at())
      .bind(customer.updated_at())
      .execute(&self.pool)
      .await
      .map_err(email_conflict(customer))?;
      Ok(())
   }

   #[tracing::instrument(skip_all, level = "debug", fields(id = %customer.id()))]
   async fn replace_tags(&self, customer: &Customer) -> Result<(), InfraError> {
      let mut tx = self.pool.begin().await?;

      sqlx::query("UPDATE customers SET updated_at = $3 WHERE organization_id = $1 AND id = $2")
         .bind(customer.organization_id().as_uuid())
         .bind(customer.id().as_uuid())
         .bind(customer.updated_at())
         .execute(&mut *tx)
         .await?;

      write_tags(&mut *tx, customer).await?;
      tx.commit().await?;
      Ok(())
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id, %id))]
   async fn delete(
      &self,
      organization_id: &OrganizationId,
      id: &CustomerId,
   ) -> Result<bool, InfraError> {
      let result = sqlx::query("DELETE FROM customers WHERE organization_id = $1 AND id = $2")
         .bind(organization_id.as_uuid())
         .bind(id.as_uuid())
         .execute(&self.pool)
         .await?;
      Ok(result.rows_affected() > 0)
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id))]
   async fn distinct_cities(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Vec<String>, InfraError> {
      let cities = sqlx::query_scalar(
         r#"
            SELECT DISTINCT city FROM customers
            WHERE organization_id = $1 AND city IS NOT NULL
            ORDER BY city
            "#,
      )
      .bind(organization_id.as_uuid())
      .fetch_all(&self.pool)
      .await?;
      Ok(cities)
   }

   #[tracing::instrument(skip_all, level = "debug", fields(%organization_id))]
   async fn distinct_categories(
      &self,
      organization_id: &OrganizationId,
   ) -> Result<Vec<String>, InfraError> {
      let categories = sqlx::query_scalar(
         r#"
            SELECT DISTINCT category FROM customers
            WHERE organization_id = $1 AND category IS NOT NULL
            ORDER BY category
            "#,
      )
      .bind(organization_id.as_uuid())
      .fetch_all(&self.pool)
      .await?;
      Ok(categories)
   }
}

#[cfg(test)]
mod tests {
   use pretty_assertions::assert_eq;
   use rstest::rstest;

   use super::*;

   #[test]
   fn test_トレイトはsendとsyncを実装している() {
      fn assert_send_sync<T: Send + Sync>() {}
      assert_send_sync::<PostgresCustomerRepository>();
   }

   #[rstest]
   #[case("山田", "%山田%")]
   #[case("100%", "%100\\%%")]
   #[case("a_b", "%a\\_b%")]
   #[case("c:\\x", "%c:\\\\x%")]
   fn test_部分一致パターンはワイルドカードをエスケープする(
      #[case] input: &str,
      #[case] expected: &str,
   ) {
      assert_eq!(contains_pattern(input), expected);
   }

   #[test]
   fn test_空白だけの検索語は条件にしない() {
      assert_eq!(non_blank(&Some("  ".to_string())), None);
      assert_eq!(non_blank(&Some(" 大阪 ".to_string())), Some("大阪"));
      assert_eq!(non_blank(&None), None);
   }
}
