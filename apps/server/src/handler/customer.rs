//! # 顧客ハンドラ
//!
//! ## エンドポイント
//!
//! - `GET /api/v1/customers` - 一覧（`q` / `city` / `category` / `tag_id` で絞り込み）
//! - `POST /api/v1/customers` - 登録
//! - `GET /api/v1/customers/cities` - 登録済みの都市
//! - `GET /api/v1/customers/categories` - 登録済みのカテゴリ
//! - `GET /api/v1/customers/{id}` - 詳細
//! - `PUT /api/v1/customers/{id}` - 更新
//! - `DELETE /api/v1/customers/{id}` - 削除
//! - `PUT /api/v1/customers/{id}/tags` - タグ付けの置き換え
//! - `POST /api/v1/customers/{id}/resubscribe` - 配信停止の解除

use std::sync::Arc;

use axum::{
   Extension,
   Json,
   extract::{Path, Query, State},
   http::StatusCode,
   response::IntoResponse,
};
use chrono::{DateTime, Utc};
use kokyaku_domain::{
   customer::{Customer, CustomerId, CustomerInput},
   tag::TagId,
};
use kokyaku_infra::repository::CustomerQuery;
use kokyaku_shared::{ApiResponse, PageQuery, PaginatedResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::page_request;
use crate::{error::ApiError, session::CurrentSession, usecase::CustomerUseCaseImpl};

pub struct CustomerState {
   pub usecase: CustomerUseCaseImpl,
}

// --- リクエスト/レスポンス型 ---

#[derive(Debug, Default, Deserialize)]
pub struct ListCustomersQuery {
   pub q:        Option<String>,
   pub city:     Option<String>,
   pub category: Option<String>,
   pub tag_id:   Option<Uuid>,
   pub page:     Option<u32>,
   pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerRequest {
   pub name:     String,
   pub email:    Option<String>,
   pub phone:    Option<String>,
   pub company:  Option<String>,
   pub city:     Option<String>,
   pub category: Option<String>,
   pub notes:    Option<String>,
   /// 更新時は省略するとタグ付けを変更しない
   pub tag_ids:  Option<Vec<Uuid>>,
}

impl CustomerRequest {
   fn into_parts(self) -> (CustomerInput, Option<Vec<TagId>>) {
      let tag_ids = self
         .tag_ids
         .map(|ids| ids.into_iter().map(TagId::from_uuid).collect());
      (
         CustomerInput {
            name:     self.name,
            email:    self.email,
            phone:    self.phone,
            company:  self.company,
            city:     self.city,
            category: self.category,
            notes:    self.notes,
         },
         tag_ids,
      )
   }
}

#[derive(Debug, Deserialize)]
pub struct ReplaceTagsRequest {
   pub tag_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CustomerDto {
   pub id:              CustomerId,
   pub name:            String,
   pub email:           Option<String>,
   pub phone:           Option<String>,
   pub company:         Option<String>,
   pub city:            Option<String>,
   pub category:        Option<String>,
   pub notes:           Option<String>,
   pub tag_ids:         Vec<TagId>,
   pub unsubscribed_at: Option<DateTime<Utc>>,
   pub created_at:      DateTime<Utc>,
   pub updated_at:      DateTime<Utc>,
}

impl From<Customer> for CustomerDto {
   fn from(c: Customer) -> Self {
      Self {
         id:              c.id().clone(),
         name:            c.name().as_str().to_string(),
         email:           c.email().map(|e| e.as_str().to_string()),
         phone:           c.phone().map(str::to_string),
         company:         c.company().map(str::to_string),
         city:            c.city().map(str::to_string),
         category:        c.category().map(str::to_string),
         notes:           c.notes().map(str::to_string),
         tag_ids:         c.tag_ids().to_vec(),
         unsubscribed_at: c.unsubscribed_at(),
         created_at:      c.created_at(),
         updated_at:      c.updated_at(),
      }
   }
}

// --- ハンドラ ---

/// GET /api/v1/customers
pub async fn list_customers(
   State(state): State<Arc<CustomerState>>,
   Extension(session): Extension<CurrentSession>,
   Query(query): Query<ListCustomersQuery>,
) -> Result<impl IntoResponse, ApiError> {
   let (page_req, page, per_page) = page_request(PageQuery {
      page:     query.page,
      per_page: query.per_page,
   });
   let query = CustomerQuery {
      q:        query.q.filter(|q| !q.trim().is_empty()),
      city:     query.city.filter(|c| !c.is_empty()),
      category: query.category.filter(|c| !c.is_empty()),
      tag_id:   query.tag_id.map(TagId::from_uuid),
      page:     page_req,
   };
   let (customers, total) = state
      .usecase
      .list(session.data.organization_id(), &query)
      .await?;

   Ok(Json(PaginatedResponse {
      data: customers.into_iter().map(CustomerDto::from).collect::<Vec<_>>(),
      total,
      page,
      per_page,
   }))
}

/// GET /api/v1/customers/{id}
pub async fn get_customer(
   State(state): State<Arc<CustomerState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
   let customer = state
      .usecase
      .get(session.data.organization_id(), &CustomerId::from_uuid(id))
      .await?;
   Ok(Json(ApiResponse::new(CustomerDto::from(customer))))
}

/// POST /api/v1/customers
pub async fn create_customer(
   State(state): State<Arc<CustomerState>>,
   Extension(session): Extension<CurrentSession>,
   Json(req): Json<CustomerRequest>,
) -> Result<impl IntoResponse, ApiError> {
   let (input, tag_ids) = req.into_parts();
   let customer = state
      .usecase
      .create(
         session.data.organization_id(),
         input,
         tag_ids.unwrap_or_default(),
      )
      .await?;
   Ok((
      StatusCode::CREATED,
      Json(ApiResponse::new(CustomerDto::from(customer))),
   ))
}

/// PUT /api/v1/customers/{id}
pub async fn update_customer(
   State(state): State<Arc<CustomerState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
   Json(req): Json<CustomerRequest>,
) -> Result<impl IntoResponse, ApiError> {
   let (input, tag_ids) = req.into_parts();
   let customer = state
      .usecase
      .update(
         session.data.organization_id(),
         &CustomerId::from_uuid(id),
         input,
         tag_ids,
      )
      .await?;
   Ok(Json(ApiResponse::new(CustomerDto::from(customer))))
}

/// DELETE /api/v1/customers/{id}
pub async fn delete_customer(
   State(state): State<Arc<CustomerState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
   state
      .usecase
      .delete(session.data.organization_id(), &CustomerId::from_uuid(id))
      .await?;
   Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/customers/{id}/tags
pub async fn replace_customer_tags(
   State(state): State<Arc<CustomerState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
   Json(req): Json<ReplaceTagsRequest>,
) -> Result<impl IntoResponse, ApiError> {
   let customer = state
      .usecase
      .replace_tags(
         session.data.organization_id(),
         &CustomerId::from_uuid(id),
         req.tag_ids.into_iter().map(TagId::from_uuid).collect(),
      )
      .await?;
   Ok(Json(ApiResponse::new(CustomerDto::from(customer))))
}

/// POST /api/v1/customers/{id}/resubscribe
pub async fn resubscribe_customer(
   State(state): State<Arc<CustomerState>>,
   Extension(session): Extension<CurrentSession>,
   Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
   let customer = state
      .usecase
      .resubscribe(session.data.organization_id(), &CustomerId::from_uuid(id))
      .await?;
   Ok(Json(ApiResponse::new(CustomerDto::from(customer))))
}

/// GET /api/v1/customers/cities
pub async fn list_cities(
   State(state): State<Arc<CustomerState>>,
   Extension(session): Extension<CurrentSession>,
) -> Result<impl IntoResponse, ApiError> {
   let cities = state.usecase.cities(session.data.organization_id()).await?;
   Ok(Json(ApiResponse::new(cities)))
}

/// GET /api/v1/customers/categories
pub async fn list_categories(
   State(state): State<Arc<CustomerState>>,
   Extension(session): Extension<CurrentSession>,
) -> Result<impl IntoResponse, ApiError> {
   let categories = state
      .usecase
      .categories(session.data.organization_id())
      .await?;
   Ok(Json(ApiResponse::new(categories)))
}

#[cfg(test)]
mod tests {
   use axum::{
      Router,
      body::{Body, to_bytes},
      http::{Request, header},
      routing::get,
   };
   use kokyaku_domain::{
      clock::FixedClock,
      customer::customer_fixture,
      organization::{OrgRole, OrganizationId},
      user::UserId,
   };
   use kokyaku_infra::{
      SessionData,
      mock::{MockCustomerRepository, MockTagRepository},
   };
   use pretty_assertions::assert_eq;
   use serde_json::Value;
   use tower::ServiceExt;

   use super::*;

   fn current_session(organization_id: &OrganizationId) -> CurrentSession {
      CurrentSession {
         session_id: "session-1".to_string(),
         data:       SessionData::new(
            UserId::new(),
            organization_id.clone(),
            OrgRole::Member,
            "taro@example.com".to_string(),
            "山田 太郎".to_string(),
         ),
      }
   }

   fn create_test_app(customers: MockCustomerRepository, organization_id: &OrganizationId) -> Router {
      let tags = MockTagRepository::new(customers.clone());
      let state = Arc::new(CustomerState {
         usecase: CustomerUseCaseImpl::new(
            Arc::new(customers),
            Arc::new(tags),
            Arc::new(FixedClock::new(Utc::now())),
         ),
      });
      Router::new()
         .route("/api/v1/customers", get(list_customers).post(create_customer))
         .route(
            "/api/v1/customers/{id}",
            get(get_customer).delete(delete_customer),
         )
         .layer(Extension(current_session(organization_id)))
         .with_state(state)
   }

   async fn body_json(response: axum::response::Response) -> Value {
      let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
      serde_json::from_slice(&bytes).unwrap()
   }

   #[tokio::test]
   async fn test_一覧は自組織の顧客だけをページ付きで返す() {
      let org = OrganizationId::new();
      let customers = MockCustomerRepository::new();
      customers.add_customer(customer_fixture(&org, "山田 太郎", Some("taro@example.com"), Some("東京"), None));
      customers.add_customer(customer_fixture(&org, "佐藤 花子", None, Some("大阪"), None));
      customers.add_customer(customer_fixture(
         &OrganizationId::new(),
         "他組織",
         None,
         Some("東京"),
         None,
      ));
      let sut = create_test_app(customers, &org);

      let response = sut
         .oneshot(
            Request::builder()
               .uri("/api/v1/customers?city=%E6%9D%B1%E4%BA%AC&per_page=10")
               .body(Body::empty())
               .unwrap(),
         )
         .await
         .unwrap();

      assert_eq!(response.status(), StatusCode::OK);
      let body = body_json(response).await;
      assert_eq!(body["total"], 1);
      assert_eq!(body["page"], 1);
      assert_eq!(body["per_page"], 10);
      assert_eq!(body["data"][0]["name"], "山田 太郎");
   }

   #[tokio::test]
   async fn test_登録すると201を返す() {
      let org = OrganizationId::new();
      let customers = MockCustomerRepository::new();
      let sut = create_test_app(customers.clone(), &org);

      let response = sut
         .oneshot(
            Request::builder()
               .method("POST")
               .uri("/api/v1/customers")
               .header(header::CONTENT_TYPE, "application/json")
               .body(Body::from(
                  r#"{"name":"山田 太郎","email":"Taro@Example.com"}"#,
               ))
               .unwrap(),
         )
         .await
         .unwrap();

      assert_eq!(response.status(), StatusCode::CREATED);
      let body = body_json(response).await;
      assert_eq!(body["data"]["email"], "taro@example.com");
      assert_eq!(customers.customers().len(), 1);
   }

   #[tokio::test]
   async fn test_名前が空なら400を返す() {
      let org = OrganizationId::new();
      let sut = create_test_app(MockCustomerRepository::new(), &org);

      let response = sut
         .oneshot(
            Request::builder()
               .method("POST")
               .uri("/api/v1/customers")
               .header(header::CONTENT_TYPE, "application/json")
               .body(Body::from(r#"{"name":"  "}"#))
               .unwrap(),
         )
         .await
         .unwrap();

      assert_eq!(response.status(), StatusCode::BAD_REQUEST);
   }

   #[tokio::test]
   async fn test_他組織の顧客は404を返す() {
      let org = OrganizationId::new();
      let customers = MockCustomerRepository::new();
      let other = customer_fixture(&OrganizationId::new(), "他組織", None, None, None);
      let other_id = other.id().clone();
      customers.add_customer(other);
      let sut = create_test_app(customers, &org);

      let response = sut
         .oneshot(
            Request::builder()
               .uri(format!("/api/v1/customers/{other_id}"))
               .body(Body::empty())
               .unwrap(),
         )
         .await
         .unwrap();

      assert_eq!(response.status(), StatusCode::NOT_FOUND);
   }
}
