//! テスト共通フィクスチャ
//!
//! DB を使用する統合テストで共通利用する組織・ユーザーのセットアップと
//! エンティティ生成ヘルパー。

// 各テストファイルが独立したクレートとしてコンパイルされるため、
// 使用しない関数に dead_code 警告が出る。モジュール全体で抑制する。
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use kokyaku_domain::{
    campaign::{Campaign, CampaignContent, CampaignId, CampaignInput},
    customer::{Customer, CustomerId, CustomerInput, CustomerProfile},
    organization::{Membership, OrgRole, Organization, OrganizationId, OrganizationName},
    recipient_filter::RecipientFilter,
    user::{User, UserId, UserName},
    value_objects::Email,
};
use kokyaku_infra::repository::{
    OrganizationRepository,
    PostgresOrganizationRepository,
    PostgresUserRepository,
    UserRepository,
};
use sqlx::PgPool;

/// テスト用の固定日時
pub fn test_now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// 組織と owner ユーザーを作成する
pub async fn setup_organization(pool: &PgPool) -> (OrganizationId, UserId) {
    let now = test_now();
    let sub = uuid::Uuid::now_v7().simple().to_string();
    let user = User::new(
        UserId::new(),
        Email::new(format!("owner-{sub}@example.com")).unwrap(),
        UserName::new("テスト オーナー").unwrap(),
        sub,
        None,
        now,
    );
    let user = PostgresUserRepository::new(pool.clone())
        .upsert_google_user(&user, Some("1//refresh"))
        .await
        .expect("ユーザー作成に失敗");

    let organization = Organization::new(
        OrganizationId::new(),
        OrganizationName::new("テスト組織").unwrap(),
        now,
    );
    let owner = Membership::new(
        organization.id().clone(),
        user.id().clone(),
        OrgRole::Owner,
        now,
    );
    PostgresOrganizationRepository::new(pool.clone())
        .create_with_owner(&organization, &owner)
        .await
        .expect("組織作成に失敗");

    (organization.id().clone(), user.id().clone())
}

/// 顧客を組み立てる（保存はしない）
pub fn build_customer(
    organization_id: &OrganizationId,
    name: &str,
    email: Option<&str>,
    city: Option<&str>,
) -> Customer {
    let profile = CustomerProfile::try_from(CustomerInput {
        name: name.to_string(),
        email: email.map(str::to_string),
        city: city.map(str::to_string),
        ..CustomerInput::default()
    })
    .unwrap();
    Customer::new(CustomerId::new(), organization_id.clone(), profile, test_now())
}

/// 下書きキャンペーンを組み立てる（保存はしない）
pub fn build_campaign(organization_id: &OrganizationId, created_by: &UserId) -> Campaign {
    let content = CampaignContent::try_from(CampaignInput {
        name:             "春のご案内".to_string(),
        subject:          "{{first_name}} 様へ".to_string(),
        content_html:     "<p>こんにちは {{name}} 様</p>".to_string(),
        recipient_filter: RecipientFilter::default(),
    })
    .unwrap();
    Campaign::new(
        CampaignId::new(),
        organization_id.clone(),
        content,
        created_by.clone(),
        test_now(),
    )
}
