//! # アプリケーション構築
//!
//! DI（リポジトリ・ユースケース・State）の初期化とルーター構築を担当する。
//! `main.rs` はインフラ初期化とサーバー起動に集中する。

use std::sync::Arc;

use axum::{
   Router,
   middleware::{from_fn, from_fn_with_state},
   routing::{delete, get, patch, post, put},
};
use kokyaku_domain::{
   clock::{Clock, SystemClock},
   organization::OrgRole,
   tracking::TrackingUrls,
};
use kokyaku_infra::{
   GoogleOAuthClient,
   SessionManager,
   mail::EmailSenderFactory,
   repository::{
      CampaignRecipientRepository,
      CampaignRepository,
      CustomerRepository,
      EmailEventRepository,
      EmailJobRepository,
      EmailSettingsRepository,
      InvitationRepository,
      LeadRepository,
      OrganizationRepository,
      PostgresCampaignRecipientRepository,
      PostgresCampaignRepository,
      PostgresCustomerRepository,
      PostgresEmailEventRepository,
      PostgresEmailJobRepository,
      PostgresEmailSettingsRepository,
      PostgresInvitationRepository,
      PostgresLeadRepository,
      PostgresOrganizationRepository,
      PostgresSegmentRepository,
      PostgresTagRepository,
      PostgresUserRepository,
      SegmentRepository,
      TagRepository,
      UserRepository,
   },
};
use kokyaku_server::{
   config::ServerConfig,
   handler::{
      AuthState,
      CampaignState,
      CronState,
      CustomerState,
      EmailSettingsState,
      LeadState,
      OrganizationState,
      ReadinessState,
      SegmentState,
      TagState,
      TrackingState,
      campaign_report,
      cancel_campaign,
      change_lead_status,
      change_member_role,
      convert_lead,
      create_campaign,
      create_customer,
      create_lead,
      create_segment,
      create_tag,
      csrf,
      delete_campaign,
      delete_customer,
      delete_lead,
      delete_segment,
      delete_tag,
      get_campaign,
      get_customer,
      get_email_settings,
      get_lead,
      get_organization,
      get_segment,
      google_callback,
      google_login,
      health_check,
      invite_member,
      list_campaigns,
      list_categories,
      list_cities,
      list_customers,
      list_leads,
      list_members,
      list_recipients,
      list_segments,
      list_tags,
      logout,
      me,
      preview_recipients,
      preview_segment,
      preview_segment_definition,
      readiness_check,
      remove_member,
      rename_organization,
      replace_customer_tags,
      resubscribe_customer,
      run_email_jobs,
      send_campaign,
      switch_organization,
      test_send_campaign,
      track_click,
      track_open,
      unsubscribe,
      unsubscribe_page,
      update_campaign,
      update_customer,
      update_email_settings,
      update_lead,
      update_segment,
      update_tag,
   },
   middleware::{
      AuthzState,
      CronAuthState,
      CsrfState,
      csrf_middleware,
      no_cache,
      require_cron_secret,
      require_role,
   },
   usecase::{
      AuthUseCaseImpl,
      CampaignDeps,
      CampaignUseCaseImpl,
      CustomerUseCaseImpl,
      DeliveryDeps,
      DeliveryUseCaseImpl,
      EmailSettingsUseCaseImpl,
      LeadUseCaseImpl,
      MessageBuilder,
      OrganizationUseCaseImpl,
      SegmentUseCaseImpl,
      SenderResolver,
      TagUseCaseImpl,
      TemplateRenderer,
      TrackingUseCaseImpl,
   },
};
use kokyaku_shared::{
   canonical_log::CanonicalLogLineLayer,
   observability::{MakeRequestUuidV7, make_request_span},
};
use sqlx::PgPool;
use tower_http::{
   request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
   trace::TraceLayer,
};

/// インフラ初期化済みの依存
pub(crate) struct Infra {
   pub pool:            PgPool,
   pub repositories:    Repositories,
   pub session_manager: Arc<dyn SessionManager>,
   pub google:          Arc<dyn GoogleOAuthClient>,
   pub sender_factory:  Arc<dyn EmailSenderFactory>,
   pub renderer:        Arc<TemplateRenderer>,
   pub tracking_urls:   TrackingUrls,
}

/// ユースケースと認可ミドルウェアが使うリポジトリ
pub(crate) struct Repositories {
   pub users:          Arc<dyn UserRepository>,
   pub organizations:  Arc<dyn OrganizationRepository>,
   pub invitations:    Arc<dyn InvitationRepository>,
   pub customers:      Arc<dyn CustomerRepository>,
   pub leads:          Arc<dyn LeadRepository>,
   pub tags:           Arc<dyn TagRepository>,
   pub segments:       Arc<dyn SegmentRepository>,
   pub campaigns:      Arc<dyn CampaignRepository>,
   pub recipients:     Arc<dyn CampaignRecipientRepository>,
   pub jobs:           Arc<dyn EmailJobRepository>,
   pub events:         Arc<dyn EmailEventRepository>,
   pub email_settings: Arc<dyn EmailSettingsRepository>,
}

impl Repositories {
   /// PostgreSQL 実装で揃える
   pub fn postgres(pool: &PgPool) -> Self {
      Self {
         users:          Arc::new(PostgresUserRepository::new(pool.clone())),
         organizations:  Arc::new(PostgresOrganizationRepository::new(pool.clone())),
         invitations:    Arc::new(PostgresInvitationRepository::new(pool.clone())),
         customers:      Arc::new(PostgresCustomerRepository::new(pool.clone())),
         leads:          Arc::new(PostgresLeadRepository::new(pool.clone())),
         tags:           Arc::new(PostgresTagRepository::new(pool.clone())),
         segments:       Arc::new(PostgresSegmentRepository::new(pool.clone())),
         campaigns:      Arc::new(PostgresCampaignRepository::new(pool.clone())),
         recipients:     Arc::new(PostgresCampaignRecipientRepository::new(pool.clone())),
         jobs:           Arc::new(PostgresEmailJobRepository::new(pool.clone())),
         events:         Arc::new(PostgresEmailEventRepository::new(pool.clone())),
         email_settings: Arc::new(PostgresEmailSettingsRepository::new(pool.clone())),
      }
   }
}

/// DI コンテナの構築とルーター定義を行う
///
/// リポジトリ → ユースケース → State → Router の順に組み立てる。
pub(crate) fn build_app(config: &ServerConfig, infra: Infra) -> Router {
   let Infra {
      pool,
      repositories,
      session_manager,
      google,
      sender_factory,
      renderer,
      tracking_urls,
   } = infra;
   let Repositories {
      users,
      organizations,
      invitations,
      customers,
      leads,
      tags,
      segments,
      campaigns,
      recipients,
      jobs,
      events,
      email_settings,
   } = repositories;
   let clock: Arc<dyn Clock> = Arc::new(SystemClock);

   // 送信経路（キャンペーンのテスト送信と配信ワーカーで共有）
   let senders = Arc::new(SenderResolver::new(
      email_settings.clone(),
      users.clone(),
      sender_factory,
   ));
   let messages = Arc::new(MessageBuilder::new(renderer.clone(), tracking_urls.clone()));

   // State
   let readiness_state = Arc::new(ReadinessState {
      pool,
      session_manager: session_manager.clone(),
   });
   let auth_state = Arc::new(AuthState {
      usecase:       AuthUseCaseImpl::new(
         users,
         organizations.clone(),
         invitations.clone(),
         session_manager.clone(),
         google,
         clock.clone(),
      ),
      cookie_secure: config.cookie_secure,
   });
   let organization_state = Arc::new(OrganizationState {
      usecase: OrganizationUseCaseImpl::new(organizations.clone(), invitations, clock.clone()),
   });
   let customer_state = Arc::new(CustomerState {
      usecase: CustomerUseCaseImpl::new(customers.clone(), tags.clone(), clock.clone()),
   });
   let lead_state = Arc::new(LeadState {
      usecase: LeadUseCaseImpl::new(leads, customers.clone(), clock.clone()),
   });
   let tag_state = Arc::new(TagState {
      usecase: TagUseCaseImpl::new(tags, clock.clone()),
   });
   let segment_state = Arc::new(SegmentState {
      usecase: SegmentUseCaseImpl::new(segments.clone(), customers.clone(), clock.clone()),
   });
   let campaign_state = Arc::new(CampaignState {
      usecase: CampaignUseCaseImpl::new(
         CampaignDeps {
            campaigns:  campaigns.clone(),
            recipients: recipients.clone(),
            customers:  customers.clone(),
            segments,
            senders:    senders.clone(),
            messages:   messages.clone(),
            clock:      clock.clone(),
         },
         config.delivery.job_max_attempts,
      ),
   });
   let email_settings_state = Arc::new(EmailSettingsState {
      usecase: EmailSettingsUseCaseImpl::new(email_settings, clock.clone()),
   });
   let tracking_state = Arc::new(TrackingState {
      usecase: TrackingUseCaseImpl::new(
         recipients.clone(),
         events,
         renderer,
         tracking_urls,
         clock.clone(),
      ),
   });
   let cron_state = Arc::new(CronState {
      usecase: DeliveryUseCaseImpl::new(
         DeliveryDeps {
            jobs,
            campaigns,
            recipients,
            customers,
            senders,
            messages,
            clock,
         },
         config.delivery.clone(),
      ),
   });

   // ミドルウェアの状態
   let csrf_state = CsrfState {
      session_manager: session_manager.clone(),
   };
   let authz = |required_role: OrgRole| AuthzState {
      session_manager: session_manager.clone(),
      organizations: organizations.clone(),
      required_role,
   };
   let cron_auth = CronAuthState {
      secret: Arc::from(config.cron_secret.as_str()),
   };

   // ルーター構築
   // セッション不要のルート → ロール別ルートグループの順に並べる
   Router::new()
      .route("/health", get(health_check))
      .merge(
         Router::new()
            .route("/health/ready", get(readiness_check))
            .with_state(readiness_state),
      )
      // 認証 API（セッション不要）
      .merge(
         Router::new()
            .route("/api/v1/auth/google/login", get(google_login))
            .route("/api/v1/auth/google/callback", get(google_callback))
            .route("/api/v1/auth/logout", post(logout))
            .with_state(auth_state.clone()),
      )
      // トラッキング・配信停止（署名で検証、セッション不要）
      .merge(
         Router::new()
            .route("/t/open/{file}", get(track_open))
            .route("/t/click/{recipient_id}", get(track_click))
            .route("/u/{recipient_id}", get(unsubscribe_page).post(unsubscribe))
            .with_state(tracking_state),
      )
      // cron（Bearer トークンで認証）
      .merge(
         Router::new()
            .route(
               "/api/cron/email-jobs",
               get(run_email_jobs).post(run_email_jobs),
            )
            .layer(from_fn_with_state(cron_auth, require_cron_secret))
            .with_state(cron_state),
      )
      // member 以上
      .merge(
         Router::new()
            .route("/api/v1/auth/me", get(me))
            .route("/api/v1/auth/csrf", get(csrf))
            .route("/api/v1/auth/switch-organization", post(switch_organization))
            .layer(from_fn_with_state(authz(OrgRole::Member), require_role))
            .with_state(auth_state),
      )
      .merge(
         Router::new()
            .route("/api/v1/organization", get(get_organization))
            .route("/api/v1/organization/members", get(list_members))
            .layer(from_fn_with_state(authz(OrgRole::Member), require_role))
            .with_state(organization_state.clone()),
      )
      .merge(
         Router::new()
            .route(
               "/api/v1/customers",
               get(list_customers).post(create_customer),
            )
            .route("/api/v1/customers/cities", get(list_cities))
            .route("/api/v1/customers/categories", get(list_categories))
            .route(
               "/api/v1/customers/{id}",
               get(get_customer).put(update_customer).delete(delete_customer),
            )
            .route("/api/v1/customers/{id}/tags", put(replace_customer_tags))
            .route(
               "/api/v1/customers/{id}/resubscribe",
               post(resubscribe_customer),
            )
            .layer(from_fn_with_state(authz(OrgRole::Member), require_role))
            .with_state(customer_state),
      )
      .merge(
         Router::new()
            .route("/api/v1/leads", get(list_leads).post(create_lead))
            .route(
               "/api/v1/leads/{id}",
               get(get_lead).put(update_lead).delete(delete_lead),
            )
            .route("/api/v1/leads/{id}/status", patch(change_lead_status))
            .route("/api/v1/leads/{id}/convert", post(convert_lead))
            .layer(from_fn_with_state(authz(OrgRole::Member), require_role))
            .with_state(lead_state),
      )
      .merge(
         Router::new()
            .route("/api/v1/tags", get(list_tags).post(create_tag))
            .route("/api/v1/tags/{id}", put(update_tag).delete(delete_tag))
            .layer(from_fn_with_state(authz(OrgRole::Member), require_role))
            .with_state(tag_state),
      )
      .merge(
         Router::new()
            .route("/api/v1/segments", get(list_segments).post(create_segment))
            .route("/api/v1/segments/preview", post(preview_segment_definition))
            .route(
               "/api/v1/segments/{id}",
               get(get_segment).put(update_segment).delete(delete_segment),
            )
            .route("/api/v1/segments/{id}/preview", get(preview_segment))
            .layer(from_fn_with_state(authz(OrgRole::Member), require_role))
            .with_state(segment_state),
      )
      .merge(
         Router::new()
            .route(
               "/api/v1/campaigns",
               get(list_campaigns).post(create_campaign),
            )
            .route(
               "/api/v1/campaigns/preview-recipients",
               post(preview_recipients),
            )
            .route(
               "/api/v1/campaigns/{id}",
               get(get_campaign).put(update_campaign).delete(delete_campaign),
            )
            .route("/api/v1/campaigns/{id}/test-send", post(test_send_campaign))
            .route("/api/v1/campaigns/{id}/report", get(campaign_report))
            .route("/api/v1/campaigns/{id}/recipients", get(list_recipients))
            .layer(from_fn_with_state(authz(OrgRole::Member), require_role))
            .with_state(campaign_state.clone()),
      )
      .merge(
         Router::new()
            .route("/api/v1/settings/email", get(get_email_settings))
            .layer(from_fn_with_state(authz(OrgRole::Member), require_role))
            .with_state(email_settings_state.clone()),
      )
      // admin 以上
      .merge(
         Router::new()
            .route("/api/v1/organization", patch(rename_organization))
            .route("/api/v1/organization/invitations", post(invite_member))
            .route(
               "/api/v1/organization/members/{user_id}",
               delete(remove_member),
            )
            .layer(from_fn_with_state(authz(OrgRole::Admin), require_role))
            .with_state(organization_state.clone()),
      )
      .merge(
         Router::new()
            .route("/api/v1/campaigns/{id}/send", post(send_campaign))
            .route("/api/v1/campaigns/{id}/cancel", post(cancel_campaign))
            .layer(from_fn_with_state(authz(OrgRole::Admin), require_role))
            .with_state(campaign_state),
      )
      .merge(
         Router::new()
            .route("/api/v1/settings/email", put(update_email_settings))
            .layer(from_fn_with_state(authz(OrgRole::Admin), require_role))
            .with_state(email_settings_state),
      )
      // owner のみ
      .merge(
         Router::new()
            .route(
               "/api/v1/organization/members/{user_id}",
               patch(change_member_role),
            )
            .layer(from_fn_with_state(authz(OrgRole::Owner), require_role))
            .with_state(organization_state),
      )
      .layer(from_fn_with_state(csrf_state, csrf_middleware))
      // キャッシュ制御: 動的 API レスポンスがブラウザにキャッシュされないようにする
      .layer(from_fn(no_cache))
      // Request ID レイヤー（下に書いたものが外側）
      // 1. SetRequestIdLayer（最外）: UUID v7 を生成（またはクライアント提供値を使用）
      // 2. TraceLayer: カスタムスパンに request_id を含め、全ログに自動注入
      // 3. CanonicalLogLineLayer: リクエスト完了時に 1 行サマリログを出力（スパン内）
      // 4. PropagateRequestIdLayer: レスポンスヘッダーに X-Request-Id をコピー
      .layer(PropagateRequestIdLayer::x_request_id())
      .layer(CanonicalLogLineLayer)
      .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
      .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
}

#[cfg(test)]
mod tests {
   use std::collections::HashMap;

   use axum::{
      body::Body,
      http::{Method, Request, StatusCode},
   };
   use chrono::{DateTime, Utc};
   use kokyaku_domain::{
      campaign::{Campaign, CampaignContent, CampaignId, CampaignInput, CampaignStatus},
      organization::{Membership, Organization, OrganizationId, OrganizationName},
      recipient_filter::RecipientFilter,
      tracking::TrackingSigner,
      user::UserId,
   };
   use kokyaku_infra::{
      SessionData,
      mock::{
         MockCampaignRecipientRepository,
         MockCampaignRepository,
         MockCustomerRepository,
         MockEmailEventRepository,
         MockEmailJobRepository,
         MockEmailSenderFactory,
         MockEmailSettingsRepository,
         MockInvitationRepository,
         MockLeadRepository,
         MockOrganizationRepository,
         MockSegmentRepository,
         MockSessionManager,
         MockTagRepository,
         MockUserRepository,
         RecordingEmailSender,
         StubGoogleOAuthClient,
      },
   };
   use kokyaku_server::middleware::CSRF_HEADER;
   use pretty_assertions::assert_eq;
   use sqlx::postgres::PgPoolOptions;
   use tower::ServiceExt;

   use super::*;

   fn now() -> DateTime<Utc> {
      DateTime::from_timestamp(1_700_000_000, 0).unwrap()
   }

   fn config() -> ServerConfig {
      let env = HashMap::from([
         ("DATABASE_URL", "postgres://localhost/kokyaku"),
         ("REDIS_URL", "redis://localhost:6379"),
         ("APP_BASE_URL", "https://crm.example.com"),
         ("TRACKING_SECRET", "0123456789abcdef0123456789abcdef"),
         ("CRON_SECRET", "cron-secret"),
         ("GOOGLE_CLIENT_ID", "client-id"),
         ("GOOGLE_CLIENT_SECRET", "client-secret"),
      ]);
      ServerConfig::from_lookup(|name| env.get(name).map(|v| v.to_string())).unwrap()
   }

   /// DB に触れない構成で本番と同じルーターを組み立てる
   ///
   /// プールは遅延接続のため、ルーティングと認可だけならリポジトリのモックで完結する。
   struct Fixture {
      sessions:      MockSessionManager,
      organizations: MockOrganizationRepository,
      campaigns:     MockCampaignRepository,
      jobs:          MockEmailJobRepository,
      organization:  Organization,
      user_id:       UserId,
   }

   impl Fixture {
      fn new() -> Self {
         let organization = Organization::new(
            OrganizationId::new(),
            OrganizationName::new("テスト組織").unwrap(),
            now(),
         );
         let organizations = MockOrganizationRepository::new(MockUserRepository::new());
         organizations.add_organization(organization.clone());
         let recipients = MockCampaignRecipientRepository::new();
         let jobs = MockEmailJobRepository::new();
         Self {
            sessions: MockSessionManager::new(),
            organizations,
            campaigns: MockCampaignRepository::new(recipients, jobs.clone()),
            jobs,
            organization,
            user_id: UserId::new(),
         }
      }

      /// セッションはロール `session_role`、組織側は `current_role` で登録する
      fn sign_in(&self, session_role: OrgRole, current_role: Option<OrgRole>) {
         self.sessions.insert_session(
            "sid",
            SessionData::new(
               self.user_id.clone(),
               self.organization.id().clone(),
               session_role,
               "user@example.com".to_string(),
               "利用者".to_string(),
            ),
            "csrf-token",
         );
         if let Some(role) = current_role {
            self.organizations.add_membership(Membership::new(
               self.organization.id().clone(),
               self.user_id.clone(),
               role,
               now(),
            ));
         }
      }

      fn draft_campaign(&self) -> Campaign {
         let content = CampaignContent::try_from(CampaignInput {
            name:             "春のご案内".to_string(),
            subject:          "お知らせ".to_string(),
            content_html:     "<p>こんにちは</p>".to_string(),
            recipient_filter: RecipientFilter::default(),
         })
         .unwrap();
         let campaign = Campaign::new(
            CampaignId::new(),
            self.organization.id().clone(),
            content,
            self.user_id.clone(),
            now(),
         );
         self.campaigns.add_campaign(campaign.clone());
         campaign
      }

      fn app(&self) -> Router {
         let users = MockUserRepository::new();
         let customers = MockCustomerRepository::new();
         let recipients = MockCampaignRecipientRepository::new();
         let repositories = Repositories {
            users:          Arc::new(users),
            organizations:  Arc::new(self.organizations.clone()),
            invitations:    Arc::new(MockInvitationRepository::new(self.organizations.clone())),
            customers:      Arc::new(customers.clone()),
            leads:          Arc::new(MockLeadRepository::new(customers.clone())),
            tags:           Arc::new(MockTagRepository::new(customers.clone())),
            segments:       Arc::new(MockSegmentRepository::new()),
            campaigns:      Arc::new(self.campaigns.clone()),
            recipients:     Arc::new(recipients.clone()),
            jobs:           Arc::new(self.jobs.clone()),
            events:         Arc::new(MockEmailEventRepository::new(recipients, customers)),
            email_settings: Arc::new(MockEmailSettingsRepository::new()),
         };
         let config = config();
         let signer = TrackingSigner::new(&config.tracking_secret).unwrap();
         build_app(
            &config,
            Infra {
               pool: PgPoolOptions::new()
                  .connect_lazy("postgres://localhost/kokyaku")
                  .unwrap(),
               repositories,
               session_manager: Arc::new(self.sessions.clone()),
               google: Arc::new(StubGoogleOAuthClient::new(
                  "sub",
                  "user@example.com",
                  "利用者",
               )),
               sender_factory: Arc::new(MockEmailSenderFactory::new(RecordingEmailSender::new())),
               renderer: Arc::new(TemplateRenderer::new().unwrap()),
               tracking_urls: TrackingUrls::new(&config.app_base_url, signer),
            },
         )
      }
   }

   fn request(method: Method, uri: &str, body: &str) -> Request<Body> {
      Request::builder()
         .method(method)
         .uri(uri)
         .header("Cookie", "session_id=sid")
         .header(CSRF_HEADER, "csrf-token")
         .header("Content-Type", "application/json")
         .body(Body::from(body.to_string()))
         .unwrap()
   }

   #[tokio::test]
   async fn test_memberは組織名を変更できない() {
      let fixture = Fixture::new();
      fixture.sign_in(OrgRole::Member, Some(OrgRole::Member));
      let sut = fixture.app();

      let response = sut
         .oneshot(request(
            Method::PATCH,
            "/api/v1/organization",
            r#"{"name":"乗っ取り"}"#,
         ))
         .await
         .unwrap();

      assert_eq!(response.status(), StatusCode::FORBIDDEN);
   }

   #[tokio::test]
   async fn test_memberはキャンペーンを送信できない() {
      let fixture = Fixture::new();
      fixture.sign_in(OrgRole::Member, Some(OrgRole::Member));
      let campaign = fixture.draft_campaign();
      let sut = fixture.app();

      let response = sut
         .oneshot(request(
            Method::POST,
            &format!("/api/v1/campaigns/{}/send", campaign.id()),
            "{}",
         ))
         .await
         .unwrap();

      let stored = fixture
         .campaigns
         .find_by_id(fixture.organization.id(), campaign.id())
         .await
         .unwrap()
         .unwrap();
      assert_eq!(response.status(), StatusCode::FORBIDDEN);
      assert_eq!(stored.status(), CampaignStatus::Draft);
      assert!(fixture.jobs.jobs().is_empty());
   }

   #[tokio::test]
   async fn test_adminは組織名を変更できる() {
      let fixture = Fixture::new();
      fixture.sign_in(OrgRole::Admin, Some(OrgRole::Admin));
      let sut = fixture.app();

      let response = sut
         .oneshot(request(
            Method::PATCH,
            "/api/v1/organization",
            r#"{"name":"新しい組織名"}"#,
         ))
         .await
         .unwrap();

      assert_eq!(response.status(), StatusCode::OK);
   }

   #[tokio::test]
   async fn test_降格済みのadminのセッションでは組織名を変更できない() {
      let fixture = Fixture::new();
      fixture.sign_in(OrgRole::Admin, Some(OrgRole::Member));
      let sut = fixture.app();

      let response = sut
         .oneshot(request(
            Method::PATCH,
            "/api/v1/organization",
            r#"{"name":"乗っ取り"}"#,
         ))
         .await
         .unwrap();

      assert_eq!(response.status(), StatusCode::FORBIDDEN);
   }

   #[tokio::test]
   async fn test_組織から外されたadminのセッションではキャンペーンを送信できない() {
      let fixture = Fixture::new();
      fixture.sign_in(OrgRole::Admin, None);
      let campaign = fixture.draft_campaign();
      let sut = fixture.app();

      let response = sut
         .oneshot(request(
            Method::POST,
            &format!("/api/v1/campaigns/{}/send", campaign.id()),
            "{}",
         ))
         .await
         .unwrap();

      assert_eq!(response.status(), StatusCode::FORBIDDEN);
      assert!(fixture.jobs.jobs().is_empty());
   }
}
