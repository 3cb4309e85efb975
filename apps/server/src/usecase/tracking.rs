//! # トラッキング・配信停止ユースケース
//!
//! 署名付き URL からの開封・クリック・配信停止を記録する。
//!
//! ## 設計方針
//!
//! - **開封ピクセルは常に画像を返す**: 署名不正や記録失敗はログだけに残す
//! - **クリックは署名が正しく、かつ http(s) の URL にだけリダイレクトする**
//! - **配信停止は冪等**: 2 回目以降も完了ページを返し、イベントは増やさない

use std::sync::Arc;

use axum::http::StatusCode;
use kokyaku_domain::{
   campaign_recipient::{CampaignRecipient, CampaignRecipientId},
   clock::Clock,
   tracking::{
      EmailEvent,
      EmailEventId,
      EmailEventType,
      SignaturePurpose,
      TrackingUrls,
      is_safe_redirect_target,
   },
};
use kokyaku_infra::repository::{CampaignRecipientRepository, EmailEventRepository};
use kokyaku_shared::{
   event_log::{
      error::{category as error_category, kind},
      event,
   },
   log_business_event,
};

use super::template_renderer::TemplateRenderer;
use crate::error::ApiError;

/// 記録に添えるリクエスト情報
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
   pub user_agent: Option<String>,
   pub ip:         Option<String>,
}

/// 配信停止ページ
#[derive(Debug, Clone)]
pub struct HtmlPage {
   pub status: StatusCode,
   pub html:   String,
}

/// トラッキングユースケース
pub struct TrackingUseCaseImpl {
   recipients: Arc<dyn CampaignRecipientRepository>,
   events:     Arc<dyn EmailEventRepository>,
   renderer:   Arc<TemplateRenderer>,
   urls:       TrackingUrls,
   clock:      Arc<dyn Clock>,
}

impl TrackingUseCaseImpl {
   pub fn new(
      recipients: Arc<dyn CampaignRecipientRepository>,
      events: Arc<dyn EmailEventRepository>,
      renderer: Arc<TemplateRenderer>,
      urls: TrackingUrls,
      clock: Arc<dyn Clock>,
   ) -> Self {
      Self {
         recipients,
         events,
         renderer,
         urls,
         clock,
      }
   }

   fn verified_id(
      &self,
      purpose: SignaturePurpose,
      recipient_id: &str,
      url: Option<&str>,
      signature: &str,
   ) -> Option<CampaignRecipientId> {
      let id = CampaignRecipientId::parse_str(recipient_id).ok();
      let verified = id.filter(|id| self.urls.signer().verify(purpose, id, url, signature));
      if verified.is_none() {
         let purpose: &'static str = purpose.into();
         log_business_event!(
            event.category = event::category::TRACKING,
            event.action = event::action::SIGNATURE_REJECTED,
            event.entity_type = event::entity_type::CAMPAIGN_RECIPIENT,
            event.entity_id = recipient_id,
            event.purpose = purpose,
            event.result = event::result::FAILURE,
            "トラッキング署名が不正です"
         );
      }
      verified
   }

   /// イベントを記録する。受信者が存在しなければ何もしない
   async fn record(
      &self,
      recipient: &CampaignRecipient,
      event_type: EmailEventType,
      url: Option<&str>,
      meta: &RequestMeta,
   ) -> Result<bool, ApiError> {
      let email_event = EmailEvent {
         id:              EmailEventId::new(),
         organization_id: recipient.organization_id().clone(),
         campaign_id:     recipient.campaign_id().clone(),
         recipient_id:    recipient.id().clone(),
         event_type,
         url:             url.map(str::to_string),
         user_agent:      meta.user_agent.clone(),
         ip:              meta.ip.clone(),
         occurred_at:     self.clock.now(),
      };
      Ok(self.events.record(&email_event).await?)
   }

   /// 開封を記録する
   ///
   /// 失敗してもエラーは返さない（ピクセルは常に返す）。
   pub async fn record_open(&self, recipient_id: &str, signature: &str, meta: &RequestMeta) {
      let Some(id) = self.verified_id(SignaturePurpose::Open, recipient_id, None, signature) else {
         return;
      };
      let result = self.record_open_of(&id, meta).await;

      match result {
         Ok(true) => log_business_event!(
            event.category = event::category::TRACKING,
            event.action = event::action::EMAIL_OPENED,
            event.entity_type = event::entity_type::CAMPAIGN_RECIPIENT,
            event.entity_id = %id,
            event.result = event::result::SUCCESS,
            "開封を記録しました"
         ),
         Ok(false) => {}
         Err(e) => tracing::error!(
            error.category = error_category::INFRASTRUCTURE,
            error.kind = kind::DATABASE,
            "開封の記録に失敗: {}",
            e
         ),
      }
   }

   async fn record_open_of(
      &self,
      id: &CampaignRecipientId,
      meta: &RequestMeta,
   ) -> Result<bool, ApiError> {
      match self.recipients.find_for_tracking(id).await? {
         Some(recipient) => self.record(&recipient, EmailEventType::Open, None, meta).await,
         None => Ok(false),
      }
   }

   /// クリックを記録し、リダイレクト先を返す
   pub async fn record_click(
      &self,
      recipient_id: &str,
      target: &str,
      signature: &str,
      meta: &RequestMeta,
   ) -> Result<String, ApiError> {
      let id = self
         .verified_id(SignaturePurpose::Click, recipient_id, Some(target), signature)
         .ok_or_else(|| ApiError::BadRequest("リンクが無効です".to_string()))?;
      if !is_safe_redirect_target(target) {
         return Err(ApiError::BadRequest("リンク先が不正です".to_string()));
      }

      let Some(recipient) = self.recipients.find_for_tracking(&id).await? else {
         return Ok(target.to_string());
      };
      if self
         .record(&recipient, EmailEventType::Click, Some(target), meta)
         .await?
      {
         log_business_event!(
            event.category = event::category::TRACKING,
            event.action = event::action::LINK_CLICKED,
            event.entity_type = event::entity_type::CAMPAIGN_RECIPIENT,
            event.entity_id = %id,
            event.organization_id = %recipient.organization_id(),
            event.result = event::result::SUCCESS,
            "クリックを記録しました"
         );
      }
      Ok(target.to_string())
   }

   fn invalid_page(&self, status: StatusCode) -> Result<HtmlPage, ApiError> {
      Ok(HtmlPage {
         status,
         html: self.renderer.unsubscribe_invalid()?,
      })
   }

   async fn unsubscribe_target(
      &self,
      recipient_id: &str,
      signature: &str,
   ) -> Result<Result<CampaignRecipient, StatusCode>, ApiError> {
      let Some(id) =
         self.verified_id(SignaturePurpose::Unsubscribe, recipient_id, None, signature)
      else {
         return Ok(Err(StatusCode::BAD_REQUEST));
      };
      Ok(self
         .recipients
         .find_for_tracking(&id)
         .await?
         .ok_or(StatusCode::NOT_FOUND))
   }

   /// 配信停止の確認ページ
   pub async fn unsubscribe_page(
      &self,
      recipient_id: &str,
      signature: &str,
   ) -> Result<HtmlPage, ApiError> {
      let recipient = match self.unsubscribe_target(recipient_id, signature).await? {
         Ok(recipient) => recipient,
         Err(status) => return self.invalid_page(status),
      };
      let html = if recipient.engagement().unsubscribed_at.is_some() {
         self.renderer.unsubscribe_done(Some(recipient.email().as_str()))?
      } else {
         self.renderer.unsubscribe_confirm(
            recipient.email().as_str(),
            &self.urls.unsubscribe_url(recipient.id()),
         )?
      };
      Ok(HtmlPage {
         status: StatusCode::OK,
         html,
      })
   }

   /// 配信停止を実行する（ワンクリック配信停止にも使う）
   pub async fn unsubscribe(
      &self,
      recipient_id: &str,
      signature: &str,
      meta: &RequestMeta,
   ) -> Result<HtmlPage, ApiError> {
      let recipient = match self.unsubscribe_target(recipient_id, signature).await? {
         Ok(recipient) => recipient,
         Err(status) => return self.invalid_page(status),
      };
      if self
         .record(&recipient, EmailEventType::Unsubscribe, None, meta)
         .await?
      {
         log_business_event!(
            event.category = event::category::TRACKING,
            event.action = event::action::UNSUBSCRIBED,
            event.entity_type = event::entity_type::CAMPAIGN_RECIPIENT,
            event.entity_id = %recipient.id(),
            event.organization_id = %recipient.organization_id(),
            event.result = event::result::SUCCESS,
            "配信停止を受け付けました"
         );
      }
      Ok(HtmlPage {
         status: StatusCode::OK,
         html:   self
            .renderer
            .unsubscribe_done(Some(recipient.email().as_str()))?,
      })
   }
}

#[cfg(test)]
mod tests {
   use chrono::Utc;
   use kokyaku_domain::{
      campaign::CampaignId,
      clock::FixedClock,
      customer::customer_fixture,
      organization::OrganizationId,
      tracking::TrackingSigner,
   };
   use kokyaku_infra::mock::{
      MockCampaignRecipientRepository,
      MockCustomerRepository,
      MockEmailEventRepository,
   };
   use pretty_assertions::assert_eq;

   use super::*;

   const BASE_URL: &str = "https://crm.example.com";

   struct Fixture {
      recipients: MockCampaignRecipientRepository,
      customers:  MockCustomerRepository,
      events:     MockEmailEventRepository,
      urls:       TrackingUrls,
      usecase:    TrackingUseCaseImpl,
      recipient:  CampaignRecipient,
   }

   fn setup() -> Fixture {
      let recipients = MockCampaignRecipientRepository::new();
      let customers = MockCustomerRepository::new();
      let events = MockEmailEventRepository::new(recipients.clone(), customers.clone());
      let urls = TrackingUrls::new(
         BASE_URL,
         TrackingSigner::new("0123456789abcdef0123456789abcdef").unwrap(),
      );

      let org = OrganizationId::new();
      let customer = customer_fixture(&org, "山田 太郎", Some("taro@example.com"), None, None);
      customers.add_customer(customer.clone());
      let recipient = CampaignRecipient::pending_for(&CampaignId::new(), &customer, Utc::now())
         .unwrap()
         .mark_sent(Utc::now());
      recipients.add_recipients(std::slice::from_ref(&recipient));

      let usecase = TrackingUseCaseImpl::new(
         Arc::new(recipients.clone()),
         Arc::new(events.clone()),
         Arc::new(TemplateRenderer::new().unwrap()),
         urls.clone(),
         Arc::new(FixedClock::new(Utc::now())),
      );
      Fixture {
         recipients,
         customers,
         events,
         urls,
         usecase,
         recipient,
      }
   }

   fn sign(fixture: &Fixture, purpose: SignaturePurpose, url: Option<&str>) -> String {
      fixture
         .urls
         .signer()
         .sign(purpose, fixture.recipient.id(), url)
   }

   #[tokio::test]
   async fn test_正しい署名の開封を記録する() {
      let fixture = setup();
      let s = sign(&fixture, SignaturePurpose::Open, None);

      fixture
         .usecase
         .record_open(&fixture.recipient.id().to_string(), &s, &RequestMeta::default())
         .await;

      assert_eq!(fixture.events.events().len(), 1);
      assert_eq!(fixture.recipients.recipients()[0].engagement().open_count, 1);
   }

   #[tokio::test]
   async fn test_署名が不正な開封は記録しない() {
      let fixture = setup();
      let s = sign(&fixture, SignaturePurpose::Click, None);

      fixture
         .usecase
         .record_open(&fixture.recipient.id().to_string(), &s, &RequestMeta::default())
         .await;

      assert!(fixture.events.events().is_empty());
   }

   #[tokio::test]
   async fn test_クリックを記録してリダイレクト先を返す() {
      let fixture = setup();
      let target = "https://example.com/sale?id=1";
      let s = sign(&fixture, SignaturePurpose::Click, Some(target));
      let meta = RequestMeta {
         user_agent: Some("Mozilla/5.0".to_string()),
         ip:         Some("192.0.2.1".to_string()),
      };

      let redirect = fixture
         .usecase
         .record_click(&fixture.recipient.id().to_string(), target, &s, &meta)
         .await
         .unwrap();

      assert_eq!(redirect, target);
      let events = fixture.events.events();
      assert_eq!(events[0].event_type, EmailEventType::Click);
      assert_eq!(events[0].url.as_deref(), Some(target));
      assert_eq!(events[0].user_agent.as_deref(), Some("Mozilla/5.0"));
      let engagement = *fixture.recipients.recipients()[0].engagement();
      assert_eq!(engagement.click_count, 1);
      assert!(engagement.opened_at.is_some());
   }

   #[tokio::test]
   async fn test_リンク先を書き換えたクリックは400() {
      let fixture = setup();
      let s = sign(&fixture, SignaturePurpose::Click, Some("https://example.com/"));

      let result = fixture
         .usecase
         .record_click(
            &fixture.recipient.id().to_string(),
            "https://evil.example.com/",
            &s,
            &RequestMeta::default(),
         )
         .await;

      assert!(matches!(result, Err(ApiError::BadRequest(_))));
      assert!(fixture.events.events().is_empty());
   }

   #[tokio::test]
   async fn test_httpでないリンク先は署名が正しくても400() {
      let fixture = setup();
      let target = "javascript:alert(1)";
      let s = sign(&fixture, SignaturePurpose::Click, Some(target));

      let result = fixture
         .usecase
         .record_click(&fixture.recipient.id().to_string(), target, &s, &RequestMeta::default())
         .await;

      assert!(matches!(result, Err(ApiError::BadRequest(_))));
   }

   #[tokio::test]
   async fn test_確認ページは実行用urlを含む() {
      let fixture = setup();
      let s = sign(&fixture, SignaturePurpose::Unsubscribe, None);

      let page = fixture
         .usecase
         .unsubscribe_page(&fixture.recipient.id().to_string(), &s)
         .await
         .unwrap();

      assert_eq!(page.status, StatusCode::OK);
      assert!(page.html.contains(&fixture.urls.unsubscribe_url(fixture.recipient.id())));
      assert!(fixture.events.events().is_empty());
   }

   #[tokio::test]
   async fn test_配信停止は冪等() {
      let fixture = setup();
      let s = sign(&fixture, SignaturePurpose::Unsubscribe, None);
      let id = fixture.recipient.id().to_string();

      let first = fixture
         .usecase
         .unsubscribe(&id, &s, &RequestMeta::default())
         .await
         .unwrap();
      let second = fixture
         .usecase
         .unsubscribe(&id, &s, &RequestMeta::default())
         .await
         .unwrap();

      assert_eq!(first.status, StatusCode::OK);
      assert_eq!(second.status, StatusCode::OK);
      assert_eq!(fixture.events.events().len(), 1);
      assert!(fixture.customers.customers()[0].unsubscribed_at().is_some());
   }

   #[tokio::test]
   async fn test_署名が不正な配信停止は400のページ() {
      let fixture = setup();

      let page = fixture
         .usecase
         .unsubscribe(
            &fixture.recipient.id().to_string(),
            "invalid",
            &RequestMeta::default(),
         )
         .await
         .unwrap();

      assert_eq!(page.status, StatusCode::BAD_REQUEST);
      assert!(fixture.customers.customers()[0].unsubscribed_at().is_none());
   }

   #[tokio::test]
   async fn test_受信者idが不正なら400のページ() {
      let fixture = setup();

      let page = fixture
         .usecase
         .unsubscribe_page("not-a-uuid", "sig")
         .await
         .unwrap();

      assert_eq!(page.status, StatusCode::BAD_REQUEST);
   }
}
