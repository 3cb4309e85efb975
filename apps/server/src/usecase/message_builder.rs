//! # 配信メッセージの組み立て
//!
//! キャンペーンの件名・本文から受信者 1 件分の [`OutgoingEmail`] を作る。
//!
//! 1. 差し込み（件名はそのまま、本文は HTML エスケープ）
//! 2. `http(s)` リンクを署名付きクリック URL に書き換え
//! 3. 配信停止フッター付きのレイアウトに収める
//! 4. 開封ピクセルを挿入
//! 5. テキスト版を作り、`List-Unsubscribe` ヘッダを付ける

use std::sync::Arc;

use kokyaku_domain::{
   campaign::Campaign,
   campaign_recipient::{CampaignRecipient, CampaignRecipientId},
   customer::Customer,
   mail::{MailError, OutgoingEmail},
   message::{html_to_text, inject_tracking_pixel, list_unsubscribe_headers, rewrite_links_for_tracking},
   personalization::{PersonalizationContext, render_html, render_text},
   tracking::TrackingUrls,
};

use super::template_renderer::TemplateRenderer;

/// 送信元の表示情報
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderIdentity {
   pub from_address: String,
   pub from_name:    Option<String>,
   pub reply_to:     Option<String>,
}

/// 受信者ごとのメッセージを組み立てる
pub struct MessageBuilder {
   renderer: Arc<TemplateRenderer>,
   urls:     TrackingUrls,
}

impl MessageBuilder {
   pub fn new(renderer: Arc<TemplateRenderer>, urls: TrackingUrls) -> Self {
      Self { renderer, urls }
   }

   pub fn urls(&self) -> &TrackingUrls {
      &self.urls
   }

   /// 送信待ちの受信者向けメッセージ
   ///
   /// `customer` は差し込み用の現在の顧客情報（削除済みなら `None`）。
   pub fn for_recipient(
      &self,
      campaign: &Campaign,
      recipient: &CampaignRecipient,
      customer: Option<&Customer>,
      sender: &SenderIdentity,
   ) -> Result<OutgoingEmail, MailError> {
      let ctx = PersonalizationContext::for_recipient(
         recipient,
         customer,
         self.urls.unsubscribe_url(recipient.id()),
      );
      self.build(campaign, recipient.id(), &ctx, sender)
   }

   pub fn build(
      &self,
      campaign: &Campaign,
      recipient_id: &CampaignRecipientId,
      ctx: &PersonalizationContext,
      sender: &SenderIdentity,
   ) -> Result<OutgoingEmail, MailError> {
      let subject = render_text(campaign.subject().as_str(), ctx);
      let content = render_html(campaign.content_html(), ctx);
      let content = rewrite_links_for_tracking(&content, &self.urls, recipient_id);
      let html = self.renderer.campaign_html(
         &content,
         &subject,
         &ctx.unsubscribe_url,
         sender.from_name.as_deref(),
      )?;
      let text_body = html_to_text(&html);
      let html_body = inject_tracking_pixel(&html, &self.urls.open_url(recipient_id));

      Ok(OutgoingEmail {
         to: ctx.email.clone(),
         to_name: Some(ctx.name.clone()).filter(|n| !n.trim().is_empty()),
         from_address: sender.from_address.clone(),
         from_name: sender.from_name.clone(),
         reply_to: sender.reply_to.clone(),
         subject,
         html_body,
         text_body,
         headers: list_unsubscribe_headers(&ctx.unsubscribe_url),
      })
   }
}

#[cfg(test)]
mod tests {
   use chrono::Utc;
   use kokyaku_domain::{
      campaign::{CampaignContent, CampaignId, CampaignInput},
      customer::customer_fixture,
      organization::OrganizationId,
      tracking::TrackingSigner,
      user::UserId,
   };
   use pretty_assertions::assert_eq;

   use super::*;

   const BASE_URL: &str = "https://crm.example.com";

   fn builder() -> MessageBuilder {
      let signer = TrackingSigner::new("0123456789abcdef0123456789abcdef").unwrap();
      MessageBuilder::new(
         Arc::new(TemplateRenderer::new().unwrap()),
         TrackingUrls::new(BASE_URL, signer),
      )
   }

   fn campaign(org: &OrganizationId, subject: &str, content_html: &str) -> Campaign {
      let content = CampaignContent::try_from(CampaignInput {
         name: "春のキャンペーン".to_string(),
         subject: subject.to_string(),
         content_html: content_html.to_string(),
         ..CampaignInput::default()
      })
      .unwrap();
      Campaign::new(CampaignId::new(), org.clone(), content, UserId::new(), Utc::now())
   }

   fn sender() -> SenderIdentity {
      SenderIdentity {
         from_address: "news@shop.example.com".to_string(),
         from_name:    Some("山田商店".to_string()),
         reply_to:     None,
      }
   }

   #[test]
   fn test_受信者ごとに差し込みと計測を施したメッセージを作る() {
      let org = OrganizationId::new();
      let customer = customer_fixture(&org, "山田 太郎", Some("taro@example.com"), Some("札幌市"), None);
      let campaign = campaign(
         &org,
         "{{first_name}} 様へのお知らせ",
         r#"<p>{{name}} 様（{{city}}）</p><a href="https://shop.example.com/sale">セール</a>"#,
      );
      let recipient = CampaignRecipient::pending_for(campaign.id(), &customer, Utc::now()).unwrap();
      let builder = builder();

      let email = builder
         .for_recipient(&campaign, &recipient, Some(&customer), &sender())
         .unwrap();

      assert_eq!(email.to, "taro@example.com");
      assert_eq!(email.to_name.as_deref(), Some("山田 太郎"));
      assert_eq!(email.subject, "山田 様へのお知らせ");
      assert!(email.html_body.contains("山田 太郎 様（札幌市）"));
      assert!(email.html_body.contains(&format!("{BASE_URL}/t/click/{}", recipient.id())));
      assert!(!email.html_body.contains(r#"href="https://shop.example.com/sale""#));
      assert!(email.html_body.contains(&format!("{BASE_URL}/t/open/{}.gif", recipient.id())));
      assert!(email.html_body.contains(&format!("{BASE_URL}/u/{}", recipient.id())));
      assert!(email.text_body.contains("山田 太郎 様（札幌市）"));
      assert!(!email.text_body.contains("<p>"));
      assert_eq!(
         email.header("List-Unsubscribe"),
         Some(format!("<{}>", builder.urls().unsubscribe_url(recipient.id())).as_str())
      );
      assert_eq!(
         email.header("List-Unsubscribe-Post"),
         Some("List-Unsubscribe=One-Click")
      );
   }

   #[test]
   fn test_差し込み値はhtml本文ではエスケープし件名ではそのまま使う() {
      let org = OrganizationId::new();
      let customer = customer_fixture(&org, "<b>太郎</b>", Some("taro@example.com"), None, None);
      let campaign = campaign(&org, "{{name}} 様", "<p>{{name}} 様</p>");
      let recipient = CampaignRecipient::pending_for(campaign.id(), &customer, Utc::now()).unwrap();

      let email = builder()
         .for_recipient(&campaign, &recipient, Some(&customer), &sender())
         .unwrap();

      assert_eq!(email.subject, "<b>太郎</b> 様");
      assert!(email.html_body.contains("&lt;b&gt;太郎&lt;/b&gt; 様"));
   }

   #[test]
   fn test_送信元情報を引き継ぐ() {
      let org = OrganizationId::new();
      let customer = customer_fixture(&org, "花子", Some("hanako@example.com"), None, None);
      let campaign = campaign(&org, "件名", "<p>本文</p>");
      let recipient = CampaignRecipient::pending_for(campaign.id(), &customer, Utc::now()).unwrap();
      let sender = SenderIdentity {
         reply_to: Some("support@shop.example.com".to_string()),
         ..sender()
      };

      let email = builder()
         .for_recipient(&campaign, &recipient, None, &sender)
         .unwrap();

      assert_eq!(email.from_address, "news@shop.example.com");
      assert_eq!(email.from_name.as_deref(), Some("山田商店"));
      assert_eq!(email.reply_to.as_deref(), Some("support@shop.example.com"));
   }
}
