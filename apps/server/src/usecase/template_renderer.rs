//! # テンプレートレンダラー
//!
//! tera テンプレートエンジンでキャンペーンメールのレイアウトと
//! 配信停止ページを生成する。
//!
//! ## 設計方針
//!
//! - **`include_str!` によるコンパイル時埋め込み**: テンプレートはバイナリに埋め込まれる
//! - **本文は差し込み済み HTML をそのまま埋める**: 本文の HTML エスケープは差し込み側で済ませ、
//!   レイアウトでは `safe` フィルタで展開する
//! - **完全な HTML 文書はレイアウトで包まない**: `<html>` / `<body>` を含む本文には
//!   フッターだけを `</body>` の直前に挿入する

use kokyaku_domain::mail::MailError;
use tera::{Context, Tera};

const LAYOUT: &str = "campaign/layout.html";
const FOOTER: &str = "campaign/footer.html";
const UNSUBSCRIBE_CONFIRM: &str = "unsubscribe/confirm.html";
const UNSUBSCRIBE_DONE: &str = "unsubscribe/done.html";
const UNSUBSCRIBE_INVALID: &str = "unsubscribe/invalid.html";

/// テンプレートレンダラー
pub struct TemplateRenderer {
   engine: Tera,
}

impl TemplateRenderer {
   /// `include_str!` で埋め込んだテンプレートを tera に登録する
   pub fn new() -> Result<Self, MailError> {
      let mut engine = Tera::default();

      engine
         .add_raw_templates(vec![
            (
               "unsubscribe/base.html",
               include_str!("../../../../templates/unsubscribe/base.html"),
            ),
            (
               FOOTER,
               include_str!("../../../../templates/campaign/footer.html"),
            ),
            (
               LAYOUT,
               include_str!("../../../../templates/campaign/layout.html"),
            ),
            (
               UNSUBSCRIBE_CONFIRM,
               include_str!("../../../../templates/unsubscribe/confirm.html"),
            ),
            (
               UNSUBSCRIBE_DONE,
               include_str!("../../../../templates/unsubscribe/done.html"),
            ),
            (
               UNSUBSCRIBE_INVALID,
               include_str!("../../../../templates/unsubscribe/invalid.html"),
            ),
         ])
         .map_err(|e| MailError::TemplateFailed(e.to_string()))?;

      Ok(Self { engine })
   }

   fn render(&self, name: &str, context: &Context) -> Result<String, MailError> {
      self
         .engine
         .render(name, context)
         .map_err(|e| MailError::TemplateFailed(e.to_string()))
   }

   /// 本文を配信停止フッター付きのレイアウトに収める
   pub fn campaign_html(
      &self,
      content_html: &str,
      subject: &str,
      unsubscribe_url: &str,
      sender_name: Option<&str>,
   ) -> Result<String, MailError> {
      let mut context = Context::new();
      context.insert("subject", subject);
      context.insert("unsubscribe_url", unsubscribe_url);
      context.insert("sender_name", &sender_name);

      if !is_full_document(content_html) {
         context.insert("content", content_html);
         return self.render(LAYOUT, &context);
      }

      let footer = self.render(FOOTER, &context)?;
      Ok(match content_html.to_ascii_lowercase().rfind("</body>") {
         Some(pos) => format!("{}{footer}{}", &content_html[..pos], &content_html[pos..]),
         None => format!("{content_html}{footer}"),
      })
   }

   /// 配信停止の確認ページ
   pub fn unsubscribe_confirm(&self, email: &str, action_url: &str) -> Result<String, MailError> {
      let mut context = Context::new();
      context.insert("email", email);
      context.insert("action_url", action_url);
      self.render(UNSUBSCRIBE_CONFIRM, &context)
   }

   /// 配信停止の完了ページ
   pub fn unsubscribe_done(&self, email: Option<&str>) -> Result<String, MailError> {
      let mut context = Context::new();
      context.insert("email", &email);
      self.render(UNSUBSCRIBE_DONE, &context)
   }

   /// 署名が不正なリンクのページ
   pub fn unsubscribe_invalid(&self) -> Result<String, MailError> {
      self.render(UNSUBSCRIBE_INVALID, &Context::new())
   }
}

fn is_full_document(html: &str) -> bool {
   let lower = html.to_ascii_lowercase();
   lower.contains("<html") || lower.contains("<body")
}

#[cfg(test)]
mod tests {
   use pretty_assertions::assert_eq;

   use super::*;

   const UNSUBSCRIBE_URL: &str = "https://crm.example.com/u/abc?s=sig";

   #[test]
   fn test_断片の本文はレイアウトに収める() {
      let renderer = TemplateRenderer::new().unwrap();

      let html = renderer
         .campaign_html("<p>こんにちは</p>", "春のお知らせ", UNSUBSCRIBE_URL, Some("山田商店"))
         .unwrap();

      assert!(html.starts_with("<!DOCTYPE html>"));
      assert!(html.contains("<title>春のお知らせ</title>"));
      assert!(html.contains("<p>こんにちは</p>"));
      assert!(html.contains("山田商店"));
      assert!(html.contains(UNSUBSCRIBE_URL));
   }

   #[test]
   fn test_完全なhtml文書にはフッターだけを挿入する() {
      let renderer = TemplateRenderer::new().unwrap();
      let content = "<html><body><p>本文</p></body></html>";

      let html = renderer
         .campaign_html(content, "件名", UNSUBSCRIBE_URL, None)
         .unwrap();

      assert!(html.starts_with("<html><body><p>本文</p><div"));
      assert!(html.ends_with("</body></html>"));
      assert_eq!(html.matches("<body").count(), 1);
      assert!(html.contains(UNSUBSCRIBE_URL));
   }

   #[test]
   fn test_件名はエスケープされる() {
      let renderer = TemplateRenderer::new().unwrap();

      let html = renderer
         .campaign_html("<p>x</p>", "<script>", UNSUBSCRIBE_URL, None)
         .unwrap();

      assert!(html.contains("<title>&lt;script&gt;</title>"));
   }

   #[test]
   fn test_配信停止確認ページにフォームの送信先を埋める() {
      let renderer = TemplateRenderer::new().unwrap();

      let html = renderer
         .unsubscribe_confirm("taro@example.com", "/u/abc?s=sig")
         .unwrap();

      assert!(html.contains("taro@example.com"));
      assert!(html.contains(r#"action="/u/abc?s=sig""#));
   }

   #[test]
   fn test_配信停止完了ページはメールアドレスなしでも描画できる() {
      let renderer = TemplateRenderer::new().unwrap();

      let html = renderer.unsubscribe_done(None).unwrap();

      assert!(html.contains("メール配信を停止しました"));
   }

   #[test]
   fn test_無効リンクページを描画できる() {
      let renderer = TemplateRenderer::new().unwrap();

      assert!(renderer.unsubscribe_invalid().unwrap().contains("リンクが無効です"));
   }
}
