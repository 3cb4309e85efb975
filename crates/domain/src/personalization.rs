//! # 差し込み（パーソナライズ）
//!
//! 件名・本文中の `{{name}}` などのプレースホルダを受信者ごとの値に置き換える。
//!
//! | プレースホルダ | 値 |
//! |---------------|----|
//! | `{{name}}` | 顧客名 |
//! | `{{first_name}}` | 顧客名の最初の空白までの部分 |
//! | `{{email}}` | 宛先メールアドレス |
//! | `{{company}}` | 会社名（未設定なら空） |
//! | `{{city}}` | 市区町村（未設定なら空） |
//! | `{{unsubscribe_url}}` | 署名付き配信停止 URL |
//!
//! 波括弧内の前後空白は許容し、未知のプレースホルダはそのまま残す。
//! HTML 本文では値を HTML エスケープし、件名・テキスト本文では生の値を使う。

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::{campaign_recipient::CampaignRecipient, customer::Customer};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
   Regex::new(r"\{\{\s*([A-Za-z_]+)\s*\}\}").expect("プレースホルダの正規表現が不正")
});

/// 受信者 1 件分の差し込み値
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonalizationContext {
   pub name:            String,
   pub email:           String,
   pub company:         Option<String>,
   pub city:            Option<String>,
   pub unsubscribe_url: String,
}

impl PersonalizationContext {
   /// 受信者のスナップショットと、現在の顧客情報（削除済みなら `None`）から作る
   pub fn for_recipient(
      recipient: &CampaignRecipient,
      customer: Option<&Customer>,
      unsubscribe_url: String,
   ) -> Self {
      Self {
         name: recipient.name().to_string(),
         email: recipient.email().as_str().to_string(),
         company: customer.and_then(|c| c.company()).map(str::to_string),
         city: customer.and_then(|c| c.city()).map(str::to_string),
         unsubscribe_url,
      }
   }

   fn first_name(&self) -> &str {
      self.name.split_whitespace().next().unwrap_or(&self.name)
   }

   fn lookup(&self, key: &str) -> Option<&str> {
      match key.to_ascii_lowercase().as_str() {
         "name" => Some(&self.name),
         "first_name" => Some(self.first_name()),
         "email" => Some(&self.email),
         "company" => Some(self.company.as_deref().unwrap_or_default()),
         "city" => Some(self.city.as_deref().unwrap_or_default()),
         "unsubscribe_url" => Some(&self.unsubscribe_url),
         _ => None,
      }
   }
}

fn render_with(template: &str, ctx: &PersonalizationContext, encode: fn(&str) -> String) -> String {
   PLACEHOLDER
      .replace_all(template, |caps: &Captures<'_>| match ctx.lookup(&caps[1]) {
         Some(value) => encode(value),
         None => caps[0].to_string(),
      })
      .into_owned()
}

/// 件名・テキスト本文向け（エスケープなし）
pub fn render_text(template: &str, ctx: &PersonalizationContext) -> String {
   render_with(template, ctx, str::to_string)
}

/// HTML 本文向け（値を HTML エスケープ）
pub fn render_html(template: &str, ctx: &PersonalizationContext) -> String {
   render_with(template, ctx, escape_html)
}

pub fn escape_html(value: &str) -> String {
   let mut escaped = String::with_capacity(value.len());
   for c in value.chars() {
      match c {
         '&' => escaped.push_str("&amp;"),
         '<' => escaped.push_str("&lt;"),
         '>' => escaped.push_str("&gt;"),
         '"' => escaped.push_str("&quot;"),
         '\'' => escaped.push_str("&#39;"),
         c => escaped.push(c),
      }
   }
   escaped
}
