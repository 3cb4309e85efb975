//! # 配信メッセージの加工
//!
//! 差し込み済みの HTML 本文に対して、送信直前に行う変換をまとめる。
//!
//! - リンク書き換え: `http(s)` のリンクを署名付きクリック URL に置き換える
//! - 開封ピクセル: 1×1 画像を `</body>` の直前に挿入する
//! - テキスト版: HTML からプレーンテキストの代替本文を作る
//! - `List-Unsubscribe` ヘッダ（RFC 2369 / RFC 8058）

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::{
   campaign_recipient::CampaignRecipientId,
   personalization::escape_html,
   tracking::TrackingUrls,
};

static ANCHOR_HREF: LazyLock<Regex> = LazyLock::new(|| {
   Regex::new(r#"(?i)(<a\b[^>]*?\bhref\s*=\s*)(?:"([^"]*)"|'([^']*)')"#)
      .expect("リンクの正規表現が不正")
});

static ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
   Regex::new(r#"(?is)<a\b[^>]*?\bhref\s*=\s*(?:"([^"]*)"|'([^']*)')[^>]*>(.*?)</a\s*>"#)
      .expect("リンクの正規表現が不正")
});

static INVISIBLE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
   Regex::new(r"(?is)<(?:script|style|head)\b.*?</(?:script|style|head)\s*>")
      .expect("ブロック要素の正規表現が不正")
});

static LINE_BREAK: LazyLock<Regex> =
   LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("改行の正規表現が不正"));

static BLOCK_END: LazyLock<Regex> = LazyLock::new(|| {
   Regex::new(r"(?i)</(?:p|div|h[1-6]|li|tr|table|blockquote|ul|ol)\s*>")
      .expect("ブロック終端の正規表現が不正")
});

static LIST_ITEM: LazyLock<Regex> =
   LazyLock::new(|| Regex::new(r"(?i)<li\b[^>]*>").expect("リスト項目の正規表現が不正"));

static TAG: LazyLock<Regex> =
   LazyLock::new(|| Regex::new(r"<[^>]*>").expect("タグの正規表現が不正"));

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
   Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});")
      .expect("文字参照の正規表現が不正")
});

static SPACES: LazyLock<Regex> =
   LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").expect("空白の正規表現が不正"));

/// `href` 属性の値を書き換える
///
/// `rewrite` が `None` を返したリンクはそのまま残す。渡される URL は
/// 文字参照をデコード済みの値。
pub fn rewrite_links(html: &str, rewrite: impl Fn(&str) -> Option<String>) -> String {
   ANCHOR_HREF
      .replace_all(html, |caps: &Captures<'_>| {
         let raw = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
         match rewrite(&decode_entities(raw.trim())) {
            Some(url) => format!("{}\"{}\"", &caps[1], escape_html(&url)),
            None => caps[0].to_string(),
         }
      })
      .into_owned()
}

/// `http(s)` のリンクをクリック計測 URL に書き換える
///
/// `mailto:`、ページ内アンカー、既にトラッキング・配信停止 URL になっている
/// リンクは対象外。
pub fn rewrite_links_for_tracking(
   html: &str,
   urls: &TrackingUrls,
   recipient_id: &CampaignRecipientId,
) -> String {
   rewrite_links(html, |target| {
      let lower = target.to_ascii_lowercase();
      let is_web = lower.starts_with("http://") || lower.starts_with("https://");
      if !is_web || urls.is_tracking_url(target) {
         return None;
      }
      Some(urls.click_url(recipient_id, target))
   })
}

/// 開封ピクセルを挿入する
///
/// 最後の `</body>` の直前に入れ、`</body>` がなければ末尾に追加する。
pub fn inject_tracking_pixel(html: &str, pixel_url: &str) -> String {
   let pixel = format!(
      r#"<img src="{}" width="1" height="1" alt="" style="display:block;width:1px;height:1px;border:0" />"#,
      escape_html(pixel_url)
   );
   match html.to_ascii_lowercase().rfind("</body>") {
      Some(pos) => format!("{}{pixel}{}", &html[..pos], &html[pos..]),
      None => format!("{html}{pixel}"),
   }
}

/// HTML からプレーンテキストの代替本文を作る
///
/// タグを除去して文字参照をデコードし、リンクは `テキスト (URL)` の形で残す。
pub fn html_to_text(html: &str) -> String {
   let text = INVISIBLE_BLOCK.replace_all(html, "");
   let text = ANCHOR.replace_all(&text, |caps: &Captures<'_>| {
      let href = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str()).trim();
      let label = TAG.replace_all(&caps[3], "");
      let label = label.trim();
      if label.is_empty() || decode_entities(label) == decode_entities(href) {
         href.to_string()
      } else if href.starts_with('#') || href.is_empty() {
         label.to_string()
      } else {
         format!("{label} ({href})")
      }
   });
   let text = LINE_BREAK.replace_all(&text, "\n");
   let text = BLOCK_END.replace_all(&text, "\n");
   let text = LIST_ITEM.replace_all(&text, "- ");
   let text = TAG.replace_all(&text, "");
   let text = decode_entities(&text);

   let mut lines: Vec<String> = Vec::new();
   for line in text.lines() {
      let line = SPACES.replace_all(line.trim(), " ").into_owned();
      let previous_blank = lines.last().is_none_or(|l| l.is_empty());
      if line.is_empty() && previous_blank {
         continue;
      }
      lines.push(line);
   }
   while lines.last().is_some_and(|l| l.is_empty()) {
      lines.pop();
   }
   lines.join("\n")
}

/// HTML の文字参照をデコードする
///
/// 未知の名前付き参照はそのまま残す。
pub fn decode_entities(value: &str) -> String {
   ENTITY
      .replace_all(value, |caps: &Captures<'_>| {
         let entity = &caps[1];
         let decoded = if let Some(hex) = entity
            .strip_prefix("#x")
            .or_else(|| entity.strip_prefix("#X"))
         {
            u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
         } else if let Some(dec) = entity.strip_prefix('#') {
            dec.parse::<u32>().ok().and_then(char::from_u32)
         } else {
            named_entity(entity)
         };
         decoded.map_or_else(|| caps[0].to_string(), String::from)
      })
      .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
   let c = match name {
      "amp" => '&',
      "lt" => '<',
      "gt" => '>',
      "quot" => '"',
      "apos" => '\'',
      "nbsp" => '\u{a0}',
      "copy" => '©',
      "reg" => '®',
      "hellip" => '…',
      "mdash" => '—',
      "ndash" => '–',
      "yen" => '¥',
      _ => return None,
   };
   Some(c)
}

/// 配信停止用のヘッダ
///
/// `List-Unsubscribe-Post` によりメールクライアントからのワンクリック配信停止
/// （RFC 8058）に対応する。
pub fn list_unsubscribe_headers(unsubscribe_url: &str) -> Vec<(String, String)> {
   vec![
      ("List-Unsubscribe".to_string(), format!("<{unsubscribe_url}>")),
      (
         "List-Unsubscribe-Post".to_string(),
         "List-Unsubscribe=One-Click".to_string(),
      ),
   ]
}
