//! # ページネーション付きレスポンス
//!
//! 顧客・リード一覧などのオフセット型ページネーションに対応した API レスポンス型。

use serde::{Deserialize, Serialize};

/// 1 ページあたりの件数の上限
pub const MAX_PER_PAGE: u32 = 100;

/// 1 ページあたりの件数のデフォルト
pub const DEFAULT_PER_PAGE: u32 = 20;

/// ページネーション付きレスポンス
///
/// `ApiResponse<T>` が単一データ用であるのに対し、
/// `PaginatedResponse<T>` はリスト + 総件数のページネーション形式。
///
/// ## JSON 形式
///
/// ```json
/// {
///   "data": [...],
///   "total": 123,
///   "page": 1,
///   "per_page": 20
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
   pub data:     Vec<T>,
   pub total:    i64,
   pub page:     u32,
   pub per_page: u32,
}

/// ページ指定クエリ
///
/// `page` は 1 始まり。範囲外の値は [`PageQuery::normalized`] で丸める。
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
   pub page:     Option<u32>,
   pub per_page: Option<u32>,
}

impl PageQuery {
   /// `(page, per_page)` を有効範囲に丸めて返す
   pub fn normalized(&self) -> (u32, u32) {
      let page = self.page.unwrap_or(1).max(1);
      let per_page = self
         .per_page
         .unwrap_or(DEFAULT_PER_PAGE)
         .clamp(1, MAX_PER_PAGE);
      (page, per_page)
   }

   /// SQL の `LIMIT` / `OFFSET` を返す
   pub fn limit_offset(&self) -> (i64, i64) {
      let (page, per_page) = self.normalized();
      (
         i64::from(per_page),
         i64::from(page - 1) * i64::from(per_page),
      )
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_未指定ならデフォルト値になる() {
      let query = PageQuery::default();
      assert_eq!(query.normalized(), (1, DEFAULT_PER_PAGE));
      assert_eq!(query.limit_offset(), (20, 0));
   }

   #[test]
   fn test_範囲外の値は丸められる() {
      let query = PageQuery {
         page:     Some(0),
         per_page: Some(10_000),
      };
      assert_eq!(query.normalized(), (1, MAX_PER_PAGE));
   }

   #[test]
   fn test_offsetはページ番号から計算される() {
      let query = PageQuery {
         page:     Some(3),
         per_page: Some(20),
      };
      assert_eq!(query.limit_offset(), (20, 40));
   }
}
