//! # ドメイン層エラー定義
//!
//! ビジネスルール違反やドメイン固有の例外状態を表現するエラー型。
//!
//! ## エラーの種類と HTTP ステータスの対応
//!
//! | エラー種別 | HTTP ステータス | 用途 |
//! |-----------|----------------|------|
//! | `Validation` | 400 Bad Request | 入力値・セグメント条件の検証失敗 |
//! | `NotFound` | 404 Not Found | エンティティが存在しない |
//! | `Conflict` | 409 Conflict | 状態遷移の不整合、重複 |
//! | `Forbidden` | 403 Forbidden | 組織ロール不足 |

use thiserror::Error;

/// ドメイン層で発生するエラー
///
/// API 層でこのエラーを受け取り、適切な HTTP レスポンスに変換する。
#[derive(Debug, Error)]
pub enum DomainError {
   /// バリデーションエラー
   #[error("バリデーションエラー: {0}")]
   Validation(String),

   /// エンティティが見つからない
   #[error("{entity_type} が見つかりません: {id}")]
   NotFound {
      /// エンティティの種類（"Customer", "Campaign" など）
      entity_type: &'static str,
      /// 検索に使用した識別子
      id:          String,
   },

   /// 競合エラー
   ///
   /// 送信済みキャンペーンの編集、変換済みリードの再変換など、
   /// 現在の状態では許されない操作に使用する。
   #[error("競合が発生しました: {0}")]
   Conflict(String),

   /// 権限エラー
   ///
   /// 認証（401）ではなく、組織内ロール不足による認可（403）の失敗を表す。
   #[error("権限がありません: {0}")]
   Forbidden(String),
}

impl DomainError {
   /// `NotFound` を生成する
   pub fn not_found(entity_type: &'static str, id: impl ToString) -> Self {
      Self::NotFound {
         entity_type,
         id: id.to_string(),
      }
   }
}
