//! # インフラ層エラー定義
//!
//! データベースや外部サービスとの通信で発生するエラーを表現する。
//!
//! ## 設計方針
//!
//! - **エラーの変換**: sqlx::Error, redis::RedisError などをラップ
//! - **ドメインエラーとの分離**: インフラ固有のエラーを明示
//! - **SpanTrace 自動捕捉**: `From` 実装や convenience constructor で
//!   エラー生成時の呼び出し経路を自動記録する
//!
//! ## 構造
//!
//! `std::io::Error` と同じ struct + enum パターンを採用:
//! - [`InfraError`]: エラー種別（[`InfraErrorKind`]）と [`SpanTrace`] を保持するラッパー
//! - [`InfraErrorKind`]: エラーの具体的な種別（Database, Redis, Conflict 等）

use std::fmt;

use derive_more::Display;
use thiserror::Error;
use tracing_error::SpanTrace;

/// PostgreSQL の一意制約違反コード
const UNIQUE_VIOLATION: &str = "23505";

/// インフラ層で発生するエラー
///
/// エラー種別（[`InfraErrorKind`]）と [`SpanTrace`]（呼び出し経路）を保持する。
///
/// ```ignore
/// match error.kind() {
///     InfraErrorKind::Conflict { entity, id } => { /* 競合処理 */ }
///     _ => { /* その他 */ }
/// }
/// ```
#[derive(Display)]
#[display("{kind}")]
pub struct InfraError {
    kind:       InfraErrorKind,
    span_trace: SpanTrace,
}

/// インフラ層エラーの種別
#[derive(Debug, Error)]
pub enum InfraErrorKind {
    /// データベースエラー
    #[error("データベースエラー: {0}")]
    Database(#[source] sqlx::Error),

    /// Redis エラー
    #[error("Redis エラー: {0}")]
    Redis(#[source] redis::RedisError),

    /// シリアライズ/デシリアライズエラー
    #[error("シリアライズエラー: {0}")]
    Serialization(#[source] serde_json::Error),

    /// 一意制約違反などの競合
    ///
    /// 組織内で重複するメールアドレスやタグ名の登録時に使用する。
    #[error("競合が発生しました: {entity}(id={id})")]
    Conflict {
        /// エンティティ名（例: "Customer"）
        entity: String,
        /// 競合したキー
        id:     String,
    },

    /// 外部サービス（Google OAuth / Gmail API）のエラー
    #[error("外部サービスエラー: {0}")]
    ExternalService(String),

    /// クライアント入力エラー
    #[error("入力エラー: {0}")]
    InvalidInput(String),

    /// 予期しないエラー
    #[error("予期しないエラー: {0}")]
    Unexpected(String),
}

// ===== InfraError のメソッド =====

impl InfraError {
    /// エラー種別を取得する
    pub fn kind(&self) -> &InfraErrorKind {
        &self.kind
    }

    /// SpanTrace を取得する
    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }

    /// Conflict バリアントの場合、entity と id を返す
    pub fn as_conflict(&self) -> Option<(&str, &str)> {
        match &self.kind {
            InfraErrorKind::Conflict { entity, id } => Some((entity, id)),
            _ => None,
        }
    }

    /// InfraError を分解して InfraErrorKind と SpanTrace を取り出す
    pub fn into_parts(self) -> (InfraErrorKind, SpanTrace) {
        (self.kind, self.span_trace)
    }

    /// InfraErrorKind と SpanTrace から InfraError を組み立てる
    pub fn from_parts(kind: InfraErrorKind, span_trace: SpanTrace) -> Self {
        Self { kind, span_trace }
    }

    // ===== Convenience constructors =====

    /// 競合エラーを生成する
    pub fn conflict(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind:       InfraErrorKind::Conflict {
                entity: entity.into(),
                id:     id.into(),
            },
            span_trace: SpanTrace::capture(),
        }
    }

    /// 外部サービスエラーを生成する
    pub fn external_service(msg: impl Into<String>) -> Self {
        Self {
            kind:       InfraErrorKind::ExternalService(msg.into()),
            span_trace: SpanTrace::capture(),
        }
    }

    /// クライアント入力エラーを生成する
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self {
            kind:       InfraErrorKind::InvalidInput(msg.into()),
            span_trace: SpanTrace::capture(),
        }
    }

    /// 予期しないエラーを生成する
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self {
            kind:       InfraErrorKind::Unexpected(msg.into()),
            span_trace: SpanTrace::capture(),
        }
    }

    /// 一意制約違反を Conflict に読み替える
    ///
    /// それ以外の sqlx エラーは Database のまま返す。
    pub fn from_unique_violation(
        source: sqlx::Error,
        entity: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        let is_unique = source
            .as_database_error()
            .and_then(|e| e.code())
            .is_some_and(|code| code == UNIQUE_VIOLATION);
        if is_unique {
            Self::conflict(entity, id)
        } else {
            source.into()
        }
    }
}

// ===== トレイト実装 =====

impl fmt::Debug for InfraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfraError")
            .field("kind", &self.kind)
            .field("span_trace", &self.span_trace)
            .finish()
    }
}

impl std::error::Error for InfraError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

// ===== From 実装（SpanTrace 自動キャプチャ） =====

impl From<sqlx::Error> for InfraError {
    fn from(source: sqlx::Error) -> Self {
        Self {
            kind:       InfraErrorKind::Database(source),
            span_trace: SpanTrace::capture(),
        }
    }
}

impl From<redis::RedisError> for InfraError {
    fn from(source: redis::RedisError) -> Self {
        Self {
            kind:       InfraErrorKind::Redis(source),
            span_trace: SpanTrace::capture(),
        }
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(source: serde_json::Error) -> Self {
        Self {
            kind:       InfraErrorKind::Serialization(source),
            span_trace: SpanTrace::capture(),
        }
    }
}

impl From<reqwest::Error> for InfraError {
    fn from(source: reqwest::Error) -> Self {
        Self::external_service(source.to_string())
    }
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::layer::SubscriberExt as _;

    use super::*;

    /// テスト用に ErrorLayer 付き subscriber を設定する
    fn with_error_layer(f: impl FnOnce()) {
        let subscriber = tracing_subscriber::registry().with(tracing_error::ErrorLayer::default());
        let _guard = tracing::subscriber::set_default(subscriber);
        f();
    }

    #[test]
    fn test_from_sqlx_errorでspan_traceがキャプチャされる() {
        with_error_layer(|| {
            let span = tracing::info_span!("test_repo", organization_id = "ORG-001");
            let _enter = span.enter();

            let err: InfraError = sqlx::Error::RowNotFound.into();

            assert!(matches!(err.kind(), InfraErrorKind::Database(_)));
            let trace_str = format!("{}", err.span_trace());
            assert!(
                trace_str.contains("test_repo"),
                "SpanTrace がスパン名を含むこと: {trace_str}",
            );
        });
    }

    #[test]
    fn test_from_redis_errorでspan_traceがキャプチャされる() {
        with_error_layer(|| {
            let span = tracing::info_span!("test_redis");
            let _enter = span.enter();

            let redis_err: redis::RedisError = (redis::ErrorKind::Io, "接続失敗").into();
            let err: InfraError = redis_err.into();

            assert!(matches!(err.kind(), InfraErrorKind::Redis(_)));
            assert!(format!("{}", err.span_trace()).contains("test_redis"));
        });
    }

    #[test]
    fn test_from_serde_json_errorでspan_traceがキャプチャされる() {
        with_error_layer(|| {
            let span = tracing::info_span!("test_serialization");
            let _enter = span.enter();

            let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
            let err: InfraError = json_err.into();

            assert!(matches!(err.kind(), InfraErrorKind::Serialization(_)));
            assert!(format!("{}", err.span_trace()).contains("test_serialization"));
        });
    }

    #[test]
    fn test_conflictでspan_traceがキャプチャされる() {
        with_error_layer(|| {
            let span = tracing::info_span!("test_insert");
            let _enter = span.enter();

            let err = InfraError::conflict("Customer", "taro@example.com");

            assert!(matches!(
                err.kind(),
                InfraErrorKind::Conflict { entity, id }
                    if entity == "Customer" && id == "taro@example.com"
            ));
            assert!(format!("{}", err.span_trace()).contains("test_insert"));
        });
    }

    #[test]
    fn test_external_serviceのメッセージ() {
        let err = InfraError::external_service("token endpoint returned 400");
        assert!(matches!(
            err.kind(),
            InfraErrorKind::ExternalService(msg) if msg == "token endpoint returned 400"
        ));
    }

    #[test]
    fn test_一意制約違反以外はdatabaseのまま() {
        let err = InfraError::from_unique_violation(sqlx::Error::RowNotFound, "Tag", "vip");
        assert!(matches!(err.kind(), InfraErrorKind::Database(_)));
    }

    #[test]
    fn test_displayがinfra_error_kindのメッセージを出力する() {
        let err = InfraError::conflict("Tag", "VIP");
        assert_eq!(format!("{err}"), "競合が発生しました: Tag(id=VIP)");
    }

    #[test]
    fn test_sourceがinfra_error_kindに委譲する() {
        use std::error::Error;

        let err: InfraError = sqlx::Error::RowNotFound.into();
        assert!(err.source().is_some());
    }

    #[test]
    fn test_as_conflictはconflict以外でnoneを返す() {
        let err = InfraError::unexpected("x");
        assert!(err.as_conflict().is_none());
        assert_eq!(
            InfraError::conflict("Tag", "1").as_conflict(),
            Some(("Tag", "1"))
        );
    }

    #[test]
    fn test_into_partsとfrom_partsで往復できる() {
        let (kind, trace) = InfraError::invalid_input("bad").into_parts();
        let err = InfraError::from_parts(kind, trace);
        assert!(matches!(err.kind(), InfraErrorKind::InvalidInput(m) if m == "bad"));
    }
}
