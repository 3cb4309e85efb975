//! # PostgreSQL データベース接続管理
//!
//! データベース接続プールの作成とマイグレーションの適用を行う。
//!
//! ## 設計方針
//!
//! - **接続プール**: 起動時に一度だけ作成し、アプリケーション全体で共有する
//! - **マイグレーション埋め込み**: `sqlx::migrate!` でバイナリに SQL を埋め込む
//! - **テナント分離はクエリで行う**: すべての業務テーブルのクエリは
//!   `organization_id` で絞り込む
//!
//! ```rust,ignore
//! use kokyaku_infra::db;
//!
//! let pool = db::create_pool("postgres://localhost/kokyaku").await?;
//! db::run_migrations(&pool).await?;
//! ```

use std::time::Duration;

use sqlx::{PgPool, postgres::PgPoolOptions};

/// データベースマイグレーションを実行する
///
/// 適用済みのマイグレーションはスキップされる。sqlx が advisory lock を
/// 使用するため、複数プロセスから同時に呼び出してもよい。
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}

/// PostgreSQL 接続プールを作成する
///
/// # 設定値
///
/// - `max_connections(10)`: 最大接続数
/// - `acquire_timeout(5秒)`: 接続取得のタイムアウト。超過時はエラー
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// 疎通確認（readiness チェック用）
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}
