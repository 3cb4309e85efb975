//! # Kokyaku サーバー
//!
//! 顧客・リード・セグメントの管理と、メールキャンペーンの配信を行う API サーバー。
//!
//! ## 構成
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Browser    │────▶│   Kokyaku    │────▶│  PostgreSQL  │
//! └──────────────┘     │    Server    │     └──────────────┘
//! ┌──────────────┐     │              │     ┌──────────────┐
//! │  Scheduler   │────▶│              │────▶│    Redis     │
//! │   (cron)     │     └──────────────┘     │  (Session)   │
//! └──────────────┘            │             └──────────────┘
//!                             ▼
//!                     Gmail API / SMTP
//! ```
//!
//! 送信は cron から `/api/cron/email-jobs` を定期的に呼び出して進める。
//! サーバー自身はバックグラウンドのワーカーを持たない。
//!
//! ## 環境変数
//!
//! | 変数名 | 必須 | 説明 |
//! |--------|------|------|
//! | `SERVER_HOST` | No | バインドアドレス（デフォルト: `0.0.0.0`） |
//! | `SERVER_PORT` | No | ポート番号（デフォルト: `3000`） |
//! | `DATABASE_URL` | **Yes** | PostgreSQL 接続 URL |
//! | `REDIS_URL` | **Yes** | Redis 接続 URL |
//! | `APP_BASE_URL` | **Yes** | 公開 URL（トラッキング URL に使う） |
//! | `TRACKING_SECRET` | **Yes** | トラッキング URL の署名鍵（16 バイト以上） |
//! | `CRON_SECRET` | **Yes** | cron エンドポイントの Bearer トークン |
//! | `GOOGLE_CLIENT_ID` | **Yes** | Google OAuth クライアント ID |
//! | `GOOGLE_CLIENT_SECRET` | **Yes** | Google OAuth クライアントシークレット |
//! | `GOOGLE_REDIRECT_URL` | No | OAuth コールバック URL |
//! | `MAIL_BACKEND` | No | `live`（デフォルト）または `noop` |
//! | `DELIVERY_*` / `EMAIL_JOB_MAX_ATTEMPTS` / `RECIPIENT_MAX_ATTEMPTS` | No | 配信ワーカーの調整 |
//! | `LOG_FORMAT` | No | `json` または `pretty` |
//!
//! ## 起動方法
//!
//! ```bash
//! cargo run -p kokyaku-server
//! ```

mod app_builder;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context as _;
use app_builder::{Infra, Repositories, build_app};
use kokyaku_domain::tracking::{TrackingSigner, TrackingUrls};
use kokyaku_infra::{
   GoogleOAuthClient,
   GoogleOAuthClientImpl,
   RedisSessionManager,
   SessionManager,
   db,
   mail::{EmailSenderFactory, LiveEmailSenderFactory, NoopEmailSenderFactory},
};
use kokyaku_server::{
   config::{MailBackend, ServerConfig},
   usecase::TemplateRenderer,
};
use kokyaku_shared::observability::{TracingConfig, init_tracing};
use tokio::net::TcpListener;

/// サーバーのエントリーポイント
///
/// 以下の順序で初期化を行う:
///
/// 1. 環境変数の読み込み（.env ファイル）
/// 2. トレーシングの初期化
/// 3. 設定の読み込み
/// 4. PostgreSQL・Redis への接続とマイグレーション
/// 5. ルーターの構築
/// 6. HTTP サーバーの起動
#[tokio::main]
async fn main() -> anyhow::Result<()> {
   // 本番環境では .env ファイルは使用せず、環境変数を直接設定する
   dotenvy::dotenv().ok();

   init_tracing(TracingConfig::from_env("kokyaku-server"));
   let _tracing_guard = tracing::info_span!("app", service = "kokyaku-server").entered();

   let config = ServerConfig::from_env().context("設定の読み込みに失敗しました")?;
   tracing::info!("サーバーを起動します: {}:{}", config.host, config.port);

   let pool = db::create_pool(&config.database_url)
      .await
      .context("データベース接続に失敗しました")?;
   db::run_migrations(&pool)
      .await
      .context("マイグレーションに失敗しました")?;

   let session_manager: Arc<dyn SessionManager> = Arc::new(
      RedisSessionManager::new(&config.redis_url)
         .await
         .context("Redis への接続に失敗しました")?,
   );
   let google: Arc<dyn GoogleOAuthClient> = Arc::new(GoogleOAuthClientImpl::new(
      config.google_client_id.clone(),
      config.google_client_secret.clone(),
      config.google_redirect_url.clone(),
   ));
   let sender_factory: Arc<dyn EmailSenderFactory> = match config.mail_backend {
      MailBackend::Live => Arc::new(LiveEmailSenderFactory::new(google.clone())),
      MailBackend::Noop => {
         tracing::warn!("MAIL_BACKEND=noop: メールは送信されません");
         Arc::new(NoopEmailSenderFactory)
      }
   };
   let renderer =
      Arc::new(TemplateRenderer::new().context("メールテンプレートの読み込みに失敗しました")?);
   let signer = TrackingSigner::new(&config.tracking_secret)
      .context("TRACKING_SECRET が不正です")?;
   let tracking_urls = TrackingUrls::new(&config.app_base_url, signer);

   let app = build_app(
      &config,
      Infra {
         repositories: Repositories::postgres(&pool),
         pool,
         session_manager,
         google,
         sender_factory,
         renderer,
         tracking_urls,
      },
   );

   let addr: SocketAddr = format!("{}:{}", config.host, config.port)
      .parse()
      .context("アドレスのパースに失敗しました")?;
   let listener = TcpListener::bind(addr).await?;
   tracing::info!("サーバーが起動しました: {}", addr);

   axum::serve(listener, app).await?;

   Ok(())
}
