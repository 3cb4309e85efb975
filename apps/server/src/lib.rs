//! # Kokyaku サーバーライブラリ
//!
//! 顧客管理とメールキャンペーン配信の API サーバー。
//! バイナリ（`main.rs`）とテストから利用するモジュールを公開する。
//!
//! ## モジュール構成
//!
//! - `config`: 環境変数からの設定読み込み
//! - `error`: API エラーと HTTP レスポンスへの変換
//! - `handler`: HTTP ハンドラ
//! - `middleware`: 認可・CSRF・cron 認証などのミドルウェア
//! - `session`: セッション Cookie
//! - `usecase`: ビジネスロジック

pub mod config;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod session;
pub mod usecase;
