//! # セッション Cookie
//!
//! セッション ID を運ぶ Cookie の組み立てと、認可ミドルウェアがリクエストに
//! 載せる認証済みセッション。

use axum_extra::extract::{
   CookieJar,
   cookie::{Cookie, SameSite},
};
use kokyaku_infra::{SessionData, session::SESSION_TTL_SECONDS};

/// Cookie 名
pub const SESSION_COOKIE_NAME: &str = "session_id";

/// 認証済みセッション
///
/// 認可ミドルウェアがリクエスト拡張に格納し、ハンドラは
/// `Extension<CurrentSession>` で受け取る。
#[derive(Debug, Clone)]
pub struct CurrentSession {
   pub session_id: String,
   pub data:       SessionData,
}

/// Cookie からセッション ID を取り出す
pub fn session_id_from(jar: &CookieJar) -> Option<String> {
   jar.get(SESSION_COOKIE_NAME)
      .map(|cookie| cookie.value().to_string())
      .filter(|id| !id.is_empty())
}

/// セッション Cookie を構築する
pub fn build_session_cookie(session_id: &str, secure: bool) -> Cookie<'static> {
   Cookie::build((SESSION_COOKIE_NAME, session_id.to_string()))
      .path("/")
      .max_age(time::Duration::seconds(SESSION_TTL_SECONDS as i64))
      .http_only(true)
      .same_site(SameSite::Lax)
      .secure(secure)
      .build()
}

/// Cookie をクリアするための Cookie を構築する
pub fn build_clear_cookie(secure: bool) -> Cookie<'static> {
   Cookie::build((SESSION_COOKIE_NAME, ""))
      .path("/")
      .max_age(time::Duration::seconds(0))
      .http_only(true)
      .same_site(SameSite::Lax)
      .secure(secure)
      .build()
}
