//! # Clock（時刻プロバイダ）
//!
//! ユースケース層での `Utc::now()` 直接呼び出しを置き換え、
//! 配信ジョブのバックオフやスケジュール判定をテストで固定時刻にするための抽象化。

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// 現在時刻を提供するトレイト
pub trait Clock: Send + Sync {
   fn now(&self) -> DateTime<Utc>;
}

/// 実際のシステム時刻を返す実装
pub struct SystemClock;

impl Clock for SystemClock {
   fn now(&self) -> DateTime<Utc> {
      Utc::now()
   }
}

/// 固定時刻を返すテスト用実装
///
/// `advance` で時刻を進められる（バッチ間の待機やバックオフ後の再実行の検証用）。
pub struct FixedClock {
   now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
   pub fn new(now: DateTime<Utc>) -> Self {
      Self {
         now: Mutex::new(now),
      }
   }

   /// 時刻を進める
   pub fn advance(&self, by: Duration) {
      if let Ok(mut now) = self.now.lock() {
         *now += by;
      }
   }
}

impl Clock for FixedClock {
   fn now(&self) -> DateTime<Utc> {
      match self.now.lock() {
         Ok(now) => *now,
         Err(poisoned) => *poisoned.into_inner(),
      }
   }
}
