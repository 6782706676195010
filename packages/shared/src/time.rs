//! Time-related utilities with clock abstraction for testability.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

/// Clock trait for dependency injection and testing
pub trait Clock: Send + Sync {
    /// Get current Unix timestamp in UTC (milliseconds)
    fn now_millis(&self) -> i64;
}

/// System clock implementation (uses actual system time)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        get_utc_timestamp()
    }
}

/// Fixed clock implementation for testing (returns a fixed time)
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    fixed_time: i64,
}

impl FixedClock {
    /// Create a new fixed clock with the given timestamp
    pub fn new(fixed_time_millis: i64) -> Self {
        Self {
            fixed_time: fixed_time_millis,
        }
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.fixed_time
    }
}

/// Manually driven clock for testing time windows.
///
/// Starts at the given timestamp and only moves when `advance` or `set` is called.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a new manual clock starting at the given timestamp
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    /// Move the clock forward by `by`
    pub fn advance(&self, by: Duration) {
        let millis = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute timestamp
    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Get current Unix timestamp in UTC (milliseconds)
pub fn get_utc_timestamp() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert Unix timestamp (milliseconds) to an RFC 3339 string in UTC.
///
/// Out-of-range timestamps render as the Unix epoch.
pub fn timestamp_to_rfc3339(timestamp_millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_millis)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_returns_non_zero_timestamp() {
        // テスト項目: SystemClock が 0 以外のタイムスタンプを返す
        // given (前提条件):
        let clock = SystemClock;

        // when (操作):
        let timestamp = clock.now_millis();

        // then (期待する結果):
        assert!(timestamp > 0);
    }

    #[test]
    fn test_system_clock_returns_increasing_timestamps() {
        // テスト項目: SystemClock が呼び出すたびに増加するタイムスタンプを返す
        // given (前提条件):
        let clock = SystemClock;

        // when (操作):
        let timestamp1 = clock.now_millis();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let timestamp2 = clock.now_millis();

        // then (期待する結果):
        assert!(timestamp2 >= timestamp1);
    }

    #[test]
    fn test_fixed_clock_returns_fixed_timestamp() {
        // テスト項目: FixedClock が固定されたタイムスタンプを返す
        // given (前提条件):
        let fixed_time = 1234567890123;
        let clock = FixedClock::new(fixed_time);

        // when (操作):
        let timestamp1 = clock.now_millis();
        let timestamp2 = clock.now_millis();

        // then (期待する結果):
        assert_eq!(timestamp1, fixed_time);
        assert_eq!(timestamp2, fixed_time);
    }

    #[test]
    fn test_manual_clock_advances_only_when_told() {
        // テスト項目: ManualClock は advance / set を呼んだときだけ進む
        // given (前提条件):
        let clock = ManualClock::new(1_000);

        // when (操作):
        let before = clock.now_millis();
        clock.advance(Duration::from_millis(250));
        let advanced = clock.now_millis();
        clock.set(10_000);
        let jumped = clock.now_millis();

        // then (期待する結果):
        assert_eq!(before, 1_000);
        assert_eq!(advanced, 1_250);
        assert_eq!(jumped, 10_000);
    }

    #[test]
    fn test_timestamp_to_rfc3339_format() {
        // テスト項目: タイムスタンプが UTC の RFC 3339 形式に変換される
        // given (前提条件):
        // 2023-01-01 00:00:00.123 UTC in milliseconds
        let timestamp = 1672531200123;

        // when (操作):
        let result = timestamp_to_rfc3339(timestamp);

        // then (期待する結果):
        assert_eq!(result, "2023-01-01T00:00:00.123Z");
    }

    #[test]
    fn test_get_utc_timestamp_returns_positive_value() {
        // テスト項目: get_utc_timestamp が正の値を返す
        // given (前提条件):

        // when (操作):
        let timestamp = get_utc_timestamp();

        // then (期待する結果):
        assert!(timestamp > 0);
    }
}
