//! Shared helpers for unit tests.

use charla_shared::time::Clock;

mockall::mock! {
    pub TestClock {}

    impl Clock for TestClock {
        fn now_millis(&self) -> i64;
    }
}
