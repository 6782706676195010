//! Sliding-window rate limiter keyed by client identifier.
//!
//! Each identifier owns a queue of admission timestamps that fall inside the
//! trailing window. A check prunes expired timestamps, then either admits the
//! request (recording `now`) or rejects it and reports when the oldest entry
//! will leave the window.
//!
//! All windows share one mutex, so two concurrent checks for the same
//! identifier can never both observe spare capacity and both append.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use charla_shared::time::Clock;
use tokio::{sync::Mutex, task::JoinHandle};

/// Admission policy: at most `max_requests` per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: usize,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_millis(60_000),
        }
    }
}

/// Result of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests still available in the current window
    pub remaining: usize,
    /// Seconds until the next request would be admitted (0 when allowed)
    pub reset_in: u64,
}

pub struct RateLimiter {
    policy: RateLimitPolicy,
    windows: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn window_millis(&self) -> i64 {
        i64::try_from(self.policy.window.as_millis()).unwrap_or(i64::MAX)
    }

    /// Check whether `identifier` may send at `now` (UTC millis) and record
    /// the attempt if so.
    pub async fn check_and_record(&self, identifier: &str, now: i64) -> RateDecision {
        let window = self.window_millis();
        let max = self.policy.max_requests;
        let mut windows = self.windows.lock().await;
        let timestamps = windows.entry(identifier.to_string()).or_default();
        prune(timestamps, now, window);

        if timestamps.len() >= max {
            let reset_in = timestamps
                .front()
                .map(|oldest| ceil_seconds(oldest + window - now))
                .unwrap_or(0);
            if timestamps.is_empty() {
                windows.remove(identifier);
            }
            tracing::debug!(identifier, reset_in, "rate limit exceeded");
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_in,
            };
        }

        timestamps.push_back(now);
        RateDecision {
            allowed: true,
            remaining: max - timestamps.len(),
            reset_in: 0,
        }
    }

    /// Drop identifiers whose window is empty after pruning.
    ///
    /// Returns the number of identifiers removed.
    pub async fn sweep(&self, now: i64) -> usize {
        let window = self.window_millis();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, timestamps| {
            prune(timestamps, now, window);
            !timestamps.is_empty()
        });
        before - windows.len()
    }

    /// Administrative override: forget everything about `identifier`.
    pub async fn reset_identifier(&self, identifier: &str) -> bool {
        self.windows.lock().await.remove(identifier).is_some()
    }

    /// Number of identifiers currently holding a window.
    pub async fn tracked_identifiers(&self) -> usize {
        self.windows.lock().await.len()
    }

    /// Run `sweep` every `interval` until the returned task is aborted.
    ///
    /// A zero interval never sweeps; the returned task finishes immediately.
    pub fn spawn_sweeper(self: Arc<Self>, clock: Arc<dyn Clock>, interval: Duration) -> JoinHandle<()> {
        if interval.is_zero() {
            tracing::error!("Rate limiter sweep interval is zero, sweeper not started");
            return tokio::spawn(async {});
        }
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.sweep(clock.now_millis()).await;
                if removed > 0 {
                    tracing::debug!(removed, "rate limiter sweep");
                }
            }
        })
    }
}

fn prune(timestamps: &mut VecDeque<i64>, now: i64, window: i64) {
    while timestamps.front().is_some_and(|t| now - t >= window) {
        timestamps.pop_front();
    }
}

fn ceil_seconds(millis: i64) -> u64 {
    u64::try_from(millis.max(0)).unwrap_or(0).div_ceil(1000)
}
