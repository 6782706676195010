//! Runtime configuration for the chat server.

use std::time::Duration;

use crate::{infrastructure::RateLimitPolicy, usecase::LivenessConfig};

/// Every tunable of the server in one place.
///
/// The binary fills it from CLI flags; tests build it directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    pub host: String,
    pub port: u16,
    /// Accepted chat messages per identifier and window
    pub rate_limit_max: usize,
    pub rate_limit_window: Duration,
    /// Pause between two queued broadcasts
    pub delivery_delay: Duration,
    pub probe_interval: Duration,
    pub sweep_interval: Duration,
    pub inactivity_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        let liveness = LivenessConfig::default();
        let policy = RateLimitPolicy::default();
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            rate_limit_max: policy.max_requests,
            rate_limit_window: policy.window,
            delivery_delay: Duration::from_millis(100),
            probe_interval: liveness.probe_interval,
            sweep_interval: liveness.sweep_interval,
            inactivity_timeout: liveness.inactivity_timeout,
            shutdown_grace: liveness.shutdown_grace,
        }
    }
}

impl ChatConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            max_requests: self.rate_limit_max,
            window: self.rate_limit_window,
        }
    }

    pub fn liveness(&self) -> LivenessConfig {
        LivenessConfig {
            probe_interval: self.probe_interval,
            sweep_interval: self.sweep_interval,
            inactivity_timeout: self.inactivity_timeout,
            shutdown_grace: self.shutdown_grace,
        }
    }
}
