//! Logging setup utilities for the Charla chat server.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Log target used for chat transcript entries.
///
/// Every broadcast chat message is emitted as an `info` event on this target so
/// transcripts can be routed or filtered independently of operational logs
/// (e.g. `RUST_LOG=conversation=info`).
pub const CONVERSATION_TARGET: &str = "conversation";

/// Crates whose events are enabled by the default filter.
const LIBRARY_TARGETS: [&str; 2] = ["charla_server", "charla_shared"];

/// Build the default `EnvFilter` directive string.
///
/// Enables the library crates, the binary and the conversation target at
/// `default_log_level`, plus `tower_http` for request tracing.
pub fn default_filter(binary_name: &str, default_log_level: &str) -> String {
    let mut directives: Vec<String> = LIBRARY_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, default_log_level))
        .collect();
    directives.push(format!(
        "{}={}",
        binary_name.replace('-', "_"),
        default_log_level
    ));
    directives.push(format!("{}={}", CONVERSATION_TARGET, default_log_level));
    directives.push(format!("tower_http={}", default_log_level));
    directives.join(",")
}

/// Initialize the tracing subscriber with the specified default log level.
///
/// The log level can be overridden using the `RUST_LOG` environment variable.
///
/// # Arguments
///
/// * `binary_name` - The name of the binary (e.g., "charla-server")
/// * `default_log_level` - The default log level (e.g., "debug", "info", "warn", "error")
///
/// # Examples
///
/// ```no_run
/// use charla_shared::logger::setup_logger;
///
/// setup_logger("charla-server", "info");
/// ```
pub fn setup_logger(binary_name: &str, default_log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(binary_name, default_log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
