//! Real-time WebSocket chat server.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin charla-server
//! cargo run --bin charla-server -- --host 0.0.0.0 --port 3000
//! CHARLA_RATE_LIMIT_MAX=20 cargo run --bin charla-server
//! ```

use std::time::Duration;

use charla_server::{config::ChatConfig, ui::Server};
use charla_shared::logger::setup_logger;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "charla-server")]
#[command(about = "Real-time WebSocket chat server", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, env = "CHARLA_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, env = "CHARLA_PORT", default_value = "8080")]
    port: u16,

    /// Chat messages accepted per client within one window
    #[arg(
        long,
        env = "CHARLA_RATE_LIMIT_MAX",
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..),
        default_value = "10"
    )]
    rate_limit_max: usize,

    /// Rate limit window in milliseconds
    #[arg(
        long,
        env = "CHARLA_RATE_LIMIT_WINDOW_MS",
        value_parser = clap::value_parser!(u64).range(1..),
        default_value = "60000"
    )]
    rate_limit_window_ms: u64,

    /// Pause between two queued broadcasts in milliseconds
    #[arg(long, env = "CHARLA_DELIVERY_DELAY_MS", default_value = "100")]
    delivery_delay_ms: u64,

    /// Liveness probe interval in seconds
    #[arg(
        long,
        env = "CHARLA_PROBE_INTERVAL_SECS",
        value_parser = clap::value_parser!(u64).range(1..),
        default_value = "30"
    )]
    probe_interval_secs: u64,

    /// Inactivity sweep interval in seconds
    #[arg(
        long,
        env = "CHARLA_SWEEP_INTERVAL_SECS",
        value_parser = clap::value_parser!(u64).range(1..),
        default_value = "300"
    )]
    sweep_interval_secs: u64,

    /// Connections silent for longer than this are dropped (seconds)
    #[arg(
        long,
        env = "CHARLA_INACTIVITY_TIMEOUT_SECS",
        value_parser = clap::value_parser!(u64).range(1..),
        default_value = "300"
    )]
    inactivity_timeout_secs: u64,

    /// Time given to clients to close on shutdown (seconds)
    #[arg(long, env = "CHARLA_SHUTDOWN_GRACE_SECS", default_value = "10")]
    shutdown_grace_secs: u64,

    /// Default log level when RUST_LOG is not set
    #[arg(long, env = "CHARLA_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl From<Args> for ChatConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            rate_limit_max: args.rate_limit_max,
            rate_limit_window: Duration::from_millis(args.rate_limit_window_ms),
            delivery_delay: Duration::from_millis(args.delivery_delay_ms),
            probe_interval: Duration::from_secs(args.probe_interval_secs),
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
            inactivity_timeout: Duration::from_secs(args.inactivity_timeout_secs),
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), &args.log_level);

    let config = ChatConfig::from(args);
    tracing::debug!("Configuration: {:?}", config);

    let server = Server::new(config);
    if let Err(e) = server.run().await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
