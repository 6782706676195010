//! Server execution logic.

use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::{Router, routing::get};
use charla_shared::time::{Clock, SystemClock};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::{
    config::ChatConfig,
    infrastructure::{ConnectionRegistry, RateLimiter},
    usecase::{LivenessMonitor, MessageRouter},
};

use super::{
    handler::{health_check, list_users, websocket_handler},
    signal::shutdown_signal,
    state::AppState,
};

/// Close reason sent to every client on shutdown
pub const SHUTDOWN_REASON: &str = "Server shutting down";

/// WebSocket chat server
///
/// Owns the service objects and wires them to axum.
///
/// # Example
///
/// ```ignore
/// let server = Server::new(ChatConfig::default());
/// server.run().await?;
/// ```
pub struct Server {
    config: ChatConfig,
    clock: Arc<dyn Clock>,
    state: Arc<AppState>,
    rate_limiter: Arc<RateLimiter>,
    monitor: Arc<LivenessMonitor>,
}

impl Server {
    /// Create a new Server instance using the system clock
    ///
    /// Must be called inside a Tokio runtime: the delivery worker is spawned
    /// immediately.
    pub fn new(config: ChatConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a new Server instance with an explicit time source
    pub fn with_clock(config: ChatConfig, clock: Arc<dyn Clock>) -> Self {
        // Initialize dependencies in order:
        // 1. ConnectionRegistry / RateLimiter
        // 2. MessageRouter (spawns the delivery worker)
        // 3. LivenessMonitor
        let registry = Arc::new(ConnectionRegistry::new(clock.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_policy()));
        let router = Arc::new(MessageRouter::new(
            registry.clone(),
            rate_limiter.clone(),
            clock.clone(),
            config.delivery_delay,
        ));
        let monitor = LivenessMonitor::new(registry.clone(), config.liveness());

        Self {
            config,
            clock,
            state: Arc::new(AppState { router, registry }),
            rate_limiter,
            monitor,
        }
    }

    /// Build the axum router with every endpoint
    pub fn app(&self) -> Router {
        Router::new()
            // WebSocket エンドポイント
            .route("/ws", get(websocket_handler))
            // HTTP エンドポイント
            .route("/api/health", get(health_check))
            .route("/api/users", get(list_users))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind to the configured address and serve until Ctrl+C / SIGTERM
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the configured address or
    /// if there's an error during server execution.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(self.config.bind_address()).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// On shutdown the liveness timers stop, every connection is closed with
    /// the normal closure code, and after the grace period the remaining ones
    /// are terminated.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.monitor.start().await;
        let sweeper = self
            .rate_limiter
            .clone()
            .spawn_sweeper(self.clock.clone(), self.config.rate_limit_window);

        let app = self.app();
        let local_addr = listener.local_addr()?;
        tracing::info!("WebSocket chat server listening on {}", local_addr);
        tracing::info!("Connect to: ws://{}/ws", local_addr);
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        let monitor = self.monitor.clone();
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            let forced = monitor.shutdown(SHUTDOWN_REASON).await;
            tracing::info!("All connections closed ({} forced)", forced);
        })
        .await;

        sweeper.abort();
        self.state.router.shutdown();
        result?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}
