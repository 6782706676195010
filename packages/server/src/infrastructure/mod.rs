//! Infrastructure layer: connection state, admission control and wire formats.

pub mod dto;
pub mod rate_limiter;
pub mod registry;
pub mod transport;

pub use rate_limiter::{RateDecision, RateLimitPolicy, RateLimiter};
pub use registry::{BroadcastReport, ConnectionRegistry, ProbeReport, UserSnapshot};
pub use transport::{OutboundFrame, TransportHandle, TransportReceiver};
