//! UseCase layer: routing, ordered delivery and liveness.

mod delivery_queue;
mod liveness;
mod router;

pub use delivery_queue::{DeliveryQueue, OutboundMessage};
pub use liveness::{LivenessConfig, LivenessMonitor};
pub use router::MessageRouter;
