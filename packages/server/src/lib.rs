//! Real-time chat server core.
//!
//! Clients connect over WebSocket, claim a unique display name and exchange
//! messages that are broadcast to every participant in a single total order.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;

pub mod config;

#[cfg(test)]
mod test_support;
