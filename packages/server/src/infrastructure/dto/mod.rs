//! Data Transfer Objects (DTOs) for the chat server.
//!
//! DTOs are organized by protocol:
//! - `websocket`: WebSocket frame DTOs (tagged by `type`)
//! - `http`: HTTP API response DTOs

pub mod conversion;
pub mod http;
pub mod websocket;
