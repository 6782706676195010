//! WebSocket frame DTOs.
//!
//! Every frame is a JSON object whose `type` field selects the variant.
//! Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

/// Roster entry as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub username: String,
    /// RFC 3339, UTC
    pub connected_at: String,
}

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Join { username: String },
    Message { content: String },
    Ping,
}

impl ClientMessage {
    /// Every `type` value a client may send.
    pub const TYPES: [&'static str; 3] = ["join", "message", "ping"];

    pub fn is_known_type(tag: &str) -> bool {
        Self::TYPES.contains(&tag)
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// First frame on every connection
    Connection { client_id: String },
    /// Sent to a client whose join succeeded
    Joined {
        username: String,
        users: Vec<UserInfo>,
    },
    /// Sent to everyone else when a client joins
    UserJoined {
        username: String,
        message: String,
        timestamp: String,
        users: Vec<UserInfo>,
    },
    /// Sent to everyone else when a named client leaves
    UserLeft {
        username: String,
        message: String,
        timestamp: String,
        users: Vec<UserInfo>,
    },
    /// Chat message fan-out
    Message {
        username: String,
        content: String,
        timestamp: String,
    },
    Error { message: String, timestamp: String },
    Pong { timestamp: String },
}
