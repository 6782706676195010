//! Conversion logic between domain values and DTOs.

use crate::infrastructure::{dto::websocket as dto, registry::UserSnapshot};

impl From<UserSnapshot> for dto::UserInfo {
    fn from(snapshot: UserSnapshot) -> Self {
        Self {
            username: snapshot.username.into_string(),
            connected_at: snapshot.connected_at.to_rfc3339(),
        }
    }
}

/// Convert a roster snapshot into its wire form, preserving order.
pub fn to_user_infos(snapshots: Vec<UserSnapshot>) -> Vec<dto::UserInfo> {
    snapshots.into_iter().map(dto::UserInfo::from).collect()
}
