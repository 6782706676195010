//! HTTP API response DTOs.

use serde::{Deserialize, Serialize};

use super::websocket::UserInfo;

/// Response of `GET /api/users`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserListDto {
    pub count: usize,
    pub users: Vec<UserInfo>,
}
