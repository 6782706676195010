//! HTTP API endpoint handlers.

use std::sync::Arc;

use axum::{Json, extract::State};

use crate::{
    infrastructure::dto::{conversion::to_user_infos, http::UserListDto},
    ui::state::AppState,
};

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Current roster of joined users
pub async fn list_users(State(state): State<Arc<AppState>>) -> Json<UserListDto> {
    // Domain Model から DTO への変換
    let users = to_user_infos(state.registry.list_active_users().await);
    Json(UserListDto {
        count: users.len(),
        users,
    })
}
