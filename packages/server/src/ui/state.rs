//! Server state shared by every handler.

use std::sync::Arc;

use crate::{infrastructure::ConnectionRegistry, usecase::MessageRouter};

/// Shared application state
pub struct AppState {
    /// MessageRouter（受信フレームの処理）
    pub router: Arc<MessageRouter>,
    /// ConnectionRegistry（HTTP API から名簿を参照するため）
    pub registry: Arc<ConnectionRegistry>,
}
