//! UseCase: 受信フレームのルーティング
//!
//! ## 責務
//!
//! - 受信した JSON フレームのパースと検証
//! - `join` / `message` / `ping` のディスパッチ
//! - 名前の一意性チェック、レート制限、HTML エスケープ
//! - 参加・退出イベントのブロードキャスト
//!
//! 接続ごとの状態は `ConnectionRegistry` の名前の有無で表されます：
//! Anonymous →（join 成功）→ Named →（切断）→ 終了
//!
//! クライアント起因のエラーは送信元の接続にだけ `error` フレームとして返し、
//! 他の接続やプロセスには影響させません。

use std::{fmt::Display, net::IpAddr, sync::Arc, time::Duration};

use charla_shared::time::Clock;
use serde_json::Value;

use crate::{
    domain::{ChatError, ConnectionId, MessageContent, Timestamp, Username, ValidationIssue},
    infrastructure::{
        ConnectionRegistry, RateLimiter, TransportHandle,
        dto::{
            conversion::to_user_infos,
            websocket::{ClientMessage, ServerMessage},
        },
    },
};

use super::delivery_queue::{DeliveryQueue, OutboundMessage};

/// Routes inbound frames to the registry, the rate limiter and the delivery queue.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    rate_limiter: Arc<RateLimiter>,
    queue: DeliveryQueue,
    clock: Arc<dyn Clock>,
}

impl MessageRouter {
    /// Create a router and spawn its delivery worker.
    ///
    /// # Arguments
    ///
    /// * `registry` - Shared connection registry
    /// * `rate_limiter` - Admission control for chat messages
    /// * `clock` - Time source for timestamps and rate limiting
    /// * `delivery_delay` - Pause between consecutive queued broadcasts
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rate_limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        delivery_delay: Duration,
    ) -> Self {
        let queue = DeliveryQueue::spawn(registry.clone(), delivery_delay);
        Self {
            registry,
            rate_limiter,
            queue,
            clock,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    /// Register an accepted transport and greet it with its `clientId`.
    pub async fn handle_connect(
        &self,
        handle: TransportHandle,
        remote_address: Option<IpAddr>,
    ) -> ConnectionId {
        let id = self.registry.add(handle, remote_address).await;
        let greeting = ServerMessage::Connection {
            client_id: id.to_string(),
        };
        if let Err(e) = self.reply(id, &greeting).await {
            tracing::warn!("Failed to greet connection {}: {}", id, e);
        }
        tracing::info!(
            "Connection {} accepted from {}",
            id,
            remote_address.map_or_else(|| "unknown".to_string(), |ip| ip.to_string())
        );
        id
    }

    /// Entry point for every inbound text frame.
    ///
    /// Never fails: errors are reported to the sender and logged.
    pub async fn handle_inbound(&self, id: ConnectionId, raw: &str) {
        if let Err(err) = self.dispatch(id, raw).await {
            self.report_error(id, &err).await;
        }
    }

    async fn dispatch(&self, id: ConnectionId, raw: &str) -> Result<(), ChatError> {
        let value: Value = serde_json::from_str(raw).map_err(|_| ChatError::Parse)?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ChatError::Validation(ValidationIssue::MissingType))?
            .to_string();

        self.registry.touch(id).await;

        if !ClientMessage::is_known_type(&tag) {
            return Err(ChatError::UnsupportedType(tag));
        }
        let message: ClientMessage = serde_json::from_value(value)
            .map_err(|_| ChatError::Validation(ValidationIssue::InvalidFields))?;

        match message {
            ClientMessage::Join { username } => self.handle_join(id, &username).await,
            ClientMessage::Message { content } => self.handle_chat_message(id, &content).await,
            ClientMessage::Ping => self.handle_ping(id).await,
        }
    }

    /// Claim a display name (Anonymous → Named).
    pub async fn handle_join(&self, id: ConnectionId, raw_name: &str) -> Result<(), ChatError> {
        if self.registry.name_of(id).await.is_some() {
            return Err(ChatError::AlreadyJoined);
        }
        let username = Username::new(raw_name)?;
        if self.registry.is_name_taken(username.as_str()).await {
            return Err(ChatError::UsernameTaken);
        }
        self.registry.set_name(id, username.clone()).await?;

        let users = to_user_infos(self.registry.list_active_users().await);
        let joined = ServerMessage::Joined {
            username: username.as_str().to_string(),
            users: users.clone(),
        };
        self.reply(id, &joined).await?;

        let announcement = ServerMessage::UserJoined {
            username: username.as_str().to_string(),
            message: format!("{} se ha unido al chat", username),
            timestamp: self.now().to_rfc3339(),
            users,
        };
        let report = self
            .registry
            .broadcast(&encode(&announcement)?, Some(id))
            .await;
        tracing::info!(
            "Connection {} joined as '{}' (notified: {}, failed: {})",
            id,
            username,
            report.succeeded,
            report.failed
        );
        Ok(())
    }

    /// Validate, rate-limit and enqueue a chat message.
    pub async fn handle_chat_message(&self, id: ConnectionId, raw: &str) -> Result<(), ChatError> {
        let username = self.registry.name_of(id).await.ok_or(ChatError::NotJoined)?;
        let content = MessageContent::new(raw)?;

        let now = self.now();
        let identifier = self.rate_limit_identifier(id).await;
        let decision = self
            .rate_limiter
            .check_and_record(&identifier, now.value())
            .await;
        if !decision.allowed {
            tracing::warn!(
                "Rate limit exceeded for '{}' ({}), retry in {}s",
                username,
                identifier,
                decision.reset_in
            );
            return Err(ChatError::RateLimitExceeded {
                reset_in: decision.reset_in,
            });
        }

        self.queue.enqueue(OutboundMessage {
            sender: id,
            username,
            content,
            timestamp: now,
        })
    }

    /// Immediate `pong`; bypasses rate limiting and the queue.
    pub async fn handle_ping(&self, id: ConnectionId) -> Result<(), ChatError> {
        let pong = ServerMessage::Pong {
            timestamp: self.now().to_rfc3339(),
        };
        self.reply(id, &pong).await
    }

    /// Called by the transport once the connection is gone. Idempotent.
    pub async fn handle_disconnect(&self, id: ConnectionId) {
        let Some(departed) = self.registry.remove(id).await else {
            return;
        };
        let Some(username) = departed.username else {
            tracing::info!("Anonymous connection {} closed", id);
            return;
        };

        let farewell = ServerMessage::UserLeft {
            username: username.as_str().to_string(),
            message: format!("{} ha salido del chat", username),
            timestamp: self.now().to_rfc3339(),
            users: to_user_infos(self.registry.list_active_users().await),
        };
        match encode(&farewell) {
            Ok(payload) => {
                let report = self.registry.broadcast(&payload, Some(id)).await;
                tracing::info!(
                    "'{}' left (connection {}, notified: {})",
                    username,
                    id,
                    report.succeeded
                );
            }
            Err(e) => tracing::error!("Failed to announce departure of '{}': {:?}", username, e),
        }
    }

    /// Called by the transport when reading from the socket fails.
    ///
    /// Does not close the connection; the transport's close path does that.
    pub async fn handle_transport_error(&self, id: ConnectionId, err: &(dyn Display + Sync)) {
        tracing::error!("Transport error on connection {}: {}", id, err);
        if self.registry.contains(id).await {
            let generic = ChatError::Internal(err.to_string());
            if let Err(e) = self.send_error(id, &generic).await {
                tracing::debug!("Could not report transport error to {}: {:?}", id, e);
            }
        }
    }

    /// Stop the delivery worker. Undelivered messages are dropped.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    async fn rate_limit_identifier(&self, id: ConnectionId) -> String {
        match self.registry.remote_address_of(id).await {
            Some(ip) => ip.to_string(),
            None => format!("conn:{}", id),
        }
    }

    async fn report_error(&self, id: ConnectionId, err: &ChatError) {
        if err.is_client_error() {
            tracing::debug!("Rejected frame from {} ({}): {}", id, err.kind(), err);
        } else {
            tracing::error!("Internal error while handling frame from {}: {:?}", id, err);
        }
        if let Err(e) = self.send_error(id, err).await {
            tracing::error!("Failed to send error reply to {}: {:?}", id, e);
        }
    }

    async fn send_error(&self, id: ConnectionId, err: &ChatError) -> Result<(), ChatError> {
        let frame = ServerMessage::Error {
            message: err.to_string(),
            timestamp: self.now().to_rfc3339(),
        };
        self.reply(id, &frame).await
    }

    async fn reply(&self, id: ConnectionId, frame: &ServerMessage) -> Result<(), ChatError> {
        let payload = encode(frame)?;
        if !self.registry.send_to(id, &payload).await {
            tracing::debug!("Connection {} is not writable, reply dropped", id);
        }
        Ok(())
    }
}

fn encode(frame: &ServerMessage) -> Result<String, ChatError> {
    serde_json::to_string(frame).map_err(|e| ChatError::Internal(e.to_string()))
}
