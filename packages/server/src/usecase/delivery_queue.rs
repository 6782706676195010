//! UseCase: チャットメッセージの順序付き配信キュー
//!
//! ## 概要
//!
//! 受理されたチャットメッセージは `DeliveryQueue` に積まれ、専用のワーカータスクが
//! 1 件ずつ取り出して全接続にブロードキャストします。
//!
//! - enqueue はどのタスクからでも安全に呼べる（unbounded channel の送信側）
//! - 受信側を所有するのはワーカー 1 つだけなので、同時に 2 つの drain は起きない
//! - 1 件の配信が終わってからキューに次があれば、一定時間待ってから次を配信する
//!
//! これにより、enqueue された順序どおりに全接続へ届くことが保証されます。

use std::{sync::Arc, time::Duration};

use charla_shared::logger::CONVERSATION_TARGET;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    domain::{ChatError, ConnectionId, MessageContent, Timestamp, Username},
    infrastructure::{ConnectionRegistry, dto::websocket::ServerMessage},
};

/// A chat message that passed validation and rate limiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub sender: ConnectionId,
    pub username: Username,
    pub content: MessageContent,
    pub timestamp: Timestamp,
}

/// FIFO delivery queue drained by a single worker task.
pub struct DeliveryQueue {
    sender: mpsc::UnboundedSender<OutboundMessage>,
    worker: JoinHandle<()>,
}

impl DeliveryQueue {
    /// Spawn the worker and return the queue handle.
    ///
    /// # Arguments
    ///
    /// * `registry` - Registry used for the fan-out
    /// * `delay` - Pause between two consecutive deliveries when more are waiting
    pub fn spawn(registry: Arc<ConnectionRegistry>, delay: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(drain(receiver, registry, delay));
        Self { sender, worker }
    }

    /// Append a message to the tail of the queue.
    pub fn enqueue(&self, message: OutboundMessage) -> Result<(), ChatError> {
        self.sender
            .send(message)
            .map_err(|_| ChatError::Internal("delivery worker is not running".to_string()))
    }

    /// Stop the worker. Messages still queued are dropped.
    pub fn shutdown(&self) {
        self.worker.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }
}

async fn drain(
    mut receiver: mpsc::UnboundedReceiver<OutboundMessage>,
    registry: Arc<ConnectionRegistry>,
    delay: Duration,
) {
    while let Some(message) = receiver.recv().await {
        deliver(&registry, message).await;
        if !receiver.is_empty() && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    tracing::debug!("Delivery queue closed");
}

async fn deliver(registry: &ConnectionRegistry, message: OutboundMessage) {
    let frame = ServerMessage::Message {
        username: message.username.as_str().to_string(),
        content: message.content.as_str().to_string(),
        timestamp: message.timestamp.to_rfc3339(),
    };
    let payload = match serde_json::to_string(&frame) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Failed to serialize chat message from '{}': {}", message.username, e);
            return;
        }
    };

    let report = registry.broadcast(&payload, None).await;
    tracing::info!(
        target: CONVERSATION_TARGET,
        username = %message.username,
        content = %message.content.as_str(),
        "chat message"
    );
    tracing::debug!(
        "Broadcasted message from '{}' (succeeded: {}, failed: {})",
        message.username,
        report.succeeded,
        report.failed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{OutboundFrame, TransportHandle, TransportReceiver};
    use charla_shared::time::FixedClock;

    fn create_test_registry() -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::new(Arc::new(FixedClock::new(0))))
    }

    async fn connect(registry: &ConnectionRegistry) -> (ConnectionId, TransportReceiver) {
        let (handle, receiver) = TransportHandle::channel();
        (registry.add(handle, None).await, receiver)
    }

    fn outbound(sender: ConnectionId, username: &str, content: &str) -> OutboundMessage {
        OutboundMessage {
            sender,
            username: Username::new(username).unwrap(),
            content: MessageContent::new(content).unwrap(),
            timestamp: Timestamp::new(0),
        }
    }

    async fn next_content(receiver: &mut TransportReceiver) -> String {
        match receiver.outbound.recv().await {
            Some(OutboundFrame::Text(text)) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                value["content"].as_str().unwrap().to_string()
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_messages_are_broadcast_to_everyone_including_sender() {
        // テスト項目: 配信は送信者を含む全接続に届く
        // given (前提条件):
        let registry = create_test_registry();
        let (alice, mut ra) = connect(&registry).await;
        let (_bob, mut rb) = connect(&registry).await;
        let queue = DeliveryQueue::spawn(registry.clone(), Duration::ZERO);

        // when (操作):
        queue.enqueue(outbound(alice, "Alice", "hola")).unwrap();

        // then (期待する結果):
        assert_eq!(next_content(&mut ra).await, "hola");
        assert_eq!(next_content(&mut rb).await, "hola");
    }

    #[tokio::test]
    async fn test_fifo_order_across_senders() {
        // テスト項目: 複数の送信者からのメッセージが enqueue 順に全員へ届く
        // given (前提条件):
        let registry = create_test_registry();
        let (alice, mut ra) = connect(&registry).await;
        let (bob, mut rb) = connect(&registry).await;
        let queue = DeliveryQueue::spawn(registry.clone(), Duration::from_millis(1));

        // when (操作):
        for i in 0..20 {
            let (sender, name) = if i % 2 == 0 { (alice, "Alice") } else { (bob, "Bob") };
            queue.enqueue(outbound(sender, name, &format!("m{}", i))).unwrap();
        }

        // then (期待する結果):
        for i in 0..20 {
            assert_eq!(next_content(&mut ra).await, format!("m{}", i));
            assert_eq!(next_content(&mut rb).await, format!("m{}", i));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_only_between_queued_messages() {
        // テスト項目: キューに次のメッセージがあるときだけ配信間に待機が入る
        // given (前提条件):
        let registry = create_test_registry();
        let (alice, mut ra) = connect(&registry).await;
        let queue = DeliveryQueue::spawn(registry.clone(), Duration::from_millis(500));

        // when (操作):
        let start = tokio::time::Instant::now();
        queue.enqueue(outbound(alice, "Alice", "uno")).unwrap();
        queue.enqueue(outbound(alice, "Alice", "dos")).unwrap();
        let first = next_content(&mut ra).await;
        let first_at = start.elapsed();
        let second = next_content(&mut ra).await;
        let second_at = start.elapsed();

        // then (期待する結果):
        assert_eq!(first, "uno");
        assert_eq!(second, "dos");
        assert!(first_at < Duration::from_millis(500));
        assert!(second_at >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_failed_recipient_does_not_block_others() {
        // テスト項目: 一部の接続への送信失敗が他の接続への配信を妨げない
        // given (前提条件):
        let registry = create_test_registry();
        let (alice, mut ra) = connect(&registry).await;
        let (_dead, rd) = connect(&registry).await;
        drop(rd);
        let queue = DeliveryQueue::spawn(registry.clone(), Duration::ZERO);

        // when (操作):
        queue.enqueue(outbound(alice, "Alice", "uno")).unwrap();
        queue.enqueue(outbound(alice, "Alice", "dos")).unwrap();

        // then (期待する結果):
        assert_eq!(next_content(&mut ra).await, "uno");
        assert_eq!(next_content(&mut ra).await, "dos");
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_fails() {
        // テスト項目: ワーカー停止後の enqueue は内部エラーになる
        // given (前提条件):
        let registry = create_test_registry();
        let (alice, _ra) = connect(&registry).await;
        let queue = DeliveryQueue::spawn(registry.clone(), Duration::ZERO);

        // when (操作):
        queue.shutdown();
        while queue.is_running() {
            tokio::task::yield_now().await;
        }
        let result = queue.enqueue(outbound(alice, "Alice", "hola"));

        // then (期待する結果):
        assert!(matches!(result, Err(ChatError::Internal(_))));
        assert!(!queue.is_running());
    }
}
