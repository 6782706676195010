//! Per-connection transport handle.
//!
//! The UI layer owns the actual socket. The registry only holds a
//! `TransportHandle`: an unbounded sender of outbound frames plus a
//! termination signal. The socket's writer loop owns the matching
//! `TransportReceiver` and turns frames into WebSocket messages.
//!
//! Dropping the handle closes the outbound channel, which ends the writer loop
//! and therefore the socket.

use std::sync::Arc;

use tokio::sync::{Notify, mpsc};

/// WebSocket close code for a normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// A frame queued for delivery to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Serialized JSON payload
    Text(String),
    /// Protocol-level liveness probe (WebSocket ping)
    Probe,
    /// Close handshake with the given code and reason
    Close { code: u16, reason: String },
}

/// Sending half held by the registry entry.
#[derive(Debug)]
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    terminate: Arc<Notify>,
}

/// Receiving half held by the socket's writer loop.
#[derive(Debug)]
pub struct TransportReceiver {
    pub outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    pub terminate: Arc<Notify>,
}

impl TransportHandle {
    /// Create a connected handle/receiver pair.
    pub fn channel() -> (Self, TransportReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let terminate = Arc::new(Notify::new());
        (
            Self {
                outbound: tx,
                terminate: terminate.clone(),
            },
            TransportReceiver {
                outbound: rx,
                terminate,
            },
        )
    }

    /// Whether the writer side is still consuming frames.
    pub fn is_writable(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Queue a text payload. Returns `false` if the writer has gone away.
    pub fn send_text(&self, payload: &str) -> bool {
        self.outbound
            .send(OutboundFrame::Text(payload.to_string()))
            .is_ok()
    }

    /// Queue a liveness probe.
    pub fn send_probe(&self) -> bool {
        self.outbound.send(OutboundFrame::Probe).is_ok()
    }

    /// Queue a close handshake.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.outbound
            .send(OutboundFrame::Close {
                code,
                reason: reason.to_string(),
            })
            .is_ok()
    }

    /// Force the socket down without a close handshake.
    ///
    /// The permit is stored if the transport is not waiting yet, so a
    /// termination requested early is never lost.
    pub fn terminate(&self) {
        self.terminate.notify_one();
    }
}

impl TransportReceiver {
    /// Wait until `TransportHandle::terminate` is called.
    pub async fn terminated(&self) {
        self.terminate.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_send_text_reaches_receiver() {
        // テスト項目: send_text で送ったフレームが受信側に届く
        // given (前提条件):
        let (handle, mut receiver) = TransportHandle::channel();

        // when (操作):
        let sent = handle.send_text("hola");

        // then (期待する結果):
        assert!(sent);
        assert_eq!(
            receiver.outbound.recv().await,
            Some(OutboundFrame::Text("hola".to_string()))
        );
    }

    #[tokio::test]
    async fn test_handle_not_writable_after_receiver_dropped() {
        // テスト項目: 受信側が破棄されると送信は失敗し書き込み不可になる
        // given (前提条件):
        let (handle, receiver) = TransportHandle::channel();

        // when (操作):
        drop(receiver);

        // then (期待する結果):
        assert!(!handle.is_writable());
        assert!(!handle.send_text("hola"));
        assert!(!handle.send_probe());
    }

    #[tokio::test]
    async fn test_dropping_handle_ends_receiver() {
        // テスト項目: ハンドルを破棄すると受信側のストリームが終了する
        // given (前提条件):
        let (handle, mut receiver) = TransportHandle::channel();

        // when (操作):
        drop(handle);

        // then (期待する結果):
        assert_eq!(receiver.outbound.recv().await, None);
    }

    #[tokio::test]
    async fn test_terminate_before_wait_is_not_lost() {
        // テスト項目: 待機前に terminate を呼んでも通知は失われない
        // given (前提条件):
        let (handle, receiver) = TransportHandle::channel();

        // when (操作):
        handle.terminate();
        let result = tokio::time::timeout(Duration::from_secs(1), receiver.terminated()).await;

        // then (期待する結果):
        assert!(result.is_ok());
    }
}
