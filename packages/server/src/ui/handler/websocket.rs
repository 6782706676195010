//! WebSocket connection handlers.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use axum::{
    body::Bytes,
    extract::{
        ConnectInfo, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, Stream, StreamExt},
};
use tokio::sync::mpsc;

use crate::{
    domain::ConnectionId,
    infrastructure::{OutboundFrame, TransportHandle, TransportReceiver},
    ui::state::AppState,
    usecase::MessageRouter,
};

/// A stream that only yields errors is treated as dead after this many in a row
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 8;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Some(addr.ip())))
}

/// Spawns a task that turns queued `OutboundFrame`s into WebSocket messages.
///
/// The loop ends when the channel closes (the registry dropped the handle),
/// after a close frame has been written, or when the socket rejects a write.
fn pusher_loop(
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    mut sender: SplitSink<WebSocket, Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let (message, last) = match frame {
                OutboundFrame::Text(text) => (Message::Text(text.into()), false),
                OutboundFrame::Probe => (Message::Ping(Bytes::new()), false),
                OutboundFrame::Close { code, reason } => (
                    Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })),
                    true,
                ),
            };
            if sender.send(message).await.is_err() || last {
                break;
            }
        }
    })
}

/// Hands every inbound frame of one connection to the router, in order.
///
/// A read error is reported but does not end the loop; the stream ending
/// (or a close frame) does.
async fn reader_loop<S>(router: Arc<MessageRouter>, id: ConnectionId, mut receiver: S)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut consecutive_errors = 0;
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => {
                consecutive_errors = 0;
                msg
            }
            Err(e) => {
                router.handle_transport_error(id, &e).await;
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    tracing::warn!("Connection {} keeps failing to read, giving up", id);
                    break;
                }
                continue;
            }
        };

        match msg {
            Message::Text(text) => router.handle_inbound(id, text.as_str()).await,
            Message::Binary(bytes) => {
                router
                    .handle_inbound(id, &String::from_utf8_lossy(&bytes))
                    .await
            }
            Message::Pong(_) => router.registry().mark_alive(id).await,
            Message::Ping(_) => {
                // Answered automatically by the WebSocket protocol
            }
            Message::Close(_) => {
                tracing::info!("Connection {} requested close", id);
                break;
            }
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, remote_address: Option<IpAddr>) {
    let (sender, receiver) = socket.split();
    let (handle, transport) = TransportHandle::channel();
    let TransportReceiver {
        outbound,
        terminate,
    } = transport;

    let id = state.router.handle_connect(handle, remote_address).await;

    // Spawn a task to push queued frames to this client
    let mut send_task = pusher_loop(outbound, sender);

    // Spawn a task to receive frames from this client, one at a time
    let mut recv_task = tokio::spawn(reader_loop(state.router.clone(), id, receiver));

    // If any one of the tasks completes or the connection is terminated, stop both
    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
        _ = terminate.notified() => {
            tracing::debug!("Connection {} terminated", id);
            recv_task.abort();
            send_task.abort();
        }
    };

    state.router.handle_disconnect(id).await;
}
