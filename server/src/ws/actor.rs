use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::auth::UserId;
use crate::chat::presence;
use crate::state::{AppState, Heartbeat};
use crate::ws::protocol;
use crate::ws::ConnectionHandle;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Run the actor-per-connection pattern for a WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Ping task: heartbeat, ends when pongs stop arriving
/// - Reader loop: processes incoming client events until the client closes
///   or the ping task ends
///
/// The connection is attached (and, with an identity, registered in presence)
/// before the reader starts, and removed again once it ends.
pub async fn run_connection(socket: WebSocket, state: AppState, user: Option<UserId>) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Start the writer first so the presence snapshot below is flushed.
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let handle = ConnectionHandle::new(tx.clone());
    presence::connection_opened(&state.connections, &handle, user.as_ref());

    tracing::info!(
        user_id = ?user,
        connection_id = %handle.id,
        "WebSocket actor started"
    );

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let mut ping_handle = tokio::spawn(ping_task(tx.clone(), pong_rx, state.heartbeat));

    loop {
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            _ = &mut ping_handle => {
                tracing::info!(connection_id = %handle.id, "Heartbeat expired, dropping connection");
                break;
            }
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(text.as_str(), &state, user.as_ref()).await;
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        connection_id = %handle.id,
                        bytes = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        connection_id = %handle.id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    connection_id = %handle.id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(connection_id = %handle.id, "WebSocket stream ended");
                break;
            }
        }
    }

    ping_handle.abort();

    presence::connection_closed(&state.connections, &handle, user.as_ref());

    // Let the writer flush a pending close frame once the last sender is gone.
    let connection_id = handle.id;
    drop(handle);
    drop(tx);
    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    tracing::info!(
        user_id = ?user,
        connection_id = %connection_id,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            break;
        }
    }
}

/// Ping task: sends periodic pings and queues a 1001 close when a pong does
/// not come back in time. Returning ends the connection.
async fn ping_task(
    tx: mpsc::UnboundedSender<Message>,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    heartbeat: Heartbeat,
) {
    let mut ping_timer = interval(heartbeat.ping_interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // Unsolicited pongs must not answer the next ping.
        while pong_rx.try_recv().is_ok() {}

        if tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            // Writer task has died, connection is gone
            break;
        }

        match timeout(heartbeat.pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!("Pong timeout, closing connection");
                let _ = tx.send(Message::Close(Some(CloseFrame {
                    code: 1001,
                    reason: "Pong timeout".into(),
                })));
                break;
            }
        }
    }
}
