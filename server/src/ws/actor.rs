use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::state::AppState;
use crate::ws::relay;

/// Ping interval: server sends a WebSocket ping every 25 seconds.
const PING_INTERVAL: Duration = Duration::from_secs(25);

/// Run the actor-per-connection pattern for one socket.
///
/// The connection starts unbound; `init-session` binds it to `user_id`, the
/// user its access token verified.
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: decodes text frames and hands them to the relay
///
/// The dispatcher reaches this client by cloning the registered sender.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let conn = state.sessions.connect(tx.clone(), user_id.as_str());
    tracing::info!(conn = %conn, user_id = %user_id, "WebSocket actor started");

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let pong_timeout = state.ping_timeout;
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died, connection is gone
                break;
            }

            match timeout(pong_timeout, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(conn = %conn, "Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket messages
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    if let ControlFlow::Break(()) =
                        relay::handle_text_message(&state, conn, text.as_str()).await
                    {
                        tracing::info!(conn = %conn, "Client requested disconnect");
                        break;
                    }
                }
                Message::Binary(_) => {
                    tracing::debug!(conn = %conn, "Ignoring binary frame");
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(conn = %conn, reason = ?frame, "Client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(conn = %conn, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                tracing::info!(conn = %conn, "WebSocket stream ended");
                break;
            }
        }
    }

    writer_handle.abort();
    ping_handle.abort();

    let bound = state.sessions.leave(conn);
    tracing::info!(
        conn = %conn,
        user_id = %user_id,
        was_bound = bound.is_some(),
        remaining = state.sessions.connections_for_user(&user_id),
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
