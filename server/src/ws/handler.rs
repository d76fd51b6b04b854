use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    response::Response,
};
use serde::Deserialize;
use std::net::SocketAddr;

use crate::auth::middleware::decode_token;
use crate::error::AppError;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for the socket upgrade: `?token=JWT`.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Close code sent when the access token is missing or does not verify.
pub const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?token=JWT
/// The token names the only user this connection may bind with `init-session`.
/// On auth failure the socket is upgraded and immediately closed.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = params
        .token
        .as_deref()
        .ok_or(AppError::Unauthorized)
        .and_then(|token| decode_token(&state.jwt_secret, token));

    match claims {
        Ok(claims) => {
            tracing::info!(peer = %peer, user_id = %claims.sub, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, claims.sub))
        }
        Err(_) => {
            tracing::warn!(peer = %peer, close_code = CLOSE_TOKEN_INVALID, "WebSocket auth failed");
            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: CLOSE_TOKEN_INVALID,
                    reason: "Token invalid".into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}
