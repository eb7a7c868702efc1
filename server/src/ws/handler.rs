use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::state::AppState;
use crate::ws::connection;

/// Query parameters for WebSocket connection.
/// Browsers cannot set headers on an upgrade, so the JWT rides in ?token=.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token invalid
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. A request without a token is refused before
/// the upgrade; a bad token is upgraded and then closed with a code the
/// client can act on.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = match params.token.as_deref() {
        Some(token) if !token.is_empty() => token,
        _ => return (StatusCode::UNAUTHORIZED, "Token required").into_response(),
    };

    let ws = ws
        .max_message_size(state.ws.max_frame_bytes)
        .max_frame_size(state.ws.max_frame_bytes);

    match jwt::validate_access_token(&state.jwt_secret, token) {
        Ok(claims) => {
            tracing::info!(user_id = %claims.user_id, "WebSocket connection authenticated");
            let hub = state.hub.clone();
            let settings = state.ws.clone();
            ws.on_upgrade(move |socket| {
                connection::run_connection(socket, hub, settings, claims.user_id)
            })
        }
        Err(err) => {
            let (close_code, reason) = match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    (CLOSE_TOKEN_EXPIRED, "Token expired")
                }
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };

            tracing::warn!(
                close_code = close_code,
                reason = reason,
                "WebSocket auth failed"
            );

            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}
