use axum::{
    extract::State,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::auth::middleware::JwtSecret;
use crate::chat::{conversations, messages};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WsStats {
    connected_clients: usize,
}

/// GET /api/ws/stats — Number of live WebSocket connections.
async fn ws_stats(State(state): State<AppState>) -> Json<WsStats> {
    Json(WsStats {
        connected_clients: state.hub.connected_count(),
    })
}

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    State(state): State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/ws/stats", get(ws_stats))
        // WebSocket authenticates through its ?token= query parameter
        .route("/ws", get(ws_handler::ws_upgrade));

    // Authenticated routes (JWT required — Claims extractor validates token)
    let authenticated_routes = Router::new()
        .route(
            "/api/chats",
            get(conversations::list_chats).post(conversations::create_chat),
        )
        .route("/api/chats/{id}", get(conversations::get_chat))
        .route("/api/chats/{id}/messages", get(messages::get_messages))
        .route("/api/messages", post(messages::send_message))
        .route("/api/messages/{id}/read", post(messages::mark_as_read));

    Router::new()
        .merge(public_routes)
        .merge(authenticated_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
