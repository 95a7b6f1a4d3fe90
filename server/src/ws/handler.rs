use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::Response,
};
use serde::Deserialize;

use crate::auth::{jwt, UserId};
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
#[derive(Debug, Default, Deserialize)]
pub struct WsConnectQuery {
    /// Caller-asserted user id. `"undefined"` is sent by clients with no user.
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    /// Session token; when valid it takes precedence over `userId`.
    pub token: Option<String>,
}

/// GET /ws?userId=ID or /ws?token=JWT
/// WebSocket upgrade endpoint. Connections without a resolvable identity are
/// still accepted: they receive broadcasts but never appear in presence.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let user = resolve_connection_identity(&state, &params);

    match &user {
        Some(user) => tracing::info!(user_id = %user, "WebSocket connection identified"),
        None => tracing::debug!("Unauthenticated WebSocket connection"),
    }

    ws.on_upgrade(move |socket| actor::run_connection(socket, state, user))
}

/// Work out who is connecting.
///
/// - a `token` that verifies wins
/// - a `token` that fails makes the connection unauthenticated
/// - otherwise `userId`, unless `require_token` is set
pub fn resolve_connection_identity(state: &AppState, params: &WsConnectQuery) -> Option<UserId> {
    if let Some(token) = params.token.as_deref().filter(|t| !t.is_empty()) {
        return match jwt::resolve_identity(&state.jwt_secret, token) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket session token rejected");
                None
            }
        };
    }

    if state.require_token {
        return None;
    }

    UserId::from_handshake(params.user_id.as_deref())
}
