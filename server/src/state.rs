use std::sync::Arc;
use std::time::Duration;

use crate::db::MessageStore;
use crate::media::signing::UrlSigner;
use crate::ws::ConnectionRegistry;

/// WebSocket heartbeat timing.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    /// Interval between server pings.
    pub ping_interval: Duration,
    /// Close the connection if no pong arrives within this window after a ping.
    pub pong_timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Durable conversation/message store
    pub store: Arc<dyn MessageStore>,
    /// Live connections and user presence
    pub connections: ConnectionRegistry,
    /// JWT secret used to resolve session tokens at handshake
    pub jwt_secret: Vec<u8>,
    /// When set, a handshake `userId` without a valid token is treated as unauthenticated
    pub require_token: bool,
    pub heartbeat: Heartbeat,
    /// Signs image keys into time-limited URLs on read paths
    pub media_signer: Option<Arc<UrlSigner>>,
}
