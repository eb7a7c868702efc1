use std::sync::Arc;

use crate::config::WsConfig;
use crate::db::DbPool;
use crate::ws::{DeliveryGateway, HubHandle};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret shared by the REST extractor and the WS handshake
    pub jwt_secret: Vec<u8>,
    /// Live connection registry
    pub hub: HubHandle,
    /// Where handlers send events once their write has committed
    pub gateway: Arc<dyn DeliveryGateway>,
    /// Per-connection limits and timers
    pub ws: WsConfig,
}

impl AppState {
    /// State whose gateway is the hub itself.
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, hub: HubHandle, ws: WsConfig) -> Self {
        Self {
            db,
            jwt_secret,
            gateway: Arc::new(hub.clone()),
            hub,
            ws,
        }
    }
}
