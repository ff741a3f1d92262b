use crate::attendance::session::SharedSession;
use crate::ledger::memory::MemoryLedger;
use crate::network::NetworkMonitor;
use crate::runtime::SensorCommand;
use crate::sensor::feed::DeviceFeed;
use axum::Router;
use axum::routing::{get, post, put};
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod handlers;
pub mod responses;

#[derive(Clone)]
pub struct ApiState {
    pub session: SharedSession<MemoryLedger, NetworkMonitor>,
    pub ledger: Arc<MemoryLedger>,
    pub network: NetworkMonitor,
    pub feed: DeviceFeed,
    pub sensor_commands: mpsc::UnboundedSender<SensorCommand>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/status", get(handlers::get_status))
        .route("/api/check-in", post(handlers::post_check_in))
        .route("/api/check-out", post(handlers::post_check_out))
        .route(
            "/api/location",
            get(handlers::get_location_watch).post(handlers::post_location),
        )
        .route("/api/location/retry", post(handlers::post_location_retry))
        .route("/api/connectivity", put(handlers::put_connectivity))
        .route("/api/history", get(handlers::get_history))
        .route("/api/health", get(handlers::get_health))
        .with_state(state)
}
