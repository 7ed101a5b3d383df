//! Route definitions, grouped by the service that exposes them

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::config::ServiceKind;
use crate::web::{handlers, state::AppState};

/// Liveness check, exposed by every HTTP service
pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(handlers::health::health_check))
}

/// Synchronous relay service
pub fn sync_routes() -> Router<Arc<AppState>> {
    Router::new().route("/sync", get(handlers::sync::relay))
}

/// Peer answering synchronous calls
pub fn peer_routes() -> Router<Arc<AppState>> {
    Router::new().route("/data", get(handlers::peer::data))
}

/// Fire-and-forget publisher service
pub fn async_routes() -> Router<Arc<AppState>> {
    Router::new().route("/async", get(handlers::publish::publish))
}

/// Hybrid service
pub fn hybrid_routes() -> Router<Arc<AppState>> {
    Router::new().route("/hybrid", get(handlers::hybrid::hybrid))
}

/// Trigger routes of one service kind
pub fn service_routes(kind: ServiceKind) -> Router<Arc<AppState>> {
    match kind {
        ServiceKind::Sync => sync_routes(),
        ServiceKind::Peer => peer_routes(),
        ServiceKind::Async => async_routes(),
        ServiceKind::Hybrid => hybrid_routes(),
        ServiceKind::Consumer => Router::new(),
    }
}
