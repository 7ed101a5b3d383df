//! # Web Layer
//!
//! Thin axum surface over the core components: one trigger route per service
//! kind plus `/health`, plain-text bodies, HTTP tracing and a per-request
//! timeout.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub mod handlers;
pub mod response_types;
pub mod routes;
pub mod server;
pub mod state;

pub use response_types::{ApiError, ApiResult};
pub use server::{serve, shutdown_signal};
pub use state::AppState;

/// Create the web application for the configured service kind
pub fn create_app(state: Arc<AppState>) -> Router {
    let kind = state.config.service.kind;

    let common_middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            state.config.web.request_timeout(),
        ));

    let app = Router::new()
        .merge(routes::health_routes())
        .merge(routes::service_routes(kind))
        .layer(common_middleware)
        .with_state(state);

    info!(service = %kind, "Web application created");
    app
}
