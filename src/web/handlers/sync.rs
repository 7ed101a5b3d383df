//! Synchronous relay: calls the peer and relays its body

use std::sync::Arc;

use axum::extract::State;

use crate::web::response_types::{ApiError, ApiResult};
use crate::web::state::AppState;

/// GET /sync
pub async fn relay(State(state): State<Arc<AppState>>) -> ApiResult<String> {
    let body = state
        .caller
        .call_peer(&state.config.peer)
        .await
        .into_result()
        .map_err(ApiError::SyncFailed)?;

    Ok(format!("Service A (Sync) received: {body}"))
}
