//! Fire-and-forget publish of the configured message

use std::sync::Arc;

use axum::extract::State;

use crate::web::response_types::{ApiError, ApiResult};
use crate::web::state::AppState;

/// GET /async
pub async fn publish(State(state): State<Arc<AppState>>) -> ApiResult<&'static str> {
    state
        .publisher
        .publish_text(&state.queue, &state.config.queue.default_message)
        .await
        .map_err(ApiError::PublishFailed)?;

    Ok("Message sent to Service B (Async)")
}
