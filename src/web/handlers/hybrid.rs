//! Hybrid trigger: peer call and publish in one request

use std::sync::Arc;

use axum::extract::{Query, State};

use crate::hybrid::HybridTrigger;
use crate::web::response_types::ApiResult;
use crate::web::state::AppState;

/// GET /hybrid?message=...
pub async fn hybrid(
    State(state): State<Arc<AppState>>,
    Query(trigger): Query<HybridTrigger>,
) -> ApiResult<String> {
    let outcome = state.hybrid.handle(trigger).await?;
    Ok(outcome.into_response_text()?)
}
