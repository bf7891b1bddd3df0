use crate::{error::ApiError, server::SharedState};
use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

#[derive(Serialize, Deserialize)]
pub struct CleanupResponse {
    success: bool,
    message: String,
    removed: usize,
}

#[instrument(skip(state))]
pub async fn cleanup(
    State(state): State<SharedState>,
    Path(prediction_id): Path<String>,
) -> Result<Json<CleanupResponse>, ApiError> {
    state.metrics.record_request("/cleanup");
    let removed = state.prediction_service.cleanup(&prediction_id).await?;

    Ok(Json(CleanupResponse {
        success: true,
        message: format!("Cleaned up files for prediction {}", prediction_id),
        removed,
    }))
}
