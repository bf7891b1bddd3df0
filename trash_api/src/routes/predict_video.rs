use super::predict::read_single_upload;
use crate::{error::ApiError, server::SharedState, video::VideoRecord};
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    response::Json,
};
use std::time::Instant;
use trash_prediction::Summary;
use tracing::instrument;

#[instrument(skip(state, multipart))]
pub async fn predict_video(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<VideoRecord>, ApiError> {
    state.metrics.record_request("/predict-video");
    let upload = read_single_upload(&mut multipart?, "file").await?;

    let start = Instant::now();
    let record = state.prediction_service.predict_video(&upload).await?;
    state
        .metrics
        .record_prediction_duration(start.elapsed().as_millis() as u64, "/predict-video");
    state.metrics.record_detections(&Summary {
        total_detections: record.total_detections,
        class_counts: record.class_counts.clone(),
    });

    Ok(Json(record))
}
