use crate::{
    error::ApiError,
    prediction::{BatchEntry, PredictionError, PredictionRecord, Upload},
    server::SharedState,
};
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    response::Json,
};
use serde::Serialize;
use std::time::Instant;
use tracing::instrument;

#[derive(Serialize)]
pub struct BatchResponse {
    results: Vec<BatchEntry>,
}

/// Reads parts up to and including the next one named `field`.
async fn next_upload(multipart: &mut Multipart, field: &str) -> Result<Option<Upload>, ApiError> {
    while let Some(part) = multipart.next_field().await? {
        if part.name() != Some(field) {
            continue;
        }
        let file_name = part.file_name().map(str::to_string);
        let content_type = part.content_type().map(str::to_string);
        let data = part.bytes().await?;
        return Ok(Some(Upload {
            file_name,
            content_type,
            data,
        }));
    }
    Ok(None)
}

/// Collects every part named `field`. Fails on the part past `limit`, leaving the
/// rest of the body unread.
pub(super) async fn read_uploads(
    multipart: &mut Multipart,
    field: &str,
    limit: usize,
) -> Result<Vec<Upload>, ApiError> {
    let mut uploads = Vec::new();
    while let Some(upload) = next_upload(multipart, field).await? {
        if uploads.len() == limit {
            return Err(PredictionError::TooManyFiles(limit).into());
        }
        uploads.push(upload);
    }
    Ok(uploads)
}

/// First part named `field`; the rest of the body is left unread.
pub(super) async fn read_single_upload(
    multipart: &mut Multipart,
    field: &'static str,
) -> Result<Upload, ApiError> {
    next_upload(multipart, field)
        .await?
        .ok_or(ApiError::MissingField(field))
}

#[instrument(skip(state, multipart))]
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionRecord>, ApiError> {
    state.metrics.record_request("/predict");
    let upload = read_single_upload(&mut multipart?, "file").await?;

    let start = Instant::now();
    let record = state.prediction_service.predict_image(&upload).await?;
    state
        .metrics
        .record_prediction_duration(start.elapsed().as_millis() as u64, "/predict");
    state.metrics.record_detections(&record.summary);

    tracing::info!(
        "Prediction {} done with {} detections",
        record.prediction_id,
        record.summary.total_detections
    );

    Ok(Json(record))
}

#[instrument(skip(state, multipart))]
pub async fn predict_batch(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<BatchResponse>, ApiError> {
    state.metrics.record_request("/predict-batch");
    let service = &state.prediction_service;
    let uploads = read_uploads(&mut multipart?, "files", service.max_batch_files()).await?;
    if uploads.is_empty() {
        return Err(ApiError::MissingField("files"));
    }

    let start = Instant::now();
    let results = service.predict_batch(&uploads).await?;
    state
        .metrics
        .record_prediction_duration(start.elapsed().as_millis() as u64, "/predict-batch");
    for entry in &results {
        if let BatchEntry::Success { record, .. } = entry {
            state.metrics.record_detections(&record.summary);
        }
    }

    Ok(Json(BatchResponse { results }))
}
