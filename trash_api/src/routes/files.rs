use crate::{error::ApiError, server::SharedState, store::Bucket};
use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};

fn content_type(file_name: &str) -> &'static str {
    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("gif") => "image/gif",
        Some("mp4") => "video/mp4",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

async fn serve(state: &SharedState, bucket: Bucket, file_name: &str) -> Result<Response, ApiError> {
    let data = state
        .prediction_service
        .store()
        .read(bucket, file_name)
        .await?;
    Ok(([(header::CONTENT_TYPE, content_type(file_name))], data).into_response())
}

pub async fn uploaded_file(
    State(state): State<SharedState>,
    Path(file): Path<String>,
) -> Result<Response, ApiError> {
    serve(&state, Bucket::Uploads, &file).await
}

pub async fn result_file(
    State(state): State<SharedState>,
    Path(file): Path<String>,
) -> Result<Response, ApiError> {
    serve(&state, Bucket::Results, &file).await
}

pub async fn video_file(
    State(state): State<SharedState>,
    Path(file): Path<String>,
) -> Result<Response, ApiError> {
    serve(&state, Bucket::Videos, &file).await
}
