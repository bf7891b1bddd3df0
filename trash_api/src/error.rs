use crate::{prediction::PredictionError, store::StoreError, video::VideoError};
use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

const INTERNAL_DETAIL: &str = "Internal server error";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Prediction(#[from] PredictionError),
    #[error(transparent)]
    Video(#[from] VideoError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Invalid multipart body: {}", .0.body_text())]
    Multipart(#[from] MultipartError),
    #[error("Invalid multipart request: {}", .0.body_text())]
    MultipartRejection(#[from] MultipartRejection),
    #[error("Missing multipart field `{0}`")]
    MissingField(&'static str),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    detail: String,
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::InvalidId(_) | StoreError::InvalidFileName(_) => StatusCode::BAD_REQUEST,
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn prediction_status(err: &PredictionError) -> StatusCode {
    match err {
        PredictionError::NotAnImage
        | PredictionError::InvalidImage(_)
        | PredictionError::TooManyFiles(_) => StatusCode::BAD_REQUEST,
        PredictionError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        PredictionError::Store(e) => store_status(e),
        PredictionError::Inference(_)
        | PredictionError::Annotate(_)
        | PredictionError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Prediction(e) => prediction_status(e),
            ApiError::Video(e) => match e {
                VideoError::Unsupported => StatusCode::NOT_IMPLEMENTED,
                VideoError::NotAVideo | VideoError::Unreadable(_) => StatusCode::BAD_REQUEST,
                VideoError::Prediction(e) => prediction_status(e),
                VideoError::Store(e) => store_status(e),
                VideoError::Processing(_) | VideoError::Task(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Store(e) => store_status(e),
            ApiError::Multipart(e) => e.status(),
            ApiError::MultipartRejection(e) => e.status(),
            ApiError::MissingField(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Client-facing message. Server-side causes stay in the logs.
    fn detail(&self, status: StatusCode) -> String {
        let inference_failed = matches!(
            self,
            ApiError::Prediction(PredictionError::Inference(_))
                | ApiError::Video(VideoError::Prediction(PredictionError::Inference(_)))
        );
        if status == StatusCode::INTERNAL_SERVER_ERROR && !inference_failed {
            INTERNAL_DETAIL.to_string()
        } else {
            self.to_string()
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed with {}: {:?}", status, self);
        } else {
            tracing::debug!("Request rejected with {}: {}", status, self);
        }

        let body = ErrorBody {
            success: false,
            detail: self.detail(status),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trash_prediction::ModelError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::from(PredictionError::NotAnImage), StatusCode::BAD_REQUEST),
            (ApiError::from(PredictionError::TooManyFiles(10)), StatusCode::BAD_REQUEST),
            (
                ApiError::from(PredictionError::ModelUnavailable),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::from(PredictionError::Store(StoreError::InvalidId("x".into()))),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(StoreError::NotFound("a.jpg".into())),
                StatusCode::NOT_FOUND,
            ),
            (ApiError::from(VideoError::Unsupported), StatusCode::NOT_IMPLEMENTED),
            (
                ApiError::from(VideoError::Unreadable("moov atom not found".into())),
                StatusCode::BAD_REQUEST,
            ),
            (ApiError::MissingField("file"), StatusCode::BAD_REQUEST),
        ];

        for (err, expected) in cases {
            assert_eq!(err.status(), expected, "{:?}", err);
        }
    }

    #[test]
    fn test_server_errors_hide_their_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "/srv/secret");
        let err = ApiError::from(StoreError::Io(io));
        assert_eq!(err.detail(err.status()), INTERNAL_DETAIL);

        let err = ApiError::from(PredictionError::from(ModelError::Inference(
            "cuda oom".to_string(),
        )));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.detail(err.status()), "Prediction failed");
    }
}
