mod cleanup;
mod files;
mod health;
mod metrics;
mod predict;
mod predict_video;
mod root;
mod ui;

use crate::server::SharedState;
use axum::{
    routing::{delete, get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(root::root))
        .route("/health", get(health::healthcheck))
        .route("/predict", post(predict::predict))
        .route("/predict-batch", post(predict::predict_batch))
        .route("/predict-video", post(predict_video::predict_video))
        .route("/cleanup/{prediction_id}", delete(cleanup::cleanup))
        .route("/uploads/{file}", get(files::uploaded_file))
        .route("/results/{file}", get(files::result_file))
        .route("/videos/{file}", get(files::video_file))
        .route("/ui", get(ui::index))
        .route("/metrics", get(metrics::metrics_handler))
}
