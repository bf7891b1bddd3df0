use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct ServiceInfo {
    message: String,
    version: String,
    status: String,
}

pub async fn root() -> impl IntoResponse {
    Json(ServiceInfo {
        message: "Trash bin detection API".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        status: "active".into(),
    })
}
