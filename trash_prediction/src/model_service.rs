use crate::bounding_box::BoundingBox;
use async_trait::async_trait;
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model file not found: {0}")]
    NotFound(String),
    #[error("Failed to download model: {0}")]
    Download(String),
    #[error("Failed to load model: {0}")]
    Load(#[from] ort::Error),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Unexpected model output: {0}")]
    Output(String),
}

/// Single entry point to the detector. Implementations are shared across
/// request handlers behind an `Arc` and are never mutated after load.
#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    async fn predict(&self, image: Arc<RgbImage>) -> Result<Vec<BoundingBox>, ModelError>;
}
