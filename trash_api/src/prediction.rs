use crate::store::{sanitize_extension, Bucket, FileStore, PredictionId, StoreError};
use bytes::Bytes;
use image::RgbImage;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::instrument;
use trash_prediction::{
    encode_jpeg, label_detections, AnnotateError, Annotator, ClassLabels, Detection, ModelError,
    ModelService, Summary,
};

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("File must be an image")]
    NotAnImage,
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Maximum {0} images at a time")]
    TooManyFiles(usize),
    #[error("Model is not loaded")]
    ModelUnavailable,
    #[error("Prediction failed")]
    Inference(#[source] ModelError),
    #[error("Failed to annotate image")]
    Annotate(#[from] AnnotateError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Background task failed")]
    Task(#[from] JoinError),
}

impl From<ModelError> for PredictionError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::InvalidInput(reason) => PredictionError::InvalidImage(reason),
            other => PredictionError::Inference(other),
        }
    }
}

/// One uploaded multipart file.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl Upload {
    /// Judged by the declared content type, or by the file extension when the
    /// client sent none.
    pub fn is_image(&self) -> bool {
        match &self.content_type {
            Some(content_type) => content_type.starts_with("image/"),
            None => self
                .file_name
                .as_deref()
                .and_then(|name| std::path::Path::new(name).extension())
                .and_then(|ext| ext.to_str())
                .and_then(image::ImageFormat::from_extension)
                .is_some(),
        }
    }

    pub fn display_name(&self) -> String {
        self.file_name.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionRecord {
    pub success: bool,
    pub prediction_id: String,
    pub original_image: String,
    pub annotated_image: String,
    pub detections: Vec<Detection>,
    pub summary: Summary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchEntry {
    Success {
        filename: String,
        #[serde(flatten)]
        record: PredictionRecord,
    },
    Failure {
        success: bool,
        filename: String,
        error: String,
    },
}

/// Upload -> detect -> annotate -> persist.
pub struct PredictionService {
    pub(crate) model: Option<Arc<dyn ModelService>>,
    pub(crate) labels: ClassLabels,
    pub(crate) annotator: Arc<Annotator>,
    pub(crate) store: Arc<FileStore>,
    pub(crate) confidence_threshold: f32,
    pub(crate) max_batch_files: usize,
    pub(crate) frame_stride: u64,
}

impl PredictionService {
    pub fn new(
        model: Option<Arc<dyn ModelService>>,
        labels: ClassLabels,
        annotator: Arc<Annotator>,
        store: Arc<FileStore>,
        confidence_threshold: f32,
    ) -> Self {
        Self {
            model,
            labels,
            annotator,
            store,
            confidence_threshold,
            max_batch_files: 10,
            frame_stride: 1,
        }
    }

    pub fn with_max_batch_files(mut self, max_batch_files: usize) -> Self {
        self.max_batch_files = max_batch_files.max(1);
        self
    }

    pub fn with_frame_stride(mut self, frame_stride: u64) -> Self {
        self.frame_stride = frame_stride.max(1);
        self
    }

    pub fn model_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn max_batch_files(&self) -> usize {
        self.max_batch_files
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    pub(crate) fn model(&self) -> Result<Arc<dyn ModelService>, PredictionError> {
        self.model.clone().ok_or(PredictionError::ModelUnavailable)
    }

    #[instrument(skip(self, upload), fields(file_name = ?upload.file_name))]
    pub async fn predict_image(&self, upload: &Upload) -> Result<PredictionRecord, PredictionError> {
        if !upload.is_image() {
            return Err(PredictionError::NotAnImage);
        }

        let data = upload.data.clone();
        let image = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&data).map(|image| image.to_rgb8())
        })
        .await?
        .map_err(|e| PredictionError::InvalidImage(e.to_string()))?;

        let model = self.model()?;
        let id = PredictionId::new();

        let result = self.run(&id, upload, model, image).await;
        if result.is_err() {
            if let Err(e) = self.store.remove(&id).await {
                tracing::warn!("Failed to discard files of prediction {}: {}", id, e);
            }
        }
        result
    }

    async fn run(
        &self,
        id: &PredictionId,
        upload: &Upload,
        model: Arc<dyn ModelService>,
        image: RgbImage,
    ) -> Result<PredictionRecord, PredictionError> {
        let extension = sanitize_extension(upload.file_name.as_deref(), ".jpg");
        let original = self
            .store
            .save(Bucket::Uploads, &format!("{}{}", id, extension), &upload.data)
            .await?;

        let image = Arc::new(image);
        let boxes = model.predict(image.clone()).await?;
        let detections = label_detections(&boxes, &self.labels, self.confidence_threshold);

        tracing::debug!("Prediction {} returned {} detections", id, detections.len());
        for (i, detection) in detections.iter().enumerate() {
            tracing::debug!(
                "Detection {}: class={}, confidence={:.3}, bbox={:?}",
                i,
                detection.class_label,
                detection.confidence,
                detection.bbox
            );
        }

        let annotator = self.annotator.clone();
        let to_draw = detections.clone();
        let (encoded, drawn) = tokio::task::spawn_blocking(move || {
            let (annotated, drawn) = annotator.annotate(&image, &to_draw);
            encode_jpeg(&annotated).map(|encoded| (encoded, drawn))
        })
        .await??;
        if drawn != detections.len() {
            tracing::warn!(
                "Prediction {}: {} of {} detections fall outside the image",
                id,
                detections.len() - drawn,
                detections.len()
            );
        }

        let annotated = self
            .store
            .save(Bucket::Results, &format!("{}_annotated.jpg", id), &encoded)
            .await?;

        Ok(PredictionRecord {
            success: true,
            prediction_id: id.to_string(),
            original_image: original.url,
            annotated_image: annotated.url,
            summary: Summary::from_detections(&detections),
            detections,
        })
    }

    /// Runs every image independently; a failing image becomes a failure
    /// entry. Parts that are not images are skipped.
    pub async fn predict_batch(&self, uploads: &[Upload]) -> Result<Vec<BatchEntry>, PredictionError> {
        if uploads.len() > self.max_batch_files {
            return Err(PredictionError::TooManyFiles(self.max_batch_files));
        }

        let mut entries = Vec::with_capacity(uploads.len());
        for upload in uploads {
            if !upload.is_image() {
                tracing::debug!("Skipping non-image part {:?}", upload.file_name);
                continue;
            }

            let entry = match self.predict_image(upload).await {
                Ok(record) => BatchEntry::Success {
                    filename: upload.display_name(),
                    record,
                },
                Err(e) => {
                    tracing::warn!("Batch item {:?} failed: {:?}", upload.file_name, e);
                    BatchEntry::Failure {
                        success: false,
                        filename: upload.display_name(),
                        error: e.to_string(),
                    }
                }
            };
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Removes every stored file of `prediction_id`. Unknown ids succeed.
    pub async fn cleanup(&self, prediction_id: &str) -> Result<usize, PredictionError> {
        let id = PredictionId::parse(prediction_id)?;
        let removed = self.store.remove(&id).await?;
        tracing::info!("Cleanup of {} removed {} files", id, removed);
        Ok(removed)
    }
}
