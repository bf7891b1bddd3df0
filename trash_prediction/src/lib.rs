mod download;

pub mod annotate;
pub mod bounding_box;
pub mod config;
pub mod detection;
pub mod labels;
pub mod model_service;
pub mod ort_service;

pub use annotate::{encode_jpeg, AnnotateError, Annotator};
pub use bounding_box::BoundingBox;
pub use config::{LabelsConfig, ModelConfig, Validatable};
pub use detection::{label_detections, Detection, Summary};
pub use labels::{ClassLabels, ColorLabel, LabelsError, NUM_CLASSES};
pub use model_service::{ModelError, ModelService};
pub use ort_service::OrtModelService;
