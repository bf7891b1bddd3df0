use serde::Deserialize;
use std::path::PathBuf;

pub trait Validatable {
    fn get_path(&self) -> PathBuf;
    fn validate(&self) -> Result<(), String>;
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    pub onnx_file: String,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    /// Fetched once into `model_dir` when the ONNX file is missing.
    #[serde(default)]
    pub download_url: Option<String>,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_confidence_threshold() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.7
}

fn default_input_size() -> u32 {
    640
}

impl Validatable for ModelConfig {
    fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }

    // The weights file itself is not checked here: a missing model keeps the
    // service up and is reported through the health route instead.
    fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(format!(
                "iou_threshold must be within [0, 1], got {}",
                self.iou_threshold
            ));
        }
        if self.input_size == 0 {
            return Err("input_size must be greater than zero".to_string());
        }
        if self.num_instances == 0 {
            return Err("num_instances must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelsConfig {
    pub labels_dir: PathBuf,
    pub labels_file: String,
}

impl Validatable for LabelsConfig {
    fn get_path(&self) -> PathBuf {
        self.labels_dir.join(&self.labels_file)
    }

    fn validate(&self) -> Result<(), String> {
        if !self.get_path().exists() {
            return Err(format!("Labels file not found: {:?}", self.get_path()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_config() -> ModelConfig {
        ModelConfig {
            model_dir: PathBuf::from("models"),
            onnx_file: "best.onnx".to_string(),
            num_instances: 1,
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
            input_size: 640,
            download_url: None,
        }
    }

    #[test]
    fn test_model_path_joins_dir_and_file() {
        assert_eq!(model_config().get_path(), PathBuf::from("models/best.onnx"));
    }

    #[test]
    fn test_model_validation_rejects_out_of_range_threshold() {
        let mut config = model_config();
        assert!(config.validate().is_ok());

        config.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        config.confidence_threshold = 0.25;
        config.iou_threshold = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_model_validation_rejects_empty_pool() {
        let mut config = model_config();
        config.num_instances = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_labels_validation_requires_existing_file() {
        let config = LabelsConfig {
            labels_dir: PathBuf::from("./does_not_exist"),
            labels_file: "labels.txt".to_string(),
        };
        assert!(config.validate().is_err());
    }
}
