use crate::{
    bounding_box::{non_maximum_suppression, BoundingBox},
    config::{ModelConfig, Validatable},
    download::download_model,
    model_service::{ModelError, ModelService},
};
use async_trait::async_trait;
use image::{imageops::FilterType, RgbImage};
use ndarray::{Array, ArrayViewD, Axis, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

const OUTPUT_NAME: &str = "output0";

/// Resizes to the square network input and lays the pixels out as NCHW in [0, 1].
fn transform_image(image: &RgbImage, input_size: u32) -> Array<f32, Ix4> {
    let resized = image::imageops::resize(image, input_size, input_size, FilterType::CatmullRom);
    let size = input_size as usize;

    let mut input = Array::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    input
}

/// Post-processing parameters for a raw YOLOv8 head.
#[derive(Debug, Clone, Copy)]
pub struct DecodeParams {
    pub input_size: u32,
    pub image_width: u32,
    pub image_height: u32,
    pub min_probability: f32,
    pub iou_threshold: f32,
}

/// Decodes a `[1, 4 + classes, anchors]` YOLOv8 output (or its transpose) into
/// boxes in original image coordinates, thresholded and NMS-filtered.
pub fn decode_output(
    output: ArrayViewD<'_, f32>,
    params: &DecodeParams,
) -> Result<Vec<BoundingBox>, ModelError> {
    let shape = output.shape().to_vec();
    let output = output
        .into_dimensionality::<ndarray::Ix3>()
        .map_err(|_| ModelError::Output(format!("expected a 3D tensor, got {:?}", shape)))?
        .index_axis_move(Axis(0), 0);

    // Anchors outnumber channels; rows are anchors once transposed.
    let rows = if output.shape()[0] < output.shape()[1] {
        output.reversed_axes()
    } else {
        output
    };
    if rows.shape()[1] <= 4 {
        return Err(ModelError::Output(format!(
            "expected at least one class channel, got shape {:?}",
            shape
        )));
    }

    let scale_x = params.image_width as f32 / params.input_size as f32;
    let scale_y = params.image_height as f32 / params.input_size as f32;

    let mut boxes = Vec::new();
    for row in rows.axis_iter(Axis(0)) {
        let Some((class_id, prob)) = row
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|accum, item| if item.1 > accum.1 { item } else { accum })
        else {
            continue;
        };

        if prob < params.min_probability {
            continue;
        }

        let xc = row[0] * scale_x;
        let yc = row[1] * scale_y;
        let w = row[2] * scale_x;
        let h = row[3] * scale_y;

        boxes.push(
            BoundingBox {
                class_id: class_id as u32,
                confidence: prob,
                x1: xc - w / 2.,
                y1: yc - h / 2.,
                x2: xc + w / 2.,
                y2: yc + h / 2.,
            }
            .clamped(params.image_width, params.image_height),
        );
    }

    Ok(non_maximum_suppression(boxes, params.iou_threshold))
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    min_probability: f32,
    iou_threshold: f32,
    input_size: u32,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelError> {
        let model_path = model_config.get_path();
        if !model_path.exists() {
            match &model_config.download_url {
                Some(url) => download_model(url, &model_path)?,
                None => return Err(ModelError::NotFound(model_path.display().to_string())),
            }
        }

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(&model_path)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_path
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            min_probability: model_config.confidence_threshold,
            iou_threshold: model_config.iou_threshold,
            input_size: model_config.input_size,
        })
    }

    pub fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ndarray::ArrayD<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ModelError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let (shape, data) = outputs[OUTPUT_NAME]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Output(format!("failed to extract tensor: {}", e)))?;

        let array = ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| ModelError::Output(format!("invalid tensor shape: {}", e)))?;

        Ok(array)
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, ModelError> {
        let (image_width, image_height) = image.dimensions();
        if image_width == 0 || image_height == 0 {
            return Err(ModelError::InvalidInput("image has no pixels".to_string()));
        }

        let input = transform_image(image, self.input_size);
        let output = self.run_inference(&input)?;

        decode_output(
            output.view(),
            &DecodeParams {
                input_size: self.input_size,
                image_width,
                image_height,
                min_probability: self.min_probability,
                iou_threshold: self.iou_threshold,
            },
        )
    }
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn predict(&self, image: Arc<RgbImage>) -> Result<Vec<BoundingBox>, ModelError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.detect(&image))
            .await
            .map_err(|e| ModelError::Inference(format!("inference task failed: {}", e)))?
    }
}
