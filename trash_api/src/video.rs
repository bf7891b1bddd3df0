use crate::{
    prediction::{PredictionError, PredictionService, Upload},
    store::StoreError,
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::task::JoinError;
use trash_prediction::{Detection, Summary};

const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];

#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Video analysis is not available in this build")]
    Unsupported,
    #[error("File must be a video")]
    NotAVideo,
    #[error("Unreadable video: {0}")]
    Unreadable(String),
    #[error(transparent)]
    Prediction(#[from] PredictionError),
    #[error("Video processing failed: {0}")]
    Processing(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Background task failed")]
    Task(#[from] JoinError),
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoRecord {
    pub success: bool,
    pub prediction_id: String,
    pub original_video: String,
    pub annotated_video: String,
    pub frames_total: u64,
    pub frames_processed: u64,
    pub total_detections: usize,
    pub detections_per_frame: f64,
    pub class_counts: BTreeMap<String, usize>,
}

/// Running totals over the sampled frames of one video.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoStats {
    pub frames_read: u64,
    pub frames_processed: u64,
    pub summary: Summary,
}

impl VideoStats {
    pub fn record_frame(&mut self, detections: &[Detection]) {
        self.frames_processed += 1;
        self.summary.extend(detections);
    }

    pub fn detections_per_frame(&self) -> f64 {
        if self.frames_processed == 0 {
            return 0.;
        }
        let average = self.summary.total_detections as f64 / self.frames_processed as f64;
        (average * 100.).round() / 100.
    }
}

pub fn is_video(upload: &Upload) -> bool {
    if let Some(content_type) = &upload.content_type {
        if content_type.starts_with("video/") {
            return true;
        }
    }
    upload
        .file_name
        .as_deref()
        .and_then(|name| std::path::Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

#[cfg(not(feature = "video"))]
impl PredictionService {
    pub async fn predict_video(&self, _upload: &Upload) -> Result<VideoRecord, VideoError> {
        Err(VideoError::Unsupported)
    }
}

#[cfg(feature = "video")]
mod opencv_pipeline {
    use super::*;
    use crate::store::{sanitize_extension, Bucket, PredictionId};
    use image::RgbImage;
    use opencv::{
        core::{self, Mat, Scalar},
        prelude::*,
        videoio,
    };
    use std::{path::PathBuf, sync::Arc};
    use tokio::runtime::Handle;
    use tracing::instrument;
    use trash_prediction::{label_detections, Annotator, ClassLabels, ModelService};

    const FALLBACK_FPS: f64 = 25.0;

    impl From<opencv::Error> for VideoError {
        fn from(err: opencv::Error) -> Self {
            VideoError::Processing(err.to_string())
        }
    }

    struct VideoJob {
        input: PathBuf,
        output: PathBuf,
        model: Arc<dyn ModelService>,
        labels: ClassLabels,
        annotator: Arc<Annotator>,
        confidence_threshold: f32,
        frame_stride: u64,
    }

    fn mat_to_rgb(frame: &Mat) -> Result<RgbImage, VideoError> {
        if frame.typ() != core::CV_8UC3 {
            return Err(VideoError::Processing(format!(
                "unsupported frame type {}",
                frame.typ()
            )));
        }
        let owned;
        let frame = if frame.is_continuous() {
            frame
        } else {
            owned = frame.try_clone()?;
            &owned
        };

        let (width, height) = (frame.cols() as u32, frame.rows() as u32);
        let rgb: Vec<u8> = frame
            .data_bytes()?
            .chunks_exact(3)
            .flat_map(|bgr| [bgr[2], bgr[1], bgr[0]])
            .collect();

        RgbImage::from_raw(width, height, rgb)
            .ok_or_else(|| VideoError::Processing("frame buffer size mismatch".to_string()))
    }

    fn rgb_to_mat(image: &RgbImage) -> Result<Mat, VideoError> {
        let mut mat = Mat::new_rows_cols_with_default(
            image.height() as i32,
            image.width() as i32,
            core::CV_8UC3,
            Scalar::all(0.),
        )?;
        for (bgr, rgb) in mat
            .data_bytes_mut()?
            .chunks_exact_mut(3)
            .zip(image.as_raw().chunks_exact(3))
        {
            bgr[0] = rgb[2];
            bgr[1] = rgb[1];
            bgr[2] = rgb[0];
        }
        Ok(mat)
    }

    fn process_video(handle: &Handle, job: &VideoJob) -> Result<(u64, VideoStats), VideoError> {
        let input = job.input.to_string_lossy();
        let mut capture = videoio::VideoCapture::from_file(&input, videoio::CAP_ANY)
            .map_err(|e| VideoError::Unreadable(e.to_string()))?;
        if !capture.is_opened()? {
            return Err(VideoError::Unreadable("cannot open video stream".to_string()));
        }

        let fps = match capture.get(videoio::CAP_PROP_FPS)? {
            fps if fps > 0. => fps,
            _ => FALLBACK_FPS,
        };
        let frames_total = capture.get(videoio::CAP_PROP_FRAME_COUNT)?.max(0.) as u64;

        let mut frame = Mat::default();
        if !capture.read(&mut frame)? || frame.empty() {
            return Err(VideoError::Unreadable("video has no readable frames".to_string()));
        }

        let fourcc = videoio::VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let mut writer = videoio::VideoWriter::new(
            &job.output.to_string_lossy(),
            fourcc,
            fps,
            frame.size()?,
            true,
        )?;
        if !writer.is_opened()? {
            return Err(VideoError::Processing("cannot open video writer".to_string()));
        }

        let mut stats = VideoStats::default();
        loop {
            if stats.frames_read % job.frame_stride == 0 {
                let image = Arc::new(mat_to_rgb(&frame)?);
                let boxes = handle
                    .block_on(job.model.predict(image.clone()))
                    .map_err(PredictionError::from)?;
                let detections =
                    label_detections(&boxes, &job.labels, job.confidence_threshold);

                let mut image = Arc::unwrap_or_clone(image);
                job.annotator.annotate_in_place(&mut image, &detections);
                stats.record_frame(&detections);
                frame = rgb_to_mat(&image)?;
            }

            writer.write(&frame)?;
            stats.frames_read += 1;

            if !capture.read(&mut frame)? || frame.empty() {
                break;
            }
        }

        writer.release()?;
        capture.release()?;

        Ok((frames_total.max(stats.frames_read), stats))
    }

    impl PredictionService {
        #[instrument(skip(self, upload), fields(file_name = ?upload.file_name))]
        pub async fn predict_video(&self, upload: &Upload) -> Result<VideoRecord, VideoError> {
            if !is_video(upload) {
                return Err(VideoError::NotAVideo);
            }
            let model = self.model()?;
            let id = PredictionId::new();

            let result = self.run_video(&id, upload, model).await;
            if result.is_err() {
                if let Err(e) = self.store.remove(&id).await {
                    tracing::warn!("Failed to discard files of video {}: {}", id, e);
                }
            }
            result
        }

        async fn run_video(
            &self,
            id: &PredictionId,
            upload: &Upload,
            model: Arc<dyn ModelService>,
        ) -> Result<VideoRecord, VideoError> {
            let extension = sanitize_extension(upload.file_name.as_deref(), ".mp4");
            let original = self
                .store
                .save(Bucket::Videos, &format!("{}{}", id, extension), &upload.data)
                .await?;

            let annotated_name = format!("{}_annotated.mp4", id);
            let job = VideoJob {
                input: original.path.clone(),
                output: self.store.path(Bucket::Videos, &annotated_name)?,
                model,
                labels: self.labels.clone(),
                annotator: self.annotator.clone(),
                confidence_threshold: self.confidence_threshold,
                frame_stride: self.frame_stride,
            };

            let handle = Handle::current();
            let (frames_total, stats) =
                tokio::task::spawn_blocking(move || process_video(&handle, &job)).await??;

            tracing::info!(
                "Video {} processed: {} frames read, {} sampled, {} detections",
                id,
                stats.frames_read,
                stats.frames_processed,
                stats.summary.total_detections
            );

            Ok(VideoRecord {
                success: true,
                prediction_id: id.to_string(),
                original_video: original.url,
                annotated_video: self.store.url(Bucket::Videos, &annotated_name),
                frames_total,
                frames_processed: stats.frames_processed,
                total_detections: stats.summary.total_detections,
                detections_per_frame: stats.detections_per_frame(),
                class_counts: stats.summary.class_counts,
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::prediction::tests::{mock_boxes, service, MockModelService};
        use bytes::Bytes;
        use image::Rgb;
        use opencv::core::Size;

        /// Encodes `frames` solid-colour frames as an MJPG avi.
        fn synthetic_clip(frames: u8) -> Bytes {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("clip.avi");
            let fourcc = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G').unwrap();
            let mut writer = videoio::VideoWriter::new(
                &path.to_string_lossy(),
                fourcc,
                10.,
                Size::new(64, 48),
                true,
            )
            .unwrap();
            assert!(writer.is_opened().unwrap());
            for i in 0..frames {
                let image = RgbImage::from_pixel(64, 48, Rgb([i * 40, 90, 160]));
                writer.write(&rgb_to_mat(&image).unwrap()).unwrap();
            }
            writer.release().unwrap();
            Bytes::from(std::fs::read(&path).unwrap())
        }

        fn video_upload(name: &str, data: Bytes) -> Upload {
            Upload {
                file_name: Some(name.to_string()),
                content_type: Some("video/x-msvideo".to_string()),
                data,
            }
        }

        fn mock_model() -> Option<Arc<dyn ModelService>> {
            Some(Arc::new(MockModelService {
                boxes: mock_boxes(),
            }))
        }

        #[test]
        fn test_mat_rgb_conversion_swaps_channels() {
            let image = RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]));

            let mat = rgb_to_mat(&image).unwrap();
            assert_eq!((mat.cols(), mat.rows()), (4, 3));
            assert_eq!(&mat.data_bytes().unwrap()[..3], &[30, 20, 10]);

            let back = mat_to_rgb(&mat).unwrap();
            assert_eq!(back, image);
        }

        #[tokio::test(flavor = "multi_thread")]
        async fn test_every_second_frame_is_analysed() {
            let (dir, service) = service(mock_model()).await;
            let service = service.with_frame_stride(2);

            let record = service
                .predict_video(&video_upload("clip.avi", synthetic_clip(6)))
                .await
                .unwrap();

            assert!(record.success);
            assert_eq!(record.frames_total, 6);
            assert_eq!(record.frames_processed, 3);
            assert_eq!(record.total_detections, 6);
            assert_eq!(record.detections_per_frame, 2.0);
            assert_eq!(record.class_counts.get("full"), Some(&3));
            assert_eq!(record.class_counts.get("empty"), Some(&3));

            let videos = dir.path().join("temp_videos");
            let annotated = videos.join(format!("{}_annotated.mp4", record.prediction_id));
            assert!(annotated.metadata().unwrap().len() > 0);
            assert!(videos
                .join(format!("{}.avi", record.prediction_id))
                .exists());
            assert_eq!(
                record.annotated_video,
                format!("/videos/{}_annotated.mp4", record.prediction_id)
            );
        }

        #[tokio::test(flavor = "multi_thread")]
        async fn test_unreadable_video_is_rejected_and_discarded() {
            let (dir, service) = service(mock_model()).await;

            let err = service
                .predict_video(&video_upload(
                    "clip.mp4",
                    Bytes::from_static(b"definitely not a video container"),
                ))
                .await
                .unwrap_err();

            assert!(matches!(err, VideoError::Unreadable(_)));
            assert_eq!(
                crate::error::ApiError::from(err).status(),
                axum::http::StatusCode::BAD_REQUEST
            );
            let videos = dir.path().join("temp_videos");
            assert_eq!(std::fs::read_dir(videos).unwrap().count(), 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn upload(name: &str, content_type: Option<&str>) -> Upload {
        Upload {
            file_name: Some(name.to_string()),
            content_type: content_type.map(str::to_string),
            data: Bytes::new(),
        }
    }

    #[test]
    fn test_is_video() {
        assert!(is_video(&upload("clip.bin", Some("video/mp4"))));
        assert!(is_video(&upload("clip.MOV", None)));
        assert!(is_video(&upload("clip.avi", Some("application/octet-stream"))));
        assert!(!is_video(&upload("photo.jpg", Some("image/jpeg"))));
    }

    #[test]
    fn test_stats_average_detections_per_frame() {
        let detection = Detection {
            class_label: "full".to_string(),
            confidence: 0.9,
            bbox: [0., 0., 1., 1.],
            color: [0, 0, 0],
        };
        let mut stats = VideoStats::default();
        assert_eq!(stats.detections_per_frame(), 0.);

        stats.record_frame(&[detection.clone(), detection.clone()]);
        stats.record_frame(&[]);
        stats.record_frame(&[detection]);

        assert_eq!(stats.frames_processed, 3);
        assert_eq!(stats.summary.total_detections, 3);
        assert_eq!(stats.summary.class_counts.get("full"), Some(&3));
        assert_eq!(stats.detections_per_frame(), 1.0);
    }

    #[cfg(not(feature = "video"))]
    #[tokio::test]
    async fn test_video_without_feature_is_unsupported() {
        let (_dir, service) = crate::prediction::tests::service(None).await;

        let err = service
            .predict_video(&upload("clip.mp4", Some("video/mp4")))
            .await
            .unwrap_err();

        assert!(matches!(err, VideoError::Unsupported));
    }
}
