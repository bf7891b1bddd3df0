use crate::{bounding_box::BoundingBox, labels::ClassLabels};
use serde::Serialize;
use std::collections::BTreeMap;

/// A labelled detection as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub class_label: String,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in original image pixels.
    pub bbox: [f32; 4],
    #[serde(skip)]
    pub color: [u8; 3],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub total_detections: usize,
    pub class_counts: BTreeMap<String, usize>,
}

impl Summary {
    pub fn from_detections(detections: &[Detection]) -> Self {
        let mut summary = Summary::default();
        summary.extend(detections);
        summary
    }

    pub fn extend(&mut self, detections: &[Detection]) {
        self.total_detections += detections.len();
        for detection in detections {
            *self
                .class_counts
                .entry(detection.class_label.clone())
                .or_default() += 1;
        }
    }
}

fn round_to(value: f32, decimals: i32) -> f32 {
    let factor = 10f32.powi(decimals);
    (value * factor).round() / factor
}

/// Maps raw boxes onto the label table. Boxes under `min_confidence`, before or
/// after rounding, or with a class id outside the table are dropped.
pub fn label_detections(
    boxes: &[BoundingBox],
    labels: &ClassLabels,
    min_confidence: f32,
) -> Vec<Detection> {
    boxes
        .iter()
        .filter_map(|bbox| {
            let confidence = round_to(bbox.confidence, 3);
            if bbox.confidence < min_confidence || confidence < min_confidence {
                return None;
            }
            let Some(color_label) = labels.get(bbox.class_id) else {
                tracing::warn!("Dropping detection with unknown class id {}", bbox.class_id);
                return None;
            };
            Some(Detection {
                class_label: color_label.label.clone(),
                confidence,
                bbox: [
                    round_to(bbox.x1, 2),
                    round_to(bbox.y1, 2),
                    round_to(bbox.x2, 2),
                    round_to(bbox.y2, 2),
                ],
                color: color_label.rgb(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::ColorLabel;

    fn labels() -> ClassLabels {
        ClassLabels::new(vec![
            ColorLabel {
                label: "full".to_string(),
                red: 220,
                green: 38,
                blue: 38,
            },
            ColorLabel {
                label: "empty".to_string(),
                red: 22,
                green: 163,
                blue: 74,
            },
        ])
        .unwrap()
    }

    fn raw(class_id: u32, confidence: f32) -> BoundingBox {
        BoundingBox {
            class_id,
            confidence,
            x1: 10.123,
            y1: 20.456,
            x2: 100.789,
            y2: 150.001,
        }
    }

    #[test]
    fn test_label_detections_filters_and_rounds() {
        let boxes = vec![raw(0, 0.91234), raw(1, 0.1), raw(7, 0.99), raw(1, 0.25)];

        let detections = label_detections(&boxes, &labels(), 0.25);

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_label, "full");
        assert_eq!(detections[0].confidence, 0.912);
        assert_eq!(detections[0].bbox, [10.12, 20.46, 100.79, 150.0]);
        assert_eq!(detections[0].color, [220, 38, 38]);
        assert_eq!(detections[1].class_label, "empty");
        assert!(detections.iter().all(|d| d.confidence >= 0.25));
    }

    #[test]
    fn test_rounding_never_drops_below_threshold() {
        let boxes = vec![raw(0, 0.2504), raw(1, 0.2506), raw(0, 0.2496)];

        let detections = label_detections(&boxes, &labels(), 0.2504);

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_label, "empty");
        assert_eq!(detections[0].confidence, 0.251);
        assert!(detections.iter().all(|d| d.confidence >= 0.2504));
    }

    #[test]
    fn test_summary_counts_per_class() {
        let boxes = vec![raw(0, 0.9), raw(1, 0.8), raw(0, 0.7)];
        let detections = label_detections(&boxes, &labels(), 0.25);

        let summary = Summary::from_detections(&detections);

        assert_eq!(summary.total_detections, 3);
        assert_eq!(summary.class_counts.get("full"), Some(&2));
        assert_eq!(summary.class_counts.get("empty"), Some(&1));
        assert_eq!(
            summary.class_counts.values().sum::<usize>(),
            summary.total_detections
        );
    }

    #[test]
    fn test_empty_summary_has_no_classes() {
        let summary = Summary::from_detections(&[]);
        assert_eq!(summary.total_detections, 0);
        assert!(summary.class_counts.is_empty());
    }

    #[test]
    fn test_detection_serializes_with_class_key() {
        let detections = label_detections(&[raw(1, 0.5)], &labels(), 0.25);
        let json = serde_json::to_value(&detections[0]).unwrap();

        assert_eq!(json["class"], "empty");
        assert_eq!(json["bbox"].as_array().map(Vec::len), Some(4));
        assert!(json.get("color").is_none());
    }
}
