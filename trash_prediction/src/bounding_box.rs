/// Raw detector output in original image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub class_id: u32,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.) * (self.y2 - self.y1).max(0.)
    }

    pub fn intersection(&self, other: &BoundingBox) -> f32 {
        let width = self.x2.min(other.x2) - self.x1.max(other.x1);
        let height = self.y2.min(other.y2) - self.y1.max(other.y1);
        width.max(0.) * height.max(0.)
    }

    pub fn union(&self, other: &BoundingBox) -> f32 {
        self.area() + other.area() - self.intersection(other)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let union = self.union(other);
        if union <= 0. {
            0.
        } else {
            self.intersection(other) / union
        }
    }

    /// Clamps the box to `[0, width] x [0, height]`.
    pub fn clamped(self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self {
            x1: self.x1.clamp(0., w),
            y1: self.y1.clamp(0., h),
            x2: self.x2.clamp(0., w),
            y2: self.y2.clamp(0., h),
            ..self
        }
    }
}

/// Greedy non-maximum suppression, highest confidence first.
pub fn non_maximum_suppression(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));
    let mut result = Vec::new();

    while let Some((best, rest)) = boxes.split_first() {
        let best = *best;
        boxes = rest
            .iter()
            .filter(|candidate| best.iou(candidate) < iou_threshold)
            .copied()
            .collect();
        result.push(best);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> BoundingBox {
        BoundingBox {
            class_id: 0,
            confidence,
            x1,
            y1,
            x2,
            y2,
        }
    }

    #[test]
    fn test_iou_of_disjoint_boxes_is_zero() {
        let a = bbox(0.9, 0., 0., 10., 10.);
        let b = bbox(0.9, 20., 20., 30., 30.);
        assert_eq!(a.intersection(&b), 0.);
        assert_eq!(a.iou(&b), 0.);
    }

    #[test]
    fn test_iou_of_half_overlap() {
        let a = bbox(0.9, 0., 0., 10., 10.);
        let b = bbox(0.9, 5., 0., 15., 10.);
        assert!((a.iou(&b) - 50. / 150.).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping_boxes() {
        let boxes = vec![
            bbox(0.6, 0., 0., 100., 100.),
            bbox(0.9, 2., 2., 101., 101.),
            bbox(0.8, 300., 300., 400., 400.),
        ];

        let kept = non_maximum_suppression(boxes, 0.7);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.8);
    }

    #[test]
    fn test_clamped_box_stays_inside_image() {
        let clamped = bbox(0.5, -10., -5., 120., 90.).clamped(100, 80);
        assert_eq!((clamped.x1, clamped.y1, clamped.x2, clamped.y2), (0., 0., 100., 80.));
    }
}
