use crate::detection::Detection;
use ab_glyph::{FontRef, InvalidFont, PxScale};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use std::io::Cursor;
use thiserror::Error;

const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_PADDING: u32 = 3;
const BOX_THICKNESS: u32 = 2;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

static FONT_DATA: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("Failed to load label font: {0}")]
    Font(#[from] InvalidFont),
    #[error("Failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
}

/// Draws detection boxes and `label confidence` captions.
pub struct Annotator {
    font: FontRef<'static>,
    scale: PxScale,
}

impl Annotator {
    pub fn new() -> Result<Self, AnnotateError> {
        Ok(Self {
            font: FontRef::try_from_slice(FONT_DATA)?,
            scale: PxScale::from(LABEL_FONT_SIZE),
        })
    }

    /// Returns an annotated copy of `image` and the number of boxes drawn.
    pub fn annotate(&self, image: &RgbImage, detections: &[Detection]) -> (RgbImage, usize) {
        let mut annotated = image.clone();
        let drawn = self.annotate_in_place(&mut annotated, detections);
        (annotated, drawn)
    }

    pub fn annotate_in_place(&self, image: &mut RgbImage, detections: &[Detection]) -> usize {
        if image.width() == 0 || image.height() == 0 {
            return 0;
        }
        detections
            .iter()
            .filter(|detection| self.draw_detection(image, detection))
            .count()
    }

    /// Returns false when the box lies entirely outside the image.
    fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) -> bool {
        let (width, height) = image.dimensions();
        let max_x = (width - 1) as f32;
        let max_y = (height - 1) as f32;

        let [x1, y1, x2, y2] = detection.bbox;
        if x2 < 0. || y2 < 0. || x1 > max_x || y1 > max_y || x2 < x1 || y2 < y1 {
            return false;
        }
        let x_min = x1.clamp(0., max_x).floor() as i32;
        let y_min = y1.clamp(0., max_y).floor() as i32;
        let x_max = x2.clamp(0., max_x).ceil() as i32;
        let y_max = y2.clamp(0., max_y).ceil() as i32;

        let color = Rgb(detection.color);
        let box_width = (x_max - x_min).max(0) as u32 + 1;
        let box_height = (y_max - y_min).max(0) as u32 + 1;

        for inset in 0..BOX_THICKNESS {
            let (w, h) = (
                box_width.saturating_sub(2 * inset),
                box_height.saturating_sub(2 * inset),
            );
            if w == 0 || h == 0 {
                break;
            }
            let rect = Rect::at(x_min + inset as i32, y_min + inset as i32).of_size(w, h);
            draw_hollow_rect_mut(image, rect, color);
        }

        let label = format!("{} {:.2}", detection.class_label, detection.confidence);
        let (text_width, text_height) = text_size(self.scale, &self.font, &label);
        let label_width = text_width + 2 * LABEL_PADDING;
        let label_height = text_height + 2 * LABEL_PADDING;

        // Caption sits above the box, or just inside it at the top edge.
        let label_y = if y_min >= label_height as i32 {
            y_min - label_height as i32
        } else {
            y_min
        };
        draw_filled_rect_mut(
            image,
            Rect::at(x_min, label_y).of_size(label_width, label_height),
            color,
        );
        draw_text_mut(
            image,
            TEXT_COLOR,
            x_min + LABEL_PADDING as i32,
            label_y + LABEL_PADDING as i32,
            self.scale,
            &self.font,
            &label,
        );

        true
    }
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, AnnotateError> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Jpeg)?;
    Ok(buffer.into_inner())
}
