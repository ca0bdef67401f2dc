//! Box and name overlays on the display frame.

use crate::types::BoundingBox;
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;
use thiserror::Error;

pub const IDENTIFIED_COLOR: Rgb<u8> = Rgb([0, 255, 127]);
pub const UNIDENTIFIED_COLOR: Rgb<u8> = Rgb([255, 71, 71]);

/// Pixels between the bottom of a label and the top edge of its box.
const LABEL_GAP: i32 = 6;

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("cannot read label font {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid label font {0}")]
    InvalidFont(String),
}

/// Draws face boxes, and names above them when a font is loaded.
pub struct Annotator {
    thickness: u32,
    font: Option<FontVec>,
    scale: PxScale,
}

impl Annotator {
    /// Boxes only.
    pub fn new(thickness: u32) -> Self {
        Self {
            thickness: thickness.max(1),
            font: None,
            scale: PxScale::from(16.0),
        }
    }

    /// Load a TrueType/OpenType font for labels of `height` pixels.
    pub fn with_font_file(mut self, path: &Path, height: f32) -> Result<Self, AnnotateError> {
        let bytes = std::fs::read(path).map_err(|source| AnnotateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|_| AnnotateError::InvalidFont(path.display().to_string()))?;
        self.font = Some(font);
        self.scale = PxScale::from(height);
        Ok(self)
    }

    pub fn has_labels(&self) -> bool {
        self.font.is_some()
    }

    /// Outline `bbox` and write `label` above it.
    pub fn draw(&self, image: &mut RgbImage, bbox: &BoundingBox, label: &str, color: Rgb<u8>) {
        let Some((x, y, w, h)) = bbox.clamp_to(image.width(), image.height()) else {
            return;
        };
        for inset in 0..self.thickness {
            let (iw, ih) = (w.saturating_sub(2 * inset), h.saturating_sub(2 * inset));
            if iw == 0 || ih == 0 {
                break;
            }
            let rect = Rect::at((x + inset) as i32, (y + inset) as i32).of_size(iw, ih);
            draw_hollow_rect_mut(image, rect, color);
        }

        if let (Some(font), false) = (&self.font, label.is_empty()) {
            let (_, text_h) = text_size(self.scale, font, label);
            let (lx, ly) = label_origin(x, y, text_h, self.thickness);
            draw_text_mut(image, color, lx, ly, self.scale, font, label);
        }
    }
}

/// Top-left corner for a label of height `text_h` over a box at `(x, y)`.
/// Falls inside the box when there is no room above it.
fn label_origin(x: u32, y: u32, text_h: u32, thickness: u32) -> (i32, i32) {
    let above = y as i32 - LABEL_GAP - text_h as i32;
    if above >= 0 {
        (x as i32, above)
    } else {
        (x as i32 + thickness as i32, y as i32 + thickness as i32)
    }
}
