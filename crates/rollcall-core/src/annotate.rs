//! Frame annotation: outline each matched face and write its name above it.

use crate::types::{BoundingBox, MatchResult};
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;
use thiserror::Error;

pub const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const LABEL_PX: f32 = 18.0;
/// Space between the bottom of a label and the top of its box.
const LABEL_GAP: u32 = 4;

/// Fonts tried, in order, when no label font is configured.
pub const SYSTEM_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
];

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("failed to read font {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("not a usable TrueType/OpenType font: {0}")]
    InvalidFont(String),
}

/// TrueType font used to draw name labels.
pub struct LabelFont {
    font: FontVec,
    scale: PxScale,
}

impl LabelFont {
    pub fn load(path: &Path) -> Result<Self, AnnotateError> {
        let bytes = std::fs::read(path).map_err(|source| AnnotateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|_| AnnotateError::InvalidFont(path.display().to_string()))?;
        Ok(Self {
            font,
            scale: PxScale::from(LABEL_PX),
        })
    }

    /// First loadable font from [`SYSTEM_FONT_PATHS`].
    pub fn discover() -> Option<Self> {
        SYSTEM_FONT_PATHS.iter().find_map(|path| {
            let font = Self::load(Path::new(path)).ok()?;
            tracing::debug!(path, "label font found");
            Some(font)
        })
    }
}

/// Draws a box per match, green for known students and red otherwise, with
/// the resolved name above it when a font is available.
#[derive(Default)]
pub struct Annotator {
    font: Option<LabelFont>,
}

impl Annotator {
    pub fn new(font: Option<LabelFont>) -> Self {
        Self { font }
    }

    pub fn draws_labels(&self) -> bool {
        self.font.is_some()
    }

    pub fn annotate(&self, frame: &mut RgbImage, matches: &[MatchResult]) {
        for m in matches {
            let color = if m.identity.is_known() { KNOWN_COLOR } else { UNKNOWN_COLOR };
            let Some(bbox) = clip(&m.detection.bbox, frame) else {
                continue;
            };
            draw_box(frame, &bbox, color, BOX_THICKNESS);
            if let Some(font) = &self.font {
                draw_label(frame, &bbox, m.label(), color, font);
            }
        }
    }
}

/// Box limited to the frame, or `None` if nothing of it is visible.
fn clip(bbox: &BoundingBox, frame: &RgbImage) -> Option<BoundingBox> {
    let (w, h) = frame.dimensions();
    let clipped = BoundingBox {
        xmax: bbox.xmax.min(w),
        ymax: bbox.ymax.min(h),
        ..*bbox
    };
    (clipped.width() > 0 && clipped.height() > 0).then_some(clipped)
}

/// Draw a hollow rectangle `thickness` pixels wide, growing inward.
pub fn draw_box(frame: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    let Some(bbox) = clip(bbox, frame) else {
        return;
    };
    for inset in 0..thickness {
        let (w, h) = (bbox.width(), bbox.height());
        if w <= 2 * inset || h <= 2 * inset {
            break;
        }
        let rect = Rect::at((bbox.xmin + inset) as i32, (bbox.ymin + inset) as i32)
            .of_size(w - 2 * inset, h - 2 * inset);
        draw_hollow_rect_mut(frame, rect, color);
    }
}

/// Write `text` above the box, or just inside its top edge when the box
/// touches the top of the frame.
fn draw_label(frame: &mut RgbImage, bbox: &BoundingBox, text: &str, color: Rgb<u8>, font: &LabelFont) {
    let (_, text_h) = text_size(font.scale, &font.font, text);
    let y = if bbox.ymin >= text_h + LABEL_GAP {
        bbox.ymin - text_h - LABEL_GAP
    } else {
        bbox.ymin + BOX_THICKNESS + 1
    };
    draw_text_mut(frame, color, bbox.xmin as i32, y as i32, font.scale, &font.font, text);
}
