//! Per-frame detect → crop → encode → match pipeline.

use crate::detector::{Detector, DetectorError};
use crate::matcher::{DistanceMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
use crate::recognizer::{Encoder, RecognizerError};
use crate::types::{BoundingBox, Detection, Embedding, Gallery, MatchResult, RawDetection};
use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_MIN_FACE_SIZE: u32 = 20;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),
}

/// Tunables for the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Detections scoring below this never reach the encoder.
    pub confidence_threshold: f32,
    /// Minimum box width and height in original-frame pixels.
    pub min_face_size: u32,
    /// Maximum encoding distance for a positive match.
    pub match_threshold: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(PipelineError::InvalidConfig(format!(
                "confidence threshold {} outside [0, 1]",
                self.confidence_threshold
            )));
        }
        if self.min_face_size == 0 {
            return Err(PipelineError::InvalidConfig("minimum face size must be at least 1".into()));
        }
        if !(self.match_threshold.is_finite() && self.match_threshold > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "match threshold {} must be positive",
                self.match_threshold
            )));
        }
        Ok(())
    }
}

/// Detection, encoding and matching for single frames.
///
/// Frames are RGB throughout; detectors that want another channel order
/// convert while building their input tensor.
pub struct FacePipeline<D, E, M = DistanceMatcher> {
    detector: D,
    encoder: E,
    matcher: M,
    config: PipelineConfig,
}

impl<D: Detector, E: Encoder> FacePipeline<D, E, DistanceMatcher> {
    pub fn new(detector: D, encoder: E, config: PipelineConfig) -> Result<Self, PipelineError> {
        Self::with_matcher(detector, encoder, DistanceMatcher, config)
    }
}

impl<D: Detector, E: Encoder, M: Matcher> FacePipeline<D, E, M> {
    pub fn with_matcher(
        detector: D,
        encoder: E,
        matcher: M,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            detector,
            encoder,
            matcher,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Find faces that pass the confidence and size filters, in detector order.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, PipelineError> {
        let (frame_w, frame_h) = frame.dimensions();
        if frame_w == 0 || frame_h == 0 {
            return Ok(Vec::new());
        }

        let (in_w, in_h) = self.detector.input_size();
        let resized = imageops::resize(frame, in_w, in_h, FilterType::Triangle);
        let raw = self.detector.detect(&resized)?;

        let detections = raw
            .iter()
            .filter(|d| d.confidence >= self.config.confidence_threshold)
            .map(|d| Detection {
                bbox: rescale(d, frame_w, frame_h),
                confidence: d.confidence,
            })
            .filter(|d| {
                d.bbox.width() >= self.config.min_face_size
                    && d.bbox.height() >= self.config.min_face_size
            })
            .collect::<Vec<_>>();

        tracing::trace!(raw = raw.len(), kept = detections.len(), "detections filtered");
        Ok(detections)
    }

    /// Detect faces and encode each one. Faces the encoder cannot encode
    /// are dropped.
    pub fn extract(&mut self, frame: &RgbImage) -> Result<Vec<(Detection, Embedding)>, PipelineError> {
        let detections = self.detect(frame)?;
        let mut encoded = Vec::with_capacity(detections.len());

        for detection in detections {
            let b = detection.bbox;
            let crop = imageops::crop_imm(frame, b.xmin, b.ymin, b.width(), b.height()).to_image();
            match self.encoder.encode(&crop)? {
                Some(embedding) => encoded.push((detection, embedding)),
                None => tracing::debug!(bbox = ?b, "no encoding for face; dropped"),
            }
        }

        Ok(encoded)
    }

    /// Run the full pipeline on one frame and resolve every encodable face
    /// against the gallery.
    pub fn recognize(
        &mut self,
        frame: &RgbImage,
        gallery: &Gallery,
    ) -> Result<Vec<MatchResult>, PipelineError> {
        let threshold = self.config.match_threshold;
        let results = self
            .extract(frame)?
            .into_iter()
            .map(|(detection, embedding)| MatchResult {
                identity: self.matcher.compare(&embedding, gallery, threshold),
                detection,
            })
            .collect();
        Ok(results)
    }

    /// Encode the most confident face in a reference photo.
    pub fn encode_reference(&mut self, image: &RgbImage) -> Result<Option<Embedding>, PipelineError> {
        let mut encoded = self.extract(image)?;
        encoded.sort_by(|a, b| {
            b.0.confidence
                .partial_cmp(&a.0.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(encoded.into_iter().next().map(|(_, embedding)| embedding))
    }
}

/// Map a normalized box back onto the original frame, clamped to its bounds.
fn rescale(d: &RawDetection, frame_w: u32, frame_h: u32) -> BoundingBox {
    let scale = |v: f32, extent: u32| -> u32 {
        let v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        ((v * extent as f32).round() as u32).min(extent)
    };
    BoundingBox {
        xmin: scale(d.xmin, frame_w),
        ymin: scale(d.ymin, frame_h),
        xmax: scale(d.xmax, frame_w),
        ymax: scale(d.ymax, frame_h),
    }
}
