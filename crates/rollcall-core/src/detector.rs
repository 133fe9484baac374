//! SSD-style face detector via ONNX Runtime.
//!
//! Targets the `face-detection-adas` family of models: a single output of
//! shape `[1, 1, N, 7]` where each row is
//! `[image_id, label, confidence, xmin, ymin, xmax, ymax]` with box
//! coordinates normalized to the network input.

use crate::types::RawDetection;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SSD_DEFAULT_INPUT_WIDTH: u32 = 672;
const SSD_DEFAULT_INPUT_HEIGHT: u32 = 384;
const SSD_ROW_LEN: usize = 7;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("input is {got_w}x{got_h}, detector expects {want_w}x{want_h}")]
    InputSizeMismatch {
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A face detector operating on an image already resized to [`Detector::input_size`].
pub trait Detector {
    /// Fixed (width, height) the detector expects.
    fn input_size(&self) -> (u32, u32);

    /// Run inference. Returned boxes are normalized to the input image.
    fn detect(&mut self, resized: &RgbImage) -> Result<Vec<RawDetection>, DetectorError>;
}

/// Runtime parameters for [`FaceDetector`].
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    pub input_width: u32,
    pub input_height: u32,
    pub intra_threads: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: SSD_DEFAULT_INPUT_WIDTH,
            input_height: SSD_DEFAULT_INPUT_HEIGHT,
            intra_threads: 2,
        }
    }
}

/// ONNX face detector.
pub struct FaceDetector {
    session: Session,
    config: DetectorConfig,
}

impl FaceDetector {
    /// Load the detector model from the given path.
    pub fn load(model_path: &str, config: DetectorConfig) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(config.intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            input_width = config.input_width,
            input_height = config.input_height,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face detection model"
        );

        Ok(Self { session, config })
    }

    /// Pack an RGB image into a NCHW tensor in BGR channel order, raw 0..255.
    fn preprocess(image: &RgbImage) -> Array4<f32> {
        let (w, h) = image.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));

        for (x, y, pixel) in image.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            let (x, y) = (x as usize, y as usize);
            tensor[[0, 0, y, x]] = b as f32;
            tensor[[0, 1, y, x]] = g as f32;
            tensor[[0, 2, y, x]] = r as f32;
        }

        tensor
    }
}

impl Detector for FaceDetector {
    fn input_size(&self) -> (u32, u32) {
        (self.config.input_width, self.config.input_height)
    }

    fn detect(&mut self, resized: &RgbImage) -> Result<Vec<RawDetection>, DetectorError> {
        let (want_w, want_h) = self.input_size();
        let (got_w, got_h) = resized.dimensions();
        if (got_w, got_h) != (want_w, want_h) {
            return Err(DetectorError::InputSizeMismatch {
                got_w,
                got_h,
                want_w,
                want_h,
            });
        }

        let input = Self::preprocess(resized);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, rows) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("detection output: {e}")))?;

        decode_rows(rows)
    }
}

/// Decode a flat `[N, 7]` detection buffer.
///
/// Rows after the first negative `image_id` are padding and are ignored.
fn decode_rows(rows: &[f32]) -> Result<Vec<RawDetection>, DetectorError> {
    if rows.len() % SSD_ROW_LEN != 0 {
        return Err(DetectorError::InferenceFailed(format!(
            "detection output length {} is not a multiple of {SSD_ROW_LEN}",
            rows.len()
        )));
    }

    let detections = rows
        .chunks_exact(SSD_ROW_LEN)
        .take_while(|row| row[0] >= 0.0)
        .map(|row| RawDetection {
            confidence: row[2],
            xmin: row[3],
            ymin: row[4],
            xmax: row[5],
            ymax: row[6],
        })
        .collect();

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rows_stops_at_terminator() {
        let rows = vec![
            0.0, 1.0, 0.9, 0.1, 0.2, 0.3, 0.4, //
            0.0, 1.0, 0.3, 0.5, 0.5, 0.6, 0.6, //
            -1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.99, 0.0, 0.0, 1.0, 1.0,
        ];
        let dets = decode_rows(&rows).unwrap();
        assert_eq!(dets.len(), 2);
        assert!((dets[0].confidence - 0.9).abs() < 1e-6);
        assert!((dets[0].xmin - 0.1).abs() < 1e-6);
        assert!((dets[0].ymax - 0.4).abs() < 1e-6);
        assert!((dets[1].confidence - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_decode_rows_empty() {
        assert!(decode_rows(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rows_rejects_ragged_output() {
        let result = decode_rows(&[0.0, 1.0, 0.9]);
        assert!(matches!(result, Err(DetectorError::InferenceFailed(_))));
    }

    #[test]
    fn test_preprocess_is_bgr_nchw() {
        let mut image = RgbImage::new(4, 2);
        image.put_pixel(3, 1, image::Rgb([10, 20, 30]));

        let tensor = FaceDetector::preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 2, 4]);
        assert_eq!(tensor[[0, 0, 1, 3]], 30.0);
        assert_eq!(tensor[[0, 1, 1, 3]], 20.0);
        assert_eq!(tensor[[0, 2, 1, 3]], 10.0);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
    }

    #[test]
    fn test_default_input_size() {
        let config = DetectorConfig::default();
        assert_eq!((config.input_width, config.input_height), (672, 384));
    }
}
