//! rollcall-core: Face detection, encoding and gallery matching.
//!
//! An SSD-style detector and an ArcFace encoder run via ONNX Runtime; the
//! [`pipeline::FacePipeline`] ties them to a [`matcher::Matcher`] so each
//! video frame resolves to a list of known or unknown faces.

pub mod annotate;
pub mod detector;
pub mod gallery;
pub mod matcher;
pub mod pipeline;
pub mod recognizer;
pub mod types;

pub use detector::{Detector, DetectorConfig, FaceDetector};
pub use gallery::{gallery_sources_from_dir, load_gallery, GallerySource};
pub use matcher::{DistanceMatcher, Matcher};
pub use pipeline::{FacePipeline, PipelineConfig, PipelineError};
pub use recognizer::{Encoder, FaceRecognizer};
pub use types::{BoundingBox, Detection, Embedding, Gallery, Identity, IdentityMatch, MatchResult, RawDetection};
