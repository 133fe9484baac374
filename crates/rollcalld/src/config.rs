use rollcall_core::pipeline::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MIN_FACE_SIZE};
use rollcall_core::matcher::DEFAULT_MATCH_THRESHOLD;
use rollcall_core::{DetectorConfig, GallerySource, PipelineConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("model file not found: {0}")]
    ModelMissing(String),
    #[error("gallery: {0}")]
    Gallery(#[from] rollcall_core::gallery::GalleryError),
    #[error("failed to read gallery manifest {path}: {reason}")]
    Manifest { path: String, reason: String },
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub detector_model: String,
    pub encoder_model: String,
    pub detector_input_width: u32,
    pub detector_input_height: u32,
    /// Directory of `<student>.jpg` reference photos.
    pub gallery_dir: PathBuf,
    /// Optional TOML manifest listing students and photos; overrides `gallery_dir`.
    pub gallery_manifest: Option<PathBuf>,
    /// Path to the SQLite attendance database.
    pub db_path: PathBuf,
    pub confidence_threshold: f32,
    pub min_face_size: u32,
    /// Maximum encoding distance for a positive match.
    pub match_threshold: f32,
    /// Run detection on every Nth captured frame.
    pub frame_skip: u32,
    /// Consecutive pipeline/store failures tolerated before the loop stops.
    pub max_consecutive_errors: u32,
    /// Number of warmup frames to discard at startup (camera AE stabilization).
    pub warmup_frames: usize,
    /// Where to write the latest annotated frame as JPEG, if anywhere.
    pub preview_path: Option<PathBuf>,
    /// TrueType font for preview name labels; system fonts are tried if unset.
    pub label_font: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = rollcall_store::default_data_dir();

        let detector = DetectorConfig::default();

        Self {
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            capture_width: env_parse("ROLLCALL_CAPTURE_WIDTH", 640),
            capture_height: env_parse("ROLLCALL_CAPTURE_HEIGHT", 480),
            model_dir: env_path("ROLLCALL_MODEL_DIR").unwrap_or_else(|| data_dir.join("models")),
            detector_model: std::env::var("ROLLCALL_DETECTOR_MODEL")
                .unwrap_or_else(|_| "face-detection-adas-0001.onnx".to_string()),
            encoder_model: std::env::var("ROLLCALL_ENCODER_MODEL")
                .unwrap_or_else(|_| "w600k_r50.onnx".to_string()),
            detector_input_width: env_parse("ROLLCALL_DETECTOR_INPUT_WIDTH", detector.input_width),
            detector_input_height: env_parse("ROLLCALL_DETECTOR_INPUT_HEIGHT", detector.input_height),
            gallery_dir: env_path("ROLLCALL_GALLERY_DIR")
                .unwrap_or_else(|| data_dir.join("student_images_saved")),
            gallery_manifest: env_path("ROLLCALL_GALLERY_MANIFEST"),
            db_path: env_path("ROLLCALL_DB_PATH").unwrap_or_else(|| data_dir.join(rollcall_store::DB_FILE_NAME)),
            confidence_threshold: env_parse("ROLLCALL_CONFIDENCE_THRESHOLD", DEFAULT_CONFIDENCE_THRESHOLD),
            min_face_size: env_parse("ROLLCALL_MIN_FACE_SIZE", DEFAULT_MIN_FACE_SIZE),
            match_threshold: env_parse("ROLLCALL_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            frame_skip: env_parse("ROLLCALL_FRAME_SKIP", 3),
            max_consecutive_errors: env_parse("ROLLCALL_MAX_CONSECUTIVE_ERRORS", 5),
            warmup_frames: env_parse("ROLLCALL_WARMUP_FRAMES", 4),
            preview_path: env_path("ROLLCALL_PREVIEW_PATH"),
            label_font: env_path("ROLLCALL_LABEL_FONT"),
        }
    }

    /// Reject settings that would make the loop misbehave. Runs before any
    /// device or model is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_skip == 0 {
            return Err(invalid("ROLLCALL_FRAME_SKIP", "must be at least 1"));
        }
        if self.max_consecutive_errors == 0 {
            return Err(invalid("ROLLCALL_MAX_CONSECUTIVE_ERRORS", "must be at least 1"));
        }
        if self.capture_width == 0 || self.capture_height == 0 {
            return Err(invalid("ROLLCALL_CAPTURE_WIDTH/HEIGHT", "must be non-zero"));
        }
        if self.detector_input_width == 0 || self.detector_input_height == 0 {
            return Err(invalid("ROLLCALL_DETECTOR_INPUT_WIDTH/HEIGHT", "must be non-zero"));
        }
        self.pipeline_config()
            .validate()
            .map_err(|e| invalid("pipeline", &e.to_string()))?;

        for path in [self.detector_model_path(), self.encoder_model_path()] {
            if !Path::new(&path).exists() {
                return Err(ConfigError::ModelMissing(path));
            }
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            confidence_threshold: self.confidence_threshold,
            min_face_size: self.min_face_size,
            match_threshold: self.match_threshold,
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            input_width: self.detector_input_width,
            input_height: self.detector_input_height,
            ..DetectorConfig::default()
        }
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(&self.detector_model)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace encoder model.
    pub fn encoder_model_path(&self) -> String {
        self.model_dir
            .join(&self.encoder_model)
            .to_string_lossy()
            .into_owned()
    }

    /// Resolve the gallery: the manifest when configured, else the photo directory.
    pub fn gallery_sources(&self) -> Result<Vec<GallerySource>, ConfigError> {
        match &self.gallery_manifest {
            Some(path) => load_manifest(path),
            None => Ok(rollcall_core::gallery_sources_from_dir(&self.gallery_dir)?),
        }
    }
}

/// `[[student]]` entries of a gallery manifest, in file order.
#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    student: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    name: String,
    photo: PathBuf,
}

/// Parse a gallery manifest. Relative photo paths resolve against the
/// manifest's directory.
fn load_manifest(path: &Path) -> Result<Vec<GallerySource>, ConfigError> {
    let manifest_err = |reason: String| ConfigError::Manifest {
        path: path.display().to_string(),
        reason,
    };
    let text = std::fs::read_to_string(path).map_err(|e| manifest_err(e.to_string()))?;
    parse_manifest(&text, path.parent().unwrap_or_else(|| Path::new(".")))
        .map_err(manifest_err)
}

fn parse_manifest(text: &str, base: &Path) -> Result<Vec<GallerySource>, String> {
    let manifest: Manifest = toml::from_str(text).map_err(|e| e.to_string())?;
    Ok(manifest
        .student
        .into_iter()
        .map(|entry| GallerySource {
            name: entry.name,
            path: if entry.photo.is_absolute() {
                entry.photo
            } else {
                base.join(entry.photo)
            },
        })
        .collect())
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_with_models() -> (Config, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::from_env();
        config.model_dir = dir.path().to_path_buf();
        config.detector_model = "det.onnx".into();
        config.encoder_model = "enc.onnx".into();
        std::fs::write(dir.path().join("det.onnx"), b"").unwrap();
        std::fs::write(dir.path().join("enc.onnx"), b"").unwrap();
        (config, dir)
    }

    #[test]
    fn test_validate_accepts_defaults_with_models() {
        let (mut config, _dir) = config_with_models();
        config.frame_skip = 3;
        config.max_consecutive_errors = 5;
        config.confidence_threshold = 0.5;
        config.min_face_size = 20;
        config.match_threshold = 1.1;
        config.capture_width = 640;
        config.capture_height = 480;
        config.detector_input_width = 672;
        config.detector_input_height = 384;
        assert!(config.validate().is_ok());

        config.frame_skip = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
        config.frame_skip = 3;
        config.confidence_threshold = 2.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_validate_reports_missing_model() {
        let (mut config, _dir) = config_with_models();
        config.frame_skip = 3;
        config.max_consecutive_errors = 5;
        config.confidence_threshold = 0.5;
        config.min_face_size = 20;
        config.match_threshold = 1.1;
        config.capture_width = 640;
        config.capture_height = 480;
        config.detector_input_width = 672;
        config.detector_input_height = 384;
        config.encoder_model = "missing.onnx".into();
        assert!(matches!(config.validate(), Err(ConfigError::ModelMissing(_))));
    }

    #[test]
    fn test_parse_manifest_keeps_order_and_resolves_paths() {
        let text = r#"
            [[student]]
            name = "Zoe"
            photo = "zoe.jpg"

            [[student]]
            name = "Adam"
            photo = "/srv/photos/adam.png"
        "#;
        let sources = parse_manifest(text, Path::new("/etc/rollcall")).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].name, "Zoe");
        assert_eq!(sources[0].path, PathBuf::from("/etc/rollcall/zoe.jpg"));
        assert_eq!(sources[1].path, PathBuf::from("/srv/photos/adam.png"));
    }

    #[test]
    fn test_load_manifest_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("class.toml");
        std::fs::write(&path, "[[student]]\nname = \"Alice\"\nphoto = \"alice.jpg\"\n").unwrap();

        let sources = load_manifest(&path).unwrap();
        assert_eq!(sources[0].path, dir.path().join("alice.jpg"));
        assert!(matches!(
            load_manifest(&dir.path().join("missing.toml")),
            Err(ConfigError::Manifest { .. })
        ));
    }

    #[test]
    fn test_parse_manifest_rejects_garbage() {
        assert!(parse_manifest("[[student]]\nname = 3", Path::new(".")).is_err());
        assert!(parse_manifest("", Path::new(".")).unwrap().is_empty());
    }
}
