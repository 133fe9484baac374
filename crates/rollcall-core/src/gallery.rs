//! Builds the known-student gallery from reference photos.

use crate::detector::Detector;
use crate::matcher::Matcher;
use crate::pipeline::FacePipeline;
use crate::recognizer::Encoder;
use crate::types::Gallery;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery directory not found: {0}")]
    DirectoryNotFound(String),
    #[error("failed to read gallery directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One gallery entry: student name and the photo to encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GallerySource {
    pub name: String,
    pub path: PathBuf,
}

/// List `<name>.<jpg|jpeg|png>` photos in `dir`, ordered by name.
pub fn gallery_sources_from_dir(dir: &Path) -> Result<Vec<GallerySource>, GalleryError> {
    if !dir.is_dir() {
        return Err(GalleryError::DirectoryNotFound(dir.display().to_string()));
    }

    let io_err = |source| GalleryError::Io {
        path: dir.display().to_string(),
        source,
    };

    let mut sources = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if !path.is_file() {
            continue;
        }
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if is_image && !name.is_empty() {
            sources.push(GallerySource {
                name: name.to_string(),
                path,
            });
        }
    }

    sources.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
    Ok(sources)
}

/// Encode every source photo into a gallery.
///
/// Entries whose photo cannot be read, has no encodable face, or repeats
/// an earlier name are logged and left out; the rest still load.
pub fn load_gallery<D, E, M>(pipeline: &mut FacePipeline<D, E, M>, sources: &[GallerySource]) -> Gallery
where
    D: Detector,
    E: Encoder,
    M: Matcher,
{
    let mut gallery = Gallery::new();

    for source in sources {
        if gallery.contains(&source.name) {
            tracing::warn!(name = %source.name, path = %source.path.display(), "duplicate student name; skipped");
            continue;
        }

        let image = match image::open(&source.path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                tracing::warn!(name = %source.name, path = %source.path.display(), error = %e, "cannot read photo; skipped");
                continue;
            }
        };

        match pipeline.encode_reference(&image) {
            Ok(Some(encoding)) => {
                tracing::debug!(name = %source.name, dim = encoding.dim(), "reference encoded");
                gallery.insert(source.name.clone(), encoding);
            }
            Ok(None) => {
                tracing::warn!(name = %source.name, path = %source.path.display(), "no face found in photo; skipped");
            }
            Err(e) => {
                tracing::warn!(name = %source.name, path = %source.path.display(), error = %e, "encoding photo failed; skipped");
            }
        }
    }

    if gallery.is_empty() {
        tracing::error!(
            sources = sources.len(),
            "gallery is empty; every face will be reported as Unknown"
        );
    } else {
        tracing::info!(loaded = gallery.len(), sources = sources.len(), "gallery loaded");
    }

    gallery
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;
    use crate::pipeline::PipelineConfig;
    use crate::recognizer::RecognizerError;
    use crate::types::{Embedding, RawDetection};
    use image::RgbImage;
    use tempfile::TempDir;

    /// Reports one centered face whenever the image is not entirely black.
    struct CenterDetector;

    impl Detector for CenterDetector {
        fn input_size(&self) -> (u32, u32) {
            (64, 64)
        }

        fn detect(&mut self, resized: &RgbImage) -> Result<Vec<RawDetection>, DetectorError> {
            if resized.pixels().all(|p| p.0 == [0, 0, 0]) {
                return Ok(vec![]);
            }
            Ok(vec![RawDetection { confidence: 0.9, xmin: 0.25, ymin: 0.25, xmax: 0.75, ymax: 0.75 }])
        }
    }

    /// Encodes the mean color of the crop.
    struct ColorEncoder;

    impl Encoder for ColorEncoder {
        fn encode(&mut self, face: &RgbImage) -> Result<Option<Embedding>, RecognizerError> {
            let n = (face.width() * face.height()) as f32;
            let mut sum = [0.0f32; 3];
            for p in face.pixels() {
                for c in 0..3 {
                    sum[c] += p.0[c] as f32;
                }
            }
            Ok(Some(Embedding::new(sum.iter().map(|s| s / n / 255.0).collect())))
        }
    }

    fn save_photo(dir: &Path, file: &str, color: [u8; 3]) {
        RgbImage::from_pixel(80, 80, image::Rgb(color)).save(dir.join(file)).unwrap();
    }

    fn pipeline() -> FacePipeline<CenterDetector, ColorEncoder> {
        FacePipeline::new(CenterDetector, ColorEncoder, PipelineConfig::default()).unwrap()
    }

    #[test]
    fn test_sources_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        save_photo(dir, "Zoe.png", [10, 10, 10]);
        save_photo(dir, "Adam.jpg", [10, 10, 10]);
        std::fs::write(dir.join("notes.txt"), "not a photo").unwrap();
        std::fs::create_dir(dir.join("Nested.png")).unwrap();

        let sources = gallery_sources_from_dir(dir).unwrap();
        let names: Vec<_> = sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Adam", "Zoe"]);
    }

    #[test]
    fn test_missing_directory_is_error() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("missing");
        assert!(matches!(
            gallery_sources_from_dir(&dir),
            Err(GalleryError::DirectoryNotFound(_))
        ));
    }

    #[test]
    fn test_bad_entries_skipped_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        save_photo(dir, "Alice.png", [255, 0, 0]);
        save_photo(dir, "Blank.png", [0, 0, 0]);
        std::fs::write(dir.join("Broken.png"), b"not a png").unwrap();

        let mut sources = gallery_sources_from_dir(dir).unwrap();
        sources.push(GallerySource {
            name: "Alice".into(),
            path: dir.join("Blank.png"),
        });
        sources.push(GallerySource {
            name: "Ghost".into(),
            path: dir.join("Ghost.png"),
        });

        let gallery = load_gallery(&mut pipeline(), &sources);
        let names: Vec<_> = gallery.names().collect();
        assert_eq!(names, vec!["Alice"]);
        assert!((gallery.identities()[0].encoding.values[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_gallery_is_returned() {
        let gallery = load_gallery(&mut pipeline(), &[]);
        assert!(gallery.is_empty());
    }
}
