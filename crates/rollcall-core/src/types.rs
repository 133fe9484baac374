use serde::{Deserialize, Serialize};

/// Axis-aligned face box in pixel coordinates of the original frame.
///
/// `xmax`/`ymax` are exclusive, so `width() == xmax - xmin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: u32,
    pub ymin: u32,
    pub xmax: u32,
    pub ymax: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.xmax.saturating_sub(self.xmin)
    }

    pub fn height(&self) -> u32 {
        self.ymax.saturating_sub(self.ymin)
    }
}

/// A face found in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Detector score in [0, 1].
    pub confidence: f32,
}

/// Detector output before rescaling: coordinates are normalized to [0, 1]
/// relative to the detector's input image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub confidence: f32,
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

/// Face encoding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A known student and the reference encoding computed from their photo.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name: String,
    pub encoding: Embedding,
}

/// The known-identity set for one session.
///
/// Entries keep insertion order, which is the tie-break order for matching.
/// Names are unique and case-sensitive.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    identities: Vec<Identity>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an identity. Returns `false` (and keeps the existing entry)
    /// if the name is already present.
    pub fn insert(&mut self, name: impl Into<String>, encoding: Embedding) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.identities.push(Identity { name, encoding });
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.identities.iter().any(|i| i.name == name)
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(|i| i.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// Outcome of comparing one candidate encoding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityMatch {
    Known { name: String, distance: f32 },
    Unknown,
}

impl IdentityMatch {
    pub fn name(&self) -> Option<&str> {
        match self {
            IdentityMatch::Known { name, .. } => Some(name),
            IdentityMatch::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, IdentityMatch::Known { .. })
    }
}

/// A resolved detection, consumed by the attendance gate and frame annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub identity: IdentityMatch,
    pub detection: Detection,
}

impl MatchResult {
    /// Display label: the student's name or "Unknown".
    pub fn label(&self) -> &str {
        self.identity.name().unwrap_or("Unknown")
    }
}
