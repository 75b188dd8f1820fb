use serde::{Deserialize, Serialize};
use std::fmt;

/// Name reported for a face that did not resolve to any gallery entry.
pub const UNMATCHED_NAME: &str = "?";

/// Borrowed grayscale image: `width * height` bytes, row-major.
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

impl<'a> ImageView<'a> {
    pub fn new(data: &'a [u8], width: u32, height: u32) -> Self {
        Self { data, width, height }
    }

    /// True when the buffer is large enough for the declared dimensions.
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() >= self.width as usize * self.height as usize
    }
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point landmarks in detector order:
    /// [right_eye, left_eye, nose_tip, right_mouth, left_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (128-dimensional for SFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy of this embedding scaled to unit length. A zero vector stays zero.
    pub fn normalized(&self) -> Embedding {
        let norm = self.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            Embedding::new(self.values.iter().map(|v| v / norm).collect())
        } else {
            self.clone()
        }
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
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
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Euclidean distance between the unit-length versions of both embeddings.
    /// Ranges over [0, 2]. Lower = more similar.
    pub fn normalized_l2(&self, other: &Embedding) -> f32 {
        let a = self.normalized();
        let b = other.normalized();
        a.values
            .iter()
            .zip(b.values.iter())
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Distance metric used to compare embeddings.
///
/// The two metrics point in opposite directions: a cosine score is a
/// similarity (larger wins), an L2 score is a distance (smaller wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceMetric {
    #[default]
    Cosine,
    L2,
}

impl DistanceMetric {
    /// Decode the numeric `distance_type` config value.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Cosine),
            1 => Some(Self::L2),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Cosine => 0,
            Self::L2 => 1,
        }
    }

    /// Whether `candidate` strictly beats `best` under this metric's direction.
    /// Equal scores never replace, so the first-seen entry keeps a tie.
    pub fn improves(self, candidate: f32, best: f32) -> bool {
        match self {
            Self::Cosine => candidate > best,
            Self::L2 => candidate < best,
        }
    }

    /// Bar a score must beat before any gallery entry can become the best.
    pub fn initial_best(self) -> f32 {
        match self {
            // The unmatched sentinel carries confidence 0.
            Self::Cosine => 0.0,
            Self::L2 => f32::INFINITY,
        }
    }

    /// Accept decision for a winning score.
    pub fn accepts(self, score: f32, thresholds: &Thresholds) -> bool {
        match self {
            Self::Cosine => score >= thresholds.cosine,
            Self::L2 => score <= thresholds.l2,
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cosine => f.write_str("cosine"),
            Self::L2 => f.write_str("l2"),
        }
    }
}

/// Per-metric accept thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Minimum cosine similarity for a match.
    pub cosine: f32,
    /// Maximum normalized L2 distance for a match.
    pub l2: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cosine: 0.363,
            l2: 1.128,
        }
    }
}

/// An enrolled identity: a name and its reference embedding.
///
/// Fields are private so a record cannot change after it is created.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRecord {
    name: String,
    embedding: Embedding,
}

impl TargetRecord {
    pub fn new(name: impl Into<String>, embedding: Embedding) -> Self {
        Self {
            name: name.into(),
            embedding,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }
}

/// A detector box paired with the embedding extracted from it.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Decision for one face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRecord {
    /// Gallery name of the best candidate, or [`UNMATCHED_NAME`].
    pub name: String,
    /// Score of the best candidate under the active metric; 0 when unmatched.
    pub confidence: f32,
    /// Whether the best candidate passed the metric's threshold.
    pub matched: bool,
}

impl MatchRecord {
    pub fn unmatched() -> Self {
        Self {
            name: UNMATCHED_NAME.to_string(),
            confidence: 0.0,
            matched: false,
        }
    }
}

/// A face's box together with its match decision, as handed to renderers.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub bbox: BoundingBox,
    pub record: MatchRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(&[1.0, 0.0, 0.0]);
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert_eq!(emb(&[1.0, 0.0]).similarity(&emb(&[0.0, 1.0])), 0.0);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        assert_eq!(emb(&[0.0, 0.0]).similarity(&emb(&[1.0, 0.0])), 0.0);
    }

    #[test]
    fn test_normalized_l2_ignores_scale() {
        let a = emb(&[3.0, 4.0]);
        let b = emb(&[0.6, 0.8]);
        assert!(a.normalized_l2(&b) < 1e-6);
    }

    #[test]
    fn test_normalized_l2_opposite() {
        let d = emb(&[1.0, 0.0]).normalized_l2(&emb(&[-2.0, 0.0]));
        assert!((d - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_metric_direction() {
        assert!(DistanceMetric::Cosine.improves(0.9, 0.5));
        assert!(!DistanceMetric::Cosine.improves(0.5, 0.5));
        assert!(DistanceMetric::L2.improves(0.2, 0.9));
        assert!(!DistanceMetric::L2.improves(0.9, 0.2));
        assert!(DistanceMetric::L2.improves(1.9, DistanceMetric::L2.initial_best()));
    }

    #[test]
    fn test_metric_accepts_threshold_inclusive() {
        let t = Thresholds::default();
        assert!(DistanceMetric::Cosine.accepts(0.363, &t));
        assert!(!DistanceMetric::Cosine.accepts(0.362, &t));
        assert!(DistanceMetric::L2.accepts(1.128, &t));
        assert!(!DistanceMetric::L2.accepts(1.129, &t));
    }

    #[test]
    fn test_metric_codes() {
        assert_eq!(DistanceMetric::from_code(0), Some(DistanceMetric::Cosine));
        assert_eq!(DistanceMetric::from_code(1), Some(DistanceMetric::L2));
        assert_eq!(DistanceMetric::from_code(2), None);
        assert_eq!(DistanceMetric::L2.code(), 1);
    }

    #[test]
    fn test_image_view_validity() {
        let data = vec![0u8; 12];
        assert!(ImageView::new(&data, 4, 3).is_valid());
        assert!(!ImageView::new(&data, 4, 4).is_valid());
        assert!(!ImageView::new(&data, 0, 3).is_valid());
    }
}
