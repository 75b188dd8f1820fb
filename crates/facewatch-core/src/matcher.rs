//! Matching engine: per-face best-candidate selection over the gallery.

use crate::gallery::Gallery;
use crate::types::{DetectedFace, DistanceMetric, Embedding, FaceMatch, MatchRecord, Thresholds};

/// Produces a metric-specific score between two embeddings.
pub trait Scorer {
    fn score(&self, a: &Embedding, b: &Embedding, metric: DistanceMetric) -> f32;
}

/// SFace scoring: cosine similarity, or Euclidean distance between
/// unit-length embeddings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SfaceScorer;

impl Scorer for SfaceScorer {
    fn score(&self, a: &Embedding, b: &Embedding, metric: DistanceMetric) -> f32 {
        match metric {
            DistanceMetric::Cosine => a.similarity(b),
            DistanceMetric::L2 => a.normalized_l2(b),
        }
    }
}

/// Selects the best gallery candidate for each face.
#[derive(Debug, Clone, Default)]
pub struct Matcher<S = SfaceScorer> {
    scorer: S,
}

impl<S: Scorer> Matcher<S> {
    pub fn new(scorer: S) -> Self {
        Self { scorer }
    }

    /// Match one probe embedding against the gallery.
    ///
    /// Scans every entry in order. An entry becomes the running best only when
    /// it strictly improves on it in the metric's own direction, so ties keep
    /// the earliest entry. The accept decision is taken once, on the winner.
    pub fn match_face(
        &self,
        probe: &Embedding,
        gallery: &Gallery,
        metric: DistanceMetric,
        thresholds: &Thresholds,
    ) -> MatchRecord {
        let mut best_score = metric.initial_best();
        let mut best_idx: Option<usize> = None;

        for (i, target) in gallery.iter().enumerate() {
            let score = self.scorer.score(probe, target.embedding(), metric);
            if metric.improves(score, best_score) {
                best_score = score;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) => MatchRecord {
                name: gallery.as_slice()[idx].name().to_string(),
                confidence: best_score,
                matched: metric.accepts(best_score, thresholds),
            },
            None => MatchRecord::unmatched(),
        }
    }

    /// Match every face of a frame independently, keeping detection order.
    pub fn match_frame(
        &self,
        faces: &[DetectedFace],
        gallery: &Gallery,
        metric: DistanceMetric,
        thresholds: &Thresholds,
    ) -> Vec<FaceMatch> {
        faces
            .iter()
            .map(|face| FaceMatch {
                bbox: face.bbox.clone(),
                record: self.match_face(&face.embedding, gallery, metric, thresholds),
            })
            .collect()
    }
}
