//! Detection/extraction orchestration for one image.

use crate::detector::{DetectParams, DetectorError, FaceDetector};
use crate::recognizer::{FeatureExtractor, RecognizerError};
use crate::types::{BoundingBox, DetectedFace, ImageView};
use thiserror::Error;

/// A detected face whose embedding could not be extracted.
#[derive(Error, Debug)]
#[error("extraction failed for face at ({:.0}, {:.0}): {source}", .bbox.x, .bbox.y)]
pub struct ExtractionFailure {
    pub bbox: BoundingBox,
    #[source]
    pub source: RecognizerError,
}

/// Per-face outcome, index-aligned with the detector's output.
pub type FaceOutcome = Result<DetectedFace, ExtractionFailure>;

/// Detector + extractor pair driven once per image.
pub struct FacePipeline<D, E> {
    detector: D,
    extractor: E,
}

impl<D: FaceDetector, E: FeatureExtractor> FacePipeline<D, E> {
    pub fn new(detector: D, extractor: E) -> Self {
        Self { detector, extractor }
    }

    /// Detect up to `max_faces` faces with default detector thresholds.
    pub fn detect_frame(
        &mut self,
        image: &ImageView<'_>,
        max_faces: usize,
    ) -> Result<Vec<FaceOutcome>, DetectorError> {
        self.detect_with(image, DetectParams::for_image(image, max_faces))
    }

    /// Run detection once, then extraction for every returned box.
    ///
    /// The input size always follows `image`. A failed extraction only
    /// affects its own entry.
    pub fn detect_with(
        &mut self,
        image: &ImageView<'_>,
        params: DetectParams,
    ) -> Result<Vec<FaceOutcome>, DetectorError> {
        let params = DetectParams {
            input_width: image.width,
            input_height: image.height,
            ..params
        };
        let boxes = self.detector.detect(image, &params)?;

        Ok(boxes
            .into_iter()
            .map(|bbox| match self.extractor.extract(image, &bbox) {
                Ok(embedding) => Ok(DetectedFace { bbox, embedding }),
                Err(source) => Err(ExtractionFailure { bbox, source }),
            })
            .collect())
    }
}

/// Split outcomes into matchable faces, logging and dropping failures.
pub fn matchable_faces(outcomes: Vec<FaceOutcome>) -> Vec<DetectedFace> {
    outcomes
        .into_iter()
        .filter_map(|outcome| match outcome {
            Ok(face) => Some(face),
            Err(failure) => {
                tracing::warn!(error = %failure, "dropping face without embedding");
                None
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use crate::types::Embedding;

    /// Returns a fixed list of boxes and records every params it was given.
    pub struct FixedDetector {
        pub boxes: Vec<BoundingBox>,
        pub calls: Vec<DetectParams>,
    }

    impl FixedDetector {
        pub fn new(boxes: Vec<BoundingBox>) -> Self {
            Self { boxes, calls: Vec::new() }
        }
    }

    impl FaceDetector for FixedDetector {
        fn detect(
            &mut self,
            _image: &ImageView<'_>,
            params: &DetectParams,
        ) -> Result<Vec<BoundingBox>, DetectorError> {
            self.calls.push(*params);
            Ok(self.boxes.iter().take(params.max_faces).cloned().collect())
        }
    }

    /// Embeds a face as `[x, y]` of its box; boxes without landmarks fail.
    pub struct BoxExtractor;

    impl FeatureExtractor for BoxExtractor {
        fn extract(
            &mut self,
            _image: &ImageView<'_>,
            face: &BoundingBox,
        ) -> Result<Embedding, RecognizerError> {
            face.landmarks.ok_or(RecognizerError::NoLandmarks)?;
            Ok(Embedding::new(vec![face.x, face.y]))
        }
    }

    pub fn face_box(x: f32, y: f32, with_landmarks: bool) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: 40.0,
            height: 40.0,
            confidence: 0.9,
            landmarks: with_landmarks.then_some([(x, y); 5]),
        }
    }
}
