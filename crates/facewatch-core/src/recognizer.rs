//! SFace face recognizer via ONNX Runtime.
//!
//! Extracts 128-dimensional embeddings from faces aligned to 112×112.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::session::{session_builder, BackendTarget};
use crate::types::{BoundingBox, Embedding, ImageView};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SFACE_EMBEDDING_DIM: usize = 128;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; alignment needs the five detector keypoints")]
    NoLandmarks,
    #[error("face landmarks are degenerate; cannot align")]
    DegenerateLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Produces an identity embedding for one detected face.
pub trait FeatureExtractor {
    fn extract(
        &mut self,
        image: &ImageView<'_>,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError>;
}

/// SFace-based face recognizer.
pub struct SFaceRecognizer {
    session: Session,
}

impl SFaceRecognizer {
    /// Load the SFace ONNX model from the given path.
    pub fn load(model_path: &str, backend: BackendTarget) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = session_builder(backend)?.commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            backend = ?backend,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded SFace model"
        );

        Ok(Self { session })
    }

    /// 112×112 grayscale crop → NCHW tensor of raw 0–255 values.
    fn preprocess(aligned_face: &[u8]) -> Array4<f32> {
        let size = ALIGNED_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (i, &pixel) in aligned_face.iter().take(size * size).enumerate() {
            let (y, x) = (i / size, i % size);
            let value = pixel as f32;
            tensor[[0, 0, y, x]] = value;
            tensor[[0, 1, y, x]] = value;
            tensor[[0, 2, y, x]] = value;
        }

        tensor
    }
}

impl FeatureExtractor for SFaceRecognizer {
    fn extract(
        &mut self,
        image: &ImageView<'_>,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let aligned = alignment::align_face(image, landmarks)
            .ok_or(RecognizerError::DegenerateLandmarks)?;
        let input = Self::preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != SFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {SFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(raw.to_vec()).normalized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shape_and_values() {
        let mut aligned = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];
        aligned[ALIGNED_SIZE + 2] = 77;
        let tensor = SFaceRecognizer::preprocess(&aligned);
        assert_eq!(tensor.shape(), &[1, 3, ALIGNED_SIZE, ALIGNED_SIZE]);
        for c in 0..3 {
            assert_eq!(tensor[[0, c, 1, 2]], 77.0);
            assert_eq!(tensor[[0, c, 0, 0]], 0.0);
        }
    }

    #[test]
    fn test_preprocess_short_crop_leaves_zeros() {
        let tensor = SFaceRecognizer::preprocess(&[255u8; 10]);
        assert_eq!(tensor[[0, 0, 0, 9]], 255.0);
        assert_eq!(tensor[[0, 0, 0, 10]], 0.0);
    }
}
