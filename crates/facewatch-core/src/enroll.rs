//! Gallery bootstrap from a directory of enrollment images.
//!
//! Every file in the directory is one candidate identity, named after the
//! file's base name. Each image gets one detection pass capped at a single
//! face; images that do not yield an embedding are skipped, never fatal.

use crate::detector::{DetectParams, DetectorError, FaceDetector};
use crate::pipeline::{ExtractionFailure, FacePipeline};
use crate::recognizer::FeatureExtractor;
use crate::types::{ImageView, TargetRecord};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("cannot read targets directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single enrollment image produced no target.
#[derive(Error, Debug)]
pub enum SkipReason {
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Extraction(#[from] ExtractionFailure),
}

#[derive(Debug)]
pub struct SkippedImage {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// Outcome of a bootstrap run.
#[derive(Debug, Default)]
pub struct EnrollReport {
    /// Enrolled targets in directory order.
    pub targets: Vec<TargetRecord>,
    pub skipped: Vec<SkippedImage>,
}

/// Target name for an enrollment file: its base name without extension.
pub fn target_name(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

impl<D: FaceDetector, E: FeatureExtractor> FacePipeline<D, E> {
    /// Enroll one decoded image under `name`, keeping the first detected face.
    pub fn enroll_image(
        &mut self,
        name: &str,
        image: &ImageView<'_>,
        params: DetectParams,
    ) -> Result<TargetRecord, SkipReason> {
        let outcomes = self.detect_with(image, DetectParams { max_faces: 1, ..params })?;
        let first = outcomes.into_iter().next().ok_or(SkipReason::NoFaceDetected)?;
        let face = first?;
        Ok(TargetRecord::new(name, face.embedding))
    }
}

/// Enroll every file in `dir`, in path order.
///
/// `params` supplies the detector thresholds; input size and face cap are
/// set per image.
pub fn bootstrap_gallery<D, E>(
    pipeline: &mut FacePipeline<D, E>,
    dir: &Path,
    params: DetectParams,
) -> Result<EnrollReport, EnrollError>
where
    D: FaceDetector,
    E: FeatureExtractor,
{
    let io_err = |source| EnrollError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut report = EnrollReport::default();
    for path in paths {
        let Some(name) = target_name(&path) else {
            continue;
        };

        let result = image::open(&path)
            .map_err(SkipReason::from)
            .and_then(|img| {
                let gray = img.to_luma8();
                let view = ImageView::new(gray.as_raw(), gray.width(), gray.height());
                pipeline.enroll_image(&name, &view, params)
            });

        match result {
            Ok(target) => {
                tracing::info!(name = %name, path = %path.display(), "enrolled target");
                report.targets.push(target);
            }
            Err(reason) => {
                tracing::warn!(
                    path = %path.display(),
                    reason = %reason,
                    "skipping enrollment image"
                );
                report.skipped.push(SkippedImage { path, reason });
            }
        }
    }

    tracing::info!(
        dir = %dir.display(),
        enrolled = report.targets.len(),
        skipped = report.skipped.len(),
        "gallery bootstrap finished"
    );

    Ok(report)
}
