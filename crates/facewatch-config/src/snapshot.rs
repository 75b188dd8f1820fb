//! Immutable, fully populated set of tunables.

use facewatch_core::{BackendTarget, DetectParams, DistanceMetric, Thresholds};
use std::path::{Path, PathBuf};

/// Largest `zoom` the loader accepts.
pub const MAX_ZOOM: f32 = 8.0;

/// Where frames come from (`cap_or_video`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    #[default]
    Camera,
    Video,
}

impl CaptureMode {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Camera),
            1 => Some(Self::Video),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Camera => 0,
            Self::Video => 1,
        }
    }
}

/// One consistent view of every config key.
///
/// Snapshots are never modified after publication; a reload builds a new
/// one and swaps it in whole.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    /// Publication counter assigned by the store. Loader output carries 0.
    pub version: u64,
    /// Render match results every frame.
    pub debug: bool,
    pub capture_mode: CaptureMode,
    pub cap_index: u32,
    pub video_name: String,
    /// Frame scale factor applied before detection.
    pub zoom: f32,
    pub backend_target: BackendTarget,
    pub detection_onnx: String,
    pub sface_onnx: String,
    pub detect_threshold: f32,
    pub nms_threshold: f32,
    /// Maximum faces per frame.
    pub top_k: usize,
    pub distance: DistanceMetric,
    pub cosine_threshold: f32,
    pub norml2_threshold: f32,
    pub targets_dir_name: String,
    pub draw_face_points: bool,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        let thresholds = Thresholds::default();
        Self {
            version: 0,
            debug: true,
            capture_mode: CaptureMode::Camera,
            cap_index: 0,
            video_name: "face_test.mp4".to_string(),
            zoom: 1.0,
            backend_target: BackendTarget::Cpu,
            detection_onnx: "face_detection_yunet_2023mar.onnx".to_string(),
            sface_onnx: "face_recognition_sface_2021dec.onnx".to_string(),
            detect_threshold: facewatch_core::detector::DEFAULT_SCORE_THRESHOLD,
            nms_threshold: facewatch_core::detector::DEFAULT_NMS_THRESHOLD,
            top_k: 5000,
            distance: DistanceMetric::Cosine,
            cosine_threshold: thresholds.cosine,
            norml2_threshold: thresholds.l2,
            targets_dir_name: "targets".to_string(),
            draw_face_points: true,
        }
    }
}

impl ConfigSnapshot {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            cosine: self.cosine_threshold,
            l2: self.norml2_threshold,
        }
    }

    /// Detector parameters for a live frame. The pipeline fills in the
    /// input size from the frame itself.
    pub fn detect_params(&self) -> DetectParams {
        DetectParams {
            max_faces: self.top_k,
            ..DetectParams::default()
        }
        .with_thresholds(self.detect_threshold, self.nms_threshold)
    }

    pub fn detection_model_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.detection_onnx)
    }

    pub fn sface_model_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.sface_onnx)
    }

    pub fn targets_dir(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.targets_dir_name)
    }

    pub fn video_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.video_name)
    }
}
