//! YuNet face detector via ONNX Runtime.
//!
//! YuNet is anchor-free: each stride (8, 16, 32) predicts a class score, an
//! objectness score, a box and five landmarks per grid cell. The network
//! accepts any input whose sides are multiples of 32, so frames are padded
//! on the bottom/right rather than resized and coordinates need no mapping.

use crate::session::{session_builder, BackendTarget};
use crate::types::{BoundingBox, ImageView};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const YUNET_STRIDES: [usize; 3] = [8, 16, 32];
const YUNET_INPUT_ALIGN: u32 = 32;
const YUNET_NUM_OUTPUTS: usize = 12;

pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.8;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.3;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("image buffer does not match {width}x{height}")]
    InvalidImage { width: u32, height: u32 },
    #[error("input size {expected:?} does not match image size {actual:?}")]
    InputSizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Per-call detector settings. Nothing is stored on the detector between
/// calls, so enrollment and live frames cannot leak settings into each other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    pub input_width: u32,
    pub input_height: u32,
    /// Cap on candidates kept before suppression, and thus on returned faces.
    pub max_faces: usize,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            input_width: 0,
            input_height: 0,
            max_faces: 1,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        }
    }
}

impl DetectParams {
    /// Params sized to `image` with the default thresholds.
    pub fn for_image(image: &ImageView<'_>, max_faces: usize) -> Self {
        Self {
            input_width: image.width,
            input_height: image.height,
            max_faces,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        }
    }

    pub fn with_thresholds(mut self, score_threshold: f32, nms_threshold: f32) -> Self {
        self.score_threshold = score_threshold;
        self.nms_threshold = nms_threshold;
        self
    }
}

/// Produces face boxes (with landmarks) for an image, best first.
pub trait FaceDetector {
    fn detect(
        &mut self,
        image: &ImageView<'_>,
        params: &DetectParams,
    ) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Output tensor indices for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    cls: usize,
    obj: usize,
    bbox: usize,
    kps: usize,
}

/// YuNet-based face detector.
pub struct YuNetDetector {
    session: Session,
    strides: [StrideOutputs; 3],
}

impl YuNetDetector {
    /// Load the YuNet ONNX model from the given path.
    pub fn load(model_path: &str, backend: BackendTarget) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = session_builder(backend)?.commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            backend = ?backend,
            outputs = ?output_names,
            "loaded YuNet model"
        );

        if output_names.len() < YUNET_NUM_OUTPUTS {
            return Err(DetectorError::InferenceFailed(format!(
                "YuNet model needs {YUNET_NUM_OUTPUTS} outputs, got {}",
                output_names.len()
            )));
        }

        let strides = discover_output_indices(&output_names);
        tracing::debug!(?strides, "YuNet output tensor mapping");

        Ok(Self { session, strides })
    }

    /// Grayscale image → NCHW tensor padded to multiples of 32.
    ///
    /// YuNet consumes raw 0–255 BGR values; gray is replicated to all three.
    fn preprocess(image: &ImageView<'_>) -> Array4<f32> {
        let (pad_w, pad_h) = padded_size(image.width, image.height);
        let width = image.width as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, pad_h as usize, pad_w as usize));

        for y in 0..image.height as usize {
            for x in 0..width {
                let pixel = image.data[y * width + x] as f32;
                tensor[[0, 0, y, x]] = pixel;
                tensor[[0, 1, y, x]] = pixel;
                tensor[[0, 2, y, x]] = pixel;
            }
        }

        tensor
    }
}

impl FaceDetector for YuNetDetector {
    fn detect(
        &mut self,
        image: &ImageView<'_>,
        params: &DetectParams,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        if !image.is_valid() {
            return Err(DetectorError::InvalidImage {
                width: image.width,
                height: image.height,
            });
        }
        if (params.input_width, params.input_height) != (image.width, image.height) {
            return Err(DetectorError::InputSizeMismatch {
                expected: (params.input_width, params.input_height),
                actual: (image.width, image.height),
            });
        }

        let input = Self::preprocess(image);
        let (pad_w, pad_h) = padded_size(image.width, image.height);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in YUNET_STRIDES.iter().enumerate() {
            let idx = self.strides[pos];
            let extract = |i: usize, what: &str| {
                outputs[i]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };

            let grid = StrideGrid {
                stride,
                cols: pad_w as usize / stride,
                rows: pad_h as usize / stride,
            };
            let tensors = StrideTensors {
                cls: extract(idx.cls, "cls")?,
                obj: extract(idx.obj, "obj")?,
                bbox: extract(idx.bbox, "bbox")?,
                kps: extract(idx.kps, "kps")?,
            };
            candidates.extend(decode_stride(&grid, &tensors)?);
        }

        Ok(select_faces(
            candidates,
            params.score_threshold,
            params.nms_threshold,
            params.max_faces,
        ))
    }
}

fn padded_size(width: u32, height: u32) -> (u32, u32) {
    let align = |v: u32| v.div_ceil(YUNET_INPUT_ALIGN).max(1) * YUNET_INPUT_ALIGN;
    (align(width), align(height))
}

/// Discover output tensor ordering by name (`cls_8`, `obj_16`, `kps_32`, ...).
///
/// Falls back to the standard export order when names are not recognized:
///   [0-2] cls, [3-5] obj, [6-8] bbox, [9-11] kps (strides 8, 16, 32 each).
fn discover_output_indices(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };
    let lookup = |stride: usize| -> Option<StrideOutputs> {
        Some(StrideOutputs {
            cls: find("cls", stride)?,
            obj: find("obj", stride)?,
            bbox: find("bbox", stride)?,
            kps: find("kps", stride)?,
        })
    };

    if let [Some(s8), Some(s16), Some(s32)] = YUNET_STRIDES.map(lookup) {
        return [s8, s16, s32];
    }

    tracing::info!(?names, "YuNet: output names not recognized, using positional mapping");
    std::array::from_fn(|i| StrideOutputs {
        cls: i,
        obj: i + 3,
        bbox: i + 6,
        kps: i + 9,
    })
}

struct StrideGrid {
    stride: usize,
    cols: usize,
    rows: usize,
}

struct StrideTensors<'a> {
    cls: &'a [f32],
    obj: &'a [f32],
    bbox: &'a [f32],
    kps: &'a [f32],
}

/// Decode every grid cell of one stride into a scored candidate.
fn decode_stride(
    grid: &StrideGrid,
    t: &StrideTensors<'_>,
) -> Result<Vec<BoundingBox>, DetectorError> {
    let cells = grid.rows * grid.cols;
    if t.cls.len() < cells
        || t.obj.len() < cells
        || t.bbox.len() < cells * 4
        || t.kps.len() < cells * 10
    {
        return Err(DetectorError::InferenceFailed(format!(
            "stride {} outputs too short for a {}x{} grid",
            grid.stride, grid.cols, grid.rows
        )));
    }

    let stride = grid.stride as f32;
    let mut detections = Vec::with_capacity(cells);

    for r in 0..grid.rows {
        for c in 0..grid.cols {
            let idx = r * grid.cols + c;
            let score = (t.cls[idx].clamp(0.0, 1.0) * t.obj[idx].clamp(0.0, 1.0)).sqrt();

            let b = &t.bbox[idx * 4..idx * 4 + 4];
            let cx = (c as f32 + b[0]) * stride;
            let cy = (r as f32 + b[1]) * stride;
            let w = b[2].exp() * stride;
            let h = b[3].exp() * stride;

            let k = &t.kps[idx * 10..idx * 10 + 10];
            let landmarks: [(f32, f32); 5] = std::array::from_fn(|n| {
                (
                    (k[n * 2] + c as f32) * stride,
                    (k[n * 2 + 1] + r as f32) * stride,
                )
            });

            detections.push(BoundingBox {
                x: cx - w / 2.0,
                y: cy - h / 2.0,
                width: w,
                height: h,
                confidence: score,
                landmarks: Some(landmarks),
            });
        }
    }

    Ok(detections)
}

/// Threshold, keep the `top_k` best candidates, then suppress overlaps.
/// Output is sorted by descending confidence.
fn select_faces(
    mut candidates: Vec<BoundingBox>,
    score_threshold: f32,
    iou_threshold: f32,
    top_k: usize,
) -> Vec<BoundingBox> {
    candidates.retain(|d| d.confidence > score_threshold);
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(top_k);

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union between two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
