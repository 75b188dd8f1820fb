//! facewatch-core: face detection, recognition and gallery matching.
//!
//! YuNet finds faces and their five keypoints, SFace turns each aligned
//! face into a 128-dim embedding, and the [`Matcher`] picks the best
//! enrolled target per face under a cosine or L2 metric. Both models run
//! through ONNX Runtime.

pub mod alignment;
pub mod detector;
pub mod enroll;
pub mod gallery;
pub mod matcher;
pub mod pipeline;
pub mod recognizer;
pub mod session;
pub mod types;

pub use detector::{DetectParams, FaceDetector, YuNetDetector};
pub use enroll::{bootstrap_gallery, EnrollReport};
pub use gallery::{DuplicatePolicy, Gallery};
pub use matcher::Matcher;
pub use pipeline::{matchable_faces, FaceOutcome, FacePipeline};
pub use recognizer::{FeatureExtractor, SFaceRecognizer};
pub use session::BackendTarget;
pub use types::{
    BoundingBox, DetectedFace, DistanceMetric, Embedding, FaceMatch, ImageView, MatchRecord,
    TargetRecord, Thresholds, UNMATCHED_NAME,
};
