//! ONNX Runtime session construction shared by both models.

use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use serde::{Deserialize, Serialize};

/// Inference backend requested through the `backend_target` config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendTarget {
    #[default]
    Cpu,
    Cuda,
    CudaFp16,
    TimVxNpu,
    CannNpu,
}

impl BackendTarget {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Cpu),
            1 => Some(Self::Cuda),
            2 => Some(Self::CudaFp16),
            3 => Some(Self::TimVxNpu),
            4 => Some(Self::CannNpu),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Cpu => 0,
            Self::Cuda => 1,
            Self::CudaFp16 => 2,
            Self::TimVxNpu => 3,
            Self::CannNpu => 4,
        }
    }

    fn wants_cuda(self) -> bool {
        matches!(self, Self::Cuda | Self::CudaFp16)
    }
}

/// Session builder for `target`, falling back to CPU for anything this
/// build cannot serve.
pub(crate) fn session_builder(target: BackendTarget) -> Result<SessionBuilder, ort::Error> {
    #[allow(unused_mut)]
    let mut builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?;

    match target {
        BackendTarget::Cpu => {}
        t if t.wants_cuda() => register_cuda(&mut builder),
        other => {
            tracing::warn!(target = ?other, "NPU backends are not available; using CPU");
        }
    }

    Ok(builder)
}

#[cfg(feature = "cuda")]
fn register_cuda(builder: &mut SessionBuilder) {
    use ort::ep::{self, ExecutionProvider};

    let cuda = ep::CUDA::default();
    match cuda.is_available() {
        Ok(true) => {
            if let Err(e) = cuda.register(builder) {
                tracing::warn!(error = %e, "CUDA registration failed; using CPU");
            }
        }
        _ => tracing::warn!("ONNX Runtime was not built with CUDA; using CPU"),
    }
}

#[cfg(not(feature = "cuda"))]
fn register_cuda(_builder: &mut SessionBuilder) {
    tracing::warn!("built without the `cuda` feature; using CPU");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_codes_roundtrip() {
        for code in 0..=4 {
            let target = BackendTarget::from_code(code).unwrap();
            assert_eq!(target.code(), code);
        }
        assert_eq!(BackendTarget::from_code(5), None);
        assert_eq!(BackendTarget::from_code(-1), None);
    }

    #[test]
    fn test_cuda_variants() {
        assert!(BackendTarget::Cuda.wants_cuda());
        assert!(BackendTarget::CudaFp16.wants_cuda());
        assert!(!BackendTarget::Cpu.wants_cuda());
        assert!(!BackendTarget::CannNpu.wants_cuda());
    }
}
