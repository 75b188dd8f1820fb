//! The frame loop: capture → zoom → detect → match → render.

use facewatch_config::{ConfigSnapshot, ConfigStore};
use facewatch_core::detector::DetectorError;
use facewatch_core::{
    matchable_faces, FaceDetector, FaceMatch, FacePipeline, FeatureExtractor, Gallery, Matcher,
};
use facewatch_hw::{CameraError, Frame, FrameSource};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
}

/// Rates shown next to each rendered frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    /// Frames processed so far, including this one.
    pub frames: u64,
    /// Inverse of detection plus matching time for this frame.
    pub detect_fps: f32,
    /// Inverse of the time between the last two captures.
    pub video_fps: f32,
}

/// Presents one frame's match decisions.
pub trait Renderer {
    fn render(
        &mut self,
        frame: &Frame,
        matches: &[FaceMatch],
        stats: &FrameStats,
        config: &ConfigSnapshot,
    );
}

/// Renders match decisions as log events.
#[derive(Debug, Default)]
pub struct LogRenderer;

impl Renderer for LogRenderer {
    fn render(
        &mut self,
        frame: &Frame,
        matches: &[FaceMatch],
        stats: &FrameStats,
        config: &ConfigSnapshot,
    ) {
        tracing::debug!(
            seq = frame.sequence,
            faces = matches.len(),
            detect_fps = %format_args!("{:.2}", stats.detect_fps),
            video_fps = %format_args!("{:.2}", stats.video_fps),
            "frame"
        );

        for m in matches {
            let b = &m.bbox;
            if config.draw_face_points {
                tracing::info!(
                    name = %m.record.name,
                    confidence = %format_args!("{:.2}", m.record.confidence),
                    matched = m.record.matched,
                    bbox = ?(b.x, b.y, b.width, b.height),
                    landmarks = ?b.landmarks,
                    "face"
                );
            } else {
                tracing::info!(
                    name = %m.record.name,
                    confidence = %format_args!("{:.2}", m.record.confidence),
                    matched = m.record.matched,
                    bbox = ?(b.x, b.y, b.width, b.height),
                    "face"
                );
            }
        }
    }
}

fn rate(elapsed: Duration) -> f32 {
    let secs = elapsed.as_secs_f32();
    if secs > 0.0 {
        1.0 / secs
    } else {
        0.0
    }
}

/// Sequential per-frame driver. Every iteration reads the config snapshot
/// once, so one frame never mixes settings from two versions.
pub struct FrameLoop<S, D, E, R> {
    source: S,
    pipeline: FacePipeline<D, E>,
    gallery: Gallery,
    matcher: Matcher,
    store: Arc<ConfigStore>,
    renderer: R,
    stats: FrameStats,
    last_capture: Option<Instant>,
    rejected_zoom: Option<u32>,
}

impl<S, D, E, R> FrameLoop<S, D, E, R>
where
    S: FrameSource,
    D: FaceDetector,
    E: FeatureExtractor,
    R: Renderer,
{
    pub fn new(
        source: S,
        pipeline: FacePipeline<D, E>,
        gallery: Gallery,
        store: Arc<ConfigStore>,
        renderer: R,
    ) -> Self {
        Self {
            source,
            pipeline,
            gallery,
            matcher: Matcher::default(),
            store,
            renderer,
            stats: FrameStats::default(),
            last_capture: None,
            rejected_zoom: None,
        }
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Capture and process one frame.
    pub fn step(&mut self) -> Result<Vec<FaceMatch>, EngineError> {
        let config = self.store.current();

        let captured = self.source.read_frame()?;
        let now = Instant::now();
        if let Some(prev) = self.last_capture.replace(now) {
            self.stats.video_fps = rate(now - prev);
        }

        let frame = self.zoomed(captured, config.zoom);

        let started = Instant::now();
        let outcomes = self.pipeline.detect_with(&frame.as_view(), config.detect_params())?;
        let faces = matchable_faces(outcomes);
        let matches = self
            .matcher
            .match_frame(&faces, &self.gallery, config.distance, &config.thresholds());
        self.stats.detect_fps = rate(started.elapsed());
        self.stats.frames += 1;

        if config.debug {
            self.renderer.render(&frame, &matches, &self.stats, &config);
        }

        Ok(matches)
    }

    /// Apply `zoom`, or pass the frame through unscaled if it is rejected.
    /// Each rejected value is logged once.
    fn zoomed(&mut self, captured: Frame, zoom: f32) -> Frame {
        match captured.resize(zoom) {
            Ok(frame) => frame,
            Err(e) => {
                if self.rejected_zoom.replace(zoom.to_bits()) != Some(zoom.to_bits()) {
                    tracing::warn!(error = %e, "zoom not applied; using unscaled frames");
                }
                captured
            }
        }
    }

    /// Run until `cancel` fires or capture fails. A detector failure only
    /// costs its frame. Returns the number of frames processed.
    pub fn run(&mut self, cancel: &CancellationToken) -> Result<u64, EngineError> {
        tracing::info!(targets = self.gallery.len(), "frame loop started");

        while !cancel.is_cancelled() {
            match self.step() {
                Ok(_) => {}
                Err(EngineError::Detector(e)) => {
                    tracing::warn!(error = %e, "detection failed; skipping frame");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(frames = self.stats.frames, "frame loop stopped");
        Ok(self.stats.frames)
    }
}
