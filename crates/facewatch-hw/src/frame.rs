//! Grayscale frame type, YUYV conversion and zoom resize.

use facewatch_core::ImageView;
use thiserror::Error;

/// Largest frame, in pixels, that [`Frame::resize`] will allocate.
pub const MAX_RESIZED_PIXELS: usize = 1 << 26;

/// A captured grayscale frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(FrameError::InvalidDimensions {
                width,
                height,
                len: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    pub fn as_view(&self) -> ImageView<'_> {
        ImageView::new(&self.data, self.width, self.height)
    }

    /// Scale both dimensions by `zoom` with bilinear sampling.
    ///
    /// A zoom of exactly 1.0 returns a copy. Each output dimension is at
    /// least one pixel. A zoom whose output would exceed
    /// [`MAX_RESIZED_PIXELS`] is rejected.
    pub fn resize(&self, zoom: f32) -> Result<Frame, FrameError> {
        if !(zoom.is_finite() && zoom > 0.0) {
            return Err(FrameError::InvalidZoom(zoom));
        }
        if zoom == 1.0 {
            return Ok(self.clone());
        }

        let (width, height) = (self.width as usize, self.height as usize);
        let new_w = ((width as f32 * zoom).round() as usize).max(1);
        let new_h = ((height as f32 * zoom).round() as usize).max(1);
        match new_w.checked_mul(new_h) {
            Some(n) if n <= MAX_RESIZED_PIXELS => {}
            _ => return Err(FrameError::InvalidZoom(zoom)),
        }
        let inv_x = width as f32 / new_w as f32;
        let inv_y = height as f32 / new_h as f32;

        let mut resized = vec![0u8; new_w * new_h];
        for y in 0..new_h {
            let src_y = (y as f32 + 0.5) * inv_y - 0.5;
            let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
            let y1 = (y0 + 1).min(height - 1);
            let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

            for x in 0..new_w {
                let src_x = (x as f32 + 0.5) * inv_x - 0.5;
                let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
                let x1 = (x0 + 1).min(width - 1);
                let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

                let tl = self.data[y0 * width + x0] as f32;
                let tr = self.data[y0 * width + x1] as f32;
                let bl = self.data[y1 * width + x0] as f32;
                let br = self.data[y1 * width + x1] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                resized[y * new_w + x] = val.round().clamp(0.0, 255.0) as u8;
            }
        }

        Ok(Frame {
            data: resized,
            width: new_w as u32,
            height: new_h as u32,
            timestamp: self.timestamp,
            sequence: self.sequence,
        })
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Keep the high byte of each little-endian 16-bit sample.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if y16.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: y16.len(),
        });
    }
    Ok(y16[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid frame: {width}x{height} with {len} bytes")]
    InvalidDimensions { width: u32, height: u32, len: usize },
    #[error("zoom {0} is not positive or yields an oversized frame")]
    InvalidZoom(f32),
}
