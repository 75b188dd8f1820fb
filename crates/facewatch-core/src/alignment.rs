//! Face alignment via a least-squares similarity transform.
//!
//! Maps the five detected landmarks onto the canonical SFace template and
//! resamples the face into a 112×112 crop.

use crate::types::ImageView;

/// Canonical landmark template for a 112×112 crop, in detector order.
const TEMPLATE_112: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

pub const ALIGNED_SIZE: usize = 112;

/// 4-DOF transform (uniform scale, rotation, translation):
///
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl SimilarityTransform {
    /// Closed-form least-squares fit from `src` points onto `dst` points.
    ///
    /// Returns `None` when the source points are all coincident.
    pub fn estimate(src: &[(f32, f32)], dst: &[(f32, f32)]) -> Option<Self> {
        let n = src.len().min(dst.len());
        if n == 0 {
            return None;
        }
        let inv_n = 1.0 / n as f32;
        let (msx, msy) = src[..n]
            .iter()
            .fold((0.0, 0.0), |(x, y), p| (x + p.0 * inv_n, y + p.1 * inv_n));
        let (mdx, mdy) = dst[..n]
            .iter()
            .fold((0.0, 0.0), |(x, y), p| (x + p.0 * inv_n, y + p.1 * inv_n));

        let mut spread = 0.0f32;
        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        for (s, d) in src[..n].iter().zip(&dst[..n]) {
            let (sx, sy) = (s.0 - msx, s.1 - msy);
            let (dx, dy) = (d.0 - mdx, d.1 - mdy);
            spread += sx * sx + sy * sy;
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
        }
        if spread < 1e-12 {
            return None;
        }

        let a = dot / spread;
        let b = cross / spread;
        Some(Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        })
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Uniform scale factor of the transform.
    pub fn scale(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }

    pub fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Bilinear sample; pixels outside the image read as black.
fn sample(image: &ImageView<'_>, x: f32, y: f32) -> f32 {
    let w = image.width as i64;
    let h = image.height as i64;
    let at = |px: i64, py: i64| -> f32 {
        if px >= 0 && px < w && py >= 0 && py < h {
            image.data[(py * w + px) as usize] as f32
        } else {
            0.0
        }
    };

    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    at(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + at(x0 + 1, y0) * fx * (1.0 - fy)
        + at(x0, y0 + 1) * (1.0 - fx) * fy
        + at(x0 + 1, y0 + 1) * fx * fy
}

/// Resample `image` into an `out_size`×`out_size` crop, where `to_crop` maps
/// source coordinates into crop coordinates.
pub fn warp(
    image: &ImageView<'_>,
    to_crop: &SimilarityTransform,
    out_size: usize,
) -> Option<Vec<u8>> {
    let to_source = to_crop.inverse()?;
    let mut out = vec![0u8; out_size * out_size];
    for oy in 0..out_size {
        for ox in 0..out_size {
            let (sx, sy) = to_source.apply((ox as f32, oy as f32));
            out[oy * out_size + ox] = sample(image, sx, sy).round().clamp(0.0, 255.0) as u8;
        }
    }
    Some(out)
}

/// Align a face to the canonical 112×112 crop.
///
/// Returns `None` for degenerate landmarks (all points coincident).
pub fn align_face(image: &ImageView<'_>, landmarks: &[(f32, f32); 5]) -> Option<Vec<u8>> {
    let transform = SimilarityTransform::estimate(landmarks, &TEMPLATE_112)?;
    warp(image, &transform, ALIGNED_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_estimate_identity() {
        let t = SimilarityTransform::estimate(&TEMPLATE_112, &TEMPLATE_112).unwrap();
        assert!(close(t.a, 1.0, 1e-4), "a = {}", t.a);
        assert!(close(t.b, 0.0, 1e-4), "b = {}", t.b);
        assert!(close(t.tx, 0.0, 1e-2), "tx = {}", t.tx);
        assert!(close(t.ty, 0.0, 1e-2), "ty = {}", t.ty);
    }

    #[test]
    fn test_estimate_recovers_known_transform() {
        let known = SimilarityTransform { a: 0.8, b: 0.6, tx: 12.0, ty: -7.0 };
        let src: Vec<(f32, f32)> = TEMPLATE_112.to_vec();
        let dst: Vec<(f32, f32)> = src.iter().map(|&p| known.apply(p)).collect();
        let t = SimilarityTransform::estimate(&src, &dst).unwrap();
        assert!(close(t.a, 0.8, 1e-4));
        assert!(close(t.b, 0.6, 1e-4));
        assert!(close(t.tx, 12.0, 1e-2));
        assert!(close(t.ty, -7.0, 1e-2));
        assert!(close(t.scale(), 1.0, 1e-4));
    }

    #[test]
    fn test_estimate_half_scale() {
        let src: Vec<(f32, f32)> = TEMPLATE_112.iter().map(|&(x, y)| (x * 2.0, y * 2.0)).collect();
        let t = SimilarityTransform::estimate(&src, &TEMPLATE_112).unwrap();
        assert!(close(t.scale(), 0.5, 1e-3), "scale = {}", t.scale());
    }

    #[test]
    fn test_estimate_degenerate() {
        let src = [(5.0, 5.0); 5];
        assert!(SimilarityTransform::estimate(&src, &TEMPLATE_112).is_none());
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = SimilarityTransform { a: 1.5, b: -0.5, tx: 3.0, ty: 4.0 };
        let inv = t.inverse().unwrap();
        let p = (17.0, -9.0);
        let back = inv.apply(t.apply(p));
        assert!(close(back.0, p.0, 1e-3) && close(back.1, p.1, 1e-3));
    }

    #[test]
    fn test_align_output_size() {
        let data = vec![128u8; 640 * 480];
        let image = ImageView::new(&data, 640, 480);
        let crop = align_face(&image, &TEMPLATE_112).unwrap();
        assert_eq!(crop.len(), ALIGNED_SIZE * ALIGNED_SIZE);
        // Template landmarks on a uniform image: the crop is the top-left patch.
        assert_eq!(crop[50 * ALIGNED_SIZE + 50], 128);
    }

    #[test]
    fn test_bright_patch_lands_on_template() {
        let (w, h) = (200usize, 200usize);
        let mut data = vec![0u8; w * h];
        let landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        let (lx, ly) = (landmarks[0].0 as usize, landmarks[0].1 as usize);
        for y in ly - 2..=ly + 2 {
            for x in lx - 2..=lx + 2 {
                data[y * w + x] = 255;
            }
        }

        let image = ImageView::new(&data, w as u32, h as u32);
        let crop = align_face(&image, &landmarks).unwrap();

        let (rx, ry) = (TEMPLATE_112[0].0.round() as usize, TEMPLATE_112[0].1.round() as usize);
        let brightest = (ry - 1..=ry + 1)
            .flat_map(|y| (rx - 1..=rx + 1).map(move |x| (x, y)))
            .map(|(x, y)| crop[y * ALIGNED_SIZE + x])
            .max()
            .unwrap_or(0);
        assert!(brightest > 100, "expected bright patch near ({rx}, {ry}), max={brightest}");
    }
}
