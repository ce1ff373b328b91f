//! Face alignment via a 4-DOF similarity transform.
//!
//! Warps a face crop to a canonical 112×112 position from three landmark
//! points (eyes + nose tip) using least-squares estimation. When the
//! landmarks are missing or the transform degenerates, the crop is plainly
//! resized instead — a softer failure than rejecting the face outright.

use crate::types::FaceLandmarks;
use image::imageops::FilterType;
use image::RgbImage;

/// Canonical aligned crop edge length.
pub const ALIGNED_SIZE: u32 = 112;

/// Destination landmark positions as fractions of the output square:
/// eyes on a horizontal line at 35% height, nose at 55%.
const DEST_LEFT_EYE: (f32, f32) = (0.30, 0.35);
const DEST_RIGHT_EYE: (f32, f32) = (0.70, 0.35);
const DEST_NOSE: (f32, f32) = (0.50, 0.55);

fn destination_points(size: u32) -> [(f32, f32); 3] {
    let s = size as f32;
    [
        (DEST_LEFT_EYE.0 * s, DEST_LEFT_EYE.1 * s),
        (DEST_RIGHT_EYE.0 * s, DEST_RIGHT_EYE.1 * s),
        (DEST_NOSE.0 * s, DEST_NOSE.1 * s),
    ]
}

/// Estimate a 2×3 similarity transform (scale, rotation, translation) from
/// `src` to `dst` landmarks via least squares.
///
/// Returns `[a, -b, tx, b, a, ty]` representing:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
/// or `None` when the system is singular (e.g. coincident landmarks).
pub fn estimate_similarity_transform(
    src: &[(f32, f32); 3],
    dst: &[(f32, f32); 3],
) -> Option<[f32; 6]> {
    // Overdetermined system A * [a, b, tx, ty]^T = B; each point pair
    // (sx, sy) -> (dx, dy) contributes:
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f32; 16]; // 4x4, row-major
    let mut atb = [0.0f32; 4];

    for i in 0..3 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];

        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let x = solve_4x4(&ata, &atb)?;
    let (a, b, tx, ty) = (x[0], x[1], x[2], x[3]);

    // Degenerate scale means the source points were collinear-degenerate.
    if (a * a + b * b) < 1e-8 {
        return None;
    }

    Some([a, -b, tx, b, a, ty])
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> Option<[f32; 4]> {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-10 {
            return None;
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    Some(x)
}

/// Apply a 2×3 similarity warp to an RGB crop, producing a square output.
///
/// Samples with bilinear interpolation; out-of-bounds reads clamp to the
/// crop edge.
fn warp_similarity(crop: &RgbImage, matrix: &[f32; 6], out_size: u32) -> Option<RgbImage> {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);

    // Invert the 2x2 part: M = [[a, -b], [b, a]], det = a^2 + b^2.
    let det = a * a + b * b;
    if det.abs() < 1e-10 {
        return None;
    }
    let inv_det = 1.0 / det;
    let ia = a * inv_det;
    let ib = b * inv_det;

    let src_w = crop.width();
    let src_h = crop.height();
    if src_w == 0 || src_h == 0 {
        return None;
    }

    let mut output = RgbImage::new(out_size, out_size);

    for oy in 0..out_size {
        for ox in 0..out_size {
            // Map output pixel back to source: src = M_inv * (dst - t).
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let x0 = sx.floor();
            let y0 = sy.floor();
            let fx = sx - x0;
            let fy = sy - y0;

            let sample = |x: f32, y: f32| -> [f32; 3] {
                let cx = (x.max(0.0) as u32).min(src_w - 1);
                let cy = (y.max(0.0) as u32).min(src_h - 1);
                let p = crop.get_pixel(cx, cy).0;
                [p[0] as f32, p[1] as f32, p[2] as f32]
            };

            let tl = sample(x0, y0);
            let tr = sample(x0 + 1.0, y0);
            let bl = sample(x0, y0 + 1.0);
            let br = sample(x0 + 1.0, y0 + 1.0);

            let mut px = [0u8; 3];
            for c in 0..3 {
                let val = tl[c] * (1.0 - fx) * (1.0 - fy)
                    + tr[c] * fx * (1.0 - fy)
                    + bl[c] * (1.0 - fx) * fy
                    + br[c] * fx * fy;
                px[c] = val.round().clamp(0.0, 255.0) as u8;
            }
            output.put_pixel(ox, oy, image::Rgb(px));
        }
    }

    Some(output)
}

/// Align a face crop to the canonical 112×112 position.
///
/// With landmarks, estimates the similarity transform to the reference
/// positions and warps. Without landmarks, or when the transform is
/// singular, falls back to a plain bilinear resize.
pub fn align_crop(crop: &RgbImage, landmarks: Option<&FaceLandmarks>) -> RgbImage {
    if let Some(lm) = landmarks {
        let src = [lm.left_eye, lm.right_eye, lm.nose];
        let dst = destination_points(ALIGNED_SIZE);
        if let Some(matrix) = estimate_similarity_transform(&src, &dst) {
            if let Some(aligned) = warp_similarity(crop, &matrix, ALIGNED_SIZE) {
                return aligned;
            }
        }
        tracing::debug!("similarity transform degenerate, falling back to resize");
    }
    image::imageops::resize(crop, ALIGNED_SIZE, ALIGNED_SIZE, FilterType::Triangle)
}
