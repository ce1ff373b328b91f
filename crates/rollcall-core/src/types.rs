use serde::{Deserialize, Serialize};

/// Axis-aligned face region in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Center point, used by the tracker for association.
    pub fn centroid(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn is_valid(&self) -> bool {
        self.x2 > self.x1 && self.y2 > self.y1
    }

    /// Expand by `padding` pixels on every side and clamp to the frame,
    /// returning an integer crop rectangle `(x, y, width, height)`.
    ///
    /// Returns `None` when the clamped rectangle is empty.
    pub fn padded_rect(
        &self,
        padding: u32,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<(u32, u32, u32, u32)> {
        let pad = padding as f32;
        let x1 = (self.x1 - pad).max(0.0) as u32;
        let y1 = (self.y1 - pad).max(0.0) as u32;
        let x2 = ((self.x2 + pad).max(0.0) as u32).min(frame_width);
        let y2 = ((self.y2 + pad).max(0.0) as u32).min(frame_height);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

/// A single detector output: a face region plus its confidence score.
#[derive(Debug, Clone, Copy)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn dot(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    /// L2 norm of the vector.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Unit-normalized copy. The epsilon keeps a zero vector finite instead
    /// of producing NaNs.
    pub fn l2_normalized(&self) -> Embedding {
        let denom = self.norm() + 1e-12;
        Embedding {
            values: self.values.iter().map(|x| x / denom).collect(),
        }
    }

    /// Cosine similarity in [-1, 1]. Both sides are normalized here, so
    /// callers may pass raw or pre-normalized vectors.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let denom = self.norm() * other.norm();
        if denom > 0.0 {
            self.dot(other) / denom
        } else {
            0.0
        }
    }
}

/// The three landmark points the recognition pipeline aligns with,
/// in pixel coordinates of the analyzed crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceLandmarks {
    pub left_eye: (f32, f32),
    pub right_eye: (f32, f32),
    pub nose: (f32, f32),
}

impl FaceLandmarks {
    /// Scale all coordinates by `factor` (used to map landmarks found on a
    /// downsampled crop back onto the original).
    pub fn scaled(&self, factor: f32) -> FaceLandmarks {
        let s = |(x, y): (f32, f32)| (x * factor, y * factor);
        FaceLandmarks {
            left_eye: s(self.left_eye),
            right_eye: s(self.right_eye),
            nose: s(self.nose),
        }
    }
}

/// A successful landmark/pose/blur analysis of one face crop.
///
/// `yaw`/`pitch` are in degrees and may be absent when the estimator could
/// not solve the head pose. `area` is the face box area in pixels of the
/// analyzed image.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceAnalysis {
    pub landmarks: Option<FaceLandmarks>,
    pub yaw: Option<f32>,
    pub pitch: Option<f32>,
    pub blur: Option<f32>,
    pub area: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_centroid_and_area() {
        let b = BoundingBox::new(10.0, 20.0, 50.0, 60.0);
        assert_eq!(b.centroid(), (30.0, 40.0));
        assert_eq!(b.area(), 1600.0);
        assert!(b.is_valid());
    }

    #[test]
    fn bbox_inverted_is_invalid() {
        let b = BoundingBox::new(50.0, 20.0, 10.0, 60.0);
        assert!(!b.is_valid());
        assert_eq!(b.area(), 0.0);
    }

    #[test]
    fn padded_rect_clamps_to_frame() {
        let b = BoundingBox::new(5.0, 5.0, 30.0, 30.0);
        let (x, y, w, h) = b.padded_rect(10, 100, 100).unwrap();
        assert_eq!((x, y), (0, 0));
        assert_eq!((w, h), (40, 40));
    }

    #[test]
    fn padded_rect_outside_frame_is_none() {
        let b = BoundingBox::new(150.0, 150.0, 200.0, 200.0);
        assert!(b.padded_rect(0, 100, 100).is_none());
    }

    #[test]
    fn similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn similarity_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn l2_normalized_has_unit_norm() {
        let e = Embedding::new(vec![3.0, 4.0]).l2_normalized();
        assert!((e.norm() - 1.0).abs() < 1e-5);
        assert!((e.values[0] - 0.6).abs() < 1e-5);
        assert!((e.values[1] - 0.8).abs() < 1e-5);
    }

    #[test]
    fn landmarks_scaled() {
        let lm = FaceLandmarks {
            left_eye: (10.0, 20.0),
            right_eye: (30.0, 20.0),
            nose: (20.0, 30.0),
        };
        let scaled = lm.scaled(2.0);
        assert_eq!(scaled.left_eye, (20.0, 40.0));
        assert_eq!(scaled.nose, (40.0, 60.0));
    }
}
