//! Crop quality checks — Laplacian sharpness and the pose/blur/area gate
//! that an analyzed face must pass before recognition.

use crate::types::FaceAnalysis;
use image::RgbImage;
use thiserror::Error;

/// Why an analyzed face was rejected before embedding.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QualityReject {
    #[error("yaw {value:.1}° exceeds ±{limit:.1}°")]
    Yaw { value: f32, limit: f32 },
    #[error("head pose unavailable")]
    PoseUnavailable,
    #[error("pitch {value:.1}° exceeds ±{limit:.1}°")]
    Pitch { value: f32, limit: f32 },
    #[error("sharpness {value:.1} below {limit:.1}")]
    Blur { value: f32, limit: f32 },
    #[error("face area {value}px² below {limit}px²")]
    Area { value: u32, limit: u32 },
    #[error("analysis failed: {0}")]
    Failed(String),
}

/// Thresholds an analyzed face must clear before embedding.
#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    /// Maximum absolute yaw in degrees. Yaw is required; a face whose pose
    /// could not be solved is rejected.
    pub max_yaw_degrees: f32,
    /// Maximum absolute pitch in degrees, checked only when reported.
    pub max_pitch_degrees: f32,
    /// Minimum Laplacian variance, checked only when reported.
    pub min_blur: f32,
    /// Minimum face box area in pixels, checked only when reported.
    pub min_face_area: u32,
}

impl QualityGate {
    /// Evaluate an analysis against the gate. The `area_scale` factor maps
    /// the analyzed image's pixel area back to the original crop's scale
    /// (the crop may have been downsampled before analysis).
    pub fn evaluate(&self, analysis: &FaceAnalysis, area_scale: f32) -> Result<(), QualityReject> {
        match analysis.yaw {
            None => return Err(QualityReject::PoseUnavailable),
            Some(yaw) if yaw.abs() > self.max_yaw_degrees => {
                return Err(QualityReject::Yaw {
                    value: yaw,
                    limit: self.max_yaw_degrees,
                })
            }
            Some(_) => {}
        }

        if let Some(pitch) = analysis.pitch {
            if pitch.abs() > self.max_pitch_degrees {
                return Err(QualityReject::Pitch {
                    value: pitch,
                    limit: self.max_pitch_degrees,
                });
            }
        }

        if let Some(blur) = analysis.blur {
            if blur < self.min_blur {
                return Err(QualityReject::Blur {
                    value: blur,
                    limit: self.min_blur,
                });
            }
        }

        if let Some(area) = analysis.area {
            let original_area = (area as f32 * area_scale * area_scale) as u32;
            if original_area < self.min_face_area {
                return Err(QualityReject::Area {
                    value: original_area,
                    limit: self.min_face_area,
                });
            }
        }

        Ok(())
    }
}

/// Variance of the 4-neighbor Laplacian over the luma channel.
///
/// Higher means sharper; the pre-filter treats crops below the configured
/// floor as too blurry to be worth analyzing.
pub fn laplacian_variance(img: &RgbImage) -> f64 {
    let w = img.width() as usize;
    let h = img.height() as usize;
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut luma = vec![0.0f64; w * h];
    for (x, y, px) in img.enumerate_pixels() {
        let [r, g, b] = px.0;
        luma[y as usize * w + x as usize] =
            0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let n = ((w - 2) * (h - 2)) as f64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = luma[(y - 1) * w + x]
                + luma[(y + 1) * w + x]
                + luma[y * w + x - 1]
                + luma[y * w + x + 1]
                - 4.0 * luma[y * w + x];
            sum += lap;
            sum_sq += lap * lap;
        }
    }

    let mean = sum / n;
    sum_sq / n - mean * mean
}
