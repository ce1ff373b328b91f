//! ArcFace face embedder via ONNX Runtime.
//!
//! Turns aligned 112×112 face crops into L2-normalized 512-dimensional
//! embeddings, batching all crops of a frame into one inference call.

use crate::types::Embedding;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Batch face embedding.
///
/// One `None` per crop that failed to embed; a failed crop never fails the
/// batch.
pub trait FaceEmbedder: Send {
    fn embed_batch(&mut self, crops: &[RgbImage]) -> Vec<Option<Embedding>>;
}

/// ArcFace embedder backed by an ONNX session.
pub struct ArcFaceEmbedder {
    session: Session,
}

impl ArcFaceEmbedder {
    /// Load the ArcFace model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded face embedding model");

        Ok(Self { session })
    }

    /// Stack crops into an NCHW float tensor, RGB scaled to [0, 1].
    /// Crops that are not already 112×112 are resized first.
    fn preprocess(crops: &[RgbImage]) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((crops.len(), 3, size, size));

        for (n, crop) in crops.iter().enumerate() {
            let resized;
            let crop = if crop.dimensions() == (ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE) {
                crop
            } else {
                resized = image::imageops::resize(
                    crop,
                    ARCFACE_INPUT_SIZE,
                    ARCFACE_INPUT_SIZE,
                    FilterType::Triangle,
                );
                &resized
            };
            for (x, y, px) in crop.enumerate_pixels() {
                for c in 0..3 {
                    tensor[[n, c, y as usize, x as usize]] = px.0[c] as f32 / 255.0;
                }
            }
        }

        tensor
    }

    fn run_batch(&mut self, crops: &[RgbImage]) -> Result<Vec<Embedding>, EmbedderError> {
        let input = Self::preprocess(crops);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding tensor: {e}")))?;

        if data.len() != crops.len() * ARCFACE_EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {} × {ARCFACE_EMBEDDING_DIM} values, got {}",
                crops.len(),
                data.len()
            )));
        }

        Ok(data
            .chunks_exact(ARCFACE_EMBEDDING_DIM)
            .map(|row| Embedding::new(row.to_vec()).l2_normalized())
            .collect())
    }
}

impl FaceEmbedder for ArcFaceEmbedder {
    fn embed_batch(&mut self, crops: &[RgbImage]) -> Vec<Option<Embedding>> {
        if crops.is_empty() {
            return Vec::new();
        }
        match self.run_batch(crops) {
            Ok(embeddings) => embeddings.into_iter().map(Some).collect(),
            Err(e) => {
                tracing::warn!(error = %e, crops = crops.len(), "batch embedding failed");
                vec![None; crops.len()]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocess_shape_matches_batch() {
        let crops = vec![
            RgbImage::from_pixel(112, 112, image::Rgb([255, 0, 0])),
            RgbImage::from_pixel(112, 112, image::Rgb([0, 255, 0])),
        ];
        let tensor = ArcFaceEmbedder::preprocess(&crops);
        assert_eq!(tensor.shape(), &[2, 3, 112, 112]);
    }

    #[test]
    fn preprocess_scales_to_unit_range() {
        let crops = vec![RgbImage::from_pixel(112, 112, image::Rgb([255, 127, 0]))];
        let tensor = ArcFaceEmbedder::preprocess(&crops);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] - 127.0 / 255.0).abs() < 1e-6);
        assert!(tensor[[0, 2, 0, 0]].abs() < 1e-6);
    }

    #[test]
    fn preprocess_resizes_odd_crops() {
        let crops = vec![RgbImage::from_pixel(60, 90, image::Rgb([50, 50, 50]))];
        let tensor = ArcFaceEmbedder::preprocess(&crops);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        assert!((tensor[[0, 0, 56, 56]] - 50.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn model_not_found() {
        let result = ArcFaceEmbedder::load("/nonexistent/arcface.onnx");
        assert!(matches!(result, Err(EmbedderError::ModelNotFound(_))));
    }
}
