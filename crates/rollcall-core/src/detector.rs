//! YOLOv8 face detector via ONNX Runtime.
//!
//! Runs a single-class face model exported from ultralytics: letterbox
//! preprocessing to 640×640, anchor-free decode of the `[1, 4+C, N]` output,
//! NMS post-processing.

use crate::types::{BoundingBox, Detection};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const YOLO_INPUT_SIZE: u32 = 640;
const YOLO_NMS_THRESHOLD: f32 = 0.45;
/// Ultralytics letterbox padding gray.
const YOLO_PAD_VALUE: f32 = 114.0;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Per-frame face detection.
///
/// Implementations return zero or more boxes with confidence scores in frame
/// coordinates; an error covers the whole frame, never a single face.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, DetectorError>;
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// YOLOv8-face detector backed by an ONNX session.
pub struct YoloFaceDetector {
    session: Session,
    confidence_threshold: f32,
}

impl YoloFaceDetector {
    /// Load the face detection model from the given path.
    pub fn load(model_path: &str, confidence_threshold: f32) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face detection model"
        );

        Ok(Self {
            session,
            confidence_threshold,
        })
    }

    /// Letterbox the frame into a 640×640 RGB tensor normalized to [0, 1].
    fn preprocess(&self, frame: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
        let input = YOLO_INPUT_SIZE;
        let (w, h) = frame.dimensions();

        let scale = (input as f32 / w as f32).min(input as f32 / h as f32);
        let new_w = ((w as f32 * scale).round() as u32).max(1);
        let new_h = ((h as f32 * scale).round() as u32).max(1);
        let pad_x = (input - new_w) as f32 / 2.0;
        let pad_y = (input - new_h) as f32 / 2.0;

        let resized = image::imageops::resize(frame, new_w, new_h, FilterType::Triangle);

        let size = input as usize;
        let mut tensor =
            Array4::<f32>::from_elem((1, 3, size, size), YOLO_PAD_VALUE / 255.0);

        let x_off = pad_x.floor() as u32;
        let y_off = pad_y.floor() as u32;
        for (x, y, px) in resized.enumerate_pixels() {
            let tx = (x + x_off) as usize;
            let ty = (y + y_off) as usize;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = px.0[c] as f32 / 255.0;
            }
        }

        (tensor, LetterboxInfo { scale, pad_x, pad_y })
    }
}

impl FaceDetector for YoloFaceDetector {
    /// Detect faces, returning boxes in frame coordinates sorted by
    /// confidence.
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let (input, letterbox) = self.preprocess(frame);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("prediction tensor: {e}")))?;

        if shape.len() != 3 {
            return Err(DetectorError::InferenceFailed(format!(
                "expected [1, channels, anchors] output, got {shape:?}"
            )));
        }
        let channels = shape[1] as usize;
        let anchors = shape[2] as usize;
        if channels < 5 || data.len() < channels * anchors {
            return Err(DetectorError::InferenceFailed(format!(
                "output too small: {channels} channels × {anchors} anchors"
            )));
        }

        let detections = decode_predictions(
            data,
            channels,
            anchors,
            &letterbox,
            self.confidence_threshold,
            frame.dimensions(),
        );

        let mut result = nms(detections, YOLO_NMS_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(result)
    }
}

/// Decode the `[channels, anchors]` YOLOv8 head: rows 0-3 are cx/cy/w/h in
/// letterboxed pixels, remaining rows are per-class scores.
fn decode_predictions(
    data: &[f32],
    channels: usize,
    anchors: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
    frame_dims: (u32, u32),
) -> Vec<Detection> {
    let at = |c: usize, i: usize| data[c * anchors + i];
    let (frame_w, frame_h) = (frame_dims.0 as f32, frame_dims.1 as f32);

    let mut detections = Vec::new();
    for i in 0..anchors {
        let mut score = 0.0f32;
        for c in 4..channels {
            score = score.max(at(c, i));
        }
        if score <= threshold {
            continue;
        }

        let cx = at(0, i);
        let cy = at(1, i);
        let bw = at(2, i);
        let bh = at(3, i);

        // Map from letterboxed space back to frame space.
        let x1 = ((cx - bw / 2.0 - letterbox.pad_x) / letterbox.scale).clamp(0.0, frame_w);
        let y1 = ((cy - bh / 2.0 - letterbox.pad_y) / letterbox.scale).clamp(0.0, frame_h);
        let x2 = ((cx + bw / 2.0 - letterbox.pad_x) / letterbox.scale).clamp(0.0, frame_w);
        let y2 = ((cy + bh / 2.0 - letterbox.pad_y) / letterbox.scale).clamp(0.0, frame_h);

        let bbox = BoundingBox::new(x1, y1, x2, y2);
        if !bbox.is_valid() {
            continue;
        }
        detections.push(Detection {
            bbox,
            confidence: score,
        });
    }

    detections
}

/// Non-Maximum Suppression: drop detections overlapping a stronger one.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i]);

        for j in (i + 1)..detections.len() {
            if !suppressed[j] && iou(&detections[i].bbox, &detections[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Intersection-over-Union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
