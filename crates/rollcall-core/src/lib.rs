//! rollcall-core — domain logic for the attendance pipeline.
//!
//! Centroid tracking, 3-point face alignment, the person bank with
//! similarity-margin matching, crop quality gating, and the ONNX-backed
//! detector/embedder seams.

pub mod alignment;
pub mod bank;
pub mod detector;
pub mod embedder;
pub mod quality;
pub mod tracker;
pub mod types;

pub use bank::{BankError, MatchOutcome, PersonBank};
pub use detector::{DetectorError, FaceDetector, YoloFaceDetector};
pub use embedder::{ArcFaceEmbedder, EmbedderError, FaceEmbedder};
pub use quality::{QualityGate, QualityReject};
pub use tracker::CentroidTracker;
pub use types::{BoundingBox, Detection, Embedding, FaceAnalysis, FaceLandmarks};
