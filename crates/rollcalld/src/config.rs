//! Daemon configuration: one immutable struct loaded from a TOML file, with
//! defaults matching long-running deployments of the original pipeline.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub camera: CameraConfig,
    pub models: ModelsConfig,
    pub workers: WorkersConfig,
    pub quality: QualityConfig,
    pub matching: MatchingConfig,
    pub attendance: AttendanceConfig,
    pub unknown: UnknownConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    /// V4L2 device path.
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Base delay for reconnect backoff after repeated capture failures.
    pub reconnect_delay_secs: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            reconnect_delay_secs: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelsConfig {
    /// Face detection ONNX model.
    pub detector_path: PathBuf,
    /// Minimum detector confidence.
    pub detector_confidence: f32,
    /// ArcFace embedding ONNX model.
    pub embedder_path: PathBuf,
    /// JSON embedding store for the person bank.
    pub bank_path: PathBuf,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            detector_path: PathBuf::from("models/yolov8n-face.onnx"),
            detector_confidence: 0.35,
            embedder_path: PathBuf::from("models/arcface_r50.onnx"),
            bank_path: PathBuf::from("models/person_bank.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkersConfig {
    /// Analysis worker executable.
    pub program: String,
    /// Arguments passed to the worker.
    pub args: Vec<String>,
    /// Number of worker processes.
    pub count: usize,
    /// Dispatcher threads running blocking exchanges.
    pub dispatch_threads: usize,
    /// Longest crop side sent to a worker; larger crops are downsampled.
    pub resize_max_side: u32,
    pub startup_timeout_secs: f64,
    pub request_timeout_secs: f64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["workers/analyze_face.py".to_string(), "--server".to_string()],
            count: 1,
            dispatch_threads: 4,
            resize_max_side: 320,
            startup_timeout_secs: 10.0,
            request_timeout_secs: 1.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QualityConfig {
    pub max_yaw_degrees: f32,
    pub max_pitch_degrees: f32,
    /// Laplacian variance floor, for both the cheap pre-filter and the gate.
    pub blur_threshold: f32,
    /// Minimum padded-crop area considered worth analyzing (px²).
    pub min_face_area: u32,
    /// Symmetric crop padding around a detected box.
    pub padding: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            max_yaw_degrees: 20.0,
            max_pitch_degrees: 15.0,
            blur_threshold: 80.0,
            min_face_area: 1600,
            padding: 40,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchingConfig {
    /// Cosine similarity floor for a match.
    pub min_similarity: f32,
    /// Required gap between best and second-best similarity.
    pub min_margin: f32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.72,
            min_margin: 0.05,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AttendanceConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Minimum seconds between two records for the same identity.
    pub cooldown_secs: f64,
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("attendance/attendance.db"),
            cooldown_secs: 60.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnknownConfig {
    /// Directory for unmatched face crops.
    pub dir: PathBuf,
    /// Minimum seconds between two saved crops, across all tracks.
    pub cooldown_secs: f64,
}

impl Default for UnknownConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("unknown_faces"),
            cooldown_secs: 10.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Run the detector every Nth frame.
    pub detect_every: u64,
    /// Minimum frames between recognition attempts per track.
    pub recognize_every: u64,
    /// Frames a track survives without a matching detection.
    pub max_lost: u32,
    /// Per-handle poll bound during the harvest phase (milliseconds).
    pub harvest_wait_ms: u64,
    /// Harvest attempts before an unresolved analysis is abandoned.
    pub max_harvest_attempts: u32,
    /// Seconds between frame-rate log lines.
    pub fps_log_interval_secs: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detect_every: 2,
            recognize_every: 5,
            max_lost: 30,
            harvest_wait_ms: 30,
            max_harvest_attempts: 120,
            fps_log_interval_secs: 5.0,
        }
    }
}

impl Config {
    /// Load from a TOML file; absent keys fall back to defaults. With no
    /// path, the built-in defaults are returned.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", path.display()))?;
        Ok(config)
    }
}
