//! Wire protocol for the external face-analysis workers.
//!
//! Newline-delimited JSON over the worker's stdin/stdout. A worker emits a
//! single ready line once initialized, then answers one response line per
//! request, correlated purely by stream order.

use rollcall_core::{FaceAnalysis, FaceLandmarks};
use serde::{Deserialize, Serialize};

/// Request line: `{"cmd": "process", "img_path": ...}` or `img_b64`.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeRequest<'a> {
    pub cmd: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img_path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img_b64: Option<&'a str>,
}

impl<'a> AnalyzeRequest<'a> {
    pub fn from_path(path: &'a str) -> Self {
        Self {
            cmd: "process",
            img_path: Some(path),
            img_b64: None,
        }
    }

    pub fn from_b64(encoded: &'a str) -> Self {
        Self {
            cmd: "process",
            img_path: None,
            img_b64: Some(encoded),
        }
    }
}

/// Landmark points as the worker reports them. The face-mesh worker also
/// reports chin and mouth corners; the pipeline only consumes eyes + nose.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireLandmarks {
    #[serde(default)]
    pub left_eye: Option<[f32; 2]>,
    #[serde(default)]
    pub right_eye: Option<[f32; 2]>,
    #[serde(default)]
    pub nose: Option<[f32; 2]>,
    #[serde(default)]
    pub chin: Option<[f32; 2]>,
    #[serde(default)]
    pub left_mouth: Option<[f32; 2]>,
    #[serde(default)]
    pub right_mouth: Option<[f32; 2]>,
}

/// One response line from a worker.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeResponse {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub landmarks: Option<WireLandmarks>,
    #[serde(default)]
    pub yaw: Option<f32>,
    #[serde(default)]
    pub pitch: Option<f32>,
    #[serde(default)]
    pub blur: Option<f32>,
    #[serde(default)]
    pub area: Option<u32>,
    #[serde(default)]
    pub bbox: Option<[i32; 4]>,
}

impl AnalyzeResponse {
    /// Convert a wire response to a domain analysis.
    ///
    /// `None` when the worker reported failure. Landmarks are carried only
    /// when all three alignment points are present; the alignment stage
    /// falls back to a plain resize otherwise.
    pub fn to_analysis(&self) -> Option<FaceAnalysis> {
        if !self.ok {
            return None;
        }
        let landmarks = self.landmarks.as_ref().and_then(|lm| {
            match (lm.left_eye, lm.right_eye, lm.nose) {
                (Some(le), Some(re), Some(n)) => Some(FaceLandmarks {
                    left_eye: (le[0], le[1]),
                    right_eye: (re[0], re[1]),
                    nose: (n[0], n[1]),
                }),
                _ => None,
            }
        });
        Some(FaceAnalysis {
            landmarks,
            yaw: self.yaw,
            pitch: self.pitch,
            blur: self.blur,
            area: self.area,
        })
    }

    /// The error string of a failed response, or a placeholder.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("unspecified worker error")
    }
}

/// The single ready line a worker prints after initialization:
/// `{"ok": true, "status": "ready"}`.
pub fn is_ready_line(value: &serde_json::Value) -> bool {
    value.get("ok").and_then(|v| v.as_bool()) == Some(true)
        && value.get("status").and_then(|v| v.as_str()) == Some("ready")
}
