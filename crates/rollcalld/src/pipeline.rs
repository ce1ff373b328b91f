//! Recognition orchestrator — the per-frame driver tying detection,
//! tracking, worker submission, harvesting, matching, and annotation.
//!
//! Per-track state machine:
//! detected → submitted → pending → (quality-rejected | aligned) →
//! embedded → (matched | unknown). Every per-track failure degrades that
//! track alone; the frame and its other tracks always continue.

use crate::annotate;
use crate::archiver::UnknownFaceArchiver;
use crate::attendance::AttendanceWriter;
use crate::config::Config;
use chrono::Utc;
use image::RgbImage;
use rollcall_core::alignment;
use rollcall_core::quality::laplacian_variance;
use rollcall_core::{
    BoundingBox, CentroidTracker, FaceDetector, FaceEmbedder, MatchOutcome, PersonBank,
    QualityGate, QualityReject,
};
use rollcall_workers::{AnalysisBackend, AnalysisHandle};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Immutable orchestration thresholds, fixed at construction.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub detect_every: u64,
    pub recognize_every: u64,
    pub max_lost: u32,
    pub padding: u32,
    pub min_face_area: u32,
    pub blur_threshold: f32,
    pub harvest_wait: Duration,
    pub max_harvest_attempts: u32,
    pub min_similarity: f32,
    pub min_margin: f32,
    pub attendance_cooldown: Duration,
}

impl PipelineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            detect_every: cfg.pipeline.detect_every.max(1),
            recognize_every: cfg.pipeline.recognize_every.max(1),
            max_lost: cfg.pipeline.max_lost,
            padding: cfg.quality.padding,
            min_face_area: cfg.quality.min_face_area,
            blur_threshold: cfg.quality.blur_threshold,
            harvest_wait: Duration::from_millis(cfg.pipeline.harvest_wait_ms),
            max_harvest_attempts: cfg.pipeline.max_harvest_attempts.max(1),
            min_similarity: cfg.matching.min_similarity,
            min_margin: cfg.matching.min_margin,
            attendance_cooldown: Duration::from_secs_f64(cfg.attendance.cooldown_secs),
        }
    }
}

/// Quality gate thresholds from the config.
pub fn gate_from_config(cfg: &Config) -> QualityGate {
    QualityGate {
        max_yaw_degrees: cfg.quality.max_yaw_degrees,
        max_pitch_degrees: cfg.quality.max_pitch_degrees,
        min_blur: cfg.quality.blur_threshold,
        min_face_area: cfg.quality.min_face_area,
    }
}

/// A track's current best-known state, persisted between recognition
/// strides for annotation.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackLabel {
    /// Submitted or awaiting first analysis.
    Pending,
    /// Pre-filter: padded crop below the area floor.
    TooSmall,
    /// Pre-filter: padded crop below the sharpness floor.
    Blurry,
    /// Quality gate or downstream stage rejected the face.
    Rejected(QualityReject),
    /// Embedded but matched nobody with enough confidence.
    Unknown,
    /// Matched a person-bank identity.
    Known { name: String, similarity: f32 },
}

#[derive(Debug, Clone)]
pub struct TrackAnnotation {
    pub track_id: u64,
    pub bbox: BoundingBox,
    pub label: TrackLabel,
}

/// What the orchestrator concluded about one frame.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame_index: u64,
    pub tracks: Vec<TrackAnnotation>,
}

/// A submitted-but-unresolved analysis. Consumed exactly once when its
/// handle resolves or the attempt budget runs out.
struct PendingAnalysis {
    track_id: u64,
    bbox: BoundingBox,
    crop: RgbImage,
    confidence: f32,
    handle: AnalysisHandle,
    harvest_attempts: u32,
}

struct EmbedCandidate {
    track_id: u64,
    aligned: RgbImage,
    confidence: f32,
}

pub struct Orchestrator {
    detector: Box<dyn FaceDetector>,
    embedder: Box<dyn FaceEmbedder>,
    backend: Box<dyn AnalysisBackend>,
    bank: Arc<PersonBank>,
    writer: AttendanceWriter,
    archiver: UnknownFaceArchiver,
    gate: QualityGate,
    settings: PipelineSettings,
    tracker: CentroidTracker,
    pending: Vec<PendingAnalysis>,
    labels: HashMap<u64, TrackLabel>,
    last_recognized: HashMap<u64, u64>,
    frame_index: u64,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        detector: Box<dyn FaceDetector>,
        embedder: Box<dyn FaceEmbedder>,
        backend: Box<dyn AnalysisBackend>,
        bank: Arc<PersonBank>,
        writer: AttendanceWriter,
        archiver: UnknownFaceArchiver,
        gate: QualityGate,
        settings: PipelineSettings,
    ) -> Self {
        let tracker = CentroidTracker::new(settings.max_lost);
        Self {
            detector,
            embedder,
            backend,
            bank,
            writer,
            archiver,
            gate,
            settings,
            tracker,
            pending: Vec::new(),
            labels: HashMap::new(),
            last_recognized: HashMap::new(),
            frame_index: 0,
        }
    }

    /// Number of analyses still awaiting a worker result.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Run one frame through the pipeline, drawing annotations in place.
    pub fn process_frame(&mut self, frame: &mut RgbImage) -> FrameReport {
        self.frame_index += 1;

        // Harvest runs every frame so pending work from earlier frames
        // resolves even while detection is striding.
        let candidates = self.harvest();

        if self.frame_index % self.settings.detect_every == 0 {
            self.detect_and_submit(frame);
        }

        if !candidates.is_empty() {
            self.embed_and_match(candidates);
        }

        self.annotate(frame)
    }

    /// Flush the attendance queue and release the analysis backend.
    pub fn shutdown(self) {
        self.writer.shutdown();
    }

    /// Poll every outstanding analysis with a short bound; resolve, abandon,
    /// or carry each. Resolved analyses that pass the quality gate come back
    /// as aligned embedding candidates.
    fn harvest(&mut self) -> Vec<EmbedCandidate> {
        let wait = self.settings.harvest_wait;
        let max_attempts = self.settings.max_harvest_attempts;
        let mut candidates = Vec::new();
        let mut still_pending = Vec::new();

        for mut p in std::mem::take(&mut self.pending) {
            match p.handle.poll(wait) {
                Some(Ok(response)) => match response.to_analysis() {
                    Some(analysis) => {
                        let downscale = p.handle.downscale();
                        let to_original = if downscale > 0.0 { 1.0 / downscale } else { 1.0 };
                        match self.gate.evaluate(&analysis, to_original) {
                            Ok(()) => {
                                // Landmarks come back in downsampled-crop
                                // coordinates; map them onto the full crop.
                                let landmarks =
                                    analysis.landmarks.map(|lm| lm.scaled(to_original));
                                let aligned = alignment::align_crop(&p.crop, landmarks.as_ref());
                                // Terminal for the analysis even though the
                                // match lands later this frame; without this
                                // the same frame's detection phase would
                                // resubmit the track.
                                self.last_recognized.insert(p.track_id, self.frame_index);
                                candidates.push(EmbedCandidate {
                                    track_id: p.track_id,
                                    aligned,
                                    confidence: p.confidence,
                                });
                            }
                            Err(reject) => {
                                tracing::debug!(
                                    track = p.track_id,
                                    reason = %reject,
                                    "quality gate rejected face"
                                );
                                self.reject(p.track_id, TrackLabel::Rejected(reject));
                            }
                        }
                    }
                    None => {
                        tracing::debug!(
                            track = p.track_id,
                            error = response.error_message(),
                            "worker reported analysis failure"
                        );
                        self.reject(
                            p.track_id,
                            TrackLabel::Rejected(QualityReject::Failed(
                                response.error_message().to_string(),
                            )),
                        );
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(track = p.track_id, error = %e, "analysis exchange failed");
                    self.reject(
                        p.track_id,
                        TrackLabel::Rejected(QualityReject::Failed(e.to_string())),
                    );
                }
                None => {
                    p.harvest_attempts += 1;
                    if p.harvest_attempts >= max_attempts {
                        tracing::warn!(
                            track = p.track_id,
                            bbox = ?p.bbox,
                            attempts = p.harvest_attempts,
                            "abandoning analysis that never resolved"
                        );
                        self.reject(
                            p.track_id,
                            TrackLabel::Rejected(QualityReject::Failed(
                                "analysis never resolved".to_string(),
                            )),
                        );
                    } else {
                        still_pending.push(p);
                    }
                }
            }
        }

        self.pending = still_pending;
        candidates
    }

    /// Detector pass: update tracks, pre-filter crops, submit survivors.
    fn detect_and_submit(&mut self, frame: &RgbImage) {
        let detections = match self.detector.detect(frame) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "detector failed, frame skipped");
                return;
            }
        };

        let boxes: Vec<BoundingBox> = detections.iter().map(|d| d.bbox).collect();
        let assigned = self.tracker.update(&boxes);

        // Drop per-track state the tracker no longer knows about.
        let tracker = &self.tracker;
        self.labels.retain(|id, _| tracker.contains(*id));
        self.last_recognized.retain(|id, _| tracker.contains(*id));

        let (frame_w, frame_h) = frame.dimensions();

        for (i, &(track_id, bbox)) in assigned.iter().enumerate() {
            if self.pending.iter().any(|p| p.track_id == track_id) {
                continue; // analysis already in flight for this track
            }

            let Some((x, y, w, h)) =
                bbox.padded_rect(self.settings.padding, frame_w, frame_h)
            else {
                continue;
            };

            if w * h < self.settings.min_face_area {
                self.labels.insert(track_id, TrackLabel::TooSmall);
                continue;
            }

            let crop = image::imageops::crop_imm(frame, x, y, w, h).to_image();
            if laplacian_variance(&crop) < self.settings.blur_threshold as f64 {
                self.labels.insert(track_id, TrackLabel::Blurry);
                continue;
            }

            let due = self
                .last_recognized
                .get(&track_id)
                .map_or(true, |&last| {
                    self.frame_index - last >= self.settings.recognize_every
                });
            if !due {
                continue;
            }

            let confidence = detections.get(i).map_or(0.0, |d| d.confidence);
            match self.backend.submit(&crop) {
                Ok(handle) => {
                    self.labels.entry(track_id).or_insert(TrackLabel::Pending);
                    self.pending.push(PendingAnalysis {
                        track_id,
                        bbox,
                        crop,
                        confidence,
                        handle,
                        harvest_attempts: 0,
                    });
                }
                Err(e) => {
                    tracing::warn!(track = track_id, error = %e, "analysis submission failed");
                    self.reject(
                        track_id,
                        TrackLabel::Rejected(QualityReject::Failed(e.to_string())),
                    );
                }
            }
        }
    }

    /// Embed this frame's aligned crops as one batch and match each against
    /// the person bank.
    fn embed_and_match(&mut self, candidates: Vec<EmbedCandidate>) {
        let mut crops = Vec::with_capacity(candidates.len());
        let mut meta = Vec::with_capacity(candidates.len());
        for c in candidates {
            crops.push(c.aligned);
            meta.push((c.track_id, c.confidence));
        }

        let embeddings = self.embedder.embed_batch(&crops);

        for (((track_id, confidence), embedding), aligned) in
            meta.into_iter().zip(embeddings).zip(crops)
        {
            let Some(embedding) = embedding else {
                tracing::debug!(track = track_id, "embedding failed");
                self.reject(
                    track_id,
                    TrackLabel::Rejected(QualityReject::Failed("embedding failed".to_string())),
                );
                continue;
            };

            let probe = embedding.l2_normalized();
            match self.bank.identify(
                &probe,
                self.settings.min_similarity,
                self.settings.min_margin,
            ) {
                MatchOutcome::Match {
                    name, similarity, ..
                } => {
                    self.writer.mark(
                        &name,
                        confidence,
                        1.0 - similarity,
                        self.settings.attendance_cooldown,
                        Utc::now(),
                    );
                    self.labels.insert(
                        track_id,
                        TrackLabel::Known { name, similarity },
                    );
                    self.last_recognized.insert(track_id, self.frame_index);
                }
                MatchOutcome::Ambiguous { best, second } => {
                    tracing::debug!(track = track_id, best, second, "ambiguous match");
                    self.mark_unknown(track_id, &aligned);
                }
                MatchOutcome::NoMatch { best } => {
                    tracing::debug!(track = track_id, best, "below similarity floor");
                    self.mark_unknown(track_id, &aligned);
                }
            }
        }
    }

    fn mark_unknown(&mut self, track_id: u64, crop: &RgbImage) {
        self.archiver.offer(crop);
        self.labels.insert(track_id, TrackLabel::Unknown);
        self.last_recognized.insert(track_id, self.frame_index);
    }

    /// A rejected/ambiguous track waits a full recognition stride before it
    /// is analyzed again.
    fn reject(&mut self, track_id: u64, label: TrackLabel) {
        self.labels.insert(track_id, label);
        self.last_recognized.insert(track_id, self.frame_index);
    }

    /// Draw every live track with its current best-known label and report
    /// the same as data.
    fn annotate(&self, frame: &mut RgbImage) -> FrameReport {
        let mut tracks = Vec::new();
        for (track_id, bbox) in self.tracker.live_tracks() {
            let label = self
                .labels
                .get(&track_id)
                .cloned()
                .unwrap_or(TrackLabel::Pending);
            annotate::draw_track(frame, &bbox, &label);
            tracks.push(TrackAnnotation {
                track_id,
                bbox,
                label,
            });
        }
        FrameReport {
            frame_index: self.frame_index,
            tracks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::types::{Detection, Embedding};
    use rollcall_core::DetectorError;
    use rollcall_workers::{AnalyzeResponse, WorkerError};
    use rusqlite::Connection;
    use std::sync::Mutex;

    struct ScriptedDetector {
        detections: Vec<Detection>,
        calls: Arc<Mutex<u32>>,
    }

    impl FaceDetector for ScriptedDetector {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.detections.clone())
        }
    }

    struct FixedEmbedder {
        values: Option<Vec<f32>>,
        calls: Arc<Mutex<u32>>,
    }

    impl FaceEmbedder for FixedEmbedder {
        fn embed_batch(&mut self, crops: &[RgbImage]) -> Vec<Option<Embedding>> {
            *self.calls.lock().unwrap() += 1;
            crops
                .iter()
                .map(|_| self.values.clone().map(Embedding::new))
                .collect()
        }
    }

    enum BackendMode {
        Immediate(String),
        NeverResolves,
        Refuse,
    }

    struct StubBackend {
        mode: BackendMode,
        submissions: Arc<Mutex<u32>>,
        // Keeps never-resolving channels open so polls stay pending.
        parked: Mutex<Vec<crossbeam_channel::Sender<rollcall_workers::AnalysisResult>>>,
    }

    impl AnalysisBackend for StubBackend {
        fn submit(&self, _crop: &RgbImage) -> Result<AnalysisHandle, WorkerError> {
            *self.submissions.lock().unwrap() += 1;
            match &self.mode {
                BackendMode::Immediate(json) => {
                    let response: AnalyzeResponse = serde_json::from_str(json).unwrap();
                    Ok(AnalysisHandle::immediate(Ok(response)))
                }
                BackendMode::NeverResolves => {
                    let (tx, rx) = crossbeam_channel::bounded(1);
                    self.parked.lock().unwrap().push(tx);
                    Ok(AnalysisHandle::new(rx, 1.0))
                }
                BackendMode::Refuse => Err(WorkerError::PoolExhausted),
            }
        }
    }

    const GOOD_ANALYSIS: &str = r#"{
        "ok": true,
        "landmarks": {"left_eye": [40.0, 45.0], "right_eye": [80.0, 45.0],
                      "nose": [60.0, 70.0]},
        "yaw": 2.0, "pitch": 1.0, "blur": 250.0, "area": 10000
    }"#;

    const SIDE_FACE_ANALYSIS: &str = r#"{
        "ok": true,
        "landmarks": {"left_eye": [40.0, 45.0], "right_eye": [80.0, 45.0],
                      "nose": [60.0, 70.0]},
        "yaw": 48.0, "pitch": 1.0, "blur": 250.0, "area": 10000
    }"#;

    struct Fixture {
        orchestrator: Orchestrator,
        db_path: std::path::PathBuf,
        detector_calls: Arc<Mutex<u32>>,
        embedder_calls: Arc<Mutex<u32>>,
        submissions: Arc<Mutex<u32>>,
        _dir: tempfile::TempDir,
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            detect_every: 1,
            recognize_every: 5,
            max_lost: 30,
            padding: 0,
            min_face_area: 1600,
            blur_threshold: 20.0,
            harvest_wait: Duration::from_millis(1),
            max_harvest_attempts: 3,
            min_similarity: 0.72,
            min_margin: 0.05,
            attendance_cooldown: Duration::from_secs(60),
        }
    }

    fn fixture(
        mode: BackendMode,
        bank_rows: &[(&str, Vec<f32>)],
        embedding: Option<Vec<f32>>,
        settings: PipelineSettings,
        detections: Vec<Detection>,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("attendance.db");

        let detector_calls = Arc::new(Mutex::new(0));
        let embedder_calls = Arc::new(Mutex::new(0));
        let submissions = Arc::new(Mutex::new(0));

        let names = bank_rows.iter().map(|(n, _)| n.to_string()).collect();
        let rows = bank_rows.iter().map(|(_, e)| e.clone()).collect();
        let bank = Arc::new(PersonBank::build(names, rows).unwrap());

        let orchestrator = Orchestrator::new(
            Box::new(ScriptedDetector {
                detections,
                calls: detector_calls.clone(),
            }),
            Box::new(FixedEmbedder {
                values: embedding,
                calls: embedder_calls.clone(),
            }),
            Box::new(StubBackend {
                mode,
                submissions: submissions.clone(),
                parked: Mutex::new(Vec::new()),
            }),
            bank,
            AttendanceWriter::open(&db_path).unwrap(),
            UnknownFaceArchiver::new(dir.path().join("unknown"), Duration::from_secs(60)),
            QualityGate {
                max_yaw_degrees: 20.0,
                max_pitch_degrees: 15.0,
                min_blur: 80.0,
                min_face_area: 1600,
            },
            settings,
        );

        Fixture {
            orchestrator,
            db_path,
            detector_calls,
            embedder_calls,
            submissions,
            _dir: dir,
        }
    }

    /// 320x240 frame with enough texture to clear the blur pre-filter.
    fn textured_frame() -> RgbImage {
        RgbImage::from_fn(320, 240, |x, y| {
            if (x / 2 + y / 2) % 2 == 0 {
                image::Rgb([255, 255, 255])
            } else {
                image::Rgb([0, 0, 0])
            }
        })
    }

    fn face_detection() -> Detection {
        Detection {
            bbox: BoundingBox::new(60.0, 40.0, 180.0, 160.0),
            confidence: 0.9,
        }
    }

    fn attendance_rows(db_path: &std::path::Path) -> Vec<String> {
        let conn = Connection::open(db_path).unwrap();
        let mut stmt = conn.prepare("SELECT name FROM attendance").unwrap();
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        rows
    }

    #[test]
    fn known_face_marks_attendance() {
        let mut fx = fixture(
            BackendMode::Immediate(GOOD_ANALYSIS.to_string()),
            &[("alice", vec![1.0, 0.0]), ("bob", vec![0.0, 1.0])],
            Some(vec![1.0, 0.0]),
            settings(),
            vec![face_detection()],
        );

        let mut frame = textured_frame();
        fx.orchestrator.process_frame(&mut frame); // detect + submit
        let report = fx.orchestrator.process_frame(&mut frame); // harvest + match

        let label = &report.tracks[0].label;
        match label {
            TrackLabel::Known { name, similarity } => {
                assert_eq!(name, "alice");
                assert!(*similarity > 0.9);
            }
            other => panic!("expected known label, got {other:?}"),
        }
        assert_eq!(fx.orchestrator.pending_count(), 0);

        fx.orchestrator.shutdown();
        assert_eq!(attendance_rows(&fx.db_path), vec!["alice".to_string()]);
    }

    #[test]
    fn ambiguous_match_stays_unknown() {
        // Two bank identities nearly collinear: floor passes, margin fails.
        let mut fx = fixture(
            BackendMode::Immediate(GOOD_ANALYSIS.to_string()),
            &[("alice", vec![1.0, 0.0]), ("bob", vec![0.95, 0.1])],
            Some(vec![1.0, 0.0]),
            settings(),
            vec![face_detection()],
        );

        let mut frame = textured_frame();
        fx.orchestrator.process_frame(&mut frame);
        let report = fx.orchestrator.process_frame(&mut frame);

        assert_eq!(report.tracks[0].label, TrackLabel::Unknown);
        fx.orchestrator.shutdown();
        assert!(attendance_rows(&fx.db_path).is_empty());
    }

    #[test]
    fn side_face_is_quality_rejected_before_embedding() {
        let mut fx = fixture(
            BackendMode::Immediate(SIDE_FACE_ANALYSIS.to_string()),
            &[("alice", vec![1.0, 0.0])],
            Some(vec![1.0, 0.0]),
            settings(),
            vec![face_detection()],
        );

        let mut frame = textured_frame();
        fx.orchestrator.process_frame(&mut frame);
        let report = fx.orchestrator.process_frame(&mut frame);

        assert!(matches!(
            report.tracks[0].label,
            TrackLabel::Rejected(QualityReject::Yaw { .. })
        ));
        assert_eq!(*fx.embedder_calls.lock().unwrap(), 0);
        fx.orchestrator.shutdown();
        assert!(attendance_rows(&fx.db_path).is_empty());
    }

    #[test]
    fn unresolved_analysis_is_abandoned_within_attempt_budget() {
        let mut fx = fixture(
            BackendMode::NeverResolves,
            &[("alice", vec![1.0, 0.0])],
            Some(vec![1.0, 0.0]),
            settings(), // max_harvest_attempts = 3
            vec![face_detection()],
        );

        let mut frame = textured_frame();
        fx.orchestrator.process_frame(&mut frame); // submit
        assert_eq!(fx.orchestrator.pending_count(), 1);

        // Three more frames: attempts 1, 2, 3; the third abandons.
        fx.orchestrator.process_frame(&mut frame);
        fx.orchestrator.process_frame(&mut frame);
        let report = fx.orchestrator.process_frame(&mut frame);

        assert_eq!(fx.orchestrator.pending_count(), 0);
        assert!(matches!(
            report.tracks[0].label,
            TrackLabel::Rejected(QualityReject::Failed(_))
        ));
        // The in-flight analysis was never resubmitted.
        assert_eq!(*fx.submissions.lock().unwrap(), 1);
        fx.orchestrator.shutdown();
    }

    #[test]
    fn detection_runs_on_the_configured_stride() {
        let mut cfg = settings();
        cfg.detect_every = 2;
        let mut fx = fixture(
            BackendMode::Immediate(GOOD_ANALYSIS.to_string()),
            &[("alice", vec![1.0, 0.0])],
            Some(vec![1.0, 0.0]),
            cfg,
            vec![face_detection()],
        );

        let mut frame = textured_frame();
        for _ in 0..4 {
            fx.orchestrator.process_frame(&mut frame);
        }
        assert_eq!(*fx.detector_calls.lock().unwrap(), 2);
        fx.orchestrator.shutdown();
    }

    #[test]
    fn pool_refusal_degrades_the_track_not_the_frame() {
        let mut fx = fixture(
            BackendMode::Refuse,
            &[("alice", vec![1.0, 0.0])],
            Some(vec![1.0, 0.0]),
            settings(),
            vec![face_detection()],
        );

        let mut frame = textured_frame();
        let report = fx.orchestrator.process_frame(&mut frame);

        assert_eq!(report.tracks.len(), 1);
        assert!(matches!(
            report.tracks[0].label,
            TrackLabel::Rejected(QualityReject::Failed(_))
        ));
        // The stride gate keeps the failed track from hammering the pool.
        fx.orchestrator.process_frame(&mut frame);
        assert_eq!(*fx.submissions.lock().unwrap(), 1);
        fx.orchestrator.shutdown();
    }

    #[test]
    fn tiny_face_never_reaches_the_pool() {
        let mut fx = fixture(
            BackendMode::Immediate(GOOD_ANALYSIS.to_string()),
            &[("alice", vec![1.0, 0.0])],
            Some(vec![1.0, 0.0]),
            settings(),
            vec![Detection {
                bbox: BoundingBox::new(10.0, 10.0, 30.0, 30.0),
                confidence: 0.9,
            }],
        );

        let mut frame = textured_frame();
        let report = fx.orchestrator.process_frame(&mut frame);

        assert_eq!(report.tracks[0].label, TrackLabel::TooSmall);
        assert_eq!(*fx.submissions.lock().unwrap(), 0);
        fx.orchestrator.shutdown();
    }

    #[test]
    fn uniform_crop_is_prefiltered_as_blurry() {
        let mut fx = fixture(
            BackendMode::Immediate(GOOD_ANALYSIS.to_string()),
            &[("alice", vec![1.0, 0.0])],
            Some(vec![1.0, 0.0]),
            settings(),
            vec![face_detection()],
        );

        let mut frame = RgbImage::from_pixel(320, 240, image::Rgb([128, 128, 128]));
        let report = fx.orchestrator.process_frame(&mut frame);

        assert_eq!(report.tracks[0].label, TrackLabel::Blurry);
        assert_eq!(*fx.submissions.lock().unwrap(), 0);
        fx.orchestrator.shutdown();
    }

    #[test]
    fn no_match_archives_and_labels_unknown() {
        let mut fx = fixture(
            BackendMode::Immediate(GOOD_ANALYSIS.to_string()),
            &[("alice", vec![1.0, 0.0])],
            Some(vec![0.0, 1.0]), // orthogonal to everyone
            settings(),
            vec![face_detection()],
        );

        let mut frame = textured_frame();
        fx.orchestrator.process_frame(&mut frame);
        let report = fx.orchestrator.process_frame(&mut frame);

        assert_eq!(report.tracks[0].label, TrackLabel::Unknown);
        fx.orchestrator.shutdown();
        assert!(attendance_rows(&fx.db_path).is_empty());
    }

    #[test]
    fn embedding_failure_rejects_the_track() {
        let mut fx = fixture(
            BackendMode::Immediate(GOOD_ANALYSIS.to_string()),
            &[("alice", vec![1.0, 0.0])],
            None, // embedder yields nothing
            settings(),
            vec![face_detection()],
        );

        let mut frame = textured_frame();
        fx.orchestrator.process_frame(&mut frame);
        let report = fx.orchestrator.process_frame(&mut frame);

        assert!(matches!(
            report.tracks[0].label,
            TrackLabel::Rejected(QualityReject::Failed(_))
        ));
        fx.orchestrator.shutdown();
    }
}
