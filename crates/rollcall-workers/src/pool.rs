//! Worker pool — a non-blocking `submit(crop) -> handle` facade over N
//! persistent analysis processes.
//!
//! Submissions are queued to a small set of dispatcher threads that stage
//! the crop as a temporary JPEG, check out a live worker (round-robin,
//! restarting dead slots in place), and run the blocking exchange. The
//! calling thread never waits on a worker.

use crate::process::{WorkerError, WorkerProcess};
use crate::protocol::{AnalyzeRequest, AnalyzeResponse};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use image::imageops::FilterType;
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Pool construction parameters.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Worker executable (e.g. a Python interpreter).
    pub program: String,
    /// Arguments (e.g. the analysis script plus `--server`).
    pub args: Vec<String>,
    /// Number of worker processes.
    pub workers: usize,
    /// Number of dispatcher threads running blocking exchanges.
    pub dispatch_threads: usize,
    /// Crops larger than this on their longest side are downsampled before
    /// submission to bound transfer size. Zero disables downsampling.
    pub resize_max_side: u32,
    pub startup_timeout: Duration,
    pub request_timeout: Duration,
}

/// Result of polling an [`AnalysisHandle`].
pub type AnalysisResult = Result<AnalyzeResponse, WorkerError>;

/// Async handle for one submitted crop. Resolves exactly once.
pub struct AnalysisHandle {
    rx: Receiver<AnalysisResult>,
    downscale: f32,
}

impl AnalysisHandle {
    pub fn new(rx: Receiver<AnalysisResult>, downscale: f32) -> Self {
        Self { rx, downscale }
    }

    /// A handle that is already resolved; lets an in-process analyzer stand
    /// in for the pool behind [`AnalysisBackend`].
    pub fn immediate(result: AnalysisResult) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(result);
        Self { rx, downscale: 1.0 }
    }

    /// Wait up to `wait` for the result. `None` means still pending; the
    /// result is returned at most once across all polls.
    pub fn poll(&self, wait: Duration) -> Option<AnalysisResult> {
        match self.rx.recv_timeout(wait) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(WorkerError::TaskDropped)),
        }
    }

    /// Factor the crop was scaled by before submission (≤ 1.0). Landmark
    /// coordinates in the response live in the downscaled space.
    pub fn downscale(&self) -> f32 {
        self.downscale
    }
}

/// The `submit(crop) -> handle` seam the orchestrator depends on. Any
/// in-process analyzer can substitute for the external pool.
pub trait AnalysisBackend: Send {
    fn submit(&self, crop: &RgbImage) -> Result<AnalysisHandle, WorkerError>;
}

struct Job {
    image: RgbImage,
    reply: Sender<AnalysisResult>,
}

struct PoolSlots {
    workers: Vec<Option<Arc<WorkerProcess>>>,
    rr: usize,
}

struct PoolInner {
    config: WorkerPoolConfig,
    slots: Mutex<PoolSlots>,
}

impl PoolInner {
    /// Pick the next worker round-robin, restarting dead slots in place.
    /// Bounded by pool size; all slots dead and unrestartable means
    /// [`WorkerError::PoolExhausted`].
    fn checkout(&self) -> Result<Arc<WorkerProcess>, WorkerError> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let n = slots.workers.len();

        for _ in 0..n {
            let idx = slots.rr % n;
            slots.rr = slots.rr.wrapping_add(1);

            if let Some(worker) = &slots.workers[idx] {
                if worker.is_alive() {
                    return Ok(worker.clone());
                }
                tracing::warn!(slot = idx, pid = worker.pid(), "worker process dead");
                worker.terminate();
                slots.workers[idx] = None;
            }

            match WorkerProcess::start(
                &self.config.program,
                &self.config.args,
                self.config.startup_timeout,
            ) {
                Ok(worker) => {
                    tracing::info!(slot = idx, pid = worker.pid(), "worker started");
                    let worker = Arc::new(worker);
                    slots.workers[idx] = Some(worker.clone());
                    return Ok(worker);
                }
                Err(e) => {
                    tracing::error!(slot = idx, error = %e, "failed to start worker");
                }
            }
        }

        Err(WorkerError::PoolExhausted)
    }

    fn terminate_all(&self) {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        for worker in slots.workers.iter().flatten() {
            worker.terminate();
        }
    }
}

/// Managed set of external analysis processes.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    jobs: Sender<Job>,
    closed: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Start the pool. Slots whose worker fails to launch stay empty and
    /// are retried on checkout, so a partially-started pool still serves.
    pub fn start(config: WorkerPoolConfig) -> Self {
        let worker_count = config.workers.max(1);
        let dispatcher_count = config.dispatch_threads.max(1);

        let mut workers = Vec::with_capacity(worker_count);
        for slot in 0..worker_count {
            match WorkerProcess::start(&config.program, &config.args, config.startup_timeout) {
                Ok(worker) => {
                    tracing::info!(slot, pid = worker.pid(), "worker started");
                    workers.push(Some(Arc::new(worker)));
                }
                Err(e) => {
                    tracing::error!(slot, error = %e, "failed to start worker");
                    workers.push(None);
                }
            }
        }

        let inner = Arc::new(PoolInner {
            config,
            slots: Mutex::new(PoolSlots { workers, rr: 0 }),
        });

        let (jobs, job_rx) = bounded::<Job>(dispatcher_count * 2);
        let closed = Arc::new(AtomicBool::new(false));

        for i in 0..dispatcher_count {
            let inner = inner.clone();
            let job_rx = job_rx.clone();
            let closed = closed.clone();
            // Dispatchers exit when the job sender is dropped with the pool.
            std::thread::Builder::new()
                .name(format!("analysis-dispatch-{i}"))
                .spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        if closed.load(Ordering::SeqCst) {
                            let _ = job.reply.send(Err(WorkerError::Closed));
                            continue;
                        }
                        let result = run_exchange(&inner, &job.image);
                        // The receiver may have been abandoned; that is fine.
                        let _ = job.reply.send(result);
                    }
                })
                .expect("failed to spawn dispatcher thread");
        }

        Self {
            inner,
            jobs,
            closed,
        }
    }

    /// Terminate all workers and refuse further work. In-flight exchanges
    /// fail fast against their killed processes; nothing blocks.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("closing worker pool");
        self.inner.terminate_all();
    }
}

impl AnalysisBackend for WorkerPool {
    /// Queue one crop for analysis, returning immediately with a handle.
    fn submit(&self, crop: &RgbImage) -> Result<AnalysisHandle, WorkerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WorkerError::Closed);
        }

        let (image, downscale) = downsample(crop, self.inner.config.resize_max_side);
        let (tx, rx) = bounded(1);

        match self.jobs.try_send(Job { image, reply: tx }) {
            Ok(()) => Ok(AnalysisHandle::new(rx, downscale)),
            Err(TrySendError::Full(_)) => Err(WorkerError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(WorkerError::Closed),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

/// Stage the crop as a temp JPEG and run one exchange against a checked-out
/// worker. The temp file is removed when it drops.
fn run_exchange(inner: &PoolInner, image: &RgbImage) -> AnalysisResult {
    let staged = tempfile::Builder::new()
        .prefix("rollcall-crop-")
        .suffix(".jpg")
        .tempfile()
        .map_err(|e| WorkerError::Staging(e.to_string()))?;
    image
        .save(staged.path())
        .map_err(|e| WorkerError::Staging(e.to_string()))?;

    let path = staged.path().to_string_lossy();
    let request = AnalyzeRequest::from_path(&path);

    let worker = inner.checkout()?;
    worker.submit(&request, inner.config.request_timeout)
}

/// Shrink a crop so its longest side is at most `max_side`, preserving
/// aspect. Returns the image to send and the scale factor that was applied.
fn downsample(crop: &RgbImage, max_side: u32) -> (RgbImage, f32) {
    let (w, h) = crop.dimensions();
    let longest = w.max(h);
    if max_side == 0 || longest <= max_side {
        return (crop.clone(), 1.0);
    }
    let scale = max_side as f32 / longest as f32;
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);
    (
        image::imageops::resize(crop, new_w, new_h, FilterType::Triangle),
        scale,
    )
}
