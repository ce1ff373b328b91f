//! Frame ingestion: a producer thread feeding a single latest-frame slot.
//!
//! The slot overwrites on publish (drop-oldest), so the recognition loop
//! always works on the freshest frame and a slow frame never builds a
//! backlog.

use image::RgbImage;
use rollcall_hw::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Anything that can produce frames for the pipeline.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> anyhow::Result<RgbImage>;
}

/// V4L2-backed source that reopens the device after capture failures.
pub struct CameraSource {
    device: String,
    width: u32,
    height: u32,
    camera: Option<Camera>,
}

impl CameraSource {
    pub fn new(device: String, width: u32, height: u32) -> Self {
        Self {
            device,
            width,
            height,
            camera: None,
        }
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> anyhow::Result<RgbImage> {
        if self.camera.is_none() {
            self.camera = Some(Camera::open(&self.device, self.width, self.height)?);
        }
        // The option was just filled; still avoid unwrap in the error path.
        let Some(camera) = self.camera.as_ref() else {
            anyhow::bail!("camera not open");
        };
        match camera.capture_frame() {
            Ok(frame) => Ok(frame),
            Err(e) => {
                // Force a reopen on the next call.
                self.camera = None;
                Err(e.into())
            }
        }
    }
}

struct SlotInner {
    frame: Mutex<Option<RgbImage>>,
    available: Condvar,
    closed: AtomicBool,
}

/// Single-frame slot with drop-oldest overwrite.
#[derive(Clone)]
pub struct FrameSlot {
    inner: Arc<SlotInner>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SlotInner {
                frame: Mutex::new(None),
                available: Condvar::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Publish a frame, replacing any unconsumed predecessor.
    pub fn publish(&self, frame: RgbImage) {
        let mut slot = self
            .inner
            .frame
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *slot = Some(frame);
        self.inner.available.notify_one();
    }

    /// Take the latest frame, waiting up to `timeout` for one to arrive.
    /// Returns `None` on timeout or once the slot is closed and drained.
    pub fn take(&self, timeout: Duration) -> Option<RgbImage> {
        let mut slot = self
            .inner
            .frame
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if slot.is_none() && !self.is_closed() {
            let (guard, _result) = self
                .inner
                .available
                .wait_timeout(slot, timeout)
                .unwrap_or_else(|e| e.into_inner());
            slot = guard;
        }
        slot.take()
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a frame source on its own thread, publishing into the slot until
/// `stop` is set. Capture failures back off exponentially (capped at 8 s)
/// and keep retrying; the source decides how to reconnect.
pub fn spawn_reader(
    mut source: Box<dyn FrameSource>,
    slot: FrameSlot,
    stop: Arc<AtomicBool>,
    base_delay: Duration,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("frame-reader".to_string())
        .spawn(move || {
            let mut failures = 0u32;
            while !stop.load(Ordering::SeqCst) {
                match source.next_frame() {
                    Ok(frame) => {
                        failures = 0;
                        slot.publish(frame);
                    }
                    Err(e) => {
                        failures += 1;
                        let backoff = base_delay
                            .saturating_mul(1 << failures.min(6))
                            .min(Duration::from_secs(8));
                        tracing::warn!(
                            error = %e,
                            failures,
                            backoff_ms = backoff.as_millis() as u64,
                            "frame capture failed"
                        );
                        std::thread::sleep(backoff);
                    }
                }
            }
            slot.close();
            tracing::info!("frame reader stopped");
        })
        .expect("failed to spawn frame reader thread")
}
