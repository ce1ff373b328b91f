//! rollcall-workers — persistent external analysis processes.
//!
//! Speaks the line-delimited JSON protocol of the landmark/pose/blur
//! worker, manages a self-healing pool of worker processes, and exposes a
//! non-blocking `submit(crop) -> handle` API to the recognition pipeline.

pub mod pool;
pub mod process;
pub mod protocol;

pub use pool::{AnalysisBackend, AnalysisHandle, AnalysisResult, WorkerPool, WorkerPoolConfig};
pub use process::{WorkerError, WorkerProcess};
pub use protocol::{AnalyzeRequest, AnalyzeResponse, WireLandmarks};
