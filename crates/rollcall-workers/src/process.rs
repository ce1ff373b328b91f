//! Handle for one persistent external analysis process.
//!
//! Owns the child process and speaks the line-delimited protocol over its
//! stdin/stdout. A background reader thread drains stdout into a response
//! channel so `submit` waits on a channel, not on the OS pipe.

use crate::protocol::{self, AnalyzeRequest, AnalyzeResponse};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("worker failed to start: {0}")]
    Startup(String),
    #[error("worker did not signal ready within {0:?}")]
    StartupTimeout(Duration),
    #[error("timed out waiting for worker response")]
    CommunicationTimeout,
    #[error("worker process died")]
    ProcessDied,
    #[error("all worker slots are dead")]
    PoolExhausted,
    #[error("analysis queue is full")]
    QueueFull,
    #[error("worker pool is closed")]
    Closed,
    #[error("analysis task was dropped before completion")]
    TaskDropped,
    #[error("failed to stage request image: {0}")]
    Staging(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

struct WorkerIo {
    stdin: ChildStdin,
    responses: Receiver<serde_json::Value>,
}

/// One live external analysis process.
///
/// A whole request/response exchange runs under the handle's IO lock:
/// responses are correlated to requests purely by stream order, so two
/// interleaved requests on one process would cross-correlate.
pub struct WorkerProcess {
    child: Mutex<Child>,
    io: Mutex<WorkerIo>,
    pid: u32,
}

impl WorkerProcess {
    /// Launch the worker and wait for its `{"ok":true,"status":"ready"}`
    /// line, bounded by `startup_timeout`.
    pub fn start(
        program: &str,
        args: &[String],
        startup_timeout: Duration,
    ) -> Result<Self, WorkerError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| WorkerError::Startup(format!("{program}: {e}")))?;

        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::Startup("no stdin pipe".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Startup("no stdout pipe".into()))?;

        let (tx, responses) = unbounded();
        std::thread::Builder::new()
            .name(format!("worker-reader-{pid}"))
            .spawn(move || {
                let reader = BufReader::new(stdout);
                for line in reader.lines() {
                    let Ok(line) = line else { break };
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let value = serde_json::from_str(trimmed).unwrap_or_else(|_| {
                        serde_json::json!({"ok": false, "error": "invalid_json"})
                    });
                    if tx.send(value).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| WorkerError::Startup(format!("reader thread: {e}")))?;

        match responses.recv_timeout(startup_timeout) {
            Ok(value) if protocol::is_ready_line(&value) => {
                tracing::debug!(pid, "worker ready");
            }
            Ok(value) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(WorkerError::Startup(format!(
                    "unexpected first line: {value}"
                )));
            }
            Err(RecvTimeoutError::Timeout) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(WorkerError::StartupTimeout(startup_timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = child.wait();
                return Err(WorkerError::Startup(
                    "worker exited before signalling ready".into(),
                ));
            }
        }

        Ok(Self {
            child: Mutex::new(child),
            io: Mutex::new(WorkerIo { stdin, responses }),
            pid,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Send one request and wait for its response, bounded by `timeout`.
    ///
    /// Concurrent callers queue behind the IO lock; a timeout leaves the
    /// worker-side computation running, and its late response is drained
    /// before the next request so correlation stays in step.
    pub fn submit(
        &self,
        request: &AnalyzeRequest<'_>,
        timeout: Duration,
    ) -> Result<AnalyzeResponse, WorkerError> {
        let mut io = self.io.lock().unwrap_or_else(|e| e.into_inner());

        while let Ok(stale) = io.responses.try_recv() {
            tracing::warn!(pid = self.pid, %stale, "discarding stale worker response");
        }

        let mut line = serde_json::to_string(request)
            .map_err(|e| WorkerError::Staging(format!("encode request: {e}")))?;
        line.push('\n');
        io.stdin.write_all(line.as_bytes())?;
        io.stdin.flush()?;

        match io.responses.recv_timeout(timeout) {
            Ok(value) => Ok(serde_json::from_value(value).unwrap_or_else(|e| AnalyzeResponse {
                ok: false,
                error: Some(format!("malformed response: {e}")),
                landmarks: None,
                yaw: None,
                pitch: None,
                blur: None,
                area: None,
                bbox: None,
            })),
            Err(RecvTimeoutError::Timeout) => Err(WorkerError::CommunicationTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(WorkerError::ProcessDied),
        }
    }

    /// Whether the underlying process is still running.
    pub fn is_alive(&self) -> bool {
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        matches!(child.try_wait(), Ok(None))
    }

    /// Best-effort termination; idempotent. Also reaps the process.
    pub fn terminate(&self) {
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READY: &str = r#"echo '{"ok": true, "status": "ready"}'"#;

    fn spawn_sh(script: &str) -> Result<WorkerProcess, WorkerError> {
        WorkerProcess::start(
            "/bin/sh",
            &["-c".to_string(), script.to_string()],
            Duration::from_secs(5),
        )
    }

    fn echo_worker() -> WorkerProcess {
        let script = format!(
            "{READY}; while read line; do echo '{{\"ok\": true, \"blur\": 42.0}}'; done"
        );
        spawn_sh(&script).unwrap()
    }

    #[test]
    fn handshake_and_submit() {
        let worker = echo_worker();
        assert!(worker.is_alive());

        let resp = worker
            .submit(&AnalyzeRequest::from_path("/tmp/x.jpg"), Duration::from_secs(2))
            .unwrap();
        assert!(resp.ok);
        assert_eq!(resp.blur, Some(42.0));
    }

    #[test]
    fn startup_times_out_without_ready_line() {
        let result = WorkerProcess::start(
            "/bin/sh",
            &["-c".to_string(), "sleep 5".to_string()],
            Duration::from_millis(200),
        );
        assert!(matches!(result, Err(WorkerError::StartupTimeout(_))));
    }

    #[test]
    fn startup_fails_on_unexpected_first_line() {
        let result = spawn_sh("echo '{\"ok\": false, \"error\": \"import failed\"}'; sleep 5");
        assert!(matches!(result, Err(WorkerError::Startup(_))));
    }

    #[test]
    fn startup_fails_on_missing_program() {
        let result = WorkerProcess::start("/nonexistent/worker", &[], Duration::from_secs(1));
        assert!(matches!(result, Err(WorkerError::Startup(_))));
    }

    #[test]
    fn submit_times_out_on_mute_worker() {
        let worker = spawn_sh(&format!("{READY}; while read line; do :; done")).unwrap();
        let result = worker.submit(
            &AnalyzeRequest::from_path("/tmp/x.jpg"),
            Duration::from_millis(200),
        );
        assert!(matches!(result, Err(WorkerError::CommunicationTimeout)));
    }

    #[test]
    fn invalid_json_response_becomes_error_response() {
        let worker =
            spawn_sh(&format!("{READY}; while read line; do echo 'not json'; done")).unwrap();
        let resp = worker
            .submit(&AnalyzeRequest::from_path("/tmp/x.jpg"), Duration::from_secs(2))
            .unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.error.as_deref(), Some("invalid_json"));
    }

    #[test]
    fn late_response_is_drained_before_next_request() {
        // Worker that answers the first request only after ~400ms, then
        // answers instantly. The first submit times out; its late response
        // must not be handed to the second submit.
        let script = format!(
            "{READY}; read line; sleep 0.4; echo '{{\"ok\": true, \"blur\": 1.0}}'; \
             while read line; do echo '{{\"ok\": true, \"blur\": 2.0}}'; done"
        );
        let worker = spawn_sh(&script).unwrap();

        let first = worker.submit(
            &AnalyzeRequest::from_path("/tmp/a.jpg"),
            Duration::from_millis(100),
        );
        assert!(matches!(first, Err(WorkerError::CommunicationTimeout)));

        std::thread::sleep(Duration::from_millis(500));

        let second = worker
            .submit(&AnalyzeRequest::from_path("/tmp/b.jpg"), Duration::from_secs(2))
            .unwrap();
        assert_eq!(second.blur, Some(2.0));
    }

    #[test]
    fn terminate_is_idempotent_and_kills() {
        let worker = echo_worker();
        assert!(worker.is_alive());
        worker.terminate();
        assert!(!worker.is_alive());
        worker.terminate();
    }

    #[test]
    fn submit_after_death_reports_process_died() {
        let worker = echo_worker();
        worker.terminate();
        // Give the reader thread a moment to hit EOF and drop its sender.
        std::thread::sleep(Duration::from_millis(100));
        let result = worker.submit(
            &AnalyzeRequest::from_path("/tmp/x.jpg"),
            Duration::from_secs(1),
        );
        assert!(result.is_err());
    }
}
