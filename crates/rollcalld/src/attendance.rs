//! Attendance writer — durable, cooldown-deduplicated sink for confirmed
//! identities.
//!
//! A single dedicated thread drains a bounded queue and owns both the
//! SQLite connection and the per-name cooldown map, so the frame loop's
//! `mark()` never touches the disk. Attendance is best-effort: failed
//! writes are logged and dropped, never retried.

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Sender, TrySendError};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

const QUEUE_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("failed to create attendance directory: {0}")]
    CreateDir(std::io::Error),
    #[error("failed to spawn writer thread: {0}")]
    Thread(std::io::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

struct MarkRequest {
    name: String,
    confidence: f32,
    distance: f32,
    cooldown: Duration,
    observed_at: DateTime<Utc>,
}

/// Handle to the writer thread. Dropping without [`shutdown`](Self::shutdown)
/// abandons queued items; shutdown drains them first.
pub struct AttendanceWriter {
    tx: Option<Sender<MarkRequest>>,
    thread: Option<JoinHandle<()>>,
}

impl AttendanceWriter {
    /// Open (creating if needed) the database and start the writer thread.
    /// Fails fast when the database cannot be opened or migrated.
    pub fn open(db_path: &Path) -> Result<Self, AttendanceError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(AttendanceError::CreateDir)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS attendance (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 name TEXT NOT NULL,
                 timestamp TEXT NOT NULL,
                 confidence REAL,
                 distance REAL
             )",
            [],
        )?;
        tracing::info!(path = %db_path.display(), "attendance database ready");

        let (tx, rx) = bounded::<MarkRequest>(QUEUE_CAPACITY);
        let thread = std::thread::Builder::new()
            .name("attendance-writer".to_string())
            .spawn(move || {
                let mut last_written: HashMap<String, DateTime<Utc>> = HashMap::new();
                while let Ok(item) = rx.recv() {
                    write_one(&conn, &mut last_written, item);
                }
                tracing::debug!("attendance writer draining complete");
            })
            .map_err(AttendanceError::Thread)?;

        Ok(Self {
            tx: Some(tx),
            thread: Some(thread),
        })
    }

    /// Enqueue an attendance observation. Never blocks; when the queue is
    /// full the observation is dropped with a warning.
    pub fn mark(
        &self,
        name: &str,
        confidence: f32,
        distance: f32,
        cooldown: Duration,
        observed_at: DateTime<Utc>,
    ) {
        let Some(tx) = &self.tx else { return };
        let request = MarkRequest {
            name: name.to_string(),
            confidence,
            distance,
            cooldown,
            observed_at,
        };
        match tx.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(req)) => {
                tracing::warn!(name = %req.name, "attendance queue full, dropping observation");
            }
            Err(TrySendError::Disconnected(req)) => {
                tracing::warn!(name = %req.name, "attendance writer gone, dropping observation");
            }
        }
    }

    /// Close the queue and wait for queued observations to hit the disk.
    pub fn shutdown(mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("attendance writer thread panicked");
            }
        }
    }
}

impl Drop for AttendanceWriter {
    fn drop(&mut self) {
        self.tx.take();
        // No join here: drop may run on the frame path.
    }
}

/// Apply the cooldown rule and persist a single observation.
fn write_one(
    conn: &Connection,
    last_written: &mut HashMap<String, DateTime<Utc>>,
    item: MarkRequest,
) {
    if let Some(last) = last_written.get(&item.name) {
        let elapsed = item.observed_at.signed_duration_since(*last);
        let cooldown = chrono::Duration::from_std(item.cooldown)
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1_000));
        if elapsed < cooldown {
            tracing::debug!(name = %item.name, "within cooldown, skipping write");
            return;
        }
    }

    let result = conn.execute(
        "INSERT INTO attendance (name, timestamp, confidence, distance)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            item.name,
            item.observed_at.to_rfc3339(),
            item.confidence as f64,
            item.distance as f64
        ],
    );

    match result {
        Ok(_) => {
            last_written.insert(item.name.clone(), item.observed_at);
            tracing::info!(
                name = %item.name,
                confidence = item.confidence,
                distance = item.distance,
                "attendance recorded"
            );
        }
        Err(e) => {
            tracing::error!(name = %item.name, error = %e, "failed to write attendance");
        }
    }
}
