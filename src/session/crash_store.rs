//! Crash-recovery snapshots.
//!
//! While a session is recording, its progress is rewritten to a snapshot
//! file on a short fixed interval, so a crash loses at most one interval
//! plus one write. Normal completion deletes the snapshot; a snapshot found
//! at startup therefore means the previous session did not finish, and it is
//! surfaced to the caller — never auto-discarded.

use crate::clock::{Clock, SystemClock};
use crate::defaults;
use crate::error::Result;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const SNAPSHOT_FILE: &str = "session-snapshot.json";

/// What survives a crash: enough to resume or at least inspect the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverableSession {
    pub session_id: String,
    /// Seconds since the Unix epoch at the last successful write.
    pub last_save_time: f64,
    /// Transcript accumulated so far.
    pub transcript: String,
    pub metadata: serde_json::Value,
}

/// Periodic snapshot writer for in-progress sessions.
pub struct CrashRecoveryStore {
    dir: PathBuf,
    interval: Duration,
    clock: Arc<dyn Clock>,
    snapshot: Arc<Mutex<Option<RecoverableSession>>>,
    /// Serializes writes to the snapshot file (single-writer chain).
    write_gate: Arc<tokio::sync::Mutex<()>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CrashRecoveryStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        Self::with_clock(
            dir,
            Duration::from_secs(defaults::AUTOSAVE_INTERVAL_SECS),
            Arc::new(SystemClock),
        )
    }

    pub fn with_clock(dir: PathBuf, interval: Duration, clock: Arc<dyn Clock>) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            interval,
            clock,
            snapshot: Arc::new(Mutex::new(None)),
            write_gate: Arc::new(tokio::sync::Mutex::new(())),
            shutdown: watch::channel(false).0,
            task: Mutex::new(None),
        })
    }

    /// Persists an initial snapshot immediately and arms the rewrite timer.
    pub async fn start_tracking(&self, session: &Session) -> Result<()> {
        let initial = RecoverableSession {
            session_id: session.id.clone(),
            last_save_time: self.clock.epoch_secs(),
            transcript: session.transcript_text(),
            metadata: session.metadata.clone(),
        };
        *self
            .snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(initial);
        self.flush().await?;

        self.shutdown.send_replace(false);
        let mut shutdown = self.shutdown.subscribe();
        let dir = self.dir.clone();
        let interval = self.interval;
        let clock = self.clock.clone();
        let snapshot = self.snapshot.clone();
        let write_gate = self.write_gate.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => break,
                }
                // Write failures are logged and retried on the next tick,
                // never fatal.
                if let Err(e) =
                    write_snapshot(&dir, &snapshot, clock.epoch_secs(), &write_gate).await
                {
                    warn!("snapshot write failed, will retry: {}", e);
                }
            }
        });
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        debug!("crash tracking armed, rewrite every {:?}", self.interval);
        Ok(())
    }

    /// Merges a partial update into the in-memory snapshot.
    ///
    /// Persistence happens on the next timer tick or an explicit flush.
    pub fn update(&self, merge: impl FnOnce(&mut RecoverableSession)) {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(snapshot) = snapshot.as_mut() {
            merge(snapshot);
        }
    }

    /// Writes the current snapshot out immediately.
    pub async fn flush(&self) -> Result<()> {
        write_snapshot(
            &self.dir,
            &self.snapshot,
            self.clock.epoch_secs(),
            &self.write_gate,
        )
        .await
    }

    /// Cancels the timer and deletes the snapshot: a normally-completed
    /// session leaves nothing to recover.
    pub async fn stop_tracking(&self) -> Result<()> {
        self.shutdown.send_replace(true);
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
        }
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = None;

        let _gate = self.write_gate.lock().await;
        let path = self.dir.join(SNAPSHOT_FILE);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Snapshot left by a session that did not complete, if any.
    ///
    /// Never auto-discards: the decision is the caller's.
    pub fn incomplete_session(dir: &Path) -> Option<RecoverableSession> {
        let path = dir.join(SNAPSHOT_FILE);
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("ignoring unreadable session snapshot {:?}: {}", path, e);
                None
            }
        }
    }

    /// Explicitly discards a recovered snapshot.
    pub fn discard_incomplete_session(dir: &Path) -> Result<()> {
        let path = dir.join(SNAPSHOT_FILE);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Serialized write of the latest snapshot, via a temp file and rename so a
/// crash mid-write cannot tear the previous snapshot.
async fn write_snapshot(
    dir: &Path,
    snapshot: &Arc<Mutex<Option<RecoverableSession>>>,
    now_epoch_secs: f64,
    write_gate: &tokio::sync::Mutex<()>,
) -> Result<()> {
    let payload = {
        let mut snapshot = snapshot.lock().unwrap_or_else(|e| e.into_inner());
        match snapshot.as_mut() {
            Some(snapshot) => {
                snapshot.last_save_time = now_epoch_secs;
                serde_json::to_vec_pretty(snapshot)?
            }
            None => return Ok(()),
        }
    };

    // The payload is small; a synchronous write under the gate keeps the
    // file single-writer without a blocking-pool round trip.
    let _gate = write_gate.lock().await;
    let path = dir.join(SNAPSHOT_FILE);
    let tmp = dir.join(format!("{}.tmp", SNAPSHOT_FILE));
    std::fs::write(&tmp, &payload)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}
