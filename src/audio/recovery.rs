//! Rotating on-disk recovery buffer for captured audio.
//!
//! Every chunk is ingested twice: into a rotation buffer that is written to a
//! timestamped WAV file on a fixed interval, and into a full-session
//! accumulator kept in memory for export and post-session recovery. Only the
//! two most recent rotation files are retained on disk (plus whatever is
//! still in memory waiting for the next rotation).

use crate::audio::wav::{self, ExportInfo, WavFormat};
use crate::defaults;
use crate::error::Result;
use crate::types::AudioChunk;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tracing::{debug, warn};

const ROTATION_PREFIX: &str = "rotation-";

/// Configuration for the recovery buffer.
#[derive(Debug, Clone)]
pub struct RecoveryBufferConfig {
    /// Directory receiving rotation files.
    pub dir: PathBuf,
    /// Interval between rotation writes.
    pub interval: Duration,
    /// Rotation files retained on disk.
    pub retain: usize,
    pub sample_rate: u32,
}

impl RecoveryBufferConfig {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            interval: Duration::from_secs(defaults::ROTATION_INTERVAL_SECS),
            retain: defaults::ROTATION_RETAIN,
            sample_rate: defaults::SAMPLE_RATE,
        }
    }
}

#[derive(Default)]
struct BufferState {
    /// Samples accumulated since the last rotation write.
    rotation: Vec<f32>,
    /// Every sample of the session, for export and recovery.
    session: Vec<f32>,
}

/// Rotating audio buffer with a full-session in-memory copy.
pub struct AudioRecoveryBuffer {
    config: RecoveryBufferConfig,
    state: Arc<Mutex<BufferState>>,
    sequence: Arc<AtomicU64>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl AudioRecoveryBuffer {
    /// Creates the buffer and its rotation directory.
    pub fn new(config: RecoveryBufferConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        Ok(Self {
            config,
            state: Arc::new(Mutex::new(BufferState::default())),
            sequence: Arc::new(AtomicU64::new(0)),
            running: AtomicBool::new(false),
            shutdown: watch::channel(false).0,
            task: None,
        })
    }

    /// Arms the rotation timer. Idempotent while running.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shutdown.send_replace(false);
        let mut shutdown = self.shutdown.subscribe();
        let state = self.state.clone();
        let sequence = self.sequence.clone();
        let config = self.config.clone();

        self.task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(config.interval) => {}
                    _ = shutdown.changed() => break,
                }
                if let Err(e) = rotate(&config, &state, &sequence) {
                    warn!("rotation write failed: {}", e);
                }
            }
        }));
    }

    /// Appends a chunk to both the rotation buffer and the session accumulator.
    ///
    /// Synchronous, sub-millisecond; safe to call on the frame path.
    pub fn ingest(&self, chunk: &AudioChunk) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.rotation.extend_from_slice(&chunk.samples);
        state.session.extend_from_slice(&chunk.samples);
    }

    /// Writes the pending rotation buffer out immediately.
    ///
    /// Returns the path written, or `None` when nothing was pending.
    pub fn rotate_now(&self) -> Result<Option<PathBuf>> {
        rotate(&self.config, &self.state, &self.sequence)
    }

    /// Stops the rotation timer and flushes any unwritten rotation buffer.
    pub async fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.rotate_now()?;
        Ok(())
    }

    /// Full-session duration so far, in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.session.len() as u64 * 1000 / self.config.sample_rate as u64
    }

    /// Copy of every sample captured this session.
    pub fn session_samples(&self) -> Vec<f32> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .session
            .clone()
    }

    /// Encodes the full session to a WAV file.
    ///
    /// Returns `None` if no audio has been captured.
    pub fn export(&self, path: &Path, format: WavFormat) -> Result<Option<ExportInfo>> {
        let samples = self.session_samples();
        if samples.is_empty() {
            return Ok(None);
        }
        let info = wav::write_wav(path, &samples, self.config.sample_rate, format)?;
        Ok(Some(info))
    }

    /// Best-effort read of recent audio: rotation files modified within
    /// `max_age`, oldest first, followed by the in-memory rotation tail.
    ///
    /// Files that fail to decode are skipped with a warning — a torn write
    /// must not take down the rest of the recovery.
    pub fn recover_recent(&self, max_age: Duration) -> Result<Vec<f32>> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut files = rotation_files(&self.config.dir)?;
        files.retain(|(_, mtime)| *mtime >= cutoff);
        files.sort_by(|a, b| (a.1, &a.0).cmp(&(b.1, &b.0)));

        let mut samples = Vec::new();
        for (path, _) in files {
            match fs::File::open(&path).map_err(crate::error::VoxcapError::from) {
                Ok(file) => match wav::decode_wav(BufReader::new(file)) {
                    Ok((decoded, _)) => samples.extend_from_slice(&decoded),
                    Err(e) => warn!("skipping unreadable rotation file {:?}: {}", path, e),
                },
                Err(e) => warn!("skipping unreadable rotation file {:?}: {}", path, e),
            }
        }

        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        samples.extend_from_slice(&state.rotation);
        Ok(samples)
    }
}

/// Writes the pending rotation buffer to a new timestamped file and prunes
/// old rotations down to the retention count.
fn rotate(
    config: &RecoveryBufferConfig,
    state: &Mutex<BufferState>,
    sequence: &AtomicU64,
) -> Result<Option<PathBuf>> {
    let pending = {
        let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
        if state.rotation.is_empty() {
            return Ok(None);
        }
        std::mem::take(&mut state.rotation)
    };

    let seq = sequence.fetch_add(1, Ordering::SeqCst);
    let stamp = chrono::Utc::now().timestamp_millis();
    let path = config
        .dir
        .join(format!("{}{}-{:04}.wav", ROTATION_PREFIX, stamp, seq));

    wav::write_wav(&path, &pending, config.sample_rate, WavFormat::Float32)?;
    debug!(
        "rotated {} samples to {:?}",
        pending.len(),
        path.file_name().unwrap_or_default()
    );

    prune(&config.dir, config.retain)?;
    Ok(Some(path))
}

/// Deletes all but the `retain` most-recently-modified rotation files.
fn prune(dir: &Path, retain: usize) -> Result<()> {
    let mut files = rotation_files(dir)?;
    if files.len() <= retain {
        return Ok(());
    }

    // Newest first; mtime ties broken by the sequence embedded in the name.
    files.sort_by(|a, b| (b.1, &b.0).cmp(&(a.1, &a.0)));
    for (path, _) in files.into_iter().skip(retain) {
        if let Err(e) = fs::remove_file(&path) {
            warn!("failed to prune rotation file {:?}: {}", path, e);
        }
    }
    Ok(())
}

fn rotation_files(dir: &Path) -> Result<Vec<(PathBuf, SystemTime)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(ROTATION_PREFIX) || !name.ends_with(".wav") {
            continue;
        }
        let mtime = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((entry.path(), mtime));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_buffer(dir: &Path) -> AudioRecoveryBuffer {
        AudioRecoveryBuffer::new(RecoveryBufferConfig::new(dir.to_path_buf())).unwrap()
    }

    fn chunk_of(value: f32, samples: usize) -> AudioChunk {
        AudioChunk::mono_16k(vec![value; samples], 0)
    }

    #[test]
    fn ingest_feeds_both_buffers() {
        let dir = tempdir().unwrap();
        let buffer = make_buffer(dir.path());

        buffer.ingest(&chunk_of(0.1, 1600));
        buffer.ingest(&chunk_of(0.2, 1600));

        assert_eq!(buffer.duration_ms(), 200);
        assert_eq!(buffer.session_samples().len(), 3200);
    }

    #[test]
    fn rotate_now_writes_pending_and_clears_rotation_buffer() {
        let dir = tempdir().unwrap();
        let buffer = make_buffer(dir.path());

        buffer.ingest(&chunk_of(0.1, 1600));
        let path = buffer.rotate_now().unwrap().expect("should write a file");
        assert!(path.exists());

        // Rotation buffer drained; session accumulator untouched
        assert!(buffer.rotate_now().unwrap().is_none());
        assert_eq!(buffer.session_samples().len(), 1600);
    }

    #[test]
    fn rotate_with_empty_buffer_writes_nothing() {
        let dir = tempdir().unwrap();
        let buffer = make_buffer(dir.path());
        assert!(buffer.rotate_now().unwrap().is_none());
        assert_eq!(rotation_files(dir.path()).unwrap().len(), 0);
    }

    #[test]
    fn retention_keeps_only_two_most_recent_files() {
        let dir = tempdir().unwrap();
        let buffer = make_buffer(dir.path());

        let mut written = Vec::new();
        for i in 0..4 {
            buffer.ingest(&chunk_of(i as f32 * 0.1, 160));
            written.push(buffer.rotate_now().unwrap().unwrap());
        }

        let remaining = rotation_files(dir.path()).unwrap();
        assert_eq!(remaining.len(), 2);

        let names: Vec<_> = remaining.iter().map(|(p, _)| p.clone()).collect();
        assert!(names.contains(&written[2]));
        assert!(names.contains(&written[3]));
        assert!(!written[0].exists());
        assert!(!written[1].exists());
    }

    #[tokio::test]
    async fn stop_flushes_unwritten_rotation_buffer() {
        let dir = tempdir().unwrap();
        let mut buffer = make_buffer(dir.path());
        buffer.start();

        buffer.ingest(&chunk_of(0.3, 1600));
        buffer.stop().await.unwrap();

        let files = rotation_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);

        let (decoded, rate) =
            wav::decode_wav(BufReader::new(fs::File::open(&files[0].0).unwrap())).unwrap();
        assert_eq!(rate, 16000);
        assert_eq!(decoded.len(), 1600);
    }

    #[test]
    fn export_encodes_full_session() {
        let dir = tempdir().unwrap();
        let buffer = make_buffer(dir.path());

        buffer.ingest(&chunk_of(0.1, 16000));
        buffer.rotate_now().unwrap();
        buffer.ingest(&chunk_of(0.2, 16000));

        let out = dir.path().join("session.wav");
        let info = buffer
            .export(&out, WavFormat::Float32)
            .unwrap()
            .expect("session has audio");

        // Export covers the whole session, not just the unrotated tail
        assert_eq!(info.duration_ms, 2000);

        let (decoded, _) =
            wav::decode_wav(BufReader::new(fs::File::open(&out).unwrap())).unwrap();
        assert_eq!(decoded.len(), 32000);
    }

    #[test]
    fn export_of_empty_session_returns_none() {
        let dir = tempdir().unwrap();
        let buffer = make_buffer(dir.path());
        let out = dir.path().join("session.wav");
        assert!(buffer.export(&out, WavFormat::Pcm16).unwrap().is_none());
        assert!(!out.exists());
    }

    #[test]
    fn recover_recent_concatenates_files_then_memory_tail() {
        let dir = tempdir().unwrap();
        let buffer = make_buffer(dir.path());

        buffer.ingest(&chunk_of(0.1, 160));
        buffer.rotate_now().unwrap();
        buffer.ingest(&chunk_of(0.2, 160));
        buffer.rotate_now().unwrap();
        buffer.ingest(&chunk_of(0.3, 160));

        let recovered = buffer.recover_recent(Duration::from_secs(600)).unwrap();

        assert_eq!(recovered.len(), 480);
        assert!((recovered[0] - 0.1).abs() < 1e-6);
        assert!((recovered[160] - 0.2).abs() < 1e-6);
        assert!((recovered[320] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn recover_recent_ignores_old_files() {
        let dir = tempdir().unwrap();
        let buffer = make_buffer(dir.path());

        buffer.ingest(&chunk_of(0.1, 160));
        buffer.rotate_now().unwrap();
        std::thread::sleep(Duration::from_millis(20));

        // A zero-length window excludes the file just written
        let recovered = buffer.recover_recent(Duration::ZERO).unwrap();
        assert!(recovered.is_empty());
    }

    #[test]
    fn recover_recent_skips_corrupt_files() {
        let dir = tempdir().unwrap();
        let buffer = make_buffer(dir.path());

        fs::write(dir.path().join("rotation-000-0000.wav"), b"not a wav").unwrap();
        buffer.ingest(&chunk_of(0.5, 160));

        let recovered = buffer.recover_recent(Duration::from_secs(600)).unwrap();
        assert_eq!(recovered.len(), 160);
    }
}
