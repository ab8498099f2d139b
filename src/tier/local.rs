//! Local batch tier: windowed transcription with a local model.
//!
//! Audio is accumulated in a worker task and cut into windows either when a
//! full window has buffered or when the tier's own VAD confirms an utterance
//! boundary. Windows run through the model sequentially on the blocking
//! thread pool so results keep their order and timestamps stay
//! non-decreasing.

use crate::audio::vad::{Vad, VadConfig, VadEvent};
use crate::clock::{Clock, SystemClock};
use crate::defaults;
use crate::error::Result;
use crate::stt::batch::BatchTranscriber;
use crate::stt::models::{ModelInfo, memory_gate, verify_model};
use crate::stt::transcriber::Transcriber;
use crate::tier::{Tier, TierEvent};
use crate::types::{AudioChunk, TierId, TierStatus};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Consecutive window failures tolerated before the tier reports fatal.
const MAX_WINDOW_FAILURES: u32 = 3;

#[derive(Debug, Clone)]
pub struct LocalBatchTierConfig {
    pub window_secs: u32,
    pub sample_rate: u32,
    pub vad: VadConfig,
    /// Directory holding model files, checked on every status query.
    pub models_dir: PathBuf,
    pub model: ModelInfo,
}

impl LocalBatchTierConfig {
    pub fn new(models_dir: PathBuf, model: ModelInfo) -> Self {
        Self {
            window_secs: defaults::BATCH_WINDOW_SECS,
            sample_rate: defaults::SAMPLE_RATE,
            vad: VadConfig::default(),
            models_dir,
            model,
        }
    }
}

pub struct LocalBatchTier {
    transcriber: Arc<dyn Transcriber>,
    config: LocalBatchTierConfig,
    clock: Arc<dyn Clock>,
    worker_tx: Mutex<Option<mpsc::UnboundedSender<Vec<f32>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocalBatchTier {
    pub fn new(transcriber: Arc<dyn Transcriber>, config: LocalBatchTierConfig) -> Self {
        Self::with_clock(transcriber, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        transcriber: Arc<dyn Transcriber>,
        config: LocalBatchTierConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transcriber,
            config,
            clock,
            worker_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Tier for LocalBatchTier {
    fn id(&self) -> TierId {
        TierId::LocalBatch
    }

    fn status(&self) -> TierStatus {
        if let Err(e) = verify_model(&self.config.models_dir, &self.config.model) {
            return TierStatus::unavailable(TierId::LocalBatch, e.to_string());
        }
        if let Some(reason) = memory_gate(self.config.model.min_memory_mb) {
            return TierStatus::unavailable(TierId::LocalBatch, reason);
        }
        TierStatus::available(TierId::LocalBatch)
    }

    async fn start(&self, events: mpsc::Sender<TierEvent>) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();

        let batch = BatchTranscriber::new(
            self.transcriber.clone(),
            self.config.window_secs,
            self.config.sample_rate,
            self.clock.epoch_secs(),
            TierId::LocalBatch,
        );
        let vad = Vad::with_clock(self.config.vad, self.clock.clone());

        let task = tokio::spawn(worker(rx, batch, vad, events));

        *self.worker_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        debug!(
            "local batch tier started ({}s windows)",
            self.config.window_secs
        );
        Ok(())
    }

    async fn stop(&self) {
        // Dropping the sender lets the worker drain, flush, and exit.
        self.worker_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn send_audio(&self, chunk: &AudioChunk) {
        if let Some(tx) = self
            .worker_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            let _ = tx.send(chunk.samples.clone());
        }
    }

    fn provides_pause_events(&self) -> bool {
        // Segmentation is internal; the manager's shared VAD owns pauses.
        false
    }
}

/// Accumulates samples, cuts windows, and transcribes them in order.
async fn worker(
    mut rx: mpsc::UnboundedReceiver<Vec<f32>>,
    mut batch: BatchTranscriber,
    mut vad: Vad<Arc<dyn Clock>>,
    events: mpsc::Sender<TierEvent>,
) {
    let mut consecutive_failures: u32 = 0;

    while let Some(samples) = rx.recv().await {
        let boundary = vad.process(&samples) == VadEvent::SpeechEnd;
        batch.push(&samples);

        let window = if boundary {
            batch.take_window(true)
        } else if batch.window_ready() {
            batch.take_window(false)
        } else {
            None
        };

        if let Some(window) = window
            && !transcribe_one(&batch, window, &events, &mut consecutive_failures).await
        {
            return;
        }
    }

    // Input closed: flush whatever is left.
    while let Some(window) = batch.take_window(true) {
        if !transcribe_one(&batch, window, &events, &mut consecutive_failures).await {
            return;
        }
    }
}

/// Runs one window through the model. Returns false when the tier should die.
async fn transcribe_one(
    batch: &BatchTranscriber,
    window: crate::stt::batch::PendingWindow,
    events: &mpsc::Sender<TierEvent>,
    consecutive_failures: &mut u32,
) -> bool {
    // The model is CPU-bound; run it on tokio's blocking thread pool.
    // Windows are awaited sequentially so results keep their order.
    let transcriber = batch.transcriber();
    let session_start = batch.session_start();
    let tier = batch.tier();
    let result = tokio::task::spawn_blocking(move || {
        crate::stt::batch::transcribe_window(&transcriber, &window, session_start, tier)
    })
    .await
    .unwrap_or_else(|e| {
        Err(crate::error::VoxcapError::Transcription {
            message: format!("transcription task panicked: {}", e),
        })
    });

    match result {
        Ok(Some(event)) => {
            *consecutive_failures = 0;
            if events.send(TierEvent::Transcript(event)).await.is_err() {
                return false;
            }
            true
        }
        Ok(None) => {
            *consecutive_failures = 0;
            true
        }
        Err(e) => {
            *consecutive_failures += 1;
            warn!(
                "local batch window failed ({}/{}): {}",
                consecutive_failures, MAX_WINDOW_FAILURES, e
            );
            if *consecutive_failures >= MAX_WINDOW_FAILURES {
                let _ = events
                    .send(TierEvent::Fatal {
                        tier: TierId::LocalBatch,
                        error: e,
                    })
                    .await;
                return false;
            }
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stt::transcriber::MockTranscriber;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fake_model(dir: &TempDir, min_memory_mb: u64) -> ModelInfo {
        let info = ModelInfo {
            name: "fake",
            file_name: "fake.bin",
            size_bytes: 4,
            min_memory_mb,
        };
        std::fs::write(dir.path().join("fake.bin"), b"abcd").unwrap();
        info
    }

    fn make_tier(
        dir: &TempDir,
        window_secs: u32,
        mock: Arc<MockTranscriber>,
    ) -> LocalBatchTier {
        let mut config = LocalBatchTierConfig::new(dir.path().to_path_buf(), fake_model(dir, 0));
        config.window_secs = window_secs;
        // Immediate speech-end confirmation keeps tests deterministic
        config.vad.silence_duration_ms = 0;
        LocalBatchTier::new(mock, config)
    }

    fn speech_chunk() -> AudioChunk {
        AudioChunk::mono_16k(vec![0.1; 1600], 0)
    }

    fn silence_chunk() -> AudioChunk {
        AudioChunk::mono_16k(vec![0.0; 1600], 0)
    }

    #[test]
    fn status_unavailable_when_model_missing() {
        let dir = TempDir::new().unwrap();
        let config = LocalBatchTierConfig::new(
            dir.path().to_path_buf(),
            ModelInfo {
                name: "absent",
                file_name: "absent.bin",
                size_bytes: 1,
                min_memory_mb: 0,
            },
        );
        let tier = LocalBatchTier::new(Arc::new(MockTranscriber::new("m")), config);

        let status = tier.status();
        assert!(!status.available);
        assert!(status.reason.unwrap().contains("not found"));
    }

    #[test]
    fn status_unavailable_when_memory_insufficient() {
        let dir = TempDir::new().unwrap();
        let model = fake_model(&dir, u64::MAX / (1024 * 1024));
        let config = LocalBatchTierConfig::new(dir.path().to_path_buf(), model);
        let tier = LocalBatchTier::new(Arc::new(MockTranscriber::new("m")), config);

        let status = tier.status();
        assert!(!status.available);
        assert!(status.reason.unwrap().contains("insufficient memory"));
    }

    #[test]
    fn status_available_with_model_and_memory() {
        let dir = TempDir::new().unwrap();
        let tier = make_tier(&dir, 30, Arc::new(MockTranscriber::new("m")));
        assert!(tier.status().available);
    }

    #[tokio::test]
    async fn full_windows_are_transcribed_in_order() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockTranscriber::new("m").with_response("segment"));
        let tier = make_tier(&dir, 1, mock.clone());
        let (tx, mut rx) = mpsc::channel(16);

        tier.start(tx).await.unwrap();

        // 2 seconds of speech = two 1s windows
        for _ in 0..20 {
            tier.send_audio(&speech_chunk());
        }
        tier.stop().await;

        let mut timestamps = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
        {
            if let TierEvent::Transcript(t) = event {
                assert!(t.is_final, "batch results are always final");
                assert_eq!(t.tier, TierId::LocalBatch);
                timestamps.push(t.timestamp);
            }
        }

        assert_eq!(timestamps.len(), 2);
        assert!(timestamps[0] < timestamps[1], "timestamps non-decreasing");
        assert_eq!(mock.call_sample_counts(), vec![16000, 16000]);
    }

    #[tokio::test]
    async fn utterance_boundary_flushes_a_partial_window() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockTranscriber::new("m").with_response("utterance"));
        let tier = make_tier(&dir, 30, mock.clone());
        let (tx, mut rx) = mpsc::channel(16);

        tier.start(tx).await.unwrap();

        // 1s of speech then silence: far below the 30s window, but the
        // speech-end boundary flushes it
        for _ in 0..10 {
            tier.send_audio(&speech_chunk());
        }
        tier.send_audio(&silence_chunk());
        tier.send_audio(&silence_chunk());
        tier.stop().await;

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            TierEvent::Transcript(t) => assert_eq!(t.text, "utterance"),
            other => panic!("expected transcript, got {:?}", other),
        }

        let calls = mock.call_sample_counts();
        assert!(!calls.is_empty());
        assert!(calls[0] < 30 * 16000, "flushed early, not a full window");
    }

    #[tokio::test]
    async fn repeated_failures_surface_as_fatal() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockTranscriber::new("m").with_failure());
        let tier = make_tier(&dir, 1, mock);
        let (tx, mut rx) = mpsc::channel(16);

        tier.start(tx).await.unwrap();

        for _ in 0..40 {
            tier.send_audio(&speech_chunk());
        }

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            TierEvent::Fatal { tier, .. } => assert_eq!(tier, TierId::LocalBatch),
            other => panic!("expected fatal, got {:?}", other),
        }

        tier.stop().await;
    }

    #[tokio::test]
    async fn stop_flushes_the_remainder() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockTranscriber::new("m").with_response("tail"));
        let tier = make_tier(&dir, 30, mock.clone());
        let (tx, mut rx) = mpsc::channel(16);

        tier.start(tx).await.unwrap();
        for _ in 0..5 {
            tier.send_audio(&speech_chunk());
        }
        tier.stop().await;

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            TierEvent::Transcript(t) => assert_eq!(t.text, "tail"),
            other => panic!("expected transcript, got {:?}", other),
        }
        assert_eq!(mock.call_sample_counts(), vec![5 * 1600]);
    }
}
