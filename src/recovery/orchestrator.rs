//! Post-session transcript recovery.
//!
//! Runs only when a session ended with zero transcript events. Strategies
//! are tried in order — cloud batch over the encoded asset, then local
//! windowed batch over raw PCM — each with bounded retries. Exhausting every
//! strategy returns an empty result, never an error: "no transcript" is a
//! valid terminal outcome.

use crate::defaults;
use crate::recovery::cloud::CloudTranscriber;
use crate::stt::batch::{self, BatchTranscriber};
use crate::stt::transcriber::Transcriber;
use crate::types::{TierId, TranscriptEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Retries after the first cloud attempt.
    pub cloud_retries: u32,
    /// Linear backoff step between cloud attempts.
    pub cloud_retry_delay: Duration,
    /// Retries after the first local pass.
    pub local_retries: u32,
    /// Base of the increasing backoff between local passes.
    pub local_retry_delay: Duration,
    pub window_secs: u32,
    /// Sessions longer than this are not recovered locally.
    pub max_session_secs: u64,
    pub sample_rate: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            cloud_retries: defaults::RECOVERY_CLOUD_RETRIES,
            cloud_retry_delay: Duration::from_secs(1),
            local_retries: defaults::RECOVERY_LOCAL_RETRIES,
            local_retry_delay: Duration::from_secs(1),
            window_secs: defaults::BATCH_WINDOW_SECS,
            max_session_secs: defaults::RECOVERY_MAX_SESSION_SECS,
            sample_rate: defaults::SAMPLE_RATE,
        }
    }
}

/// Everything the orchestrator has to work with after a session ends.
#[derive(Debug, Clone, Default)]
pub struct RecoveryInput {
    /// Session start, seconds since the Unix epoch.
    pub session_start: f64,
    /// Encoded WAV asset, if one was exported.
    pub encoded_wav: Option<Vec<u8>>,
    /// Raw session PCM, if the in-memory accumulator survived.
    pub raw_pcm: Option<Vec<f32>>,
}

/// Post-session fallback transcription.
pub struct RecoveryOrchestrator {
    cloud: Option<Arc<dyn CloudTranscriber>>,
    local: Option<Arc<dyn Transcriber>>,
    config: RecoveryConfig,
}

impl RecoveryOrchestrator {
    pub fn new(
        cloud: Option<Arc<dyn CloudTranscriber>>,
        local: Option<Arc<dyn Transcriber>>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            cloud,
            local,
            config,
        }
    }

    /// Attempts to recover a transcript from buffered audio.
    ///
    /// Returns an empty vector when every strategy is exhausted — callers
    /// must treat that as a valid outcome, not a failure.
    pub async fn recover(&self, input: RecoveryInput) -> Vec<TranscriptEvent> {
        let events = self.recover_via_cloud(&input).await;
        if !events.is_empty() {
            return events;
        }

        let events = self.recover_via_local(&input).await;
        if events.is_empty() {
            info!("recovery exhausted every strategy; no transcript");
        }
        events
    }

    async fn recover_via_cloud(&self, input: &RecoveryInput) -> Vec<TranscriptEvent> {
        let (cloud, wav) = match (&self.cloud, &input.encoded_wav) {
            (Some(cloud), Some(wav)) if !wav.is_empty() => (cloud, wav),
            _ => {
                debug!("cloud recovery skipped: no backend or no encoded asset");
                return Vec::new();
            }
        };

        let attempts = self.config.cloud_retries + 1;
        for attempt in 0..attempts {
            match cloud.transcribe_wav(wav).await {
                Ok(segments) if !segments.is_empty() => {
                    info!(
                        "cloud recovery produced {} segments on attempt {}",
                        segments.len(),
                        attempt + 1
                    );
                    return segments
                        .into_iter()
                        .map(|segment| TranscriptEvent {
                            text: segment.text,
                            is_final: true,
                            confidence: segment.confidence.unwrap_or(1.0).clamp(0.0, 1.0),
                            timestamp: normalize_timestamp(
                                segment.start,
                                input.session_start,
                            ),
                            tier: TierId::CloudStreaming,
                        })
                        .collect();
                }
                Ok(_) => {
                    debug!("cloud recovery attempt {} returned nothing", attempt + 1);
                    return Vec::new();
                }
                Err(e) => {
                    warn!("cloud recovery attempt {} failed: {}", attempt + 1, e);
                    if attempt + 1 < attempts {
                        // Linear backoff between attempts
                        tokio::time::sleep(self.config.cloud_retry_delay * (attempt + 1)).await;
                    }
                }
            }
        }
        Vec::new()
    }

    async fn recover_via_local(&self, input: &RecoveryInput) -> Vec<TranscriptEvent> {
        let (local, pcm) = match (&self.local, &input.raw_pcm) {
            (Some(local), Some(pcm)) if !pcm.is_empty() => (local, pcm),
            _ => {
                debug!("local recovery skipped: no model or no raw audio");
                return Vec::new();
            }
        };

        let duration_secs = pcm.len() as u64 / self.config.sample_rate as u64;
        if duration_secs > self.config.max_session_secs {
            warn!(
                "local recovery skipped: session is {}s, cap is {}s",
                duration_secs, self.config.max_session_secs
            );
            return Vec::new();
        }

        let attempts = self.config.local_retries + 1;
        for attempt in 0..attempts {
            match self.local_pass(local, pcm, input.session_start).await {
                Ok(events) => {
                    info!(
                        "local recovery produced {} events on attempt {}",
                        events.len(),
                        attempt + 1
                    );
                    return events;
                }
                Err(e) => {
                    warn!("local recovery attempt {} failed: {}", attempt + 1, e);
                    if attempt + 1 < attempts {
                        // Increasing backoff between passes
                        tokio::time::sleep(self.config.local_retry_delay * (attempt + 1)).await;
                    }
                }
            }
        }
        Vec::new()
    }

    /// One sequential pass over the PCM in fixed windows.
    async fn local_pass(
        &self,
        local: &Arc<dyn Transcriber>,
        pcm: &[f32],
        session_start: f64,
    ) -> crate::error::Result<Vec<TranscriptEvent>> {
        let mut batcher = BatchTranscriber::new(
            local.clone(),
            self.config.window_secs,
            self.config.sample_rate,
            session_start,
            TierId::LocalBatch,
        );
        batcher.push(pcm);

        let mut events = Vec::new();
        while let Some(window) = batcher.take_window(true) {
            let transcriber = local.clone();
            let event = tokio::task::spawn_blocking(move || {
                batch::transcribe_window(
                    &transcriber,
                    &window,
                    session_start,
                    TierId::LocalBatch,
                )
            })
            .await
            .unwrap_or_else(|e| {
                Err(crate::error::VoxcapError::Transcription {
                    message: format!("recovery window panicked: {}", e),
                })
            })?;

            if let Some(event) = event {
                events.push(event);
            }
            // Brief yield between windows so recovery never monopolizes
            // the process.
            tokio::task::yield_now().await;
        }
        Ok(events)
    }
}

/// Rebases backend timestamps onto the session start.
///
/// Values under one day's worth of seconds are treated as session-relative;
/// anything larger is assumed to already be absolute. This is a heuristic: a
/// session legitimately longer than a day would misclassify.
fn normalize_timestamp(start: Option<f64>, session_start: f64) -> f64 {
    match start {
        None => session_start,
        Some(value) if value < defaults::RELATIVE_TIMESTAMP_CUTOFF_SECS => {
            session_start + value.max(0.0)
        }
        Some(value) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoxcapError;
    use crate::recovery::cloud::RemoteSegment;
    use crate::stt::transcriber::MockTranscriber;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeCloud {
        fail_first: u32,
        attempts: AtomicU32,
        segments: Mutex<Vec<RemoteSegment>>,
    }

    impl FakeCloud {
        fn new(fail_first: u32, segments: Vec<RemoteSegment>) -> Arc<Self> {
            Arc::new(Self {
                fail_first,
                attempts: AtomicU32::new(0),
                segments: Mutex::new(segments),
            })
        }
    }

    #[async_trait]
    impl CloudTranscriber for FakeCloud {
        async fn transcribe_wav(&self, _wav: &[u8]) -> crate::error::Result<Vec<RemoteSegment>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(VoxcapError::Network {
                    message: "simulated".to_string(),
                });
            }
            Ok(self.segments.lock().unwrap().clone())
        }
    }

    fn fast_config() -> RecoveryConfig {
        RecoveryConfig {
            cloud_retry_delay: Duration::from_millis(1),
            local_retry_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn segment(text: &str, start: Option<f64>) -> RemoteSegment {
        RemoteSegment {
            text: text.to_string(),
            start,
            confidence: Some(0.8),
        }
    }

    #[test]
    fn timestamps_under_a_day_are_rebased() {
        assert_eq!(normalize_timestamp(Some(12.5), 1000.0), 1012.5);
        assert_eq!(normalize_timestamp(Some(0.0), 1000.0), 1000.0);
        assert_eq!(normalize_timestamp(None, 1000.0), 1000.0);
        // Already absolute: left alone
        assert_eq!(
            normalize_timestamp(Some(1_700_000_000.0), 1000.0),
            1_700_000_000.0
        );
    }

    #[tokio::test]
    async fn cloud_recovery_normalizes_segment_timestamps() {
        let cloud = FakeCloud::new(0, vec![segment("one", Some(5.0)), segment("two", None)]);
        let orchestrator =
            RecoveryOrchestrator::new(Some(cloud), None, fast_config());

        let events = orchestrator
            .recover(RecoveryInput {
                session_start: 2000.0,
                encoded_wav: Some(vec![1, 2, 3]),
                raw_pcm: None,
            })
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp, 2005.0);
        assert_eq!(events[1].timestamp, 2000.0);
        assert!(events.iter().all(|e| e.is_final));
        assert!(events.iter().all(|e| e.tier == TierId::CloudStreaming));
    }

    #[tokio::test]
    async fn cloud_recovery_retries_with_bounded_attempts() {
        let cloud = FakeCloud::new(2, vec![segment("late success", Some(0.0))]);
        let orchestrator =
            RecoveryOrchestrator::new(Some(cloud.clone()), None, fast_config());

        let events = orchestrator
            .recover(RecoveryInput {
                session_start: 0.0,
                encoded_wav: Some(vec![1]),
                raw_pcm: None,
            })
            .await;

        assert_eq!(events.len(), 1);
        // First attempt + 2 retries
        assert_eq!(cloud.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cloud_exhaustion_returns_empty_not_error() {
        let cloud = FakeCloud::new(10, vec![]);
        let orchestrator =
            RecoveryOrchestrator::new(Some(cloud.clone()), None, fast_config());

        let events = orchestrator
            .recover(RecoveryInput {
                session_start: 0.0,
                encoded_wav: Some(vec![1]),
                raw_pcm: None,
            })
            .await;

        assert!(events.is_empty());
        assert_eq!(cloud.attempts.load(Ordering::SeqCst), 3, "2 retries max");
    }

    #[tokio::test]
    async fn local_fallback_recovers_one_speech_segment_at_its_offset() {
        // 2 minutes of PCM with one 5-second speech burst at offset 30s
        let sample_rate = 16000usize;
        let mut pcm = vec![0.0f32; sample_rate * 120];
        for sample in &mut pcm[sample_rate * 30..sample_rate * 35] {
            *sample = 0.1;
        }

        let local = Arc::new(MockTranscriber::new("m").with_response("the narration"));
        let orchestrator = RecoveryOrchestrator::new(
            None,
            Some(local.clone()),
            fast_config(),
        );

        let session_start = 1_000_000.0;
        let events = orchestrator
            .recover(RecoveryInput {
                session_start,
                encoded_wav: None,
                raw_pcm: Some(pcm),
            })
            .await;

        // Silent windows are skipped by the energy gate; only the window
        // containing the burst reaches the model
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text, "the narration");
        assert_eq!(events[0].timestamp, session_start + 30.0);
        assert_eq!(events[0].tier, TierId::LocalBatch);
    }

    #[tokio::test]
    async fn empty_cloud_result_falls_through_to_local() {
        let cloud = FakeCloud::new(0, vec![]);
        let sample_rate = 16000usize;
        let pcm = vec![0.1f32; sample_rate * 10];
        let local = Arc::new(MockTranscriber::new("m").with_response("local rescue"));

        let orchestrator = RecoveryOrchestrator::new(
            Some(cloud),
            Some(local),
            fast_config(),
        );

        let events = orchestrator
            .recover(RecoveryInput {
                session_start: 0.0,
                encoded_wav: Some(vec![1]),
                raw_pcm: Some(pcm),
            })
            .await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text, "local rescue");
    }

    #[tokio::test]
    async fn sessions_over_the_cap_are_not_recovered_locally() {
        let sample_rate = 16000usize;
        let pcm = vec![0.1f32; sample_rate * 600]; // 10 minutes, cap is 8
        let local = Arc::new(MockTranscriber::new("m"));

        let orchestrator = RecoveryOrchestrator::new(
            None,
            Some(local.clone()),
            fast_config(),
        );

        let events = orchestrator
            .recover(RecoveryInput {
                session_start: 0.0,
                encoded_wav: None,
                raw_pcm: Some(pcm),
            })
            .await;

        assert!(events.is_empty());
        assert!(local.call_sample_counts().is_empty(), "model never invoked");
    }

    #[tokio::test]
    async fn local_failure_retries_then_gives_up_empty() {
        let sample_rate = 16000usize;
        let pcm = vec![0.1f32; sample_rate * 5];
        let local = Arc::new(MockTranscriber::new("m").with_failure());

        let orchestrator = RecoveryOrchestrator::new(
            None,
            Some(local.clone()),
            fast_config(),
        );

        let events = orchestrator
            .recover(RecoveryInput {
                session_start: 0.0,
                encoded_wav: None,
                raw_pcm: Some(pcm),
            })
            .await;

        assert!(events.is_empty());
        // First pass + 3 retries, one window each
        assert_eq!(local.call_sample_counts().len(), 4);
    }

    #[tokio::test]
    async fn nothing_to_work_with_returns_empty() {
        let orchestrator = RecoveryOrchestrator::new(None, None, fast_config());
        let events = orchestrator.recover(RecoveryInput::default()).await;
        assert!(events.is_empty());
    }
}
