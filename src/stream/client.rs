//! Streaming transcription client.
//!
//! Maintains a persistent connection to a real-time transcription backend.
//! Audio is always staged through a bounded ring buffer that the connection
//! task drains in order: while the connection is down the buffer absorbs up
//! to ~10s of audio (dropping the oldest on overflow — recency beats
//! completeness for live captions), and on (re)connect it is flushed in
//! original order before new sends.
//!
//! Reconnection uses exponential backoff with ±30% jitter, biased upward on
//! rate-limit errors, and gives up after a fixed attempt ceiling by
//! surfacing a fatal error that the tier manager treats as a tier failure.
//! Auth errors stop reconnection immediately.

use crate::clock::{Clock, SystemClock};
use crate::defaults;
use crate::error::{Result, VoxcapError};
use crate::stream::transport::{
    StreamingTransport, TransportError, TransportErrorKind, TransportEvent, TransportSink,
    TransportSource,
};
use crate::tier::TierEvent;
use crate::types::{AudioChunk, PauseEvent, TierId, TranscriptEvent};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reconnect backoff parameters.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
    /// Jitter fraction; each delay is scaled by a random factor in
    /// [1 - jitter, 1 + jitter] to avoid synchronized retries.
    pub jitter: f64,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(defaults::RECONNECT_BASE_DELAY_MS),
            multiplier: defaults::RECONNECT_MULTIPLIER,
            max: Duration::from_millis(defaults::RECONNECT_MAX_DELAY_MS),
            jitter: defaults::RECONNECT_JITTER,
            max_attempts: defaults::RECONNECT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffConfig {
    /// Delay before reconnect attempt `attempt` (0-based).
    ///
    /// Rate-limit errors bias the delay upward before the cap is applied.
    pub fn delay(&self, attempt: u32, rate_limited: bool) -> Duration {
        let mut ms = self.base.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        if rate_limited {
            ms *= 2.0;
        }
        ms = ms.min(self.max.as_millis() as f64);
        if self.jitter > 0.0 {
            let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
            ms *= factor;
        }
        Duration::from_millis(ms.max(0.0) as u64)
    }
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    /// Disconnected; audio is buffering while a reconnect is pending.
    Buffering,
    /// Gave up: auth error or attempt ceiling reached.
    Failed,
}

/// Configuration for the streaming client.
#[derive(Debug, Clone)]
pub struct StreamingClientConfig {
    /// Service name used for credential lookup and error messages.
    pub service: String,
    pub buffer_capacity: usize,
    pub keepalive_interval: Duration,
    pub backoff: BackoffConfig,
}

impl Default for StreamingClientConfig {
    fn default() -> Self {
        Self {
            service: "cloud-stt".to_string(),
            buffer_capacity: defaults::LIVE_BUFFER_CAPACITY,
            keepalive_interval: Duration::from_secs(defaults::KEEPALIVE_INTERVAL_SECS),
            backoff: BackoffConfig::default(),
        }
    }
}

impl From<&crate::config::StreamConfig> for StreamingClientConfig {
    fn from(config: &crate::config::StreamConfig) -> Self {
        Self {
            service: "cloud-stt".to_string(),
            buffer_capacity: config.buffer_capacity,
            keepalive_interval: Duration::from_secs(config.keepalive_interval_secs),
            backoff: BackoffConfig {
                base: Duration::from_millis(config.reconnect_base_delay_ms),
                multiplier: config.reconnect_multiplier,
                max: Duration::from_millis(config.reconnect_max_delay_ms),
                jitter: defaults::RECONNECT_JITTER,
                max_attempts: config.reconnect_max_attempts,
            },
        }
    }
}

struct ClientShared {
    state: Mutex<ConnectionState>,
    queue: Mutex<VecDeque<AudioChunk>>,
    dropped: AtomicU64,
    queued: Notify,
    capacity: usize,
}

impl ClientShared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

/// Client for a streaming transcription backend.
pub struct StreamingTranscriptionClient {
    transport: Arc<dyn StreamingTransport>,
    config: StreamingClientConfig,
    clock: Arc<dyn Clock>,
    api_key: Mutex<Option<String>>,
    shared: Arc<ClientShared>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingTranscriptionClient {
    pub fn new(transport: Arc<dyn StreamingTransport>, config: StreamingClientConfig) -> Self {
        Self::with_clock(transport, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        transport: Arc<dyn StreamingTransport>,
        config: StreamingClientConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let capacity = config.buffer_capacity;
        Self {
            transport,
            config,
            clock,
            api_key: Mutex::new(None),
            shared: Arc::new(ClientShared {
                state: Mutex::new(ConnectionState::Idle),
                queue: Mutex::new(VecDeque::new()),
                dropped: AtomicU64::new(0),
                queued: Notify::new(),
                capacity,
            }),
            shutdown: watch::channel(false).0,
            task: Mutex::new(None),
        }
    }

    /// Sets credentials for the backend.
    ///
    /// Absent credentials are a normal condition: the client stays
    /// unconfigured (and the tier reports unavailable), with a logged reason.
    pub fn configure(&self, api_key: Option<String>) {
        match api_key {
            Some(key) if !key.is_empty() => {
                *self.api_key.lock().unwrap_or_else(|e| e.into_inner()) = Some(key);
            }
            _ => {
                info!(
                    "no credentials for {}; streaming tier stays unconfigured",
                    self.config.service
                );
                *self.api_key.lock().unwrap_or_else(|e| e.into_inner()) = None;
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Chunks currently waiting in the ring buffer.
    pub fn buffered_len(&self) -> usize {
        self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Chunks dropped to overflow since construction.
    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::SeqCst)
    }

    /// Stages a chunk for transmission.
    ///
    /// Never blocks: while connected the connection task drains the queue
    /// immediately; while disconnected the queue acts as the bounded live
    /// buffer, dropping the oldest chunk on overflow.
    pub fn send_audio(&self, chunk: &AudioChunk) {
        {
            let mut queue = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
            if queue.len() >= self.shared.capacity {
                queue.pop_front();
                self.shared.dropped.fetch_add(1, Ordering::SeqCst);
            }
            queue.push_back(chunk.clone());
        }
        self.shared.queued.notify_one();
    }

    /// Opens the connection and starts the reconnect machinery.
    ///
    /// Transcript, pause, and fatal events flow into `events`.
    pub fn start(&self, events: mpsc::Sender<TierEvent>) -> Result<()> {
        let api_key = self
            .api_key
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| VoxcapError::TierUnavailable {
                tier: TierId::CloudStreaming.to_string(),
                reason: format!("no credentials configured for {}", self.config.service),
            })?;

        self.shutdown.send_replace(false);
        self.shared.set_state(ConnectionState::Connecting);

        let task = tokio::spawn(run_loop(
            self.transport.clone(),
            self.config.clone(),
            api_key,
            self.shared.clone(),
            events,
            self.clock.clone(),
            self.shutdown.subscribe(),
        ));
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        Ok(())
    }

    /// Closes the connection and cancels any pending reconnect.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.shared.set_state(ConnectionState::Idle);
    }
}

async fn run_loop(
    transport: Arc<dyn StreamingTransport>,
    config: StreamingClientConfig,
    api_key: String,
    shared: Arc<ClientShared>,
    events: mpsc::Sender<TierEvent>,
    clock: Arc<dyn Clock>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }
        shared.set_state(ConnectionState::Connecting);

        let error = match transport.connect(&api_key).await {
            Ok((mut sink, source)) => {
                attempt = 0;
                shared.set_state(ConnectionState::Buffering);
                debug!(
                    "{} connected; flushing {} buffered chunks",
                    config.service,
                    shared.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
                );

                let outcome = run_connection(
                    &mut sink,
                    source,
                    &shared,
                    &events,
                    &config,
                    &clock,
                    &mut shutdown,
                )
                .await;
                sink.close().await;

                match outcome {
                    Ok(()) => break, // shutdown requested or events consumer gone
                    Err(e) => e,
                }
            }
            Err(e) => e,
        };

        match error.kind {
            TransportErrorKind::Auth => {
                warn!("{} authentication failed: {}", config.service, error.message);
                let _ = events
                    .send(TierEvent::Fatal {
                        tier: TierId::CloudStreaming,
                        error: VoxcapError::Auth {
                            service: config.service.clone(),
                            message: error.message,
                        },
                    })
                    .await;
                shared.set_state(ConnectionState::Failed);
                break;
            }
            TransportErrorKind::RateLimit | TransportErrorKind::Network => {
                attempt += 1;
                if attempt >= config.backoff.max_attempts {
                    warn!(
                        "{} unreachable after {} attempts: {}",
                        config.service, attempt, error.message
                    );
                    let _ = events
                        .send(TierEvent::Fatal {
                            tier: TierId::CloudStreaming,
                            error: VoxcapError::Network {
                                message: format!(
                                    "{} unreachable after {} attempts: {}",
                                    config.service, attempt, error.message
                                ),
                            },
                        })
                        .await;
                    shared.set_state(ConnectionState::Failed);
                    break;
                }

                let rate_limited = error.kind == TransportErrorKind::RateLimit;
                let delay = config.backoff.delay(attempt - 1, rate_limited);
                debug!(
                    "{} disconnected ({}); reconnect {}/{} in {:?}",
                    config.service, error.message, attempt, config.backoff.max_attempts, delay
                );
                shared.set_state(ConnectionState::Buffering);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }
}

/// Pumps one open connection until it fails or shutdown is requested.
///
/// Returns `Ok(())` only for deliberate termination; every disconnect is an
/// error for the caller to classify.
async fn run_connection(
    sink: &mut Box<dyn TransportSink>,
    mut source: Box<dyn TransportSource>,
    shared: &Arc<ClientShared>,
    events: &mpsc::Sender<TierEvent>,
    config: &StreamingClientConfig,
    clock: &Arc<dyn Clock>,
    shutdown: &mut watch::Receiver<bool>,
) -> std::result::Result<(), TransportError> {
    // Flush the buffer in original order before accepting new live sends.
    drain_queue(sink.as_mut(), shared).await?;
    shared.set_state(ConnectionState::Open);

    let mut keepalive = tokio::time::interval_at(
        tokio::time::Instant::now() + config.keepalive_interval,
        config.keepalive_interval,
    );
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            event = source.next_event() => match event? {
                Some(TransportEvent::Transcript { text, is_final, confidence }) => {
                    let transcript = TranscriptEvent {
                        text,
                        is_final,
                        confidence: confidence.clamp(0.0, 1.0),
                        timestamp: clock.epoch_secs(),
                        tier: TierId::CloudStreaming,
                    };
                    if events.send(TierEvent::Transcript(transcript)).await.is_err() {
                        return Ok(());
                    }
                }
                Some(TransportEvent::UtteranceEnd) => {
                    let pause = PauseEvent {
                        timestamp: clock.epoch_secs(),
                        tier: TierId::CloudStreaming,
                    };
                    if events.send(TierEvent::Pause(pause)).await.is_err() {
                        return Ok(());
                    }
                }
                None => return Err(TransportError::network("connection closed by server")),
            },
            _ = shared.queued.notified() => {
                drain_queue(sink.as_mut(), shared).await?;
            }
            _ = keepalive.tick() => {
                sink.keepalive().await?;
            }
        }
    }
}

async fn drain_queue(
    sink: &mut dyn TransportSink,
    shared: &Arc<ClientShared>,
) -> std::result::Result<(), TransportError> {
    loop {
        let chunk = shared
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match chunk {
            Some(chunk) => sink.send_audio(&chunk.samples).await?,
            None => return Ok(()),
        }
    }
}
