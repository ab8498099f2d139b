//! Pluggable wire transport for streaming transcription.
//!
//! This crate defines no wire protocol of its own: a backend supplies a
//! [`StreamingTransport`] that opens connections, and the client layers the
//! reconnect/buffer/keepalive machinery on top. Connections split into a
//! sink half (audio out) and a source half (events in) so the client can
//! pump both concurrently.

use async_trait::async_trait;
use std::fmt;

/// Classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Credentials rejected. Not retryable; reconnection stops.
    Auth,
    /// Backend throttling. Retryable with increased backoff.
    RateLimit,
    /// Anything transient on the wire. Retryable with standard backoff.
    Network,
}

/// A classified transport failure.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Auth,
            message: message.into(),
        }
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::RateLimit,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Network,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TransportErrorKind::Auth => write!(f, "auth error: {}", self.message),
            TransportErrorKind::RateLimit => write!(f, "rate limited: {}", self.message),
            TransportErrorKind::Network => write!(f, "network error: {}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

/// Something the backend pushed to us.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A transcription result. Interim results carry `is_final = false` and
    /// are superseded by the final result for the same utterance window.
    Transcript {
        text: String,
        is_final: bool,
        confidence: f32,
    },
    /// The backend's own silence detection found an utterance boundary.
    UtteranceEnd,
}

/// Factory for streaming connections.
#[async_trait]
pub trait StreamingTransport: Send + Sync {
    /// Opens a new connection, returning its sink and source halves.
    ///
    /// Implementations classify their own connect failures.
    async fn connect(
        &self,
        api_key: &str,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportSource>), TransportError>;
}

/// Outbound half of a connection.
#[async_trait]
pub trait TransportSink: Send {
    async fn send_audio(&mut self, samples: &[f32]) -> Result<(), TransportError>;

    async fn keepalive(&mut self) -> Result<(), TransportError>;

    /// Best-effort close; errors are ignored by callers.
    async fn close(&mut self);
}

/// Inbound half of a connection.
#[async_trait]
pub trait TransportSource: Send {
    /// Next event from the backend. `Ok(None)` means the server closed the
    /// connection cleanly.
    ///
    /// Must be cancel-safe: the client polls this inside a `select!` and
    /// drops the future whenever another branch wins.
    async fn next_event(&mut self) -> Result<Option<TransportEvent>, TransportError>;
}

// ---------------------------------------------------------------------------
// Mock transport for tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type EventFeed = mpsc::UnboundedSender<Result<TransportEvent, TransportError>>;

#[derive(Default)]
struct MockShared {
    /// Scripted failures consumed by upcoming connect calls.
    connect_failures: Mutex<VecDeque<TransportError>>,
    /// Feed into the currently open connection's source half.
    current_feed: Mutex<Option<EventFeed>>,
    /// Every audio payload sent, across all connections, in send order.
    sent: Mutex<Vec<Vec<f32>>>,
    connects: AtomicU32,
    keepalives: AtomicU64,
}

/// In-memory transport for driving the client in tests.
///
/// Connects succeed unless failures were scripted with `fail_next_connects`;
/// sent audio is recorded; events are injected with `emit` and the open
/// connection is killed with `break_connection`.
#[derive(Clone, Default)]
pub struct MockTransport {
    shared: Arc<MockShared>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the next `count` connect calls to fail with clones of `error`.
    pub fn fail_next_connects(&self, count: usize, error: TransportError) {
        let mut failures = self.shared.connect_failures.lock().unwrap();
        for _ in 0..count {
            failures.push_back(error.clone());
        }
    }

    /// Pushes an event into the currently open connection.
    pub fn emit(&self, event: TransportEvent) {
        if let Some(feed) = self.shared.current_feed.lock().unwrap().as_ref() {
            let _ = feed.send(Ok(event));
        }
    }

    /// Fails the currently open connection with `error`.
    pub fn break_connection(&self, error: TransportError) {
        if let Some(feed) = self.shared.current_feed.lock().unwrap().take() {
            let _ = feed.send(Err(error));
        }
    }

    /// Audio payloads sent so far, flattened across connections.
    pub fn sent_audio(&self) -> Vec<Vec<f32>> {
        self.shared.sent.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> u32 {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn keepalive_count(&self) -> u64 {
        self.shared.keepalives.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamingTransport for MockTransport {
    async fn connect(
        &self,
        _api_key: &str,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportSource>), TransportError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.shared.connect_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.current_feed.lock().unwrap() = Some(tx);

        let sink = MockSink {
            shared: self.shared.clone(),
        };
        let source = MockSource { rx };
        Ok((Box::new(sink), Box::new(source)))
    }
}

struct MockSink {
    shared: Arc<MockShared>,
}

#[async_trait]
impl TransportSink for MockSink {
    async fn send_audio(&mut self, samples: &[f32]) -> Result<(), TransportError> {
        self.shared.sent.lock().unwrap().push(samples.to_vec());
        Ok(())
    }

    async fn keepalive(&mut self) -> Result<(), TransportError> {
        self.shared.keepalives.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) {}
}

struct MockSource {
    rx: mpsc::UnboundedReceiver<Result<TransportEvent, TransportError>>,
}

#[async_trait]
impl TransportSource for MockSource {
    async fn next_event(&mut self) -> Result<Option<TransportEvent>, TransportError> {
        match self.rx.recv().await {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_display_includes_classification() {
        assert_eq!(
            TransportError::auth("bad key").to_string(),
            "auth error: bad key"
        );
        assert_eq!(
            TransportError::rate_limit("slow down").to_string(),
            "rate limited: slow down"
        );
        assert_eq!(
            TransportError::network("reset").to_string(),
            "network error: reset"
        );
    }

    #[tokio::test]
    async fn mock_connect_succeeds_and_records_audio() {
        let transport = MockTransport::new();
        let (mut sink, _source) = transport.connect("key").await.unwrap();

        sink.send_audio(&[0.1, 0.2]).await.unwrap();
        sink.keepalive().await.unwrap();

        assert_eq!(transport.connect_count(), 1);
        assert_eq!(transport.sent_audio(), vec![vec![0.1, 0.2]]);
        assert_eq!(transport.keepalive_count(), 1);
    }

    #[tokio::test]
    async fn mock_scripted_failures_are_consumed_in_order() {
        let transport = MockTransport::new();
        transport.fail_next_connects(2, TransportError::network("down"));

        assert!(transport.connect("key").await.is_err());
        assert!(transport.connect("key").await.is_err());
        assert!(transport.connect("key").await.is_ok());
        assert_eq!(transport.connect_count(), 3);
    }

    #[tokio::test]
    async fn mock_emit_and_break_drive_the_source() {
        let transport = MockTransport::new();
        let (_sink, mut source) = transport.connect("key").await.unwrap();

        transport.emit(TransportEvent::UtteranceEnd);
        assert_eq!(
            source.next_event().await.unwrap(),
            Some(TransportEvent::UtteranceEnd)
        );

        transport.break_connection(TransportError::network("cable pulled"));
        let error = source.next_event().await.unwrap_err();
        assert_eq!(error.kind, TransportErrorKind::Network);
    }
}
