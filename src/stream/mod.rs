//! Streaming transcription: the pluggable transport seam and the client
//! that layers buffering, reconnection, and keepalive on top of it.

pub mod client;
pub mod transport;

pub use client::{
    BackoffConfig, ConnectionState, StreamingClientConfig, StreamingTranscriptionClient,
};
pub use transport::{
    MockTransport, StreamingTransport, TransportError, TransportErrorKind, TransportEvent,
    TransportSink, TransportSource,
};
