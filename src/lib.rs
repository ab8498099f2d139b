//! voxcap - Transcription tiering and audio-resilience core.
//!
//! Streams captured narration audio to interchangeable speech-to-text
//! backends, fails over between them without losing audio, buffers safely
//! under network loss, detects speech pauses for segmentation, and can still
//! recover a transcript from raw audio after a session ends.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod defaults;
pub mod error;
pub mod event;
pub mod recovery;
pub mod session;
pub mod stream;
pub mod stt;
pub mod tier;
pub mod types;

// Core traits (the seams hosts and tests plug into)
pub use clock::{Clock, SystemClock};
pub use credentials::{CredentialSource, EnvCredentialSource, StaticCredentials};
pub use recovery::cloud::CloudTranscriber;
pub use stream::transport::{StreamingTransport, TransportSink, TransportSource};
pub use stt::transcriber::Transcriber;
pub use tier::Tier;

// Tier orchestration
pub use tier::{
    CloudStreamingTier, LocalBatchTier, ManagerState, TierManager, TierManagerConfig,
    TimerOnlyTier,
};

// Streaming client
pub use stream::{BackoffConfig, ConnectionState, StreamingClientConfig, StreamingTranscriptionClient};

// Audio resilience
pub use audio::{AudioRecoveryBuffer, RecoveryBufferConfig, Vad, VadConfig, WavFormat};

// Post-session recovery
pub use recovery::{HttpCloudTranscriber, RecoveryConfig, RecoveryInput, RecoveryOrchestrator};

// Session accumulation and crash recovery
pub use session::{
    CrashLog, CrashRecoveryStore, RecoverableSession, Session, SessionState, SessionStatus,
    SessionTracker,
};

// Error handling
pub use error::{Result, VoxcapError};

// Config
pub use config::Config;

// Event streams
pub use event::{EventBus, Subscription};
pub use types::{
    AudioChunk, PauseEvent, TierChange, TierId, TierPreference, TierStatus, TranscriptEvent,
};
