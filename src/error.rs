//! Error types for voxcap.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxcapError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Backend authentication: not retryable, surfaced immediately
    #[error("Authentication failed for {service}: {message}")]
    Auth { service: String, message: String },

    // Backend throttling: retryable with increased backoff
    #[error("Rate limited by {service}: {message}")]
    RateLimit { service: String, message: String },

    // Transient transport failures: retryable with standard backoff
    #[error("Network error: {message}")]
    Network { message: String },

    // Device/resource limits: tier reported unavailable rather than started
    #[error("Insufficient resources: {message}")]
    Resource { message: String },

    // Corrupt artifacts: reported, never retried
    #[error("Corrupt data: {message}")]
    Corruption { message: String },

    // Transcription errors
    #[error("Transcription model not found at {path}")]
    ModelNotFound { path: String },

    #[error("Transcription failed: {message}")]
    Transcription { message: String },

    // Tier lifecycle errors
    #[error("Tier {tier} is unavailable: {reason}")]
    TierUnavailable { tier: String, reason: String },

    #[error("All transcription tiers exhausted")]
    TiersExhausted,

    // Snapshot/crash-store errors
    #[error("Snapshot error: {message}")]
    Snapshot { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl VoxcapError {
    /// Returns true if the error is worth retrying with backoff.
    ///
    /// Auth and corruption errors are terminal; everything transport-shaped
    /// is fair game for the reconnect/retry machinery.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VoxcapError::RateLimit { .. } | VoxcapError::Network { .. }
        )
    }

    /// Returns true if the error requires user action (no automatic recovery).
    pub fn is_fatal(&self) -> bool {
        matches!(self, VoxcapError::Auth { .. } | VoxcapError::TiersExhausted)
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxcapError>;
