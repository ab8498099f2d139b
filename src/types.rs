//! Core data types shared across the transcription pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One interchangeable transcription backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TierId {
    /// Real-time cloud streaming transcription.
    CloudStreaming,
    /// Local model transcription in fixed windows.
    LocalBatch,
    /// No-op tier that only keeps segmentation signals alive.
    TimerOnly,
}

impl TierId {
    /// Fixed priority order, best quality first.
    pub const PRIORITY: [TierId; 3] = [TierId::CloudStreaming, TierId::LocalBatch, TierId::TimerOnly];
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierId::CloudStreaming => write!(f, "cloud-streaming"),
            TierId::LocalBatch => write!(f, "local-batch"),
            TierId::TimerOnly => write!(f, "timer-only"),
        }
    }
}

/// Tier selection preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TierPreference {
    /// Walk the priority list and take the first available tier.
    #[default]
    Auto,
    /// Use the named tier when available, otherwise fall back to auto.
    Fixed(TierId),
}

/// A unit of transcribed text.
///
/// Immutable once emitted. Events from the same tier are non-decreasing in
/// `timestamp`; an interim event may be superseded by a later final event for
/// the same utterance window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
    /// Confidence in [0, 1].
    pub confidence: f32,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub tier: TierId,
}

/// A detected utterance boundary.
///
/// Consumed externally (e.g. to trigger a screenshot); this core only emits it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PauseEvent {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub tier: TierId,
}

/// Availability of a tier, recomputed on demand from environment truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierStatus {
    pub tier: TierId,
    pub available: bool,
    pub reason: Option<String>,
}

impl TierStatus {
    pub fn available(tier: TierId) -> Self {
        Self {
            tier,
            available: true,
            reason: None,
        }
    }

    pub fn unavailable(tier: TierId, reason: impl Into<String>) -> Self {
        Self {
            tier,
            available: false,
            reason: Some(reason.into()),
        }
    }
}

/// Emitted when the manager switches the active tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierChange {
    pub from: TierId,
    pub to: TierId,
    pub reason: String,
}

/// A fixed-size PCM frame handed in from the capture layer.
///
/// Fanned out by reference to the VAD, the recovery buffer, and the active
/// tier; never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Mono float32 PCM samples in [-1, 1].
    pub samples: Vec<f32>,
    /// Capture time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub duration_ms: u32,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioChunk {
    /// Builds a mono 16kHz chunk, deriving the duration from the sample count.
    pub fn mono_16k(samples: Vec<f32>, timestamp_ms: u64) -> Self {
        let duration_ms = (samples.len() as u64 * 1000 / crate::defaults::SAMPLE_RATE as u64) as u32;
        Self {
            samples,
            timestamp_ms,
            duration_ms,
            sample_rate: crate::defaults::SAMPLE_RATE,
            channels: 1,
        }
    }
}
