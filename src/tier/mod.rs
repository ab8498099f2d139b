//! Transcription tiers and the manager that orchestrates them.
//!
//! Each backend is a [`Tier`]: cloud streaming, local batch, and the no-op
//! timer-only fallback. The manager walks them in priority order, routes
//! audio to whichever is active, and fails over when one reports a fatal
//! error.

pub mod cloud;
pub mod local;
pub mod manager;
pub mod timer;

use crate::error::{Result, VoxcapError};
use crate::types::{AudioChunk, PauseEvent, TierId, TierStatus, TranscriptEvent};
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use cloud::CloudStreamingTier;
pub use local::LocalBatchTier;
pub use manager::{ManagerState, TierManager, TierManagerConfig};
pub use timer::TimerOnlyTier;

/// Events a running tier pushes up to the manager.
#[derive(Debug)]
pub enum TierEvent {
    Transcript(TranscriptEvent),
    Pause(PauseEvent),
    /// The tier exhausted its own retry budget. The manager fails over.
    Fatal { tier: TierId, error: VoxcapError },
}

/// One interchangeable transcription backend.
#[async_trait]
pub trait Tier: Send + Sync {
    fn id(&self) -> TierId;

    /// Availability, recomputed from environment truth on every call
    /// (credentials present? model downloaded? memory sufficient?).
    fn status(&self) -> TierStatus;

    /// Starts the backend and wires its events into `events`.
    async fn start(&self, events: mpsc::Sender<TierEvent>) -> Result<()>;

    /// Stops the backend and tears down its timers and tasks.
    async fn stop(&self);

    /// Routes one audio chunk to the backend.
    ///
    /// Called synchronously on the frame path; must never block on I/O.
    fn send_audio(&self, chunk: &AudioChunk);

    /// True when the tier derives pause events from its own backend; when
    /// false the manager feeds the shared VAD instead.
    fn provides_pause_events(&self) -> bool;
}
