//! Timer-only tier: the deliberate last resort.
//!
//! Never fails and never transcribes. It emits a pause event on a fixed
//! cadence so downstream segmentation (screenshot capture) keeps working
//! even when every real backend is gone.

use crate::clock::{Clock, SystemClock};
use crate::defaults;
use crate::error::Result;
use crate::tier::{Tier, TierEvent};
use crate::types::{AudioChunk, PauseEvent, TierId, TierStatus};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

pub struct TimerOnlyTier {
    interval: Duration,
    clock: Arc<dyn Clock>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TimerOnlyTier {
    pub fn new() -> Self {
        Self::with_clock(
            Duration::from_secs(defaults::TIMER_TIER_INTERVAL_SECS),
            Arc::new(SystemClock),
        )
    }

    pub fn with_clock(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval,
            clock,
            shutdown: watch::channel(false).0,
            task: Mutex::new(None),
        }
    }
}

impl Default for TimerOnlyTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tier for TimerOnlyTier {
    fn id(&self) -> TierId {
        TierId::TimerOnly
    }

    fn status(&self) -> TierStatus {
        // Always available, by definition.
        TierStatus::available(TierId::TimerOnly)
    }

    async fn start(&self, events: mpsc::Sender<TierEvent>) -> Result<()> {
        self.shutdown.send_replace(false);
        let mut shutdown = self.shutdown.subscribe();
        let interval = self.interval;
        let clock = self.clock.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => break,
                }
                let pause = PauseEvent {
                    timestamp: clock.epoch_secs(),
                    tier: TierId::TimerOnly,
                };
                if events.send(TierEvent::Pause(pause)).await.is_err() {
                    break;
                }
            }
        });
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        debug!("timer-only tier started, pause every {:?}", self.interval);
        Ok(())
    }

    async fn stop(&self) {
        self.shutdown.send_replace(true);
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn send_audio(&self, _chunk: &AudioChunk) {
        // Audio is deliberately discarded.
    }

    fn provides_pause_events(&self) -> bool {
        true
    }
}
