//! Tier orchestration: selection, audio routing, and failover.
//!
//! The manager walks a fixed priority list (best quality first), starts the
//! chosen tier, and pumps its events into the subscriber buses. On a fatal
//! tier error it scans the priority list after the failed tier for the next
//! available one; after too many consecutive failures it jumps straight to
//! timer-only, which never fails.
//!
//! Tier switches are atomic with respect to audio dispatch: chunks arriving
//! mid-switch are queued under the dispatch lock and flushed to the new tier
//! before live routing resumes, so nothing is dropped or double-delivered.

use crate::audio::vad::{Vad, VadConfig, VadEvent};
use crate::clock::{Clock, SystemClock};
use crate::defaults;
use crate::error::{Result, VoxcapError};
use crate::event::{EventBus, Subscription};
use crate::tier::{Tier, TierEvent};
use crate::types::{
    AudioChunk, PauseEvent, TierChange, TierId, TierPreference, TierStatus, TranscriptEvent,
};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Manager lifecycle, as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Idle,
    Active(TierId),
    FailingOver,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct TierManagerConfig {
    pub preference: TierPreference,
    /// Consecutive failovers tolerated before jumping straight to timer-only.
    pub max_failures: u32,
    /// Shared VAD used when the active tier has no pause detection of its own.
    pub vad: VadConfig,
}

impl Default for TierManagerConfig {
    fn default() -> Self {
        Self {
            preference: TierPreference::Auto,
            max_failures: defaults::MAX_TIER_FAILURES,
            vad: VadConfig::default(),
        }
    }
}

enum Dispatch {
    Idle,
    Active { index: usize },
    /// Mid-switch: chunks queue here and flush to the new tier.
    Switching { queue: VecDeque<AudioChunk> },
    Stopped,
}

struct ManagerShared {
    tiers: Vec<Arc<dyn Tier>>,
    config: TierManagerConfig,
    clock: Arc<dyn Clock>,
    dispatch: Mutex<Dispatch>,
    pump: Mutex<Option<JoinHandle<()>>>,
    vad: Mutex<Vad<Arc<dyn Clock>>>,
    failures: AtomicU32,
    transcripts: EventBus<TranscriptEvent>,
    pauses: EventBus<PauseEvent>,
    tier_changes: EventBus<TierChange>,
}

/// Cloneable handle to the tier orchestrator.
#[derive(Clone)]
pub struct TierManager {
    shared: Arc<ManagerShared>,
}

impl TierManager {
    /// Builds a manager over `tiers`, which must be in priority order
    /// (best quality first) and end with a tier that can never fail.
    pub fn new(tiers: Vec<Arc<dyn Tier>>, config: TierManagerConfig) -> Self {
        Self::with_clock(tiers, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        tiers: Vec<Arc<dyn Tier>>,
        config: TierManagerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let vad = Vad::with_clock(config.vad, clock.clone());
        Self {
            shared: Arc::new(ManagerShared {
                tiers,
                config,
                clock,
                dispatch: Mutex::new(Dispatch::Idle),
                pump: Mutex::new(None),
                vad: Mutex::new(vad),
                failures: AtomicU32::new(0),
                transcripts: EventBus::new(),
                pauses: EventBus::new(),
                tier_changes: EventBus::new(),
            }),
        }
    }

    /// Availability of every known tier, recomputed on demand.
    pub fn tier_statuses(&self) -> Vec<TierStatus> {
        self.shared.tiers.iter().map(|tier| tier.status()).collect()
    }

    /// Deterministic tier choice: a fixed preference wins when available,
    /// otherwise the first available tier in priority order. Never returns
    /// an unavailable tier.
    pub fn select_best_tier(&self) -> TierId {
        if let TierPreference::Fixed(preferred) = self.shared.config.preference
            && let Some(tier) = self.tier_by_id(preferred)
            && tier.status().available
        {
            return preferred;
        }

        for tier in &self.shared.tiers {
            if tier.status().available {
                return tier.id();
            }
        }
        TierId::TimerOnly
    }

    /// Starts the best available tier and returns which one is running.
    pub async fn start(&self) -> Result<TierId> {
        let tier = self.select_best_tier();
        self.start_tier(tier).await
    }

    /// Starts a specific tier, stopping whichever was active.
    pub async fn start_tier(&self, tier: TierId) -> Result<TierId> {
        self.switch_to(tier, "start".to_string()).await
    }

    /// Explicit external failover trigger (e.g. unacceptable audio quality).
    pub async fn force_failover(&self, reason: &str) {
        let current = match self.state() {
            ManagerState::Active(tier) => tier,
            _ => return,
        };
        self.fail_over_from(current, reason.to_string()).await;
    }

    /// Routes one chunk to the active tier.
    ///
    /// Feeds the shared VAD when the active tier has no pause detection of
    /// its own; a confirmed speech end is published as a pause event.
    /// Chunks arriving during a switch are queued, not dropped.
    pub fn send_audio(&self, chunk: &AudioChunk) {
        let mut pause = None;
        {
            let mut dispatch = self
                .shared
                .dispatch
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            match &mut *dispatch {
                Dispatch::Active { index } => {
                    let tier = &self.shared.tiers[*index];
                    tier.send_audio(chunk);
                    if !tier.provides_pause_events() {
                        let mut vad = self.shared.vad.lock().unwrap_or_else(|e| e.into_inner());
                        if vad.process(&chunk.samples) == VadEvent::SpeechEnd {
                            pause = Some(PauseEvent {
                                timestamp: self.shared.clock.epoch_secs(),
                                tier: tier.id(),
                            });
                        }
                    }
                }
                Dispatch::Switching { queue } => queue.push_back(chunk.clone()),
                Dispatch::Idle | Dispatch::Stopped => {}
            }
        }
        // Emit outside the dispatch lock: subscribers may call back in.
        if let Some(pause) = pause {
            self.shared.pauses.emit(&pause);
        }
    }

    /// Stops the active tier and every pump task. Terminal.
    pub async fn stop(&self) {
        let old_index = {
            let mut dispatch = self
                .shared
                .dispatch
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let old = match *dispatch {
                Dispatch::Active { index } => Some(index),
                _ => None,
            };
            *dispatch = Dispatch::Stopped;
            old
        };

        if let Some(index) = old_index {
            self.shared.tiers[index].stop().await;
        }
        let pump = self
            .shared
            .pump
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(pump) = pump {
            let _ = pump.await;
        }
        info!("tier manager stopped");
    }

    pub fn state(&self) -> ManagerState {
        let dispatch = self
            .shared
            .dispatch
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match &*dispatch {
            Dispatch::Idle => ManagerState::Idle,
            Dispatch::Active { index } => ManagerState::Active(self.shared.tiers[*index].id()),
            Dispatch::Switching { .. } => ManagerState::FailingOver,
            Dispatch::Stopped => ManagerState::Stopped,
        }
    }

    pub fn current_tier(&self) -> Option<TierId> {
        match self.state() {
            ManagerState::Active(tier) => Some(tier),
            _ => None,
        }
    }

    /// Consecutive failover count since the last explicit start.
    pub fn failure_count(&self) -> u32 {
        self.shared.failures.load(Ordering::SeqCst)
    }

    pub fn subscribe_transcripts(
        &self,
        callback: impl Fn(&TranscriptEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.transcripts.subscribe(callback)
    }

    pub fn subscribe_pauses(
        &self,
        callback: impl Fn(&PauseEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.pauses.subscribe(callback)
    }

    pub fn subscribe_tier_changes(
        &self,
        callback: impl Fn(&TierChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.tier_changes.subscribe(callback)
    }

    fn tier_by_id(&self, id: TierId) -> Option<&Arc<dyn Tier>> {
        self.shared.tiers.iter().find(|tier| tier.id() == id)
    }

    fn tier_index(&self, id: TierId) -> Option<usize> {
        self.shared.tiers.iter().position(|tier| tier.id() == id)
    }

    /// Next available tier strictly after `failed` in priority order.
    fn next_available_after(&self, failed: TierId) -> TierId {
        let failed_index = self.tier_index(failed).unwrap_or(0);
        for tier in self.shared.tiers.iter().skip(failed_index + 1) {
            if tier.status().available {
                return tier.id();
            }
        }
        TierId::TimerOnly
    }

    /// Failover entry point, called from the event pump and force_failover.
    async fn fail_over_from(&self, failed: TierId, reason: String) {
        // Stale fatal from a tier that is no longer active: ignore.
        {
            let dispatch = self
                .shared
                .dispatch
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            match &*dispatch {
                Dispatch::Active { index } if self.shared.tiers[*index].id() == failed => {}
                _ => return,
            }
        }

        let failures = self.shared.failures.fetch_add(1, Ordering::SeqCst) + 1;
        let target = if failures > self.shared.config.max_failures {
            warn!(
                "{} consecutive tier failures, falling back to timer-only",
                failures
            );
            TierId::TimerOnly
        } else {
            self.next_available_after(failed)
        };

        if let Err(e) = self.switch_to(target, reason).await {
            // switch_to already walked every remaining tier; timer-only
            // cannot fail, so this is unreachable in practice.
            warn!("failover to {} failed: {}", target, e);
        }
    }

    /// Stops the active tier, starts `target`, and flushes queued audio.
    ///
    /// On a start failure the priority list after `target` is walked until a
    /// tier starts; timer-only is the backstop.
    fn switch_to<'a>(
        &'a self,
        target: TierId,
        reason: String,
    ) -> Pin<Box<dyn Future<Output = Result<TierId>> + Send + 'a>> {
        Box::pin(async move {
        // Enter the switching state, capturing the outgoing tier.
        let old_index = {
            let mut dispatch = self
                .shared
                .dispatch
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if matches!(*dispatch, Dispatch::Stopped) {
                return Err(VoxcapError::Other("manager is stopped".to_string()));
            }
            let old = match *dispatch {
                Dispatch::Active { index } => Some(index),
                _ => None,
            };
            *dispatch = Dispatch::Switching {
                queue: VecDeque::new(),
            };
            old
        };
        let from = old_index.map(|index| self.shared.tiers[index].id());

        // Stop and unsubscribe the outgoing tier before starting the next.
        if let Some(index) = old_index {
            self.shared.tiers[index].stop().await;
        }
        let old_pump = self
            .shared
            .pump
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(pump) = old_pump {
            let _ = pump.await;
        }

        // Start the target, walking down the priority list on start errors.
        let mut candidate = target;
        let (started_index, events_rx) = loop {
            let index = match self.tier_index(candidate) {
                Some(index) => index,
                None if candidate == TierId::TimerOnly => {
                    // No backstop tier was registered at all.
                    let mut dispatch = self
                        .shared
                        .dispatch
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    *dispatch = Dispatch::Idle;
                    return Err(VoxcapError::TiersExhausted);
                }
                None => {
                    candidate = TierId::TimerOnly;
                    continue;
                }
            };
            let (tx, rx) = mpsc::channel(64);
            match self.shared.tiers[index].start(tx).await {
                Ok(()) => break (index, rx),
                Err(e) => {
                    warn!("tier {} failed to start: {}", candidate, e);
                    if candidate == TierId::TimerOnly {
                        let mut dispatch = self
                            .shared
                            .dispatch
                            .lock()
                            .unwrap_or_else(|e| e.into_inner());
                        *dispatch = Dispatch::Idle;
                        return Err(VoxcapError::TiersExhausted);
                    }
                    candidate = self.next_available_after(candidate);
                }
            }
        };
        let started = self.shared.tiers[started_index].id();

        // Pump tier events into the subscriber buses.
        let manager = self.clone();
        let pump = tokio::spawn(pump_events(manager, events_rx));
        *self.shared.pump.lock().unwrap_or_else(|e| e.into_inner()) = Some(pump);

        // Flush chunks that arrived mid-switch, then go live. Holding the
        // dispatch lock makes the flush atomic with new arrivals. A stop()
        // that raced the switch wins: the fresh tier is torn back down.
        let stopped_underneath = {
            let mut dispatch = self
                .shared
                .dispatch
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if matches!(*dispatch, Dispatch::Stopped) {
                true
            } else {
                if let Dispatch::Switching { queue } = &mut *dispatch {
                    let tier = &self.shared.tiers[started_index];
                    for chunk in queue.drain(..) {
                        tier.send_audio(&chunk);
                    }
                }
                *dispatch = Dispatch::Active {
                    index: started_index,
                };
                false
            }
        };
        if stopped_underneath {
            self.shared.tiers[started_index].stop().await;
            return Err(VoxcapError::Other("manager is stopped".to_string()));
        }

        debug!("tier {} active ({})", started, reason);
        if let Some(from) = from {
            self.shared.tier_changes.emit(&TierChange {
                from,
                to: started,
                reason,
            });
        }
        Ok(started)
        })
    }
}

/// Forwards one tier's events to the buses; fatal errors trigger failover.
async fn pump_events(manager: TierManager, mut rx: mpsc::Receiver<TierEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            TierEvent::Transcript(transcript) => manager.shared.transcripts.emit(&transcript),
            TierEvent::Pause(pause) => manager.shared.pauses.emit(&pause),
            TierEvent::Fatal { tier, error } => {
                warn!("tier {} reported fatal error: {}", tier, error);
                // Run failover outside this pump so awaiting the old pump
                // during the switch cannot deadlock.
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager
                        .fail_over_from(tier, format!("{} failed: {}", tier, error))
                        .await;
                });
                break;
            }
        }
    }
}
