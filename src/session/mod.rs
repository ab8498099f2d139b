//! Session data model and accumulation.
//!
//! The session itself is owned by the orchestrating caller; this module
//! supplies the state machine it must follow, the accumulator that collects
//! transcript events during recording, and the crash-recovery store.

pub mod crash_log;
pub mod crash_store;

use crate::error::{Result, VoxcapError};
use crate::event::Subscription;
use crate::tier::TierManager;
use crate::types::TranscriptEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub use crash_log::{CrashLog, CrashLogEntry};
pub use crash_store::{CrashRecoveryStore, RecoverableSession};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Idle,
    Starting,
    Recording,
    Paused,
    Stopping,
    /// Post-session work; recovery may run here.
    Processing,
    Complete,
    Error,
}

impl SessionState {
    /// Legal transitions of the session state machine.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Recording)
                | (Recording, Paused)
                | (Paused, Recording)
                | (Recording, Stopping)
                | (Paused, Stopping)
                | (Stopping, Processing)
                | (Processing, Complete)
                | (Starting, Error)
                | (Recording, Error)
                | (Paused, Error)
                | (Stopping, Error)
                | (Processing, Error)
        )
    }
}

/// One narrated recording session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub state: SessionState,
    pub transcript_events: Vec<TranscriptEvent>,
    /// Encoded audio exported at session stop, if any.
    pub audio_asset: Option<PathBuf>,
    pub metadata: serde_json::Value,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            start_time: Utc::now(),
            state: SessionState::Idle,
            transcript_events: Vec::new(),
            audio_asset: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Moves to `next`, rejecting illegal transitions.
    pub fn advance(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(VoxcapError::Other(format!(
                "illegal session transition {:?} -> {:?}",
                self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Session start as seconds since the Unix epoch.
    pub fn start_epoch_secs(&self) -> f64 {
        self.start_time.timestamp_micros() as f64 / 1_000_000.0
    }

    /// Accumulated transcript text, final events only, in event order.
    pub fn transcript_text(&self) -> String {
        self.transcript_events
            .iter()
            .filter(|event| event.is_final)
            .map(|event| event.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Status broadcast sent to the external UI layer on every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub session_id: String,
    pub state: SessionState,
}

/// Accumulates transcript events into a session while recording.
///
/// This is the "session accumulator" between the tier manager and the crash
/// store: it appends every transcript event and mirrors progress into the
/// store so a crash loses at most one auto-save interval.
pub struct SessionTracker {
    session: Arc<Mutex<Session>>,
    status_tx: Option<crossbeam_channel::Sender<SessionStatus>>,
    subscription: Option<Subscription>,
}

impl SessionTracker {
    pub fn new(session: Session) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            status_tx: None,
            subscription: None,
        }
    }

    /// Wires a non-blocking status channel to the UI layer.
    pub fn with_status_sender(mut self, tx: crossbeam_channel::Sender<SessionStatus>) -> Self {
        self.status_tx = Some(tx);
        self
    }

    /// Subscribes to the manager's transcript stream and, optionally, mirrors
    /// progress into a crash store.
    pub fn attach(&mut self, manager: &TierManager, store: Option<Arc<CrashRecoveryStore>>) {
        let session = self.session.clone();
        let subscription = manager.subscribe_transcripts(move |event| {
            let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
            session.transcript_events.push(event.clone());
            if let Some(store) = &store {
                let transcript = session.transcript_text();
                store.update(move |snapshot| snapshot.transcript = transcript);
            }
        });
        self.subscription = Some(subscription);
    }

    /// Detaches from the transcript stream.
    pub fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    /// Advances the session state and broadcasts the transition.
    pub fn advance(&self, next: SessionState) -> Result<()> {
        let status = {
            let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
            session.advance(next)?;
            SessionStatus {
                session_id: session.id.clone(),
                state: session.state,
            }
        };
        debug!("session {} -> {:?}", status.session_id, status.state);
        if let Some(tx) = &self.status_tx {
            // Non-blocking: a congested UI channel must not stall the core
            let _ = tx.try_send(status);
        }
        Ok(())
    }

    pub fn has_transcript(&self) -> bool {
        !self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .transcript_events
            .is_empty()
    }

    /// Clone of the current session.
    pub fn snapshot(&self) -> Session {
        self.session.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Appends recovered events after the fact (post-session recovery).
    pub fn append_events(&self, events: Vec<TranscriptEvent>) {
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        session.transcript_events.extend(events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TierId;

    fn event(text: &str, is_final: bool) -> TranscriptEvent {
        TranscriptEvent {
            text: text.to_string(),
            is_final,
            confidence: 1.0,
            timestamp: 1.0,
            tier: TierId::CloudStreaming,
        }
    }

    #[test]
    fn legal_transitions_walk_the_whole_lifecycle() {
        let mut session = Session::new("s-1");
        for next in [
            SessionState::Starting,
            SessionState::Recording,
            SessionState::Paused,
            SessionState::Recording,
            SessionState::Stopping,
            SessionState::Processing,
            SessionState::Complete,
        ] {
            session.advance(next).unwrap();
        }
        assert_eq!(session.state, SessionState::Complete);
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut session = Session::new("s-1");
        assert!(session.advance(SessionState::Recording).is_err());
        assert!(session.advance(SessionState::Complete).is_err());
        assert_eq!(session.state, SessionState::Idle);

        session.advance(SessionState::Starting).unwrap();
        session.advance(SessionState::Error).unwrap();
        // Error is terminal
        assert!(session.advance(SessionState::Starting).is_err());
    }

    #[test]
    fn transcript_text_joins_final_events_only() {
        let mut session = Session::new("s-1");
        session.transcript_events.push(event("hello", true));
        session.transcript_events.push(event("wor", false));
        session.transcript_events.push(event("world", true));

        assert_eq!(session.transcript_text(), "hello world");
    }

    #[test]
    fn tracker_broadcasts_transitions_non_blocking() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let tracker = SessionTracker::new(Session::new("s-2")).with_status_sender(tx);

        tracker.advance(SessionState::Starting).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionStatus {
                session_id: "s-2".to_string(),
                state: SessionState::Starting,
            }
        );

        // Channel full: transition still succeeds
        tracker.advance(SessionState::Recording).unwrap();
        tracker.advance(SessionState::Stopping).unwrap();
        assert_eq!(tracker.snapshot().state, SessionState::Stopping);
    }

    #[test]
    fn tracker_appends_recovered_events() {
        let tracker = SessionTracker::new(Session::new("s-3"));
        assert!(!tracker.has_transcript());

        tracker.append_events(vec![event("recovered", true)]);
        assert!(tracker.has_transcript());
        assert_eq!(tracker.snapshot().transcript_events.len(), 1);
    }
}
