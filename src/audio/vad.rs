//! Voice Activity Detection (VAD) module.
//!
//! Detects speech activity in audio streams using RMS-based thresholding
//! and state machine logic to handle silence intervals.

use crate::clock::{Clock, SystemClock};
use crate::defaults;
use std::time::Instant;

/// Configuration for Voice Activity Detection.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// RMS threshold for detecting speech (0.0 to 1.0).
    pub speech_threshold: f32,
    /// Duration of contiguous silence before speech is considered ended (milliseconds).
    pub silence_duration_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: defaults::VAD_THRESHOLD,
            silence_duration_ms: defaults::SILENCE_DURATION_MS,
        }
    }
}

/// Current state of voice activity detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// No speech detected.
    Idle,
    /// Speech is being detected.
    Speaking,
    /// Silence detected, waiting to confirm speech end.
    MaybeSilence,
}

/// Events emitted by the VAD processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Speech has started. Emitted immediately on the silence→voice edge.
    SpeechStart,
    /// Ongoing speech detected.
    Speech,
    /// No speech in this frame.
    Silence,
    /// Speech has ended: silence lasted past the hysteresis window.
    SpeechEnd,
}

/// Voice Activity Detector state machine.
///
/// The voice→silence edge is debounced: a pause is only confirmed after
/// `silence_duration_ms` of contiguous silence, so micro-gaps between words
/// do not chatter. After a confirmed pause the detector returns to idle and
/// the next voiced frame starts a fresh utterance.
pub struct Vad<C: Clock = SystemClock> {
    config: VadConfig,
    state: VadState,
    silence_start: Option<Instant>,
    clock: C,
}

impl<C: Clock> Vad<C> {
    /// Creates a new VAD instance with the given configuration and clock.
    pub fn with_clock(config: VadConfig, clock: C) -> Self {
        Self {
            config,
            state: VadState::Idle,
            silence_start: None,
            clock,
        }
    }

    /// Processes one frame of mono float32 samples and returns the VAD event.
    pub fn process(&mut self, samples: &[f32]) -> VadEvent {
        let rms = calculate_rms(samples);
        let is_speech = rms > self.config.speech_threshold;
        let now = self.clock.now();

        match self.state {
            VadState::Idle => {
                if is_speech {
                    self.state = VadState::Speaking;
                    self.silence_start = None;
                    VadEvent::SpeechStart
                } else {
                    VadEvent::Silence
                }
            }
            VadState::Speaking => {
                if is_speech {
                    VadEvent::Speech
                } else {
                    self.state = VadState::MaybeSilence;
                    self.silence_start = Some(now);
                    VadEvent::Silence
                }
            }
            VadState::MaybeSilence => {
                if is_speech {
                    self.state = VadState::Speaking;
                    self.silence_start = None;
                    VadEvent::Speech
                } else {
                    let silence_elapsed = self
                        .silence_start
                        .map(|start| now.duration_since(start).as_millis() as u32)
                        .unwrap_or(0);

                    if silence_elapsed >= self.config.silence_duration_ms {
                        self.state = VadState::Idle;
                        self.silence_start = None;
                        VadEvent::SpeechEnd
                    } else {
                        VadEvent::Silence
                    }
                }
            }
        }
    }

    /// Returns the current VAD state.
    pub fn state(&self) -> VadState {
        self.state
    }

    /// Resets the VAD to idle state.
    pub fn reset(&mut self) {
        self.state = VadState::Idle;
        self.silence_start = None;
    }
}

impl Vad<SystemClock> {
    /// Creates a new VAD instance with the given configuration using the system clock.
    pub fn new(config: VadConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

/// Calculates the Root Mean Square (RMS) of float32 audio samples.
///
/// Samples are expected in [-1.0, 1.0]; the result lands in the same range,
/// where 0.0 is silence and ~0.707 is a full-scale sine wave.
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let s = sample as f64;
            s * s
        })
        .sum();

    let mean_square = sum_squares / samples.len() as f64;
    mean_square.sqrt() as f32
}
