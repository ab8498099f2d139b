//! Default configuration constants for voxcap.
//!
//! This module provides shared constants used across different configuration types
//! to ensure consistency and eliminate duplication.

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard for speech recognition and provides a good balance
/// between quality and computational efficiency for voice applications.
pub const SAMPLE_RATE: u32 = 16000;

/// Default audio frame duration in milliseconds.
///
/// Frames arrive from the capture layer at a steady ~100ms cadence.
pub const FRAME_DURATION_MS: u32 = 100;

/// Default Voice Activity Detection (VAD) threshold.
///
/// This RMS-based threshold (0.0 to 1.0) determines when audio is considered speech.
/// A value of 0.02 is tuned for typical microphone input levels.
pub const VAD_THRESHOLD: f32 = 0.02;

/// Default silence duration in milliseconds before a pause event is emitted.
///
/// 300ms of contiguous silence confirms an utterance boundary without
/// chattering on the micro-gaps between words.
pub const SILENCE_DURATION_MS: u32 = 300;

/// Capacity of the live-send ring buffer, in chunks.
///
/// At ~100ms per chunk this holds roughly 10 seconds of audio while the
/// streaming connection is down. Oldest chunks are dropped on overflow;
/// recency is preferred over completeness for live captions.
pub const LIVE_BUFFER_CAPACITY: usize = 100;

/// Base delay for streaming reconnect backoff, in milliseconds.
pub const RECONNECT_BASE_DELAY_MS: u64 = 500;

/// Multiplier applied to the reconnect delay per attempt.
pub const RECONNECT_MULTIPLIER: f64 = 2.0;

/// Cap on the reconnect delay, in milliseconds.
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Jitter fraction applied to each reconnect delay (±30%).
pub const RECONNECT_JITTER: f64 = 0.3;

/// Reconnect attempts before the streaming tier reports a fatal failure.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Keepalive interval while the streaming connection is open, in seconds.
pub const KEEPALIVE_INTERVAL_SECS: u64 = 10;

/// Consecutive tier failovers tolerated before jumping straight to timer-only.
pub const MAX_TIER_FAILURES: u32 = 3;

/// Interval between rotation-buffer writes to disk, in seconds (5 minutes).
pub const ROTATION_INTERVAL_SECS: u64 = 300;

/// Rotation files retained on disk (plus the one currently being written).
pub const ROTATION_RETAIN: usize = 2;

/// Interval between crash-recovery snapshot writes, in seconds.
pub const AUTOSAVE_INTERVAL_SECS: u64 = 5;

/// Window size for local batch transcription, in seconds.
pub const BATCH_WINDOW_SECS: u32 = 30;

/// Longest session local batch recovery will attempt, in seconds (8 minutes).
pub const RECOVERY_MAX_SESSION_SECS: u64 = 480;

/// Retry ceiling for cloud batch recovery.
pub const RECOVERY_CLOUD_RETRIES: u32 = 2;

/// Retry ceiling for local batch recovery.
pub const RECOVERY_LOCAL_RETRIES: u32 = 3;

/// Minimum RMS energy for a batch window to be worth transcribing.
///
/// Windows below this are silence/ambient noise — skip the model entirely.
/// The VAD speech threshold is 0.02; this is set 20× lower to only reject
/// truly silent windows while allowing anything borderline.
pub const MIN_ENERGY_FOR_TRANSCRIPTION: f32 = 0.001;

/// Pause interval for the timer-only tier, in seconds.
///
/// With no backend and no VAD-derived boundaries the timer-only tier still
/// emits a pause on this cadence so downstream segmentation stays alive.
pub const TIMER_TIER_INTERVAL_SECS: u64 = 30;

/// Timestamps below this many seconds are treated as session-relative.
///
/// One day's worth of seconds. Values under it are rebased onto the session
/// start; larger values are assumed to already be absolute epoch seconds.
/// A heuristic: a session legitimately longer than a day would misclassify.
pub const RELATIVE_TIMESTAMP_CUTOFF_SECS: f64 = 86_400.0;

/// Entries kept in the crash-log ring before the oldest is dropped.
pub const CRASH_LOG_CAPACITY: usize = 50;
