//! Windowed batch transcription over buffered PCM.
//!
//! Accumulates raw samples and cuts fixed-size windows for the local model.
//! Batch results are always final (no interim results); timestamps are
//! derived from the sample offset relative to session start.

use crate::audio::vad::calculate_rms;
use crate::defaults;
use crate::error::Result;
use crate::stt::transcriber::Transcriber;
use crate::types::{TierId, TranscriptEvent};
use std::sync::Arc;

/// One window of samples ready for transcription.
#[derive(Debug, Clone)]
pub struct PendingWindow {
    pub samples: Vec<f32>,
    /// Offset of the window's first sample from session start, in seconds.
    pub offset_secs: f64,
}

/// Accumulates PCM and transcribes it in fixed windows.
pub struct BatchTranscriber {
    transcriber: Arc<dyn Transcriber>,
    window_samples: usize,
    sample_rate: u32,
    /// Session start, seconds since the Unix epoch.
    session_start: f64,
    tier: TierId,
    buffer: Vec<f32>,
    /// Samples already drained out of the buffer since session start.
    buffer_offset: u64,
}

impl BatchTranscriber {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        window_secs: u32,
        sample_rate: u32,
        session_start: f64,
        tier: TierId,
    ) -> Self {
        Self {
            transcriber,
            window_samples: (window_secs * sample_rate) as usize,
            sample_rate,
            session_start,
            tier,
            buffer: Vec::new(),
            buffer_offset: 0,
        }
    }

    /// Appends raw samples to the accumulation buffer.
    pub fn push(&mut self, samples: &[f32]) {
        self.buffer.extend_from_slice(samples);
    }

    /// True once a full window has accumulated.
    pub fn window_ready(&self) -> bool {
        self.buffer.len() >= self.window_samples
    }

    /// Seconds of audio currently buffered.
    pub fn buffered_secs(&self) -> f64 {
        self.buffer.len() as f64 / self.sample_rate as f64
    }

    /// Cuts the next window off the front of the buffer.
    ///
    /// Returns a full window when one has accumulated. With `flush` set, a
    /// shorter remainder is also returned (used on pause boundaries and at
    /// session stop); otherwise partial buffers stay put.
    pub fn take_window(&mut self, flush: bool) -> Option<PendingWindow> {
        let take = if self.buffer.len() >= self.window_samples {
            self.window_samples
        } else if flush && !self.buffer.is_empty() {
            self.buffer.len()
        } else {
            return None;
        };

        let samples: Vec<f32> = self.buffer.drain(..take).collect();
        let offset_secs = self.buffer_offset as f64 / self.sample_rate as f64;
        self.buffer_offset += take as u64;

        Some(PendingWindow {
            samples,
            offset_secs,
        })
    }

    /// Runs the model over one window.
    ///
    /// Returns `None` for windows below the energy floor (not worth waking
    /// the model for) and for empty transcriptions. Blocking: callers on an
    /// async path should wrap this in `spawn_blocking`.
    pub fn transcribe_window(&self, window: &PendingWindow) -> Result<Option<TranscriptEvent>> {
        transcribe_window(
            &self.transcriber,
            window,
            self.session_start,
            self.tier,
        )
    }

    /// The wrapped transcriber, for handing windows to `spawn_blocking`.
    pub fn transcriber(&self) -> Arc<dyn Transcriber> {
        self.transcriber.clone()
    }

    /// Session start this batch rebases timestamps onto, in epoch seconds.
    pub fn session_start(&self) -> f64 {
        self.session_start
    }

    /// The tier stamped onto emitted events.
    pub fn tier(&self) -> TierId {
        self.tier
    }
}

/// Runs the model over one window, free of any `&self` borrow so callers can
/// move the pieces into `spawn_blocking`.
pub fn transcribe_window(
    transcriber: &Arc<dyn Transcriber>,
    window: &PendingWindow,
    session_start: f64,
    tier: TierId,
) -> Result<Option<TranscriptEvent>> {
    if calculate_rms(&window.samples) < defaults::MIN_ENERGY_FOR_TRANSCRIPTION {
        return Ok(None);
    }

    let result = transcriber.transcribe(&window.samples)?;
    if result.text.is_empty() {
        return Ok(None);
    }

    Ok(Some(TranscriptEvent {
        text: result.text,
        is_final: true,
        confidence: result.confidence,
        timestamp: session_start + window.offset_secs,
        tier,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stt::transcriber::MockTranscriber;

    fn make_batch(window_secs: u32) -> (BatchTranscriber, Arc<MockTranscriber>) {
        let mock = Arc::new(MockTranscriber::new("mock").with_response("hello world"));
        let batch = BatchTranscriber::new(
            mock.clone(),
            window_secs,
            16000,
            1_000_000.0,
            TierId::LocalBatch,
        );
        (batch, mock)
    }

    #[test]
    fn window_not_ready_until_enough_samples() {
        let (mut batch, _) = make_batch(2);

        batch.push(&vec![0.1; 16000]); // 1s of a 2s window
        assert!(!batch.window_ready());
        assert!(batch.take_window(false).is_none());

        batch.push(&vec![0.1; 16000]);
        assert!(batch.window_ready());
        let window = batch.take_window(false).unwrap();
        assert_eq!(window.samples.len(), 32000);
        assert_eq!(window.offset_secs, 0.0);
    }

    #[test]
    fn flush_returns_partial_window() {
        let (mut batch, _) = make_batch(2);

        batch.push(&vec![0.1; 8000]); // 0.5s
        let window = batch.take_window(true).unwrap();
        assert_eq!(window.samples.len(), 8000);

        // Buffer drained; nothing left even with flush
        assert!(batch.take_window(true).is_none());
    }

    #[test]
    fn consecutive_windows_have_increasing_offsets() {
        let (mut batch, _) = make_batch(1);

        batch.push(&vec![0.1; 16000 * 3]);

        let w0 = batch.take_window(false).unwrap();
        let w1 = batch.take_window(false).unwrap();
        let w2 = batch.take_window(false).unwrap();

        assert_eq!(w0.offset_secs, 0.0);
        assert_eq!(w1.offset_secs, 1.0);
        assert_eq!(w2.offset_secs, 2.0);
    }

    #[test]
    fn transcribe_window_emits_final_event_with_rebased_timestamp() {
        let (mut batch, _) = make_batch(1);
        batch.push(&vec![0.1; 16000 * 2]);

        batch.take_window(false).unwrap();
        let window = batch.take_window(false).unwrap();

        let event = batch.transcribe_window(&window).unwrap().unwrap();
        assert_eq!(event.text, "hello world");
        assert!(event.is_final);
        assert_eq!(event.timestamp, 1_000_001.0);
        assert_eq!(event.tier, TierId::LocalBatch);
    }

    #[test]
    fn silent_window_skips_the_model() {
        let (mut batch, mock) = make_batch(1);
        batch.push(&vec![0.0; 16000]);

        let window = batch.take_window(false).unwrap();
        let event = batch.transcribe_window(&window).unwrap();

        assert!(event.is_none());
        assert!(mock.call_sample_counts().is_empty());
    }

    #[test]
    fn empty_transcription_yields_no_event() {
        let mock = Arc::new(MockTranscriber::new("mock").with_response(""));
        let mut batch =
            BatchTranscriber::new(mock, 1, 16000, 0.0, TierId::LocalBatch);

        batch.push(&vec![0.1; 16000]);
        let window = batch.take_window(false).unwrap();

        assert!(batch.transcribe_window(&window).unwrap().is_none());
    }

    #[test]
    fn transcriber_failure_propagates() {
        let mock = Arc::new(MockTranscriber::new("mock").with_failure());
        let mut batch =
            BatchTranscriber::new(mock, 1, 16000, 0.0, TierId::LocalBatch);

        batch.push(&vec![0.1; 16000]);
        let window = batch.take_window(false).unwrap();

        assert!(batch.transcribe_window(&window).is_err());
    }
}
