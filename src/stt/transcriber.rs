use crate::error::{Result, VoxcapError};
use std::sync::{Arc, Mutex};

/// Result of transcribing one stretch of audio.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    pub text: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
}

impl TranscriptionResult {
    pub fn from_text(text: String) -> Self {
        Self {
            text,
            confidence: 1.0,
        }
    }
}

/// Trait for local speech-to-text transcription.
///
/// This trait allows swapping implementations (real model vs mock).
pub trait Transcriber: Send + Sync {
    /// Transcribe audio samples to text.
    ///
    /// # Arguments
    /// * `audio` - Mono float32 PCM at 16kHz, samples in [-1, 1]
    fn transcribe(&self, audio: &[f32]) -> Result<TranscriptionResult>;

    /// Get the name of the loaded model
    fn model_name(&self) -> &str;

    /// Check if the transcriber is ready
    fn is_ready(&self) -> bool;
}

/// Implement Transcriber for Arc<T> to allow sharing across sessions.
impl<T: Transcriber + ?Sized> Transcriber for Arc<T> {
    fn transcribe(&self, audio: &[f32]) -> Result<TranscriptionResult> {
        (**self).transcribe(audio)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

/// Mock transcriber for testing
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    model_name: String,
    response: String,
    should_fail: bool,
    /// Sample counts of every transcribe call, for asserting windowing.
    calls: Arc<Mutex<Vec<usize>>>,
}

impl MockTranscriber {
    /// Create a new mock transcriber with default settings
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            response: "mock transcription".to_string(),
            should_fail: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Configure the mock to return a specific response
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the mock to fail on transcribe
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Sample counts seen by `transcribe`, in call order.
    pub fn call_sample_counts(&self) -> Vec<usize> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&self, audio: &[f32]) -> Result<TranscriptionResult> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(audio.len());

        if self.should_fail {
            Err(VoxcapError::Transcription {
                message: "mock transcription failure".to_string(),
            })
        } else {
            Ok(TranscriptionResult::from_text(self.response.clone()))
        }
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        !self.should_fail
    }
}
