//! Speech-to-text: the local transcriber seam, model catalog, and windowed
//! batch transcription.

pub mod batch;
pub mod models;
pub mod transcriber;
pub mod whisper;

pub use batch::{BatchTranscriber, PendingWindow};
pub use models::{ModelInfo, available_memory_mb, get_model, memory_gate, verify_model};
pub use transcriber::{MockTranscriber, Transcriber, TranscriptionResult};
pub use whisper::{WhisperConfig, WhisperTranscriber};
