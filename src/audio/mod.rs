//! Audio-side building blocks: voice activity detection, WAV encoding, and
//! the rotating recovery buffer.

pub mod recovery;
pub mod vad;
pub mod wav;

pub use recovery::{AudioRecoveryBuffer, RecoveryBufferConfig};
pub use vad::{Vad, VadConfig, VadEvent, VadState, calculate_rms};
pub use wav::{ExportInfo, WavFormat, decode_wav, encode_wav, write_wav};
