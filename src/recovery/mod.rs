//! Post-session recovery: cloud batch transcription of the encoded asset,
//! then local windowed transcription of raw PCM.

pub mod cloud;
pub mod orchestrator;

pub use cloud::{CloudTranscriber, HttpCloudTranscriber, RemoteSegment};
pub use orchestrator::{RecoveryConfig, RecoveryInput, RecoveryOrchestrator};
