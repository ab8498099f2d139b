use crate::defaults;
use crate::types::TierPreference;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub tier: TierConfig,
    pub stream: StreamConfig,
    pub batch: BatchConfig,
    pub rotation: RotationConfig,
    pub snapshot: SnapshotConfig,
}

/// Audio / voice-activity configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub vad_threshold: f32,
    pub silence_duration_ms: u32,
}

/// Tier selection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TierConfig {
    pub preference: TierPreference,
    pub max_failures: u32,
}

/// Streaming client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    pub buffer_capacity: usize,
    pub keepalive_interval_secs: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_multiplier: f64,
    pub reconnect_max_delay_ms: u64,
    pub reconnect_max_attempts: u32,
}

/// Local batch transcription configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    pub window_secs: u32,
    pub recovery_max_session_secs: u64,
}

/// Rotation buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RotationConfig {
    /// Directory for rotation files. None means the platform data dir.
    pub dir: Option<PathBuf>,
    pub interval_secs: u64,
    pub retain: usize,
}

/// Crash-recovery snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Directory for snapshot and crash-log files. None means the platform data dir.
    pub dir: Option<PathBuf>,
    pub interval_secs: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            vad_threshold: defaults::VAD_THRESHOLD,
            silence_duration_ms: defaults::SILENCE_DURATION_MS,
        }
    }
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            preference: TierPreference::Auto,
            max_failures: defaults::MAX_TIER_FAILURES,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: defaults::LIVE_BUFFER_CAPACITY,
            keepalive_interval_secs: defaults::KEEPALIVE_INTERVAL_SECS,
            reconnect_base_delay_ms: defaults::RECONNECT_BASE_DELAY_MS,
            reconnect_multiplier: defaults::RECONNECT_MULTIPLIER,
            reconnect_max_delay_ms: defaults::RECONNECT_MAX_DELAY_MS,
            reconnect_max_attempts: defaults::RECONNECT_MAX_ATTEMPTS,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            window_secs: defaults::BATCH_WINDOW_SECS,
            recovery_max_session_secs: defaults::RECOVERY_MAX_SESSION_SECS,
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            dir: None,
            interval_secs: defaults::ROTATION_INTERVAL_SECS,
            retain: defaults::ROTATION_RETAIN,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: None,
            interval_secs: defaults::AUTOSAVE_INTERVAL_SECS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Ok(Self::default())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxcap/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("voxcap").join("config.toml"))
    }

    /// Resolved rotation directory: configured value or the platform data dir.
    pub fn rotation_dir(&self) -> PathBuf {
        self.rotation
            .dir
            .clone()
            .unwrap_or_else(|| data_dir().join("rotation"))
    }

    /// Resolved snapshot directory: configured value or the platform data dir.
    pub fn snapshot_dir(&self) -> PathBuf {
        self.snapshot
            .dir
            .clone()
            .unwrap_or_else(|| data_dir().join("sessions"))
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("voxcap")
}
