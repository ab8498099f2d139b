//! Local model catalog and environment checks.
//!
//! Availability of the local tier depends on environment truth that is
//! recomputed on demand: is the model file present and intact, and does the
//! machine have enough free memory to load it without thrashing.

use crate::error::{Result, VoxcapError};
use std::path::{Path, PathBuf};
use sysinfo::System;

/// A known local model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: &'static str,
    pub file_name: &'static str,
    /// Exact file size; a mismatch means a torn or corrupt download.
    pub size_bytes: u64,
    /// Free memory needed to run inference without thrashing.
    pub min_memory_mb: u64,
}

/// Models this crate knows how to run, smallest first.
pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "tiny",
        file_name: "ggml-tiny.bin",
        size_bytes: 77_691_713,
        min_memory_mb: 512,
    },
    ModelInfo {
        name: "base",
        file_name: "ggml-base.bin",
        size_bytes: 147_951_465,
        min_memory_mb: 1024,
    },
    ModelInfo {
        name: "small",
        file_name: "ggml-small.bin",
        size_bytes: 487_601_967,
        min_memory_mb: 2048,
    },
];

/// Default local model for batch transcription.
pub const DEFAULT_MODEL: &str = "base";

/// Looks up a model by name.
pub fn get_model(name: &str) -> Option<&'static ModelInfo> {
    MODELS.iter().find(|m| m.name == name)
}

/// Directory where model files are stored.
///
/// Returns ~/.local/share/voxcap/models on Linux.
pub fn models_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("voxcap")
        .join("models")
}

/// Path a model file would live at.
pub fn model_path(dir: &Path, info: &ModelInfo) -> PathBuf {
    dir.join(info.file_name)
}

/// Checks that a model file is present and the expected size.
///
/// A size mismatch is corruption (torn download) and is reported, not
/// retried; the tier simply shows as unavailable until the file is replaced.
pub fn verify_model(dir: &Path, info: &ModelInfo) -> Result<()> {
    let path = model_path(dir, info);
    let metadata = match std::fs::metadata(&path) {
        Ok(metadata) => metadata,
        Err(_) => {
            return Err(VoxcapError::ModelNotFound {
                path: path.to_string_lossy().to_string(),
            });
        }
    };

    if metadata.len() != info.size_bytes {
        return Err(VoxcapError::Corruption {
            message: format!(
                "model {} size mismatch: expected {} bytes, found {}",
                info.name,
                info.size_bytes,
                metadata.len()
            ),
        });
    }

    Ok(())
}

/// Free memory on this machine, in megabytes.
pub fn available_memory_mb() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.available_memory() / (1024 * 1024)
}

/// Returns a reason string when free memory is below `min_memory_mb`.
///
/// `None` means the gate passes.
pub fn memory_gate(min_memory_mb: u64) -> Option<String> {
    let available = available_memory_mb();
    if available < min_memory_mb {
        Some(format!(
            "insufficient memory: {} MB free, {} MB required",
            available, min_memory_mb
        ))
    } else {
        None
    }
}
