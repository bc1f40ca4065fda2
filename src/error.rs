//! Error types for the looper.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LooperError {
    /// Audio device missing, unsupported config or disconnected.
    #[error("Audio device error: {0}")]
    Device(String),

    /// Commit attempted on a take with no captured frames.
    #[error("Take is empty, nothing to commit")]
    EmptyTake,

    #[error("Failed to persist take to {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    #[error("Shutdown step failed: {0}")]
    Shutdown(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Button input unavailable: {0}")]
    Button(String),
}

impl LooperError {
    /// Startup failures that map to the "no hardware" exit status.
    pub fn is_hardware(&self) -> bool {
        matches!(self, Self::Device(_) | Self::Button(_))
    }
}

impl From<cpal::BuildStreamError> for LooperError {
    fn from(e: cpal::BuildStreamError) -> Self {
        Self::Device(e.to_string())
    }
}

impl From<cpal::PlayStreamError> for LooperError {
    fn from(e: cpal::PlayStreamError) -> Self {
        Self::Device(e.to_string())
    }
}

impl From<cpal::DevicesError> for LooperError {
    fn from(e: cpal::DevicesError) -> Self {
        Self::Device(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LooperError>;
