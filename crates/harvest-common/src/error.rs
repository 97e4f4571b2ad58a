//! Error types for Harvest

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Main error type for Harvest
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Environment file error: {0}")]
    EnvFile(#[from] dotenvy::Error),

    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {name}: {value:?}")]
    InvalidVar { name: String, value: String },

    #[error("Required input does not exist: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl HarvestError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error should stop a run before any work is dispatched.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            HarvestError::MissingVar(_)
                | HarvestError::InvalidVar { .. }
                | HarvestError::MissingInput(_)
                | HarvestError::EnvFile(_)
                | HarvestError::Config(_)
        )
    }
}
