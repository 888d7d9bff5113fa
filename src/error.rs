/// Error type shared by the registry and the launcher
use std::path::PathBuf;
use thiserror::Error;

/// Custom error types for nospawn
#[derive(Error, Debug)]
pub enum NospawnError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Preload library not found: {}", .0.display())]
    ShimNotFound(PathBuf),

    #[error("Unknown blocked operation: {0}")]
    UnknownOperation(String),
}

/// Result type alias for nospawn operations
pub type Result<T> = std::result::Result<T, NospawnError>;
