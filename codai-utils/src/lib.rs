//! Codai Utilities
//!
//! Small building blocks shared by the codai crates: path normalisation,
//! tolerant text decoding, layered configuration loading and logging setup.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod file;
pub mod logging;

pub use config::ConfigBuilder;
pub use file::{decode_text, display_path, normalize_path, relative_to, safe_path_join};

/// Result type used throughout codai utilities
pub type Result<T> = std::result::Result<T, UtilError>;

/// Error types for utility operations
#[derive(Debug, thiserror::Error)]
pub enum UtilError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Path operation error
    #[error("Path operation error: {0}")]
    PathOperation(String),
}
