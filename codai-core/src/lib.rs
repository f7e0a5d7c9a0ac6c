//! Codai Core - Project Context Cache
//!
//! This crate decides which project files reach the AI backend and how
//! cheaply they get there:
//! - Ignore rules and a deterministic, lazy tree walker
//! - A fingerprinted content cache with LRU eviction and hit/miss metrics
//! - Budgeted context assembly for each conversation turn
//! - Project study reports built from file metadata alone

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions, // Often necessary for clarity
    clippy::missing_errors_doc,
)]

pub mod cache;
pub mod config;
pub mod context;
pub mod ignore;
pub mod metrics;
pub mod session;
pub mod study;
pub mod walker;

pub use cache::{CacheEntryInfo, CacheRead, ContentCache, Fingerprint, FingerprintPolicy, ReadOutcome};
pub use config::CodaiConfig;
pub use context::{ContextAssembler, ContextWindow};
pub use ignore::RuleSet;
pub use metrics::{CacheEvent, CacheMetrics, MetricsRecorder};
pub use session::Session;
pub use study::{JsonReportSink, ReportSink, StudyReport, YamlReportSink};
pub use walker::{FileDescriptor, TreeWalk, WalkItem, Walker};

use std::path::PathBuf;

/// Result type used throughout codai core
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for context cache operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A root or target path does not exist
    #[error("Path not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A directory was expected
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// A path exists but cannot be read
    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// Reading a file for the cache failed; the cache was left unchanged
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An ignore pattern could not be compiled
    #[error("Invalid ignore pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Utility error
    #[error("Utility error: {0}")]
    Util(#[from] codai_utils::UtilError),
}

impl Error {
    /// Classify an I/O failure on `path` into the domain taxonomy
    pub(crate) fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.into()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.into()),
            _ => Self::Io(err),
        }
    }
}
