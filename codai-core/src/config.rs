//! Layered configuration for a codai session
//!
//! Defaults, then `codai.toml` in the project root (or an explicit file), then
//! command line overrides applied by the caller. Every section is optional in
//! the file; missing keys keep their defaults.

use crate::cache::{FingerprintPolicy, DEFAULT_MAX_BYTES};
use crate::context::DEFAULT_BUDGET_BYTES;
use crate::ignore::{RuleSet, DEFAULT_EXCLUDES, GITIGNORE};
use codai_utils::logging::{LogLevel, LoggerConfig};
use codai_utils::ConfigBuilder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File looked up in the project root when no config path is given
pub const CONFIG_FILE_NAME: &str = "codai.toml";

/// Exclusion settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreSection {
    /// Extra glob patterns to exclude
    pub patterns: Vec<String>,
    /// Built-in excludes; replace to opt out of any of them
    pub default_excludes: Vec<String>,
    /// Merge the root `.gitignore` into the rules and apply each
    /// subdirectory's `.gitignore` to its own subtree
    pub respect_gitignore: bool,
    /// Comma or newline separated list of extra excludes, relative to the root
    pub exclude_file: Option<PathBuf>,
}

impl Default for IgnoreSection {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            default_excludes: DEFAULT_EXCLUDES.iter().map(|s| (*s).to_string()).collect(),
            respect_gitignore: true,
            exclude_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_bytes: u64,
    pub fingerprint: FingerprintPolicy,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            fingerprint: FingerprintPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    pub budget_bytes: u64,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_BUDGET_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: LogLevel,
    /// Session log file, relative paths resolved against the project root
    pub file: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            file: None,
        }
    }
}

/// Complete session configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodaiConfig {
    pub ignore: IgnoreSection,
    pub cache: CacheSection,
    pub context: ContextSection,
    pub logging: LoggingSection,
}

impl CodaiConfig {
    /// Load configuration for the project at `root`.
    ///
    /// An explicit path must exist; otherwise `codai.toml` in the root is
    /// used when present.
    pub fn load(root: &Path, explicit: Option<&Path>) -> crate::Result<Self> {
        let builder = ConfigBuilder::<Self>::new();
        let builder = match explicit {
            Some(path) => {
                debug!(path = %path.display(), "loading configuration");
                builder.load_file(path)?
            }
            None => builder.load_file_if_exists(&root.join(CONFIG_FILE_NAME))?,
        };

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no session can work with
    pub fn validate(&self) -> crate::Result<()> {
        if self.cache.max_bytes == 0 {
            return Err(crate::Error::Config(
                "cache.max_bytes must be greater than zero".to_string(),
            ));
        }
        if self.context.budget_bytes == 0 {
            return Err(crate::Error::Config(
                "context.budget_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Compile the ignore section into rules for the project at `root`
    pub fn rule_set(&self, root: &Path) -> crate::Result<RuleSet> {
        let mut builder = RuleSet::builder()
            .default_excludes(self.ignore.default_excludes.iter().cloned())
            .patterns(self.ignore.patterns.iter().cloned())
            .nested_gitignore(self.ignore.respect_gitignore);

        if self.ignore.respect_gitignore {
            builder = builder.gitignore_file(&root.join(GITIGNORE))?;
        }
        if let Some(exclude_file) = &self.ignore.exclude_file {
            builder = builder.exclude_file(&resolve(root, exclude_file))?;
        }

        builder.build()
    }

    /// Logger settings for this session
    pub fn logger_config(&self, root: &Path) -> LoggerConfig {
        LoggerConfig {
            level: self.logging.level,
            log_file: self.logging.file.as_deref().map(|file| resolve(root, file)),
            ..LoggerConfig::default()
        }
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
