//! Per-turn context assembly under a byte budget
//!
//! Files are taken in the caller's order. A file that would push the window
//! past its budget is skipped whole, never truncated, and assembly carries on
//! with the next path so smaller files later in the list can still fit.

use crate::cache::{ContentCache, ReadOutcome};
use codai_utils::file::{decode_text, display_path};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default context budget in bytes
pub const DEFAULT_BUDGET_BYTES: u64 = 200_000;

/// Rough bytes-per-token ratio for source text
const BYTES_PER_TOKEN: u64 = 4;

/// One file included in a context window
#[derive(Debug, Clone)]
pub struct ContextFile {
    pub path: PathBuf,
    pub content: Arc<[u8]>,
    pub outcome: ReadOutcome,
}

/// A path that could not be read while assembling
#[derive(Debug, Clone, Serialize)]
pub struct FailedRead {
    pub path: PathBuf,
    pub reason: String,
}

/// The files selected for one conversation turn
#[derive(Debug, Clone, Default)]
pub struct ContextWindow {
    pub files: Vec<ContextFile>,
    /// Sum of included content lengths, never above `budget_bytes`
    pub total_size: u64,
    pub budget_bytes: u64,
    /// Paths left out because they did not fit
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<FailedRead>,
}

impl ContextWindow {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|file| file.path.as_path())
    }

    pub fn approx_tokens(&self) -> u64 {
        self.total_size.div_ceil(BYTES_PER_TOKEN)
    }

    /// Text block handed to the AI backend, one delimited section per file
    pub fn render(&self) -> String {
        let mut out = String::new();
        for file in &self.files {
            let _ = writeln!(out, "<file path=\"{}\">", display_path(&file.path));
            out.push_str(&decode_text(&file.content));
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("</file>\n");
        }
        out
    }
}

/// Builds [`ContextWindow`]s from a shared cache
#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler<'a> {
    cache: &'a ContentCache,
}

impl<'a> ContextAssembler<'a> {
    pub const fn new(cache: &'a ContentCache) -> Self {
        Self { cache }
    }

    /// Select files from `paths`, in order, while the total stays within
    /// `budget_bytes`. Repeated paths are included once.
    pub fn build_context<I, P>(&self, paths: I, budget_bytes: u64) -> ContextWindow
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut window = ContextWindow {
            budget_bytes,
            ..ContextWindow::default()
        };
        let mut seen = HashSet::new();

        for path in paths {
            let key = self.cache.key_for(path.as_ref());
            if !seen.insert(key.clone()) {
                continue;
            }

            let read = match self.cache.read(&key) {
                Ok(read) => read,
                Err(err) => {
                    warn!(path = %key.display(), error = %err, "leaving unreadable file out of context");
                    window.failed.push(FailedRead {
                        path: key,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let size = read.content.len() as u64;
            if window.total_size + size > budget_bytes {
                debug!(path = %key.display(), size, "skipping file over context budget");
                window.skipped.push(key);
                continue;
            }

            window.total_size += size;
            window.files.push(ContextFile {
                path: read.path,
                content: read.content,
                outcome: read.outcome,
            });
        }

        debug!(
            included = window.files.len(),
            skipped = window.skipped.len(),
            failed = window.failed.len(),
            total = window.total_size,
            "context assembled"
        );
        window
    }
}

/// Free-function form of [`ContextAssembler::build_context`]
pub fn build_context<I, P>(cache: &ContentCache, paths: I, budget_bytes: u64) -> ContextWindow
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    ContextAssembler::new(cache).build_context(paths, budget_bytes)
}
