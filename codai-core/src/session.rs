//! One project session: the root, its rules and the shared content cache
//!
//! Commands take a `&Session` instead of reaching for process-wide state.

use crate::cache::{CacheEntryInfo, CacheRead, ContentCache};
use crate::config::CodaiConfig;
use crate::context::{ContextAssembler, ContextWindow, FailedRead};
use crate::ignore::{parse_exclude_list, RuleSet};
use crate::metrics::CacheMetrics;
use crate::study::{self, StudyReport};
use crate::walker::{DirectoryListing, Walker};
use codai_utils::file::{normalize_path, safe_path_join};
use codai_utils::UtilError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Files pulled into the cache by [`Session::read_folder`]
#[derive(Debug, Default)]
pub struct FolderRead {
    pub files: Vec<CacheRead>,
    pub failed: Vec<FailedRead>,
}

#[derive(Debug, Clone)]
pub struct Session {
    root: PathBuf,
    config: CodaiConfig,
    rules: RuleSet,
    cache: Arc<ContentCache>,
}

impl Session {
    /// Open a session on the directory `root`
    pub fn open(root: &Path, config: CodaiConfig) -> crate::Result<Self> {
        config.validate()?;
        let root = root
            .canonicalize()
            .map_err(|err| crate::Error::from_io(root, err))?;
        if !root.is_dir() {
            return Err(crate::Error::NotADirectory(root));
        }

        let rules = config.rule_set(&root)?;
        let cache = ContentCache::new(&root, config.cache.max_bytes)
            .with_policy(config.cache.fingerprint);

        info!(root = %root.display(), "session opened");
        Ok(Self {
            root,
            config,
            rules,
            cache: Arc::new(cache),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub const fn config(&self) -> &CodaiConfig {
        &self.config
    }

    pub const fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub const fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// Resolve a user supplied path inside the project root. Absolute paths
    /// are accepted only when they point inside the root.
    pub fn resolve(&self, path: &Path) -> crate::Result<PathBuf> {
        if path.as_os_str().is_empty() || path == Path::new(".") {
            return Ok(self.root.clone());
        }
        if path.is_absolute() {
            let normalized = normalize_path(path);
            if normalized.starts_with(&self.root) {
                return Ok(normalized);
            }
            return Err(UtilError::PathOperation(format!(
                "{} is outside the project root {}",
                path.display(),
                self.root.display()
            ))
            .into());
        }
        Ok(safe_path_join(&self.root, path)?)
    }

    /// A walker over `dir` that matches rules against project relative paths
    fn walker(&self, dir: PathBuf, rules: &RuleSet, recurse: bool) -> Walker {
        Walker::new(dir, rules.clone(), recurse).with_ignore_base(self.root.clone())
    }

    /// Rules for one command, optionally including ignored paths and extra
    /// comma separated excludes
    pub fn rules_for(&self, include_ignored: bool, extra_excludes: Option<&str>) -> crate::Result<RuleSet> {
        let rules = match extra_excludes {
            Some(extra) => RuleSet::builder()
                .default_excludes(self.rules.default_excludes().iter().cloned())
                .patterns(self.rules.explicit_patterns().iter().cloned())
                .patterns(parse_exclude_list(extra))
                .nested_gitignore(self.rules.nested_gitignore())
                .build()?,
            None => self.rules.clone(),
        };
        Ok(rules.including_ignored(include_ignored))
    }

    pub fn read(&self, path: &Path) -> crate::Result<CacheRead> {
        let resolved = self.resolve(path)?;
        self.cache.read(&resolved)
    }

    /// Read every non-ignored file in `folder` into the cache
    pub fn read_folder(&self, folder: &Path, recurse: bool) -> crate::Result<FolderRead> {
        let dir = self.resolve(folder)?;
        let mut result = FolderRead::default();

        for descriptor in self.walker(dir.clone(), &self.rules, recurse).walk()?.files() {
            match self.cache.read(&dir.join(&descriptor.path)) {
                Ok(read) => result.files.push(read),
                Err(err) => result.failed.push(FailedRead {
                    path: descriptor.path,
                    reason: err.to_string(),
                }),
            }
        }

        info!(
            folder = %dir.display(),
            read = result.files.len(),
            failed = result.failed.len(),
            "folder read"
        );
        Ok(result)
    }

    /// Write `content` to a new or existing file and drop any cached copy
    pub fn create_file(&self, path: &Path, content: &str) -> crate::Result<PathBuf> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|err| crate::Error::from_io(parent, err))?;
        }
        std::fs::write(&target, content).map_err(|err| crate::Error::from_io(&target, err))?;
        self.cache.invalidate(&target);
        info!(path = %target.display(), bytes = content.len(), "file written");
        Ok(target)
    }

    pub fn create_folder(&self, path: &Path) -> crate::Result<PathBuf> {
        let target = self.resolve(path)?;
        std::fs::create_dir_all(&target).map_err(|err| crate::Error::from_io(&target, err))?;
        info!(path = %target.display(), "folder created");
        Ok(target)
    }

    pub fn invalidate(&self, path: &Path) -> crate::Result<bool> {
        Ok(self.cache.invalidate(&self.resolve(path)?))
    }

    pub fn list(&self, folder: &Path) -> crate::Result<DirectoryListing> {
        self.walker(self.resolve(folder)?, &self.rules, false).list()
    }

    pub fn study(&self, folder: &Path, rules: &RuleSet, recurse: bool) -> crate::Result<StudyReport> {
        study::study_with(&self.walker(self.resolve(folder)?, rules, recurse))
    }

    /// Assemble context from `paths` under the configured budget, or an
    /// explicit one
    pub fn build_context<I, P>(&self, paths: I, budget_bytes: Option<u64>) -> ContextWindow
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let budget = budget_bytes.unwrap_or(self.config.context.budget_bytes);
        ContextAssembler::new(&self.cache).build_context(paths, budget)
    }

    /// Context for the next turn from everything currently cached: files
    /// already sent first, then new or modified ones, each oldest first
    pub fn turn_context(&self) -> ContextWindow {
        let split = self.cache.split_by_turn();
        let paths = split
            .existing
            .into_iter()
            .chain(split.new_or_modified)
            .map(|(path, _)| path);
        let window = self.build_context(paths, None);
        self.cache.mark_turn();
        window
    }

    pub fn entries(&self) -> Vec<CacheEntryInfo> {
        self.cache.entries_snapshot()
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.cache.metrics().snapshot()
    }

    pub fn reset_metrics(&self) {
        self.cache.metrics().reset();
    }
}
