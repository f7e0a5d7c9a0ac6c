//! Path exclusion rules
//!
//! A [`RuleSet`] combines user supplied patterns (config, exclude files,
//! `.gitignore`) with built-in default excludes. Patterns are compiled once
//! into two glob sets:
//!
//! - patterns without a `/` are tested against every path segment, so `*.tmp`
//!   or `node_modules` match at any depth;
//! - patterns containing a `/` are anchored at the directory the rules belong
//!   to (the project root for config and root `.gitignore` rules) and tested
//!   against the relative path and each of its ancestor prefixes, so
//!   `docs/build` excludes everything below that directory.
//!
//! With [`RuleSetBuilder::nested_gitignore`] set, the walker also reads the
//! `.gitignore` of every directory it enters and applies it to that subtree
//! only.
//!
//! Matching is case-sensitive and has no side effects.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Component, Path};
use tracing::debug;

/// Directories excluded unless the caller asks for ignored paths
pub const DEFAULT_EXCLUDES: &[&str] = &[
    // Version control
    ".git",
    ".svn",
    ".hg",
    // Virtual environments and dependency folders
    "venv",
    ".venv",
    "env",
    "node_modules",
    "target",
    // Tool caches
    "__pycache__",
    ".tox",
    ".pytest_cache",
    ".mypy_cache",
    // Editors
    ".idea",
    ".vscode",
];

/// Compiled exclusion rules
#[derive(Debug, Clone)]
pub struct RuleSet {
    explicit_patterns: Vec<String>,
    default_excludes: Vec<String>,
    include_ignored: bool,
    nested_gitignore: bool,
    segment_globs: GlobSet,
    path_globs: GlobSet,
}

impl RuleSet {
    /// Start building a rule set with the built-in default excludes
    pub fn builder() -> RuleSetBuilder {
        RuleSetBuilder::default()
    }

    /// Default excludes only
    pub fn with_defaults() -> Self {
        // The built-in patterns are plain names and always compile
        Self::builder()
            .build()
            .unwrap_or_else(|_| Self::empty())
    }

    /// A rule set that excludes nothing
    pub fn empty() -> Self {
        Self {
            explicit_patterns: Vec::new(),
            default_excludes: Vec::new(),
            include_ignored: false,
            nested_gitignore: false,
            segment_globs: GlobSet::empty(),
            path_globs: GlobSet::empty(),
        }
    }

    /// Copy of this rule set with the `include_ignored` override changed
    #[must_use]
    pub fn including_ignored(&self, include_ignored: bool) -> Self {
        Self {
            include_ignored,
            ..self.clone()
        }
    }

    pub fn explicit_patterns(&self) -> &[String] {
        &self.explicit_patterns
    }

    pub fn default_excludes(&self) -> &[String] {
        &self.default_excludes
    }

    pub const fn include_ignored(&self) -> bool {
        self.include_ignored
    }

    /// Whether walks also honour `.gitignore` files below the project root
    pub const fn nested_gitignore(&self) -> bool {
        self.nested_gitignore && !self.include_ignored
    }

    /// Rules from the `.gitignore` in `dir`, anchored at `dir`, without
    /// default excludes. `None` when the file is absent or empty.
    pub fn scoped_gitignore(dir: &Path) -> crate::Result<Option<Self>> {
        let rules = Self::builder()
            .default_excludes(Vec::<String>::new())
            .gitignore_file(&dir.join(GITIGNORE))?
            .build()?;
        Ok((!rules.explicit_patterns.is_empty()).then_some(rules))
    }

    /// Whether `path` (relative to the directory the rules are anchored at)
    /// is excluded
    pub fn should_ignore(&self, path: &Path) -> bool {
        if self.include_ignored {
            return false;
        }

        let segments: Vec<&str> = path
            .components()
            .filter_map(|component| match component {
                Component::Normal(name) => name.to_str(),
                _ => None,
            })
            .collect();

        if segments.iter().any(|segment| self.segment_globs.is_match(segment)) {
            return true;
        }

        if self.path_globs.is_empty() {
            return false;
        }

        let mut prefix = String::new();
        for segment in segments {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            if self.path_globs.is_match(&prefix) {
                return true;
            }
        }

        false
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Per-directory ignore file name
pub const GITIGNORE: &str = ".gitignore";

/// Free-function form of [`RuleSet::should_ignore`]
pub fn should_ignore(path: &Path, rule_set: &RuleSet) -> bool {
    rule_set.should_ignore(path)
}

/// Fluent builder for [`RuleSet`]
#[derive(Debug, Clone)]
pub struct RuleSetBuilder {
    explicit_patterns: Vec<String>,
    default_excludes: Vec<String>,
    include_ignored: bool,
    nested_gitignore: bool,
}

impl Default for RuleSetBuilder {
    fn default() -> Self {
        Self {
            explicit_patterns: Vec::new(),
            default_excludes: DEFAULT_EXCLUDES.iter().map(|s| (*s).to_string()).collect(),
            include_ignored: false,
            nested_gitignore: false,
        }
    }
}

impl RuleSetBuilder {
    /// Add explicit patterns
    #[must_use]
    pub fn patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.explicit_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Replace the default excludes
    #[must_use]
    pub fn default_excludes<I, S>(mut self, excludes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_excludes = excludes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn include_ignored(mut self, include_ignored: bool) -> Self {
        self.include_ignored = include_ignored;
        self
    }

    /// Honour `.gitignore` files in directories below the walk's ignore base
    #[must_use]
    pub const fn nested_gitignore(mut self, nested_gitignore: bool) -> Self {
        self.nested_gitignore = nested_gitignore;
        self
    }

    /// Add the patterns of a `.gitignore` file. A missing file adds nothing.
    pub fn gitignore_file(self, path: &Path) -> crate::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(self.patterns(parse_gitignore(&content))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(self),
            Err(err) => Err(crate::Error::from_io(path, err)),
        }
    }

    /// Add the entries of an exclude list file (comma or newline separated)
    pub fn exclude_file(self, path: &Path) -> crate::Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|err| crate::Error::from_io(path, err))?;
        Ok(self.patterns(parse_exclude_list(&content)))
    }

    /// Compile all patterns
    pub fn build(self) -> crate::Result<RuleSet> {
        let mut segment_globs = GlobSetBuilder::new();
        let mut path_globs = GlobSetBuilder::new();

        for pattern in self.default_excludes.iter().chain(&self.explicit_patterns) {
            let trimmed = pattern.trim().trim_end_matches('/');
            if trimmed.is_empty() {
                continue;
            }
            let anchored = trimmed.trim_start_matches('/');
            let glob = GlobBuilder::new(anchored)
                .literal_separator(true)
                .build()
                .map_err(|e| crate::Error::Pattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;

            if trimmed.contains('/') {
                path_globs.add(glob);
            } else {
                segment_globs.add(glob);
            }
        }

        let compile = |builder: GlobSetBuilder| {
            builder.build().map_err(|e| crate::Error::Pattern {
                pattern: "<set>".to_string(),
                message: e.to_string(),
            })
        };

        Ok(RuleSet {
            segment_globs: compile(segment_globs)?,
            path_globs: compile(path_globs)?,
            explicit_patterns: self.explicit_patterns,
            default_excludes: self.default_excludes,
            include_ignored: self.include_ignored,
            nested_gitignore: self.nested_gitignore,
        })
    }
}

/// Extract patterns from `.gitignore` content.
///
/// Blank lines and comments are dropped. Negated patterns are not supported
/// and are skipped.
pub fn parse_gitignore(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| {
            if line.starts_with('!') {
                debug!(pattern = %line, "skipping negated gitignore pattern");
                false
            } else {
                true
            }
        })
        .map(str::to_string)
        .collect()
}

/// Split an exclude list on commas and newlines
pub fn parse_exclude_list(content: &str) -> Vec<String> {
    content
        .split([',', '\n'])
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
