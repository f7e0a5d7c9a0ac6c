//! Lazy, deterministic directory traversal
//!
//! [`walk`] yields [`WalkItem`]s in lexical order by file name, directories
//! before their contents. Ignored directories are pruned rather than
//! filtered, so nothing below them is ever opened. A directory that cannot be
//! read produces a [`WalkItem::Failed`] and the walk carries on with its
//! siblings.
//!
//! Rules are matched against paths relative to the walker's ignore base,
//! which defaults to the walk root. Walking a subfolder of a project with the
//! project root as base keeps anchored rules such as `src/generated/` in
//! force. When the rules ask for nested `.gitignore` files, each directory's
//! file is applied to that directory's subtree for as long as the walk is
//! inside it.
//!
//! Dropping a [`TreeWalk`] part way through closes every directory handle it
//! still holds.

use crate::ignore::RuleSet;
use chrono::{DateTime, Utc};
use codai_utils::file::{display_path, normalize_path, relative_to};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Metadata for one walked path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Path relative to the walk root, normalized
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_dir: bool,
    /// 1 for immediate children of the root
    pub depth: usize,
}

impl FileDescriptor {
    /// Lower-cased extension, if any
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
    }

    pub fn display_path(&self) -> String {
        display_path(&self.path)
    }
}

/// Why a path could not be walked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkFailure {
    PermissionDenied,
    Io,
}

/// One step of a walk
#[derive(Debug, Clone)]
pub enum WalkItem {
    Entry(FileDescriptor),
    Failed {
        /// Path relative to the walk root
        path: PathBuf,
        kind: WalkFailure,
        message: String,
    },
}

/// Walk configuration that can be iterated any number of times
#[derive(Debug, Clone)]
pub struct Walker {
    root: PathBuf,
    ignore_base: Option<PathBuf>,
    rules: RuleSet,
    recurse: bool,
}

impl Walker {
    pub fn new(root: impl Into<PathBuf>, rules: RuleSet, recurse: bool) -> Self {
        Self {
            root: root.into(),
            ignore_base: None,
            rules,
            recurse,
        }
    }

    /// Match rules against paths relative to `base` instead of the walk root.
    /// `base` should be the root itself or one of its ancestors.
    #[must_use]
    pub fn with_ignore_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.ignore_base = Some(base.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ignore_base(&self) -> &Path {
        self.ignore_base.as_deref().unwrap_or(&self.root)
    }

    pub const fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub const fn recurse(&self) -> bool {
        self.recurse
    }

    /// Start a fresh traversal
    pub fn walk(&self) -> crate::Result<TreeWalk> {
        check_root(&self.root)?;

        let base = self.ignore_base().to_path_buf();
        if !normalize_path(&self.root).starts_with(normalize_path(&base)) {
            return Err(crate::Error::Util(codai_utils::UtilError::PathOperation(
                format!(
                    "{} is not inside ignore base {}",
                    self.root.display(),
                    base.display()
                ),
            )));
        }
        let root_from_base = relative_to(&self.root, &base);
        let scopes = self.enclosing_scopes(&base, &root_from_base);
        if self.rules.should_ignore(&root_from_base)
            || scopes.iter().any(|scope| scope.should_ignore(&root_from_base))
        {
            debug!(root = %self.root.display(), "walk root is ignored");
            return Ok(TreeWalk {
                root: self.root.clone(),
                base,
                rules: self.rules.clone(),
                recurse: self.recurse,
                scopes: Vec::new(),
                inner: None,
            });
        }

        let max_depth = if self.recurse { usize::MAX } else { 1 };
        let inner = walkdir::WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        Ok(TreeWalk {
            root: self.root.clone(),
            base,
            rules: self.rules.clone(),
            recurse: self.recurse,
            scopes,
            inner: Some(inner),
        })
    }

    /// `.gitignore` scopes of the directories between the base (exclusive)
    /// and the walk root (inclusive)
    fn enclosing_scopes(&self, base: &Path, root_from_base: &Path) -> Vec<IgnoreScope> {
        if !self.rules.nested_gitignore() {
            return Vec::new();
        }
        let mut scopes = Vec::new();
        let mut dir = PathBuf::new();
        for component in root_from_base.components() {
            if let Component::Normal(name) = component {
                dir.push(name);
                if let Some(scope) = IgnoreScope::load(base, &dir, 0) {
                    scopes.push(scope);
                }
            }
        }
        scopes
    }
}

/// Rules of one directory's `.gitignore`, active while the walk is below it
#[derive(Debug)]
struct IgnoreScope {
    /// Directory relative to the ignore base
    dir: PathBuf,
    /// Walk depth of the directory; 0 for the walk root and its ancestors
    depth: usize,
    rules: RuleSet,
}

impl IgnoreScope {
    fn load(base: &Path, dir: &Path, depth: usize) -> Option<Self> {
        match RuleSet::scoped_gitignore(&base.join(dir)) {
            Ok(rules) => rules.map(|rules| Self {
                dir: dir.to_path_buf(),
                depth,
                rules,
            }),
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "ignoring unreadable .gitignore");
                None
            }
        }
    }

    fn should_ignore(&self, from_base: &Path) -> bool {
        from_base
            .strip_prefix(&self.dir)
            .is_ok_and(|inner| self.rules.should_ignore(inner))
    }
}

/// Walk `root`, applying `rules`. With `recurse == false` only the immediate
/// children are listed.
pub fn walk(root: &Path, rules: &RuleSet, recurse: bool) -> crate::Result<TreeWalk> {
    Walker::new(root, rules.clone(), recurse).walk()
}

fn check_root(root: &Path) -> crate::Result<()> {
    let metadata = std::fs::metadata(root).map_err(|err| crate::Error::from_io(root, err))?;
    if !metadata.is_dir() {
        return Err(crate::Error::NotADirectory(root.to_path_buf()));
    }
    // Surface an unreadable root now instead of as a per-path failure
    std::fs::read_dir(root).map_err(|err| crate::Error::from_io(root, err))?;
    Ok(())
}

/// Lazy sequence of walk results
pub struct TreeWalk {
    root: PathBuf,
    base: PathBuf,
    rules: RuleSet,
    recurse: bool,
    scopes: Vec<IgnoreScope>,
    /// `None` when the walk root itself is ignored
    inner: Option<walkdir::IntoIter>,
}

impl TreeWalk {
    /// Only the file entries, dropping directories and failures
    pub fn files(self) -> impl Iterator<Item = FileDescriptor> {
        self.filter_map(|item| match item {
            WalkItem::Entry(descriptor) if !descriptor.is_dir => Some(descriptor),
            _ => None,
        })
    }

    fn failure(&self, err: &walkdir::Error) -> WalkItem {
        let path = err
            .path()
            .map_or_else(|| PathBuf::from("."), |p| relative_to(p, &self.root));
        let kind = match err.io_error().map(std::io::Error::kind) {
            Some(std::io::ErrorKind::PermissionDenied) => WalkFailure::PermissionDenied,
            _ => WalkFailure::Io,
        };
        warn!(path = %path.display(), error = %err, "skipping unreadable path");
        WalkItem::Failed {
            path,
            kind,
            message: err.to_string(),
        }
    }

    fn is_ignored(&self, from_base: &Path) -> bool {
        self.rules.should_ignore(from_base)
            || self.scopes.iter().any(|scope| scope.should_ignore(from_base))
    }
}

impl Iterator for TreeWalk {
    type Item = WalkItem;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.as_mut()?.next()? {
                Ok(entry) => entry,
                Err(err) => return Some(self.failure(&err)),
            };

            // Leaving a directory drops its .gitignore
            let depth = entry.depth();
            while self.scopes.last().is_some_and(|scope| scope.depth >= depth) {
                self.scopes.pop();
            }

            let relative = relative_to(entry.path(), &self.root);
            let from_base = relative_to(entry.path(), &self.base);
            let is_dir = entry.file_type().is_dir();

            if self.is_ignored(&from_base) {
                if is_dir {
                    if let Some(inner) = self.inner.as_mut() {
                        inner.skip_current_dir();
                    }
                }
                continue;
            }

            if is_dir && self.recurse && self.rules.nested_gitignore() {
                if let Some(scope) = IgnoreScope::load(&self.base, &from_base, depth) {
                    self.scopes.push(scope);
                }
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => return Some(self.failure(&err)),
            };

            let modified =
                DateTime::<Utc>::from(metadata.modified().unwrap_or(std::time::UNIX_EPOCH));

            return Some(WalkItem::Entry(FileDescriptor {
                path: relative,
                size: if is_dir { 0 } else { metadata.len() },
                modified,
                is_dir,
                depth: entry.depth(),
            }));
        }
    }
}

/// Immediate children of a directory, split and sorted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryListing {
    pub folders: Vec<String>,
    pub files: Vec<String>,
}

impl DirectoryListing {
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }
}

impl Walker {
    /// The non-ignored immediate children of the root, whatever `recurse` says
    pub fn list(&self) -> crate::Result<DirectoryListing> {
        let shallow = Self {
            recurse: false,
            ..self.clone()
        };
        let mut listing = DirectoryListing::default();
        for descriptor in shallow.walk()?.filter_map(|item| match item {
            WalkItem::Entry(descriptor) => Some(descriptor),
            WalkItem::Failed { .. } => None,
        }) {
            let name = descriptor.display_path();
            if descriptor.is_dir {
                listing.folders.push(name);
            } else {
                listing.files.push(name);
            }
        }
        Ok(listing)
    }
}

/// List the non-ignored children of `root`
pub fn list_directory(root: &Path, rules: &RuleSet) -> crate::Result<DirectoryListing> {
    Walker::new(root, rules.clone(), false).list()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::write(root.join("b.py"), "print('b')\n").unwrap();
        fs::write(root.join("a.py"), "print('a')\n").unwrap();
        fs::write(root.join("notes.tmp"), "scratch").unwrap();
        fs::write(root.join("src/lib.rs"), "pub fn f() {}\n").unwrap();
        fs::write(root.join("src/nested/deep.rs"), "").unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        dir
    }

    fn paths(walk: TreeWalk) -> Vec<String> {
        walk.filter_map(|item| match item {
            WalkItem::Entry(d) => Some(d.display_path()),
            WalkItem::Failed { .. } => None,
        })
        .collect()
    }

    #[test]
    fn test_recursive_walk_is_lexical_and_filtered() {
        let dir = fixture();
        let rules = RuleSet::builder().patterns(["*.tmp"]).build().unwrap();

        let walked = paths(walk(dir.path(), &rules, true).unwrap());
        assert_eq!(
            walked,
            vec!["a.py", "b.py", "src", "src/lib.rs", "src/nested", "src/nested/deep.rs"]
        );
    }

    #[test]
    fn test_non_recursive_walk() {
        let dir = fixture();
        let walked = paths(walk(dir.path(), &RuleSet::with_defaults(), false).unwrap());
        assert_eq!(walked, vec!["a.py", "b.py", "notes.tmp", "src"]);
    }

    #[test]
    fn test_descriptor_metadata() {
        let dir = fixture();
        let files: Vec<FileDescriptor> = walk(dir.path(), &RuleSet::with_defaults(), true)
            .unwrap()
            .files()
            .collect();
        let lib = files
            .iter()
            .find(|d| d.display_path() == "src/lib.rs")
            .unwrap();
        assert_eq!(lib.size, 14);
        assert_eq!(lib.depth, 2);
        assert_eq!(lib.extension().as_deref(), Some("rs"));
    }

    #[test]
    fn test_walker_is_restartable() {
        let dir = fixture();
        let walker = Walker::new(dir.path(), RuleSet::with_defaults(), true);
        let first = paths(walker.walk().unwrap());
        let second = paths(walker.walk().unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn test_abandoning_walk_midway() {
        let dir = fixture();
        let mut walk = walk(dir.path(), &RuleSet::with_defaults(), true).unwrap();
        assert!(walk.next().is_some());
        drop(walk);
        // A fresh walk still sees the whole tree
        let fresh = super::walk(dir.path(), &RuleSet::with_defaults(), true).unwrap();
        assert_eq!(paths(fresh).len(), 7);
    }

    #[test]
    fn test_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let result = walk(&dir.path().join("absent"), &RuleSet::with_defaults(), true);
        assert!(matches!(result, Err(crate::Error::NotFound(_))));
    }

    #[test]
    fn test_file_root() {
        let dir = fixture();
        let result = walk(&dir.path().join("a.py"), &RuleSet::with_defaults(), true);
        assert!(matches!(result, Err(crate::Error::NotADirectory(_))));
    }

    #[test]
    fn test_list_directory() {
        let dir = fixture();
        let listing = list_directory(dir.path(), &RuleSet::with_defaults()).unwrap();
        assert_eq!(listing.folders, vec!["src"]);
        assert_eq!(listing.files, vec!["a.py", "b.py", "notes.tmp"]);
    }

    #[test]
    fn test_anchored_rule_holds_below_ignore_base() {
        let dir = fixture();
        fs::create_dir_all(dir.path().join("src/generated")).unwrap();
        fs::write(dir.path().join("src/generated/big.rs"), "x").unwrap();
        let rules = RuleSet::builder().patterns(["src/generated/"]).build().unwrap();

        // Without a base the anchored pattern is read relative to src
        let unanchored = paths(walk(&dir.path().join("src"), &rules, true).unwrap());
        assert!(unanchored.contains(&"generated/big.rs".to_string()));

        let walker = Walker::new(dir.path().join("src"), rules, true).with_ignore_base(dir.path());
        assert_eq!(
            paths(walker.walk().unwrap()),
            vec!["lib.rs", "nested", "nested/deep.rs"]
        );
        assert_eq!(walker.list().unwrap().folders, vec!["nested"]);
    }

    #[test]
    fn test_ignored_walk_root_yields_nothing() {
        let dir = fixture();
        let rules = RuleSet::builder().patterns(["src/nested"]).build().unwrap();
        let walker =
            Walker::new(dir.path().join("src/nested"), rules, true).with_ignore_base(dir.path());
        assert!(paths(walker.walk().unwrap()).is_empty());
    }

    #[test]
    fn test_root_outside_ignore_base() {
        let dir = fixture();
        let other = tempfile::tempdir().unwrap();
        let walker =
            Walker::new(other.path(), RuleSet::with_defaults(), true).with_ignore_base(dir.path());
        assert!(matches!(walker.walk(), Err(crate::Error::Util(_))));
    }

    #[test]
    fn test_nested_gitignore_scoped_to_subtree() {
        let dir = fixture();
        fs::write(dir.path().join("top.log"), "").unwrap();
        fs::write(dir.path().join("src/.gitignore"), "*.log\n").unwrap();
        fs::write(dir.path().join("src/build.log"), "").unwrap();
        fs::write(dir.path().join("src/nested/trace.log"), "").unwrap();
        let rules = RuleSet::builder().nested_gitignore(true).build().unwrap();

        let walked = paths(walk(dir.path(), &rules, true).unwrap());
        assert!(walked.contains(&"top.log".to_string()));
        assert!(walked.contains(&"src/.gitignore".to_string()));
        assert!(!walked.contains(&"src/build.log".to_string()));
        assert!(!walked.contains(&"src/nested/trace.log".to_string()));

        // A walk that starts inside the subtree still honours it
        let inner = Walker::new(dir.path().join("src/nested"), rules.clone(), true)
            .with_ignore_base(dir.path());
        assert_eq!(paths(inner.walk().unwrap()), vec!["deep.rs"]);

        // Without the option the nested file is only listed
        let plain = paths(walk(dir.path(), &RuleSet::with_defaults(), true).unwrap());
        assert!(plain.contains(&"src/build.log".to_string()));
    }

    #[test]
    fn test_nested_gitignore_anchored_to_its_directory() {
        let dir = fixture();
        fs::write(dir.path().join("src/.gitignore"), "/nested\n").unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/keep.rs"), "").unwrap();
        let rules = RuleSet::builder().nested_gitignore(true).build().unwrap();

        let walked = paths(walk(dir.path(), &rules, true).unwrap());
        assert!(walked.contains(&"nested/keep.rs".to_string()));
        assert!(!walked.contains(&"src/nested".to_string()));
        assert!(walked.contains(&"src/lib.rs".to_string()));
    }
}
