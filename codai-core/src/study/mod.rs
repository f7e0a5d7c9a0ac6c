//! Project study reports
//!
//! A study walks the tree once and summarises it from metadata alone: no file
//! content is read, so studying a large repository stays cheap. Paths that
//! cannot be walked are listed in the report instead of failing the study.

mod sink;

pub use sink::{write_report_file, JsonReportSink, ReportSink, YamlReportSink};

use crate::ignore::RuleSet;
use crate::walker::{FileDescriptor, WalkFailure, WalkItem, Walker};
use chrono::{DateTime, Utc};
use codai_utils::file::display_path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

/// How many of the biggest files a report lists
pub const LARGEST_FILES: usize = 5;

/// Bucket for files without an extension
pub const NO_EXTENSION: &str = "(none)";

/// Per-extension aggregate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionStats {
    pub files: usize,
    pub bytes: u64,
}

/// A file inside the report tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// A directory inside the report tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirNode {
    pub name: String,
    /// Relative to the study root; `.` for the root itself
    pub path: String,
    pub directories: Vec<DirNode>,
    pub files: Vec<FileNode>,
}

impl DirNode {
    fn new(name: String, path: String) -> Self {
        Self {
            name,
            path,
            ..Self::default()
        }
    }

    /// Files in this directory and all below it
    pub fn file_count(&self) -> usize {
        self.files.len() + self.directories.iter().map(Self::file_count).sum::<usize>()
    }
}

/// A file path with its size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizedPath {
    pub path: String,
    pub size: u64,
}

/// A path the walker could not read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadablePath {
    pub path: String,
    pub kind: WalkFailure,
    pub message: String,
}

/// Structured summary of a project tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyReport {
    pub root: PathBuf,
    pub generated_at: DateTime<Utc>,
    pub recursive: bool,
    pub include_ignored: bool,
    pub total_files: usize,
    pub total_directories: usize,
    pub total_size: u64,
    /// Deepest file or directory, 1 for immediate children of the root
    pub max_depth: usize,
    pub extensions: BTreeMap<String, ExtensionStats>,
    pub largest_files: Vec<SizedPath>,
    pub tree: DirNode,
    pub unreadable: Vec<UnreadablePath>,
}

impl StudyReport {
    /// Indented text rendering of the directory tree
    pub fn render_tree(&self) -> String {
        fn render(node: &DirNode, indent: usize, out: &mut String) {
            for dir in &node.directories {
                let _ = writeln!(out, "{:indent$}{}/", "", dir.name, indent = indent * 2);
                render(dir, indent + 1, out);
            }
            for file in &node.files {
                let _ = writeln!(
                    out,
                    "{:indent$}{} ({} bytes)",
                    "",
                    file.name,
                    file.size,
                    indent = indent * 2
                );
            }
        }

        let mut out = format!("{}/\n", self.root.display());
        render(&self.tree, 1, &mut out);
        out
    }
}

impl std::fmt::Display for StudyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Project study of {}", self.root.display())?;
        writeln!(f, "  files:       {}", self.total_files)?;
        writeln!(f, "  directories: {}", self.total_directories)?;
        writeln!(f, "  total size:  {} bytes", self.total_size)?;
        writeln!(f, "  max depth:   {}", self.max_depth)?;

        let mut by_count: Vec<(&String, &ExtensionStats)> = self.extensions.iter().collect();
        by_count.sort_by(|a, b| b.1.files.cmp(&a.1.files).then_with(|| a.0.cmp(b.0)));
        writeln!(f, "File types:")?;
        for (ext, stats) in by_count {
            writeln!(f, "  {ext:<10} {:>6} files {:>10} bytes", stats.files, stats.bytes)?;
        }

        if !self.largest_files.is_empty() {
            writeln!(f, "Largest files:")?;
            for file in &self.largest_files {
                writeln!(f, "  {:>10} {}", file.size, file.path)?;
            }
        }

        if !self.unreadable.is_empty() {
            writeln!(f, "Unreadable paths:")?;
            for path in &self.unreadable {
                writeln!(f, "  {} ({})", path.path, path.message)?;
            }
        }
        Ok(())
    }
}

/// Accumulates walk output into a report
struct ReportBuilder {
    report: StudyReport,
    /// Open directories from the root down to the current position
    stack: Vec<DirNode>,
    sizes: Vec<SizedPath>,
}

impl ReportBuilder {
    fn new(root: &Path, rules: &RuleSet, recursive: bool) -> Self {
        Self {
            report: StudyReport {
                root: root.to_path_buf(),
                generated_at: Utc::now(),
                recursive,
                include_ignored: rules.include_ignored(),
                total_files: 0,
                total_directories: 0,
                total_size: 0,
                max_depth: 0,
                extensions: BTreeMap::new(),
                largest_files: Vec::new(),
                tree: DirNode::default(),
                unreadable: Vec::new(),
            },
            stack: vec![DirNode::new(root_name(root), ".".to_string())],
            sizes: Vec::new(),
        }
    }

    /// Close directories until the one containing `path` is on top
    fn descend_to_parent_of(&mut self, path: &Path) {
        let parent = path
            .parent()
            .map(display_path)
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| ".".to_string());

        while self.stack.len() > 1 && self.stack.last().is_some_and(|top| top.path != parent) {
            self.close_top();
        }
    }

    fn close_top(&mut self) {
        if let Some(done) = self.stack.pop() {
            if let Some(parent) = self.stack.last_mut() {
                parent.directories.push(done);
            }
        }
    }

    fn add(&mut self, descriptor: FileDescriptor) {
        self.descend_to_parent_of(&descriptor.path);
        self.report.max_depth = self.report.max_depth.max(descriptor.depth);

        let name = descriptor
            .path
            .file_name()
            .map_or_else(String::new, |n| n.to_string_lossy().into_owned());

        if descriptor.is_dir {
            self.report.total_directories += 1;
            self.stack.push(DirNode::new(name, descriptor.display_path()));
            return;
        }

        self.report.total_files += 1;
        self.report.total_size += descriptor.size;
        let stats = self
            .report
            .extensions
            .entry(
                descriptor
                    .extension()
                    .unwrap_or_else(|| NO_EXTENSION.to_string()),
            )
            .or_default();
        stats.files += 1;
        stats.bytes += descriptor.size;

        self.sizes.push(SizedPath {
            path: descriptor.display_path(),
            size: descriptor.size,
        });
        if let Some(top) = self.stack.last_mut() {
            top.files.push(FileNode {
                name,
                size: descriptor.size,
                modified: descriptor.modified,
            });
        }
    }

    fn fail(&mut self, path: &Path, kind: WalkFailure, message: String) {
        self.report.unreadable.push(UnreadablePath {
            path: display_path(path),
            kind,
            message,
        });
    }

    fn finish(mut self) -> StudyReport {
        while self.stack.len() > 1 {
            self.close_top();
        }
        self.report.tree = self.stack.pop().unwrap_or_default();

        self.sizes
            .sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
        self.sizes.truncate(LARGEST_FILES);
        self.report.largest_files = self.sizes;
        self.report
    }
}

fn root_name(root: &Path) -> String {
    root.file_name().map_or_else(
        || display_path(root),
        |name| name.to_string_lossy().into_owned(),
    )
}

/// Study the tree under `root`. Fails only when the root itself cannot be
/// walked.
pub fn study(root: &Path, rules: &RuleSet, recurse: bool) -> crate::Result<StudyReport> {
    study_with(&Walker::new(root, rules.clone(), recurse))
}

/// Study whatever `walker` covers, honouring its ignore base
pub fn study_with(walker: &Walker) -> crate::Result<StudyReport> {
    let root = walker.root();
    let mut builder = ReportBuilder::new(root, walker.rules(), walker.recurse());

    for item in walker.walk()? {
        match item {
            WalkItem::Entry(descriptor) => builder.add(descriptor),
            WalkItem::Failed {
                path,
                kind,
                message,
            } => builder.fail(&path, kind, message),
        }
    }

    let report = builder.finish();
    info!(
        root = %root.display(),
        files = report.total_files,
        directories = report.total_directories,
        unreadable = report.unreadable.len(),
        "project study complete"
    );
    Ok(report)
}
