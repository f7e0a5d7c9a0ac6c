//! Runs parsed commands against a session

use crate::commands::{Command, HELP};
use anyhow::{Context, Result};
use codai_core::study::write_report_file;
use codai_core::{ContextWindow, ReadOutcome, Session, StudyReport};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// What the prompt should do after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

const fn outcome_label(outcome: ReadOutcome) -> &'static str {
    match outcome {
        ReadOutcome::Hit => "cache hit",
        ReadOutcome::Miss => "cache miss",
    }
}

/// Execute `command`, writing its human readable result to `out`
pub fn execute(session: &Session, command: Command, out: &mut impl Write) -> Result<Flow> {
    match command {
        Command::Exit => return Ok(Flow::Exit),
        Command::Help => write!(out, "{HELP}")?,
        Command::ContextFiles => {
            let entries = session.entries();
            if entries.is_empty() {
                writeln!(out, "No files in context")?;
            }
            for entry in entries {
                writeln!(
                    out,
                    "{} ({} bytes, read {} times)",
                    entry.path.display(),
                    entry.size,
                    entry.access_count
                )?;
            }
        }
        Command::ListFiles { path } => {
            let listing = session
                .list(&path)
                .with_context(|| format!("Failed to list {}", path.display()))?;
            if listing.is_empty() {
                writeln!(out, "No files found in {}", path.display())?;
            } else {
                writeln!(out, "Folders:")?;
                for folder in &listing.folders {
                    writeln!(out, "  {folder}/")?;
                }
                writeln!(out, "Files:")?;
                for file in &listing.files {
                    writeln!(out, "  {file}")?;
                }
            }
        }
        Command::Read { path } => {
            let read = session
                .read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            writeln!(
                out,
                "Added {} to context ({} bytes, {})",
                read.path.display(),
                read.content.len(),
                outcome_label(read.outcome)
            )?;
            let text = read.text();
            write!(out, "{text}")?;
            if !text.is_empty() && !text.ends_with('\n') {
                writeln!(out)?;
            }
        }
        Command::ReadFolder { path, recurse } => {
            let result = session
                .read_folder(&path, recurse)
                .with_context(|| format!("Failed to read folder {}", path.display()))?;
            writeln!(
                out,
                "Added {} files from {} to context",
                result.files.len(),
                path.display()
            )?;
            for failed in &result.failed {
                writeln!(out, "  skipped {}: {}", failed.path.display(), failed.reason)?;
            }
        }
        Command::CreateFile { path, content } => {
            session
                .create_file(&path, &content)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            writeln!(out, "Created file {}", path.display())?;
        }
        Command::CreateFolder { path } => {
            session
                .create_folder(&path)
                .with_context(|| format!("Failed to create folder {}", path.display()))?;
            writeln!(out, "Created folder {}", path.display())?;
        }
        Command::ProjectStructure {
            path,
            include_ignored,
            recurse,
            exclude,
            output,
        } => {
            let rules = session.rules_for(include_ignored, exclude.as_deref())?;
            let report = session
                .study(&path, &rules, recurse)
                .with_context(|| format!("Failed to walk {}", path.display()))?;
            write!(out, "{}", report.render_tree())?;
            if let Some(output) = output {
                save_report(session, &report, &output, out)?;
            }
        }
        Command::ProjectStudy {
            path,
            include_ignored,
            recurse,
            output,
        } => {
            let rules = session.rules_for(include_ignored, None)?;
            let report = session
                .study(&path, &rules, recurse)
                .with_context(|| format!("Failed to study {}", path.display()))?;
            write!(out, "{report}")?;
            if let Some(output) = output {
                save_report(session, &report, &output, out)?;
            }
        }
        Command::Context { budget, paths } => {
            let window = if paths.is_empty() {
                session.turn_context()
            } else {
                let resolved = paths
                    .iter()
                    .map(|path| session.resolve(path))
                    .collect::<codai_core::Result<Vec<_>>>()?;
                session.build_context(resolved, budget)
            };
            write_window(&window, out)?;
        }
        Command::Metrics => writeln!(out, "{}", session.metrics())?,
        Command::MetricsReset => {
            session.reset_metrics();
            writeln!(out, "Metrics reset")?;
        }
    }

    Ok(Flow::Continue)
}

fn save_report(
    session: &Session,
    report: &StudyReport,
    output: &Path,
    out: &mut impl Write,
) -> Result<()> {
    let output = session.resolve(output)?;
    write_report_file(report, &output)
        .with_context(|| format!("Failed to write report to {}", output.display()))?;
    writeln!(out, "Report written to {}", output.display())?;
    Ok(())
}

fn write_window(window: &ContextWindow, out: &mut impl Write) -> Result<()> {
    writeln!(
        out,
        "Context: {} files, {} of {} bytes (~{} tokens), skipped {}",
        window.files.len(),
        window.total_size,
        window.budget_bytes,
        window.approx_tokens(),
        window.skipped_count()
    )?;
    for file in &window.files {
        writeln!(
            out,
            "  {} ({} bytes, {})",
            file.path.display(),
            file.content.len(),
            outcome_label(file.outcome)
        )?;
    }
    for path in &window.skipped {
        writeln!(out, "  over budget: {}", path.display())?;
    }
    for failed in &window.failed {
        writeln!(out, "  unreadable: {} ({})", failed.path.display(), failed.reason)?;
    }
    info!(files = window.files.len(), bytes = window.total_size, "context ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codai_core::CodaiConfig;
    use std::fs;

    fn run(session: &Session, line: &str) -> String {
        let mut out = Vec::new();
        execute(session, line.parse().unwrap(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn session() -> (tempfile::TempDir, Session) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("a.py"), "a".repeat(10)).unwrap();
        fs::write(dir.path().join("b.py"), "b".repeat(20)).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "pub fn f() {}").unwrap();
        let session = Session::open(dir.path(), CodaiConfig::default()).unwrap();
        (dir, session)
    }

    #[test]
    fn test_exit_stops_the_prompt() {
        let (_dir, session) = session();
        let flow = execute(&session, Command::Exit, &mut Vec::new()).unwrap();
        assert_eq!(flow, Flow::Exit);
    }

    #[test]
    fn test_read_and_context_files() {
        let (_dir, session) = session();
        assert!(run(&session, "read a.py").contains("cache miss"));
        assert!(run(&session, "read a.py").contains("cache hit"));
        assert_eq!(run(&session, "context files"), "a.py (10 bytes, read 2 times)\n");
    }

    #[test]
    fn test_context_budget() {
        let (_dir, session) = session();
        let output = run(&session, "context 25 a.py b.py");
        assert!(output.starts_with("Context: 1 files, 10 of 25 bytes"));
        assert!(output.contains("skipped 1"));
        assert!(output.contains("over budget: b.py"));
    }

    #[test]
    fn test_list_files() {
        let (_dir, session) = session();
        assert_eq!(
            run(&session, "list files"),
            "Folders:\n  src/\nFiles:\n  a.py\n  b.py\n"
        );
    }

    #[test]
    fn test_create_file_then_read() {
        let (dir, session) = session();
        run(&session, "create file notes/todo.txt ship it");
        assert_eq!(
            fs::read_to_string(dir.path().join("notes/todo.txt")).unwrap(),
            "ship it"
        );
        assert!(run(&session, "read notes/todo.txt").contains("7 bytes"));
    }

    #[test]
    fn test_project_study_writes_report() {
        let (dir, session) = session();
        let output_path = dir.path().join("report.json");
        let line = format!("project study output={}", output_path.display());
        let output = run(&session, &line);
        assert!(output.contains("files:       3"));
        assert!(output_path.is_file());
    }

    #[test]
    fn test_project_structure() {
        let (_dir, session) = session();
        let output = run(&session, "project structure exclude=*.py");
        assert!(output.contains("  src/\n    lib.rs (13 bytes)\n"));
        assert!(!output.contains("a.py"));
    }

    #[test]
    fn test_project_structure_shallow_with_output() {
        let (dir, session) = session();
        let output = run(&session, "project structure shallow output=project_structure.json");
        assert!(output.contains("  src/\n"));
        assert!(!output.contains("lib.rs"));
        assert!(output.contains("Report written to"));

        let written = fs::read_to_string(dir.path().join("project_structure.json")).unwrap();
        let report: StudyReport = serde_json::from_str(&written).unwrap();
        assert!(!report.recursive);
        assert_eq!(report.total_files, 2);
    }

    #[test]
    fn test_project_study_shallow() {
        let (_dir, session) = session();
        assert!(run(&session, "project study shallow").contains("files:       2"));
    }

    #[test]
    fn test_report_output_outside_root_is_rejected() {
        let (_dir, session) = session();
        let other = tempfile::tempdir().unwrap();
        let command = Command::ProjectStructure {
            path: ".".into(),
            include_ignored: false,
            recurse: true,
            exclude: None,
            output: Some(other.path().join("tree.json")),
        };
        assert!(execute(&session, command, &mut Vec::new()).is_err());
        assert!(!other.path().join("tree.json").exists());
    }

    #[test]
    fn test_metrics_and_reset() {
        let (_dir, session) = session();
        run(&session, "read a.py");
        assert!(run(&session, "metrics").contains("misses:         1"));
        run(&session, "metrics reset");
        assert!(run(&session, "metrics").contains("Cache reads:      0"));
    }

    #[test]
    fn test_read_missing_file_is_an_error() {
        let (_dir, session) = session();
        let result = execute(
            &session,
            Command::Read {
                path: Path::new("nope.rs").to_path_buf(),
            },
            &mut Vec::new(),
        );
        assert!(result.is_err());
    }
}
