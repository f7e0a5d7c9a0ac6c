use codai_core::study::{study, write_report_file};
use codai_core::{RuleSet, StudyReport, WalkItem};
use proptest::prelude::*;
use std::fs;
use std::path::Path;

fn build_tree(root: &Path, kept: usize, ignored: usize) {
    fs::create_dir_all(root.join("src")).unwrap();
    fs::create_dir_all(root.join("build")).unwrap();
    for i in 0..kept {
        let dir = if i % 2 == 0 { "src" } else { "." };
        fs::write(root.join(dir).join(format!("file{i}.rs")), "x".repeat(i)).unwrap();
    }
    for i in 0..ignored {
        fs::write(root.join("build").join(format!("out{i}.o")), "o").unwrap();
    }
}

#[test]
fn test_report_round_trips_through_json_file() {
    let dir = tempfile::tempdir().unwrap();
    build_tree(dir.path(), 4, 2);
    let rules = RuleSet::builder().patterns(["build"]).build().unwrap();
    let report = study(dir.path(), &rules, true).unwrap();

    let out = tempfile::tempdir().unwrap();
    let path = out.path().join("study.json");
    write_report_file(&report, &path).unwrap();

    let parsed: StudyReport = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(parsed, report);
    assert_eq!(parsed.total_files, 4);
    assert_eq!(parsed.extensions["rs"].files, 4);
}

#[cfg(unix)]
#[test]
fn test_unreadable_directory_is_listed_not_fatal() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    build_tree(dir.path(), 3, 0);
    let locked = dir.path().join("locked");
    fs::create_dir(&locked).unwrap();
    fs::write(locked.join("secret.txt"), "s").unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Privileged users read through permission bits; nothing to observe then
    if fs::read_dir(&locked).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let rules = RuleSet::with_defaults();
    let report = study(dir.path(), &rules, true).unwrap();
    let denied: Vec<String> = codai_core::walker::walk(dir.path(), &rules, true)
        .unwrap()
        .filter_map(|item| match item {
            WalkItem::Failed { path, .. } => Some(path.display().to_string()),
            WalkItem::Entry(_) => None,
        })
        .collect();

    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(report.total_files, 3);
    assert_eq!(denied, vec!["locked".to_string()]);
    let unreadable: Vec<&str> = report.unreadable.iter().map(|u| u.path.as_str()).collect();
    assert_eq!(unreadable, vec!["locked"]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn study_counts_exclude_ignored_files(kept in 0usize..10, ignored in 0usize..6) {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path(), kept, ignored);

        let rules = RuleSet::builder().patterns(["*.o"]).build().unwrap();
        let report = study(dir.path(), &rules, true).unwrap();

        let counted: usize = report.extensions.values().map(|stats| stats.files).sum();
        prop_assert_eq!(counted, kept);
        prop_assert_eq!(report.total_files, kept);
        prop_assert_eq!(report.tree.file_count(), kept);
        prop_assert_eq!(report.total_size, (0..kept as u64).sum::<u64>());

        let everything = study(dir.path(), &rules.including_ignored(true), true).unwrap();
        prop_assert_eq!(everything.total_files, kept + ignored);
    }
}
