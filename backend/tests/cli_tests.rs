//! Exit statuses of the command line tools.

use std::process::{Command, Output};

use tempfile::TempDir;

/// Runs a tool in an empty directory against the in-memory repository.
fn run(binary: &str, args: &[&str]) -> Output {
    let workdir = TempDir::new().unwrap();
    Command::new(binary)
        .args(args)
        .current_dir(workdir.path())
        .env("REPOSITORY_TYPE", "local")
        .env_remove("DATABASE_URL")
        .env_remove("PG_DATABASE_URL")
        .output()
        .unwrap()
}

#[cfg(unix)]
fn assert_usage_error(output: &Output) {
    // -1 as seen by the parent process
    assert_eq!(output.status.code(), Some(255));
    assert!(!output.stderr.is_empty());
    assert!(output.stdout.is_empty());
}

#[cfg(unix)]
#[test]
fn test_shift_apertures_usage_errors() {
    let bin = env!("CARGO_BIN_EXE_shift-apertures");
    assert_usage_error(&run(bin, &[]));
    assert_usage_error(&run(bin, &["q1-lc"]));
    assert_usage_error(&run(bin, &["q1-lc", "two"]));
    assert_usage_error(&run(bin, &["q1-lc", "1", "extra"]));
}

#[cfg(unix)]
#[test]
fn test_set_supplemental_usage_errors() {
    let bin = env!("CARGO_BIN_EXE_set-supplemental-target-list-set");
    assert_usage_error(&run(bin, &[]));
    assert_usage_error(&run(bin, &["q1-lc"]));
}

#[cfg(unix)]
#[test]
fn test_compare_target_tables_usage_errors() {
    let bin = env!("CARGO_BIN_EXE_compare-target-tables");
    assert_usage_error(&run(bin, &["old"]));
}

#[test]
fn test_help_exits_successfully() {
    let output = run(env!("CARGO_BIN_EXE_compare-target-tables"), &["--help"]);
    assert!(output.status.success());
    let usage = String::from_utf8_lossy(&output.stdout);
    assert!(usage.contains("OLD_TLS_NAME"));
}

#[test]
fn test_unknown_target_list_set_fails_after_parsing() {
    let output = run(env!("CARGO_BIN_EXE_shift-apertures"), &["missing", "-1"]);
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing"));
}
