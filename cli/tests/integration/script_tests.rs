//! `spawnhook script` and script validation.

use crate::common::*;

#[test]
fn test_builtin_script_is_valid_yaml() {
    let output = run_spawnhook(&["script"]);
    let stdout = stdout(&output);

    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout.contains("settle_ms: 500"), "{}", stdout);
    assert!(stdout.contains("verdict: per-entry"), "{}", stdout);
    assert_eq!(stdout.matches("entry: posix_spawn\n").count(), 6, "{}", stdout);
    assert_eq!(stdout.matches("entry: posix_spawnp\n").count(), 6, "{}", stdout);
    assert_eq!(stdout.matches("app_that_doesnt_exist").count(), 2, "{}", stdout);
}

#[test]
fn test_printed_script_runs() {
    let printed = stdout(&run_spawnhook(&["script"]));
    let script = script_file(&printed);
    let output = run_spawnhook(&[
        "run",
        "--engine",
        "table",
        "--settle-ms",
        "0",
        "--script",
        script.path().to_str().unwrap(),
    ]);

    assert_eq!(
        output.status.code(),
        Some(0),
        "stdout: {}, stderr: {}",
        stdout(&output),
        stderr(&output)
    );
}

#[test]
fn test_invalid_script_is_rejected() {
    let script = script_file("operations:\n  - entry: CreateProcessA\n    command: charmap\n");
    let output = run_spawnhook(&[
        "run",
        "--engine",
        "table",
        "--script",
        script.path().to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("invalid script"), "{}", stderr(&output));
}

#[test]
fn test_unknown_entry_point_flag_is_a_usage_error() {
    let output = run_spawnhook(&["run", "--fail-attach", "CreateProcessW"]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("unknown entry point"), "{}", stderr(&output));
}
