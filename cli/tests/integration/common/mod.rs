//! Shared helpers for running the spawnhook binary.

#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output};

use tempfile::NamedTempFile;

/// Path to the spawnhook binary
pub fn spawnhook_binary() -> PathBuf {
    // cargo test builds the binary and sets this env var
    PathBuf::from(env!("CARGO_BIN_EXE_spawnhook"))
}

/// Run spawnhook with given arguments and capture output
pub fn run_spawnhook(args: &[&str]) -> Output {
    Command::new(spawnhook_binary())
        .args(args)
        .env("RUST_LOG", "info")
        .output()
        .expect("failed to run spawnhook")
}

/// Write `yaml` to a temporary script file.
pub fn script_file(yaml: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("failed to create script file");
    file.write_all(yaml.as_bytes())
        .expect("failed to write script file");
    file
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Five launchable programs and one missing program per entry point,
/// with no settle delay.
pub const QUICK_SCRIPT: &str = r#"
settle_ms: 0
operations:
  - entry: posix_spawn
    command: "sleep 5"
  - entry: posix_spawn
    command: "uname -a"
  - entry: posix_spawn
    command: "cat /dev/null"
  - entry: posix_spawn
    command: "sh -c \"exit 0\""
  - entry: posix_spawn
    command: "true"
  - entry: posix_spawn
    command: app_that_doesnt_exist
  - entry: posix_spawnp
    command: "sleep 5"
  - entry: posix_spawnp
    command: id
  - entry: posix_spawnp
    command: "ls -la"
  - entry: posix_spawnp
    command: date
  - entry: posix_spawnp
    command: "true"
  - entry: posix_spawnp
    command: app_that_doesnt_exist
"#;
