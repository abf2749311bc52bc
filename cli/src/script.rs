//! Launch scripts: the ordered operations a verification run performs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spawnhook_agent::EntryPoint;
use thiserror::Error;

use crate::shell_format::{split_command, CommandError};
use crate::verdict::VerdictMode;

/// Pause before each launch and before terminating each child.
pub const DEFAULT_SETTLE_MS: u64 = 500;

const MISSING_PROGRAM: &str = "app_that_doesnt_exist";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed reading script {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid script: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("script has no operations")]
    Empty,

    #[error("operation {index} ({command:?}) contains a null byte")]
    NulByte { index: usize, command: String },

    #[error("operation {index} ({command:?}): {source}")]
    Command {
        index: usize,
        command: String,
        #[source]
        source: CommandError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptedOperation {
    pub entry: EntryPoint,
    pub command: String,
}

impl ScriptedOperation {
    pub fn new(entry: EntryPoint, command: impl Into<String>) -> Self {
        Self {
            entry,
            command: command.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default)]
    pub verdict: VerdictMode,
    pub operations: Vec<ScriptedOperation>,
}

fn default_settle_ms() -> u64 {
    DEFAULT_SETTLE_MS
}

impl Script {
    /// Five launchable commands and one missing program per entry point.
    pub fn builtin() -> Self {
        let spawn = [
            "sleep 5",
            "uname -a",
            r#"find . -maxdepth 1 -name "README*""#,
            "cat /dev/null",
            r#"sh -c "exit 0""#,
            MISSING_PROGRAM,
        ];
        let spawnp = [
            "sleep 5",
            "id",
            "ls -la",
            "date",
            r#"grep -s README README.md"#,
            MISSING_PROGRAM,
        ];

        let operations = spawn
            .iter()
            .map(|c| ScriptedOperation::new(EntryPoint::PosixSpawn, *c))
            .chain(
                spawnp
                    .iter()
                    .map(|c| ScriptedOperation::new(EntryPoint::PosixSpawnp, *c)),
            )
            .collect();

        Self {
            settle_ms: DEFAULT_SETTLE_MS,
            verdict: VerdictMode::default(),
            operations,
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ScriptError> {
        let script: Script = serde_yaml::from_str(yaml)?;
        script.validate()?;
        Ok(script)
    }

    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ScriptError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String, ScriptError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check that there is something to run and every command tokenizes
    /// into arguments a C argv can hold.
    pub fn validate(&self) -> Result<(), ScriptError> {
        if self.operations.is_empty() {
            return Err(ScriptError::Empty);
        }
        for (index, op) in self.operations.iter().enumerate() {
            if op.command.contains('\0') {
                return Err(ScriptError::NulByte {
                    index,
                    command: op.command.clone(),
                });
            }
            split_command(&op.command).map_err(|source| ScriptError::Command {
                index,
                command: op.command.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_five_valid_and_one_missing_per_entry() {
        let script = Script::builtin();
        script.validate().unwrap();
        for entry in EntryPoint::ALL {
            let ops: Vec<_> = script.operations.iter().filter(|o| o.entry == entry).collect();
            assert_eq!(ops.len(), 6);
            assert_eq!(ops.last().unwrap().command, MISSING_PROGRAM);
        }
    }

    #[test]
    fn parses_yaml_with_defaults() {
        let script = Script::from_yaml(
            r#"
operations:
  - entry: posix_spawnp
    command: "sleep 5"
"#,
        )
        .unwrap();
        assert_eq!(script.settle_ms, DEFAULT_SETTLE_MS);
        assert_eq!(script.verdict, VerdictMode::PerEntry);
        assert_eq!(
            script.operations,
            vec![ScriptedOperation::new(EntryPoint::PosixSpawnp, "sleep 5")]
        );
    }

    #[test]
    fn parses_explicit_settings() {
        let script = Script::from_yaml(
            r#"
settle_ms: 0
verdict: aggregate
operations:
  - entry: posix_spawn
    command: "true"
"#,
        )
        .unwrap();
        assert_eq!(script.settle(), Duration::ZERO);
        assert_eq!(script.verdict, VerdictMode::Aggregate);
    }

    #[test]
    fn builtin_survives_yaml() {
        let script = Script::builtin();
        let yaml = script.to_yaml().unwrap();
        assert_eq!(Script::from_yaml(&yaml).unwrap(), script);
    }

    #[test]
    fn rejects_bad_scripts() {
        assert!(matches!(
            Script::from_yaml("operations: []"),
            Err(ScriptError::Empty)
        ));
        assert!(matches!(
            Script::from_yaml("operations:\n  - entry: CreateProcessA\n    command: x\n"),
            Err(ScriptError::Parse(_))
        ));
        assert!(matches!(
            Script::from_yaml("operations:\n  - entry: posix_spawn\n    command: '\"open'\n"),
            Err(ScriptError::Command { index: 0, .. })
        ));
        assert!(matches!(
            Script::from_yaml(
                r#"
operations:
  - entry: posix_spawn
    command: "true"
  - entry: posix_spawn
    command: "true a\0b"
"#
            ),
            Err(ScriptError::NulByte { index: 1, .. })
        ));
        assert!(matches!(
            Script::from_yaml("operations: []\nextra: 1\n"),
            Err(ScriptError::Parse(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Script::load(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, ScriptError::Read { .. }));
    }
}
