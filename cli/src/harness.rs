//! Running a launch script under installed hooks.

use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use spawnhook_agent::{EntryPoint, HookRegistry, InstallError};
use spawnhook_intercept::InterceptionEngine;
use thiserror::Error;

use crate::launcher::{LaunchError, Launcher};
use crate::report::Report;
use crate::script::{Script, ScriptedOperation};
use crate::verdict::{Verdict, VerdictMode, EXIT_INSTALL_FAILED};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("operation {index} ({command:?}) could not be launched: {source}")]
    Launch {
        index: usize,
        command: String,
        #[source]
        source: LaunchError,
    },

    #[error("failed terminating process {pid}: {source}")]
    Terminate {
        pid: libc::pid_t,
        #[source]
        source: std::io::Error,
    },
}

/// What happened to one scripted operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    pub entry: EntryPoint,
    pub command: String,
    pub pid: Option<libc::pid_t>,
    /// The entry point was called, whatever it returned.
    pub reached_entry: bool,
    pub terminated: bool,
    pub error: Option<String>,
}

impl OperationRecord {
    pub fn launched(&self) -> bool {
        self.pid.is_some()
    }
}

/// A launched child, killed and reaped when dropped.
pub struct ChildProcess<'a, L: Launcher + ?Sized> {
    launcher: &'a L,
    pid: libc::pid_t,
    reaped: bool,
}

impl<'a, L: Launcher + ?Sized> ChildProcess<'a, L> {
    pub fn new(launcher: &'a L, pid: libc::pid_t) -> Self {
        Self {
            launcher,
            pid,
            reaped: false,
        }
    }

    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    pub fn terminate(mut self) -> std::io::Result<()> {
        self.reaped = true;
        self.launcher.terminate(self.pid)
    }
}

impl<L: Launcher + ?Sized> Drop for ChildProcess<'_, L> {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if let Err(e) = self.launcher.terminate(self.pid) {
            warn!("Failed terminating process {}: {}", self.pid, e);
        }
    }
}

/// Performs scripted launches one at a time.
pub struct Harness<L: Launcher> {
    launcher: L,
    settle: Duration,
}

impl<L: Launcher> Harness<L> {
    pub fn new(launcher: L, settle: Duration) -> Self {
        Self { launcher, settle }
    }

    /// Run every operation in order.
    ///
    /// A command that cannot be launched is recorded as a failed attempt
    /// and the script continues. Only a launcher that has no route to the
    /// entry point stops the run.
    pub fn run(
        &self,
        operations: &[ScriptedOperation],
    ) -> Result<Vec<OperationRecord>, HarnessError> {
        let mut records = Vec::with_capacity(operations.len());
        for (index, op) in operations.iter().enumerate() {
            records.push(self.run_one(index, op)?);
        }
        Ok(records)
    }

    fn run_one(
        &self,
        index: usize,
        op: &ScriptedOperation,
    ) -> Result<OperationRecord, HarnessError> {
        self.settle();
        info!("Calling {} with \"{}\"", op.entry, op.command);

        let mut record = OperationRecord {
            entry: op.entry,
            command: op.command.clone(),
            pid: None,
            reached_entry: false,
            terminated: false,
            error: None,
        };

        let launch = match self.launcher.launch(op.entry, &op.command) {
            Ok(launch) => launch,
            Err(source @ LaunchError::NoSlot(_)) => {
                return Err(HarnessError::Launch {
                    index,
                    command: op.command.clone(),
                    source,
                })
            }
            Err(e) => {
                warn!("Failed running \"{}\": {}", op.command, e);
                record.reached_entry = e.reached_entry();
                record.error = Some(e.to_string());
                return Ok(record);
            }
        };

        info!("Created process ID {}", launch.pid);
        record.pid = Some(launch.pid);
        record.reached_entry = true;

        let child = ChildProcess::new(&self.launcher, launch.pid);
        self.settle();
        info!("Killing process ID {}", child.pid());
        child
            .terminate()
            .map_err(|source| HarnessError::Terminate {
                pid: launch.pid,
                source,
            })?;
        record.terminated = true;
        Ok(record)
    }

    fn settle(&self) {
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
    }
}

/// Result of a verification run that did not fault.
#[derive(Debug)]
pub enum Outcome {
    Completed(Report),
    InstallFailed(InstallError),
}

impl Outcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::Completed(report) => report.verdict().exit_code(),
            Outcome::InstallFailed(_) => EXIT_INSTALL_FAILED,
        }
    }
}

/// Install every entry point, run `script`, detach, then judge the counts.
///
/// Hooks are detached before this returns on every path, including a
/// harness error.
pub fn run_verification<E, L>(
    registry: &mut HookRegistry<E>,
    harness: &Harness<L>,
    script: &Script,
    mode: VerdictMode,
) -> Result<Outcome, HarnessError>
where
    E: InterceptionEngine,
    L: Launcher,
{
    info!("Installing API hooks");
    let hooks = match registry.install_scoped(&EntryPoint::ALL) {
        Ok(hooks) => hooks,
        Err(e) => {
            error!("{}", e);
            return Ok(Outcome::InstallFailed(e));
        }
    };

    info!(
        "Running {} operations ({:?} settle)",
        script.operations.len(),
        harness.settle
    );
    let records = harness.run(&script.operations)?;

    info!("Removing API hooks");
    let observed = hooks.finish();
    debug!("Observed counts: {:?}", observed);

    let verdict = Verdict::evaluate(mode, &observed, &records);
    let report = Report::new(records, verdict);
    debug!(
        "{} of {} operations reached an entry point",
        report.records().iter().filter(|r| r.reached_entry).count(),
        report.records().len()
    );
    for entry in EntryPoint::ALL {
        if let Some(result) = report.verdict().entry(entry).filter(|r| !r.accounted()) {
            warn!(
                "{} hook saw {} of {} calls",
                entry, result.observed, result.expected
            );
        }
    }
    Ok(Outcome::Completed(report))
}
