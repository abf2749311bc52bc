//! Comparing observed interception counts against the launches that
//! reached an entry point.

use std::fmt;

use serde::{Deserialize, Serialize};
use spawnhook_agent::{CounterSnapshot, EntryPoint};

use crate::harness::OperationRecord;

/// Exit status for a passing run.
pub const EXIT_PASS: u8 = 0;
/// Exit status for a failing verdict.
pub const EXIT_FAIL: u8 = 1;
/// Exit status when hooks could not be installed.
pub const EXIT_INSTALL_FAILED: u8 = 2;
/// Exit status for any other error.
pub const EXIT_FAULT: u8 = 3;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum VerdictMode {
    /// Every entry point must account for its own launches.
    #[default]
    PerEntry,
    /// Only the totals across entry points are compared.
    Aggregate,
}

impl fmt::Display for VerdictMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictMode::PerEntry => f.write_str("per-entry"),
            VerdictMode::Aggregate => f.write_str("aggregate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryResult {
    pub entry: EntryPoint,
    pub observed: u64,
    /// Launches through this entry point that reached it.
    pub expected: u64,
    /// Launches that failed before reaching it.
    pub skipped: u64,
}

impl EntryResult {
    pub fn accounted(&self) -> bool {
        self.observed >= self.expected
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    mode: VerdictMode,
    entries: Vec<EntryResult>,
    passed: bool,
}

impl Verdict {
    /// Parity or excess passes; any deficit fails.
    pub fn evaluate(
        mode: VerdictMode,
        observed: &CounterSnapshot,
        records: &[OperationRecord],
    ) -> Self {
        let entries: Vec<EntryResult> = EntryPoint::ALL
            .into_iter()
            .map(|entry| {
                let routed = records.iter().filter(|r| r.entry == entry);
                let expected = routed.clone().filter(|r| r.reached_entry).count() as u64;
                let skipped = routed.filter(|r| !r.reached_entry).count() as u64;
                EntryResult {
                    entry,
                    observed: observed.get(entry),
                    expected,
                    skipped,
                }
            })
            .collect();

        let passed = match mode {
            VerdictMode::PerEntry => entries.iter().all(EntryResult::accounted),
            VerdictMode::Aggregate => {
                let observed: u64 = entries.iter().map(|e| e.observed).sum();
                let expected: u64 = entries.iter().map(|e| e.expected).sum();
                observed >= expected
            }
        };

        Self {
            mode,
            entries,
            passed,
        }
    }

    pub fn mode(&self) -> VerdictMode {
        self.mode
    }

    pub fn entries(&self) -> &[EntryResult] {
        &self.entries
    }

    pub fn entry(&self, entry: EntryPoint) -> Option<&EntryResult> {
        self.entries.iter().find(|e| e.entry == entry)
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn exit_code(&self) -> u8 {
        if self.passed {
            EXIT_PASS
        } else {
            EXIT_FAIL
        }
    }
}
