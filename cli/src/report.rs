//! Textual summary of a verification run.

use std::fmt;

use crate::harness::OperationRecord;
use crate::verdict::Verdict;

#[derive(Debug, Clone)]
pub struct Report {
    records: Vec<OperationRecord>,
    verdict: Verdict,
}

impl Report {
    pub fn new(records: Vec<OperationRecord>, verdict: Verdict) -> Self {
        Self { records, verdict }
    }

    pub fn records(&self) -> &[OperationRecord] {
        &self.records
    }

    pub fn verdict(&self) -> &Verdict {
        &self.verdict
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let launched = self.records.iter().filter(|r| r.launched()).count();
        writeln!(f, "TEST RESULTS ({} verdict):", self.verdict.mode())?;
        writeln!(
            f,
            "  {} of {} operations started a process",
            launched,
            self.records.len()
        )?;
        for result in self.verdict.entries() {
            write!(
                f,
                "  {:<13} observed {:>3}, expected {:>3}",
                result.entry.symbol(),
                result.observed,
                result.expected
            )?;
            if result.skipped > 0 {
                write!(f, " ({} failed before the call)", result.skipped)?;
            }
            if !result.accounted() {
                write!(f, "  MISSING {}", result.expected - result.observed)?;
            }
            writeln!(f)?;
        }

        let failures: Vec<&OperationRecord> =
            self.records.iter().filter(|r| r.error.is_some()).collect();
        if !failures.is_empty() {
            writeln!(f, "Launch failures:")?;
            for record in failures {
                writeln!(
                    f,
                    "  {} \"{}\": {}",
                    record.entry,
                    record.command,
                    record.error.as_deref().unwrap_or_default()
                )?;
            }
        }

        if self.verdict.passed() {
            writeln!(f, "TEST PASS")
        } else {
            writeln!(f, "TEST FAIL")
        }
    }
}
