//! Per-entry-point invocation counts.

use crate::entry::EntryPoint;
use crate::guard::SpinGuard;

#[derive(Debug, Default)]
struct CounterState {
    counts: [u64; EntryPoint::COUNT],
    installed: [bool; EntryPoint::COUNT],
}

/// Invocation counters shared between a registry and its interceptors.
///
/// A counter moves only while its entry point is marked installed, and
/// both the count and the installed flag change under the same guard.
#[derive(Debug, Default)]
pub struct InvocationCounters {
    state: SpinGuard<CounterState>,
}

impl InvocationCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one call to `entry`. Returns whether the call was counted.
    pub fn record(&self, entry: EntryPoint) -> bool {
        let mut state = self.state.lock();
        let i = entry.index();
        if !state.installed[i] {
            return false;
        }
        state.counts[i] += 1;
        true
    }

    pub fn get(&self, entry: EntryPoint) -> u64 {
        self.state.lock().counts[entry.index()]
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            counts: self.state.lock().counts,
        }
    }

    /// Zero every counter. Installed flags are left alone.
    pub fn reset(&self) {
        self.state.lock().counts = [0; EntryPoint::COUNT];
    }

    pub fn is_installed(&self, entry: EntryPoint) -> bool {
        self.state.lock().installed[entry.index()]
    }

    pub(crate) fn set_installed(&self, entry: EntryPoint, installed: bool) {
        self.state.lock().installed[entry.index()] = installed;
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    counts: [u64; EntryPoint::COUNT],
}

impl CounterSnapshot {
    pub fn get(&self, entry: EntryPoint) -> u64 {
        self.counts[entry.index()]
    }

    pub fn with_count(mut self, entry: EntryPoint, count: u64) -> Self {
        self.counts[entry.index()] = count;
        self
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryPoint, u64)> + '_ {
        EntryPoint::ALL.into_iter().map(|e| (e, self.get(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_ignored_until_installed() {
        let counters = InvocationCounters::new();
        assert!(!counters.record(EntryPoint::PosixSpawn));
        assert_eq!(counters.get(EntryPoint::PosixSpawn), 0);

        counters.set_installed(EntryPoint::PosixSpawn, true);
        assert!(counters.record(EntryPoint::PosixSpawn));
        assert!(counters.record(EntryPoint::PosixSpawn));
        assert!(!counters.record(EntryPoint::PosixSpawnp));

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.get(EntryPoint::PosixSpawn), 2);
        assert_eq!(snapshot.get(EntryPoint::PosixSpawnp), 0);
        assert_eq!(snapshot.total(), 2);
    }

    #[test]
    fn uninstalling_freezes_the_count() {
        let counters = InvocationCounters::new();
        counters.set_installed(EntryPoint::PosixSpawnp, true);
        counters.record(EntryPoint::PosixSpawnp);
        counters.set_installed(EntryPoint::PosixSpawnp, false);
        counters.record(EntryPoint::PosixSpawnp);
        assert_eq!(counters.get(EntryPoint::PosixSpawnp), 1);
    }

    #[test]
    fn reset_zeroes_counts_but_keeps_installed() {
        let counters = InvocationCounters::new();
        counters.set_installed(EntryPoint::PosixSpawn, true);
        counters.record(EntryPoint::PosixSpawn);
        counters.reset();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
        assert!(counters.is_installed(EntryPoint::PosixSpawn));
    }

    #[test]
    fn snapshot_with_count_overrides_one_entry() {
        let snapshot = CounterSnapshot::default()
            .with_count(EntryPoint::PosixSpawn, 5)
            .with_count(EntryPoint::PosixSpawnp, 4);
        let pairs: Vec<_> = snapshot.iter().collect();
        assert_eq!(
            pairs,
            vec![(EntryPoint::PosixSpawn, 5), (EntryPoint::PosixSpawnp, 4)]
        );
    }
}
