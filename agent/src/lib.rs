//! spawnhook-agent: counts calls to the process-spawn entry points.
//!
//! A [`HookRegistry`] installs interceptors for `posix_spawn` and
//! `posix_spawnp` through any [`spawnhook_intercept::InterceptionEngine`].
//! Each interceptor bumps its entry point's counter under a [`SpinGuard`]
//! and forwards the call, arguments and result untouched, to the original.

pub mod counters;
pub mod entry;
pub mod guard;
pub mod interceptor;
pub mod registry;

#[cfg(test)]
mod test_utils;

pub use counters::{CounterSnapshot, InvocationCounters};
pub use entry::{EntryPoint, PosixSpawnFn};
pub use guard::{SpinGuard, SpinGuardLock};
pub use interceptor::{hooked_posix_spawn, hooked_posix_spawnp, Dispatch};
pub use registry::{
    HookDescriptor, HookRegistry, InstallError, InstallState, InstalledHooks, Transaction,
    TransactionStatus,
};

/// Process-global lock for tests that publish interceptor dispatches.
///
/// Dispatch state is per entry point and process-wide, so two tests
/// installing the same entry point at once would route each other's calls.
#[cfg(test)]
pub(crate) fn lock_hook_tests() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
}
