//! spawnhook-intercept: in-process function interception engines.
//!
//! Two backends implement [`InterceptionEngine`]:
//! - [`RebindEngine`] rewrites ELF import slots (Linux).
//! - [`TableEngine`] swaps slots of a [`DispatchTable`] callers go through.

pub mod engine;
pub mod fault;
pub mod module;
pub mod rebind;
pub mod table;
pub mod types;

pub use engine::InterceptionEngine;
pub use fault::FailingEngine;
pub use rebind::RebindEngine;
pub use table::{DispatchTable, TableEngine};
pub use types::{HookError, PatchedSlot};

/// Process-global lock for tests that rebind import slots.
///
/// Two tests rebinding the same symbol concurrently would record each
/// other's replacement as the value to restore.
#[cfg(test)]
pub(crate) fn lock_hook_tests() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
}
