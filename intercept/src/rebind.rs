//! Interception by rewriting the import slots (GOT) of every loaded module.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::engine::{InterceptionEngine, TransactionLog};
use crate::module;
use crate::types::{HookError, PatchedSlot};

struct Rebinding {
    replacement: usize,
    slots: Vec<PatchedSlot>,
}

/// Engine that redirects calls made through the dynamic linker's import slots.
///
/// Calls that reach the target by any other route (a direct call inside the
/// defining library, a pointer obtained through `dlsym`) are not redirected.
#[derive(Default)]
pub struct RebindEngine {
    rebinds: HashMap<String, Rebinding>,
    transaction: TransactionLog,
}

impl RebindEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attached(&self, target: &str) -> bool {
        self.rebinds.contains_key(target)
    }
}

impl InterceptionEngine for RebindEngine {
    fn name(&self) -> &'static str {
        "rebind"
    }

    fn begin_transaction(&mut self) {
        self.transaction.begin();
    }

    fn original(&self, target: &str) -> Result<usize, HookError> {
        module::find_global_export_by_name(target)
    }

    fn attach(&mut self, target: &str, replacement: usize) -> Result<usize, HookError> {
        self.transaction.ensure_open()?;
        if self.rebinds.contains_key(target) {
            return Err(HookError::AlreadyAttached(target.to_string()));
        }

        let original = module::find_global_export_by_name(target)?;
        let slots = unsafe { module::rebind_symbol(target, original, replacement)? };
        info!("Rebound {} in {} import slots", target, slots.len());

        self.rebinds
            .insert(target.to_string(), Rebinding { replacement, slots });
        self.transaction.record(target, replacement);
        Ok(original)
    }

    fn commit(&mut self) -> Result<(), HookError> {
        self.transaction.close().map(|_| ())
    }

    fn abort(&mut self) {
        for (target, replacement) in self.transaction.take_for_abort() {
            self.detach(&target, replacement);
        }
    }

    fn detach(&mut self, target: &str, replacement: usize) -> bool {
        match self.rebinds.get(target) {
            Some(rebinding) if rebinding.replacement == replacement => {}
            _ => return false,
        }
        let Some(rebinding) = self.rebinds.remove(target) else {
            return false;
        };
        if let Err(e) = unsafe { module::restore_slots(&rebinding.slots) } {
            warn!("Restoring {} left some slots rebound: {}", target, e);
        }
        debug!("Restored {} import slots for {}", rebinding.slots.len(), target);
        true
    }
}

impl Drop for RebindEngine {
    fn drop(&mut self) {
        let attached: Vec<(String, usize)> = self
            .rebinds
            .iter()
            .map(|(target, r)| (target.clone(), r.replacement))
            .collect();
        for (target, replacement) in attached {
            self.detach(&target, replacement);
        }
    }
}
