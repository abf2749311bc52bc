//! Portable interception through an in-process import table.
//!
//! Callers invoke entry points through a [`DispatchTable`] instead of
//! the linked symbol. [`TableEngine`] redirects a slot by swapping the
//! address it holds, which works on any platform and architecture.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::debug;

use crate::engine::{InterceptionEngine, TransactionLog};
use crate::types::HookError;

#[derive(Debug)]
struct ImportSlot {
    symbol: String,
    original: usize,
    current: AtomicUsize,
}

/// Named function-pointer slots that callers dispatch through.
#[derive(Debug, Default)]
pub struct DispatchTable {
    slots: Vec<ImportSlot>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a slot whose original implementation lives at `address`.
    pub fn with_slot(mut self, symbol: &str, address: usize) -> Self {
        self.slots.push(ImportSlot {
            symbol: symbol.to_string(),
            original: address,
            current: AtomicUsize::new(address),
        });
        self
    }

    /// Build a table whose slots point at the process-wide definitions of `symbols`.
    pub fn resolve(symbols: &[&str]) -> Result<Self, HookError> {
        let mut table = Self::new();
        for symbol in symbols {
            let address = crate::module::find_global_export_by_name(symbol)?;
            debug!("Import table slot {} -> {:#x}", symbol, address);
            table = table.with_slot(symbol, address);
        }
        Ok(table)
    }

    fn slot(&self, symbol: &str) -> Option<&ImportSlot> {
        self.slots.iter().find(|s| s.symbol == symbol)
    }

    /// Address a call through `symbol` currently reaches.
    pub fn address(&self, symbol: &str) -> Option<usize> {
        self.slot(symbol).map(|s| s.current.load(Ordering::Acquire))
    }

    pub fn original(&self, symbol: &str) -> Option<usize> {
        self.slot(symbol).map(|s| s.original)
    }

    pub fn is_redirected(&self, symbol: &str) -> bool {
        self.slot(symbol)
            .is_some_and(|s| s.current.load(Ordering::Acquire) != s.original)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.symbol.as_str())
    }

    /// Load the slot for `symbol` as a callable function pointer.
    ///
    /// # Safety
    /// `F` must be a function pointer type matching the signature of
    /// whatever the slot holds.
    pub unsafe fn function<F: Copy>(&self, symbol: &str) -> Option<F> {
        assert_eq!(
            core::mem::size_of::<F>(),
            core::mem::size_of::<usize>(),
            "function() needs a pointer-sized function type"
        );
        let address = self.address(symbol)?;
        if address == 0 {
            return None;
        }
        Some(core::mem::transmute_copy::<usize, F>(&address))
    }
}

/// Interception engine backed by a shared [`DispatchTable`].
pub struct TableEngine {
    table: Arc<DispatchTable>,
    transaction: TransactionLog,
}

impl TableEngine {
    pub fn new(table: Arc<DispatchTable>) -> Self {
        Self {
            table,
            transaction: TransactionLog::default(),
        }
    }

    pub fn table(&self) -> &Arc<DispatchTable> {
        &self.table
    }
}

impl InterceptionEngine for TableEngine {
    fn name(&self) -> &'static str {
        "table"
    }

    fn begin_transaction(&mut self) {
        self.transaction.begin();
    }

    fn original(&self, target: &str) -> Result<usize, HookError> {
        self.table
            .original(target)
            .ok_or_else(|| HookError::SymbolNotFound(target.to_string()))
    }

    fn attach(&mut self, target: &str, replacement: usize) -> Result<usize, HookError> {
        self.transaction.ensure_open()?;
        let slot = self
            .table
            .slot(target)
            .ok_or_else(|| HookError::SymbolNotFound(target.to_string()))?;

        slot.current
            .compare_exchange(slot.original, replacement, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| HookError::AlreadyAttached(target.to_string()))?;

        debug!(
            "Redirected table slot {} from {:#x} to {:#x}",
            target, slot.original, replacement
        );
        self.transaction.record(target, replacement);
        Ok(slot.original)
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
        let Some(slot) = self.table.slot(target) else {
            return false;
        };
        let restored = slot
            .current
            .compare_exchange(replacement, slot.original, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if restored {
            debug!("Restored table slot {} to {:#x}", target, slot.original);
        }
        restored
    }
}
