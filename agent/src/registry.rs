//! Transactional installation and removal of spawn hooks.

use std::sync::Arc;

use log::{debug, info, warn};
use spawnhook_intercept::{HookError, InterceptionEngine};
use thiserror::Error;

use crate::counters::InvocationCounters;
use crate::entry::EntryPoint;
use crate::interceptor::{self, Dispatch};

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed hooking {target}: {source}")]
    Attach {
        target: &'static str,
        #[source]
        source: HookError,
    },

    #[error("failed committing hook installation: {0}")]
    Commit(#[source] HookError),

    #[error("{0} is already hooked")]
    AlreadyInstalled(&'static str),

    #[error("no hook installation is in progress")]
    NoTransaction,

    #[error("a hook installation is already in progress")]
    TransactionOpen,
}

impl InstallError {
    /// Symbol of the entry point whose installation failed, if one did.
    pub fn target(&self) -> Option<&'static str> {
        match self {
            InstallError::Attach { target, .. } | InstallError::AlreadyInstalled(target) => {
                Some(*target)
            }
            _ => None,
        }
    }
}

/// Lifecycle of the registry's hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Uninstalled,
    Installing,
    Installed,
    Detaching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Committed,
    Aborted,
}

/// One intercepted entry point.
#[derive(Debug)]
pub struct HookDescriptor {
    entry: EntryPoint,
    replacement: usize,
    dispatch: &'static Dispatch,
    installed: bool,
}

impl HookDescriptor {
    pub fn entry(&self) -> EntryPoint {
        self.entry
    }

    pub fn target(&self) -> &'static str {
        self.entry.symbol()
    }

    /// Where calls are forwarded after counting. Fixed at attach time.
    pub fn original(&self) -> usize {
        self.dispatch.original()
    }

    pub fn replacement(&self) -> usize {
        self.replacement
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }
}

/// A batch of attachments that is either installed whole or not at all.
#[derive(Debug)]
pub struct Transaction {
    pending: Vec<HookDescriptor>,
    status: TransactionStatus,
}

impl Transaction {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
            status: TransactionStatus::Pending,
        }
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn pending(&self) -> impl Iterator<Item = &HookDescriptor> {
        self.pending.iter()
    }
}

/// Owns the hook descriptors and the counters their interceptors update.
pub struct HookRegistry<E: InterceptionEngine> {
    engine: E,
    owner: usize,
    counters: Arc<InvocationCounters>,
    descriptors: Vec<HookDescriptor>,
    transaction: Option<Transaction>,
    last_status: Option<TransactionStatus>,
    state: InstallState,
}

impl<E: InterceptionEngine> HookRegistry<E> {
    /// Create a registry with fresh, zeroed counters.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            owner: interceptor::next_owner(),
            counters: Arc::new(InvocationCounters::new()),
            descriptors: Vec::new(),
            transaction: None,
            last_status: None,
            state: InstallState::Uninstalled,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn counters(&self) -> &Arc<InvocationCounters> {
        &self.counters
    }

    pub fn state(&self) -> InstallState {
        self.state
    }

    /// Status of the open transaction, or of the last one to finish.
    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        self.transaction
            .as_ref()
            .map(Transaction::status)
            .or(self.last_status)
    }

    pub fn installed_count(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_installed(&self, entry: EntryPoint) -> bool {
        self.descriptors.iter().any(|d| d.entry == entry)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &HookDescriptor> {
        self.descriptors.iter()
    }

    fn settled_state(&self) -> InstallState {
        if self.descriptors.is_empty() {
            InstallState::Uninstalled
        } else {
            InstallState::Installed
        }
    }

    pub fn begin_transaction(&mut self) -> Result<(), InstallError> {
        if self.transaction.is_some() {
            return Err(InstallError::TransactionOpen);
        }
        debug!("Beginning hook transaction ({} engine)", self.engine.name());
        self.engine.begin_transaction();
        self.transaction = Some(Transaction::new());
        self.state = InstallState::Installing;
        Ok(())
    }

    /// Add `entry` to the open transaction and redirect it.
    ///
    /// The dispatch is published before the engine redirects, so no call
    /// can reach the replacement ahead of it. An entry point another live
    /// registry holds is refused with [`InstallError::AlreadyInstalled`].
    ///
    /// Any failure aborts the whole transaction: entries attached earlier
    /// in the batch are detached before the error is returned.
    pub fn attach(&mut self, entry: EntryPoint) -> Result<(), InstallError> {
        let Some(transaction) = self.transaction.as_ref() else {
            return Err(InstallError::NoTransaction);
        };
        if self.is_installed(entry) || transaction.pending.iter().any(|d| d.entry == entry) {
            self.rollback();
            return Err(InstallError::AlreadyInstalled(entry.symbol()));
        }

        let original = match self.engine.original(entry.symbol()) {
            Ok(original) => original,
            Err(source) => return Err(self.abort_attach(entry, source)),
        };
        let dispatch = match Dispatch::publish(entry, self.owner, original, self.counters.clone()) {
            Ok(dispatch) => dispatch,
            Err(owner) => {
                warn!("{} is already hooked by registry {}", entry, owner);
                self.rollback();
                return Err(InstallError::AlreadyInstalled(entry.symbol()));
            }
        };

        let replacement = entry.replacement();
        let dispatch = match self.engine.attach(entry.symbol(), replacement) {
            Ok(attached) if attached == original => dispatch,
            Ok(attached) => {
                debug!(
                    "{} engine forwards {} through {:#x}, not {:#x}",
                    self.engine.name(),
                    entry,
                    attached,
                    original
                );
                Dispatch::publish(entry, self.owner, attached, self.counters.clone())
                    .unwrap_or(dispatch)
            }
            Err(source) => {
                Dispatch::release(entry, self.owner);
                return Err(self.abort_attach(entry, source));
            }
        };
        debug!(
            "Attached {} (original {:#x}, replacement {:#x})",
            entry,
            dispatch.original(),
            replacement
        );
        if let Some(transaction) = self.transaction.as_mut() {
            transaction.pending.push(HookDescriptor {
                entry,
                replacement,
                dispatch,
                installed: false,
            });
        }
        Ok(())
    }

    fn abort_attach(&mut self, entry: EntryPoint, source: HookError) -> InstallError {
        warn!("Failed hooking {}: {}", entry, source);
        self.rollback();
        InstallError::Attach {
            target: entry.symbol(),
            source,
        }
    }

    /// Finalize the open transaction and mark its descriptors installed.
    pub fn commit(&mut self) -> Result<(), InstallError> {
        if self.transaction.is_none() {
            return Err(InstallError::NoTransaction);
        }
        if let Err(e) = self.engine.commit() {
            self.rollback();
            return Err(InstallError::Commit(e));
        }

        let Some(mut transaction) = self.transaction.take() else {
            return Err(InstallError::NoTransaction);
        };
        for mut descriptor in transaction.pending.drain(..) {
            self.counters.set_installed(descriptor.entry, true);
            descriptor.installed = true;
            self.descriptors.push(descriptor);
        }
        transaction.status = TransactionStatus::Committed;
        self.last_status = Some(transaction.status);
        self.state = self.settled_state();
        info!("Installed {} hooks", self.descriptors.len());
        Ok(())
    }

    /// Attach every entry in `entries` as one transaction.
    pub fn install(&mut self, entries: &[EntryPoint]) -> Result<(), InstallError> {
        self.begin_transaction()?;
        for &entry in entries {
            self.attach(entry)?;
        }
        self.commit()
    }

    /// Like [`install`](Self::install), returning a guard that detaches on drop.
    pub fn install_scoped(
        &mut self,
        entries: &[EntryPoint],
    ) -> Result<InstalledHooks<'_, E>, InstallError> {
        self.install(entries)?;
        Ok(InstalledHooks { registry: self })
    }

    fn rollback(&mut self) {
        let Some(mut transaction) = self.transaction.take() else {
            return;
        };
        while let Some(descriptor) = transaction.pending.pop() {
            self.engine.detach(descriptor.target(), descriptor.replacement);
            Dispatch::release(descriptor.entry, self.owner);
            debug!("Rolled back {}", descriptor.entry);
        }
        self.engine.abort();
        transaction.status = TransactionStatus::Aborted;
        self.last_status = Some(transaction.status);
        self.state = self.settled_state();
    }

    /// Remove the hook on `entry`. Not installed is a no-op.
    pub fn detach(&mut self, entry: EntryPoint) -> bool {
        let Some(pos) = self.descriptors.iter().position(|d| d.entry == entry) else {
            return false;
        };
        self.state = InstallState::Detaching;
        let descriptor = self.descriptors.remove(pos);
        self.counters.set_installed(entry, false);
        if !self.engine.detach(descriptor.target(), descriptor.replacement) {
            warn!("Engine had nothing attached for {}", entry);
        }
        Dispatch::release(entry, self.owner);
        self.state = self.settled_state();
        debug!("Detached {}", entry);
        true
    }

    /// Remove every installed hook, newest first. Returns how many were removed.
    pub fn detach_all(&mut self) -> usize {
        if self.descriptors.is_empty() {
            return 0;
        }
        info!("Removing {} hooks", self.descriptors.len());
        let entries: Vec<EntryPoint> = self.descriptors.iter().rev().map(|d| d.entry).collect();
        entries.into_iter().filter(|&e| self.detach(e)).count()
    }
}

impl<E: InterceptionEngine> Drop for HookRegistry<E> {
    fn drop(&mut self) {
        self.rollback();
        self.detach_all();
    }
}

/// Hooks installed by [`HookRegistry::install_scoped`]; detached on drop,
/// including while unwinding.
pub struct InstalledHooks<'a, E: InterceptionEngine> {
    registry: &'a mut HookRegistry<E>,
}

impl<E: InterceptionEngine> InstalledHooks<'_, E> {
    pub fn counters(&self) -> &Arc<InvocationCounters> {
        self.registry.counters()
    }

    pub fn registry(&self) -> &HookRegistry<E> {
        self.registry
    }

    /// Detach now and return the counts observed while installed.
    pub fn finish(self) -> crate::counters::CounterSnapshot {
        self.registry.detach_all();
        self.registry.counters().snapshot()
    }
}

impl<E: InterceptionEngine> Drop for InstalledHooks<'_, E> {
    fn drop(&mut self) {
        self.registry.detach_all();
    }
}
