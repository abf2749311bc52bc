//! The capability interface every interception backend implements.

use crate::types::HookError;

/// Redirects calls aimed at a named entry point toward a replacement.
///
/// Attachments are grouped into transactions. `original` looks up the
/// original-call pointer without redirecting anything, `attach` applies
/// the redirection immediately and hands that pointer back, and `abort` reverts everything attached since `begin_transaction`, so a
/// caller that hits an error mid-batch can return to the pre-batch state.
pub trait InterceptionEngine: Send {
    /// Short backend name used in logs and reports.
    fn name(&self) -> &'static str;

    fn begin_transaction(&mut self);

    /// Address through which the original implementation of `target` is
    /// reachable once it is redirected. Changes nothing.
    fn original(&self, target: &str) -> Result<usize, HookError>;

    /// Redirect `target` to `replacement`, returning the address through
    /// which the original implementation stays reachable.
    ///
    /// On error no redirection for `target` remains in place.
    fn attach(&mut self, target: &str, replacement: usize) -> Result<usize, HookError>;

    fn commit(&mut self) -> Result<(), HookError>;

    /// Revert every attachment made in the open transaction and close it.
    /// Calling this with no transaction open does nothing.
    fn abort(&mut self);

    /// Restore `target`. Returns `false` if nothing was attached there.
    fn detach(&mut self, target: &str, replacement: usize) -> bool;
}

impl<E: InterceptionEngine + ?Sized> InterceptionEngine for Box<E> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn begin_transaction(&mut self) {
        (**self).begin_transaction()
    }

    fn original(&self, target: &str) -> Result<usize, HookError> {
        (**self).original(target)
    }

    fn attach(&mut self, target: &str, replacement: usize) -> Result<usize, HookError> {
        (**self).attach(target, replacement)
    }

    fn commit(&mut self) -> Result<(), HookError> {
        (**self).commit()
    }

    fn abort(&mut self) {
        (**self).abort()
    }

    fn detach(&mut self, target: &str, replacement: usize) -> bool {
        (**self).detach(target, replacement)
    }
}

/// Bookkeeping shared by backends: which targets the open transaction touched.
#[derive(Debug, Default)]
pub(crate) struct TransactionLog {
    open: Option<Vec<(String, usize)>>,
}

impl TransactionLog {
    pub(crate) fn begin(&mut self) {
        if self.open.is_some() {
            log::warn!("begin_transaction while a transaction is open; keeping the open batch");
            return;
        }
        self.open = Some(Vec::new());
    }

    pub(crate) fn ensure_open(&self) -> Result<(), HookError> {
        if self.open.is_some() {
            Ok(())
        } else {
            Err(HookError::NoTransaction)
        }
    }

    pub(crate) fn record(&mut self, target: &str, replacement: usize) {
        if let Some(batch) = self.open.as_mut() {
            batch.push((target.to_string(), replacement));
        }
    }

    /// Close the transaction, returning its attachments newest first.
    pub(crate) fn close(&mut self) -> Result<Vec<(String, usize)>, HookError> {
        let mut batch = self.open.take().ok_or(HookError::NoTransaction)?;
        batch.reverse();
        Ok(batch)
    }

    pub(crate) fn take_for_abort(&mut self) -> Vec<(String, usize)> {
        self.close().unwrap_or_default()
    }
}
