//! Fault injection for exercising installation-failure paths.

use log::warn;

use crate::engine::InterceptionEngine;
use crate::types::HookError;

/// Wraps an engine and rejects every attach of one chosen target.
pub struct FailingEngine<E> {
    inner: E,
    fail_target: String,
}

impl<E: InterceptionEngine> FailingEngine<E> {
    pub fn new(inner: E, fail_target: impl Into<String>) -> Self {
        Self {
            inner,
            fail_target: fail_target.into(),
        }
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

impl<E: InterceptionEngine> InterceptionEngine for FailingEngine<E> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn begin_transaction(&mut self) {
        self.inner.begin_transaction()
    }

    fn original(&self, target: &str) -> Result<usize, HookError> {
        self.inner.original(target)
    }

    fn attach(&mut self, target: &str, replacement: usize) -> Result<usize, HookError> {
        if target == self.fail_target {
            warn!("Injecting attach failure for {}", target);
            return Err(HookError::Injected(target.to_string()));
        }
        self.inner.attach(target, replacement)
    }

    fn commit(&mut self) -> Result<(), HookError> {
        self.inner.commit()
    }

    fn abort(&mut self) {
        self.inner.abort()
    }

    fn detach(&mut self, target: &str, replacement: usize) -> bool {
        self.inner.detach(target, replacement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{DispatchTable, TableEngine};
    use std::sync::Arc;

    extern "C" fn noop() -> i32 {
        1
    }

    extern "C" fn other() -> i32 {
        2
    }

    #[test]
    fn only_the_chosen_target_fails() {
        let table = Arc::new(
            DispatchTable::new()
                .with_slot("a", noop as usize)
                .with_slot("b", noop as usize),
        );
        let mut engine = FailingEngine::new(TableEngine::new(table.clone()), "b");
        engine.begin_transaction();
        assert!(engine.attach("a", other as usize).is_ok());
        assert_eq!(
            engine.attach("b", other as usize),
            Err(HookError::Injected("b".into()))
        );
        assert!(!table.is_redirected("b"));
        engine.abort();
        assert!(!table.is_redirected("a"));
    }
}
