use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("symbol `{0}` could not be resolved")]
    SymbolNotFound(String),

    #[error("no loaded module imports `{0}`")]
    NoImportSlots(String),

    #[error("`{0}` is already attached")]
    AlreadyAttached(String),

    #[error("failed to make {0:#x} writable")]
    ProtectionFailed(usize),

    #[error("no interception transaction is open")]
    NoTransaction,

    #[error("attach of `{0}` rejected by fault injection")]
    Injected(String),

    #[error("interception is not supported on this platform")]
    Unsupported,
}

/// One rewritten pointer-sized slot: where it lives and what it held before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchedSlot {
    pub address: usize,
    pub previous: usize,
}
