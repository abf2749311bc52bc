//! Symbol lookup and import-slot rebinding for loaded modules.

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::*;

#[cfg(not(target_os = "linux"))]
use crate::types::{HookError, PatchedSlot};

/// Resolve a symbol globally using `dlsym(RTLD_DEFAULT, ...)`.
#[cfg(all(unix, not(target_os = "linux")))]
pub fn find_global_export_by_name(symbol: &str) -> Result<usize, HookError> {
    let cstr = std::ffi::CString::new(symbol)
        .map_err(|_| HookError::SymbolNotFound(symbol.to_string()))?;
    let p = unsafe { libc::dlsym(libc::RTLD_DEFAULT, cstr.as_ptr()) };
    if p.is_null() {
        Err(HookError::SymbolNotFound(symbol.to_string()))
    } else {
        Ok(p as usize)
    }
}

#[cfg(not(unix))]
pub fn find_global_export_by_name(symbol: &str) -> Result<usize, HookError> {
    Err(HookError::SymbolNotFound(symbol.to_string()))
}

/// # Safety
/// Never touches memory on this platform.
#[cfg(not(target_os = "linux"))]
pub unsafe fn rebind_symbol(
    _symbol: &str,
    _original: usize,
    _replacement: usize,
) -> Result<Vec<PatchedSlot>, HookError> {
    Err(HookError::Unsupported)
}

/// # Safety
/// Never touches memory on this platform.
#[cfg(not(target_os = "linux"))]
pub unsafe fn restore_slots(_slots: &[PatchedSlot]) -> Result<(), HookError> {
    Err(HookError::Unsupported)
}
