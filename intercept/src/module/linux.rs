use crate::types::{HookError, PatchedSlot};
use core::ffi::c_void;
use std::ffi::CStr;

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Resolve a symbol globally (across all loaded modules) using `dlsym(RTLD_DEFAULT, ...)`.
///
/// `dlsym` answers from the dynamic linker's symbol tables, so the result is
/// the real definition even while import slots are rebound.
pub fn find_global_export_by_name(symbol: &str) -> Result<usize, HookError> {
    let cstr = std::ffi::CString::new(symbol)
        .map_err(|_| HookError::SymbolNotFound(symbol.to_string()))?;
    unsafe {
        let p = libc::dlsym(libc::RTLD_DEFAULT, cstr.as_ptr());
        if p.is_null() {
            Err(HookError::SymbolNotFound(symbol.to_string()))
        } else {
            Ok(p as usize)
        }
    }
}

/// Resolve which module an address belongs to via `dladdr`.
pub fn resolve_address_module(address: usize) -> Option<String> {
    unsafe {
        let mut info: libc::Dl_info = core::mem::zeroed();
        if libc::dladdr(address as *const c_void, &mut info) == 0 {
            return None;
        }
        if info.dli_fname.is_null() {
            return None;
        }
        let path = CStr::from_ptr(info.dli_fname).to_string_lossy();
        Some(basename(&path).to_string())
    }
}

// ELF dynamic section layout, just enough to find relocation tables.
mod elf {
    pub const DT_NULL: i64 = 0;
    pub const DT_PLTRELSZ: i64 = 2;
    pub const DT_STRTAB: i64 = 5;
    pub const DT_SYMTAB: i64 = 6;
    pub const DT_RELA: i64 = 7;
    pub const DT_RELASZ: i64 = 8;
    pub const DT_JMPREL: i64 = 23;

    pub const RELA_ENTRY_SIZE: usize = 24;

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct Elf64Dyn {
        pub d_tag: i64,
        pub d_val: u64,
    }
}

unsafe fn make_writable(address: usize, page_sz: usize) -> bool {
    let page = address & !(page_sz - 1);
    libc::mprotect(
        page as *mut libc::c_void,
        page_sz,
        libc::PROT_READ | libc::PROT_WRITE,
    ) == 0
}

/// Rebind `symbol` via ELF GOT patching.
///
/// Scans the `.got`/`.got.plt` relocations of every loaded module for
/// slots holding `original` and rewrites them to `replacement`. Either
/// every matching slot is rewritten or, on a protection failure, the ones
/// already rewritten are put back before the error is returned.
///
/// # Safety
/// `replacement` must point to a function with the same signature as `symbol`.
pub unsafe fn rebind_symbol(
    symbol: &str,
    original: usize,
    replacement: usize,
) -> Result<Vec<PatchedSlot>, HookError> {
    struct Ctx {
        original: usize,
        replacement: usize,
        page_sz: usize,
        patched: Vec<PatchedSlot>,
        failed_at: Option<usize>,
    }

    unsafe extern "C" fn callback(
        info: *mut libc::dl_phdr_info,
        _size: libc::size_t,
        data: *mut c_void,
    ) -> libc::c_int {
        let ctx = &mut *(data as *mut Ctx);
        let info = &*info;
        let base = info.dlpi_addr as usize;

        let phdrs = core::slice::from_raw_parts(info.dlpi_phdr, info.dlpi_phnum as usize);

        let mut dynamic_ptr: *const elf::Elf64Dyn = core::ptr::null();
        for phdr in phdrs {
            if phdr.p_type == libc::PT_DYNAMIC {
                dynamic_ptr = (base as u64 + phdr.p_vaddr) as *const elf::Elf64Dyn;
                break;
            }
        }
        if dynamic_ptr.is_null() {
            return 0;
        }

        let mut jmprel_val: u64 = 0;
        let mut jmprel_size: usize = 0;
        let mut rela_val: u64 = 0;
        let mut rela_size: usize = 0;
        let mut symtab_val: u64 = 0;
        let mut strtab_val: u64 = 0;

        let mut dyn_entry = dynamic_ptr;
        loop {
            let entry = &*dyn_entry;
            if entry.d_tag == elf::DT_NULL {
                break;
            }
            match entry.d_tag {
                elf::DT_JMPREL => jmprel_val = entry.d_val,
                elf::DT_PLTRELSZ => jmprel_size = entry.d_val as usize,
                elf::DT_RELA => rela_val = entry.d_val,
                elf::DT_RELASZ => rela_size = entry.d_val as usize,
                elf::DT_SYMTAB => symtab_val = entry.d_val,
                elf::DT_STRTAB => strtab_val = entry.d_val,
                _ => {}
            }
            dyn_entry = dyn_entry.add(1);
        }

        // The loader relocates DT_* pointers in place for most modules but
        // not for the vDSO; pristine values are still module-relative.
        let base_u64 = info.dlpi_addr;
        let adjusted = symtab_val > base_u64 || strtab_val > base_u64;
        let resolve = |val: u64| -> *const u8 {
            if val == 0 {
                core::ptr::null()
            } else if adjusted {
                val as *const u8
            } else {
                (base_u64 + val) as *const u8
            }
        };

        for (rel_ptr, rel_size) in [(resolve(jmprel_val), jmprel_size), (resolve(rela_val), rela_size)] {
            if rel_ptr.is_null() || rel_size == 0 {
                continue;
            }

            for i in 0..rel_size / elf::RELA_ENTRY_SIZE {
                let entry = rel_ptr.add(i * elf::RELA_ENTRY_SIZE);
                let r_offset = *(entry as *const u64);

                let got_addr = base + r_offset as usize;
                let got_slot = got_addr as *mut usize;
                let current_value = core::ptr::read_unaligned(got_slot);
                if current_value != ctx.original {
                    continue;
                }

                if !make_writable(got_addr, ctx.page_sz) {
                    ctx.failed_at = Some(got_addr);
                    return 1;
                }
                core::ptr::write_unaligned(got_slot, ctx.replacement);
                ctx.patched.push(PatchedSlot {
                    address: got_addr,
                    previous: current_value,
                });
            }
        }

        0
    }

    let mut ctx = Ctx {
        original,
        replacement,
        page_sz: page_size(),
        patched: Vec::new(),
        failed_at: None,
    };

    libc::dl_iterate_phdr(Some(callback), &mut ctx as *mut Ctx as *mut c_void);

    if let Some(address) = ctx.failed_at {
        let _ = restore_slots(&ctx.patched);
        return Err(HookError::ProtectionFailed(address));
    }
    if ctx.patched.is_empty() {
        return Err(HookError::NoImportSlots(symbol.to_string()));
    }

    for slot in &ctx.patched {
        log::debug!(
            "Rebound {} slot {:#x} in {}",
            symbol,
            slot.address,
            resolve_address_module(slot.address).unwrap_or_else(|| "[unknown]".into())
        );
    }
    Ok(ctx.patched)
}

/// Write back the values recorded by [`rebind_symbol`].
///
/// # Safety
/// `slots` must come from a successful [`rebind_symbol`] call in this process.
pub unsafe fn restore_slots(slots: &[PatchedSlot]) -> Result<(), HookError> {
    let page_sz = page_size();
    let mut result = Ok(());
    for slot in slots.iter().rev() {
        if !make_writable(slot.address, page_sz) {
            result = Err(HookError::ProtectionFailed(slot.address));
            continue;
        }
        core::ptr::write_unaligned(slot.address as *mut usize, slot.previous);
    }
    result
}
