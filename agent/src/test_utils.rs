//! Shared test utilities for the agent crate.

use std::ffi::{CStr, CString};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::entry::PosixSpawnFn;

/// Number of times any fake spawn ran.
pub static FAKE_SPAWN_CALLS: AtomicUsize = AtomicUsize::new(0);

/// Stand-in for `posix_spawn`: fails with ENOENT for paths containing
/// "missing", otherwise reports a pid derived from the path length.
pub unsafe extern "C" fn fake_spawn(
    pid: *mut libc::pid_t,
    path: *const libc::c_char,
    _file_actions: *const libc::posix_spawn_file_actions_t,
    _attrp: *const libc::posix_spawnattr_t,
    _argv: *const *mut libc::c_char,
    _envp: *const *mut libc::c_char,
) -> libc::c_int {
    FAKE_SPAWN_CALLS.fetch_add(1, Ordering::SeqCst);
    let path = CStr::from_ptr(path).to_string_lossy();
    if path.contains("missing") {
        return libc::ENOENT;
    }
    if !pid.is_null() {
        *pid = 1000 + path.len() as libc::pid_t;
    }
    0
}

/// Second stand-in so the two table slots hold distinct originals.
pub unsafe extern "C" fn fake_spawnp(
    pid: *mut libc::pid_t,
    file: *const libc::c_char,
    file_actions: *const libc::posix_spawn_file_actions_t,
    attrp: *const libc::posix_spawnattr_t,
    argv: *const *mut libc::c_char,
    envp: *const *mut libc::c_char,
) -> libc::c_int {
    let rc = fake_spawn(pid, file, file_actions, attrp, argv, envp);
    if rc == 0 && !pid.is_null() {
        *pid += 1000;
    }
    rc
}

/// Owned argument block for calling a spawn function.
pub struct SpawnArgs {
    path: CString,
    _argv_storage: Vec<CString>,
    argv: Vec<*mut libc::c_char>,
    envp: Vec<*mut libc::c_char>,
    pub pid: libc::pid_t,
}

pub fn spawn_args(path: &str) -> SpawnArgs {
    let path = CString::new(path).unwrap();
    let storage = vec![path.clone()];
    let mut argv: Vec<*mut libc::c_char> =
        storage.iter().map(|s| s.as_ptr() as *mut libc::c_char).collect();
    argv.push(ptr::null_mut());
    SpawnArgs {
        path,
        _argv_storage: storage,
        argv,
        envp: vec![ptr::null_mut()],
        pid: 0,
    }
}

impl SpawnArgs {
    /// # Safety
    /// `f` must follow the `posix_spawn` contract.
    pub unsafe fn call(&mut self, f: PosixSpawnFn) -> libc::c_int {
        f(
            &mut self.pid,
            self.path.as_ptr(),
            ptr::null(),
            ptr::null(),
            self.argv.as_ptr(),
            self.envp.as_ptr(),
        )
    }
}
