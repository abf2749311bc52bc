//! Replacement functions installed in place of the spawn entry points.
//!
//! An engine redirects a caller to a bare `extern "C"` function that has
//! no way to receive context, so each entry point has one published
//! [`Dispatch`] holding the original-call pointer and the counters of the
//! registry that installed it. Only one registry at a time may own an
//! entry point's dispatch; it claims the entry before publishing and
//! releases it after restoring the original. Dispatches are leaked: a
//! thread may still be inside a replacement after its registry detached
//! and went away.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::counters::InvocationCounters;
use crate::entry::{EntryPoint, PosixSpawnFn};

static DISPATCH: [AtomicPtr<Dispatch>; EntryPoint::COUNT] =
    [AtomicPtr::new(ptr::null_mut()), AtomicPtr::new(ptr::null_mut())];

/// Owner id per entry point; `UNCLAIMED` when no registry holds it.
static OWNER: [AtomicUsize; EntryPoint::COUNT] = [AtomicUsize::new(0), AtomicUsize::new(0)];

const UNCLAIMED: usize = 0;

static NEXT_OWNER: AtomicUsize = AtomicUsize::new(1);

/// A fresh, nonzero id for claiming entry points.
pub(crate) fn next_owner() -> usize {
    NEXT_OWNER.fetch_add(1, Ordering::Relaxed)
}

/// Routing state for one attachment of one entry point.
#[derive(Debug)]
pub struct Dispatch {
    entry: EntryPoint,
    original: usize,
    counters: Arc<InvocationCounters>,
}

impl Dispatch {
    /// Claim `entry` for `owner` and make `original` and `counters` the
    /// routing target for its interceptor.
    ///
    /// Fails with the current owner's id if another owner holds the claim.
    /// Republishing under the same owner replaces the dispatch.
    pub(crate) fn publish(
        entry: EntryPoint,
        owner: usize,
        original: usize,
        counters: Arc<InvocationCounters>,
    ) -> Result<&'static Dispatch, usize> {
        match OWNER[entry.index()].compare_exchange(
            UNCLAIMED,
            owner,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(current) if current == owner => {}
            Err(current) => return Err(current),
        }
        let dispatch = Box::into_raw(Box::new(Dispatch {
            entry,
            original,
            counters,
        }));
        DISPATCH[entry.index()].store(dispatch, Ordering::Release);
        Ok(unsafe { &*dispatch })
    }

    /// Give up `owner`'s claim on `entry`. Returns `false` if it held none.
    pub(crate) fn release(entry: EntryPoint, owner: usize) -> bool {
        OWNER[entry.index()]
            .compare_exchange(owner, UNCLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether some registry currently owns `entry`.
    pub fn is_claimed(entry: EntryPoint) -> bool {
        OWNER[entry.index()].load(Ordering::Acquire) != UNCLAIMED
    }

    /// The dispatch most recently published for `entry`.
    pub fn current(entry: EntryPoint) -> Option<&'static Dispatch> {
        let p = DISPATCH[entry.index()].load(Ordering::Acquire);
        // Published dispatches are leaked, never freed.
        unsafe { p.as_ref() }
    }

    /// Spin until a dispatch for `entry` exists.
    ///
    /// Registries publish before asking the engine to redirect, so this
    /// only spins for a replacement that is called directly before any
    /// registry attached its entry point.
    fn wait(entry: EntryPoint) -> &'static Dispatch {
        loop {
            if let Some(dispatch) = Self::current(entry) {
                return dispatch;
            }
            core::hint::spin_loop();
        }
    }

    pub fn entry(&self) -> EntryPoint {
        self.entry
    }

    pub fn original(&self) -> usize {
        self.original
    }

    /// Count the call, then hand the original-call pointer to `call`.
    ///
    /// The counter update is finished before `call` runs, so the lock is
    /// never held across the original implementation.
    pub fn intercept<R>(&self, call: impl FnOnce(usize) -> R) -> R {
        self.counters.record(self.entry);
        call(self.original)
    }
}

#[inline(always)]
unsafe fn pass_through(
    entry: EntryPoint,
    pid: *mut libc::pid_t,
    path: *const libc::c_char,
    file_actions: *const libc::posix_spawn_file_actions_t,
    attrp: *const libc::posix_spawnattr_t,
    argv: *const *mut libc::c_char,
    envp: *const *mut libc::c_char,
) -> libc::c_int {
    Dispatch::wait(entry).intercept(|original| {
        let original: PosixSpawnFn = core::mem::transmute(original);
        original(pid, path, file_actions, attrp, argv, envp)
    })
}

/// Installed in place of `posix_spawn`.
///
/// # Safety
/// Same contract as `posix_spawn`.
pub unsafe extern "C" fn hooked_posix_spawn(
    pid: *mut libc::pid_t,
    path: *const libc::c_char,
    file_actions: *const libc::posix_spawn_file_actions_t,
    attrp: *const libc::posix_spawnattr_t,
    argv: *const *mut libc::c_char,
    envp: *const *mut libc::c_char,
) -> libc::c_int {
    pass_through(EntryPoint::PosixSpawn, pid, path, file_actions, attrp, argv, envp)
}

/// Installed in place of `posix_spawnp`.
///
/// # Safety
/// Same contract as `posix_spawnp`.
pub unsafe extern "C" fn hooked_posix_spawnp(
    pid: *mut libc::pid_t,
    file: *const libc::c_char,
    file_actions: *const libc::posix_spawn_file_actions_t,
    attrp: *const libc::posix_spawnattr_t,
    argv: *const *mut libc::c_char,
    envp: *const *mut libc::c_char,
) -> libc::c_int {
    pass_through(EntryPoint::PosixSpawnp, pid, file, file_actions, attrp, argv, envp)
}
