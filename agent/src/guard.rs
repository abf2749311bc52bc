//! Busy-wait mutual exclusion for the interceptor's critical section.
//!
//! The guarded work is a handful of counter updates, so spinning is
//! cheaper than parking a thread. Waiters are not served in order.
//! Anything that holds the lock for longer should use `std::sync::Mutex`.

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Test-and-set spin lock owning the value it protects.
pub struct SpinGuard<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// Access to `value` only happens through a `SpinGuardLock`, which exists
// for at most one thread at a time.
unsafe impl<T: Send> Send for SpinGuard<T> {}
unsafe impl<T: Send> Sync for SpinGuard<T> {}

impl<T> SpinGuard<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Spin until the lock is ours.
    pub fn lock(&self) -> SpinGuardLock<'_, T> {
        loop {
            if let Some(lock) = self.try_lock() {
                return lock;
            }
            // Wait on plain loads so contending cores don't bounce the line.
            while self.locked.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
    }

    pub fn try_lock(&self) -> Option<SpinGuardLock<'_, T>> {
        if self.locked.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(SpinGuardLock { guard: self })
        }
    }

    /// Run `f` while holding the lock.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut lock = self.lock();
        f(&mut lock)
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T> core::fmt::Debug for SpinGuard<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SpinGuard")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

impl<T: Default> Default for SpinGuard<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Exclusive access to a [`SpinGuard`]'s value; released on drop.
pub struct SpinGuardLock<'a, T> {
    guard: &'a SpinGuard<T>,
}

impl<T> Deref for SpinGuardLock<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.guard.value.get() }
    }
}

impl<T> DerefMut for SpinGuardLock<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.guard.value.get() }
    }
}

impl<T> Drop for SpinGuardLock<'_, T> {
    fn drop(&mut self) {
        self.guard.locked.store(false, Ordering::Release);
    }
}
