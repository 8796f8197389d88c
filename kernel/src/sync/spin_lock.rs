use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    ptr,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use crate::{interrupt, proc};

pub struct RawSpinLock {
    locked: AtomicBool,
}

impl RawSpinLock {
    const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Acquires the lock.
    ///
    /// Spins until the lock is acquired.
    fn acquire(&self) {
        // disable interrupts to avoid deadlock with handlers taking
        // the same lock.
        interrupt::push_disabled().forget(); // release re-enables, so forget the guard

        assert!(!self.holding());

        // `Ordering::Acquire` keeps the critical section's loads and
        // stores strictly after this point. On RISC-V this emits a fence.
        while self.locked.swap(true, Ordering::Acquire) {}
    }

    /// Releases the lock.
    fn release(&self) {
        assert!(self.holding());

        // `Ordering::Release` makes the critical section's stores visible
        // before the lock is observed free.
        self.locked.store(false, Ordering::Release);

        unsafe {
            interrupt::pop_disabled();
        }
    }

    /// Checks whether this hart is holding the lock.
    ///
    /// Interrupts must be off; with a single hart a held lock is
    /// necessarily held by the caller.
    fn holding(&self) -> bool {
        assert!(!interrupt::is_enabled());
        self.locked.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct SpinLock<T> {
    lock: RawSpinLock,
    value: UnsafeCell<T>,
}

unsafe impl<T> Sync for SpinLock<T> where T: Send {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            lock: RawSpinLock::new(),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, spinning until it is available.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.lock.acquire();
        SpinLockGuard { lock: self }
    }

    /// Rebuilds the guard for a lock that is known to be held, e.g. when a
    /// new process resumes in `forkret` still holding its own lock.
    pub unsafe fn remember_locked(&self) -> SpinLockGuard<'_, T> {
        assert!(self.lock.holding());
        SpinLockGuard { lock: self }
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

unsafe impl<T> Send for SpinLockGuard<'_, T> where T: Send {}
unsafe impl<T> Sync for SpinLockGuard<'_, T> where T: Sync {}

impl<'a, T> SpinLockGuard<'a, T> {
    /// Releases the guard, returning the lock it came from.
    pub fn into_lock(self) -> &'a SpinLock<T> {
        let lock = self.lock;
        drop(self);
        lock
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.lock.release();
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.value.get() }
    }
}

/// A condition variable for use with [`SpinLock`] guards.
///
/// The counter detects notifications that land between releasing the
/// guard and going to sleep.
pub struct SpinLockCondVar {
    counter: AtomicU64,
}

impl SpinLockCondVar {
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    pub fn wait<'a, T>(&self, mut guard: SpinLockGuard<'a, T>) -> SpinLockGuard<'a, T> {
        let counter = self.counter.load(Ordering::Relaxed);
        loop {
            guard = proc::sleep(ptr::from_ref(&self.counter).cast(), guard);
            if counter != self.counter.load(Ordering::Relaxed) {
                break;
            }
        }
        guard
    }

    pub fn notify(&self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
        proc::wakeup(ptr::from_ref(&self.counter).cast());
    }
}
