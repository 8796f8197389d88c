use core::ptr;

use crate::{
    proc::{self, ProcId},
    sync::SpinLock,
};

/// A lock whose waiters sleep instead of spinning.
///
/// Long-term locks for inodes and block buffers; held across disk I/O.
/// Must never be acquired while holding a spinlock, or the sleeping
/// side would deadlock the scheduler.
pub struct RawSleepLock {
    locked: SpinLock<(bool, ProcId)>,
}

impl RawSleepLock {
    pub const fn new() -> Self {
        Self {
            locked: SpinLock::new((false, ProcId::INVALID)),
        }
    }

    pub fn acquire(&self) {
        let mut locked = self.locked.lock();
        while locked.0 {
            locked = proc::sleep(ptr::from_ref(self).cast(), locked);
        }
        locked.0 = true;
        locked.1 = proc::current_pid();
    }

    pub fn release(&self) {
        let mut locked = self.locked.lock();
        assert!(locked.0);
        locked.0 = false;
        locked.1 = ProcId::INVALID;
        drop(locked);
        proc::wakeup(ptr::from_ref(self).cast());
    }

    /// Returns `true` only if the calling process holds the lock.
    pub fn holding(&self) -> bool {
        let locked = self.locked.lock();
        locked.0 && locked.1 == proc::current_pid()
    }
}

impl Default for RawSleepLock {
    fn default() -> Self {
        Self::new()
    }
}
