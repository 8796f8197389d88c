pub use self::{
    once::Once,
    sleep_lock::RawSleepLock,
    spin_lock::{SpinLock, SpinLockCondVar, SpinLockGuard},
};

mod once;
mod sleep_lock;
mod spin_lock;
