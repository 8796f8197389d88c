use core::arch::asm;

use crate::{
    interrupt::{self, TIMER_IRQ},
    proc,
    sync::{SpinLock, SpinLockCondVar},
};

/// Timer period in cycles of qemu's 10 MHz clock; about a millisecond.
const TICK_INTERVAL: u64 = 10_000;

/// How many ticks between priority-aging sweeps of the process table.
const AGE_INTERVAL: u64 = 100;

pub static TICKS: SpinLock<u64> = SpinLock::new(0);
pub static TICKS_UPDATED: SpinLockCondVar = SpinLockCondVar::new();

pub fn init() {
    interrupt::register_interrupt(TIMER_IRQ, handle_interrupt);
    interrupt::enable_interrupt(TIMER_IRQ);
}

/// Returns the current value of the `time` CSR.
pub fn now() -> u64 {
    let time: u64;
    unsafe {
        asm!("csrr {}, time", out(reg) time);
    }
    time
}

fn handle_interrupt() {
    let mut ticks = TICKS.lock();
    *ticks += 1;
    let age = *ticks % AGE_INTERVAL == 0;
    TICKS_UPDATED.notify();
    drop(ticks);

    if age {
        proc::scheduler::age_runnable();
    }

    // ask for the next timer interrupt; this also clears the pending
    // bit.
    unsafe {
        asm!("csrw stimecmp, {}", in(reg) now() + TICK_INTERVAL);
    }
}
