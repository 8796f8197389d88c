use core::{arch::asm, cell::UnsafeCell, ptr::NonNull};

use crate::{
    interrupt,
    proc::{Proc, ProcId, scheduler::Context},
};

// One hart; one CPU record.
static CPU: Cpu = Cpu::new();

/// Per-CPU state.
pub struct Cpu {
    /// Pid of the process running on this cpu, cached so lock holders
    /// can identify themselves without taking the process lock.
    pid: UnsafeCell<ProcId>,
    /// The process running on this cpu, or None.
    proc: UnsafeCell<Option<NonNull<Proc>>>,
    /// switch() here to enter the scheduler.
    pub context: UnsafeCell<Context>,
}

unsafe impl Sync for Cpu {}

/// Returns the current hart id, kept in tp by `start()`.
///
/// Must be called with interrupts disabled.
pub fn id() -> usize {
    assert!(!interrupt::is_enabled());

    let id: usize;
    unsafe { asm!("mv {}, tp", out(reg) id) };
    id
}

/// Stores the hart id in tp.
pub unsafe fn set_id(id: usize) {
    unsafe {
        asm!("mv tp, {}", in(reg) id);
    }
}

impl Cpu {
    const fn new() -> Self {
        Self {
            pid: UnsafeCell::new(ProcId::INVALID),
            proc: UnsafeCell::new(None),
            context: UnsafeCell::new(Context::zeroed()),
        }
    }

    /// Returns this CPU's record.
    ///
    /// Interrupts must be disabled.
    pub fn current() -> &'static Self {
        assert!(!interrupt::is_enabled());
        &CPU
    }

    pub unsafe fn set_proc(&self, p: Option<(NonNull<Proc>, ProcId)>) {
        unsafe {
            *self.pid.get() = p.map(|(_, pid)| pid).unwrap_or(ProcId::INVALID);
            *self.proc.get() = p.map(|(p, _)| p);
        }
    }

    pub unsafe fn pid(&self) -> ProcId {
        unsafe { *self.pid.get() }
    }

    pub unsafe fn proc(&self) -> Option<NonNull<Proc>> {
        unsafe { *self.proc.get() }
    }
}
