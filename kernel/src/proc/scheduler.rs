use core::{
    arch::{asm, naked_asm},
    mem::offset_of,
    ptr::NonNull,
};

use crate::{
    cpu::Cpu,
    interrupt,
    sync::SpinLockGuard,
};

use super::{PROC, ProcSharedData, ProcState};

/// Multi-level feedback queue depth; level 0 is the highest priority.
pub const NPRIO: usize = 3;

/// Saved registers for kernel context switches.
#[derive(Debug)]
pub struct Context {
    pub(super) ra: u64,
    pub(super) sp: u64,

    // callee-saved
    s0: u64,
    s1: u64,
    s2: u64,
    s3: u64,
    s4: u64,
    s5: u64,
    s6: u64,
    s7: u64,
    s8: u64,
    s9: u64,
    s10: u64,
    s11: u64,
}

impl Context {
    pub const fn zeroed() -> Self {
        Self {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }

    pub(super) const fn clear(&mut self) {
        *self = Self::zeroed();
    }
}

/// The process scheduler.
///
/// Called once at boot; never returns. Loops doing:
///
/// - pick the runnable process with the best priority level, rotating
///   within a level so every process gets its turn;
/// - switch to it;
/// - eventually that process transfers control back via switch.
///
/// When nothing is runnable, waits for an interrupt.
pub fn schedule() -> ! {
    let cpu = Cpu::current();
    unsafe { cpu.set_proc(None) };

    // slot after the process that ran last; scanning starts here so a
    // level's processes rotate fairly.
    let mut next_slot = 0;

    loop {
        // the most recent process may have had interrupts turned off;
        // enable them to avoid a deadlock if everything is waiting.
        interrupt::enable();

        let mut found = false;
        'levels: for level in 0..NPRIO {
            for offset in 0..PROC.len() {
                let index = (next_slot + offset) % PROC.len();
                let p = &PROC[index];
                let mut shared = p.shared.lock();
                if shared.state != ProcState::Runnable || shared.priority != level {
                    drop(shared);
                    continue;
                }

                // Switch to the chosen process. It is the process's
                // job to release its lock and reacquire it before
                // jumping back to us.
                shared.state = ProcState::Running;
                unsafe { cpu.set_proc(Some((NonNull::from(p), shared.pid))) };
                unsafe { switch(cpu.context.get(), &raw const shared.context) };

                // the process is done running for now; it changed its
                // state before coming back.
                unsafe { cpu.set_proc(None) };
                next_slot = (index + 1) % PROC.len();
                found = true;
                drop(shared);
                break 'levels;
            }
        }

        if !found {
            unsafe {
                // nothing to run; stop until an interrupt.
                interrupt::enable();
                asm!("wfi");
            }
        }
    }
}

/// Switches back to the scheduler.
///
/// The caller must hold its own process lock and nothing else, with
/// interrupts disabled, and must have changed its state away from
/// Running. The saved interrupt-enable state survives the switch
/// because it belongs to this kernel thread, not to the CPU.
pub(super) fn sched(shared: &mut SpinLockGuard<ProcSharedData>) {
    assert_eq!(interrupt::disabled_depth(), 1);
    assert_ne!(shared.state, ProcState::Running);
    assert!(!interrupt::is_enabled());

    let int_enabled = interrupt::is_enabled_before_push();
    unsafe { switch(&raw mut shared.context, Cpu::current().context.get()) };
    unsafe {
        interrupt::force_set_before_push(int_enabled);
    }
}

/// Moves every runnable process back to the top priority level;
/// the timer calls this periodically so starved processes recover.
pub fn age_runnable() {
    for p in &PROC {
        let mut shared = p.shared.lock();
        if shared.state == ProcState::Runnable {
            shared.priority = 0;
            shared.slices = 0;
        }
        drop(shared);
    }
}

/// Saves the current callee-saved registers in `old`, loads them from
/// `new`.
#[naked]
unsafe extern "C" fn switch(old: *mut Context, new: *const Context) {
    unsafe {
        naked_asm!(
            "sd ra, {c_ra}(a0)",
            "sd sp, {c_sp}(a0)",
            "sd s0, {c_s0}(a0)",
            "sd s1, {c_s1}(a0)",
            "sd s2, {c_s2}(a0)",
            "sd s3, {c_s3}(a0)",
            "sd s4, {c_s4}(a0)",
            "sd s5, {c_s5}(a0)",
            "sd s6, {c_s6}(a0)",
            "sd s7, {c_s7}(a0)",
            "sd s8, {c_s8}(a0)",
            "sd s9, {c_s9}(a0)",
            "sd s10, {c_s10}(a0)",
            "sd s11, {c_s11}(a0)",
            "ld ra, {c_ra}(a1)",
            "ld sp, {c_sp}(a1)",
            "ld s0, {c_s0}(a1)",
            "ld s1, {c_s1}(a1)",
            "ld s2, {c_s2}(a1)",
            "ld s3, {c_s3}(a1)",
            "ld s4, {c_s4}(a1)",
            "ld s5, {c_s5}(a1)",
            "ld s6, {c_s6}(a1)",
            "ld s7, {c_s7}(a1)",
            "ld s8, {c_s8}(a1)",
            "ld s9, {c_s9}(a1)",
            "ld s10, {c_s10}(a1)",
            "ld s11, {c_s11}(a1)",
            "ret",
            c_ra = const offset_of!(Context, ra),
            c_sp = const offset_of!(Context, sp),
            c_s0 = const offset_of!(Context, s0),
            c_s1 = const offset_of!(Context, s1),
            c_s2 = const offset_of!(Context, s2),
            c_s3 = const offset_of!(Context, s3),
            c_s4 = const offset_of!(Context, s4),
            c_s5 = const offset_of!(Context, s5),
            c_s6 = const offset_of!(Context, s6),
            c_s7 = const offset_of!(Context, s7),
            c_s8 = const offset_of!(Context, s8),
            c_s9 = const offset_of!(Context, s9),
            c_s10 = const offset_of!(Context, s10),
            c_s11 = const offset_of!(Context, s11),
        )
    }
}
