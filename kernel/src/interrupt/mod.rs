//! Interrupt enable control and the IRQ handler table.

use core::{
    mem,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use riscv::register::{sie, sstatus};

use crate::memory::layout::{UART0_IRQ, VIRTIO0_IRQ};

pub mod kernel_vec;
pub mod plic;
pub mod timer;
pub mod trampoline;
pub mod trap;

/// IRQ slot used for the supervisor timer (its scause code).
pub const TIMER_IRQ: usize = 5;

/// Size of the IRQ handler table; covers the timer slot and the PLIC
/// sources this machine wires up.
const NIRQ: usize = 32;

/// Enables interrupts.
pub fn enable() {
    unsafe {
        sstatus::set_sie();
    }
}

/// Disables interrupts.
pub fn disable() {
    unsafe {
        sstatus::clear_sie();
    }
}

/// Returns `true` if interrupts are enabled.
pub fn is_enabled() -> bool {
    sstatus::read().sie()
}

/// Returns the nesting depth of [`push_disabled()`] calls.
pub fn disabled_depth() -> usize {
    STATE.push_depth.load(Ordering::Relaxed)
}

pub fn is_enabled_before_push() -> bool {
    STATE.int_enabled.load(Ordering::Relaxed)
}

pub unsafe fn force_set_before_push(enabled: bool) {
    STATE.int_enabled.store(enabled, Ordering::Relaxed);
}

/// Saves the current interrupt enable state and disables interrupts.
///
/// Calls nest; the state saved by the outermost call is restored when
/// the matching [`pop_disabled()`] (or guard drop) runs.
pub fn push_disabled() -> Guard {
    let current = is_enabled();
    disable();
    STATE.push(current);
    Guard {}
}

/// Restores the interrupt enable state saved by [`push_disabled()`].
pub unsafe fn pop_disabled() {
    drop(Guard {})
}

/// Guard that restores the interrupt enable state when dropped.
pub struct Guard {}

impl Drop for Guard {
    fn drop(&mut self) {
        assert!(!is_enabled());
        if let Some(int_enabled) = STATE.pop() {
            if int_enabled {
                enable();
            }
        }
    }
}

impl Guard {
    pub fn forget(self) {
        mem::forget(self);
    }
}

pub fn with_push_disabled<T, F>(f: F) -> T
where
    F: FnOnce() -> T,
{
    let _guard = push_disabled();
    f()
}

static STATE: IntrState = IntrState::new();

struct IntrState {
    push_depth: AtomicUsize,
    int_enabled: AtomicBool,
}

impl IntrState {
    const fn new() -> Self {
        Self {
            push_depth: AtomicUsize::new(0),
            int_enabled: AtomicBool::new(false),
        }
    }

    fn push(&self, int_enabled: bool) {
        let depth = self.push_depth.fetch_add(1, Ordering::Acquire);
        if depth == 0 {
            self.int_enabled.store(int_enabled, Ordering::Relaxed);
        }
    }

    fn pop(&self) -> Option<bool> {
        assert!(self.push_depth.load(Ordering::Relaxed) > 0);
        let int_enabled = self.int_enabled.load(Ordering::Relaxed);
        if self.push_depth.fetch_sub(1, Ordering::Release) == 1 {
            return Some(int_enabled);
        }
        None
    }
}

// Written only during boot, before interrupts are enabled; read from
// trap context with interrupts off.
struct IrqTable {
    handlers: core::cell::UnsafeCell<[Option<fn()>; NIRQ]>,
}

unsafe impl Sync for IrqTable {}

static IRQ_TABLE: IrqTable = IrqTable {
    handlers: core::cell::UnsafeCell::new([None; NIRQ]),
};

/// Installs `handler` for `irq`.
///
/// # Panics
///
/// Panics if `irq` is out of range or the slot is taken.
pub fn register_interrupt(irq: usize, handler: fn()) {
    assert!(irq < NIRQ, "irq out of range: {irq}");
    let handlers = unsafe { &mut *IRQ_TABLE.handlers.get() };
    assert!(handlers[irq].is_none(), "irq already registered: {irq}");
    handlers[irq] = Some(handler);
}

/// Unmasks `irq` at its source: the supervisor interrupt-enable CSR for
/// the timer slot, the PLIC for device slots.
pub fn enable_interrupt(irq: usize) {
    assert!(irq < NIRQ, "irq out of range: {irq}");
    match irq {
        TIMER_IRQ => unsafe { sie::set_stimer() },
        UART0_IRQ | VIRTIO0_IRQ => plic::enable_irq(irq),
        _ => panic!("cannot enable unknown irq: {irq}"),
    }
}

/// Masks `irq` at its source.
pub fn disable_interrupt(irq: usize) {
    assert!(irq < NIRQ, "irq out of range: {irq}");
    match irq {
        TIMER_IRQ => unsafe { sie::clear_stimer() },
        UART0_IRQ | VIRTIO0_IRQ => plic::disable_irq(irq),
        _ => panic!("cannot disable unknown irq: {irq}"),
    }
}

/// Runs the handler registered for `irq`.
///
/// Returns `false` if no handler is installed.
pub(crate) fn dispatch(irq: usize) -> bool {
    if irq >= NIRQ {
        return false;
    }
    let handlers = unsafe { &*IRQ_TABLE.handlers.get() };
    match handlers[irq] {
        Some(handler) => {
            handler();
            true
        }
        None => false,
    }
}
