//! The RISC-V platform-level interrupt controller (PLIC).

use core::ptr;

use crate::{
    cpu,
    memory::layout::{PLIC, UART0_IRQ, VIRTIO0_IRQ, plic_sclaim, plic_senable, plic_spriority},
};

pub fn init() {
    // set the desired IRQ priorities non-zero (otherwise disabled).
    unsafe {
        ptr::with_exposed_provenance_mut::<u32>(PLIC + UART0_IRQ * 4).write_volatile(1);
        ptr::with_exposed_provenance_mut::<u32>(PLIC + VIRTIO0_IRQ * 4).write_volatile(1);
    }
}

pub fn init_hart() {
    let hart = cpu::id();

    // start with every source masked; drivers unmask their own IRQ
    // through `interrupt::enable_interrupt`.
    unsafe {
        ptr::with_exposed_provenance_mut::<u32>(plic_senable(hart)).write_volatile(0);
    }

    // set this hart's S-mode priority threshold to 0.
    unsafe {
        ptr::with_exposed_provenance_mut::<u32>(plic_spriority(hart)).write_volatile(0);
    }
}

/// Unmasks `irq` for this hart's S-mode.
pub(super) fn enable_irq(irq: usize) {
    let hart = cpu::id();
    unsafe {
        let senable = ptr::with_exposed_provenance_mut::<u32>(plic_senable(hart));
        senable.write_volatile(senable.read_volatile() | (1 << irq));
    }
}

/// Masks `irq` for this hart's S-mode.
pub(super) fn disable_irq(irq: usize) {
    let hart = cpu::id();
    unsafe {
        let senable = ptr::with_exposed_provenance_mut::<u32>(plic_senable(hart));
        senable.write_volatile(senable.read_volatile() & !(1 << irq));
    }
}

/// Asks the PLIC what interrupt we should serve.
pub fn claim() -> usize {
    let hart = cpu::id();
    unsafe { ptr::with_exposed_provenance_mut::<u32>(plic_sclaim(hart)).read_volatile() as usize }
}

/// Tells the PLIC we've served this IRQ.
pub fn complete(irq: usize) {
    let hart = cpu::id();
    unsafe {
        ptr::with_exposed_provenance_mut::<u32>(plic_sclaim(hart))
            .write_volatile(u32::try_from(irq).unwrap());
    }
}
