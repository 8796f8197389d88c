//! Physical memory layout.
//!
//! qemu -machine virt is set up like this, based on qemu's
//! [hw/riscv/virt.c]:
//!
//! ```text
//! 0x0000_1000 -- boot ROM, provided by qemu
//! 0x0c00_0000 -- PLIC
//! 0x1000_0000 -- UART0
//! 0x1000_1000 -- virtio disk
//! 0x8000_0000 -- boot ROM jumps here in machine mode;
//!                -kernel loads the kernel here
//! ```
//!
//! the kernel uses physical memory thus:
//!
//! ```text
//! 0x8000_0000 -- KERNBASE. start of kernel text
//! TEXT_END    -- start of kernel data
//! KERNEL_END  -- start of the frame allocation area
//! PHYSTOP     -- end of RAM used by the kernel
//! ```
//!
//! [hw/riscv/virt.c]: https://github.com/qemu/qemu/blob/9.2.0/hw/riscv/virt.c

use core::arch::global_asm;

use rvos_kernel_params::NPROC;

use crate::memory::{PAGE_SIZE, VirtAddr};

/// Start of kernel text and of the RAM the frame table covers.
pub const KERNBASE: usize = 0x8000_0000;
/// End of the RAM used by the kernel (128 MiB).
pub const PHYSTOP: usize = KERNBASE + 128 * 1024 * 1024;

// qemu puts UART registers here in physical memory.
pub const UART0: usize = 0x1000_0000;
pub const UART0_IRQ: usize = 10;

// virtio mmio interface
pub const VIRTIO0: usize = 0x1000_1000;
pub const VIRTIO0_IRQ: usize = 1;

// qemu puts the platform-level interrupt controller (PLIC) here.
pub const PLIC: usize = 0x0c00_0000;
pub const fn plic_senable(hart: usize) -> usize {
    PLIC + 0x2080 + hart * 0x100
}
pub const fn plic_spriority(hart: usize) -> usize {
    PLIC + 0x20_1000 + hart * 0x2000
}
pub const fn plic_sclaim(hart: usize) -> usize {
    PLIC + 0x20_1004 + hart * 0x2000
}

// get linker script symbol addresses; `la` through a data word avoids
// relocation range problems under -mcmodel=medany.
global_asm!(
    "
        .global _rvos_trampoline_addr
        _rvos_trampoline_addr: .dword _rvos_trampoline
        .global _rvos_text_end_addr
        _rvos_text_end_addr: .dword _rvos_text_end
        .global _rvos_kernel_end_addr
        _rvos_kernel_end_addr: .dword _rvos_kernel_end
    "
);

unsafe extern "C" {
    /// Physical address of the trampoline page.
    #[link_name = "_rvos_trampoline_addr"]
    pub static TRAMPOLINE_PHYS: usize;

    /// End of kernel text.
    #[link_name = "_rvos_text_end_addr"]
    pub static TEXT_END: usize;

    /// End of the kernel image; the frame allocator starts here.
    #[link_name = "_rvos_kernel_end_addr"]
    pub static KERNEL_END: usize;
}

// User memory layout, address zero first:
//
// ```text
//  text
//  original data and bss
//  expandable heap
//  ...
//  stack page, then guard page (exec sets these up)
//  ...
//  TRAPFRAME (p.trapframe, used by the trampoline)
//  TRAMPOLINE (the same page as in the kernel)
// ```

pub const TRAMPOLINE: VirtAddr = VirtAddr::MAX.byte_sub(PAGE_SIZE);

pub const TRAPFRAME: VirtAddr = TRAMPOLINE.byte_sub(PAGE_SIZE);

pub const KSTACK_PAGES: usize = 2;
pub const KSTACK_GUARD_PAGES: usize = 1;

/// Kernel stack base for process slot `p`: stacks grow down from just
/// below the trapframe, each followed (below) by an unmapped guard page.
pub const fn kstack(p: usize) -> VirtAddr {
    assert!(p < NPROC);
    TRAPFRAME.byte_sub((1 + (p + 1) * (KSTACK_GUARD_PAGES + KSTACK_PAGES)) * PAGE_SIZE)
}
