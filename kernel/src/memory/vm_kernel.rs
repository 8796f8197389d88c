use alloc::boxed::Box;

use riscv::{asm, register::satp};

use crate::{
    error::KernelError,
    memory::{
        PAGE_SIZE, PhysAddr, VirtAddr,
        layout::{KERNBASE, PHYSTOP, PLIC, TEXT_END, TRAMPOLINE, TRAMPOLINE_PHYS, UART0, VIRTIO0},
        page_table::PtEntryFlags,
    },
    proc,
    sync::Once,
};

use super::{page::PageFrameAllocator, page_table::PageTable};

static KERNEL_PAGE_TABLE: Once<KernelPageTable> = Once::new();

/// Builds the one kernel page table.
pub fn init() {
    KERNEL_PAGE_TABLE.init(KernelPageTable::new());
}

/// Switches the hart's satp to the kernel page table and turns on
/// paging.
pub fn init_hart() {
    // wait for any previous writes to the page table memory to finish.
    asm::sfence_vma_all();

    let addr = KERNEL_PAGE_TABLE.get().0.phys_addr();
    unsafe {
        satp::set(satp::Mode::Sv39, 0, addr.phys_page_num().value());
    }

    // flush stale entries from the TLB.
    asm::sfence_vma_all();
}

fn ident_map(
    kpgtbl: &mut PageTable,
    addr: usize,
    size: usize,
    perm: PtEntryFlags,
) -> Result<(), KernelError> {
    kpgtbl.map_pages(VirtAddr::new(addr)?, size, PhysAddr::new(addr), perm)
}

pub struct KernelPageTable(Box<PageTable, PageFrameAllocator>);

impl KernelPageTable {
    /// Makes a direct-map page table for the kernel.
    fn new() -> Self {
        use PtEntryFlags as F;

        let text_end = unsafe { TEXT_END };
        let mut kpgtbl = PageTable::try_allocate().unwrap();

        // uart registers
        ident_map(&mut kpgtbl, UART0, PAGE_SIZE, F::RW).unwrap();

        // virtio mmio disk interface
        ident_map(&mut kpgtbl, VIRTIO0, PAGE_SIZE, F::RW).unwrap();

        // PLIC
        ident_map(&mut kpgtbl, PLIC, 0x400_0000, F::RW).unwrap();

        // kernel text, executable and read-only.
        ident_map(&mut kpgtbl, KERNBASE, text_end - KERNBASE, F::RX).unwrap();

        // kernel data and the physical RAM the frame allocator covers.
        ident_map(&mut kpgtbl, text_end, PHYSTOP - text_end, F::RW).unwrap();

        // the trampoline, at the highest kernel virtual address.
        kpgtbl
            .map_pages(
                TRAMPOLINE,
                PAGE_SIZE,
                PhysAddr::new(unsafe { TRAMPOLINE_PHYS }),
                F::RX,
            )
            .unwrap();

        // a kernel stack (plus guard gap) for each process slot.
        proc::map_stacks(&mut kpgtbl);

        Self(kpgtbl)
    }
}
