use alloc::boxed::Box;
use core::slice;

use riscv::asm;

use super::{
    PAGE_SIZE, PageRound as _, PhysAddr, VirtAddr,
    addr::AddressChunks,
    layout::{TRAMPOLINE, TRAMPOLINE_PHYS, TRAPFRAME},
    page::{self, PageFrameAllocator},
    page_table::{PageTable, PtEntryFlags},
};
use crate::error::KernelError;

/// A process's address space: the Sv39 tree plus the size of the
/// mapped user image.
pub struct UserPageTable {
    pt: Box<PageTable, PageFrameAllocator>,
    size: usize,
}

impl UserPageTable {
    /// Creates an address space with no user memory, but with the
    /// trampoline and the given trapframe page mapped high.
    pub fn new(trapframe: PhysAddr) -> Result<Self, KernelError> {
        let mut pt = PageTable::try_allocate()?;
        if let Err(e) = pt.map_page(
            TRAMPOLINE,
            PhysAddr::new(unsafe { TRAMPOLINE_PHYS }),
            PtEntryFlags::RX,
        ) {
            pt.free_descendant();
            return Err(e);
        }

        if let Err(e) = pt.map_page(TRAPFRAME, trapframe, PtEntryFlags::RW) {
            pt.unmap_page(TRAMPOLINE).unwrap();
            pt.free_descendant();
            return Err(e);
        }

        Ok(Self { pt, size: 0 })
    }

    /// Returns the user image size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the satp value that installs this page table.
    pub fn satp(&self) -> usize {
        (8 << 60) | self.pt.phys_page_num().value()
    }

    /// Loads the initcode image at address 0, for the very first
    /// process. `src` must be smaller than a page.
    pub fn map_first(&mut self, src: &[u8]) {
        assert!(src.len() < PAGE_SIZE, "initcode too large");

        let mem = page::alloc_page().unwrap();
        self.pt
            .map_page(
                VirtAddr::MIN,
                PhysAddr::new(mem.addr().get()),
                PtEntryFlags::URWX,
            )
            .unwrap();
        unsafe { slice::from_raw_parts_mut(mem.as_ptr(), src.len()) }.copy_from_slice(src);
        self.size = PAGE_SIZE;
    }

    /// Allocates PTEs and zeroed frames to grow the image to
    /// `new_size`, which need not be page-aligned. `xperm` is added to
    /// the user-read permissions of the new pages.
    pub fn grow_to(&mut self, new_size: usize, xperm: PtEntryFlags) -> Result<(), KernelError> {
        if new_size < self.size {
            return Ok(());
        }

        let old_size = self.size;
        let map_start = VirtAddr::new(self.size.page_roundup()).unwrap();
        let map_end = VirtAddr::new(new_size)?;
        for chunk in AddressChunks::from_range(map_start..map_end) {
            let va = chunk.page_start();
            self.size = va.addr();

            let mem = match page::alloc_page() {
                Ok(mem) => mem,
                Err(e) => {
                    self.shrink_to(old_size);
                    return Err(e);
                }
            };

            if let Err(e) = self.pt.map_page(
                va,
                PhysAddr::new(mem.addr().get()),
                xperm | PtEntryFlags::UR,
            ) {
                unsafe {
                    page::free_page(mem);
                }
                self.shrink_to(old_size);
                return Err(e);
            }
        }

        self.size = new_size;

        Ok(())
    }

    /// Releases user pages to shrink the image to `new_size`.
    pub fn shrink_to(&mut self, new_size: usize) {
        if new_size >= self.size {
            return;
        }

        if new_size.page_roundup() < self.size.page_roundup() {
            let npages = (self.size.page_roundup() - new_size.page_roundup()) / PAGE_SIZE;
            let start_va = VirtAddr::new(new_size.page_roundup()).unwrap();
            for pa in self.pt.unmap_pages(start_va, npages).unwrap() {
                let pa = pa.unwrap();
                unsafe {
                    page::free_page(pa.as_mut_ptr());
                }
            }
        }

        self.size = new_size;
    }

    /// Copy-on-write clone of this address space into `target`.
    ///
    /// Every mapped frame is shared: its refcount rises by one, and
    /// writable user pages lose W and gain COW in both address spaces.
    /// On failure the target is emptied and W is restored on parent
    /// frames whose refcount has fallen back to 1.
    pub fn clone_into(&mut self, target: &mut Self) -> Result<(), KernelError> {
        target.shrink_to(0);

        let res = (|| {
            for chunk in AddressChunks::from_size(VirtAddr::MIN, self.size).unwrap() {
                let va = chunk.page_start();
                target.size = va.addr();

                let pte = self.pt.find_leaf_entry(va)?;
                let pa = pte.phys_addr();
                let flags = pte.flags();
                let cow_candidate = flags.contains(PtEntryFlags::UW);

                let new_flags = if cow_candidate {
                    (flags - PtEntryFlags::W) | PtEntryFlags::COW
                } else {
                    flags
                };

                page::incref(pa);
                if let Err(e) = target.pt.map_page(va, pa, new_flags) {
                    unsafe {
                        page::free_page(pa.as_mut_ptr());
                    }
                    return Err(e);
                }

                if cow_candidate {
                    self.pt
                        .update_level0_entry(va, false, |pte| pte.set_flags(new_flags))
                        .unwrap();
                }
            }
            Ok(())
        })();

        match res {
            Ok(()) => {
                target.size = self.size;
                asm::sfence_vma_all();
                Ok(())
            }
            Err(e) => {
                // drop the partial clone; this also drops the extra
                // frame references.
                let cloned = target.size;
                target.shrink_to(0);

                // restore W on parent pages that are no longer shared.
                for chunk in AddressChunks::from_size(VirtAddr::MIN, cloned).unwrap() {
                    let va = chunk.page_start();
                    let Ok(pte) = self.pt.find_leaf_entry(va) else {
                        continue;
                    };
                    if !pte.flags().contains(PtEntryFlags::COW) {
                        continue;
                    }
                    if page::refcount(pte.phys_addr()) == 1 {
                        self.pt
                            .update_level0_entry(va, false, |pte| {
                                let flags =
                                    (pte.flags() | PtEntryFlags::W) - PtEntryFlags::COW;
                                pte.set_flags(flags);
                            })
                            .unwrap();
                    }
                }
                asm::sfence_vma_all();
                Err(e)
            }
        }
    }

    /// Resolves a copy-on-write fault at `va`.
    ///
    /// The faulting page must be a valid user COW page. Its content is
    /// copied to a fresh frame, the PTE is rewritten writable, and the
    /// old frame loses one reference.
    pub fn cow_resolve(&mut self, va: VirtAddr) -> Result<(), KernelError> {
        let va0 = va.page_rounddown();
        let pte = self.pt.find_leaf_entry(va0)?;
        let flags = pte.flags();
        if !flags.contains(PtEntryFlags::U) {
            return Err(KernelError::InaccessibleMemory(va));
        }
        if !flags.contains(PtEntryFlags::COW) {
            return Err(KernelError::NotCopyOnWrite(va));
        }
        let old_pa = pte.phys_addr();

        let mem = page::alloc_page()?;
        unsafe {
            mem.as_ptr().copy_from(old_pa.as_ptr(), PAGE_SIZE);
        }

        let new_flags = (flags | PtEntryFlags::W) - PtEntryFlags::COW;
        self.pt
            .update_level0_entry(va0, false, |pte| {
                pte.clear();
                pte.set_phys_addr(PhysAddr::new(mem.addr().get()), new_flags);
            })
            .unwrap();
        asm::sfence_vma_all();

        unsafe {
            page::free_page(old_pa.as_mut_ptr());
        }
        Ok(())
    }

    /// Clears the U bit on the page at `va`; exec uses this for the
    /// stack guard page.
    pub fn forbid_user_access(&mut self, va: VirtAddr) -> Result<(), KernelError> {
        self.pt.update_level0_entry(va, false, |pte| {
            let mut flags = pte.flags();
            flags.remove(PtEntryFlags::U);
            pte.set_flags(flags);
        })
    }

    pub fn resolve_virtual_address(
        &self,
        va: VirtAddr,
        flags: PtEntryFlags,
    ) -> Result<PhysAddr, KernelError> {
        self.pt.resolve_virtual_address(va, flags)
    }

    /// Validates a user range `[addr, addr + size)` for reads, or for
    /// writes when `write` is set.
    ///
    /// Every page must be valid and user accessible; writable either
    /// directly or after a copy-on-write fault.
    pub fn validate_range(&self, addr: usize, size: usize, write: bool) -> Result<(), KernelError> {
        if size == 0 {
            return Ok(());
        }
        let start = VirtAddr::new(addr)?;
        for chunk in AddressChunks::from_size(start, size)? {
            let pte = self.pt.find_leaf_entry(chunk.page_start())?;
            let flags = pte.flags();
            if !flags.contains(PtEntryFlags::U) {
                return Err(KernelError::InaccessibleMemory(chunk.page_start()));
            }
            if write && !flags.intersects(PtEntryFlags::W | PtEntryFlags::COW) {
                return Err(KernelError::InaccessibleMemory(chunk.page_start()));
            }
        }
        Ok(())
    }

    /// Copies from kernel to user, resolving copy-on-write pages on
    /// the way.
    pub fn copy_out_bytes(&mut self, dst: VirtAddr, mut src: &[u8]) -> Result<(), KernelError> {
        for chunk in AddressChunks::from_size(dst, src.len())? {
            let va = chunk.page_start();

            let pte = self.pt.find_leaf_entry(va)?;
            if pte.flags().contains(PtEntryFlags::COW) {
                self.cow_resolve(va)?;
            }

            let page = self.pt.fetch_page_mut(va, PtEntryFlags::UW)?;
            let offset = chunk.offset_in_page();
            let n = chunk.size();
            page[offset..][..n].copy_from_slice(&src[..n]);
            src = &src[n..];
        }
        Ok(())
    }

    /// Copies from user to kernel.
    pub fn copy_in_bytes(&self, mut dst: &mut [u8], src: VirtAddr) -> Result<(), KernelError> {
        for chunk in AddressChunks::from_size(src, dst.len())? {
            let page = self.pt.fetch_page(chunk.page_start(), PtEntryFlags::UR)?;
            let offset = chunk.offset_in_page();
            let n = chunk.size();
            dst[..n].copy_from_slice(&page[offset..][..n]);
            dst = &mut dst[n..];
        }
        Ok(())
    }

    /// Copies a NUL-terminated string from user space into `dst`,
    /// requiring the terminator within `dst.len()` bytes.
    ///
    /// Returns the string length, NUL excluded.
    pub fn copy_in_str(&self, dst: &mut [u8], src: VirtAddr) -> Result<usize, KernelError> {
        let mut copied = 0;
        let mut va = src;
        while copied < dst.len() {
            let va0 = va.page_rounddown();
            let page = self.pt.fetch_page(va0, PtEntryFlags::UR)?;
            let offset = va.addr() - va0.addr();
            let n = usize::min(PAGE_SIZE - offset, dst.len() - copied);
            let bytes = &page[offset..][..n];

            if let Some(len) = bytes.iter().position(|&c| c == 0) {
                dst[copied..][..len + 1].copy_from_slice(&bytes[..len + 1]);
                return Ok(copied + len);
            }

            dst[copied..][..n].copy_from_slice(bytes);
            copied += n;
            va = va.byte_add(n)?;
        }
        Err(KernelError::UnterminatedString)
    }
}

impl Drop for UserPageTable {
    fn drop(&mut self) {
        let _ = self.pt.unmap_page(TRAMPOLINE).unwrap();
        let _ = self.pt.unmap_page(TRAPFRAME).unwrap();
        self.shrink_to(0);
        self.pt.free_descendant();
    }
}
