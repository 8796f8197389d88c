use alloc::boxed::Box;
use arrayvec::ArrayVec;
use dataview::PodMethods as _;

use super::{Proc, ProcPrivateData};
use crate::{
    error::KernelError,
    fs::{self, inode},
    memory::{
        PAGE_SIZE, PageRound as _, PhysAddr, VirtAddr, page::PageFrameAllocator,
        page_table::PtEntryFlags, vm_user::UserPageTable,
    },
    param::MAX_ARG,
    proc::elf::{
        ELF_MAGIC, ELF_PROG_FLAG_EXEC, ELF_PROG_FLAG_WRITE, ELF_PROG_LOAD, ElfHeader,
        ProgramHeader,
    },
};

/// A page-sized buffer holding one argument string.
pub type ArgPage = Box<[u8; PAGE_SIZE], PageFrameAllocator>;

/// Argument strings with their lengths, as fetched from user space.
pub type ArgVec = ArrayVec<(usize, ArgPage), MAX_ARG>;

fn flags2perm(flags: u32) -> PtEntryFlags {
    let mut perm = PtEntryFlags::empty();
    if flags & ELF_PROG_FLAG_EXEC != 0 {
        perm.insert(PtEntryFlags::X);
    }
    if flags & ELF_PROG_FLAG_WRITE != 0 {
        perm.insert(PtEntryFlags::W);
    }
    perm
}

/// Replaces the current user image with the program at `path`.
///
/// On success the new image is committed and the old one freed; on
/// failure the old image is untouched. Returns argc, which lands in
/// the user's `a0`.
pub fn exec(
    p: &Proc,
    private: &mut ProcPrivateData,
    path: &[u8],
    argv: &ArgVec,
) -> Result<usize, KernelError> {
    let trapframe_pa = PhysAddr::new(private.trapframe.unwrap().addr().get());

    fs::log::begin_transaction();
    let res = load_image(path, trapframe_pa);
    fs::log::end_transaction();
    let (mut pt, entry) = res?;

    // stack: one writable page under one inaccessible guard page, at
    // the top of the image.
    let base = pt.size().page_roundup();
    pt.grow_to(base + 2 * PAGE_SIZE, PtEntryFlags::W)?;
    let guard = VirtAddr::new(pt.size() - PAGE_SIZE).unwrap();
    pt.forbid_user_access(guard)?;
    let stack_base = pt.size() - 2 * PAGE_SIZE;
    let mut sp = pt.size() - PAGE_SIZE;

    // push argument strings, recording their addresses.
    let mut ustack = [0usize; MAX_ARG + 1];
    for ((len, page), slot) in argv.iter().zip(&mut ustack) {
        sp -= len + 1;
        sp -= sp % 16; // risc-v sp must be 16-byte aligned
        if sp < stack_base {
            return Err(KernelError::ArgumentListTooLong);
        }
        pt.copy_out_bytes(VirtAddr::new(sp).unwrap(), &page[..len + 1])?;
        *slot = sp;
    }
    ustack[argv.len()] = 0;

    // push the array of argv[] pointers.
    sp -= (argv.len() + 1) * size_of::<usize>();
    sp -= sp % 16;
    if sp < stack_base {
        return Err(KernelError::ArgumentListTooLong);
    }
    let bytes = unsafe {
        core::slice::from_raw_parts(
            ustack.as_ptr().cast::<u8>(),
            (argv.len() + 1) * size_of::<usize>(),
        )
    };
    pt.copy_out_bytes(VirtAddr::new(sp).unwrap(), bytes)?;

    // save the program name for debugging.
    let name = path
        .rsplit(|&c| c == b'/')
        .find(|part| !part.is_empty())
        .unwrap_or(path);
    p.shared().lock().set_name(name);

    // commit to the new image.
    private.trapframe_mut().a1 = sp as u64;
    private.update_pagetable(pt);
    private.trapframe_mut().epc = entry;
    private.trapframe_mut().sp = sp as u64;

    Ok(argv.len())
}

/// Reads the ELF image at `path` into a fresh address space.
fn load_image(path: &[u8], trapframe_pa: PhysAddr) -> Result<(UserPageTable, u64), KernelError> {
    let ip = fs::path::namei(path)?;
    inode::ilock(ip);

    let res = (|| {
        let mut elf = ElfHeader::zeroed();
        let nread = inode::readi(ip, false, elf.as_bytes_mut().as_mut_ptr().addr(), 0, size_of::<ElfHeader>())?;
        if nread != size_of::<ElfHeader>() || elf.magic != ELF_MAGIC {
            return Err(KernelError::InvalidExecutable);
        }

        let mut pt = UserPageTable::new(trapframe_pa)?;

        for i in 0..elf.phnum {
            let off = usize::try_from(elf.phoff).unwrap()
                + usize::from(i) * size_of::<ProgramHeader>();
            let mut ph = ProgramHeader::zeroed();
            let nread = inode::readi(
                ip,
                false,
                ph.as_bytes_mut().as_mut_ptr().addr(),
                off,
                size_of::<ProgramHeader>(),
            )?;
            if nread != size_of::<ProgramHeader>() {
                return Err(KernelError::InvalidExecutable);
            }
            if ph.ty != ELF_PROG_LOAD {
                continue;
            }
            if ph.memsz < ph.filesz {
                return Err(KernelError::InvalidExecutable);
            }
            if ph.vaddr.checked_add(ph.memsz).is_none() {
                return Err(KernelError::InvalidExecutable);
            }

            let va_start = VirtAddr::new(usize::try_from(ph.vaddr).unwrap())?;
            if !va_start.is_page_aligned() {
                return Err(KernelError::InvalidExecutable);
            }
            let va_end = va_start.byte_add(usize::try_from(ph.memsz).unwrap())?;

            pt.grow_to(va_end.addr(), flags2perm(ph.flags))?;

            load_segment(
                &pt,
                va_start,
                ip,
                usize::try_from(ph.off).unwrap(),
                usize::try_from(ph.filesz).unwrap(),
            )?;
        }

        Ok((pt, elf.entry))
    })();

    inode::iunlockput(ip);
    res
}

/// Loads one program segment into the pages already mapped at `va`.
fn load_segment(
    pt: &UserPageTable,
    va: VirtAddr,
    ip: inode::InodePtr,
    file_offset: usize,
    file_size: usize,
) -> Result<(), KernelError> {
    assert!(va.is_page_aligned());

    for i in (0..file_size).step_by(PAGE_SIZE) {
        let va = va.byte_add(i).unwrap();
        let pa = pt.resolve_virtual_address(va, PtEntryFlags::U)?;

        let n = usize::min(file_size - i, PAGE_SIZE);
        let nread = inode::readi(ip, false, pa.addr(), file_offset + i, n)?;
        if nread != n {
            return Err(KernelError::InvalidExecutable);
        }
    }

    Ok(())
}
