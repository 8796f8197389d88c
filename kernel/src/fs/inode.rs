//! Inodes.
//!
//! An inode describes a single unnamed file. The disk structure holds
//! the file's type, its size, its link count, and the list of blocks
//! holding its content. Inodes are laid out sequentially on disk at
//! `sb.inodestart`.
//!
//! The kernel keeps a table of in-use inodes in memory to synchronize
//! access by multiple processes. In-memory inodes carry book-keeping
//! that is not stored on disk: `ref_` and `valid`.
//!
//! * Allocation: an inode is allocated if its on-disk type is nonzero.
//!   `ialloc()` allocates, `iput()` frees when the reference and link
//!   counts have both fallen to zero.
//!
//! * Referencing in table: a table entry is free if `ref_` is zero;
//!   otherwise it counts the in-memory pointers to the entry (open
//!   files and current directories). `iget()` finds or creates an
//!   entry and increments its ref; `iput()` decrements it.
//!
//! * Valid: the fields mirrored from disk are only correct when
//!   `valid` is set. `ilock()` reads the inode from disk on first use;
//!   `iput()` clears `valid` when the entry is recycled.
//!
//! * Locked: file system code may only examine and modify an inode's
//!   fields after locking it.
//!
//! Thus a typical sequence is:
//!
//! ```text
//!   let ip = iget(dev, inum);
//!   ilock(ip);
//!   ... examine and modify ...
//!   iunlock(ip);
//!   iput(ip);
//! ```
//!
//! `ilock()` is separate from `iget()` so that system calls can keep a
//! long-term reference to an inode (as for an open file) and only lock
//! it for short periods, e.g. in `read()`. The separation also avoids
//! deadlock during pathname lookup.
//!
//! The table spinlock protects `ref_`, `dev`, and `inum`; each inode's
//! sleeplock protects everything else.

use core::{cell::UnsafeCell, ptr::NonNull};

use dataview::PodMethods as _;
use rvos_fs_types::{
    BLOCK_SIZE, Dinode, DirEntry, IndirectBlock, InodeNo, MAX_FILE_SIZE, NUM_DIRECT, NUM_DOUBLE,
    NUM_INDIRECT, SuperBlock, T_DIR,
};

use crate::{
    error::KernelError,
    fs::{block_io, data_block, log},
    kwarn,
    param::NINODE,
    proc,
    sync::{RawSleepLock, SpinLock},
};

/// In-memory copy of an inode.
pub struct Inode {
    /// Device number.
    pub dev: u32,
    /// Inode number.
    pub inum: u32,
    /// Reference count; protected by the table lock.
    ref_: i32,
    /// Protects everything below.
    lock: RawSleepLock,
    /// Whether the disk fields have been loaded.
    pub valid: bool,

    // copy of the disk inode
    pub ty: i16,
    pub major: i16,
    pub minor: i16,
    pub nlink: i16,
    pub size: u32,
    pub addrs: [u32; NUM_DIRECT + 2],
}

unsafe impl Send for Inode {}

impl Inode {
    const fn zero() -> Self {
        Self {
            dev: 0,
            inum: 0,
            ref_: 0,
            lock: RawSleepLock::new(),
            valid: false,
            ty: 0,
            major: 0,
            minor: 0,
            nlink: 0,
            size: 0,
            addrs: [0; NUM_DIRECT + 2],
        }
    }
}

pub type InodePtr = NonNull<Inode>;

static INODE_TABLE: SpinLock<[UnsafeCell<Inode>; NINODE]> =
    SpinLock::new([const { UnsafeCell::new(Inode::zero()) }; NINODE]);

/// Allocates an inode on device `dev`, marking it in use by giving it
/// type `ty`.
///
/// Returns an unlocked but referenced inode.
pub fn ialloc(dev: u32, ty: i16) -> Result<InodePtr, KernelError> {
    let sb = super::super_block();

    for inum in 1..sb.ninodes {
        let ino = InodeNo::new(inum);
        let mut buf = block_io::bread(dev, sb.inode_block(ino).value());
        let offset = SuperBlock::inode_offset(ino);
        let dip = buf.view_at_mut::<Dinode>(offset);
        if dip.is_free() {
            // claim it by persisting the type right away.
            *dip = Dinode::zeroed();
            dip.ty = ty;
            log::log_block_write(&buf);
            drop(buf);
            return Ok(iget(dev, inum));
        }
        drop(buf);
    }
    kwarn!("ialloc: out of inodes");
    Err(KernelError::OutOfInodes)
}

/// Copies a modified in-memory inode to disk (through the log).
///
/// Must be called after every change to a field that lives on disk.
/// Caller must hold the inode's lock.
pub fn iupdate(ip: InodePtr) {
    let sb = super::super_block();

    unsafe {
        let ip = ip.as_ref();
        assert!(ip.lock.holding());
        let ino = InodeNo::new(ip.inum);
        let mut buf = block_io::bread(ip.dev, sb.inode_block(ino).value());
        let dip = buf.view_at_mut::<Dinode>(SuperBlock::inode_offset(ino));
        dip.ty = ip.ty;
        dip.major = ip.major;
        dip.minor = ip.minor;
        dip.nlink = ip.nlink;
        dip.size = ip.size;
        dip.addrs = ip.addrs;
        log::log_block_write(&buf);
        drop(buf);
    }
}

/// Finds the inode with number `inum` on device `dev` and returns its
/// in-memory copy, referenced but neither locked nor loaded.
pub fn iget(dev: u32, inum: u32) -> InodePtr {
    let table = INODE_TABLE.lock();

    // is the inode already in the table?
    let mut empty = None;
    for cell in &*table {
        let ip = unsafe { &mut *cell.get() };
        if ip.ref_ > 0 && ip.dev == dev && ip.inum == inum {
            ip.ref_ += 1;
            return ip.into();
        }
        if empty.is_none() && ip.ref_ == 0 {
            empty = Some(cell);
        }
    }

    let Some(cell) = empty else {
        panic!("iget: no free in-memory inodes");
    };

    let ip = unsafe { &mut *cell.get() };
    ip.dev = dev;
    ip.inum = inum;
    ip.ref_ = 1;
    ip.valid = false;
    NonNull::new(cell.get()).unwrap()
}

/// Increments the reference count for `ip`.
///
/// Returns `ip` to enable the `let ip = idup(ip);` idiom.
pub fn idup(ip: InodePtr) -> InodePtr {
    let _table = INODE_TABLE.lock();
    unsafe {
        (*ip.as_ptr()).ref_ += 1;
    }
    ip
}

/// Locks the given inode, reading it from disk if necessary.
pub fn ilock(ip: InodePtr) {
    let sb = super::super_block();

    unsafe {
        let ip = ip.as_ptr();
        assert!((*ip).ref_ > 0);
        (*ip).lock.acquire();

        if !(*ip).valid {
            let ino = InodeNo::new((*ip).inum);
            let buf = block_io::bread((*ip).dev, sb.inode_block(ino).value());
            let dip = buf.view_at::<Dinode>(SuperBlock::inode_offset(ino));
            (*ip).ty = dip.ty;
            (*ip).major = dip.major;
            (*ip).minor = dip.minor;
            (*ip).nlink = dip.nlink;
            (*ip).size = dip.size;
            (*ip).addrs = dip.addrs;
            drop(buf);
            (*ip).valid = true;
            assert_ne!((*ip).ty, 0, "ilock: free inode");
        }
    }
}

/// Unlocks the given inode.
pub fn iunlock(ip: InodePtr) {
    unsafe {
        let ip = ip.as_ptr();
        assert!((*ip).lock.holding() && (*ip).ref_ > 0);
        (*ip).lock.release();
    }
}

/// Drops a reference to an in-memory inode.
///
/// If that was the last reference and the inode has no links, the
/// inode (and its content) is freed on disk, so all calls must be
/// inside a transaction.
pub fn iput(ip: InodePtr) {
    let mut table = INODE_TABLE.lock();

    unsafe {
        let ip = ip.as_ptr();

        if (*ip).ref_ == 1 && (*ip).valid && (*ip).nlink == 0 {
            // no links and no other references: truncate and free.

            // ref_ == 1 means no other process can have the inode
            // locked, so this acquire won't block.
            (*ip).lock.acquire();

            drop(table);

            itrunc(NonNull::new(ip).unwrap());
            (*ip).ty = 0;
            iupdate(NonNull::new(ip).unwrap());
            (*ip).valid = false;

            (*ip).lock.release();

            table = INODE_TABLE.lock();
        }

        (*ip).ref_ -= 1;
    }
    drop(table);
}

/// Unlocks, then releases a reference.
pub fn iunlockput(ip: InodePtr) {
    iunlock(ip);
    iput(ip);
}

/// Returns the disk block holding the `ibn`th block of `ip`'s
/// content, allocating blocks (and indirect tables) on first touch.
fn bmap(ip: InodePtr, ibn: usize) -> Result<u32, KernelError> {
    unsafe {
        let dev = ip.as_ref().dev;
        let ip = ip.as_ptr();

        if ibn < NUM_DIRECT {
            if (*ip).addrs[ibn] == 0 {
                (*ip).addrs[ibn] = data_block::balloc(dev)?;
            }
            return Ok((*ip).addrs[ibn]);
        }

        let ibn = ibn - NUM_DIRECT;
        if ibn < NUM_INDIRECT {
            // single indirect: load the table, allocating as needed.
            if (*ip).addrs[Dinode::SINGLE] == 0 {
                (*ip).addrs[Dinode::SINGLE] = data_block::balloc(dev)?;
            }
            return indirect_lookup(dev, (*ip).addrs[Dinode::SINGLE], ibn);
        }

        let ibn = ibn - NUM_INDIRECT;
        if ibn < NUM_DOUBLE {
            // double indirect: two table levels, same pattern.
            if (*ip).addrs[Dinode::DOUBLE] == 0 {
                (*ip).addrs[Dinode::DOUBLE] = data_block::balloc(dev)?;
            }
            let level1 =
                indirect_lookup(dev, (*ip).addrs[Dinode::DOUBLE], ibn / NUM_INDIRECT)?;
            return indirect_lookup(dev, level1, ibn % NUM_INDIRECT);
        }

        panic!("bmap: block index out of range: {ibn}");
    }
}

/// Returns entry `i` of the indirect block `table_bn`, allocating the
/// target on first touch.
fn indirect_lookup(dev: u32, table_bn: u32, i: usize) -> Result<u32, KernelError> {
    let mut buf = block_io::bread(dev, table_bn);
    if let Some(bn) = buf.view::<IndirectBlock>().get(i) {
        return Ok(bn.value());
    }

    let bn = data_block::balloc(dev)?;
    buf.view_mut::<IndirectBlock>()
        .set(i, Some(rvos_fs_types::BlockNo::new(bn)));
    log::log_block_write(&buf);
    drop(buf);
    Ok(bn)
}

/// Truncates the inode: frees all content blocks, the indirect tables
/// included, and resets the size.
///
/// Caller must hold the inode's lock.
pub fn itrunc(ip: InodePtr) {
    unsafe {
        let dev = ip.as_ref().dev;
        let ip = ip.as_ptr();
        assert!((*ip).lock.holding());

        for bn in &mut (*ip).addrs[..NUM_DIRECT] {
            if *bn != 0 {
                data_block::bfree(dev, *bn);
                *bn = 0;
            }
        }

        if (*ip).addrs[Dinode::SINGLE] != 0 {
            free_indirect(dev, (*ip).addrs[Dinode::SINGLE], 1);
            (*ip).addrs[Dinode::SINGLE] = 0;
        }

        if (*ip).addrs[Dinode::DOUBLE] != 0 {
            free_indirect(dev, (*ip).addrs[Dinode::DOUBLE], 2);
            (*ip).addrs[Dinode::DOUBLE] = 0;
        }

        (*ip).size = 0;
        iupdate(NonNull::new(ip).unwrap());
    }
}

/// Frees the blocks referenced by an indirect table `depth` levels
/// deep, then the table itself.
fn free_indirect(dev: u32, table_bn: u32, depth: usize) {
    assert!(depth == 1 || depth == 2);

    {
        let buf = block_io::bread(dev, table_bn);
        for i in 0..NUM_INDIRECT {
            let Some(bn) = buf.view::<IndirectBlock>().get(i) else {
                continue;
            };
            if depth == 1 {
                data_block::bfree(dev, bn.value());
            } else {
                free_indirect(dev, bn.value(), depth - 1);
            }
        }
    }
    data_block::bfree(dev, table_bn);
}

/// Reads data from the inode's content.
///
/// Caller must hold the inode's lock. If `user_dst` is set, `dst` is a
/// user virtual address in the current process; otherwise a kernel
/// address. Returns the number of bytes read, exactly
/// `min(n, size - off)`.
pub fn readi(
    ip: InodePtr,
    user_dst: bool,
    dst: usize,
    off: usize,
    mut n: usize,
) -> Result<usize, KernelError> {
    unsafe {
        let ip = ip.as_ptr();
        assert!((*ip).lock.holding());

        let size = (*ip).size as usize;
        if off > size || off.checked_add(n).is_none() {
            return Err(KernelError::InvalidArgument);
        }
        if off + n > size {
            n = size - off;
        }

        let mut tot = 0;
        while tot < n {
            let off = off + tot;
            let dst = dst + tot;
            let bn = bmap(NonNull::new(ip).unwrap(), off / BLOCK_SIZE)?;
            let buf = block_io::bread((*ip).dev, bn);
            let m = usize::min(n - tot, BLOCK_SIZE - off % BLOCK_SIZE);
            let res =
                proc::either_copy_out_bytes(user_dst, dst, &buf.data()[off % BLOCK_SIZE..][..m]);
            drop(buf);
            res?;
            tot += m;
        }
        Ok(tot)
    }
}

/// Writes data to the inode's content, growing the file as needed.
///
/// Caller must hold the inode's lock. If `user_src` is set, `src` is a
/// user virtual address in the current process; otherwise a kernel
/// address. Returns the number of bytes written; less than `n` means
/// an error stopped the write early.
pub fn writei(
    ip: InodePtr,
    user_src: bool,
    src: usize,
    off: usize,
    n: usize,
) -> Result<usize, KernelError> {
    unsafe {
        let ip = ip.as_ptr();
        assert!((*ip).lock.holding());

        let size = (*ip).size as usize;
        if off > size || off.checked_add(n).is_none() {
            return Err(KernelError::InvalidArgument);
        }
        if (off + n) as u64 > MAX_FILE_SIZE {
            return Err(KernelError::FileTooLarge);
        }

        let mut tot = 0;
        while tot < n {
            let off = off + tot;
            let src = src + tot;
            let bn = bmap(NonNull::new(ip).unwrap(), off / BLOCK_SIZE)?;
            let mut buf = block_io::bread((*ip).dev, bn);
            let m = usize::min(n - tot, BLOCK_SIZE - off % BLOCK_SIZE);
            let res = proc::either_copy_in_bytes(
                &mut buf.data_mut()[off % BLOCK_SIZE..][..m],
                user_src,
                src,
            );
            if res.is_ok() {
                log::log_block_write(&buf);
            }
            drop(buf);
            res?;
            tot += m;
        }

        if off + tot > size {
            (*ip).size = (off + tot) as u32;
        }
        // write the inode back even if the size didn't change: bmap
        // may have added blocks to `addrs`.
        iupdate(NonNull::new(ip).unwrap());

        Ok(tot)
    }
}

/// Reads the directory entry at byte offset `off` of directory `dp`.
fn read_dirent(dp: InodePtr, off: usize) -> DirEntry {
    let mut de = DirEntry::zeroed();
    let n = readi(dp, false, de.as_bytes_mut().as_mut_ptr().addr(), off, size_of::<DirEntry>())
        .unwrap();
    assert_eq!(n, size_of::<DirEntry>(), "truncated directory entry");
    de
}

/// Writes the directory entry `de` at byte offset `off` of `dp`.
fn write_dirent(dp: InodePtr, off: usize, de: &DirEntry) -> Result<(), KernelError> {
    let n = writei(dp, false, de.as_bytes().as_ptr().addr(), off, size_of::<DirEntry>())?;
    assert_eq!(n, size_of::<DirEntry>());
    Ok(())
}

/// Frees the directory slot at byte offset `off` with a logged write.
pub fn clear_dirent(dp: InodePtr, off: usize) -> Result<(), KernelError> {
    write_dirent(dp, off, &DirEntry::zeroed())
}

/// Looks `name` up in the directory `dp`.
///
/// Returns the entry's inode (referenced, unlocked) and its byte
/// offset in the directory.
pub fn dir_lookup(dp: InodePtr, name: &[u8]) -> Result<(InodePtr, usize), KernelError> {
    unsafe {
        let dir = dp.as_ref();
        assert_eq!(dir.ty, T_DIR, "dir_lookup of non-directory");

        for off in (0..dir.size as usize).step_by(size_of::<DirEntry>()) {
            let de = read_dirent(dp, off);
            let Some(ino) = de.inum() else { continue };
            if de.is_same_name(name) {
                return Ok((iget(dir.dev, ino.value()), off));
            }
        }
    }
    Err(KernelError::EntryNotFound)
}

/// Writes a new directory entry (`name`, `inum`) into directory `dp`,
/// reusing the first free slot or appending at the end.
pub fn dir_link(dp: InodePtr, name: &[u8], inum: u32) -> Result<(), KernelError> {
    // the name must not already be present.
    if let Ok((ip, _off)) = dir_lookup(dp, name) {
        iput(ip);
        return Err(KernelError::AlreadyExists);
    }

    let size = unsafe { dp.as_ref().size } as usize;
    assert_eq!(size % size_of::<DirEntry>(), 0);

    let mut free_off = size;
    for off in (0..size).step_by(size_of::<DirEntry>()) {
        if read_dirent(dp, off).inum().is_none() {
            free_off = off;
            break;
        }
    }

    let mut de = DirEntry::zeroed();
    de.set_name(name);
    de.set_inum(Some(InodeNo::new(inum)));
    write_dirent(dp, free_off, &de)
}

/// Returns whether directory `dp` holds nothing besides `.` and `..`.
pub fn dir_is_empty(dp: InodePtr) -> bool {
    let de_size = size_of::<DirEntry>();
    let size = unsafe { dp.as_ref().size } as usize;
    assert_eq!(unsafe { dp.as_ref().ty }, T_DIR);

    // the first two entries are "." and "..".
    for off in (2 * de_size..size).step_by(de_size) {
        if read_dirent(dp, off).inum().is_some() {
            return false;
        }
    }
    true
}
