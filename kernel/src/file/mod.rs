//! The system-wide table of open files.
//!
//! Entries are shared between processes through reference counts
//! (`dup`/`fork` raise them, `close` lowers them) and dispatch reads
//! and writes to the inode layer or to a device driver.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    error::KernelError,
    fs::{self, BLOCK_SIZE, inode::InodePtr},
    kinfo,
    param::{MAX_OP_BLOCKS, NDEV, NFILE},
    sync::SpinLock,
};

/// A device driver's read/write entry points. `user` says whether
/// `addr` is a user or kernel address.
#[derive(Clone, Copy)]
pub struct DevSw {
    pub read: fn(user: bool, addr: usize, n: usize) -> Result<usize, KernelError>,
    pub write: fn(user: bool, addr: usize, n: usize) -> Result<usize, KernelError>,
}

struct DeviceTable {
    devices: [Option<DevSw>; NDEV],
}

static DEVICE_TABLE: SpinLock<DeviceTable> = SpinLock::new(DeviceTable {
    devices: [None; NDEV],
});

/// Installs the driver for major device number `major`.
pub fn register_device(major: i16, dev: DevSw) {
    let major = usize::try_from(major).unwrap();
    DEVICE_TABLE.lock().devices[major] = Some(dev);
}

fn device(major: i16) -> Result<DevSw, KernelError> {
    usize::try_from(major)
        .ok()
        .and_then(|major| *DEVICE_TABLE.lock().devices.get(major)?)
        .ok_or(KernelError::BadFileDescriptor)
}

#[derive(Clone, Copy)]
enum FileKind {
    /// Regular file or directory, read/written through the inode.
    Inode { ip: InodePtr },
    /// Device node, dispatched through the device switch table; the
    /// inode is absent for the bare `console` path.
    Device { major: i16, ip: Option<InodePtr> },
}

struct FileEntry {
    /// Reference count; 0 marks a free entry.
    ref_: u32,
    readable: bool,
    writable: bool,
    kind: Option<FileKind>,
}

impl FileEntry {
    const fn free() -> Self {
        Self {
            ref_: 0,
            readable: false,
            writable: false,
            kind: None,
        }
    }
}

static FILE_TABLE: SpinLock<[FileEntry; NFILE]> =
    SpinLock::new([const { FileEntry::free() }; NFILE]);

/// Read/write offsets live outside the spinlock: they are only
/// touched while the file's inode is locked.
static FILE_OFFSETS: [AtomicUsize; NFILE] = [const { AtomicUsize::new(0) }; NFILE];

pub fn init() {
    kinfo!("file: table ready ({NFILE} entries)");
}

/// An open file: an index into the file table, holding one reference.
pub struct File {
    idx: usize,
}

/// Allocates a file table entry for an inode.
pub fn alloc_inode_file(ip: InodePtr, readable: bool, writable: bool) -> Result<File, KernelError> {
    alloc(FileKind::Inode { ip }, readable, writable)
}

/// Allocates a file table entry for a device.
pub fn alloc_device_file(
    major: i16,
    ip: Option<InodePtr>,
    readable: bool,
    writable: bool,
) -> Result<File, KernelError> {
    alloc(FileKind::Device { major, ip }, readable, writable)
}

fn alloc(kind: FileKind, readable: bool, writable: bool) -> Result<File, KernelError> {
    let mut table = FILE_TABLE.lock();
    let (idx, entry) = table
        .iter_mut()
        .enumerate()
        .find(|(_, entry)| entry.ref_ == 0)
        .ok_or(KernelError::TooManyOpenFilesSystem)?;

    entry.ref_ = 1;
    entry.readable = readable;
    entry.writable = writable;
    entry.kind = Some(kind);
    FILE_OFFSETS[idx].store(0, Ordering::Relaxed);
    Ok(File { idx })
}

impl File {
    /// Takes another reference to the same open file.
    pub fn dup(&self) -> File {
        let mut table = FILE_TABLE.lock();
        assert!(table[self.idx].ref_ > 0);
        table[self.idx].ref_ += 1;
        File { idx: self.idx }
    }

    /// Drops a reference; the last close releases the entry and its
    /// inode.
    pub fn close(self) {
        let mut table = FILE_TABLE.lock();
        assert!(table[self.idx].ref_ > 0);
        table[self.idx].ref_ -= 1;
        if table[self.idx].ref_ > 0 {
            return;
        }

        // snapshot the entry, free the slot, then clean up without
        // the table lock: iput may sleep.
        let kind = table[self.idx].kind.take();
        table[self.idx] = FileEntry::free();
        drop(table);

        match kind {
            Some(FileKind::Inode { ip }) | Some(FileKind::Device { ip: Some(ip), .. }) => {
                fs::log::with_transaction(|| fs::inode::iput(ip));
            }
            Some(FileKind::Device { ip: None, .. }) | None => {}
        }
    }

    fn kind(&self) -> FileKind {
        let table = FILE_TABLE.lock();
        table[self.idx].kind.expect("file entry in use")
    }

    fn check_readable(&self) -> Result<(), KernelError> {
        let table = FILE_TABLE.lock();
        if !table[self.idx].readable {
            return Err(KernelError::NotReadable);
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), KernelError> {
        let table = FILE_TABLE.lock();
        if !table[self.idx].writable {
            return Err(KernelError::NotWritable);
        }
        Ok(())
    }

    /// Reads from the file into `addr`, advancing the offset for
    /// inode-backed files.
    pub fn read(&self, user_dst: bool, addr: usize, n: usize) -> Result<usize, KernelError> {
        self.check_readable()?;

        match self.kind() {
            FileKind::Device { major, .. } => (device(major)?.read)(user_dst, addr, n),
            FileKind::Inode { ip } => {
                fs::inode::ilock(ip);
                let off = FILE_OFFSETS[self.idx].load(Ordering::Relaxed);
                let res = fs::inode::readi(ip, user_dst, addr, off, n);
                if let Ok(read) = res {
                    FILE_OFFSETS[self.idx].store(off + read, Ordering::Relaxed);
                }
                fs::inode::iunlock(ip);
                res
            }
        }
    }

    /// Writes `n` bytes from `addr` to the file.
    ///
    /// Inode writes are split into chunks sized so that each fits a
    /// single log transaction, with inode, indirect, bitmap, and two
    /// blocks of slop for unaligned block spills.
    pub fn write(&self, user_src: bool, addr: usize, n: usize) -> Result<usize, KernelError> {
        self.check_writable()?;

        match self.kind() {
            FileKind::Device { major, .. } => (device(major)?.write)(user_src, addr, n),
            FileKind::Inode { ip } => {
                let max = ((MAX_OP_BLOCKS - 1 - 1 - 2) / 2) * BLOCK_SIZE;
                let mut written = 0;
                while written < n {
                    let chunk = usize::min(n - written, max);

                    let wrote = fs::log::with_transaction(|| {
                        fs::inode::ilock(ip);
                        let off = FILE_OFFSETS[self.idx].load(Ordering::Relaxed);
                        let res = fs::inode::writei(ip, user_src, addr + written, off, chunk);
                        if let Ok(wrote) = res {
                            FILE_OFFSETS[self.idx].store(off + wrote, Ordering::Relaxed);
                        }
                        fs::inode::iunlock(ip);
                        res
                    })?;

                    if wrote != chunk {
                        // short write; error out rather than loop.
                        return Err(KernelError::FileTooLarge);
                    }
                    written += wrote;
                }
                Ok(written)
            }
        }
    }

}
