//! The write-ahead redo log.
//!
//! A log transaction contains the updates of multiple FS system calls;
//! the system only commits when no FS system call is active, so a
//! commit never writes an uncommitted call's data. Each syscall
//! brackets its updates with [`begin_transaction`]/[`end_transaction`].
//!
//! The on-disk format:
//!
//! ```text
//! header block, containing block #s for block A, B, C, ...
//! block A
//! block B
//! block C
//! ...
//! ```
//!
//! At any crash point, either a committed transaction is fully applied
//! by replay or none of it is; the header write is the commit point.

use core::sync::atomic::{AtomicUsize, Ordering};

use dataview::PodMethods as _;
use rvos_fs_types::{BlockNo, LogHeader, SuperBlock};

use crate::{
    error::KernelError,
    fs::block_io::{self, Buf},
    param::{MAX_OP_BLOCKS, ROOT_DEV},
    sync::{SpinLock, SpinLockCondVar},
};

struct Log {
    start: u32,
    size: u32,
    /// How many FS system calls are executing.
    outstanding: usize,
    /// In commit(); please wait.
    committing: bool,
    dev: u32,
    header: LogHeader,
}

static LOG: SpinLock<Log> = SpinLock::new(Log {
    start: 0,
    size: 0,
    outstanding: 0,
    committing: false,
    dev: ROOT_DEV,
    header: LogHeader::empty(),
});
static LOG_CHANGED: SpinLockCondVar = SpinLockCondVar::new();

/// Testing hook: 0 = run commits to completion, 2 = abandon a commit
/// before the header write (the transaction is lost), 1 = abandon it
/// after the header write but before install (replay completes it).
static CRASH_STAGE: AtomicUsize = AtomicUsize::new(0);

pub fn set_crash_stage(stage: usize) -> Result<(), KernelError> {
    if stage > 2 {
        return Err(KernelError::InvalidArgument);
    }
    CRASH_STAGE.store(stage, Ordering::Relaxed);
    Ok(())
}

/// Reads the on-disk log header, replays any committed transaction,
/// and clears the header.
pub fn init(dev: u32, sb: &SuperBlock) {
    assert!(size_of::<LogHeader>() <= block_io::BLOCK_SIZE);

    let mut log = LOG.lock();
    log.start = sb.logstart;
    log.size = sb.nlog;
    log.dev = dev;
    drop(log);

    recover();
}

/// Called at the start of each FS system call.
///
/// Waits until the log is neither committing nor too full to promise
/// this call its block budget.
pub fn begin_transaction() {
    let mut log = LOG.lock();
    loop {
        if log.committing {
            log = LOG_CHANGED.wait(log);
            continue;
        }
        if log.header.len() + (log.outstanding + 1) * MAX_OP_BLOCKS > log.size as usize {
            // this call might exhaust log space; wait for a commit.
            log = LOG_CHANGED.wait(log);
            continue;
        }
        log.outstanding += 1;
        drop(log);
        break;
    }
}

/// Called at the end of each FS system call; commits if this was the
/// last outstanding call.
pub fn end_transaction() {
    let mut do_commit = false;

    let mut log = LOG.lock();
    assert!(log.outstanding > 0, "end_transaction outside transaction");
    log.outstanding -= 1;
    assert!(!log.committing);
    if log.outstanding == 0 {
        do_commit = true;
        log.committing = true;
    } else {
        // begin_transaction() may be waiting for log space, and
        // decrementing outstanding has decreased the reserved amount.
        LOG_CHANGED.notify();
    }
    drop(log);

    if do_commit {
        // commit without holding the log lock, since committing
        // sleeps on disk I/O; `committing` keeps everyone else out.
        commit();
        let mut log = LOG.lock();
        log.committing = false;
        LOG_CHANGED.notify();
        drop(log);
    }
}

/// Runs `f` inside a transaction.
pub fn with_transaction<T>(f: impl FnOnce() -> T) -> T {
    begin_transaction();
    let res = f();
    end_transaction();
    res
}

/// Records `b` as modified in the current transaction, pinning it in
/// the cache until the commit installs it. Duplicate writes to one
/// block coalesce.
pub fn log_block_write(b: &Buf) {
    let mut log = LOG.lock();
    assert!(
        log.header.len() < log.size as usize - 1,
        "transaction too big"
    );
    assert!(log.outstanding > 0, "log write outside transaction");

    let bn = BlockNo::new(b.blockno());
    if log.header.find(bn).is_none() {
        // new block for this transaction
        b.pin();
        let n = log.header.len();
        log.header.set_block(n, bn);
        log.header.set_len(n + 1);
    }
}

/// Replays the on-disk log: if the header records a committed
/// transaction, installs it, then clears the header. Also the
/// `recover_log` syscall.
pub fn recover() {
    let (dev, start) = {
        let log = LOG.lock();
        (log.dev, log.start)
    };

    let header = read_head(dev, start);
    install_trans(dev, start, &header, true);
    let mut cleared = LogHeader::zeroed();
    write_head(dev, start, &cleared);

    let mut log = LOG.lock();
    core::mem::swap(&mut log.header, &mut cleared);
    drop(log);
}

/// Copies committed blocks from the log region to their home
/// locations.
fn install_trans(dev: u32, start: u32, header: &LogHeader, recovering: bool) {
    for tail in 0..header.len() {
        let log_buf = block_io::bread(dev, start + tail as u32 + 1);
        let mut dst_buf = block_io::bread(dev, header.block(tail).value());
        dst_buf.data_mut().copy_from_slice(log_buf.data());
        dst_buf.write();
        if !recovering {
            dst_buf.unpin();
        }
        drop(log_buf);
        drop(dst_buf);
    }
}

/// Reads the log header from disk.
fn read_head(dev: u32, start: u32) -> LogHeader {
    let buf = block_io::bread(dev, start);
    let disk_header = buf.view::<LogHeader>();
    assert!(
        disk_header.len() <= rvos_fs_types::LOG_HEADER_SLOTS,
        "bad log header"
    );
    let mut header = LogHeader::zeroed();
    header.as_bytes_mut().copy_from_slice(disk_header.as_bytes());
    drop(buf);
    header
}

/// Writes `header` to the log's header block; with entries present
/// this is the commit point of a transaction.
fn write_head(dev: u32, start: u32, header: &LogHeader) {
    let mut buf = block_io::bread(dev, start);
    buf.view_mut::<LogHeader>()
        .as_bytes_mut()
        .copy_from_slice(header.as_bytes());
    buf.write();
    drop(buf);
}

/// Copies modified blocks from the cache into the log region.
fn write_body(dev: u32, start: u32, header: &LogHeader) {
    for tail in 0..header.len() {
        let from_buf = block_io::bread(dev, header.block(tail).value());
        let mut to_buf = block_io::bread(dev, start + tail as u32 + 1);
        to_buf.data_mut().copy_from_slice(from_buf.data());
        to_buf.write();
        drop(from_buf);
        drop(to_buf);
    }
}

fn commit() {
    // `committing` is set, so the header is stable; snapshot it and
    // run the disk I/O without the log lock.
    let (dev, start, header) = {
        let log = LOG.lock();
        let mut header = LogHeader::zeroed();
        header.as_bytes_mut().copy_from_slice(log.header.as_bytes());
        (log.dev, log.start, header)
    };
    if header.is_empty() {
        return;
    }

    write_body(dev, start, &header); // modified blocks from cache to log

    if CRASH_STAGE.load(Ordering::Relaxed) == 2 {
        // simulated crash before the commit point: the transaction is
        // never installed.
        return;
    }

    write_head(dev, start, &header); // header to disk -- the real commit

    if CRASH_STAGE.load(Ordering::Relaxed) == 1 {
        // simulated crash after the commit point: recovery installs
        // the transaction.
        return;
    }

    install_trans(dev, start, &header, false); // install to home locations

    let cleared = LogHeader::zeroed();
    write_head(dev, start, &cleared); // erase the transaction from the log
    LOG.lock().header.set_len(0);
}
