//! Kernel logging: a spinlock-protected ring of formatted records with
//! separate thresholds for recording and console echo.
//!
//! Records at levels numerically at or below the record threshold are
//! kept in the ring (overwriting the oldest bytes when full); those at
//! or below the console threshold are also printed immediately.

use core::fmt::{self, Write as _};

use rvos_syscall::KlogLevel;

use crate::{console, error::KernelError, print, sync::SpinLock};

const KLOG_BUF_SIZE: usize = 4096;

struct Klog {
    buf: [u8; KLOG_BUF_SIZE],
    /// Index of the oldest byte.
    start: usize,
    /// Bytes currently held.
    len: usize,
    record_level: KlogLevel,
    console_level: KlogLevel,
}

impl Klog {
    const fn new() -> Self {
        Self {
            buf: [0; KLOG_BUF_SIZE],
            start: 0,
            len: 0,
            record_level: KlogLevel::Debug,
            console_level: KlogLevel::Warn,
        }
    }

    fn push_byte(&mut self, c: u8) {
        let idx = (self.start + self.len) % KLOG_BUF_SIZE;
        self.buf[idx] = c;
        if self.len == KLOG_BUF_SIZE {
            // full: overwrite the oldest byte.
            self.start = (self.start + 1) % KLOG_BUF_SIZE;
        } else {
            self.len += 1;
        }
    }
}

impl fmt::Write for Klog {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.bytes() {
            self.push_byte(c);
        }
        Ok(())
    }
}

static KLOG: SpinLock<Klog> = SpinLock::new(Klog::new());

pub fn init() {
    kinfo!("klog: ready");
}

pub fn log(level: KlogLevel, args: fmt::Arguments) {
    let mut klog = KLOG.lock();
    if level <= klog.record_level {
        let _ = write!(klog, "[{level}] {args}\n");
    }
    let echo = level <= klog.console_level;
    drop(klog);

    if echo {
        print!("[{level}] {args}\n");
    }
}

/// Prints the buffered records, oldest first.
pub fn dump() {
    let klog = KLOG.lock();
    for i in 0..klog.len {
        console::put_char(klog.buf[(klog.start + i) % KLOG_BUF_SIZE]);
    }
}

/// Adjusts the record and console thresholds.
pub fn set_threshold(record: usize, console: usize) -> Result<(), KernelError> {
    let record = KlogLevel::from_repr(record).ok_or(KernelError::InvalidArgument)?;
    let console = KlogLevel::from_repr(console).ok_or(KernelError::InvalidArgument)?;

    let mut klog = KLOG.lock();
    klog.record_level = record;
    klog.console_level = console;
    Ok(())
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {
        $crate::klog::log(::rvos_syscall::KlogLevel::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {
        $crate::klog::log(::rvos_syscall::KlogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {
        $crate::klog::log(::rvos_syscall::KlogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {
        $crate::klog::log(::rvos_syscall::KlogLevel::Debug, format_args!($($arg)*))
    };
}
