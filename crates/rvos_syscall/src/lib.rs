//! The user/kernel ABI: system call numbers, open flags, and the klog
//! level scale.
//!
//! Calls pass their number in `a7` and up to six arguments in `a0..a5`;
//! the result comes back in `a0`, with `usize::MAX` (-1) signalling an
//! error.

#![no_std]

use bitflags::bitflags;
use strum::{Display, FromRepr};

/// System call numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display)]
#[repr(usize)]
#[strum(serialize_all = "snake_case")]
pub enum SyscallCode {
    Exit = 0,
    Getpid = 1,
    Fork = 2,
    Wait = 3,
    Kill = 4,
    Write = 5,
    Read = 6,
    Open = 7,
    Close = 8,
    Unlink = 9,
    Sbrk = 10,
    Time = 11,
    Symlink = 12,
    SetCrashStage = 13,
    RecoverLog = 14,
    ClearCache = 15,
    Exec = 16,
    Dup = 17,
    Mknod = 18,
    Chdir = 19,
    Ticks = 20,
    Getpriority = 21,
    KlogDump = 22,
    KlogSetThreshold = 23,
    Sleep = 24,
}

bitflags! {
    /// `open()` mode bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct OpenFlags: usize {
        const RDONLY = 0x000;
        const WRONLY = 0x001;
        const RDWR = 0x002;
        const CREATE = 0x200;
    }
}

impl OpenFlags {
    /// Whether this mode permits reads.
    #[must_use]
    pub fn readable(&self) -> bool {
        !self.contains(Self::WRONLY)
    }

    /// Whether this mode permits writes.
    #[must_use]
    pub fn writable(&self) -> bool {
        self.intersects(Self::WRONLY | Self::RDWR)
    }
}

/// Kernel log levels, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, FromRepr, Display)]
#[repr(usize)]
#[strum(serialize_all = "UPPERCASE")]
pub enum KlogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_numbers() {
        assert_eq!(SyscallCode::from_repr(0), Some(SyscallCode::Exit));
        assert_eq!(SyscallCode::from_repr(16), Some(SyscallCode::Exec));
        assert_eq!(SyscallCode::from_repr(24), Some(SyscallCode::Sleep));
        assert_eq!(SyscallCode::from_repr(25), None);
        assert_eq!(SyscallCode::Mknod as usize, 18);
        assert_eq!(SyscallCode::KlogSetThreshold as usize, 23);
    }

    #[test]
    fn open_flag_access() {
        assert!(OpenFlags::RDONLY.readable());
        assert!(!OpenFlags::RDONLY.writable());
        assert!(!OpenFlags::WRONLY.readable());
        assert!(OpenFlags::WRONLY.writable());
        assert!(OpenFlags::RDWR.readable());
        assert!(OpenFlags::RDWR.writable());
        let create_rw = OpenFlags::CREATE | OpenFlags::RDWR;
        assert!(create_rw.readable() && create_rw.writable());
        assert_eq!(OpenFlags::CREATE.bits(), 0x200);
    }

    #[test]
    fn klog_level_scale() {
        assert!(KlogLevel::Error < KlogLevel::Debug);
        assert_eq!(KlogLevel::from_repr(3), Some(KlogLevel::Debug));
        assert_eq!(KlogLevel::from_repr(4), None);
    }
}
