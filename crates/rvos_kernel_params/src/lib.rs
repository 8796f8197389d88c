//! Compile-time parameters shared by the kernel and the host tools.

#![no_std]

/// Maximum number of processes.
pub const NPROC: usize = 64;
/// Open files per process.
pub const NOFILE: usize = 16;
/// Open files per system.
pub const NFILE: usize = 100;
/// Maximum major device number.
pub const NDEV: usize = 10;
/// Maximum number of in-memory inodes.
pub const NINODE: usize = 50;
/// Size of the block cache.
pub const NBUF: usize = 32;
/// Buckets in the block cache hash index (prime).
pub const BUF_HASH_SIZE: usize = 37;
/// Maximum blocks one log transaction may dirty.
pub const MAX_OP_BLOCKS: usize = 10;
/// Maximum length of a path argument.
pub const MAX_PATH: usize = 128;
/// Maximum number of exec arguments.
pub const MAX_ARG: usize = 16;
/// How many times a symlink chain may be followed during resolution.
pub const MAX_SYMLINK_DEPTH: usize = 8;

/// Device number of the file system root disk.
pub const ROOT_DEV: u32 = 1;
/// Console major device number.
pub const CONSOLE_MAJOR: i16 = 1;

/// Total blocks in the file system image.
pub const FS_TOTAL_BLOCKS: usize = 2000;
/// Blocks reserved for the on-disk log (header + body).
pub const FS_LOG_BLOCKS: usize = 30;
/// Blocks reserved for the inode region.
pub const FS_INODE_BLOCKS: usize = 13;
/// Blocks reserved for the free bitmap.
pub const FS_BMAP_BLOCKS: usize = 1;
