//! File system implementation. Five layers:
//!
//!   + Blocks: allocator for raw disk blocks.
//!   + Log: crash recovery for multi-step updates.
//!   + Files: inode allocator, reading, writing, metadata.
//!   + Directories: inodes with special contents (lists of other
//!     inodes).
//!   + Names: paths like /usr/doc/notes.txt, with symbolic links.
//!
//! The (higher-level) system call implementations are in
//! `syscall/file.rs`.

use rvos_fs_types::SuperBlock;

use crate::{kinfo, sync::Once};

pub mod block_io;
pub mod data_block;
pub mod inode;
pub mod log;
pub mod path;
pub mod virtio;
pub mod virtio_disk;

pub use block_io::BLOCK_SIZE;

// one superblock per disk device, but we run with only one device.
static SUPER_BLOCK: Once<SuperBlock> = Once::new();

pub(crate) fn super_block() -> &'static SuperBlock {
    SUPER_BLOCK.get()
}

/// Mounts the file system on `dev`: reads and checks the superblock,
/// then replays the log.
///
/// Reading sleeps on disk I/O, so this runs in the first process, not
/// from main().
pub fn init_in_proc(dev: u32) {
    let buf = block_io::bread(dev, SuperBlock::SUPER_BLOCK_NO.value());
    SUPER_BLOCK.init_by_ref(buf.view::<SuperBlock>());
    drop(buf);

    let sb = SUPER_BLOCK.get();
    assert_eq!(sb.magic, SuperBlock::FS_MAGIC, "bad file system magic");
    log::init(dev, sb);

    kinfo!(
        "fs: superblock total={} data={} ninodes={}",
        sb.size,
        sb.nblocks,
        sb.ninodes
    );
    kinfo!(
        "fs: layout log[{}..{}) inode[{}..{}) bmap={}",
        sb.logstart,
        sb.logstart + sb.nlog,
        sb.inodestart,
        sb.bmapstart,
        sb.bmapstart
    );
}
