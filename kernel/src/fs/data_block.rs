//! Data-block allocation over the on-disk free bitmap.
//!
//! All three operations run inside a log transaction.

use rvos_fs_types::{BITS_PER_BLOCK, BmapBlock};

use crate::{
    error::KernelError,
    fs::{block_io, log},
    kwarn,
};

/// Zeroes block `bn` through the log.
fn bzero(dev: u32, bn: u32) {
    let mut buf = block_io::bread(dev, bn);
    buf.data_mut().fill(0);
    log::log_block_write(&buf);
    drop(buf);
}

/// Allocates a zeroed disk block.
pub fn balloc(dev: u32) -> Result<u32, KernelError> {
    let sb = super::super_block();
    let size = sb.size as usize;

    for bn0 in (0..size).step_by(BITS_PER_BLOCK) {
        let mut buf = block_io::bread(dev, sb.bmap_block(bn0 as u32).value());
        let found = (0..BITS_PER_BLOCK)
            .take_while(|bit| bn0 + bit < size)
            .find(|&bit| !buf.view::<BmapBlock>().is_allocated(bit));
        let Some(bit) = found else {
            drop(buf);
            continue;
        };

        buf.view_mut::<BmapBlock>().allocate(bit); // mark block in use
        log::log_block_write(&buf);
        drop(buf);

        let bn = (bn0 + bit) as u32;
        bzero(dev, bn);
        return Ok(bn);
    }
    kwarn!("balloc: out of blocks");
    Err(KernelError::OutOfBlocks)
}

/// Frees disk block `bn`.
pub fn bfree(dev: u32, bn: u32) {
    let sb = super::super_block();
    let mut buf = block_io::bread(dev, sb.bmap_block(bn).value());
    let bit = bn as usize % BITS_PER_BLOCK;
    assert!(
        buf.view::<BmapBlock>().is_allocated(bit),
        "freeing free block {bn}"
    );
    buf.view_mut::<BmapBlock>().free(bit);
    log::log_block_write(&buf);
    drop(buf);
}
