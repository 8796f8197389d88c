//! The block cache: a fixed pool of block-sized buffers holding cached
//! copies of disk blocks.
//!
//! Two indices over the pool: a doubly-linked LRU list (head = most
//! recently used) driving eviction, and a hash table keyed by
//! `(dev, blockno)` driving lookup. A buffer with a nonzero reference
//! count is never evicted; the log pins buffers to keep modified
//! blocks resident until commit. Only the holder of a buffer's
//! sleeplock may touch its data.

use core::cell::UnsafeCell;

use bitflags::bitflags;
use dataview::{DataView, Pod};

use crate::{
    fs::virtio_disk,
    param::{BUF_HASH_SIZE, NBUF},
    sync::{RawSleepLock, SpinLock},
};

/// Block size in bytes.
pub const BLOCK_SIZE: usize = rvos_fs_types::BLOCK_SIZE;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct BufFlags: u32 {
        /// The data mirrors the disk block.
        const VALID = 1 << 0;
        /// The data is being written back.
        const DIRTY = 1 << 1;
    }
}

/// Index of the LRU list's sentinel node in `meta`.
const HEAD: usize = NBUF;

/// Buffer bookkeeping; guarded by the cache spinlock.
struct BufMeta {
    dev: u32,
    blockno: u32,
    flags: BufFlags,
    refcnt: u32,
    /// Whether `dev`/`blockno` are live in a hash bucket.
    hashed: bool,
    prev: usize,
    next: usize,
    hash_next: Option<usize>,
}

impl BufMeta {
    const fn new() -> Self {
        Self {
            dev: 0,
            blockno: 0,
            flags: BufFlags::empty(),
            refcnt: 0,
            hashed: false,
            prev: 0,
            next: 0,
            hash_next: None,
        }
    }
}

struct Cache {
    meta: [BufMeta; NBUF + 1],
    hash: [Option<usize>; BUF_HASH_SIZE],
}

impl Cache {
    fn bucket(dev: u32, blockno: u32) -> usize {
        ((dev ^ blockno) as usize) % BUF_HASH_SIZE
    }

    fn hash_insert(&mut self, i: usize) {
        let bucket = Self::bucket(self.meta[i].dev, self.meta[i].blockno);
        self.meta[i].hash_next = self.hash[bucket];
        self.hash[bucket] = Some(i);
        self.meta[i].hashed = true;
    }

    fn hash_remove(&mut self, i: usize) {
        let bucket = Self::bucket(self.meta[i].dev, self.meta[i].blockno);
        let mut slot = self.hash[bucket];
        if slot == Some(i) {
            self.hash[bucket] = self.meta[i].hash_next;
        } else {
            loop {
                let j = slot.expect("buffer missing from its hash bucket");
                if self.meta[j].hash_next == Some(i) {
                    self.meta[j].hash_next = self.meta[i].hash_next;
                    break;
                }
                slot = self.meta[j].hash_next;
            }
        }
        self.meta[i].hash_next = None;
        self.meta[i].hashed = false;
    }

    fn lru_detach(&mut self, i: usize) {
        let (prev, next) = (self.meta[i].prev, self.meta[i].next);
        self.meta[prev].next = next;
        self.meta[next].prev = prev;
    }

    fn lru_insert_head(&mut self, i: usize) {
        let first = self.meta[HEAD].next;
        self.meta[i].prev = HEAD;
        self.meta[i].next = first;
        self.meta[first].prev = i;
        self.meta[HEAD].next = i;
    }
}

static CACHE: SpinLock<Cache> = SpinLock::new(Cache {
    meta: [const { BufMeta::new() }; NBUF + 1],
    hash: [None; BUF_HASH_SIZE],
});

/// Buffer contents; the sleeplock serializes access across disk I/O.
struct BufData {
    lock: RawSleepLock,
    data: UnsafeCell<[u8; BLOCK_SIZE]>,
}

unsafe impl Sync for BufData {}

static BUFS: [BufData; NBUF] = [const {
    BufData {
        lock: RawSleepLock::new(),
        data: UnsafeCell::new([0; BLOCK_SIZE]),
    }
}; NBUF];

/// Links every buffer into the LRU list.
pub fn init() {
    let mut cache = CACHE.lock();
    cache.meta[HEAD].prev = HEAD;
    cache.meta[HEAD].next = HEAD;
    for i in 0..NBUF {
        cache.lru_insert_head(i);
    }
}

/// A locked, referenced cache buffer.
///
/// Dropping it releases the sleeplock and the reference, moving the
/// buffer to the LRU head once unreferenced.
pub struct Buf {
    idx: usize,
    dev: u32,
    blockno: u32,
}

/// Looks up the buffer for `blockno` on `dev`, reading it from disk if
/// it is not cached, and returns it locked.
pub fn bread(dev: u32, blockno: u32) -> Buf {
    assert_eq!(dev, crate::param::ROOT_DEV, "unknown device: {dev}");
    let buf = bget(dev, blockno);

    let valid = {
        let cache = CACHE.lock();
        cache.meta[buf.idx].flags.contains(BufFlags::VALID)
    };
    if !valid {
        virtio_disk::read(blockno, unsafe { &mut *BUFS[buf.idx].data.get() });
        CACHE.lock().meta[buf.idx].flags.insert(BufFlags::VALID);
    }
    buf
}

/// Finds the cache slot for `(dev, blockno)`: a hash hit, or the least
/// recently used unreferenced buffer, recycled.
fn bget(dev: u32, blockno: u32) -> Buf {
    let mut cache = CACHE.lock();

    // is the block already cached?
    let bucket = Cache::bucket(dev, blockno);
    let mut slot = cache.hash[bucket];
    while let Some(i) = slot {
        if cache.meta[i].dev == dev && cache.meta[i].blockno == blockno {
            cache.meta[i].refcnt += 1;
            drop(cache);
            BUFS[i].lock.acquire();
            return Buf { idx: i, dev, blockno };
        }
        slot = cache.meta[i].hash_next;
    }

    // not cached; recycle the least recently used unreferenced buffer.
    let mut i = cache.meta[HEAD].prev;
    while i != HEAD {
        if cache.meta[i].refcnt == 0 {
            if cache.meta[i].hashed {
                cache.hash_remove(i);
            }
            cache.meta[i].dev = dev;
            cache.meta[i].blockno = blockno;
            cache.meta[i].flags = BufFlags::empty();
            cache.meta[i].refcnt = 1;
            cache.hash_insert(i);
            drop(cache);
            BUFS[i].lock.acquire();
            return Buf { idx: i, dev, blockno };
        }
        i = cache.meta[i].prev;
    }
    panic!("bget: no buffers");
}

impl Buf {
    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    pub fn data(&self) -> &[u8; BLOCK_SIZE] {
        assert!(BUFS[self.idx].lock.holding());
        unsafe { &*BUFS[self.idx].data.get() }
    }

    pub fn data_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        assert!(BUFS[self.idx].lock.holding());
        unsafe { &mut *BUFS[self.idx].data.get() }
    }

    /// Views the buffer contents as an on-disk structure.
    pub fn view<T: Pod>(&self) -> &T {
        self.view_at(0)
    }

    pub fn view_mut<T: Pod>(&mut self) -> &mut T {
        self.view_at_mut(0)
    }

    /// Views the on-disk structure at byte `offset` into the block.
    pub fn view_at<T: Pod>(&self, offset: usize) -> &T {
        DataView::from(&self.data()[..]).get::<T>(offset)
    }

    pub fn view_at_mut<T: Pod>(&mut self, offset: usize) -> &mut T {
        DataView::from_mut(&mut self.data_mut()[..]).get_mut::<T>(offset)
    }

    /// Writes the buffer's contents to disk.
    pub fn write(&mut self) {
        assert!(BUFS[self.idx].lock.holding(), "bwrite without lock");
        CACHE.lock().meta[self.idx].flags.insert(BufFlags::DIRTY);
        virtio_disk::write(self.blockno, unsafe { &*BUFS[self.idx].data.get() });
        CACHE.lock().meta[self.idx].flags.remove(BufFlags::DIRTY);
    }

    /// Takes an extra reference so the buffer survives release; the
    /// log uses this to keep modified blocks resident until commit.
    pub fn pin(&self) {
        CACHE.lock().meta[self.idx].refcnt += 1;
    }

    /// Drops the reference taken by [`Buf::pin`].
    pub fn unpin(&self) {
        let mut cache = CACHE.lock();
        assert!(cache.meta[self.idx].refcnt > 1, "unpin of unpinned buffer");
        cache.meta[self.idx].refcnt -= 1;
    }
}

impl Drop for Buf {
    fn drop(&mut self) {
        BUFS[self.idx].lock.release();

        let mut cache = CACHE.lock();
        cache.meta[self.idx].refcnt -= 1;
        if cache.meta[self.idx].refcnt == 0 {
            // no one is waiting for it; most recently used.
            cache.lru_detach(self.idx);
            cache.lru_insert_head(self.idx);
        }
    }
}

/// Drops every buffer's cached contents and references; a testing hook
/// used by the crash-recovery scenarios.
pub fn clear_cache() {
    let mut cache = CACHE.lock();
    for i in 0..NBUF {
        cache.meta[i].flags = BufFlags::empty();
        cache.meta[i].refcnt = 0;
    }
}
