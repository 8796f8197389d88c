//! Physical frame allocator, for user pages, kernel stacks, page-table
//! pages, and the trapframe pages.
//!
//! One bitmap bit and one reference count per 4096-byte frame of
//! `[KERNBASE, PHYSTOP)`. A frame is free iff its refcount is zero;
//! copy-on-write sharing raises the count above one.

use core::{
    alloc::{AllocError, Allocator, Layout},
    ptr::NonNull,
};

use crate::{
    error::KernelError,
    memory::{
        PAGE_SIZE, PageRound as _, PhysAddr,
        layout::{KERNBASE, KERNEL_END, PHYSTOP},
    },
    sync::SpinLock,
};

const NPAGES: usize = (PHYSTOP - KERNBASE) / PAGE_SIZE;
const BITS_PER_WORD: usize = u64::BITS as usize;
const BITMAP_WORDS: usize = NPAGES.div_ceil(BITS_PER_WORD);

struct FrameTable {
    /// One bit per frame; set = allocated.
    bitmap: [u64; BITMAP_WORDS],
    /// Sharers per frame; zero iff the bitmap bit is clear.
    refcount: [i32; NPAGES],
    free_frames: usize,
}

static FRAMES: SpinLock<FrameTable> = SpinLock::new(FrameTable {
    bitmap: [0; BITMAP_WORDS],
    refcount: [0; NPAGES],
    free_frames: 0,
});

fn frame_index(pa: PhysAddr) -> usize {
    let addr = pa.addr();
    assert!(addr.is_page_aligned(), "unaligned frame address: {pa:#x}");
    assert!(
        (KERNBASE..PHYSTOP).contains(&addr),
        "frame address out of range: {pa:#x}"
    );
    (addr - KERNBASE) / PAGE_SIZE
}

fn index_to_frame(index: usize) -> PhysAddr {
    PhysAddr::new(KERNBASE + index * PAGE_SIZE)
}

impl FrameTable {
    fn test(&self, index: usize) -> bool {
        self.bitmap[index / BITS_PER_WORD] >> (index % BITS_PER_WORD) & 1 != 0
    }

    fn set(&mut self, index: usize) {
        self.bitmap[index / BITS_PER_WORD] |= 1 << (index % BITS_PER_WORD);
    }

    fn clear(&mut self, index: usize) {
        self.bitmap[index / BITS_PER_WORD] &= !(1 << (index % BITS_PER_WORD));
    }

    /// First-fit scan for a single free frame.
    fn find_free(&self) -> Option<usize> {
        for (w, word) in self.bitmap.iter().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones() as usize;
                let index = w * BITS_PER_WORD + bit;
                if index < NPAGES {
                    return Some(index);
                }
            }
        }
        None
    }

    /// Linear scan for `n` contiguous free frames.
    fn find_free_run(&self, n: usize) -> Option<usize> {
        let mut start = 0;
        let mut count = 0;
        for index in 0..NPAGES {
            if self.test(index) {
                count = 0;
            } else {
                if count == 0 {
                    start = index;
                }
                count += 1;
                if count == n {
                    return Some(start);
                }
            }
        }
        None
    }

    fn take(&mut self, index: usize) {
        assert!(!self.test(index), "frame already allocated");
        self.set(index);
        self.refcount[index] = 1;
        self.free_frames -= 1;
    }
}

/// Marks the kernel image (and everything below `KERNEL_END`, which
/// includes this allocator's own tables) allocated, and the rest of RAM
/// free.
pub fn init() {
    let kernel_end = unsafe { KERNEL_END }.page_roundup();

    let mut frames = FRAMES.lock();
    for index in 0..frame_index(PhysAddr::new(kernel_end)) {
        frames.set(index);
        frames.refcount[index] = 1;
    }
    frames.free_frames = NPAGES - frame_index(PhysAddr::new(kernel_end));
}

/// Allocates one zeroed 4096-byte frame.
pub fn alloc_page() -> Result<NonNull<u8>, KernelError> {
    let mut frames = FRAMES.lock();
    let index = frames.find_free().ok_or(KernelError::NoFreePage)?;
    frames.take(index);
    drop(frames);

    let page = index_to_frame(index).as_mut_ptr::<u8>();
    unsafe {
        page.write_bytes(0, PAGE_SIZE);
    }
    Ok(page)
}

/// Allocates `n` physically contiguous zeroed frames, returning the
/// first.
pub fn alloc_pages(n: usize) -> Result<NonNull<u8>, KernelError> {
    assert!(n > 0);
    let mut frames = FRAMES.lock();
    if frames.free_frames < n {
        return Err(KernelError::NoFreePage);
    }
    let start = frames.find_free_run(n).ok_or(KernelError::NoFreePage)?;
    for index in start..start + n {
        frames.take(index);
    }
    drop(frames);

    let page = index_to_frame(start).as_mut_ptr::<u8>();
    unsafe {
        page.write_bytes(0, n * PAGE_SIZE);
    }
    Ok(page)
}

/// Drops one reference to the frame at `pa`; the frame is zeroed and
/// freed when the count reaches zero.
///
/// # Panics
///
/// Panics on an unaligned or out-of-range address, or a double free.
pub unsafe fn free_page(pa: NonNull<u8>) {
    let index = frame_index(PhysAddr::new(pa.addr().get()));

    let mut frames = FRAMES.lock();
    assert!(frames.test(index), "double free of frame {index}");
    assert!(frames.refcount[index] > 0, "bad refcount on frame {index}");

    frames.refcount[index] -= 1;
    if frames.refcount[index] > 0 {
        return;
    }

    frames.clear(index);
    frames.free_frames += 1;
    drop(frames);

    unsafe {
        pa.write_bytes(0, PAGE_SIZE);
    }
}

/// Adds a reference to an allocated frame.
pub fn incref(pa: PhysAddr) {
    let index = frame_index(pa);
    let mut frames = FRAMES.lock();
    assert!(frames.test(index), "incref of free frame {index}");
    frames.refcount[index] += 1;
}

/// Returns the reference count of the frame at `pa`.
pub fn refcount(pa: PhysAddr) -> i32 {
    let index = frame_index(pa);
    FRAMES.lock().refcount[index]
}

/// `core::alloc` adapter so page-table pages can live in
/// `Box<_, PageFrameAllocator>`.
#[derive(Clone)]
pub struct PageFrameAllocator;

unsafe impl Allocator for PageFrameAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        assert!(layout.size() <= PAGE_SIZE);
        assert!(layout.align() <= PAGE_SIZE);
        let page = alloc_page().map_err(|_| AllocError)?;
        Ok(NonNull::slice_from_raw_parts(page, PAGE_SIZE))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
        unsafe { free_page(ptr) }
    }
}
