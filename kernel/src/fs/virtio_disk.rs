//! Driver for qemu's virtio disk device, using the MMIO interface.
//!
//! The block cache calls [`read`]/[`write`] with whole file system
//! blocks; requests block the calling process until the device's
//! completion interrupt arrives.

use alloc::boxed::Box;
use core::{array, mem, pin::Pin, ptr, sync::atomic::Ordering};

use crate::{
    fs::{
        block_io::BLOCK_SIZE,
        virtio::{
            BLK_SECTOR_SIZE, ConfigStatus, DeviceFeatures, MmioRegister, NUM, VirtioBlkReq,
            VirtioBlkReqType, VirtqAvail, VirtqDesc, VirtqDescFlags, VirtqUsed,
        },
    },
    interrupt,
    memory::{layout::VIRTIO0, layout::VIRTIO0_IRQ, page::PageFrameAllocator},
    sync::{Once, SpinLock, SpinLockCondVar},
};

struct Disk {
    /// MMIO register base address.
    base_address: usize,

    /// A set (not a ring) of DMA descriptors, with which the driver
    /// tells the device where to read and write individual disk
    /// operations. Most commands consist of a "chain" of a few of
    /// these descriptors.
    desc: Pin<Box<[VirtqDesc; NUM], PageFrameAllocator>>,

    /// A ring in which the driver writes descriptor numbers that the
    /// driver would like the device to process. It only includes the
    /// head descriptor of each chain.
    avail: Pin<Box<VirtqAvail, PageFrameAllocator>>,

    /// A ring in which the device writes descriptor numbers that the
    /// device has finished processing (just the head of each chain).
    used: Pin<Box<VirtqUsed, PageFrameAllocator>>,

    /// Signaled when descriptors are freed.
    desc_freed: &'static SpinLockCondVar,
    /// Whether each descriptor is free.
    free: [bool; NUM],
    used_idx: u16,

    /// Track info about in-flight operations, for use when the
    /// completion interrupt arrives. Indexed by the first descriptor
    /// index of the chain.
    info: [TrackInfo; NUM],

    /// Disk command headers, one-for-one with descriptors.
    ops: [VirtioBlkReq; NUM],
}

unsafe impl Send for Disk {}

struct TrackInfo {
    status: u8,
    in_progress: bool,
    completed: &'static SpinLockCondVar,
}

static DISK: Once<SpinLock<Disk>> = Once::new();

fn addr_low<T>(p: &T) -> u32 {
    let addr = ptr::from_ref(p).addr();
    (addr & 0xffff_ffff) as u32
}

fn addr_high<T>(p: &T) -> u32 {
    let addr = ptr::from_ref(p).addr();
    ((addr >> 32) & 0xffff_ffff) as u32
}

impl Disk {
    fn new(
        base_address: usize,
        desc_freed: &'static SpinLockCondVar,
        completed: &'static [SpinLockCondVar; NUM],
    ) -> Self {
        Self {
            base_address,
            desc: Box::into_pin(Box::new_in(unsafe { mem::zeroed() }, PageFrameAllocator)),
            avail: Box::into_pin(Box::new_in(unsafe { mem::zeroed() }, PageFrameAllocator)),
            used: Box::into_pin(Box::new_in(unsafe { mem::zeroed() }, PageFrameAllocator)),
            desc_freed,
            free: [true; NUM],
            used_idx: 0,
            info: array::from_fn(|i| TrackInfo {
                status: 0,
                in_progress: false,
                completed: &completed[i],
            }),
            ops: [const {
                VirtioBlkReq {
                    ty: VirtioBlkReqType::In,
                    reserved: 0,
                    sector: 0,
                }
            }; NUM],
        }
    }

    fn read_reg(&self, reg: MmioRegister) -> u32 {
        unsafe {
            ptr::with_exposed_provenance::<u32>(self.base_address + reg as usize).read_volatile()
        }
    }

    fn write_reg(&self, reg: MmioRegister, value: u32) {
        unsafe {
            ptr::with_exposed_provenance_mut::<u32>(self.base_address + reg as usize)
                .write_volatile(value)
        }
    }

    fn init(&self) {
        assert_eq!(self.read_reg(MmioRegister::MagicValue), 0x7472_6976);
        assert_eq!(self.read_reg(MmioRegister::Version), 2);
        assert_eq!(self.read_reg(MmioRegister::DeviceId), 2);
        assert_eq!(self.read_reg(MmioRegister::VendorId), 0x554d_4551);

        let mut status = ConfigStatus::empty();

        // reset device
        self.write_reg(MmioRegister::Status, status.bits());

        // set ACKNOWLEDGE status bit
        status |= ConfigStatus::ACKNOWLEDGE;
        self.write_reg(MmioRegister::Status, status.bits());

        // set DRIVER status bit
        status |= ConfigStatus::DRIVER;
        self.write_reg(MmioRegister::Status, status.bits());

        // negotiate features
        let mut features =
            DeviceFeatures::from_bits_retain(self.read_reg(MmioRegister::DeviceFeatures));
        features.remove(DeviceFeatures::BLK_RO);
        features.remove(DeviceFeatures::BLK_SCSI);
        features.remove(DeviceFeatures::BLK_CONFIG_WCE);
        features.remove(DeviceFeatures::BLK_MQ);
        features.remove(DeviceFeatures::ANY_LAYOUT);
        features.remove(DeviceFeatures::RING_EVENT_IDX);
        features.remove(DeviceFeatures::RING_INDIRECT_DESC);
        self.write_reg(MmioRegister::DriverFeatures, features.bits());

        // tell the device feature negotiation is complete.
        status |= ConfigStatus::FEATURES_OK;
        self.write_reg(MmioRegister::Status, status.bits());

        // re-read status to ensure FEATURES_OK is set.
        status = ConfigStatus::from_bits_retain(self.read_reg(MmioRegister::Status));
        assert!(status.contains(ConfigStatus::FEATURES_OK));

        // initialize queue 0.
        self.write_reg(MmioRegister::QueueSel, 0);

        // ensure queue 0 is not in use.
        assert_eq!(self.read_reg(MmioRegister::QueueReady), 0);

        // check maximum queue size.
        let max = self.read_reg(MmioRegister::QueueNumMax);
        assert!(max != 0);
        assert!(max as usize >= NUM);

        // set queue size.
        self.write_reg(MmioRegister::QueueNum, NUM as u32);

        // write physical addresses.
        self.write_reg(MmioRegister::QueueDescLow, addr_low(&*self.desc));
        self.write_reg(MmioRegister::QueueDescHigh, addr_high(&*self.desc));
        self.write_reg(MmioRegister::DriverDescLow, addr_low(&*self.avail));
        self.write_reg(MmioRegister::DriverDescHigh, addr_high(&*self.avail));
        self.write_reg(MmioRegister::DeviceDescLow, addr_low(&*self.used));
        self.write_reg(MmioRegister::DeviceDescHigh, addr_high(&*self.used));

        // queue is ready.
        self.write_reg(MmioRegister::QueueReady, 1);

        // tell the device we're completely ready.
        status |= ConfigStatus::DRIVER_OK;
        self.write_reg(MmioRegister::Status, status.bits());
    }

    /// Finds a free descriptor, marks it non-free, returns its index.
    fn alloc_desc(&mut self) -> Option<usize> {
        let idx = self.free.iter().position(|free| *free)?;
        self.free[idx] = false;
        Some(idx)
    }

    /// Marks a descriptor as free.
    fn free_desc(&mut self, i: usize) {
        assert!(i < NUM);
        assert!(!self.free[i]);
        self.desc[i] = VirtqDesc {
            addr: 0,
            len: 0,
            flags: VirtqDescFlags::empty(),
            next: 0,
        };
        self.free[i] = true;
        self.desc_freed.notify();
    }

    /// Frees a chain of descriptors.
    fn free_chain(&mut self, mut i: usize) {
        loop {
            let desc = &self.desc[i];
            let flag = desc.flags;
            let next = desc.next;
            self.free_desc(i);
            if !flag.contains(VirtqDescFlags::NEXT) {
                break;
            }
            i = next.into();
        }
    }

    /// Allocates the three descriptors a disk transfer uses (they need
    /// not be contiguous).
    fn alloc3_desc(&mut self) -> Option<[usize; 3]> {
        let mut idx = [0; 3];
        for i in 0..3 {
            match self.alloc_desc() {
                Some(x) => idx[i] = x,
                None => {
                    for j in &idx[0..i] {
                        self.free_desc(*j);
                    }
                    return None;
                }
            }
        }
        Some(idx)
    }

    fn send_request(&mut self, blockno: u32, data: &[u8], write: bool, desc_idx: [usize; 3]) {
        assert_eq!(data.len(), BLOCK_SIZE);
        let sector = u64::from(blockno) * (BLOCK_SIZE / BLK_SECTOR_SIZE) as u64;

        let buf0 = &mut self.ops[desc_idx[0]];
        *buf0 = VirtioBlkReq {
            ty: if write {
                VirtioBlkReqType::Out // write the disk
            } else {
                VirtioBlkReqType::In // read the disk
            },
            reserved: 0,
            sector,
        };
        let buf0_addr = ptr::from_mut(buf0).addr();

        self.desc[desc_idx[0]] = VirtqDesc {
            addr: buf0_addr as u64,
            len: size_of::<VirtioBlkReq>() as u32,
            flags: VirtqDescFlags::NEXT,
            next: desc_idx[1] as u16,
        };

        self.desc[desc_idx[1]] = VirtqDesc {
            addr: data.as_ptr().addr() as u64,
            len: BLOCK_SIZE as u32,
            flags: if write {
                VirtqDescFlags::empty() // device reads the data
            } else {
                VirtqDescFlags::WRITE // device writes the data
            } | VirtqDescFlags::NEXT,
            next: desc_idx[2] as u16,
        };

        self.info[desc_idx[0]].status = 0xff; // device writes 0 on success
        self.desc[desc_idx[2]] = VirtqDesc {
            addr: (&raw mut self.info[desc_idx[0]].status).addr() as u64,
            len: 1,
            flags: VirtqDescFlags::WRITE,
            next: 0,
        };

        // record the request for handle_interrupt().
        self.info[desc_idx[0]].in_progress = true;

        // tell the device the first index in our chain of descriptors.
        let avail_idx = self.avail.idx.load(Ordering::Relaxed) as usize;
        self.avail.ring[avail_idx % NUM] = desc_idx[0] as u16;

        // tell the device another avail ring entry is available.
        self.avail.idx.fetch_add(1, Ordering::AcqRel);

        self.write_reg(MmioRegister::QueueNotify, 0); // value is queue number
    }
}

pub fn init() {
    static REQ_COMPLETED: [SpinLockCondVar; NUM] = [const { SpinLockCondVar::new() }; NUM];
    static DESC_FREED: SpinLockCondVar = SpinLockCondVar::new();

    let disk = Disk::new(VIRTIO0, &DESC_FREED, &REQ_COMPLETED);
    disk.init();
    DISK.init(SpinLock::new(disk));

    interrupt::register_interrupt(VIRTIO0_IRQ, handle_interrupt);
    interrupt::enable_interrupt(VIRTIO0_IRQ);
}

fn read_or_write(blockno: u32, data: &[u8], write: bool) {
    let mut disk = DISK.get().lock();

    // the spec's section 5.2 says that legacy block operations use
    // three descriptors: one for type/reserved/sector, one for the
    // data, one for a 1-byte status result.
    let desc_idx = loop {
        if let Some(idx) = disk.alloc3_desc() {
            break idx;
        }
        let freed = disk.desc_freed;
        disk = freed.wait(disk);
    };

    // send the request and wait for handle_interrupt() to say it has
    // finished.
    disk.send_request(blockno, data, write, desc_idx);
    while disk.info[desc_idx[0]].in_progress {
        let completed = disk.info[desc_idx[0]].completed;
        disk = completed.wait(disk);
    }

    disk.free_chain(desc_idx[0]);
}

/// Reads the file system block `blockno` into `data`.
pub fn read(blockno: u32, data: &mut [u8; BLOCK_SIZE]) {
    read_or_write(blockno, data, false);
}

/// Writes `data` to the file system block `blockno`.
pub fn write(blockno: u32, data: &[u8; BLOCK_SIZE]) {
    read_or_write(blockno, data, true);
}

fn handle_interrupt() {
    let mut disk = DISK.get().lock();

    // the device won't raise another interrupt until we acknowledge
    // this one. this may race with the device adding new entries to
    // the used ring; processing them here leaves nothing for the next
    // interrupt, which is harmless.
    disk.write_reg(
        MmioRegister::InterruptAck,
        disk.read_reg(MmioRegister::InterruptStatus) & 0x3,
    );

    // the device increments used.idx when it adds an entry to the used
    // ring.
    while disk.used_idx != disk.used.idx.load(Ordering::Acquire) {
        let id = disk.used.ring[disk.used_idx as usize % NUM].id as usize;

        assert_eq!(disk.info[id].status, 0, "virtio disk request failed");
        disk.info[id].in_progress = false; // disk is done with the request
        disk.info[id].completed.notify();

        disk.used_idx += 1;
    }
}
