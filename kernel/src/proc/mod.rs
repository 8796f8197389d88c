use core::{
    cell::UnsafeCell,
    ffi::c_void,
    ptr::{self, NonNull},
    slice,
    sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, Ordering},
};

use arrayvec::ArrayString;

use crate::{
    cpu::Cpu,
    error::KernelError,
    file::File,
    fs::{self, inode::InodePtr},
    interrupt::{self, trap},
    memory::{
        PAGE_SIZE, PhysAddr, VirtAddr,
        layout::{KSTACK_PAGES, kstack},
        page,
        page_table::{PageTable, PtEntryFlags},
        vm_user::UserPageTable,
    },
    param::{NOFILE, NPROC, ROOT_DEV},
    println,
    sync::{SpinLock, SpinLockGuard},
};

use self::{
    scheduler::Context,
    wait_lock::{Parent, WaitLock},
};

mod elf;
pub mod exec;
pub mod scheduler;
mod wait_lock;

static PROC: [Proc; NPROC] = [const { Proc::new() }; NPROC];
static INITPROC: AtomicPtr<Proc> = AtomicPtr::new(ptr::null_mut());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct ProcId(i32);

impl core::fmt::Display for ProcId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl ProcId {
    pub const INVALID: Self = ProcId(-1);

    pub const fn new(pid: i32) -> Self {
        Self(pid)
    }

    pub fn get(&self) -> i32 {
        self.0
    }
}

/// Registers saved by the trampoline on each user trap, plus the four
/// kernel fields the trampoline needs on the way back in.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    /// Kernel page table.
    pub kernel_satp: u64, // 0
    /// Top of the process's kernel stack.
    pub kernel_sp: u64, // 8
    /// Address of trap_user().
    pub kernel_trap: u64, // 16
    /// Saved user program counter.
    pub epc: u64, // 24
    /// Saved kernel tp (single hart: always 0).
    pub kernel_hartid: u64, // 32
    pub ra: u64,  // 40
    pub sp: u64,  // 48
    pub gp: u64,  // 56
    pub tp: u64,  // 64
    pub t0: u64,  // 72
    pub t1: u64,  // 80
    pub t2: u64,  // 88
    pub s0: u64,  // 96
    pub s1: u64,  // 104
    pub a0: u64,  // 112
    pub a1: u64,  // 120
    pub a2: u64,  // 128
    pub a3: u64,  // 136
    pub a4: u64,  // 144
    pub a5: u64,  // 152
    pub a6: u64,  // 160
    pub a7: u64,  // 168
    pub s2: u64,  // 176
    pub s3: u64,  // 184
    pub s4: u64,  // 192
    pub s5: u64,  // 200
    pub s6: u64,  // 208
    pub s7: u64,  // 216
    pub s8: u64,  // 224
    pub s9: u64,  // 232
    pub s10: u64, // 240
    pub s11: u64, // 248
    pub t3: u64,  // 256
    pub t4: u64,  // 264
    pub t5: u64,  // 272
    pub t6: u64,  // 280
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Unused,
    Used,
    Sleeping { chan: *const c_void },
    Runnable,
    Running,
    Zombie { exit_status: i32 },
}

/// Per-process state that other processes may inspect; guarded by the
/// process's spinlock.
pub struct ProcSharedData {
    /// Process ID.
    pid: ProcId,
    /// Process name (for debugging).
    name: ArrayString<16>,
    /// Process state.
    state: ProcState,
    /// Kill flag, observed at trap return and blocking points.
    killed: bool,
    /// MLFQ level; 0 is highest.
    priority: usize,
    /// Full timer slices consumed at the current level.
    slices: u32,
    /// Process context; switch() here to run the process.
    context: Context,
}

impl ProcSharedData {
    pub fn pid(&self) -> ProcId {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &[u8]) {
        self.name.clear();
        for &b in name.iter().take(self.name.capacity()) {
            let c = if b.is_ascii_graphic() { b as char } else { '?' };
            if self.name.try_push(c).is_err() {
                break;
            }
        }
    }

    pub fn kill(&mut self) {
        self.killed = true;
    }

    pub fn killed(&self) -> bool {
        self.killed
    }

    pub fn priority(&self) -> usize {
        self.priority
    }
}

pub struct ProcShared(SpinLock<ProcSharedData>);

impl ProcShared {
    const fn new() -> Self {
        Self(SpinLock::new(ProcSharedData {
            pid: ProcId::INVALID,
            name: ArrayString::new_const(),
            state: ProcState::Unused,
            killed: false,
            priority: 0,
            slices: 0,
            context: Context::zeroed(),
        }))
    }

    pub fn lock(&self) -> SpinLockGuard<'_, ProcSharedData> {
        self.0.lock()
    }

    unsafe fn remember_locked(&self) -> SpinLockGuard<'_, ProcSharedData> {
        unsafe { self.0.remember_locked() }
    }
}

pub struct ProcPrivateData {
    /// Base of this process's kernel stack.
    kstack: VirtAddr,
    /// User address space.
    pagetable: Option<UserPageTable>,
    /// Trapframe page, mapped at TRAPFRAME.
    trapframe: Option<NonNull<TrapFrame>>,
    /// Open files.
    ofile: [Option<File>; NOFILE],
    /// Current directory.
    cwd: Option<InodePtr>,
}

impl ProcPrivateData {
    const fn new() -> Self {
        Self {
            kstack: VirtAddr::MIN,
            pagetable: None,
            trapframe: None,
            ofile: [const { None }; NOFILE],
            cwd: None,
        }
    }

    pub fn kstack(&self) -> VirtAddr {
        self.kstack
    }

    /// Size of the user image in bytes.
    pub fn size(&self) -> usize {
        self.pagetable.as_ref().map_or(0, UserPageTable::size)
    }

    pub fn pagetable(&self) -> &UserPageTable {
        self.pagetable.as_ref().unwrap()
    }

    pub fn pagetable_mut(&mut self) -> &mut UserPageTable {
        self.pagetable.as_mut().unwrap()
    }

    /// Replaces the address space, freeing the old one; exec's commit
    /// point.
    pub fn update_pagetable(&mut self, pagetable: UserPageTable) {
        self.pagetable = Some(pagetable);
    }

    pub fn trapframe(&self) -> &TrapFrame {
        unsafe { self.trapframe.unwrap().as_ref() }
    }

    pub fn trapframe_mut(&mut self) -> &mut TrapFrame {
        unsafe { self.trapframe.unwrap().as_mut() }
    }

    pub fn ofile(&self, fd: usize) -> Result<&File, KernelError> {
        self.ofile
            .get(fd)
            .and_then(Option::as_ref)
            .ok_or(KernelError::BadFileDescriptor)
    }

    /// Binds `file` to the lowest free descriptor; hands the file
    /// back if none is free, so the caller can close it.
    pub fn add_ofile(&mut self, file: File) -> Result<usize, (File, KernelError)> {
        let Some((fd, slot)) = self
            .ofile
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
        else {
            return Err((file, KernelError::TooManyOpenFiles));
        };
        assert!(slot.replace(file).is_none());
        Ok(fd)
    }

    pub fn unset_ofile(&mut self, fd: usize) -> Result<File, KernelError> {
        self.ofile
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(KernelError::BadFileDescriptor)
    }

    pub fn cwd(&self) -> InodePtr {
        self.cwd.unwrap()
    }

    pub fn update_cwd(&mut self, cwd: InodePtr) -> InodePtr {
        self.cwd.replace(cwd).unwrap()
    }
}

/// Per-process state.
pub struct Proc {
    /// State shared with other processes.
    shared: ProcShared,
    /// Parent process; guarded by the wait lock.
    parent: Parent,
    /// State only the process itself touches.
    private: UnsafeCell<ProcPrivateData>,
}

unsafe impl Sync for Proc {}

impl Proc {
    const fn new() -> Self {
        Self {
            shared: ProcShared::new(),
            parent: Parent::new(),
            private: UnsafeCell::new(ProcPrivateData::new()),
        }
    }

    /// Returns the current process.
    pub fn current() -> &'static Self {
        Self::try_current().unwrap()
    }

    pub fn try_current() -> Option<&'static Self> {
        let p = interrupt::with_push_disabled(|| unsafe { Cpu::current().proc() })?;
        Some(unsafe { p.as_ref() })
    }

    pub fn shared(&self) -> &ProcShared {
        &self.shared
    }

    /// The private data is only touched by the owning process (or by
    /// wait() once the owner is a zombie).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn private_mut(&self) -> &mut ProcPrivateData {
        unsafe { self.private.get().as_mut() }.unwrap()
    }

    fn is_child_of(&self, parent: &Self, wait_lock: &mut SpinLockGuard<WaitLock>) -> bool {
        self.parent
            .get(wait_lock)
            .map(|pp| ptr::eq(pp.as_ptr(), parent))
            .unwrap_or(false)
    }

    fn allocate_pid() -> ProcId {
        static NEXT_PID: AtomicI32 = AtomicI32::new(1);
        ProcId(NEXT_PID.fetch_add(1, Ordering::Relaxed))
    }

    /// Claims an UNUSED slot in the process table, allocates a
    /// trapframe page and an empty user page table, and points the
    /// saved context at forkret on the process's kernel stack.
    ///
    /// Returns with the slot's lock held.
    fn allocate() -> Result<
        (
            &'static Self,
            SpinLockGuard<'static, ProcSharedData>,
            &'static mut ProcPrivateData,
        ),
        KernelError,
    > {
        let (p, mut shared) = 'found: {
            for p in &PROC {
                let shared = p.shared.lock();
                if shared.state == ProcState::Unused {
                    break 'found (p, shared);
                }
                drop(shared);
            }
            return Err(KernelError::NoFreeProc);
        };

        shared.pid = Self::allocate_pid();
        shared.state = ProcState::Used;
        shared.priority = 0;
        shared.slices = 0;
        let private = unsafe { p.private_mut() };

        let res: Result<(), KernelError> = (|| {
            // Allocate a trapframe page.
            let tf = page::alloc_page()?;
            private.trapframe = Some(tf.cast());
            // An empty user page table with trampoline/trapframe
            // mapped.
            private.pagetable = Some(UserPageTable::new(PhysAddr::new(tf.addr().get()))?);
            // Set up a new context to start executing at forkret,
            // which returns to user space.
            shared.context.clear();
            shared.context.ra = forkret as usize as u64;
            shared.context.sp = (private.kstack.addr() + KSTACK_PAGES * PAGE_SIZE) as u64;
            Ok(())
        })();

        if let Err(e) = res {
            p.free(private, &mut shared);
            drop(shared);
            return Err(e);
        }

        Ok((p, shared, private))
    }

    /// Releases everything hanging off a proc slot and marks it
    /// UNUSED.
    ///
    /// The slot's lock must be held.
    fn free(&self, private: &mut ProcPrivateData, shared: &mut SpinLockGuard<ProcSharedData>) {
        private.pagetable = None;
        if let Some(tf) = private.trapframe.take() {
            unsafe {
                page::free_page(tf.cast());
            }
        }
        unsafe { self.parent.reset() };
        shared.pid = ProcId::INVALID;
        shared.name.clear();
        shared.killed = false;
        shared.priority = 0;
        shared.slices = 0;
        shared.state = ProcState::Unused;
    }
}

/// Returns the pid of the process running on this hart, or
/// [`ProcId::INVALID`] during boot and in the scheduler.
pub fn current_pid() -> ProcId {
    interrupt::with_push_disabled(|| unsafe { Cpu::current().pid() })
}

/// Allocates a kernel stack for each process slot, mapped high with a
/// guard gap below.
pub fn map_stacks(kpgtbl: &mut PageTable) {
    for (i, _p) in PROC.iter().enumerate() {
        let pa = page::alloc_pages(KSTACK_PAGES).unwrap();
        kpgtbl
            .map_pages(
                kstack(i),
                KSTACK_PAGES * PAGE_SIZE,
                PhysAddr::new(pa.addr().get()),
                PtEntryFlags::RW,
            )
            .unwrap();
    }
}

/// Initializes the process table.
pub fn init() {
    for (i, p) in PROC.iter().enumerate() {
        unsafe { p.private_mut() }.kstack = kstack(i);
    }
}

/// A tiny program that calls exec("/init", argv), assembled by hand:
///
/// ```text
///  0: addi a0, zero, 32    # a0 = &"/init"
///  4: addi a1, zero, 40    # a1 = &argv
///  8: addi a7, zero, 16    # SYS_exec
///  c: ecall
/// 10: addi a7, zero, 0     # SYS_exit
/// 14: addi a0, zero, -1
/// 18: ecall
/// 1c: jal zero, 0x10       # exit never returns, but just in case
/// 20: "/init\0"
/// 28: .dword 0x20          # argv[0]
/// 30: .dword 0             # argv[1]
/// ```
static INIT_CODE: &[u8] = &[
    0x13, 0x05, 0x00, 0x02, // addi a0, zero, 32
    0x93, 0x05, 0x80, 0x02, // addi a1, zero, 40
    0x93, 0x08, 0x00, 0x01, // addi a7, zero, 16
    0x73, 0x00, 0x00, 0x00, // ecall
    0x93, 0x08, 0x00, 0x00, // addi a7, zero, 0
    0x13, 0x05, 0xf0, 0xff, // addi a0, zero, -1
    0x73, 0x00, 0x00, 0x00, // ecall
    0x6f, 0xf0, 0x5f, 0xff, // jal zero, -12
    0x2f, 0x69, 0x6e, 0x69, 0x74, 0x00, 0x00, 0x00, // "/init\0"
    0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // argv[0] = 0x20
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // argv[1] = 0
];

/// Sets up the first user process.
pub fn user_init() {
    let (p, mut shared, private) = Proc::allocate().unwrap();
    INITPROC.store(ptr::from_ref(p).cast_mut(), Ordering::Release);

    // one user page holding the initcode's instructions and data.
    private.pagetable_mut().map_first(INIT_CODE);

    // prepare for the very first return from kernel to user.
    let trapframe = private.trapframe_mut();
    trapframe.epc = 0; // user program counter
    trapframe.sp = PAGE_SIZE as u64; // user stack pointer

    private.cwd = Some(fs::inode::iget(ROOT_DEV, rvos_fs_types::InodeNo::ROOT.value()));

    // stdin, stdout, stderr on the console.
    for fd in 0..3 {
        let file =
            crate::file::alloc_device_file(crate::param::CONSOLE_MAJOR, None, true, true).unwrap();
        let Ok(got) = private.add_ofile(file) else {
            panic!("userinit: no free file descriptor");
        };
        assert_eq!(got, fd);
    }

    shared.name = ArrayString::try_from("initcode").unwrap();
    shared.state = ProcState::Runnable;

    drop(shared);
}

/// Grows or shrinks user memory by `n` bytes.
pub fn grow(private: &mut ProcPrivateData, n: isize) -> Result<(), KernelError> {
    let old_size = private.size();
    let pagetable = private.pagetable_mut();

    if n > 0 {
        let new_size = old_size
            .checked_add(n as usize)
            .ok_or(KernelError::TooLargeVirtualAddress(usize::MAX))?;
        pagetable.grow_to(new_size, PtEntryFlags::W)?;
    } else if n < 0 {
        let new_size = old_size.saturating_sub(n.unsigned_abs());
        pagetable.shrink_to(new_size);
    }

    Ok(())
}

/// Creates a new process, copying the parent's address space with
/// copy-on-write.
///
/// Sets up the child to return as if from the `fork()` system call.
pub fn fork(p: &Proc, p_private: &mut ProcPrivateData) -> Result<ProcId, KernelError> {
    let parent_name = p.shared.lock().name;

    let (np, mut np_shared, np_private) = Proc::allocate()?;

    // share the parent's user memory with the child.
    if let Err(e) = p_private
        .pagetable_mut()
        .clone_into(np_private.pagetable_mut())
    {
        np.free(np_private, &mut np_shared);
        drop(np_shared);
        return Err(e);
    }

    // copy the saved user registers.
    *np_private.trapframe_mut() = *p_private.trapframe();

    // cause fork to return 0 in the child.
    np_private.trapframe_mut().a0 = 0;

    // increment reference counts on open file descriptors.
    for (of, nof) in p_private.ofile.iter().zip(&mut np_private.ofile) {
        if let Some(of) = of {
            *nof = Some(of.dup());
        }
    }
    np_private.cwd = Some(fs::inode::idup(p_private.cwd()));
    np_shared.name = parent_name;

    let pid = np_shared.pid;
    drop(np_shared);

    let mut wait_lock = wait_lock::lock();
    np.parent.set(Some(NonNull::from(p)), &mut wait_lock);
    drop(wait_lock);

    np.shared.lock().state = ProcState::Runnable;

    Ok(pid)
}

/// Passes p's abandoned children to init.
///
/// Caller must hold the wait lock.
fn reparent(p: &Proc, wait_lock: &mut SpinLockGuard<WaitLock>) {
    for pp in &PROC {
        if pp.is_child_of(p, wait_lock) {
            pp.parent
                .set(NonNull::new(INITPROC.load(Ordering::Relaxed)), wait_lock);
            wakeup(INITPROC.load(Ordering::Relaxed).cast());
        }
    }
}

/// Exits the current process; does not return.
///
/// The process keeps only its table slot, in the zombie state, until
/// its parent calls wait().
pub fn exit(p: &Proc, p_private: &mut ProcPrivateData, status: i32) -> ! {
    assert!(
        !ptr::eq(p, INITPROC.load(Ordering::Relaxed)),
        "init exiting"
    );

    // close all open files.
    for of in &mut p_private.ofile {
        if let Some(of) = of.take() {
            of.close();
        }
    }

    let cwd = p_private.cwd.take().unwrap();
    fs::log::with_transaction(|| fs::inode::iput(cwd));

    // release the user image; a zombie keeps no user pages.
    p_private.pagetable = None;
    if let Some(tf) = p_private.trapframe.take() {
        unsafe {
            page::free_page(tf.cast());
        }
    }

    let mut wait_lock = wait_lock::lock();

    // give any children to init.
    reparent(p, &mut wait_lock);

    // the parent might be sleeping in wait().
    wakeup(
        p.parent
            .get(&mut wait_lock)
            .map(NonNull::as_ptr)
            .unwrap_or(ptr::null_mut())
            .cast(),
    );

    let mut shared = p.shared.lock();
    shared.state = ProcState::Zombie {
        exit_status: status,
    };

    drop(wait_lock);

    // jump into the scheduler, never to return.
    scheduler::sched(&mut shared);

    unreachable!("zombie exit");
}

/// Waits for a child process to exit and returns its pid, copying the
/// exit status to `addr` unless it is null.
pub fn wait(p: &Proc, p_private: &mut ProcPrivateData, addr: usize) -> Result<ProcId, KernelError> {
    let mut wait_lock = wait_lock::lock();

    loop {
        let mut have_kids = false;
        for pp in &PROC {
            if !pp.is_child_of(p, &mut wait_lock) {
                continue;
            }

            // make sure the child isn't still in exit() or switch().
            let mut pp_shared = pp.shared.lock();

            have_kids = true;
            if let ProcState::Zombie { exit_status } = pp_shared.state {
                let pid = pp_shared.pid;
                if addr != 0 {
                    let status_bytes = exit_status.to_ne_bytes();
                    if let Err(e) = p_private
                        .pagetable_mut()
                        .copy_out_bytes(VirtAddr::new(addr)?, &status_bytes)
                    {
                        drop(pp_shared);
                        drop(wait_lock);
                        return Err(e);
                    }
                }
                // in the zombie state no other routine touches the
                // child's private data.
                let pp_private = unsafe { pp.private_mut() };
                pp.free(pp_private, &mut pp_shared);
                drop(pp_shared);
                drop(wait_lock);
                return Ok(pid);
            }
            drop(pp_shared);
        }

        // no point waiting if we don't have any children.
        if !have_kids {
            drop(wait_lock);
            return Err(KernelError::NoChildProcess);
        }
        if p.shared.lock().killed() {
            drop(wait_lock);
            return Err(KernelError::CallerKilled);
        }

        // wait for a child to exit.
        let chan = ptr::from_ref(p).cast();
        wait_lock = sleep(chan, wait_lock);
    }
}

/// Gives up the CPU for one scheduling round; timer-driven, so it
/// counts as a consumed slice for the MLFQ.
pub fn yield_(p: &Proc) {
    let mut shared = p.shared.lock();
    shared.state = ProcState::Runnable;
    shared.slices += 1;
    if shared.slices >= (1 << shared.priority) && shared.priority + 1 < scheduler::NPRIO {
        shared.priority += 1;
        shared.slices = 0;
    }
    scheduler::sched(&mut shared);
    drop(shared);
}

/// A fork child's first scheduling by the scheduler switches here.
extern "C" fn forkret() {
    static FIRST: AtomicBool = AtomicBool::new(true);

    // still holding the process lock from the scheduler.
    let p = Proc::current();
    let private = unsafe { p.private_mut() };
    drop(unsafe { p.shared.remember_locked() });

    if FIRST.load(Ordering::Acquire) {
        // mounting the file system sleeps on disk I/O, so it must run
        // in a process context rather than from main().
        fs::init_in_proc(ROOT_DEV);

        FIRST.store(false, Ordering::Release);
    }

    trap::trap_user_ret(private);
}

/// Atomically releases `guard` and sleeps on `chan`; reacquires the
/// lock when awakened.
pub fn sleep<'a, T>(chan: *const c_void, guard: SpinLockGuard<'a, T>) -> SpinLockGuard<'a, T> {
    let p = Proc::current();
    // Holding p's own lock lets us release `guard` without missing a
    // wakeup: wakeup locks every process it considers.
    let mut shared = p.shared.lock();
    let lock = guard.into_lock();

    shared.state = ProcState::Sleeping { chan };
    shared.slices = 0;

    scheduler::sched(&mut shared);

    drop(shared);
    lock.lock()
}

/// Wakes up all processes sleeping on `chan`.
///
/// Freshly woken processes re-enter the top priority level.
pub fn wakeup(chan: *const c_void) {
    for p in &PROC {
        let mut shared = p.shared.lock();
        if let ProcState::Sleeping { chan: ch } = shared.state {
            if ch == chan {
                shared.state = ProcState::Runnable;
                shared.priority = 0;
                shared.slices = 0;
            }
        }
        drop(shared);
    }
}

/// Kills the process with the given pid.
///
/// The victim won't exit until it next crosses a cooperative
/// checkpoint (trap return, wait, sleep).
pub fn kill(pid: ProcId) -> Result<(), KernelError> {
    for p in &PROC {
        let mut shared = p.shared.lock();
        if shared.pid == pid && shared.state != ProcState::Unused {
            shared.killed = true;
            if let ProcState::Sleeping { .. } = shared.state {
                // wake it so it observes the flag.
                shared.state = ProcState::Runnable;
                shared.priority = 0;
            }
            drop(shared);
            return Ok(());
        }
        drop(shared);
    }
    Err(KernelError::ProcessNotFound)
}

/// Copies to either a user address in the current process or a kernel
/// address, depending on `user_dst`.
pub fn either_copy_out_bytes(user_dst: bool, dst: usize, src: &[u8]) -> Result<(), KernelError> {
    if user_dst {
        let p = Proc::current();
        let private = unsafe { p.private_mut() };
        return private
            .pagetable_mut()
            .copy_out_bytes(VirtAddr::new(dst)?, src);
    }

    unsafe {
        let dst = ptr::with_exposed_provenance_mut::<u8>(dst);
        slice::from_raw_parts_mut(dst, src.len()).copy_from_slice(src);
    }
    Ok(())
}

/// Copies from either a user address in the current process or a
/// kernel address, depending on `user_src`.
pub fn either_copy_in_bytes(dst: &mut [u8], user_src: bool, src: usize) -> Result<(), KernelError> {
    if user_src {
        let p = Proc::current();
        let private = unsafe { p.private_mut() };
        return private.pagetable().copy_in_bytes(dst, VirtAddr::new(src)?);
    }

    unsafe {
        let src = ptr::with_exposed_provenance::<u8>(src);
        dst.copy_from_slice(slice::from_raw_parts(src, dst.len()));
    }
    Ok(())
}

/// Prints a process listing to the console; ^P triggers this.
pub fn dump() {
    println!();
    for p in &PROC {
        let shared = p.shared.lock();
        let pid = shared.pid;
        let state = shared.state;
        let priority = shared.priority;
        let name = shared.name;
        drop(shared);
        if state == ProcState::Unused {
            continue;
        }

        let state = match state {
            ProcState::Unused => "unused",
            ProcState::Used => "used",
            ProcState::Sleeping { .. } => "sleep",
            ProcState::Runnable => "runnable",
            ProcState::Running => "run",
            ProcState::Zombie { .. } => "zombie",
        };

        println!("{pid:5} {state:<10} q{priority} {name}");
    }
}
