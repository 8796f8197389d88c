//! System call dispatch and argument fetch.
//!
//! The call number arrives in `a7`, arguments in `a0..a5`, and the
//! result is returned in `a0`; any error becomes -1 on the user side.

use rvos_syscall::SyscallCode;

use crate::{
    error::KernelError,
    kdebug,
    memory::VirtAddr,
    println,
    proc::{Proc, ProcPrivateData},
};

mod file;
mod proc;
mod system;

/// Fetches the `n`th raw system call argument.
fn arg_raw(private: &ProcPrivateData, n: usize) -> usize {
    let tf = private.trapframe();
    (match n {
        0 => tf.a0,
        1 => tf.a1,
        2 => tf.a2,
        3 => tf.a3,
        4 => tf.a4,
        5 => tf.a5,
        _ => panic!("syscall argument index out of range: {n}"),
    }) as usize
}

/// Fetches the `n`th argument as an integer.
fn arg_int(private: &ProcPrivateData, n: usize) -> usize {
    arg_raw(private, n)
}

/// Fetches the `n`th argument as a user address.
///
/// Doesn't check legality: copy_in/copy_out do that.
fn arg_addr(private: &ProcPrivateData, n: usize) -> usize {
    arg_raw(private, n)
}

/// Fetches the `n`th argument as a NUL-terminated user string, copied
/// into `buf`.
///
/// Returns the string length, or an error if it is unterminated
/// within `buf`.
fn arg_str(private: &ProcPrivateData, n: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
    let addr = arg_addr(private, n);
    fetch_str(private, addr, buf)
}

/// Fetches the usize at user address `addr`.
fn fetch_addr(private: &ProcPrivateData, addr: usize) -> Result<usize, KernelError> {
    check_user_range(private, addr, size_of::<usize>(), false)?;
    let mut bytes = [0u8; size_of::<usize>()];
    private
        .pagetable()
        .copy_in_bytes(&mut bytes, VirtAddr::new(addr)?)?;
    Ok(usize::from_ne_bytes(bytes))
}

/// Fetches the NUL-terminated string at user address `addr`.
fn fetch_str(
    private: &ProcPrivateData,
    addr: usize,
    buf: &mut [u8],
) -> Result<usize, KernelError> {
    private.pagetable().copy_in_str(buf, VirtAddr::new(addr)?)
}

/// Validates the user range `[addr, addr + size)`: it must not wrap,
/// must end below the top of the address space, and every page must
/// be mapped and user accessible (writable too, when `write` is set).
fn check_user_range(
    private: &ProcPrivateData,
    addr: usize,
    size: usize,
    write: bool,
) -> Result<(), KernelError> {
    private.pagetable().validate_range(addr, size, write)
}

type Handler = fn(&'static Proc, &mut ProcPrivateData) -> Result<usize, KernelError>;

/// Dispatches the system call recorded in the trapframe, storing the
/// result in `a0`.
pub fn syscall(p: &'static Proc, private: &mut ProcPrivateData) {
    let n = private.trapframe().a7 as usize;
    let Some(code) = SyscallCode::from_repr(n) else {
        let shared = p.shared().lock();
        println!("{} {}: unknown sys call {n}", shared.pid(), shared.name());
        drop(shared);
        private.trapframe_mut().a0 = u64::MAX;
        return;
    };

    let handler: Handler = match code {
        SyscallCode::Exit => self::proc::exit,
        SyscallCode::Getpid => self::proc::getpid,
        SyscallCode::Fork => self::proc::fork,
        SyscallCode::Wait => self::proc::wait,
        SyscallCode::Kill => self::proc::kill,
        SyscallCode::Write => self::file::write,
        SyscallCode::Read => self::file::read,
        SyscallCode::Open => self::file::open,
        SyscallCode::Close => self::file::close,
        SyscallCode::Unlink => self::file::unlink,
        SyscallCode::Sbrk => self::proc::sbrk,
        SyscallCode::Time => self::proc::time,
        SyscallCode::Symlink => self::file::symlink,
        SyscallCode::SetCrashStage => self::system::set_crash_stage,
        SyscallCode::RecoverLog => self::system::recover_log,
        SyscallCode::ClearCache => self::system::clear_cache,
        SyscallCode::Exec => self::file::exec,
        SyscallCode::Dup => self::file::dup,
        SyscallCode::Mknod => self::file::mknod,
        SyscallCode::Chdir => self::file::chdir,
        SyscallCode::Ticks => self::proc::ticks,
        SyscallCode::Getpriority => self::proc::getpriority,
        SyscallCode::KlogDump => self::system::klog_dump,
        SyscallCode::KlogSetThreshold => self::system::klog_set_threshold,
        SyscallCode::Sleep => self::proc::sleep,
    };

    let result = match handler(p, private) {
        Ok(value) => value as u64,
        Err(e) => {
            kdebug!("syscall {code} failed: {e}");
            u64::MAX
        }
    };
    private.trapframe_mut().a0 = result;
}
