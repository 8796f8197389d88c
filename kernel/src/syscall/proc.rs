//! Process-related system calls.

use crate::{
    error::KernelError,
    interrupt::timer,
    proc::{self, Proc, ProcId, ProcPrivateData},
};

use super::{arg_addr, arg_int, check_user_range};

pub fn exit(p: &'static Proc, private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    let status = arg_int(private, 0) as i32;
    proc::exit(p, private, status)
}

pub fn getpid(p: &'static Proc, _private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    Ok(p.shared().lock().pid().get() as usize)
}

pub fn fork(p: &'static Proc, private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    let pid = proc::fork(p, private)?;
    Ok(pid.get() as usize)
}

pub fn wait(p: &'static Proc, private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    let addr = arg_addr(private, 0);
    if addr != 0 {
        check_user_range(private, addr, size_of::<i32>(), true)?;
    }
    let pid = proc::wait(p, private, addr)?;
    Ok(pid.get() as usize)
}

pub fn kill(_p: &'static Proc, private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    let pid = arg_int(private, 0) as i32;
    proc::kill(ProcId::new(pid))?;
    Ok(0)
}

pub fn sbrk(_p: &'static Proc, private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    let n = arg_int(private, 0) as isize;
    let old_size = private.size();
    proc::grow(private, n)?;
    Ok(old_size)
}

/// Returns the current value of the cycle-granularity time counter.
pub fn time(_p: &'static Proc, _private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    Ok(timer::now() as usize)
}

/// Returns the global tick count.
pub fn ticks(_p: &'static Proc, _private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    Ok(*timer::TICKS.lock() as usize)
}

pub fn getpriority(p: &'static Proc, _private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    Ok(p.shared().lock().priority())
}

/// Sleeps until `n` ticks have elapsed, or the process is killed.
pub fn sleep(p: &'static Proc, private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    let n = arg_int(private, 0) as i64;
    if n <= 0 {
        return Ok(0);
    }
    let n = n as u64;

    let mut ticks = timer::TICKS.lock();
    let start = *ticks;
    while *ticks - start < n {
        if p.shared().lock().killed() {
            drop(ticks);
            return Err(KernelError::CallerKilled);
        }
        ticks = timer::TICKS_UPDATED.wait(ticks);
    }
    drop(ticks);
    Ok(0)
}
