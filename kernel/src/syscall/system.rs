//! Diagnostic system calls: crash-stage control for the log's
//! recovery tests, and the kernel log interface.

use crate::{
    error::KernelError,
    fs::{block_io, log},
    klog,
    proc::{Proc, ProcPrivateData},
};

use super::arg_int;

pub fn set_crash_stage(
    _p: &'static Proc,
    private: &mut ProcPrivateData,
) -> Result<usize, KernelError> {
    let stage = arg_int(private, 0);
    log::set_crash_stage(stage)?;
    Ok(0)
}

pub fn recover_log(
    _p: &'static Proc,
    _private: &mut ProcPrivateData,
) -> Result<usize, KernelError> {
    log::recover();
    Ok(0)
}

pub fn clear_cache(
    _p: &'static Proc,
    _private: &mut ProcPrivateData,
) -> Result<usize, KernelError> {
    block_io::clear_cache();
    Ok(0)
}

pub fn klog_dump(_p: &'static Proc, _private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    klog::dump();
    Ok(0)
}

pub fn klog_set_threshold(
    _p: &'static Proc,
    private: &mut ProcPrivateData,
) -> Result<usize, KernelError> {
    let record = arg_int(private, 0);
    let console = arg_int(private, 1);
    klog::set_threshold(record, console)?;
    Ok(0)
}
