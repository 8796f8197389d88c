//! File-system-related system calls.

use alloc::boxed::Box;
use rvos_fs_types::{DIR_SIZE, T_DEV, T_DIR, T_FILE, T_SYMLINK};
use rvos_syscall::OpenFlags;

use crate::{
    error::KernelError,
    file,
    fs::{
        inode::{self, InodePtr},
        log, path,
    },
    memory::page::PageFrameAllocator,
    param::{CONSOLE_MAJOR, MAX_ARG, MAX_PATH, NDEV},
    proc::{
        Proc, ProcPrivateData,
        exec::{ArgVec, exec as do_exec},
    },
};

use super::{arg_addr, arg_int, arg_str, check_user_range, fetch_addr, fetch_str};

pub fn read(_p: &'static Proc, private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    let fd = arg_int(private, 0);
    let addr = arg_addr(private, 1);
    let n = arg_int(private, 2);
    check_user_range(private, addr, n, true)?;
    private.ofile(fd)?.read(true, addr, n)
}

pub fn write(_p: &'static Proc, private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    let fd = arg_int(private, 0);
    let addr = arg_addr(private, 1);
    let n = arg_int(private, 2);
    check_user_range(private, addr, n, false)?;
    private.ofile(fd)?.write(true, addr, n)
}

pub fn close(_p: &'static Proc, private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    let fd = arg_int(private, 0);
    let file = private.unset_ofile(fd)?;
    file.close();
    Ok(0)
}

pub fn dup(_p: &'static Proc, private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    let fd = arg_int(private, 0);
    let file = private.ofile(fd)?.dup();
    private.add_ofile(file).map_err(|(file, e)| {
        file.close();
        e
    })
}

/// Creates a new inode of type `ty` at `path`, returning it locked.
///
/// Creating an existing regular file is not an error; anything else
/// that already exists is. New directories get their `.`/`..`
/// entries, and the parent gains a link for the child's `..`.
fn create(path: &[u8], ty: i16, major: i16, minor: i16) -> Result<InodePtr, KernelError> {
    let mut name_buf = [0u8; DIR_SIZE];
    let (dp, name) = path::namei_parent(path, &mut name_buf)?;

    inode::ilock(dp);

    if let Ok((ip, _off)) = inode::dir_lookup(dp, name) {
        // already exists
        inode::iunlockput(dp);
        inode::ilock(ip);
        let existing_ty = unsafe { ip.as_ref().ty };
        if ty == T_FILE && (existing_ty == T_FILE || existing_ty == T_DEV) {
            return Ok(ip);
        }
        inode::iunlockput(ip);
        return Err(KernelError::AlreadyExists);
    }

    let dev = unsafe { dp.as_ref().dev };
    let ip = match inode::ialloc(dev, ty) {
        Ok(ip) => ip,
        Err(e) => {
            inode::iunlockput(dp);
            return Err(e);
        }
    };

    inode::ilock(ip);
    unsafe {
        (*ip.as_ptr()).major = major;
        (*ip.as_ptr()).minor = minor;
        (*ip.as_ptr()).nlink = 1;
    }
    inode::iupdate(ip);

    let res = (|| {
        let (ip_inum, dp_inum) = unsafe { (ip.as_ref().inum, dp.as_ref().inum) };
        if ty == T_DIR {
            // "." and ".." occupy the first two slots.
            inode::dir_link(ip, b".", ip_inum)?;
            inode::dir_link(ip, b"..", dp_inum)?;
        }

        inode::dir_link(dp, name, ip_inum)?;

        if ty == T_DIR {
            // now that success is guaranteed: the child's ".." links
            // the parent.
            unsafe {
                (*dp.as_ptr()).nlink += 1;
            }
            inode::iupdate(dp);
        }

        Ok(())
    })();

    match res {
        Ok(()) => {
            inode::iunlockput(dp);
            Ok(ip)
        }
        Err(e) => {
            // undo the allocation: dropping the last reference with
            // nlink 0 frees the inode on disk.
            unsafe {
                (*ip.as_ptr()).nlink = 0;
            }
            inode::iupdate(ip);
            inode::iunlockput(ip);
            inode::iunlockput(dp);
            Err(e)
        }
    }
}

pub fn open(_p: &'static Proc, private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    let mut path_buf = [0u8; MAX_PATH];
    let len = arg_str(private, 0, &mut path_buf)?;
    let path = &path_buf[..len];
    let mode = OpenFlags::from_bits_retain(arg_int(private, 1));

    // the console is reachable without a file system node.
    if path == b"console" || path == b"/dev/console" {
        let file =
            file::alloc_device_file(CONSOLE_MAJOR, None, mode.readable(), mode.writable())?;
        return private.add_ofile(file).map_err(|(file, e)| {
            file.close();
            e
        });
    }

    log::begin_transaction();
    let res = (|| {
        let ip = if mode.contains(OpenFlags::CREATE) {
            create(path, T_FILE, 0, 0)?
        } else {
            let ip = path::namei(path)?;
            inode::ilock(ip);
            ip
        };

        let (ty, major) = unsafe { (ip.as_ref().ty, ip.as_ref().major) };

        if ty == T_DIR && mode.writable() {
            inode::iunlockput(ip);
            return Err(KernelError::OpenDirAsWritable);
        }

        if ty == T_DEV && !(0..NDEV as i16).contains(&major) {
            inode::iunlockput(ip);
            return Err(KernelError::BadFileDescriptor);
        }

        let file = if ty == T_DEV {
            file::alloc_device_file(major, Some(ip), mode.readable(), mode.writable())
        } else {
            file::alloc_inode_file(ip, mode.readable(), mode.writable())
        };
        let file = match file {
            Ok(file) => file,
            Err(e) => {
                inode::iunlockput(ip);
                return Err(e);
            }
        };

        inode::iunlock(ip);
        Ok(file)
    })();
    log::end_transaction();

    let file = res?;
    private.add_ofile(file).map_err(|(file, e)| {
        file.close();
        e
    })
}

pub fn mknod(_p: &'static Proc, private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    let mut path_buf = [0u8; MAX_PATH];
    let len = arg_str(private, 0, &mut path_buf)?;
    let path = &path_buf[..len];
    let major = arg_int(private, 1) as i16;
    let minor = arg_int(private, 2) as i16;
    let ty = arg_int(private, 3) as i16;

    if !matches!(ty, T_DIR | T_FILE | T_DEV) {
        return Err(KernelError::InvalidArgument);
    }

    log::with_transaction(|| {
        let ip = create(path, ty, major, minor)?;
        inode::iunlockput(ip);
        Ok(0)
    })
}

pub fn unlink(_p: &'static Proc, private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    let mut path_buf = [0u8; MAX_PATH];
    let len = arg_str(private, 0, &mut path_buf)?;
    let path = &path_buf[..len];

    log::with_transaction(|| {
        let mut name_buf = [0u8; DIR_SIZE];
        let (dp, name) = path::namei_parent(path, &mut name_buf)?;

        inode::ilock(dp);

        let res = (|| {
            // "." and ".." cannot be unlinked.
            if name == b"." || name == b".." {
                return Err(KernelError::InvalidArgument);
            }

            let (ip, off) = inode::dir_lookup(dp, name)?;
            inode::ilock(ip);

            assert!(unsafe { ip.as_ref().nlink } > 0, "unlink: nlink < 1");
            if unsafe { ip.as_ref().ty } == T_DIR && !inode::dir_is_empty(ip) {
                inode::iunlockput(ip);
                return Err(KernelError::DirectoryNotEmpty);
            }

            // clear the directory entry.
            inode::clear_dirent(dp, off)?;
            if unsafe { ip.as_ref().ty } == T_DIR {
                // the removed child's ".." no longer links the parent.
                unsafe {
                    (*dp.as_ptr()).nlink -= 1;
                }
                inode::iupdate(dp);
            }

            Ok(ip)
        })();

        match res {
            Ok(ip) => {
                inode::iunlockput(dp);
                unsafe {
                    (*ip.as_ptr()).nlink -= 1;
                }
                inode::iupdate(ip);
                inode::iunlockput(ip);
                Ok(0)
            }
            Err(e) => {
                inode::iunlockput(dp);
                Err(e)
            }
        }
    })
}

pub fn symlink(_p: &'static Proc, private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    let mut target_buf = [0u8; MAX_PATH];
    let target_len = arg_str(private, 0, &mut target_buf)?;
    let mut link_buf = [0u8; MAX_PATH];
    let link_len = arg_str(private, 1, &mut link_buf)?;
    let link = &link_buf[..link_len];

    if target_len == 0 {
        return Err(KernelError::InvalidArgument);
    }

    log::with_transaction(|| {
        let ip = create(link, T_SYMLINK, 0, 0)?;
        // store the target with its NUL so resolution sees a string.
        let n = target_len + 1;
        let res = inode::writei(ip, false, target_buf.as_ptr().addr(), 0, n);
        inode::iunlockput(ip);
        if res? != n {
            return Err(KernelError::FileTooLarge);
        }
        Ok(0)
    })
}

pub fn chdir(_p: &'static Proc, private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    let mut path_buf = [0u8; MAX_PATH];
    let len = arg_str(private, 0, &mut path_buf)?;
    let path = &path_buf[..len];

    log::with_transaction(|| {
        let ip = path::namei(path)?;
        inode::ilock(ip);
        if unsafe { ip.as_ref().ty } != T_DIR {
            inode::iunlockput(ip);
            return Err(KernelError::ChdirNotDir);
        }
        inode::iunlock(ip);

        let old = private.update_cwd(ip);
        inode::iput(old);
        Ok(0)
    })
}

pub fn exec(p: &'static Proc, private: &mut ProcPrivateData) -> Result<usize, KernelError> {
    let mut path_buf = [0u8; MAX_PATH];
    let len = arg_str(private, 0, &mut path_buf)?;
    let path = &path_buf[..len];
    let uargv = arg_addr(private, 1);

    let mut args = ArgVec::new();
    for i in 0.. {
        if i >= MAX_ARG {
            return Err(KernelError::ArgumentListTooLong);
        }
        let uarg = fetch_addr(private, uargv + i * size_of::<usize>())?;
        if uarg == 0 {
            break;
        }

        let page = Box::<[u8; crate::memory::PAGE_SIZE], _>::try_new_zeroed_in(PageFrameAllocator)
            .map_err(|_| KernelError::NoFreePage)?;
        let mut page = unsafe { page.assume_init() };
        let len = fetch_str(private, uarg, &mut page[..])?;
        args.push((len, page));
    }

    do_exec(p, private, path, &args)
}
