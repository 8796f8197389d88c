//! Pathname resolution, with symbolic link following.

use rvos_fs_types::{DIR_SIZE, InodeNo, T_DIR, T_SYMLINK};

use crate::{
    error::KernelError,
    fs::inode::{self, InodePtr},
    param::{MAX_PATH, MAX_SYMLINK_DEPTH, ROOT_DEV},
    proc::Proc,
};

/// Splits the next path element off `path`.
///
/// Returns the element and the remainder with no leading slashes, or
/// `None` when the path is exhausted.
///
/// ```text
///   skip_elem(b"a/bb/c")  == Some((b"a", b"bb/c"))
///   skip_elem(b"///a//bb") == Some((b"a", b"bb"))
///   skip_elem(b"a")        == Some((b"a", b""))
///   skip_elem(b"")         == None
///   skip_elem(b"///")      == None
/// ```
fn skip_elem(path: &[u8]) -> Option<(&[u8], &[u8])> {
    let start = path.iter().position(|&c| c != b'/')?;
    let path = &path[start..];
    let end = path.iter().position(|&c| c == b'/').unwrap_or(path.len());
    let elem = &path[..end];
    let rest = &path[end..];
    let next = rest.iter().position(|&c| c != b'/').unwrap_or(rest.len());
    Some((elem, &rest[next..]))
}

/// Joins a symlink target with the unresolved remainder of a path.
fn build_symlink_path(
    dst: &mut [u8; MAX_PATH],
    target: &[u8],
    rest: &[u8],
) -> Result<usize, KernelError> {
    let mut len = target.len();
    if len >= MAX_PATH {
        return Err(KernelError::PathTooLong);
    }
    dst[..len].copy_from_slice(target);
    if !rest.is_empty() {
        if len + 1 + rest.len() > MAX_PATH {
            return Err(KernelError::PathTooLong);
        }
        dst[len] = b'/';
        dst[len + 1..][..rest.len()].copy_from_slice(rest);
        len += 1 + rest.len();
    }
    Ok(len)
}

/// Resolves `path` starting from `ip`, following symbolic links up to
/// [`MAX_SYMLINK_DEPTH`] times.
///
/// In parent mode, stops one level early and copies the final element
/// into `name_out`. Consumes the reference on `ip`.
fn namex_from(
    mut ip: InodePtr,
    path: &[u8],
    parent: bool,
    name_out: Option<&mut [u8; DIR_SIZE]>,
    depth: usize,
) -> Result<InodePtr, KernelError> {
    let mut name_out = name_out;
    let mut path = path;

    while let Some((elem, rest)) = skip_elem(path) {
        path = rest;

        inode::ilock(ip);

        // every component but the last must be a directory.
        if unsafe { ip.as_ref().ty } != T_DIR {
            inode::iunlockput(ip);
            return Err(KernelError::NotADirectory);
        }

        if parent && path.is_empty() {
            // stop one level early.
            if let Some(name_out) = name_out {
                let len = usize::min(elem.len(), DIR_SIZE);
                name_out[..len].copy_from_slice(&elem[..len]);
                name_out[len..].fill(0);
            }
            inode::iunlock(ip);
            return Ok(ip);
        }

        let dir = ip;
        let next = match inode::dir_lookup(ip, elem) {
            Ok((next, _off)) => next,
            Err(e) => {
                inode::iunlockput(ip);
                return Err(e);
            }
        };
        inode::iunlock(ip);
        ip = next;

        // follow symbolic links, except for the final element in
        // parent mode.
        if is_symlink(ip) {
            if depth >= MAX_SYMLINK_DEPTH {
                inode::iput(ip);
                inode::iput(dir);
                return Err(KernelError::SymlinkDepthExceeded);
            }

            let mut target = [0u8; MAX_PATH];
            let res = read_symlink(ip, &mut target);
            inode::iput(ip);
            let target_len = match res {
                Ok(len) => len,
                Err(e) => {
                    inode::iput(dir);
                    return Err(e);
                }
            };
            let target = &target[..target_len];

            let mut combined = [0u8; MAX_PATH];
            if target.first() == Some(&b'/') {
                // absolute link: restart from the root.
                inode::iput(dir);
                let root = inode::iget(ROOT_DEV, InodeNo::ROOT.value());
                let len = match build_symlink_path(&mut combined, target, path) {
                    Ok(len) => len,
                    Err(e) => {
                        inode::iput(root);
                        return Err(e);
                    }
                };
                return namex_from(root, &combined[..len], parent, name_out, depth + 1);
            }
            // relative link: restart from the containing directory.
            let len = match build_symlink_path(&mut combined, target, path) {
                Ok(len) => len,
                Err(e) => {
                    inode::iput(dir);
                    return Err(e);
                }
            };
            return namex_from(dir, &combined[..len], parent, name_out, depth + 1);
        }

        inode::iput(dir);
    }

    if parent {
        // the path had no element to strip.
        inode::iput(ip);
        return Err(KernelError::EntryNotFound);
    }
    Ok(ip)
}

/// Returns whether `ip` is a symlink, loading it from disk if needed.
fn is_symlink(ip: InodePtr) -> bool {
    inode::ilock(ip);
    let is = unsafe { ip.as_ref().ty } == T_SYMLINK;
    inode::iunlock(ip);
    is
}

/// Reads a symlink's target into `buf`, without the stored NUL.
fn read_symlink(ip: InodePtr, buf: &mut [u8; MAX_PATH]) -> Result<usize, KernelError> {
    inode::ilock(ip);
    let res = (|| {
        let stored = unsafe { ip.as_ref().size } as usize;
        if stored == 0 || stored > MAX_PATH {
            return Err(KernelError::PathTooLong);
        }
        let n = inode::readi(ip, false, buf.as_mut_ptr().addr(), 0, stored)?;
        if n != stored {
            return Err(KernelError::EntryNotFound);
        }
        // the stored target ends with a NUL.
        Ok(stored - 1)
    })();
    inode::iunlock(ip);
    res
}

fn start_inode(path: &[u8]) -> InodePtr {
    if path.first() == Some(&b'/') {
        return inode::iget(ROOT_DEV, InodeNo::ROOT.value());
    }
    match Proc::try_current() {
        Some(p) => inode::idup(unsafe { p.private_mut() }.cwd()),
        None => inode::iget(ROOT_DEV, InodeNo::ROOT.value()),
    }
}

/// Resolves `path` to an inode, following symlinks.
///
/// Must be called inside a transaction, since it may release inode
/// references.
pub fn namei(path: &[u8]) -> Result<InodePtr, KernelError> {
    if path.is_empty() {
        return Err(KernelError::EntryNotFound);
    }
    namex_from(start_inode(path), path, false, None, 0)
}

/// Resolves `path` to its parent directory, copying the final element
/// into `name`.
pub fn namei_parent<'a>(
    path: &[u8],
    name: &'a mut [u8; DIR_SIZE],
) -> Result<(InodePtr, &'a [u8]), KernelError> {
    if path.is_empty() {
        return Err(KernelError::EntryNotFound);
    }
    let ip = namex_from(start_inode(path), path, true, Some(name), 0)?;
    let len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    Ok((ip, &name[..len]))
}
