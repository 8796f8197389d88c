use crate::memory::VirtAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("no free process slot")]
    NoFreeProc,
    #[error("no free physical frame")]
    NoFreePage,
    #[error("no child process")]
    NoChildProcess,
    #[error("process not found")]
    ProcessNotFound,
    #[error("virtual address too large: {0:#x}")]
    TooLargeVirtualAddress(usize),
    #[error("address not mapped: {0:#x}")]
    AddressNotMapped(VirtAddr),
    #[error("inaccessible memory: {0:#x}")]
    InaccessibleMemory(VirtAddr),
    #[error("page is not copy-on-write: {0:#x}")]
    NotCopyOnWrite(VirtAddr),
    #[error("unterminated user string")]
    UnterminatedString,
    #[error("bad file descriptor")]
    BadFileDescriptor,
    #[error("file descriptor not readable")]
    NotReadable,
    #[error("file descriptor not writable")]
    NotWritable,
    #[error("non-directory component in path")]
    NotADirectory,
    #[error("file system entry not found")]
    EntryNotFound,
    #[error("entry already exists")]
    AlreadyExists,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("too many levels of symbolic links")]
    SymlinkDepthExceeded,
    #[error("path too long")]
    PathTooLong,
    #[error("file too large")]
    FileTooLarge,
    #[error("too many open files in system")]
    TooManyOpenFilesSystem,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("out of data blocks")]
    OutOfBlocks,
    #[error("out of inodes")]
    OutOfInodes,
    #[error("open directory as writable")]
    OpenDirAsWritable,
    #[error("chdir target is not a directory")]
    ChdirNotDir,
    #[error("argument list too long")]
    ArgumentListTooLong,
    #[error("invalid executable")]
    InvalidExecutable,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("caller process killed")]
    CallerKilled,
}
