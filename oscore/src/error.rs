//! Shared error taxonomy.
//!
//! One enum threaded through every fallible operation in the subsystem
//! crates, mirroring `keos`'s own `KernelError`: a POSIX-flavored set of
//! variants rather than one error type per module.

use std::fmt;

/// A recoverable failure raised by any of the subsystem crates.
///
/// Invariant violations (a corrupted clock table, a double free of a swap
/// slot) are not represented here: those are programmer errors and surface
/// as panics, matching the split described in `spec.md` §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The requested entry does not exist (unknown file, unknown directory
    /// component, unknown swap slot).
    NoSuchEntry,
    /// An argument to the call violates a precondition (empty name, name
    /// longer than `NAME_MAX`, zero-length mapping).
    InvalidArgument,
    /// The underlying block device or inode layer reported a failure.
    IoError,
    /// No memory frame, swap slot, or map id is available.
    NoMemory,
    /// The requested virtual address does not fall inside any valid region.
    BadAddress,
    /// The entry already exists (duplicate directory entry, overlapping
    /// mapping).
    FileExist,
    /// The operation requires a directory but was given a regular file.
    NotDirectory,
    /// The operation requires a regular file but was given a directory.
    IsDirectory,
    /// The directory is not empty and cannot be removed.
    DirectoryNotEmpty,
    /// The target process no longer exists.
    NoSuchProcess,
    /// The resource is transiently unavailable; retry after the expected
    /// wait condition clears.
    Busy,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::NoSuchEntry => "no such entry",
            KernelError::InvalidArgument => "invalid argument",
            KernelError::IoError => "I/O error",
            KernelError::NoMemory => "no memory available",
            KernelError::BadAddress => "bad address",
            KernelError::FileExist => "entry already exists",
            KernelError::NotDirectory => "not a directory",
            KernelError::IsDirectory => "is a directory",
            KernelError::DirectoryNotEmpty => "directory not empty",
            KernelError::NoSuchProcess => "no such process",
            KernelError::Busy => "resource busy",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for KernelError {}

/// Convenience alias used throughout the subsystem crates.
pub type Result<T> = std::result::Result<T, KernelError>;
