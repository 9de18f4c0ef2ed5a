//! File System Status Codes
//!
//! Every fallible filesystem operation returns one of these. Callers own
//! any retry policy; the engine itself never retries device I/O.

use core::fmt;

/// File system error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FsError {
    /// Sector read or write failed
    Io = -1,
    /// On-disk geometry is not the one this driver supports
    GeometryMismatch = -2,
    /// Path component violates the 8.3 rules
    InvalidName = -3,
    /// Path component not present in its directory
    NotFound = -4,
    /// Intermediate path component is a file
    NotADirectory = -5,
    /// Data operation on a directory
    IsADirectory = -6,
    /// No free cluster left on the volume
    OutOfSpace = -7,
    /// Cluster number outside the FAT or the data region
    BadCluster = -8,
    /// Handle has no resolved directory entry
    Unresolved = -9,
}

impl FsError {
    /// Raw status value, as handed to the syscall layer
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Short human-readable name
    pub fn name(self) -> &'static str {
        match self {
            FsError::Io => "I/O error",
            FsError::GeometryMismatch => "unsupported geometry",
            FsError::InvalidName => "invalid name",
            FsError::NotFound => "not found",
            FsError::NotADirectory => "not a directory",
            FsError::IsADirectory => "is a directory",
            FsError::OutOfSpace => "out of space",
            FsError::BadCluster => "bad cluster",
            FsError::Unresolved => "unresolved handle",
        }
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Result type used across the filesystem layer
pub type FsResult<T> = Result<T, FsError>;
