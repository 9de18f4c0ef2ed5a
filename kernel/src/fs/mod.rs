//! File System Subsystem
//!
//! Provides file system support for the kernel:
//! - Sector I/O seam over a block device
//! - 8.3 path component handling
//! - FAT32 file system driver
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │             File descriptor / shell layer                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ open / read / write / close
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │   FAT32 engine: path resolver + cluster-chain I/O           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │   Dentry cache │ Page cache │ FAT-sector cache              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ cache miss / flush
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Block I/O Layer                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod block;
pub mod error;
pub mod fat32;
pub mod path;

pub use block::{BlockDevice, BlockError, RamDisk, SECTOR_SIZE};
pub use error::{FsError, FsResult};
pub use path::{ShortName, MAX_PATH};
