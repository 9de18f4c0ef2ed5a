//! FAT32 File System Driver
//!
//! This driver provides:
//! - FAT32 volume mounting from an MBR-partitioned block device
//! - 8.3 path resolution over directory cluster chains
//! - File reading/writing with on-demand cluster allocation
//! - Write-back caching of directory entries, data clusters and FAT sectors
//!
//! # Structure
//! - `bpb` - MBR, BIOS Parameter Block, FSInfo and derived geometry
//! - `dir` - Directory entry structures
//! - `cache` - Dentry, page and FAT-sector caches
//! - `file` - The mounted-volume session and file operations
//!
//! Long file names are not supported; their entries are skipped.

pub mod bpb;
pub mod cache;
pub mod dir;
pub mod file;


pub use bpb::{cluster_values, BiosParameterBlock, FatInfo, FsInfo, PartitionEntry};
pub use bpb::{CLUSTER_SIZE, FAT_ENTRIES_PER_SECTOR, SECTORS_PER_CLUSTER};
pub use cache::{CacheConfig, Fat32Cache, PageState};
pub use dir::{entry_status, file_attr, DentryLocation, FatDirEntry, MemDentry};
pub use dir::{DENTRY_PER_SECTOR, DIR_ENTRY_SIZE};
pub use file::{Fat32, Handle};
