//! MFS Kernel Core
//!
//! Storage and memory subsystems for a small teaching kernel.
//!
//! # Architecture Overview
//!
//! - **fs** - File System: sector I/O seam, 8.3 path handling, FAT32 engine
//!   (mount, path resolution, cluster-chain read/write, free-cluster search)
//! - **mm** - Memory Manager: page descriptor database and the buddy-system
//!   physical page allocator
//!
//! # Initialization
//!
//! Both subsystems are initialized explicitly by the embedding kernel:
//!
//! - `mm::init(kernel_end_pfn, max_pfn)` builds the global page allocator
//!   once the boot memory map is known.
//! - `fs::fat32::Fat32::mount(device)` parses the volume and bootstraps the
//!   caches and the root directory entry.
//!
//! The two are independent; the FAT32 engine never allocates page frames
//! directly.

#![cfg_attr(not(test), no_std)]
#![allow(clippy::new_without_default)]
#![allow(clippy::needless_range_loop)]

extern crate alloc;

pub mod fs;
pub mod mm;
