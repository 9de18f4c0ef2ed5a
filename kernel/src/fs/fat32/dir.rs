//! FAT32 Directory Entry Structures
//!
//! Directory entries are 32 bytes each and contain:
//! - File name (8.3 format)
//! - Attributes
//! - Timestamps
//! - First cluster (split into high and low 16-bit halves)
//! - File size
//!
//! # Entry Layout (little-endian)
//! - Bytes 0-7: name, 8-10: extension
//! - Byte 11: attributes, 12: NT reserved, 13: creation tenths
//! - Bytes 14-15: creation time, 16-17: creation date, 18-19: access date
//! - Bytes 20-21: first cluster high half
//! - Bytes 22-23: modify time, 24-25: modify date
//! - Bytes 26-27: first cluster low half
//! - Bytes 28-31: file size
//!
//! Long file name fragments are recognised only so they can be skipped.

use crate::fs::block::SECTOR_SIZE;
use crate::fs::path::ShortName;
use super::bpb::{get_u16, get_u32, set_u16, set_u32};

/// Directory entry size
pub const DIR_ENTRY_SIZE: usize = 32;

/// Directory entries per sector
pub const DENTRY_PER_SECTOR: u32 = (SECTOR_SIZE / DIR_ENTRY_SIZE) as u32;

/// File attributes
pub mod file_attr {
    pub const ATTR_READ_ONLY: u8 = 0x01;
    pub const ATTR_HIDDEN: u8 = 0x02;
    pub const ATTR_SYSTEM: u8 = 0x04;
    pub const ATTR_VOLUME_ID: u8 = 0x08;
    pub const ATTR_DIRECTORY: u8 = 0x10;
    pub const ATTR_ARCHIVE: u8 = 0x20;
    /// Long file name entry marker
    pub const ATTR_LFN: u8 = ATTR_READ_ONLY | ATTR_HIDDEN | ATTR_SYSTEM | ATTR_VOLUME_ID;
}

/// Special first byte values
pub mod entry_status {
    /// Entry is free
    pub const FREE: u8 = 0xE5;
    /// Entry is free and all following entries are free
    pub const FREE_LAST: u8 = 0x00;
}

/// Short directory entry (8.3 format)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatDirEntry {
    /// File name (8 characters, space-padded)
    pub name: [u8; 8],
    /// File extension (3 characters, space-padded)
    pub ext: [u8; 3],
    /// File attributes
    pub attr: u8,
    /// Reserved (used for lowercase flags in NT)
    pub nt_res: u8,
    /// Creation time (tenths of second)
    pub create_time_tenth: u8,
    /// Creation time
    pub create_time: u16,
    /// Creation date
    pub create_date: u16,
    /// Last access date
    pub access_date: u16,
    /// High 16 bits of first cluster
    pub cluster_hi: u16,
    /// Last modification time
    pub modify_time: u16,
    /// Last modification date
    pub modify_date: u16,
    /// Low 16 bits of first cluster
    pub cluster_lo: u16,
    /// File size in bytes
    pub file_size: u32,
}

impl FatDirEntry {
    /// Create empty entry
    pub const fn empty() -> Self {
        Self {
            name: [0x20; 8],
            ext: [0x20; 3],
            attr: 0,
            nt_res: 0,
            create_time_tenth: 0,
            create_time: 0,
            create_date: 0,
            access_date: 0,
            cluster_hi: 0,
            modify_time: 0,
            modify_date: 0,
            cluster_lo: 0,
            file_size: 0,
        }
    }

    /// Entry with the given name, attributes, first cluster and size
    pub fn new(name: ShortName, attr: u8, first_cluster: u32, file_size: u32) -> Self {
        let mut entry = Self::empty();
        entry.set_short_name(name);
        entry.attr = attr;
        entry.set_first_cluster(first_cluster);
        entry.file_size = file_size;
        entry
    }

    /// Decode a 32-byte on-disk record
    pub fn parse(raw: &[u8]) -> Self {
        let mut name = [0u8; 8];
        let mut ext = [0u8; 3];
        name.copy_from_slice(&raw[0..8]);
        ext.copy_from_slice(&raw[8..11]);
        Self {
            name,
            ext,
            attr: raw[11],
            nt_res: raw[12],
            create_time_tenth: raw[13],
            create_time: get_u16(raw, 14),
            create_date: get_u16(raw, 16),
            access_date: get_u16(raw, 18),
            cluster_hi: get_u16(raw, 20),
            modify_time: get_u16(raw, 22),
            modify_date: get_u16(raw, 24),
            cluster_lo: get_u16(raw, 26),
            file_size: get_u32(raw, 28),
        }
    }

    /// Encode into a 32-byte on-disk record
    pub fn encode(&self, raw: &mut [u8]) {
        raw[0..8].copy_from_slice(&self.name);
        raw[8..11].copy_from_slice(&self.ext);
        raw[11] = self.attr;
        raw[12] = self.nt_res;
        raw[13] = self.create_time_tenth;
        set_u16(raw, 14, self.create_time);
        set_u16(raw, 16, self.create_date);
        set_u16(raw, 18, self.access_date);
        set_u16(raw, 20, self.cluster_hi);
        set_u16(raw, 22, self.modify_time);
        set_u16(raw, 24, self.modify_date);
        set_u16(raw, 26, self.cluster_lo);
        set_u32(raw, 28, self.file_size);
    }

    /// Check if this is the last entry
    pub fn is_last(&self) -> bool {
        self.name[0] == entry_status::FREE_LAST
    }

    /// Check if entry was deleted
    pub fn is_deleted(&self) -> bool {
        self.name[0] == entry_status::FREE
    }

    /// Long-name fragments and volume labels both carry the volume bit
    pub fn is_name_fragment(&self) -> bool {
        (self.attr & file_attr::ATTR_VOLUME_ID) != 0
    }

    /// Check if this is a directory
    pub fn is_directory(&self) -> bool {
        (self.attr & file_attr::ATTR_DIRECTORY) != 0
    }

    /// Get the first cluster number
    pub fn first_cluster(&self) -> u32 {
        ((self.cluster_hi as u32) << 16) | (self.cluster_lo as u32)
    }

    /// Set the first cluster number
    pub fn set_first_cluster(&mut self, cluster: u32) {
        self.cluster_hi = (cluster >> 16) as u16;
        self.cluster_lo = (cluster & 0xFFFF) as u16;
    }

    /// Name and extension as one 11-byte field
    pub fn short_name(&self) -> ShortName {
        let mut raw = [0u8; 11];
        raw[..8].copy_from_slice(&self.name);
        raw[8..].copy_from_slice(&self.ext);
        ShortName::from_raw(raw)
    }

    /// Set name and extension from an encoded component
    pub fn set_short_name(&mut self, name: ShortName) {
        let raw = name.as_bytes();
        self.name.copy_from_slice(&raw[..8]);
        self.ext.copy_from_slice(&raw[8..]);
    }

    /// Exact 11-byte name comparison
    pub fn name_matches(&self, name: &ShortName) -> bool {
        self.short_name() == *name
    }
}

impl Default for FatDirEntry {
    fn default() -> Self {
        Self::empty()
    }
}

/// Where a directory entry lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DentryLocation {
    /// The synthetic root entry, which has no on-disk slot
    Root,
    /// Slot `offset` of partition-relative data sector `sector`
    Slot { sector: u32, offset: u32 },
}

/// An in-memory directory entry and its physical location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemDentry {
    /// Decoded record
    pub entry: FatDirEntry,
    /// Location of the record
    pub location: DentryLocation,
    /// Exempt from cache eviction
    pub pinned: bool,
}

impl MemDentry {
    /// Synthesize the root entry: no name, directory, first data cluster
    pub fn root() -> Self {
        let mut entry = FatDirEntry::empty();
        entry.attr = file_attr::ATTR_DIRECTORY;
        entry.set_first_cluster(super::bpb::cluster_values::FIRST_DATA);
        Self {
            entry,
            location: DentryLocation::Root,
            pinned: true,
        }
    }

    /// Is this the synthetic root
    pub fn is_root(&self) -> bool {
        self.location == DentryLocation::Root
    }
}
