//! FAT32 BIOS Parameter Block (BPB)
//!
//! Decoders for the three structures read at mount time and the volume
//! geometry derived from them. All multi-byte fields are little-endian.
//!
//! # MBR (device sector 0)
//! - Bytes 446-509: four 16-byte partition entries
//! - Entry byte 4: partition type, bytes 8-11: first LBA, bytes 12-15: size
//! - Bytes 510-511: Signature (0x55, 0xAA)
//!
//! # Boot Sector Layout (first sector of the partition)
//! - Bytes 0-2: Jump instruction
//! - Bytes 3-10: OEM name
//! - Bytes 11-35: BPB (BIOS Parameter Block)
//! - Bytes 36-89: Extended BPB (FAT32 specific)
//! - Bytes 510-511: Signature (0x55, 0xAA)
//!
//! # FSInfo Layout
//! - Bytes 0-3: lead signature, 484-487: structure signature
//! - Bytes 488-491: free cluster count, 492-495: next free cluster hint
//! - Bytes 508-511: trailing signature

use crate::fs::block::SECTOR_SIZE;

/// Sectors per cluster this driver is built for
pub const SECTORS_PER_CLUSTER: u32 = 8;

/// Cluster size in bytes
pub const CLUSTER_SIZE: usize = SECTOR_SIZE * SECTORS_PER_CLUSTER as usize;

/// 32-bit FAT entries per FAT sector
pub const FAT_ENTRIES_PER_SECTOR: u32 = (SECTOR_SIZE / 4) as u32;

/// Number of FAT copies the layout assumes
pub const FAT_COPIES: u32 = 2;

/// Offset of the first partition entry in the MBR
pub const MBR_PARTITION_TABLE: usize = 446;

/// Size of one MBR partition entry
pub const MBR_PARTITION_ENTRY_SIZE: usize = 16;

pub(crate) fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

pub(crate) fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

pub(crate) fn set_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn set_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// One MBR partition table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionEntry {
    /// Boot indicator (0x80 = active)
    pub status: u8,
    /// Partition type (0x0B/0x0C for FAT32)
    pub partition_type: u8,
    /// First sector of the partition
    pub first_lba: u32,
    /// Partition length in sectors
    pub sector_count: u32,
}

impl PartitionEntry {
    /// Decode partition entry `index` (0-3) of an MBR sector
    pub fn parse(mbr: &[u8], index: usize) -> Self {
        let base = MBR_PARTITION_TABLE + index * MBR_PARTITION_ENTRY_SIZE;
        Self {
            status: mbr[base],
            partition_type: mbr[base + 4],
            first_lba: get_u32(mbr, base + 8),
            sector_count: get_u32(mbr, base + 12),
        }
    }

    /// Encode into partition slot `index` of an MBR sector
    pub fn encode(&self, mbr: &mut [u8], index: usize) {
        let base = MBR_PARTITION_TABLE + index * MBR_PARTITION_ENTRY_SIZE;
        mbr[base] = self.status;
        mbr[base + 4] = self.partition_type;
        set_u32(mbr, base + 8, self.first_lba);
        set_u32(mbr, base + 12, self.sector_count);
    }
}

/// BIOS Parameter Block plus the FAT32 extension fields the driver uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BiosParameterBlock {
    /// Bytes per sector (usually 512)
    pub bytes_per_sector: u16,
    /// Sectors per cluster (power of 2: 1, 2, 4, 8, 16, 32, 64, 128)
    pub sectors_per_cluster: u8,
    /// Reserved sectors (including boot sector)
    pub reserved_sectors: u16,
    /// Number of FATs (usually 2)
    pub num_fats: u8,
    /// Total sectors (16-bit, 0 for FAT32)
    pub total_sectors_16: u16,
    /// Media type (0xF8 for fixed disk)
    pub media_type: u8,
    /// Hidden sectors
    pub hidden_sectors: u32,
    /// Total sectors (32-bit)
    pub total_sectors_32: u32,
    /// Sectors per FAT (32-bit)
    pub sectors_per_fat_32: u32,
    /// Root directory cluster
    pub root_cluster: u32,
    /// FSInfo sector number, relative to the partition
    pub fs_info_sector: u16,
}

impl BiosParameterBlock {
    /// Decode from a boot sector
    pub fn parse(sector: &[u8]) -> Self {
        Self {
            bytes_per_sector: get_u16(sector, 11),
            sectors_per_cluster: sector[13],
            reserved_sectors: get_u16(sector, 14),
            num_fats: sector[16],
            total_sectors_16: get_u16(sector, 19),
            media_type: sector[21],
            hidden_sectors: get_u32(sector, 28),
            total_sectors_32: get_u32(sector, 32),
            sectors_per_fat_32: get_u32(sector, 36),
            root_cluster: get_u32(sector, 44),
            fs_info_sector: get_u16(sector, 48),
        }
    }

    /// Encode into a boot sector, leaving other bytes untouched
    pub fn encode(&self, sector: &mut [u8]) {
        set_u16(sector, 11, self.bytes_per_sector);
        sector[13] = self.sectors_per_cluster;
        set_u16(sector, 14, self.reserved_sectors);
        sector[16] = self.num_fats;
        set_u16(sector, 19, self.total_sectors_16);
        sector[21] = self.media_type;
        set_u32(sector, 28, self.hidden_sectors);
        set_u32(sector, 32, self.total_sectors_32);
        set_u32(sector, 36, self.sectors_per_fat_32);
        set_u32(sector, 44, self.root_cluster);
        set_u16(sector, 48, self.fs_info_sector);
    }

    /// Get total sectors
    pub fn total_sectors(&self) -> u32 {
        if self.total_sectors_16 != 0 {
            self.total_sectors_16 as u32
        } else {
            self.total_sectors_32
        }
    }

    /// Partition-relative FSInfo sector, defaulting to 1
    pub fn fs_info_sector(&self) -> u32 {
        match self.fs_info_sector {
            0 | 0xFFFF => 1,
            n => n as u32,
        }
    }

    /// Debug dump of the decoded fields
    pub fn dump(&self) {
        log::debug!("[FS] BPB: bytes/sector={} sectors/cluster={} reserved={} fats={}",
            self.bytes_per_sector, self.sectors_per_cluster, self.reserved_sectors, self.num_fats);
        log::debug!("[FS] BPB: total sectors={} sectors/FAT={} root cluster={} fsinfo={}",
            self.total_sectors(), self.sectors_per_fat_32, self.root_cluster, self.fs_info_sector);
    }
}

/// FSInfo structure (FAT32 only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsInfo {
    /// Leading signature (0x41615252)
    pub lead_sig: u32,
    /// Structure signature (0x61417272)
    pub struct_sig: u32,
    /// Free cluster count (0xFFFFFFFF if unknown)
    pub free_count: u32,
    /// Next free cluster hint (0xFFFFFFFF if unknown)
    pub next_free: u32,
    /// Trailing signature (0xAA550000)
    pub trail_sig: u32,
}

impl FsInfo {
    /// Leading signature value
    pub const LEAD_SIG: u32 = 0x41615252;
    /// Structure signature value
    pub const STRUCT_SIG: u32 = 0x61417272;
    /// Trailing signature value
    pub const TRAIL_SIG: u32 = 0xAA550000;
    /// Unknown count / hint
    pub const UNKNOWN: u32 = 0xFFFFFFFF;

    /// Fresh FSInfo with unknown counters
    pub const fn new() -> Self {
        Self {
            lead_sig: Self::LEAD_SIG,
            struct_sig: Self::STRUCT_SIG,
            free_count: Self::UNKNOWN,
            next_free: Self::UNKNOWN,
            trail_sig: Self::TRAIL_SIG,
        }
    }

    /// Decode from an FSInfo sector
    pub fn parse(sector: &[u8]) -> Self {
        Self {
            lead_sig: get_u32(sector, 0),
            struct_sig: get_u32(sector, 484),
            free_count: get_u32(sector, 488),
            next_free: get_u32(sector, 492),
            trail_sig: get_u32(sector, 508),
        }
    }

    /// Encode into an FSInfo sector, leaving reserved bytes untouched
    pub fn encode(&self, sector: &mut [u8]) {
        set_u32(sector, 0, self.lead_sig);
        set_u32(sector, 484, self.struct_sig);
        set_u32(sector, 488, self.free_count);
        set_u32(sector, 492, self.next_free);
        set_u32(sector, 508, self.trail_sig);
    }

    /// Check if FSInfo is valid
    pub fn is_valid(&self) -> bool {
        self.lead_sig == Self::LEAD_SIG &&
        self.struct_sig == Self::STRUCT_SIG &&
        self.trail_sig == Self::TRAIL_SIG
    }

    /// Check if next free hint is known
    pub fn has_next_free(&self) -> bool {
        self.next_free != Self::UNKNOWN
    }
}

/// FAT32 cluster entry values
pub mod cluster_values {
    /// Free cluster
    pub const FREE: u32 = 0x00000000;
    /// First data cluster
    pub const FIRST_DATA: u32 = 0x00000002;
    /// Bad cluster
    pub const BAD: u32 = 0x0FFFFFF7;
    /// End of chain (minimum value)
    pub const EOC_MIN: u32 = 0x0FFFFFF8;
    /// End of chain (standard value)
    pub const EOC: u32 = 0x0FFFFFFF;

    /// Mask for 28-bit cluster number
    pub const CLUSTER_MASK: u32 = 0x0FFFFFFF;

    /// Check if cluster is end of chain
    pub fn is_eoc(cluster: u32) -> bool {
        (cluster & CLUSTER_MASK) >= EOC_MIN
    }

    /// Check if cluster is free
    pub fn is_free(cluster: u32) -> bool {
        (cluster & CLUSTER_MASK) == FREE
    }

    /// Check if cluster is valid data cluster
    pub fn is_valid(cluster: u32) -> bool {
        let val = cluster & CLUSTER_MASK;
        (FIRST_DATA..BAD).contains(&val)
    }

    /// A next-cluster value that ends a walk: end of chain, free, reserved or bad
    pub fn ends_chain(next: u32) -> bool {
        !is_valid(next)
    }
}

/// Volume geometry, read once at mount
///
/// Sector numbers ending in `_sector` are relative to the partition start;
/// `base_sector` converts them to device sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatInfo {
    /// First device sector of the partition
    pub base_sector: u32,
    /// Bytes per sector, always `SECTOR_SIZE`
    pub sector_size: u32,
    /// Reserved sectors before the first FAT
    pub reserved_sectors: u32,
    /// Sectors in one FAT copy
    pub sectors_per_fat: u32,
    /// First sector of the data region
    pub data_start_sector: u32,
    /// Sectors in the data region
    pub data_sectors_cnt: u32,
    /// FSInfo sector
    pub fs_info_sector: u32,
    /// FSInfo contents as read at mount
    pub fs_info: FsInfo,
}

impl FatInfo {
    /// Derive the geometry from a decoded BPB
    ///
    /// Returns `None` when the FAT region or the partition end does not fit
    /// in a 32-bit device sector number. Every sector computed from an
    /// in-range cluster or FAT index is then representable.
    pub fn from_bpb(base_sector: u32, bpb: &BiosParameterBlock) -> Option<Self> {
        let reserved_sectors = bpb.reserved_sectors as u32;
        let sectors_per_fat = bpb.sectors_per_fat_32;
        let data_start_sector = FAT_COPIES.checked_mul(sectors_per_fat)?
            .checked_add(reserved_sectors)?;
        let total_sectors = bpb.total_sectors().max(data_start_sector);
        base_sector.checked_add(total_sectors)?;
        base_sector.checked_add(bpb.fs_info_sector())?;

        Some(Self {
            base_sector,
            sector_size: bpb.bytes_per_sector as u32,
            reserved_sectors,
            sectors_per_fat,
            data_start_sector,
            data_sectors_cnt: bpb.total_sectors().saturating_sub(data_start_sector),
            fs_info_sector: bpb.fs_info_sector(),
            fs_info: FsInfo::new(),
        })
    }

    /// Is `cluster` a data cluster of this volume
    pub fn is_data_cluster(&self, cluster: u32) -> bool {
        (cluster_values::FIRST_DATA..self.cluster_limit()).contains(&cluster)
    }

    /// Number of data clusters on the volume
    pub fn cluster_count(&self) -> u32 {
        self.data_sectors_cnt / SECTORS_PER_CLUSTER
    }

    /// One past the highest cluster number that can be allocated
    ///
    /// Bounded by both the FAT length and the data region.
    pub fn cluster_limit(&self) -> u32 {
        let fat_entries = self.sectors_per_fat.saturating_mul(FAT_ENTRIES_PER_SECTOR);
        fat_entries.min(self.cluster_count().saturating_add(cluster_values::FIRST_DATA))
    }

    /// First partition-relative sector of a data cluster
    pub fn cluster_to_sector(&self, cluster: u32) -> u32 {
        self.data_start_sector + (cluster - cluster_values::FIRST_DATA) * SECTORS_PER_CLUSTER
    }

    /// Data cluster holding a partition-relative data sector
    pub fn sector_to_cluster(&self, sector: u32) -> u32 {
        (sector - self.data_start_sector) / SECTORS_PER_CLUSTER + cluster_values::FIRST_DATA
    }

    /// Device sector of a data cluster
    pub fn cluster_device_sector(&self, cluster: u32) -> u32 {
        self.base_sector + self.cluster_to_sector(cluster)
    }

    /// Device sector of FAT sector `index` in FAT copy `copy` (1-based)
    pub fn fat_device_sector(&self, copy: u32, index: u32) -> u32 {
        self.base_sector + self.reserved_sectors + self.sectors_per_fat * (copy - 1) + index
    }

    /// Device sector of the FSInfo sector
    pub fn fs_info_device_sector(&self) -> u32 {
        self.base_sector + self.fs_info_sector
    }

    /// Debug dump of the derived geometry
    pub fn dump(&self) {
        log::debug!("[FS] FAT info: base={} reserved={} sectors/FAT={}",
            self.base_sector, self.reserved_sectors, self.sectors_per_fat);
        log::debug!("[FS] FAT info: data start={} data sectors={} clusters={} next free hint={:#x}",
            self.data_start_sector, self.data_sectors_cnt, self.cluster_count(), self.fs_info.next_free);
    }
}
