//! FAT32 Caches
//!
//! Three keyed caches sit between the engine and the block device:
//!
//! - **Dentry cache**: `(sector, slot)` -> decoded directory entry
//! - **Page cache**: cluster number -> one cluster of data
//! - **FAT cache**: `(FAT copy, FAT sector)` -> raw FAT sector
//!
//! Each cache is bounded; when full, the least recently used unpinned entry
//! is evicted and written back first if dirty. The engine only marks entries
//! dirty; data reaches the device on eviction or on [`Fat32Cache::flush`].
//!
//! A dentry miss is filled from the page image of the owning cluster, and
//! [`Fat32Cache::update_dentry`] changes both copies together, so the decoded
//! entry and the raw page never disagree when either is flushed.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec;

use crate::fs::block::{BlockDevice, SECTOR_SIZE};
use crate::fs::error::{FsError, FsResult};
use super::bpb::{cluster_values, FatInfo, CLUSTER_SIZE, SECTORS_PER_CLUSTER};
use super::dir::{DentryLocation, FatDirEntry, MemDentry, DENTRY_PER_SECTOR, DIR_ENTRY_SIZE};

/// Cache sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Decoded directory entries kept in memory
    pub dentries: usize,
    /// Cluster pages kept in memory
    pub pages: usize,
    /// FAT sectors kept in memory
    pub fat_sectors: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dentries: 256,
            pages: 32,
            fat_sectors: 16,
        }
    }
}

/// Write-back state of a cached object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Matches the device
    Clean,
    /// Must be written back before it is dropped
    Dirty,
}

/// One cluster of file or directory data
pub struct MemPage {
    /// Data cluster number (>= 2)
    pub cluster: u32,
    /// `CLUSTER_SIZE` bytes
    pub data: Box<[u8]>,
    /// Write-back state
    pub state: PageState,
    last_used: u64,
}

impl MemPage {
    /// Mark the page for write-back
    pub fn mark_dirty(&mut self) {
        self.state = PageState::Dirty;
    }
}

/// One sector of one FAT copy
pub struct FatBuffer {
    /// FAT copy (1-based)
    pub fat_copy: u32,
    /// Sector index within the FAT
    pub sector_index: u32,
    /// `SECTOR_SIZE` bytes
    pub data: Box<[u8]>,
    /// Write-back state
    pub state: PageState,
    last_used: u64,
}

impl FatBuffer {
    /// Mark the buffer for write-back
    pub fn mark_dirty(&mut self) {
        self.state = PageState::Dirty;
    }
}

struct CachedDentry {
    dentry: MemDentry,
    state: PageState,
    last_used: u64,
}

/// Dentry, page and FAT-sector caches over one volume
pub struct Fat32Cache<D: BlockDevice> {
    device: D,
    info: FatInfo,
    config: CacheConfig,
    tick: u64,
    dentries: BTreeMap<(u32, u32), CachedDentry>,
    pages: BTreeMap<u32, MemPage>,
    fat: BTreeMap<(u32, u32), FatBuffer>,
}

impl<D: BlockDevice> Fat32Cache<D> {
    /// Create empty caches for a mounted volume
    pub fn new(device: D, info: FatInfo, config: CacheConfig) -> Self {
        Self {
            device,
            info,
            config,
            tick: 0,
            dentries: BTreeMap::new(),
            pages: BTreeMap::new(),
            fat: BTreeMap::new(),
        }
    }

    /// Underlying device, bypassing the caches
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Give back the device; unflushed data is dropped
    pub fn into_device(self) -> D {
        self.device
    }

    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    // ========================================================================
    // Page cache
    // ========================================================================

    /// Look up a cluster page, reading it from the device on a miss
    pub fn page(&mut self, cluster: u32) -> FsResult<&mut MemPage> {
        let tick = self.touch();
        if !self.pages.contains_key(&cluster) {
            self.load_page(cluster)?;
        }
        let page = self.pages.get_mut(&cluster).ok_or(FsError::BadCluster)?;
        page.last_used = tick;
        Ok(page)
    }

    fn load_page(&mut self, cluster: u32) -> FsResult<()> {
        if !(cluster_values::FIRST_DATA..self.info.cluster_limit()).contains(&cluster) {
            return Err(FsError::BadCluster);
        }
        if self.pages.len() >= self.config.pages.max(1) {
            self.evict_page()?;
        }

        let mut data = vec![0u8; CLUSTER_SIZE].into_boxed_slice();
        let sector = self.info.cluster_device_sector(cluster);
        self.device.read_sector(&mut data, sector, SECTORS_PER_CLUSTER)?;

        self.pages.insert(cluster, MemPage {
            cluster,
            data,
            state: PageState::Clean,
            last_used: self.tick,
        });
        Ok(())
    }

    fn evict_page(&mut self) -> FsResult<()> {
        let victim = self.pages.iter()
            .min_by_key(|(_, page)| page.last_used)
            .map(|(&cluster, _)| cluster);

        if let Some(cluster) = victim {
            if let Some(page) = self.pages.get(&cluster) {
                if page.state == PageState::Dirty {
                    let sector = self.info.cluster_device_sector(cluster);
                    self.device.write_sector(&page.data, sector, SECTORS_PER_CLUSTER)?;
                }
            }
            self.pages.remove(&cluster);
        }
        Ok(())
    }

    // ========================================================================
    // Dentry cache
    // ========================================================================

    /// Look up the decoded entry at `(sector, offset)`
    pub fn dentry(&mut self, sector: u32, offset: u32) -> FsResult<MemDentry> {
        let tick = self.touch();
        if let Some(cached) = self.dentries.get_mut(&(sector, offset)) {
            cached.last_used = tick;
            return Ok(cached.dentry);
        }

        let (cluster, byte) = self.slot_position(sector, offset)?;
        let page = self.page(cluster)?;
        let entry = FatDirEntry::parse(&page.data[byte..byte + DIR_ENTRY_SIZE]);

        let dentry = MemDentry {
            entry,
            location: DentryLocation::Slot { sector, offset },
            pinned: false,
        };
        self.insert_dentry(dentry)?;
        Ok(dentry)
    }

    /// Add a decoded entry; an entry already cached at the same slot is replaced
    pub fn insert_dentry(&mut self, dentry: MemDentry) -> FsResult<()> {
        let DentryLocation::Slot { sector, offset } = dentry.location else {
            return Ok(());
        };
        if !self.dentries.contains_key(&(sector, offset))
            && self.dentries.len() >= self.config.dentries.max(1)
        {
            self.evict_dentry()?;
        }

        let last_used = self.touch();
        self.dentries.insert((sector, offset), CachedDentry {
            dentry,
            state: PageState::Clean,
            last_used,
        });
        Ok(())
    }

    /// Modify the entry at `(sector, offset)` in both the dentry cache and
    /// the page image, marking both dirty
    pub fn update_dentry<F>(&mut self, sector: u32, offset: u32, update: F) -> FsResult<MemDentry>
    where
        F: FnOnce(&mut FatDirEntry),
    {
        let mut dentry = self.dentry(sector, offset)?;
        update(&mut dentry.entry);

        let (cluster, byte) = self.slot_position(sector, offset)?;
        let page = self.page(cluster)?;
        dentry.entry.encode(&mut page.data[byte..byte + DIR_ENTRY_SIZE]);
        page.mark_dirty();

        let tick = self.touch();
        match self.dentries.get_mut(&(sector, offset)) {
            Some(cached) => {
                cached.dentry = dentry;
                cached.state = PageState::Dirty;
                cached.last_used = tick;
            }
            None => {
                // Evicted while the page was loaded; the page already holds it.
                self.insert_dentry(dentry)?;
            }
        }
        Ok(dentry)
    }

    fn evict_dentry(&mut self) -> FsResult<()> {
        let victim = self.dentries.iter()
            .filter(|(_, cached)| !cached.dentry.pinned)
            .min_by_key(|(_, cached)| cached.last_used)
            .map(|(&key, _)| key);

        if let Some(key) = victim {
            if let Some(cached) = self.dentries.remove(&key) {
                if cached.state == PageState::Dirty {
                    self.write_dentry_to_page(key.0, key.1, &cached.dentry.entry)?;
                }
            }
        }
        Ok(())
    }

    fn write_dentry_to_page(&mut self, sector: u32, offset: u32, entry: &FatDirEntry) -> FsResult<()> {
        let (cluster, byte) = self.slot_position(sector, offset)?;
        let page = self.page(cluster)?;
        entry.encode(&mut page.data[byte..byte + DIR_ENTRY_SIZE]);
        page.mark_dirty();
        Ok(())
    }

    /// Cluster and byte offset inside it of a dentry slot
    fn slot_position(&self, sector: u32, offset: u32) -> FsResult<(u32, usize)> {
        if sector < self.info.data_start_sector || offset >= DENTRY_PER_SECTOR {
            return Err(FsError::BadCluster);
        }
        let cluster = self.info.sector_to_cluster(sector);
        let sector_in_cluster = (sector - self.info.data_start_sector) % SECTORS_PER_CLUSTER;
        let byte = sector_in_cluster as usize * SECTOR_SIZE + offset as usize * DIR_ENTRY_SIZE;
        Ok((cluster, byte))
    }

    // ========================================================================
    // FAT cache
    // ========================================================================

    /// Look up sector `index` of FAT copy `fat_copy` (1-based)
    pub fn fat_sector(&mut self, fat_copy: u32, index: u32) -> FsResult<&mut FatBuffer> {
        let tick = self.touch();
        if !self.fat.contains_key(&(fat_copy, index)) {
            self.load_fat_sector(fat_copy, index)?;
        }
        let buffer = self.fat.get_mut(&(fat_copy, index)).ok_or(FsError::BadCluster)?;
        buffer.last_used = tick;
        Ok(buffer)
    }

    fn load_fat_sector(&mut self, fat_copy: u32, index: u32) -> FsResult<()> {
        if index >= self.info.sectors_per_fat || !(1..=super::bpb::FAT_COPIES).contains(&fat_copy) {
            return Err(FsError::BadCluster);
        }
        if self.fat.len() >= self.config.fat_sectors.max(1) {
            self.evict_fat_sector()?;
        }

        let mut data = vec![0u8; SECTOR_SIZE].into_boxed_slice();
        let sector = self.info.fat_device_sector(fat_copy, index);
        self.device.read_sector(&mut data, sector, 1)?;

        self.fat.insert((fat_copy, index), FatBuffer {
            fat_copy,
            sector_index: index,
            data,
            state: PageState::Clean,
            last_used: self.tick,
        });
        Ok(())
    }

    fn evict_fat_sector(&mut self) -> FsResult<()> {
        let victim = self.fat.iter()
            .min_by_key(|(_, buffer)| buffer.last_used)
            .map(|(&key, _)| key);

        if let Some(key) = victim {
            if let Some(buffer) = self.fat.get(&key) {
                if buffer.state == PageState::Dirty {
                    let sector = self.info.fat_device_sector(buffer.fat_copy, buffer.sector_index);
                    self.device.write_sector(&buffer.data, sector, 1)?;
                }
            }
            self.fat.remove(&key);
        }
        Ok(())
    }

    // ========================================================================
    // Write-back
    // ========================================================================

    /// Write every dirty entry, page and FAT sector back to the device
    ///
    /// Dentries are folded into their page images first, so pages are
    /// written with the latest decoded state.
    pub fn flush(&mut self) -> FsResult<()> {
        let dirty: alloc::vec::Vec<((u32, u32), FatDirEntry)> = self.dentries.iter()
            .filter(|(_, cached)| cached.state == PageState::Dirty)
            .map(|(&key, cached)| (key, cached.dentry.entry))
            .collect();
        for ((sector, offset), entry) in dirty {
            self.write_dentry_to_page(sector, offset, &entry)?;
            if let Some(cached) = self.dentries.get_mut(&(sector, offset)) {
                cached.state = PageState::Clean;
            }
        }

        for page in self.pages.values_mut() {
            if page.state == PageState::Dirty {
                let sector = self.info.cluster_device_sector(page.cluster);
                self.device.write_sector(&page.data, sector, SECTORS_PER_CLUSTER)?;
                page.state = PageState::Clean;
            }
        }

        for buffer in self.fat.values_mut() {
            if buffer.state == PageState::Dirty {
                let sector = self.info.fat_device_sector(buffer.fat_copy, buffer.sector_index);
                self.device.write_sector(&buffer.data, sector, 1)?;
                buffer.state = PageState::Clean;
            }
        }
        Ok(())
    }

    /// Number of dirty dentries, pages and FAT sectors
    pub fn dirty_count(&self) -> usize {
        self.dentries.values().filter(|c| c.state == PageState::Dirty).count()
            + self.pages.values().filter(|p| p.state == PageState::Dirty).count()
            + self.fat.values().filter(|b| b.state == PageState::Dirty).count()
    }

    /// Number of cached (dentries, pages, FAT sectors)
    pub fn cached_counts(&self) -> (usize, usize, usize) {
        (self.dentries.len(), self.pages.len(), self.fat.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::block::RamDisk;
    use crate::fs::fat32::bpb::BiosParameterBlock;
    use crate::fs::path::ShortName;

    // Partition at sector 0, 4 reserved, 1 sector per FAT, 16 clusters.
    fn geometry() -> FatInfo {
        let bpb = BiosParameterBlock {
            bytes_per_sector: 512,
            sectors_per_cluster: 8,
            reserved_sectors: 4,
            num_fats: 2,
            total_sectors_32: 6 + 16 * 8,
            sectors_per_fat_32: 1,
            root_cluster: 2,
            fs_info_sector: 1,
            ..Default::default()
        };
        FatInfo::from_bpb(0, &bpb).unwrap()
    }

    fn cache(config: CacheConfig) -> Fat32Cache<RamDisk> {
        let info = geometry();
        Fat32Cache::new(RamDisk::new(6 + 16 * 8), info, config)
    }

    #[test]
    fn test_page_eviction_writes_back() {
        let mut cache = cache(CacheConfig { dentries: 4, pages: 2, fat_sectors: 2 });

        let page = cache.page(3).unwrap();
        page.data[0] = 0x42;
        page.mark_dirty();
        cache.page(4).unwrap();
        cache.page(5).unwrap();
        assert_eq!(cache.cached_counts().1, 2);

        // Cluster 3 was least recently used and went to disk.
        let sector = geometry().cluster_device_sector(3) as usize;
        assert_eq!(cache.device_mut().as_bytes()[sector * SECTOR_SIZE], 0x42);
        assert_eq!(cache.page(3).unwrap().data[0], 0x42);
    }

    #[test]
    fn test_page_rejects_bad_cluster() {
        let mut cache = cache(CacheConfig::default());
        assert!(matches!(cache.page(0), Err(FsError::BadCluster)));
        assert!(matches!(cache.page(1), Err(FsError::BadCluster)));
        assert!(matches!(cache.page(18), Err(FsError::BadCluster)));
        assert!(cache.page(17).is_ok());
    }

    #[test]
    fn test_update_dentry_keeps_views_in_sync() {
        let mut cache = cache(CacheConfig::default());
        let sector = geometry().data_start_sector + 1;

        let name = ShortName::parse("a.txt").unwrap();
        cache.update_dentry(sector, 2, |entry| {
            entry.set_short_name(name);
            entry.file_size = 77;
        }).unwrap();

        let dentry = cache.dentry(sector, 2).unwrap();
        assert_eq!(dentry.entry.file_size, 77);

        let byte = SECTOR_SIZE + 2 * DIR_ENTRY_SIZE;
        let page = cache.page(2).unwrap();
        assert_eq!(page.state, PageState::Dirty);
        assert_eq!(FatDirEntry::parse(&page.data[byte..byte + DIR_ENTRY_SIZE]), dentry.entry);
    }

    #[test]
    fn test_flush_is_idempotent() {
        let mut cache = cache(CacheConfig::default());
        let sector = geometry().data_start_sector;
        cache.update_dentry(sector, 0, |entry| entry.file_size = 5).unwrap();
        cache.fat_sector(1, 0).unwrap().mark_dirty();
        assert_eq!(cache.dirty_count(), 3);

        cache.flush().unwrap();
        assert_eq!(cache.dirty_count(), 0);
        cache.flush().unwrap();
        assert_eq!(cache.dirty_count(), 0);

        let raw = &cache.device_mut().as_bytes()[sector as usize * SECTOR_SIZE..];
        assert_eq!(FatDirEntry::parse(&raw[..DIR_ENTRY_SIZE]).file_size, 5);
    }

    #[test]
    fn test_pinned_dentries_survive_eviction() {
        let mut cache = cache(CacheConfig { dentries: 2, pages: 4, fat_sectors: 2 });
        let sector = geometry().data_start_sector;

        let mut pinned = cache.dentry(sector, 0).unwrap();
        pinned.pinned = true;
        cache.insert_dentry(pinned).unwrap();

        for slot in 1..6 {
            cache.dentry(sector, slot).unwrap();
        }
        assert_eq!(cache.cached_counts().0, 2);
        assert!(cache.dentries.contains_key(&(sector, 0)));
    }

    #[test]
    fn test_fat_sector_bounds() {
        let mut cache = cache(CacheConfig::default());
        assert!(cache.fat_sector(1, 0).is_ok());
        assert!(cache.fat_sector(2, 0).is_ok());
        assert!(matches!(cache.fat_sector(1, 1), Err(FsError::BadCluster)));
        assert!(matches!(cache.fat_sector(3, 0), Err(FsError::BadCluster)));
    }
}
