//! FAT32 File Operations
//!
//! A mounted volume is one [`Fat32`] session. It owns the geometry table,
//! the caches, the synthetic root entry and the current working directory:
//! - Mounting and root bootstrap
//! - Path resolution over directory cluster chains
//! - Reading/writing files through the page cache
//! - Cluster chain management and free-cluster allocation
//!
//! All device traffic goes through [`Fat32Cache`]; the engine only marks
//! cached objects dirty and asks for a flush on close.

use alloc::string::String;

use crate::fs::block::{BlockDevice, SECTOR_SIZE};
use crate::fs::error::{FsError, FsResult};
use crate::fs::path::{self, ShortName, MAX_PATH};
use super::bpb::{
    cluster_values, get_u32, set_u32, BiosParameterBlock, FatInfo, FsInfo, PartitionEntry,
    CLUSTER_SIZE, FAT_COPIES, FAT_ENTRIES_PER_SECTOR, SECTORS_PER_CLUSTER,
};
use super::cache::{CacheConfig, Fat32Cache};
use super::dir::{DentryLocation, FatDirEntry, MemDentry, DENTRY_PER_SECTOR};

/// Cluster size as a byte-offset divisor
const CLUSTER_BYTES: u64 = CLUSTER_SIZE as u64;

/// An open file: its path, cursor and resolved entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    path: String,
    position: u32,
    location: Option<DentryLocation>,
}

impl Handle {
    /// Unresolved handle for `path`
    pub fn new(path: &str) -> Self {
        Self {
            path: String::from(path),
            position: 0,
            location: None,
        }
    }

    /// Path as opened; relative paths are stored joined onto the cwd
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current read/write byte offset
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Location of the directory entry, if resolved
    pub fn location(&self) -> Option<DentryLocation> {
        self.location
    }

    /// Has a path lookup succeeded for this handle
    pub fn is_resolved(&self) -> bool {
        self.location.is_some()
    }
}

/// A mounted FAT32 volume
pub struct Fat32<D: BlockDevice> {
    info: FatInfo,
    cache: Fat32Cache<D>,
    root: MemDentry,
    cwd: MemDentry,
    cwd_path: String,
    /// Where the next free-cluster scan starts
    next_free: u32,
    next_free_dirty: bool,
}

fn mount_step<T, E: Into<FsError>>(result: Result<T, E>, what: &str) -> FsResult<T> {
    result.map_err(|e| {
        let err = e.into();
        log::error!("[FS] Mount failed: {}: {}", what, err);
        err
    })
}

impl<D: BlockDevice> Fat32<D> {
    // ========================================================================
    // Mount
    // ========================================================================

    /// Mount the first partition of `device` with default cache sizes
    pub fn mount(device: D) -> FsResult<Self> {
        Self::mount_with(device, CacheConfig::default())
    }

    /// Mount the first partition of `device`
    pub fn mount_with(mut device: D, config: CacheConfig) -> FsResult<Self> {
        let mut sector = [0u8; SECTOR_SIZE];

        mount_step(device.read_sector(&mut sector, 0, 1), "reading MBR")?;
        let partition = PartitionEntry::parse(&sector, 0);
        log::info!("[FS] MBR loaded: partition type {:#04x} at sector {}",
            partition.partition_type, partition.first_lba);

        let base = partition.first_lba;
        mount_step(device.read_sector(&mut sector, base, 1), "reading BPB")?;
        let bpb = BiosParameterBlock::parse(&sector);
        log::info!("[FS] BPB loaded");
        bpb.dump();

        if bpb.bytes_per_sector as usize != SECTOR_SIZE {
            return mount_step(Err(FsError::GeometryMismatch), "sector size");
        }
        if bpb.sectors_per_cluster as u32 != SECTORS_PER_CLUSTER {
            return mount_step(Err(FsError::GeometryMismatch), "sectors per cluster");
        }
        if bpb.sectors_per_fat_32 == 0 || bpb.root_cluster != cluster_values::FIRST_DATA {
            return mount_step(Err(FsError::GeometryMismatch), "FAT layout");
        }

        let mut info = mount_step(FatInfo::from_bpb(base, &bpb).ok_or(FsError::GeometryMismatch),
            "geometry out of range")?;
        if info.cluster_count() == 0 {
            return mount_step(Err(FsError::GeometryMismatch), "empty data region");
        }

        mount_step(device.read_sector(&mut sector, info.fs_info_device_sector(), 1), "reading FSInfo")?;
        info.fs_info = FsInfo::parse(&sector);
        if info.fs_info.is_valid() {
            log::info!("[FS] FSInfo loaded: free={:#x} next free={:#x}",
                info.fs_info.free_count, info.fs_info.next_free);
        } else {
            log::warn!("[FS] FSInfo signatures invalid, ignoring free cluster hint");
        }
        info.dump();

        let next_free = if info.fs_info.is_valid() && info.fs_info.has_next_free() {
            info.fs_info.next_free
        } else {
            cluster_values::FIRST_DATA
        };

        let mut cache = Fat32Cache::new(device, info, config);
        mount_step(cache.fat_sector(1, 0).map(|_| ()), "loading FAT sector 0")?;

        let root = MemDentry::root();
        Ok(Self {
            info,
            cache,
            root,
            cwd: root,
            cwd_path: String::from("/"),
            next_free,
            next_free_dirty: false,
        })
    }

    /// Volume geometry
    pub fn info(&self) -> &FatInfo {
        &self.info
    }

    /// Caches of this volume
    pub fn cache(&mut self) -> &mut Fat32Cache<D> {
        &mut self.cache
    }

    /// Give back the device; anything not flushed is dropped
    pub fn into_device(self) -> D {
        self.cache.into_device()
    }

    /// Current working directory path
    pub fn cwd(&self) -> &str {
        &self.cwd_path
    }

    // ========================================================================
    // FAT chain navigation
    // ========================================================================

    /// Next cluster in the chain after `cluster`, read from FAT copy 1
    pub fn get_next_cluster(&mut self, cluster: u32) -> FsResult<u32> {
        let index = cluster / FAT_ENTRIES_PER_SECTOR;
        let offset = (cluster % FAT_ENTRIES_PER_SECTOR) as usize * 4;
        let buffer = self.cache.fat_sector(1, index)?;
        Ok(get_u32(&buffer.data, offset) & cluster_values::CLUSTER_MASK)
    }

    /// Set the FAT entry of `cluster` in every copy, keeping the reserved bits
    pub fn update_fat(&mut self, cluster: u32, value: u32) -> FsResult<()> {
        let index = cluster / FAT_ENTRIES_PER_SECTOR;
        let offset = (cluster % FAT_ENTRIES_PER_SECTOR) as usize * 4;
        for copy in 1..=FAT_COPIES {
            let buffer = self.cache.fat_sector(copy, index)?;
            let reserved = get_u32(&buffer.data, offset) & !cluster_values::CLUSTER_MASK;
            set_u32(&mut buffer.data, offset, reserved | (value & cluster_values::CLUSTER_MASK));
            buffer.mark_dirty();
        }
        Ok(())
    }

    /// First free cluster at or after the hint, wrapping to cluster 2
    pub fn get_free_cluster(&mut self) -> FsResult<u32> {
        let limit = self.info.cluster_limit();
        let start = if (cluster_values::FIRST_DATA..limit).contains(&self.next_free) {
            self.next_free
        } else {
            cluster_values::FIRST_DATA
        };

        for cluster in (start..limit).chain(cluster_values::FIRST_DATA..start) {
            if cluster_values::is_free(self.get_next_cluster(cluster)?) {
                return Ok(cluster);
            }
        }
        log::warn!("[FS] No free clusters left");
        Err(FsError::OutOfSpace)
    }

    /// Take a free cluster and mark it end of chain
    pub fn alloc_cluster(&mut self) -> FsResult<u32> {
        let cluster = self.get_free_cluster()?;
        self.update_fat(cluster, cluster_values::EOC)?;
        self.next_free = cluster + 1;
        self.next_free_dirty = true;
        log::trace!("[FS] Allocated cluster {}", cluster);
        Ok(cluster)
    }

    // ========================================================================
    // Path resolution
    // ========================================================================

    fn dentry_at(&mut self, location: DentryLocation) -> FsResult<MemDentry> {
        match location {
            DentryLocation::Root => Ok(self.root),
            DentryLocation::Slot { sector, offset } => self.cache.dentry(sector, offset),
        }
    }

    /// Scan one directory's cluster chain for `name`
    fn lookup(&mut self, dir: &MemDentry, name: &ShortName) -> FsResult<MemDentry> {
        if *name == ShortName::DOT {
            return Ok(*dir);
        }
        if *name == ShortName::DOTDOT && dir.is_root() {
            return Ok(self.root);
        }

        let mut cluster = dir.entry.first_cluster();
        let mut hops = 0;
        while cluster_values::is_valid(cluster) {
            // A FAT loop would otherwise never reach end of chain.
            hops += 1;
            if hops > self.info.cluster_count() || !self.info.is_data_cluster(cluster) {
                return Err(FsError::BadCluster);
            }

            let first = self.info.cluster_to_sector(cluster);
            for sector in first..first + SECTORS_PER_CLUSTER {
                for offset in 0..DENTRY_PER_SECTOR {
                    let dentry = self.cache.dentry(sector, offset)?;
                    let entry = &dentry.entry;
                    if entry.is_name_fragment() {
                        continue;
                    }
                    if entry.is_last() {
                        return Err(FsError::NotFound);
                    }
                    if entry.is_deleted() {
                        continue;
                    }
                    if entry.name_matches(name) {
                        if *name == ShortName::DOTDOT && entry.first_cluster() == 0 {
                            return Ok(self.root);
                        }
                        return Ok(dentry);
                    }
                }
            }
            cluster = self.get_next_cluster(cluster)?;
        }
        Err(FsError::NotFound)
    }

    /// Resolve `path` to the location of its directory entry
    ///
    /// Absolute paths start at the root, others at the working directory.
    /// An empty path names the working directory and `/` the root.
    pub fn find(&mut self, path: &str) -> FsResult<DentryLocation> {
        if path.len() > MAX_PATH {
            return Err(FsError::InvalidName);
        }

        let mut current = if path::is_absolute(path) { self.root } else { self.cwd };
        for component in path::components(path) {
            let name = component?;
            if !current.entry.is_directory() {
                return Err(FsError::NotADirectory);
            }
            current = self.lookup(&current, &name)?;
        }
        Ok(current.location)
    }

    /// Look up the handle's path and record the entry location in it
    ///
    /// On failure the handle stays unresolved.
    pub fn resolve(&mut self, handle: &mut Handle) -> FsResult<()> {
        let location = self.find(&handle.path)?;
        handle.location = Some(location);
        Ok(())
    }

    // ========================================================================
    // File operations
    // ========================================================================

    /// Open `path` with the cursor at 0
    pub fn open(&mut self, path: &str) -> FsResult<Handle> {
        let mut handle = Handle::new(path);
        self.resolve(&mut handle).map_err(|e| {
            log::debug!("[FS] open {:?} failed: {}", path, e);
            e
        })?;
        if !path::is_absolute(path) {
            handle.path = path::join(&self.cwd_path, path);
        }
        Ok(handle)
    }

    /// Decoded directory entry of an open handle
    pub fn stat(&mut self, handle: &Handle) -> FsResult<FatDirEntry> {
        let location = handle.location.ok_or(FsError::Unresolved)?;
        Ok(self.dentry_at(location)?.entry)
    }

    /// Recorded size of an open file
    pub fn file_size(&mut self, handle: &Handle) -> FsResult<u32> {
        Ok(self.stat(handle)?.file_size)
    }

    /// Move the cursor; positions past the end are allowed
    pub fn seek(&mut self, handle: &mut Handle, offset: u32) {
        handle.position = offset;
    }

    /// Read from the cursor into `buf`, never past the recorded size
    ///
    /// Returns the number of bytes copied; 0 at or past end of file.
    pub fn read(&mut self, handle: &mut Handle, buf: &mut [u8]) -> FsResult<usize> {
        let entry = self.stat(handle)?;
        let size = entry.file_size as u64;
        let pos = handle.position as u64;
        if buf.is_empty() || pos >= size {
            return Ok(0);
        }

        let end = size.min(pos + buf.len() as u64);
        let start_idx = pos / CLUSTER_BYTES;
        let last_idx = (end - 1) / CLUSTER_BYTES;

        let mut cluster = entry.first_cluster();
        let mut copied = 0usize;
        let mut index = 0u64;
        while cluster_values::is_valid(cluster) {
            if index >= start_idx {
                let cluster_start = index * CLUSTER_BYTES;
                let from = (pos.max(cluster_start) - cluster_start) as usize;
                let to = (end.min(cluster_start + CLUSTER_BYTES) - cluster_start) as usize;
                let page = self.cache.page(cluster)?;
                buf[copied..copied + (to - from)].copy_from_slice(&page.data[from..to]);
                copied += to - from;
            }
            if index == last_idx {
                break;
            }
            cluster = self.get_next_cluster(cluster)?;
            index += 1;
        }

        if copied < (end - pos) as usize {
            log::warn!("[FS] {}: chain ended after {} of {} bytes", handle.path, copied, end - pos);
        }
        handle.position += copied as u32;
        Ok(copied)
    }

    /// Write `buf` at the cursor, growing the file and its chain as needed
    ///
    /// Returns the number of bytes written. If a cluster allocation fails
    /// part way, the bytes already written are kept, the size and cursor
    /// are advanced past them, and `OutOfSpace` is returned.
    pub fn write(&mut self, handle: &mut Handle, buf: &[u8]) -> FsResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let location = handle.location.ok_or(FsError::Unresolved)?;
        let DentryLocation::Slot { sector, offset } = location else {
            return Err(FsError::IsADirectory);
        };
        let entry = self.cache.dentry(sector, offset)?.entry;
        if entry.is_directory() {
            return Err(FsError::IsADirectory);
        }
        let pos = handle.position;
        if pos as u64 + buf.len() as u64 > u32::MAX as u64 {
            return Err(FsError::OutOfSpace);
        }

        let mut first = entry.first_cluster();
        if first == 0 {
            first = self.alloc_cluster()?;
            self.cache.update_dentry(sector, offset, |e| e.set_first_cluster(first))?;
        }

        let mut written = 0usize;
        let outcome = self.write_chain(first, pos, entry.file_size, buf, &mut written);

        let new_end = pos + written as u32;
        if written > 0 && new_end > entry.file_size {
            self.cache.update_dentry(sector, offset, |e| e.file_size = new_end)?;
        }
        handle.position = new_end;

        if let Err(e) = outcome {
            log::warn!("[FS] {}: write stopped after {} of {} bytes: {}",
                handle.path, written, buf.len(), e);
            return Err(e);
        }
        Ok(written)
    }

    /// Copy `data` into the chain starting at `cluster`, `pos` bytes in.
    /// `written` counts the bytes copied so far.
    fn write_chain(
        &mut self,
        mut cluster: u32,
        pos: u32,
        size: u32,
        data: &[u8],
        written: &mut usize,
    ) -> FsResult<()> {
        let pos = pos as u64;
        let size = size as u64;
        let end = pos + data.len() as u64;
        let start_idx = pos / CLUSTER_BYTES;
        let last_idx = (end - 1) / CLUSTER_BYTES;

        let mut index = 0u64;
        loop {
            let cluster_start = index * CLUSTER_BYTES;
            let page = self.cache.page(cluster)?;

            // Nothing of the file lives past the old size: clear stale bytes
            // before any of them become part of it.
            if cluster_start >= size {
                page.data.fill(0);
                page.mark_dirty();
            } else if end > size && size < cluster_start + CLUSTER_BYTES {
                page.data[(size - cluster_start) as usize..].fill(0);
                page.mark_dirty();
            }

            if index >= start_idx {
                let from = (pos.max(cluster_start) - cluster_start) as usize;
                let to = (end.min(cluster_start + CLUSTER_BYTES) - cluster_start) as usize;
                let len = to - from;
                page.data[from..to].copy_from_slice(&data[*written..*written + len]);
                page.mark_dirty();
                *written += len;
            }

            if index == last_idx {
                return Ok(());
            }

            let mut next = self.get_next_cluster(cluster)?;
            if cluster_values::ends_chain(next) {
                next = self.alloc_cluster()?;
                self.update_fat(cluster, next)?;
            }
            cluster = next;
            index += 1;
        }
    }

    /// Flush everything; the handle stays usable
    pub fn close(&mut self, _handle: &Handle) -> FsResult<()> {
        self.flush()
    }

    /// Write all dirty cached state, and the moved free-cluster hint, to disk
    pub fn flush(&mut self) -> FsResult<()> {
        self.cache.flush()?;

        if self.next_free_dirty && self.info.fs_info.is_valid() {
            let at = self.info.fs_info_device_sector();
            let mut sector = [0u8; SECTOR_SIZE];
            let device = self.cache.device_mut();
            device.read_sector(&mut sector, at, 1)?;

            let mut fs_info = FsInfo::parse(&sector);
            fs_info.next_free = self.next_free;
            // Not tracked, so no longer trustworthy once clusters moved.
            fs_info.free_count = FsInfo::UNKNOWN;
            fs_info.encode(&mut sector);
            device.write_sector(&sector, at, 1)?;

            self.info.fs_info = fs_info;
            log::debug!("[FS] FSInfo next free hint -> {:#x}", self.next_free);
        }
        self.next_free_dirty = false;
        Ok(())
    }

    // ========================================================================
    // Working directory
    // ========================================================================

    /// Make `path` the working directory
    pub fn change_dir(&mut self, path: &str) -> FsResult<()> {
        let location = self.find(path)?;
        let dentry = self.dentry_at(location)?;
        if !dentry.entry.is_directory() {
            return Err(FsError::NotADirectory);
        }

        let full = if path::is_absolute(path) {
            String::from(path)
        } else {
            path::join(&self.cwd_path, path)
        };
        self.cwd = dentry;
        self.cwd_path = path::normalize(&full);
        log::debug!("[FS] cwd -> {}", self.cwd_path);
        Ok(())
    }
}
