//! Sector I/O
//!
//! The filesystem talks to storage only through [`BlockDevice`]. Sector
//! numbers are absolute on the device and every transfer is a whole number
//! of `SECTOR_SIZE` sectors.

use alloc::vec;
use alloc::vec::Vec;

use super::error::FsError;

/// Fixed sector size in bytes
pub const SECTOR_SIZE: usize = 512;

/// Device-level failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// The device reported a transfer failure
    Io,
    /// Sector range runs past the end of the device
    OutOfRange,
}

impl From<BlockError> for FsError {
    fn from(_: BlockError) -> Self {
        FsError::Io
    }
}

/// Synchronous sector-addressed storage
pub trait BlockDevice {
    /// Read `count` sectors starting at `sector` into `buf`
    fn read_sector(&mut self, buf: &mut [u8], sector: u32, count: u32) -> Result<(), BlockError>;

    /// Write `count` sectors starting at `sector` from `buf`
    fn write_sector(&mut self, buf: &[u8], sector: u32, count: u32) -> Result<(), BlockError>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for &mut D {
    fn read_sector(&mut self, buf: &mut [u8], sector: u32, count: u32) -> Result<(), BlockError> {
        (**self).read_sector(buf, sector, count)
    }

    fn write_sector(&mut self, buf: &[u8], sector: u32, count: u32) -> Result<(), BlockError> {
        (**self).write_sector(buf, sector, count)
    }
}

/// Memory-backed disk
pub struct RamDisk {
    data: Vec<u8>,
}

impl RamDisk {
    /// Create a zero-filled disk of `sectors` sectors
    pub fn new(sectors: usize) -> Self {
        Self {
            data: vec![0; sectors * SECTOR_SIZE],
        }
    }

    /// Wrap an existing image; a trailing partial sector is dropped
    pub fn from_image(mut data: Vec<u8>) -> Self {
        let whole = data.len() - data.len() % SECTOR_SIZE;
        data.truncate(whole);
        Self { data }
    }

    /// Raw image bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Raw image bytes, mutable
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn span(&self, sector: u32, count: u32, buf_len: usize) -> Result<(usize, usize), BlockError> {
        let start = sector as usize * SECTOR_SIZE;
        let len = count as usize * SECTOR_SIZE;
        if buf_len < len || start + len > self.data.len() {
            return Err(BlockError::OutOfRange);
        }
        Ok((start, len))
    }
}

impl BlockDevice for RamDisk {
    fn read_sector(&mut self, buf: &mut [u8], sector: u32, count: u32) -> Result<(), BlockError> {
        let (start, len) = self.span(sector, count, buf.len())?;
        buf[..len].copy_from_slice(&self.data[start..start + len]);
        Ok(())
    }

    fn write_sector(&mut self, buf: &[u8], sector: u32, count: u32) -> Result<(), BlockError> {
        let (start, len) = self.span(sector, count, buf.len())?;
        self.data[start..start + len].copy_from_slice(&buf[..len]);
        Ok(())
    }
}
