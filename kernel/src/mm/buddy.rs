//! Buddy Page Allocator
//!
//! Physical page frames are handed out as power-of-two blocks of
//! `1 << order` frames, `order` in `0..=MAX_BUDDY_ORDER`. Each order keeps
//! an intrusive free list of block heads in the PFN database.
//!
//! # Frame States
//! - Reserved: below the aligned start or otherwise never pooled
//! - Allocated: head of a handed-out block, `bplevel` = requested order
//! - Free: head of a free block (`bplevel` = its order) or a frame inside one
//!
//! # Buddies
//! The buddy of the order-`k` block at frame `i` is the block at
//! `i ^ (1 << k)`. A block freed next to a free buddy of the same order
//! merges with it; the merged block starts at `i & buddy`.

use spin::Mutex;

use super::pfn::{FreeArea, PageFlags, PfnDatabase, PAGE_SHIFT, PAGE_SIZE};

/// Largest block order (1024 frames, 4MB)
pub const MAX_BUDDY_ORDER: usize = 10;

/// Reasons a block cannot be returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuddyError {
    /// Order above `MAX_BUDDY_ORDER`
    InvalidOrder,
    /// Frame or address outside the managed range
    OutOfRange,
    /// Frame is not the head of an allocated block
    NotAllocated,
    /// Block was allocated at a different order
    OrderMismatch,
    /// No allocator has been set up yet
    NotInitialized,
}

/// Snapshot of the allocator's free lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuddyInfo {
    /// First managed frame
    pub start_pfn: u32,
    /// One past the last managed frame
    pub end_pfn: u32,
    /// Free blocks per order
    pub free: [usize; MAX_BUDDY_ORDER + 1],
}

impl BuddyInfo {
    /// Free frames across all orders
    pub fn free_pages(&self) -> usize {
        self.free.iter().enumerate().map(|(order, &count)| count << order).sum()
    }

    /// Frames in the managed range
    pub fn total_pages(&self) -> usize {
        (self.end_pfn - self.start_pfn) as usize
    }
}

struct BuddyInner {
    pages: PfnDatabase,
    areas: [FreeArea; MAX_BUDDY_ORDER + 1],
    start_pfn: u32,
    end_pfn: u32,
}

impl BuddyInner {
    fn alloc(&mut self, order: usize) -> Option<u32> {
        let found = (order..=MAX_BUDDY_ORDER).find(|&o| self.areas[o].nr_free > 0)?;
        let pfn = self.pages.pop_free_page(&mut self.areas[found])?;

        let head = self.pages.get_mut(pfn)?;
        head.flags = PageFlags::ALLOCATED;
        head.reference = 1;
        head.bplevel = Some(order as u8);

        // Hand the upper halves back, largest first.
        let mut current = found;
        while current > order {
            current -= 1;
            let buddy = pfn + (1 << current);
            if let Some(page) = self.pages.get_mut(buddy) {
                page.flags = PageFlags::empty();
                page.reference = 0;
                page.bplevel = Some(current as u8);
            }
            self.pages.insert_free_page(&mut self.areas[current], buddy);
        }
        Some(pfn)
    }

    fn free(&mut self, pfn: u32, order: usize) -> Result<(), BuddyError> {
        if order > MAX_BUDDY_ORDER {
            return Err(BuddyError::InvalidOrder);
        }
        if pfn < self.start_pfn || pfn as u64 + (1u64 << order) > self.end_pfn as u64 {
            return Err(BuddyError::OutOfRange);
        }

        let page = self.pages.get(pfn).ok_or(BuddyError::OutOfRange)?;
        if !page.flags.contains(PageFlags::ALLOCATED) {
            return Err(BuddyError::NotAllocated);
        }
        if page.bplevel != Some(order as u8) {
            return Err(BuddyError::OrderMismatch);
        }

        self.release(pfn, order);
        Ok(())
    }

    /// Put a block back on the free lists, merging with free buddies
    fn release(&mut self, pfn: u32, order: usize) {
        if let Some(page) = self.pages.get_mut(pfn) {
            page.flags = PageFlags::empty();
            page.reference = 0;
            page.bplevel = None;
        }

        let mut head = pfn;
        let mut order = order;
        while order < MAX_BUDDY_ORDER {
            let buddy = head ^ (1 << order);
            if buddy < self.start_pfn || buddy as u64 + (1u64 << order) > self.end_pfn as u64 {
                break;
            }
            match self.pages.get(buddy) {
                Some(page) if page.is_free_block(order as u8) => {}
                _ => break,
            }

            self.pages.remove_free_page(&mut self.areas[order], buddy);
            if let Some(page) = self.pages.get_mut(buddy) {
                page.bplevel = None;
            }
            head &= buddy;
            order += 1;
        }

        if let Some(page) = self.pages.get_mut(head) {
            page.bplevel = Some(order as u8);
        }
        self.pages.insert_free_page(&mut self.areas[order], head);
    }

    fn info(&self) -> BuddyInfo {
        let mut free = [0; MAX_BUDDY_ORDER + 1];
        for (count, area) in free.iter_mut().zip(self.areas.iter()) {
            *count = area.nr_free;
        }
        BuddyInfo {
            start_pfn: self.start_pfn,
            end_pfn: self.end_pfn,
            free,
        }
    }
}

/// Buddy allocator over one contiguous frame range
///
/// All free-list changes happen under one lock; nothing blocks while it
/// is held.
pub struct BuddyAllocator {
    inner: Mutex<BuddyInner>,
}

impl BuddyAllocator {
    /// Manage frames from `kernel_end_pfn` up to `max_pfn`
    ///
    /// The start is rounded up and the end down to a maximal-block
    /// boundary. Frames outside that range stay reserved. Every managed frame
    /// is freed one by one at order 0, and merging builds the large blocks.
    pub fn init(kernel_end_pfn: u32, max_pfn: u32) -> Self {
        let align = 1u32 << MAX_BUDDY_ORDER;
        let start = kernel_end_pfn.saturating_add(align - 1) & !(align - 1);
        let end = (max_pfn & !(align - 1)).max(start);

        let mut inner = BuddyInner {
            pages: PfnDatabase::new(max_pfn.max(end) as usize),
            areas: [FreeArea::new(); MAX_BUDDY_ORDER + 1],
            start_pfn: start,
            end_pfn: end,
        };
        for pfn in start..end {
            inner.release(pfn, 0);
        }

        if start == end {
            log::warn!("[MM] Buddy allocator: no usable frames below {:#x}", max_pfn);
        }
        log::info!("[MM] Buddy allocator initialized: frames {:#x}..{:#x} ({} KB)",
            start, end, (end - start) as usize * PAGE_SIZE / 1024);

        Self { inner: Mutex::new(inner) }
    }

    /// Allocate a block of `1 << order` frames, returning its first frame
    pub fn alloc(&self, order: usize) -> Option<u32> {
        if order > MAX_BUDDY_ORDER {
            return None;
        }
        let pfn = self.inner.lock().alloc(order);
        if pfn.is_none() {
            log::warn!("[MM] Buddy allocator: no block of order {}", order);
        }
        pfn
    }

    /// Return a block allocated at `order`
    pub fn free(&self, pfn: u32, order: usize) -> Result<(), BuddyError> {
        self.inner.lock().free(pfn, order)
    }

    /// Allocate at least `count` contiguous pages
    ///
    /// The count is rounded up to a power of two. Returns the physical
    /// address of the block, or `None` for 0 pages or on exhaustion.
    pub fn alloc_pages(&self, count: usize) -> Option<u64> {
        if count == 0 {
            return None;
        }
        let order = count.checked_next_power_of_two()?.trailing_zeros() as usize;
        let pfn = self.alloc(order)?;
        Some((pfn as u64) << PAGE_SHIFT)
    }

    /// Free a block by physical address
    pub fn free_pages(&self, address: u64, order: usize) -> Result<(), BuddyError> {
        if address % PAGE_SIZE as u64 != 0 {
            return Err(BuddyError::OutOfRange);
        }
        let pfn = u32::try_from(address >> PAGE_SHIFT).map_err(|_| BuddyError::OutOfRange)?;
        self.free(pfn, order)
    }

    /// Copy of a frame's descriptor
    pub fn page(&self, pfn: u32) -> Option<super::pfn::Page> {
        self.inner.lock().pages.get(pfn).copied()
    }

    /// Free counts per order; also logged
    pub fn info(&self) -> BuddyInfo {
        let info = self.inner.lock().info();
        log::info!("[MM] Buddy: {} of {} pages free", info.free_pages(), info.total_pages());
        for (order, count) in info.free.iter().enumerate() {
            log::debug!("[MM]   order {:2}: {} free", order, count);
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn single_block(info: &BuddyInfo) -> bool {
        info.free[MAX_BUDDY_ORDER] == 1 && info.free[..MAX_BUDDY_ORDER].iter().all(|&c| c == 0)
    }

    #[test]
    fn test_init_aligns_range() {
        let buddy = BuddyAllocator::init(100, 5000);
        let info = buddy.info();
        assert_eq!((info.start_pfn, info.end_pfn), (1024, 4096));
        assert_eq!(info.free[MAX_BUDDY_ORDER], 3);
        assert_eq!(info.free_pages(), 3072);

        let below = buddy.page(5).unwrap();
        assert!(below.flags.contains(PageFlags::RESERVED));
        for pfn in [4096, 4500, 4999] {
            let tail = buddy.page(pfn).unwrap();
            assert!(tail.flags.contains(PageFlags::RESERVED));
            assert_eq!(tail.bplevel, None);
        }
        assert!(buddy.page(5000).is_none());
    }

    #[test]
    fn test_init_empty_range() {
        let buddy = BuddyAllocator::init(1000, 1500);
        let info = buddy.info();
        assert_eq!(info.start_pfn, info.end_pfn);
        assert_eq!(info.free_pages(), 0);
        assert_eq!(buddy.alloc(0), None);
    }

    #[test]
    fn test_alloc_splits_down() {
        let buddy = BuddyAllocator::init(0, 1024);
        assert_eq!(buddy.alloc(0), Some(0));

        let info = buddy.info();
        assert_eq!(info.free[MAX_BUDDY_ORDER], 0);
        assert!(info.free[..MAX_BUDDY_ORDER].iter().all(|&c| c == 1));

        let head = buddy.page(0).unwrap();
        assert_eq!(head.flags, PageFlags::ALLOCATED);
        assert_eq!(head.bplevel, Some(0));
        assert_eq!(head.reference, 1);

        // Split halves are free blocks, not allocated ones.
        for order in 0..MAX_BUDDY_ORDER {
            let page = buddy.page(1 << order).unwrap();
            assert!(page.is_free_block(order as u8), "order {}", order);
        }
    }

    #[test]
    fn test_alloc_free_restores_counts() {
        let buddy = BuddyAllocator::init(0, 4096);
        buddy.alloc(3).unwrap();
        for order in 0..=MAX_BUDDY_ORDER {
            let before = buddy.info();
            let pfn = buddy.alloc(order).unwrap();
            assert_eq!(pfn % (1 << order), 0);
            buddy.free(pfn, order).unwrap();
            assert_eq!(buddy.info(), before, "order {}", order);
        }
    }

    #[test]
    fn test_exhaust_then_free_all() {
        let buddy = BuddyAllocator::init(0, 1024);
        let mut blocks = Vec::new();
        while let Some(pfn) = buddy.alloc(0) {
            blocks.push(pfn);
        }
        assert_eq!(blocks.len(), 1024);
        assert_eq!(buddy.info().free_pages(), 0);

        // 389 is odd, so this visits every block once.
        for i in 0..blocks.len() {
            buddy.free(blocks[i * 389 % blocks.len()], 0).unwrap();
        }
        assert!(single_block(&buddy.info()));
    }

    #[test]
    fn test_mixed_orders_coalesce() {
        let buddy = BuddyAllocator::init(0, 2048);
        let mut blocks = Vec::new();
        for &order in [0, 3, 1, 5, 2].iter().cycle() {
            // Fall back to single frames once larger blocks run out.
            let block = buddy.alloc(order).map(|pfn| (pfn, order))
                .or_else(|| buddy.alloc(0).map(|pfn| (pfn, 0)));
            match block {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        assert_eq!(buddy.info().free_pages(), 0);

        let evens = blocks.iter().step_by(2);
        let odds = blocks.iter().skip(1).step_by(2).rev();
        for &(pfn, order) in evens.chain(odds) {
            buddy.free(pfn, order).unwrap();
        }
        let info = buddy.info();
        assert_eq!(info.free[MAX_BUDDY_ORDER], 2);
        assert_eq!(info.free_pages(), 2048);
    }

    #[test]
    fn test_split_buddy_is_not_merged() {
        let buddy = BuddyAllocator::init(0, 1024);
        let a = buddy.alloc(2).unwrap();
        let b = buddy.alloc(0).unwrap();
        let c = buddy.alloc(0).unwrap();
        assert_eq!((a, b, c), (0, 4, 5));

        buddy.free(b, 0).unwrap();
        // Frame 4 is free but heads an order-0 block, so block 0 stays put.
        buddy.free(a, 2).unwrap();
        let info = buddy.info();
        assert_eq!(info.free[0], 1);
        assert_eq!(info.free[1], 1);
        assert_eq!(info.free[2], 1);
        assert_eq!(buddy.page(0).unwrap().bplevel, Some(2));

        buddy.free(c, 0).unwrap();
        assert!(single_block(&buddy.info()));
    }

    #[test]
    fn test_free_validation() {
        let buddy = BuddyAllocator::init(1024, 2048);
        assert_eq!(buddy.free(1024, MAX_BUDDY_ORDER + 1), Err(BuddyError::InvalidOrder));
        assert_eq!(buddy.free(5, 0), Err(BuddyError::OutOfRange));
        assert_eq!(buddy.free(4000, 0), Err(BuddyError::OutOfRange));
        assert_eq!(buddy.free(1030, 0), Err(BuddyError::NotAllocated));

        let pfn = buddy.alloc(1).unwrap();
        assert_eq!(buddy.free(pfn, 0), Err(BuddyError::OrderMismatch));
        assert_eq!(buddy.free(pfn + 1, 0), Err(BuddyError::NotAllocated));
        assert_eq!(buddy.free(pfn, 1), Ok(()));
        assert_eq!(buddy.free(pfn, 1), Err(BuddyError::NotAllocated));
        assert!(single_block(&buddy.info()));
    }

    #[test]
    fn test_exhaustion() {
        let buddy = BuddyAllocator::init(0, 1024);
        assert_eq!(buddy.alloc(MAX_BUDDY_ORDER + 1), None);
        assert_eq!(buddy.alloc(MAX_BUDDY_ORDER), Some(0));
        assert_eq!(buddy.alloc(0), None);
        buddy.free(0, MAX_BUDDY_ORDER).unwrap();
        assert_eq!(buddy.alloc(0), Some(0));
    }

    #[test]
    fn test_alloc_pages_rounds_up() {
        let buddy = BuddyAllocator::init(0, 2048);
        assert_eq!(buddy.alloc_pages(0), None);
        assert_eq!(buddy.alloc_pages(1025), None);

        let before = buddy.info().free_pages();
        let addr = buddy.alloc_pages(3).unwrap();
        assert_eq!(addr % (4 * PAGE_SIZE as u64), 0);
        assert_eq!(buddy.info().free_pages(), before - 4);

        let addr5 = buddy.alloc_pages(5).unwrap();
        assert_eq!(buddy.info().free_pages(), before - 12);

        assert_eq!(buddy.free_pages(addr + 1, 2), Err(BuddyError::OutOfRange));
        buddy.free_pages(addr, 2).unwrap();
        buddy.free_pages(addr5, 3).unwrap();
        assert_eq!(buddy.info().free_pages(), before);
    }
}
