//! Page Frame Number (PFN) Database
//!
//! One descriptor per physical page frame, indexed by frame number.
//! Each entry contains:
//! - Page state flags (reserved, allocated, or neither when free)
//! - Reference count
//! - Links for the free list the frame heads, if any
//! - The order of the free block the frame heads, if any
//!
//! Free lists are intrusive and doubly linked through `flink`/`blink`,
//! using frame indices so no descriptor ever holds a pointer.

use alloc::vec::Vec;

/// Page size (4KB)
pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: usize = 12;

/// End-of-list marker for `flink`/`blink`
pub const PFN_NIL: u32 = u32::MAX;

bitflags::bitflags! {
    /// Page state; a free frame has no flags set
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PageFlags: u8 {
        /// Never enters the free pool
        const RESERVED = 0x01;
        /// Head of an allocated block
        const ALLOCATED = 0x02;
    }
}

/// Page frame descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// State flags
    pub flags: PageFlags,
    /// Reference count
    pub reference: u32,
    /// Forward link
    pub flink: u32,
    /// Back link
    pub blink: u32,
    /// Order of the block this frame heads; `None` inside a block
    pub bplevel: Option<u8>,
}

impl Page {
    /// A reserved frame outside every list
    pub const fn reserved() -> Self {
        Self {
            flags: PageFlags::RESERVED,
            reference: 1,
            flink: PFN_NIL,
            blink: PFN_NIL,
            bplevel: None,
        }
    }

    /// Check if page is free
    pub fn is_free(&self) -> bool {
        self.flags.is_empty()
    }

    /// Is this the head of a free block of `order`
    pub fn is_free_block(&self, order: u8) -> bool {
        self.is_free() && self.bplevel == Some(order)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::reserved()
    }
}

/// Head and length of one free list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeArea {
    /// First frame on the list
    pub head: u32,
    /// Blocks on the list
    pub nr_free: usize,
}

impl FreeArea {
    pub const fn new() -> Self {
        Self { head: PFN_NIL, nr_free: 0 }
    }
}

impl Default for FreeArea {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptors for frames `0..len`
pub struct PfnDatabase {
    pages: Vec<Page>,
}

impl PfnDatabase {
    /// Database of `frames` reserved frames
    pub fn new(frames: usize) -> Self {
        Self {
            pages: alloc::vec![Page::reserved(); frames],
        }
    }

    /// Number of frames described
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Get a descriptor by frame number
    pub fn get(&self, pfn: u32) -> Option<&Page> {
        self.pages.get(pfn as usize)
    }

    /// Get a mutable descriptor by frame number
    pub fn get_mut(&mut self, pfn: u32) -> Option<&mut Page> {
        self.pages.get_mut(pfn as usize)
    }

    // ========================================================================
    // Page List Operations
    // ========================================================================

    /// Insert a frame at the head of a free list
    pub fn insert_free_page(&mut self, area: &mut FreeArea, pfn: u32) {
        let head = area.head;
        let Some(page) = self.get_mut(pfn) else {
            return;
        };
        page.flink = head;
        page.blink = PFN_NIL;

        if let Some(old) = self.get_mut(head) {
            old.blink = pfn;
        }
        area.head = pfn;
        area.nr_free += 1;
    }

    /// Unlink a frame from the free list it is on
    pub fn remove_free_page(&mut self, area: &mut FreeArea, pfn: u32) {
        let Some(&Page { flink, blink, .. }) = self.get(pfn) else {
            return;
        };

        match self.get_mut(blink) {
            Some(prev) => prev.flink = flink,
            None => area.head = flink,
        }
        if let Some(next) = self.get_mut(flink) {
            next.blink = blink;
        }

        if let Some(page) = self.get_mut(pfn) {
            page.flink = PFN_NIL;
            page.blink = PFN_NIL;
        }
        area.nr_free = area.nr_free.saturating_sub(1);
    }

    /// Pop the first frame of a free list
    pub fn pop_free_page(&mut self, area: &mut FreeArea) -> Option<u32> {
        let head = area.head;
        self.get(head)?;
        self.remove_free_page(area, head);
        Some(head)
    }

    /// Frames linked on a list, head first
    pub fn list(&self, area: &FreeArea) -> Vec<u32> {
        let mut frames = Vec::with_capacity(area.nr_free);
        let mut cursor = area.head;
        while let Some(page) = self.get(cursor) {
            frames.push(cursor);
            if frames.len() > self.pages.len() {
                break;
            }
            cursor = page.flink;
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_frames_are_reserved() {
        let db = PfnDatabase::new(4);
        assert_eq!(db.len(), 4);
        let page = db.get(3).unwrap();
        assert!(page.flags.contains(PageFlags::RESERVED));
        assert_eq!(page.reference, 1);
        assert!(!page.is_free());
        assert!(db.get(4).is_none());
    }

    #[test]
    fn test_free_list_links() {
        let mut db = PfnDatabase::new(8);
        let mut area = FreeArea::new();
        for pfn in [1, 4, 6] {
            db.insert_free_page(&mut area, pfn);
        }
        assert_eq!(area.nr_free, 3);
        assert_eq!(db.list(&area), [6, 4, 1]);

        db.remove_free_page(&mut area, 4);
        assert_eq!(db.list(&area), [6, 1]);
        assert_eq!(db.get(1).unwrap().blink, 6);
        assert_eq!(db.get(4).unwrap().flink, PFN_NIL);

        assert_eq!(db.pop_free_page(&mut area), Some(6));
        assert_eq!(db.pop_free_page(&mut area), Some(1));
        assert_eq!(db.pop_free_page(&mut area), None);
        assert_eq!(area, FreeArea::new());
    }

    #[test]
    fn test_free_block_head() {
        let mut page = Page::reserved();
        assert!(!page.is_free_block(0));
        page.flags = PageFlags::empty();
        page.bplevel = Some(3);
        assert!(page.is_free_block(3));
        assert!(!page.is_free_block(2));
        page.flags = PageFlags::ALLOCATED;
        assert!(!page.is_free_block(3));
    }
}
