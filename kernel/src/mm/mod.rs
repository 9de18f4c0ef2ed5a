//! Memory Manager (mm)
//!
//! Physical page frame allocation:
//!
//! - **PFN Database**: Tracks state of every physical page
//! - **Buddy Allocator**: Power-of-two blocks with split/merge
//!
//! The system allocator is set up once by [`init`] with the frame range
//! left over after the kernel image; [`alloc_pages`] and [`free_pages`]
//! are the entry points for the rest of the kernel.

pub mod buddy;
pub mod pfn;

pub use buddy::{BuddyAllocator, BuddyError, BuddyInfo, MAX_BUDDY_ORDER};
pub use pfn::{Page, PageFlags, PAGE_SHIFT, PAGE_SIZE};

use spin::Once;

/// System page allocator
static PAGE_ALLOCATOR: Once<BuddyAllocator> = Once::new();

/// Initialize the Memory Manager
///
/// Frames below `kernel_end_pfn` are never handed out. Calling this again
/// returns the allocator from the first call.
pub fn init(kernel_end_pfn: u32, max_pfn: u32) -> &'static BuddyAllocator {
    PAGE_ALLOCATOR.call_once(|| {
        log::info!("[MM] Initializing Memory Manager...");
        BuddyAllocator::init(kernel_end_pfn, max_pfn)
    })
}

/// The system allocator, if [`init`] has run
pub fn page_allocator() -> Option<&'static BuddyAllocator> {
    PAGE_ALLOCATOR.get()
}

/// Allocate at least `count` contiguous pages from the system allocator
pub fn alloc_pages(count: usize) -> Option<u64> {
    page_allocator()?.alloc_pages(count)
}

/// Free pages obtained from [`alloc_pages`]
pub fn free_pages(address: u64, order: usize) -> Result<(), BuddyError> {
    page_allocator()
        .ok_or(BuddyError::NotInitialized)?
        .free_pages(address, order)
}
