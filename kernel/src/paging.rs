//! What the allocator needs from the virtual memory code.

use core::fmt;
use kmem_shared::{
    mem::PAGE_FRAME_SIZE,
    paging::{AtomicPageTableEntry, SwapSlot},
};

/// Identifies an address space by the physical address of its page
/// directory.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageTableRoot(usize);

impl PageTableRoot {
    pub const fn new(page_directory: usize) -> Self {
        Self(page_directory)
    }

    pub const fn page_directory(self) -> usize {
        self.0
    }
}

impl fmt::Debug for PageTableRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageTableRoot({:#x})", self.page_directory())
    }
}

/// Page table walking and page-out I/O, provided by the virtual memory code.
///
/// `resolve_entry` runs while the allocator holds its LRU ring lock, so it
/// must not take any lock that is held around [`Kmem::track`] or
/// [`Kmem::untrack`]. `write_slot` is called with no allocator lock held.
///
/// [`Kmem::track`]: crate::Kmem::track
/// [`Kmem::untrack`]: crate::Kmem::untrack
pub trait VirtualMemory {
    /// The entry mapping `vaddr` in the address space rooted at `root`, or
    /// `None` if no page table covers it. Never allocates page tables.
    fn resolve_entry(&self, root: PageTableRoot, vaddr: usize) -> Option<&AtomicPageTableEntry>;

    /// Writes the page mapped at `vaddr`, whose contents are `page`, to
    /// `slot` on the swap device.
    fn write_slot(&self, vaddr: usize, slot: SwapSlot, page: &[u8; PAGE_FRAME_SIZE]);
}
