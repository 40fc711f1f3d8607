// https://wiki.osdev.org/Paging

// Avoids lots of warnings about casting usize to u32 which cannot result in
// truncation on a 32-bit platform, which is all we support. It would be nice if
// you could tell clippy that you were only dealing with 32-bit usizes...
#![allow(clippy::cast_possible_truncation)]

use crate::mem::Frame;
use arbitrary_int::u20;
use bitbybit::bitfield;
use core::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};

#[bitfield(u32, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    pub present: bool,
    #[bit(1, rw)]
    pub read_write: bool,
    #[bit(2, rw)]
    pub user_supervisor: bool,
    #[bit(3, rw)]
    pub write_through: bool,
    #[bit(4, rw)]
    pub cache_disable: bool,
    #[bit(5, rw)]
    pub accessed: bool,
    #[bit(6, rw)]
    pub dirty: bool,
    #[bit(7, rw)]
    pub page_attribute_table: bool,
    #[bit(8, rw)]
    pub global: bool,
    // Bits 9..=11 are left to software by the hardware. Bit 9 marks an entry
    // whose page was written out to swap; the VM code must not use it for
    // anything else.
    #[bit(9, rw)]
    pub swapped: bool,
    // Holds the frame index while present, the swap slot index once swapped.
    #[bits(12..=31, rw)]
    pub page_frame_address: u20,
}

impl PageTableEntry {
    /// Flag and status bits, everything below the address field.
    pub const FLAGS_MASK: u32 = 0xFFF;
    pub const ACCESSED_MASK: u32 = 1 << 5;

    /// A present entry mapping `frame` with the given user/write permissions.
    pub fn mapping(frame: Frame, user: bool, writable: bool) -> Self {
        Self::DEFAULT
            .with_present(true)
            .with_user_supervisor(user)
            .with_read_write(writable)
            .with_page_frame_address(u20::new(frame.index() as u32))
    }

    pub fn flags(&self) -> u32 {
        self.raw_value() & Self::FLAGS_MASK
    }

    /// The frame this entry maps, if it is present. The address bits of a
    /// non-present entry never name a frame.
    pub fn frame(&self) -> Option<Frame> {
        self.present()
            .then(|| Frame::new(self.page_frame_address().value() as usize))
    }

    /// The swap slot holding this page, if it was evicted.
    pub fn swap_slot(&self) -> Option<SwapSlot> {
        (!self.present() && self.swapped()).then(|| SwapSlot(self.page_frame_address()))
    }

    /// The entry after evicting its page to `slot`: flag bits are kept, the
    /// present bit is cleared and the address bits hold the slot index.
    pub fn into_swapped(self, slot: SwapSlot) -> Self {
        Self::new_with_raw_value(self.flags())
            .with_present(false)
            .with_swapped(true)
            .with_page_frame_address(slot.0)
    }
}

impl fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageTableEntry({:#010x})", self.raw_value())
    }
}

impl PartialEq for PageTableEntry {
    fn eq(&self, other: &Self) -> bool {
        self.raw_value() == other.raw_value()
    }
}

impl Eq for PageTableEntry {}

/// A page table entry as it lives in a page table: the MMU sets the accessed
/// and dirty bits behind our back, so every access is atomic.
#[repr(transparent)]
pub struct AtomicPageTableEntry(AtomicU32);

impl AtomicPageTableEntry {
    pub fn new(entry: PageTableEntry) -> Self {
        Self(AtomicU32::new(entry.raw_value()))
    }

    pub fn load(&self) -> PageTableEntry {
        PageTableEntry::new_with_raw_value(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, entry: PageTableEntry) {
        self.0.store(entry.raw_value(), Ordering::Release);
    }

    /// Clears the accessed bit, returning whether it was set.
    pub fn clear_accessed(&self) -> bool {
        let previous = self
            .0
            .fetch_and(!PageTableEntry::ACCESSED_MASK, Ordering::AcqRel);
        previous & PageTableEntry::ACCESSED_MASK != 0
    }
}

impl Default for AtomicPageTableEntry {
    fn default() -> Self {
        Self::new(PageTableEntry::DEFAULT)
    }
}

impl fmt::Debug for AtomicPageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.load(), f)
    }
}

/// Index of a page-sized slot on the swap device. Limited to the width of
/// the address field of a [`PageTableEntry`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapSlot(u20);

impl SwapSlot {
    pub const MAX_SLOTS: usize = 1 << 20;

    pub fn new(index: usize) -> Option<Self> {
        (index < Self::MAX_SLOTS).then(|| Self(u20::new(index as u32)))
    }

    pub fn index(self) -> usize {
        self.0.value() as usize
    }
}

impl fmt::Debug for SwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SwapSlot({})", self.index())
    }
}
