use crate::sizes::{KB, MB};
use core::fmt;

// Page size is 4KB. This is a property of x86 processors.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;

// Any virtual address at or above OFFSET is a kernel address. Physical memory
// is mapped linearly starting at OFFSET.
pub const OFFSET: usize = 0x80000000;

// Top of usable physical memory. Frames at or above this address are never
// handed out.
pub const PHYS_TOP: usize = 224 * MB;

// User pages mapped at or below this virtual address belong to the first boot
// processes and are never evicted.
pub const PINNED_USER_TOP: usize = 0x2000;

// Released pages are filled with this byte so that dangling references read
// garbage instead of stale data.
pub const JUNK_BYTE: u8 = 1;

#[inline]
pub const fn page_round_up(addr: usize) -> usize {
    (addr + PAGE_FRAME_SIZE - 1) & !(PAGE_FRAME_SIZE - 1)
}

#[inline]
pub const fn is_page_aligned(addr: usize) -> bool {
    addr % PAGE_FRAME_SIZE == 0
}

/// Index of a physical page frame, i.e. its physical address divided by
/// [`PAGE_FRAME_SIZE`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Frame(usize);

impl Frame {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The frame containing the physical address `phys`.
    pub const fn containing(phys: usize) -> Self {
        Self(phys / PAGE_FRAME_SIZE)
    }

    pub const fn index(self) -> usize {
        self.0
    }

    pub const fn start_address(self) -> usize {
        self.0 * PAGE_FRAME_SIZE
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:#x})", self.start_address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_rounding() {
        assert_eq!(page_round_up(0), 0);
        assert_eq!(page_round_up(1), PAGE_FRAME_SIZE);
        assert_eq!(page_round_up(PAGE_FRAME_SIZE), PAGE_FRAME_SIZE);
        assert!(is_page_aligned(3 * PAGE_FRAME_SIZE));
        assert!(!is_page_aligned(3 * PAGE_FRAME_SIZE - 1));
    }

    #[test]
    fn test_frame_addresses() {
        let frame = Frame::containing(0x5123);
        assert_eq!(frame.index(), 5);
        assert_eq!(frame.start_address(), 0x5000);
        assert_eq!(Frame::new(5), frame);
    }
}
