use core::ops::{Range, RangeInclusive};
use kmem_shared::mem::{is_page_aligned, Frame, OFFSET, PAGE_FRAME_SIZE, PHYS_TOP, PINNED_USER_TOP};

/// Where physical memory, the kernel image and the pinned boot processes sit.
///
/// Physical memory is mapped linearly: physical address `p` is visible to the
/// kernel at virtual address `p + offset`.
#[derive(Clone, Debug)]
pub struct MemoryLayout {
    offset: usize,
    kernel_end: usize,
    phys_top: usize,
    pinned: RangeInclusive<usize>,
}

impl MemoryLayout {
    /// The standard layout, given the first virtual address past the kernel
    /// image (the `end` symbol of the linker script).
    pub fn new(kernel_end: usize) -> Self {
        Self {
            offset: OFFSET,
            kernel_end,
            phys_top: PHYS_TOP,
            pinned: 0..=PINNED_USER_TOP,
        }
    }

    pub fn with_offset(self, offset: usize) -> Self {
        Self { offset, ..self }
    }

    pub fn with_phys_top(self, phys_top: usize) -> Self {
        Self { phys_top, ..self }
    }

    /// User virtual addresses in `pinned` are never chosen for eviction.
    pub fn with_pinned(self, pinned: RangeInclusive<usize>) -> Self {
        Self { pinned, ..self }
    }

    pub fn kernel_end(&self) -> usize {
        self.kernel_end
    }

    pub fn phys_top(&self) -> usize {
        self.phys_top
    }

    /// Number of frame table entries: every frame below the physical ceiling,
    /// installed or not.
    pub fn frame_count(&self) -> usize {
        self.phys_top / PAGE_FRAME_SIZE
    }

    pub fn virt_to_phys(&self, virt: usize) -> Option<usize> {
        virt.checked_sub(self.offset)
    }

    pub fn phys_to_virt(&self, phys: usize) -> usize {
        phys + self.offset
    }

    pub fn frame_to_virt(&self, frame: Frame) -> usize {
        self.phys_to_virt(frame.start_address())
    }

    /// The frame behind kernel virtual address `virt`, if `virt` is a page the
    /// allocator may manage: page aligned, past the kernel image and below the
    /// physical ceiling.
    pub fn managed_frame(&self, virt: usize) -> Option<Frame> {
        if !is_page_aligned(virt) || virt < self.kernel_end {
            return None;
        }
        let phys = self.virt_to_phys(virt)?;
        (phys < self.phys_top).then(|| Frame::containing(phys))
    }

    /// Whether the user page at `vaddr` belongs to a pinned boot process.
    pub fn is_pinned(&self, vaddr: usize) -> bool {
        self.pinned.contains(&vaddr)
    }

    /// Whether `frame` lies below the end of the kernel image, where the
    /// allocator refuses to free it.
    pub fn is_kernel_frame(&self, frame: Frame) -> bool {
        self.virt_to_phys(self.kernel_end)
            .is_some_and(|end| frame.start_address() < end)
    }

    /// Pages of `range` that the boot phases hand to the free list: from the
    /// first page boundary at or after the start, every page that fits
    /// entirely before the end.
    pub fn pages_in(range: Range<usize>) -> impl Iterator<Item = usize> {
        let start = kmem_shared::mem::page_round_up(range.start);
        let end = range.end;
        (start..)
            .step_by(PAGE_FRAME_SIZE)
            .take_while(move |page| page.checked_add(PAGE_FRAME_SIZE).is_some_and(|e| e <= end))
    }
}
