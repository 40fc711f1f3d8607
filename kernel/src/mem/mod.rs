mod frame_table;
mod free_list;
mod layout;
mod page_replacement;
#[cfg(test)]
pub(crate) mod test_utils;

pub use self::frame_table::Owner;
pub use self::layout::MemoryLayout;
pub use self::page_replacement::{Eviction, NoProgress};

use self::{frame_table::FrameTable, free_list::FreeList};
use crate::{
    paging::{PageTableRoot, VirtualMemory},
    swapping::SwapSlots,
    sync::Mutex,
};
use core::{
    error::Error,
    fmt::{self, Display, Formatter},
    ops::Range,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};
use kmem_shared::mem::{Frame, JUNK_BYTE, PAGE_FRAME_SIZE};
use log::{debug, warn};

/// No frame could be handed out, even after trying to evict one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocError;

impl Display for AllocError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("out of physical memory")
    }
}

impl Error for AllocError {}

/// Why a frame could not be linked into or unlinked from the LRU ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackError {
    /// The ring is set up in the second boot phase.
    Uninitialized,
    /// The frame lies past the end of the frame table.
    OutOfRange,
    /// Every trackable slot is in use.
    Exhausted,
    /// The frame is already in the ring.
    AlreadyTracked,
    /// The frame is not in the ring.
    NotTracked,
    /// The frame is on the free list.
    Free,
}

impl Display for TrackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrackError::Uninitialized => "LRU ring is not initialized yet",
            TrackError::OutOfRange => "frame is outside the frame table",
            TrackError::Exhausted => "no trackable slots left",
            TrackError::AlreadyTracked => "frame is already tracked",
            TrackError::NotTracked => "frame is not tracked",
            TrackError::Free => "frame is free",
        })
    }
}

impl Error for TrackError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Created,
    Booting,
    Ready,
}

/// Point-in-time view of the allocator's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KmemStats {
    pub free_pages: usize,
    pub tracked_pages: usize,
    pub ring_capacity: usize,
    pub evictions: usize,
    pub swap_writes: usize,
    pub failed_allocations: usize,
}

#[derive(Default)]
struct Counters {
    evictions: AtomicUsize,
    swap_writes: AtomicUsize,
    failed_allocations: AtomicUsize,
}

/// The physical page allocator.
///
/// Owns the free list and the frame table, each behind its own lock, plus the
/// swap-slot allocator `S` and a handle `V` on the virtual memory code. No
/// method ever holds both of its locks at once.
pub struct Kmem<S, V> {
    layout: MemoryLayout,
    phase: Phase,
    free: Mutex<FreeList>,
    frames: Mutex<FrameTable>,
    swap: S,
    vm: V,
    counters: Counters,
}

impl<S, V> fmt::Debug for Kmem<S, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kmem")
            .field("layout", &self.layout)
            .field("phase", &self.phase)
            .field("free", &self.free)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

impl<S: SwapSlots, V: VirtualMemory> Kmem<S, V> {
    /// Sets up empty bookkeeping for every frame below the layout's physical
    /// ceiling. No frame is free until [`Kmem::init_phase1`] runs.
    pub fn new(layout: MemoryLayout, swap: S, vm: V) -> Self {
        let frame_count = layout.frame_count();
        Self {
            layout,
            phase: Phase::Created,
            free: Mutex::new("kmem", FreeList::new(frame_count)),
            frames: Mutex::new("lru", FrameTable::new(frame_count)),
            swap,
            vm,
            counters: Counters::default(),
        }
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    pub fn swap(&self) -> &S {
        &self.swap
    }

    pub fn vm(&self) -> &V {
        &self.vm
    }

    /// First boot phase: frees the pages of `range` (kernel virtual
    /// addresses) while only the boot page table maps them. Runs on one core;
    /// the free list lock is not touched.
    ///
    /// # Safety
    ///
    /// Every page in `range` must be unused memory mapped at its kernel
    /// virtual address.
    pub unsafe fn init_phase1(&mut self, range: Range<usize>) {
        assert_eq!(self.phase, Phase::Created, "init_phase1 called twice");
        let seeded = self.seed(range.clone());
        debug!("kmem: phase 1 freed {seeded} pages in {range:#x?}");
        self.phase = Phase::Booting;
    }

    /// Second boot phase, once the full kernel page table is installed on
    /// every core: frees the pages of `range`, then sets up the LRU ring and
    /// the swap-slot allocator. Every later operation goes through the locks.
    ///
    /// # Safety
    ///
    /// Same as [`Kmem::init_phase1`].
    pub unsafe fn init_phase2(&mut self, range: Range<usize>) {
        assert_eq!(
            self.phase,
            Phase::Booting,
            "init_phase2 must follow init_phase1"
        );
        let seeded = self.seed(range.clone());
        self.frames.get_mut().init();
        self.swap.init();
        self.phase = Phase::Ready;
        debug!(
            "kmem: phase 2 freed {seeded} pages in {range:#x?}, {} free",
            self.free.get_mut().len()
        );
    }

    unsafe fn seed(&mut self, range: Range<usize>) -> usize {
        let mut seeded = 0;
        for page in MemoryLayout::pages_in(range) {
            let frame = self.managed(page);
            fill_junk(page);
            assert!(
                self.free.get_mut().push(frame),
                "release_frame: {frame:?} is already free"
            );
            seeded += 1;
        }
        seeded
    }

    /// The frame behind `page`. Halts on a page the allocator does not
    /// manage.
    fn managed(&self, page: usize) -> Frame {
        let Some(frame) = self.layout.managed_frame(page) else {
            panic!(
                "release_frame: bad page {page:#x} (kernel end {:#x}, physical top {:#x})",
                self.layout.kernel_end(),
                self.layout.phys_top()
            );
        };
        frame
    }

    /// Allocates one page, returning its kernel virtual address. When memory
    /// is exhausted, evicts at most one user page to make room.
    pub fn acquire_frame(&self) -> Result<NonNull<u8>, AllocError> {
        let mut evicted = false;
        loop {
            let mut free = self.free.lock();
            if let Some(frame) = free.pop() {
                drop(free);
                let page = self.layout.frame_to_virt(frame) as *mut u8;
                return NonNull::new(page).ok_or(AllocError);
            }
            if evicted {
                // Another core took the frame we just evicted.
                break;
            }
            match self.evict_one(free) {
                Eviction::Progress => evicted = true,
                Eviction::NoProgress(reason) => {
                    debug!("kmem: eviction made no progress: {reason:?}");
                    break;
                }
            }
        }

        self.counters
            .failed_allocations
            .fetch_add(1, Ordering::Relaxed);
        warn!("acquire_frame: out of memory");
        Err(AllocError)
    }

    /// Returns a page to the free list.
    ///
    /// Halts the kernel if `page` is misaligned, lies inside the kernel image
    /// or maps a frame at or above the physical ceiling. Releasing a frame
    /// that is still tracked, or already free, halts as well.
    ///
    /// # Safety
    ///
    /// `page` must have come from [`Kmem::acquire_frame`] (or be unused
    /// memory past the kernel image) and nothing may use it afterwards.
    pub unsafe fn release_frame(&self, page: NonNull<u8>) {
        let frame = self.managed(page.as_ptr() as usize);
        if self.frames.lock().contains(frame) {
            panic!("release_frame: {frame:?} is still tracked");
        }
        fill_junk(page.as_ptr() as usize);
        let pushed = self.free.lock().push(frame);
        assert!(pushed, "release_frame: {frame:?} is already free");
    }

    /// The frame behind a page handed out by [`Kmem::acquire_frame`].
    pub fn frame_of(&self, page: NonNull<u8>) -> Option<Frame> {
        self.layout.managed_frame(page.as_ptr() as usize)
    }

    /// Makes `frame`, mapped at `vaddr` in the address space `root`, a
    /// candidate for eviction. Called when a user page becomes resident, by
    /// the code that acquired the frame.
    pub fn track(&self, frame: Frame, root: PageTableRoot, vaddr: usize) -> Result<(), TrackError> {
        if self.phase != Phase::Ready {
            return Err(TrackError::Uninitialized);
        }
        if self.free.lock().contains(frame) {
            return Err(TrackError::Free);
        }
        self.frames.lock().insert(frame, Owner { root, vaddr })
    }

    /// Stops considering `frame` for eviction. Called when a user page is
    /// unmapped.
    pub fn untrack(&self, frame: Frame) -> Result<(), TrackError> {
        if self.phase != Phase::Ready {
            return Err(TrackError::Uninitialized);
        }
        self.frames.lock().remove(frame).map(|_| ())
    }

    pub fn is_tracked(&self, frame: Frame) -> bool {
        self.frames.lock().contains(frame)
    }

    pub fn stats(&self) -> KmemStats {
        let free_pages = self.free.lock().len();
        let (tracked_pages, ring_capacity) = {
            let frames = self.frames.lock();
            (frames.len(), frames.capacity())
        };
        KmemStats {
            free_pages,
            tracked_pages,
            ring_capacity,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            swap_writes: self.counters.swap_writes.load(Ordering::Relaxed),
            failed_allocations: self.counters.failed_allocations.load(Ordering::Relaxed),
        }
    }
}

/// Fills a page being freed with junk to catch dangling references.
///
/// # Safety
///
/// `page` must be a writable page that nothing else uses.
unsafe fn fill_junk(page: usize) {
    (page as *mut u8).write_bytes(JUNK_BYTE, PAGE_FRAME_SIZE);
}
