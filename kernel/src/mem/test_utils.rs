//! Host-side stand-ins for physical memory and the virtual memory code.

use super::{Kmem, MemoryLayout};
use crate::{
    paging::{PageTableRoot, VirtualMemory},
    swapping::SwapTable,
    sync::Mutex,
};
use alloc::{boxed::Box, vec::Vec};
use core::{
    hint,
    ptr::{self, NonNull},
    sync::atomic::{AtomicBool, Ordering},
};
use kmem_shared::{
    mem::{PAGE_FRAME_SIZE, PINNED_USER_TOP},
    paging::{AtomicPageTableEntry, PageTableEntry, SwapSlot},
};

pub(crate) const ROOT: PageTableRoot = PageTableRoot::new(0x3000);

/// Where the arena starts in the fake physical address space. Everything
/// below it counts as the kernel image.
const PHYS_BASE: usize = 16 * PAGE_FRAME_SIZE;

#[repr(C, align(4096))]
struct Page([u8; PAGE_FRAME_SIZE]);

/// Page-aligned heap memory posing as the physical pages past the kernel
/// image.
pub(crate) struct Arena {
    pages: *mut Page,
    len: usize,
}

impl Arena {
    pub(crate) fn new(len: usize) -> Self {
        let pages: Box<[Page]> = (0..len).map(|_| Page([0; PAGE_FRAME_SIZE])).collect();
        Self {
            len,
            pages: Box::into_raw(pages).cast::<Page>(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn base(&self) -> usize {
        self.pages as usize
    }

    pub(crate) fn page(&self, index: usize) -> usize {
        self.base() + index * PAGE_FRAME_SIZE
    }

    pub(crate) fn end(&self) -> usize {
        self.page(self.len)
    }

    pub(crate) fn index_of(&self, page: NonNull<u8>) -> usize {
        (page.as_ptr() as usize - self.base()) / PAGE_FRAME_SIZE
    }

    pub(crate) fn bytes(&self, index: usize) -> &[u8] {
        assert!(index < self.len);
        unsafe { &(*self.pages.add(index)).0 }
    }

    /// The kernel image ends at the arena's first page and physical memory
    /// ends at its last.
    pub(crate) fn layout(&self) -> MemoryLayout {
        MemoryLayout::new(self.base())
            .with_offset(self.base() - PHYS_BASE)
            .with_phys_top(PHYS_BASE + self.len * PAGE_FRAME_SIZE)
            .with_pinned(0..=PINNED_USER_TOP)
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(self.pages, self.len)) });
    }
}

/// A page written out by the allocator.
#[derive(Debug)]
pub(crate) struct SwapWrite {
    pub vaddr: usize,
    pub slot: SwapSlot,
    pub contents: Vec<u8>,
}

/// A single flat address space, [`ROOT`], with one entry per page of the
/// first few megabytes of user memory.
pub(crate) struct TestVm {
    entries: Box<[AtomicPageTableEntry]>,
    writes: Mutex<Vec<SwapWrite>>,
    // While set, `write_slot` parks until it is cleared.
    gate_closed: AtomicBool,
    parked: AtomicBool,
}

impl TestVm {
    const PAGES: usize = 2048;

    pub(crate) fn new() -> Self {
        Self {
            entries: (0..Self::PAGES)
                .map(|_| AtomicPageTableEntry::default())
                .collect(),
            writes: Mutex::new("swap device", Vec::new()),
            gate_closed: AtomicBool::new(false),
            parked: AtomicBool::new(false),
        }
    }

    /// Makes the next page-out wait in `write_slot` until [`TestVm::open_gate`].
    pub(crate) fn close_gate(&self) {
        self.gate_closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn open_gate(&self) {
        self.gate_closed.store(false, Ordering::SeqCst);
    }

    /// Spins until a page-out is parked at the closed gate.
    pub(crate) fn wait_for_parked_write(&self) {
        while !self.parked.load(Ordering::SeqCst) {
            hint::spin_loop();
        }
    }

    fn slot(&self, vaddr: usize) -> &AtomicPageTableEntry {
        &self.entries[vaddr / PAGE_FRAME_SIZE]
    }

    pub(crate) fn map(&self, vaddr: usize, entry: PageTableEntry) {
        self.slot(vaddr).store(entry);
    }

    pub(crate) fn unmap(&self, vaddr: usize) {
        self.slot(vaddr).store(PageTableEntry::DEFAULT);
    }

    /// Sets the accessed bit the way the MMU does on a memory access.
    pub(crate) fn touch(&self, vaddr: usize) {
        let entry = self.slot(vaddr);
        let pte = entry.load();
        if pte.present() {
            entry.store(pte.with_accessed(true));
        }
    }

    pub(crate) fn entry(&self, vaddr: usize) -> PageTableEntry {
        self.slot(vaddr).load()
    }

    /// Drains the record of page-outs.
    pub(crate) fn writes(&self) -> Vec<SwapWrite> {
        core::mem::take(&mut *self.writes.lock())
    }
}

impl VirtualMemory for TestVm {
    fn resolve_entry(&self, root: PageTableRoot, vaddr: usize) -> Option<&AtomicPageTableEntry> {
        if root != ROOT {
            return None;
        }
        self.entries.get(vaddr / PAGE_FRAME_SIZE)
    }

    fn write_slot(&self, vaddr: usize, slot: SwapSlot, page: &[u8; PAGE_FRAME_SIZE]) {
        if self.gate_closed.load(Ordering::SeqCst) {
            self.parked.store(true, Ordering::SeqCst);
            while self.gate_closed.load(Ordering::SeqCst) {
                hint::spin_loop();
            }
            self.parked.store(false, Ordering::SeqCst);
        }
        self.writes.lock().push(SwapWrite {
            vaddr,
            slot,
            contents: page.to_vec(),
        });
    }
}

/// An allocator past both boot phases, owning every page of `arena`.
pub(crate) fn booted(arena: &Arena, swap_slots: usize) -> Kmem<SwapTable, TestVm> {
    let mut kmem = Kmem::new(arena.layout(), SwapTable::new(swap_slots), TestVm::new());
    let split = arena.page(arena.len() / 2);
    unsafe {
        kmem.init_phase1(arena.base()..split);
        kmem.init_phase2(split..arena.end());
    }
    kmem
}

pub(crate) fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Trace)
        .try_init();
}
