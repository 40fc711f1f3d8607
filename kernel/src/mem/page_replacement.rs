//! Second-chance (clock) eviction of user pages.
//!
//! The clock hand is the head of the LRU ring. Each step looks at the page
//! under the hand: a recently accessed page has its accessed bit cleared and
//! is passed over, the first page found without it is written to swap and
//! its frame is freed.

use super::{frame_table::FrameTable, free_list::FreeList, Kmem, MemoryLayout, Owner, Phase};
use crate::{paging::VirtualMemory, swapping::SwapSlots, sync::MutexGuard};
use core::{ptr::NonNull, sync::atomic::Ordering};
use kmem_shared::{
    mem::{Frame, PAGE_FRAME_SIZE},
    paging::AtomicPageTableEntry,
};
use log::{debug, trace};

/// Outcome of one eviction attempt.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eviction {
    /// One frame went back to the free list.
    Progress,
    /// Nothing changed, apart from accessed bits cleared by the scan.
    NoProgress(NoProgress),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoProgress {
    /// The second boot phase has not run yet.
    NotReady,
    /// No frame is tracked.
    EmptyRing,
    /// Two full turns of the clock found no evictable page.
    NoVictim,
    /// The swap device has no free slot.
    SwapFull,
    /// The victim was untracked while it was being written out.
    Raced,
}

struct Victim<'v> {
    frame: Frame,
    owner: Owner,
    entry: &'v AtomicPageTableEntry,
}

/// What the clock makes of the page under its hand.
enum Verdict<'v> {
    Pinned,
    Unmapped,
    KernelFrame,
    Stale,
    Supervisor,
    Referenced,
    Evict(&'v AtomicPageTableEntry),
}

impl Verdict<'_> {
    fn reason(&self) -> &'static str {
        match self {
            Verdict::Pinned => "pinned",
            Verdict::Unmapped => "not mapped",
            Verdict::KernelFrame => "maps a kernel frame",
            Verdict::Stale => "maps another frame",
            Verdict::Supervisor => "supervisor page",
            Verdict::Referenced => "referenced",
            Verdict::Evict(_) => "victim",
        }
    }
}

fn inspect<'v, V: VirtualMemory>(
    frame: Frame,
    owner: Owner,
    layout: &MemoryLayout,
    vm: &'v V,
) -> Verdict<'v> {
    if layout.is_pinned(owner.vaddr) {
        return Verdict::Pinned;
    }
    let Some(entry) = vm.resolve_entry(owner.root, owner.vaddr) else {
        return Verdict::Unmapped;
    };
    let pte = entry.load();
    let Some(mapped) = pte.frame() else {
        return Verdict::Unmapped;
    };
    if layout.is_kernel_frame(mapped) {
        return Verdict::KernelFrame;
    }
    if mapped != frame {
        return Verdict::Stale;
    }
    if !pte.user_supervisor() {
        return Verdict::Supervisor;
    }
    if entry.clear_accessed() {
        return Verdict::Referenced;
    }
    Verdict::Evict(entry)
}

/// Runs the clock over `frames`. Every page passed over becomes the new head,
/// so the scan resumes from the last page it skipped.
fn select_victim<'v, V: VirtualMemory>(
    frames: &mut FrameTable,
    layout: &MemoryLayout,
    vm: &'v V,
) -> Option<Victim<'v>> {
    let mut candidate = frames.head()?;
    // The first turn clears every accessed bit, so the second reaches any
    // page that can be evicted at all.
    for _ in 0..2 * frames.len() {
        let owner = frames.owner(candidate)?;
        let next = frames.next(candidate)?;
        match inspect(candidate, owner, layout, vm) {
            Verdict::Evict(entry) => {
                return Some(Victim {
                    frame: candidate,
                    owner,
                    entry,
                })
            }
            skipped => {
                trace!(
                    "evict: passing over {candidate:?} at {:#x}: {}",
                    owner.vaddr,
                    skipped.reason()
                );
                frames.set_head(candidate);
            }
        }
        candidate = next;
    }
    None
}

impl<S: SwapSlots, V: VirtualMemory> Kmem<S, V> {
    /// Tries to free one frame by paging a user page out to swap.
    ///
    /// Takes the free list guard so that the caller gives up the free list
    /// lock before the ring lock is taken. The ring lock in turn is dropped
    /// before any swap I/O or page table update.
    pub(super) fn evict_one(&self, free: MutexGuard<'_, FreeList>) -> Eviction {
        drop(free);

        if self.phase != Phase::Ready {
            return Eviction::NoProgress(NoProgress::NotReady);
        }

        let victim = {
            let mut frames = self.frames.lock();
            if frames.is_empty() {
                return Eviction::NoProgress(NoProgress::EmptyRing);
            }
            match select_victim(&mut frames, &self.layout, &self.vm) {
                Some(victim) => victim,
                None => return Eviction::NoProgress(NoProgress::NoVictim),
            }
        };

        let Some(page) = NonNull::new(self.layout.frame_to_virt(victim.frame) as *mut u8) else {
            return Eviction::NoProgress(NoProgress::NoVictim);
        };
        let Some(slot) = self.swap.request_slot() else {
            return Eviction::NoProgress(NoProgress::SwapFull);
        };

        debug!(
            "evict: {:?} at {:#x} in {:?} to {slot:?}",
            victim.frame, victim.owner.vaddr, victim.owner.root
        );
        // SAFETY: The victim is a tracked user frame past the kernel image,
        // mapped at its kernel virtual address.
        let contents = unsafe { &*page.as_ptr().cast::<[u8; PAGE_FRAME_SIZE]>() };
        self.vm.write_slot(victim.owner.vaddr, slot, contents);
        self.counters.swap_writes.fetch_add(1, Ordering::Relaxed);

        if self.untrack(victim.frame).is_err() {
            // The page was unmapped while it was being written out.
            self.swap.release_slot(slot);
            return Eviction::NoProgress(NoProgress::Raced);
        }

        // SAFETY: The frame just left the ring and its mapping is about to be
        // replaced by the swap slot.
        unsafe { self.release_frame(page) };
        victim.entry.store(victim.entry.load().into_swapped(slot));

        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        Eviction::Progress
    }
}
