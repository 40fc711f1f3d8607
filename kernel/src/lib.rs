//! Physical page frame allocation and clock page replacement.
//!
//! [`Kmem`] owns the free list, the frame table with its LRU ring, and the
//! swap-slot allocator. It is built once during boot, seeded in two phases
//! ([`Kmem::init_phase1`], [`Kmem::init_phase2`]) and then shared between
//! cores. When the free list runs dry, [`Kmem::acquire_frame`] evicts one
//! resident user page to swap with the second-chance algorithm.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod mem;
pub mod paging;
pub mod swapping;
pub mod sync;

pub use mem::{AllocError, Eviction, Kmem, KmemStats, MemoryLayout, NoProgress, TrackError};
pub use paging::{PageTableRoot, VirtualMemory};
pub use swapping::{SwapSlots, SwapTable};
