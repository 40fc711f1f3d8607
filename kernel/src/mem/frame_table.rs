//! Per-frame metadata and the LRU ring of evictable user pages.
//!
//! The ring is a circular doubly-linked list threaded through the frame table
//! by frame index. A frame is a member exactly when both of its links are set.
//! New members go in at the tail, right behind the head; the clock hand of
//! the page replacement scan is the head itself.

use super::TrackError;
use crate::paging::PageTableRoot;
use alloc::{boxed::Box, vec};
use kmem_shared::mem::Frame;

/// The address space and virtual address a tracked frame is mapped at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Owner {
    pub root: PageTableRoot,
    pub vaddr: usize,
}

#[derive(Clone, Copy, Default)]
struct FrameEntry {
    next: Option<Frame>,
    prev: Option<Frame>,
    owner: Option<Owner>,
}

impl FrameEntry {
    fn is_linked(&self) -> bool {
        self.next.is_some() && self.prev.is_some()
    }
}

pub struct FrameTable {
    entries: Box<[FrameEntry]>,
    head: Option<Frame>,
    len: usize,
    // Remaining trackable slots. Starts at the size of the whole table, so it
    // can only run out if every possible frame is tracked at once.
    capacity: usize,
}

impl FrameTable {
    /// A table with one entry per frame. Nothing can be tracked until
    /// [`FrameTable::init`] runs.
    pub fn new(frame_count: usize) -> Self {
        Self {
            entries: vec![FrameEntry::default(); frame_count].into_boxed_slice(),
            head: None,
            len: 0,
            capacity: 0,
        }
    }

    pub fn init(&mut self) {
        self.entries.fill(FrameEntry::default());
        self.head = None;
        self.len = 0;
        self.capacity = self.entries.len();
    }

    fn entry(&self, frame: Frame) -> Result<&FrameEntry, TrackError> {
        self.entries.get(frame.index()).ok_or(TrackError::OutOfRange)
    }

    /// Links `frame` in at the tail of the ring.
    pub fn insert(&mut self, frame: Frame, owner: Owner) -> Result<(), TrackError> {
        if self.entry(frame)?.is_linked() {
            return Err(TrackError::AlreadyTracked);
        }
        if self.capacity == 0 {
            return Err(TrackError::Exhausted);
        }

        let (next, prev) = match self.head {
            Some(head) => {
                let tail = self.entries[head.index()].prev.unwrap_or(head);
                self.entries[tail.index()].next = Some(frame);
                self.entries[head.index()].prev = Some(frame);
                (head, tail)
            }
            None => {
                self.head = Some(frame);
                (frame, frame)
            }
        };

        self.entries[frame.index()] = FrameEntry {
            next: Some(next),
            prev: Some(prev),
            owner: Some(owner),
        };
        self.len += 1;
        self.capacity -= 1;
        Ok(())
    }

    /// Unlinks `frame`, returning who it was tracked for.
    pub fn remove(&mut self, frame: Frame) -> Result<Owner, TrackError> {
        let FrameEntry {
            next: Some(next),
            prev: Some(prev),
            owner,
        } = *self.entry(frame)?
        else {
            return Err(TrackError::NotTracked);
        };

        if next == frame {
            self.head = None;
        } else {
            self.entries[prev.index()].next = Some(next);
            self.entries[next.index()].prev = Some(prev);
            if self.head == Some(frame) {
                self.head = Some(next);
            }
        }

        self.entries[frame.index()] = FrameEntry::default();
        self.len -= 1;
        self.capacity += 1;
        owner.ok_or(TrackError::NotTracked)
    }

    pub fn head(&self) -> Option<Frame> {
        self.head
    }

    /// Moves the clock hand to `frame`, which must be a member.
    pub fn set_head(&mut self, frame: Frame) {
        debug_assert!(self.contains(frame));
        self.head = Some(frame);
    }

    pub fn next(&self, frame: Frame) -> Option<Frame> {
        self.entries.get(frame.index())?.next
    }

    pub fn owner(&self, frame: Frame) -> Option<Owner> {
        self.entries.get(frame.index())?.owner
    }

    pub fn contains(&self, frame: Frame) -> bool {
        self.entries
            .get(frame.index())
            .is_some_and(FrameEntry::is_linked)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Members in ring order, starting at the head.
    pub fn iter(&self) -> impl Iterator<Item = Frame> + '_ {
        let mut cursor = self.head;
        let mut remaining = self.len;
        core::iter::from_fn(move || {
            if remaining == 0 {
                return None;
            }
            let frame = cursor?;
            cursor = self.next(frame);
            remaining -= 1;
            Some(frame)
        })
    }
}
