use alloc::{boxed::Box, vec};
use kmem_shared::mem::Frame;

#[derive(Clone, Copy, Default)]
struct Link {
    next: Option<Frame>,
    free: bool,
}

/// LIFO stack of free frames. Links live in a side table indexed by frame
/// number rather than inside the free pages themselves, next to a per-frame
/// membership bit.
pub struct FreeList {
    head: Option<Frame>,
    links: Box<[Link]>,
    len: usize,
}

impl FreeList {
    pub fn new(frame_count: usize) -> Self {
        Self {
            head: None,
            links: vec![Link::default(); frame_count].into_boxed_slice(),
            len: 0,
        }
    }

    /// Pushes `frame`, or returns `false` if it is already on the list.
    #[must_use]
    pub fn push(&mut self, frame: Frame) -> bool {
        let link = &mut self.links[frame.index()];
        if link.free {
            return false;
        }
        *link = Link {
            next: self.head,
            free: true,
        };
        self.head = Some(frame);
        self.len += 1;
        true
    }

    pub fn pop(&mut self) -> Option<Frame> {
        let frame = self.head?;
        self.head = core::mem::take(&mut self.links[frame.index()]).next;
        self.len -= 1;
        Some(frame)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = Frame> + '_ {
        core::iter::successors(self.head, |frame| self.links[frame.index()].next)
    }

    pub fn contains(&self, frame: Frame) -> bool {
        self.links.get(frame.index()).is_some_and(|link| link.free)
    }
}
