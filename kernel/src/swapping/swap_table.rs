use super::SwapSlots;
use crate::sync::Mutex;
use alloc::{boxed::Box, vec};
use kmem_shared::{
    bit_array::BitArray,
    mem::PAGE_FRAME_SIZE,
    paging::SwapSlot,
    sizes::SWAP_SIZE,
};
use log::debug;

type Word = BitArray<u32>;

const DEFAULT_SLOTS: usize = SWAP_SIZE as usize / PAGE_FRAME_SIZE;

struct Bitmap {
    words: Box<[Word]>,
    slots: usize,
    free: usize,
}

impl Bitmap {
    fn new(slots: usize) -> Self {
        let mut bitmap = Self {
            words: vec![Word::default(); slots.div_ceil(Word::BITS)].into_boxed_slice(),
            slots,
            free: 0,
        };
        bitmap.reset();
        bitmap
    }

    fn reset(&mut self) {
        self.words.fill(Word::default());
        // Bits past the last slot stay set so they are never handed out.
        for index in self.slots..self.words.len() * Word::BITS {
            self.set(index, true);
        }
        self.free = self.slots;
    }

    fn get(&self, index: usize) -> bool {
        self.words[index / Word::BITS].get(index % Word::BITS)
    }

    fn set(&mut self, index: usize, used: bool) {
        let word = &mut self.words[index / Word::BITS];
        *word = word.with(used, index % Word::BITS);
    }

    fn first_free(&self) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .find_map(|(i, word)| word.first_zero().map(|bit| i * Word::BITS + bit))
    }
}

/// Bitmap of the page-sized slots on the swap device, behind its own lock.
pub struct SwapTable {
    bitmap: Mutex<Bitmap>,
}

impl SwapTable {
    pub fn new(slots: usize) -> Self {
        assert!(
            slots <= SwapSlot::MAX_SLOTS,
            "swap table of {slots} slots cannot be encoded in a page table entry"
        );
        Self {
            bitmap: Mutex::new("swap", Bitmap::new(slots)),
        }
    }

    pub fn slots(&self) -> usize {
        self.bitmap.lock().slots
    }

    pub fn free_slots(&self) -> usize {
        self.bitmap.lock().free
    }

    pub fn is_used(&self, slot: SwapSlot) -> bool {
        let bitmap = self.bitmap.lock();
        slot.index() < bitmap.slots && bitmap.get(slot.index())
    }

    /// Marks a specific slot as used. Fails if it is out of range or taken.
    pub fn claim(&self, slot: SwapSlot) -> bool {
        let mut bitmap = self.bitmap.lock();
        if slot.index() >= bitmap.slots || bitmap.get(slot.index()) {
            return false;
        }
        bitmap.set(slot.index(), true);
        bitmap.free -= 1;
        true
    }
}

impl Default for SwapTable {
    fn default() -> Self {
        Self::new(DEFAULT_SLOTS)
    }
}

impl SwapSlots for SwapTable {
    fn init(&mut self) {
        let bitmap = self.bitmap.get_mut();
        bitmap.reset();
        debug!("swap: {} slots", bitmap.slots);
    }

    fn request_slot(&self) -> Option<SwapSlot> {
        let mut bitmap = self.bitmap.lock();
        if bitmap.free == 0 {
            return None;
        }
        let index = bitmap.first_free()?;
        bitmap.set(index, true);
        bitmap.free -= 1;
        SwapSlot::new(index)
    }

    fn release_slot(&self, slot: SwapSlot) {
        let mut bitmap = self.bitmap.lock();
        let index = slot.index();
        if index >= bitmap.slots || !bitmap.get(index) {
            panic!("release_slot: {slot:?} is not in use");
        }
        bitmap.set(index, false);
        bitmap.free += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(index: usize) -> SwapSlot {
        SwapSlot::new(index).expect("slot in range")
    }

    #[test]
    fn test_default_size() {
        let table = SwapTable::default();
        assert_eq!(table.slots(), 1024);
        assert_eq!(table.free_slots(), 1024);
    }

    #[test]
    fn test_request_lowest_free() {
        let table = SwapTable::new(40);
        assert_eq!(table.request_slot(), Some(slot(0)));
        assert_eq!(table.request_slot(), Some(slot(1)));
        assert_eq!(table.request_slot(), Some(slot(2)));
        table.release_slot(slot(1));
        assert_eq!(table.request_slot(), Some(slot(1)));
        assert_eq!(table.free_slots(), 37);
    }

    #[test]
    fn test_exhaustion_ignores_padding_bits() {
        let table = SwapTable::new(33);
        for i in 0..33 {
            assert_eq!(table.request_slot(), Some(slot(i)));
        }
        assert_eq!(table.request_slot(), None);
        assert_eq!(table.free_slots(), 0);
    }

    #[test]
    fn test_empty_table() {
        let table = SwapTable::new(0);
        assert_eq!(table.request_slot(), None);
    }

    #[test]
    fn test_claim() {
        let table = SwapTable::new(8);
        assert!(table.claim(slot(0)));
        assert!(!table.claim(slot(0)));
        assert!(!table.claim(slot(8)));
        assert!(table.is_used(slot(0)));
        assert_eq!(table.request_slot(), Some(slot(1)));
        assert_eq!(table.free_slots(), 6);
    }

    #[test]
    fn test_init_clears_everything() {
        let mut table = SwapTable::new(8);
        table.request_slot();
        table.claim(slot(5));
        table.init();
        assert_eq!(table.free_slots(), 8);
        assert!(!table.is_used(slot(5)));
        assert_eq!(table.request_slot(), Some(slot(0)));
    }

    #[test]
    #[should_panic(expected = "is not in use")]
    fn test_double_release_is_fatal() {
        let table = SwapTable::new(8);
        let granted = table.request_slot().expect("slot available");
        table.release_slot(granted);
        table.release_slot(granted);
    }
}
