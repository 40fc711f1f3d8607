//! Swap-slot allocation.
//!
//! The allocator only needs to reserve and give back slots; [`SwapTable`] is
//! the bitmap implementation the kernel uses.

mod swap_table;

pub use self::swap_table::SwapTable;
use kmem_shared::paging::SwapSlot;

pub trait SwapSlots {
    /// Marks every slot free. Called once, during the second boot phase.
    fn init(&mut self);

    /// Reserves a free slot, or returns `None` if the device is full.
    fn request_slot(&self) -> Option<SwapSlot>;

    /// Returns a slot obtained from [`SwapSlots::request_slot`].
    fn release_slot(&self, slot: SwapSlot);
}
