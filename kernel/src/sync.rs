//! Busy-waiting locks. Nothing in this crate sleeps, so every lock spins.

pub mod mutex;

pub use self::mutex::{Mutex, MutexGuard};
