#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

// Re-export spin's mutex as this workspace's lock API, so a caller depending
// on `los_utils` rather than `spin` directly can have the synchronization
// primitive swapped out in one place later.
pub use spin::{Mutex, MutexGuard};

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn mutex_round_trips_through_lock() {
        let lock = Mutex::new(42);
        {
            let mut guard = lock.lock();
            assert_eq!(*guard, 42);
            *guard = 43;
        }
        assert_eq!(*lock.lock(), 43);
    }
}
