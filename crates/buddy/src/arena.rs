//! Aligned host memory acquisition.
//!
//! The only thing the allocator asks of its environment: a block of bytes,
//! aligned the way the caller requests, that it owns exclusively until it
//! gives the block back. Equivalent to the `memalign(PAGE_SIZE, n)`
//! contract described for the allocator this crate is modeled on; backed
//! here by whatever `#[global_allocator]` the final binary registers.

extern crate alloc;

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use core::ptr::NonNull;

/// An exclusively-owned, aligned block of host memory.
///
/// Dropping an `Arena` returns the block to the host exactly once; there is
/// no way to observe it after that because the value is gone.
pub(crate) struct Arena {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Arena {
    /// Acquire `size` bytes aligned to `align`.
    ///
    /// Returns `None` on layout overflow or host allocation failure,
    /// mirroring `memalign`'s null return.
    pub(crate) fn acquire(align: usize, size: usize) -> Option<Self> {
        let layout = Layout::from_size_align(size, align).ok()?;
        // SAFETY: layout has non-zero size whenever `size > 0`; callers
        // never request a zero-sized arena.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)?;
        Some(Self { ptr, layout })
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: ptr/layout are exactly what `alloc_zeroed` returned for
        // this layout, and this is the only place that frees them.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// SAFETY: Arena is a unique owner of a plain memory block; there is nothing
// thread-specific about it. Sharing across threads still requires external
// synchronization, per the zone's own contract.
unsafe impl Send for Arena {}
