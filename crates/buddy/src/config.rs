//! Compile-time tunables.
//!
//! `PAGE_SHIFT` and `MAX_ORDER` fix the page size and the largest block the
//! allocator will ever hand out. Both are compile-time because buddy
//! arithmetic (`idx ^ 2^order`) and the flag-byte encoding are derived from
//! them; changing either changes the page size and the top-block size but
//! never the algorithm.
//!
//! The defaults match a 64 KiB page with a 128 MiB top block. A consumer
//! that wants 4 KiB pages (the common case for a hosted virtual-memory
//! kernel) enables the `page-size-4k` feature instead of patching this file.

#[cfg(not(feature = "page-size-4k"))]
pub const PAGE_SHIFT: u32 = 16;

#[cfg(feature = "page-size-4k")]
pub const PAGE_SHIFT: u32 = 12;

/// `2^PAGE_SHIFT` bytes.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// One past the largest order a zone will ever use. A top block spans
/// `2^(MAX_ORDER - 1)` pages.
pub const MAX_ORDER: usize = 12;

static_assertions::const_assert!(MAX_ORDER >= 1);
static_assertions::const_assert!(PAGE_SHIFT < usize::BITS);
