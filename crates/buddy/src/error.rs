//! Diagnostic error type for zone construction.
//!
//! `Zone::create` itself still returns `Option<Zone>` per the allocator's
//! contract (a null/absent handle on failure, nothing more specific) but we
//! want a real reason in the log before that information is thrown away.

use core::fmt;

/// Why [`crate::zone::Zone::create`] could not build a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneCreateError {
    /// `max_size` rounded up to a page-aligned power of two overflows `usize`.
    SizeOverflow,
    /// The host allocator could not satisfy the aligned request.
    HostAllocFailed,
}

impl fmt::Display for ZoneCreateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ZoneCreateError::SizeOverflow => "requested zone size overflows usize",
            ZoneCreateError::HostAllocFailed => "host allocation failed",
        };
        write!(f, "{msg}")
    }
}
