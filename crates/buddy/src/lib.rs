#![cfg_attr(not(feature = "std"), no_std)]

//! A power-of-two page-run allocator: per-order free lists, splitting on
//! allocation, iterative buddy coalescing on release, and a zone that grows
//! its committed range lazily instead of reserving it all up front.
//!
//! [`Zone`] is the whole public surface for the algorithm itself;
//! [`memory::LockedZone`] wraps it for callers that need to share one zone
//! across threads.

pub mod area;
pub mod arena;
pub mod config;
pub mod error;
pub mod list;
pub mod memory;
pub mod page;
pub mod zone;

pub use error::ZoneCreateError;
pub use page::PageFrame;
pub use zone::Zone;
