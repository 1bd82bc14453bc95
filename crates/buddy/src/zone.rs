//! The zone: owns the arena, the per-order free lists, and the high-water
//! mark for lazy growth. This is where allocation and release are wired
//! together; the arithmetic they lean on lives in [`crate::page`].

extern crate alloc;

use alloc::vec;
use core::ptr::NonNull;

use crate::area::Area;
use crate::arena::Arena;
use crate::config::{MAX_ORDER, PAGE_SHIFT, PAGE_SIZE};
use crate::error::ZoneCreateError;
use crate::page::{
    addr_to_index, buddy_index, combined_index, index_to_addr, page_ptr, FreePageNode, PageFrame,
};

/// A single arena of contiguous, page-granular memory serving power-of-two
/// page-run allocations via the buddy algorithm.
///
/// Every method here takes `&mut self`: the zone performs no internal
/// synchronization, by design (see [`crate::memory::LockedZone`] for a
/// synchronized wrapper). Callers must serialize their own access.
pub struct Zone {
    mem_start: usize,
    mem_last: usize,
    mem_end: usize,
    max_order: u32,
    area: [Area; MAX_ORDER],
    free_count: usize,
    page_flags: alloc::boxed::Box<[u8]>,
    // Keeps the backing allocation alive; never read directly after
    // `mem_start`/`mem_end` are derived from it at construction time.
    _arena: Arena,
}

const ALLOCATED_BIT: u8 = 0x80;
const ORDER_MASK: u8 = 0x0f;

impl Zone {
    /// Build a zone capable of serving at least `max_size` bytes.
    ///
    /// `max_size` is rounded up to the smallest power-of-two multiple of
    /// `PAGE_SIZE` that covers it; `max_order` is capped at `MAX_ORDER - 1`
    /// even if that rounded size would imply a larger one, so a very large
    /// `max_size` yields a zone whose top blocks are smaller than its total
    /// capacity and relies on lazy growth to introduce further top blocks
    /// (see module docs on lazy growth in [`Zone::alloc_pages`]).
    pub fn create(max_size: usize) -> Option<Zone> {
        match Self::try_create(max_size) {
            Ok(zone) => Some(zone),
            Err(e) => {
                log::warn!("zone_create({max_size}) failed: {e}");
                None
            }
        }
    }

    fn try_create(max_size: usize) -> Result<Zone, ZoneCreateError> {
        let mut order: u32 = 0;
        let mut size: usize = PAGE_SIZE;
        while size < max_size {
            size = size
                .checked_shl(1)
                .ok_or(ZoneCreateError::SizeOverflow)?;
            order += 1;
        }

        let max_order = order.min(MAX_ORDER as u32 - 1);
        let top_block_bytes = PAGE_SIZE << max_order;

        let arena = Arena::acquire(top_block_bytes, size).ok_or(ZoneCreateError::HostAllocFailed)?;
        let mem_start = arena.as_ptr().as_ptr() as usize;

        log::info!(
            "zone created: {size} bytes, max_order={max_order}, top_block={top_block_bytes}B, mem_start=0x{mem_start:x}"
        );

        Ok(Zone {
            mem_start,
            mem_last: mem_start,
            mem_end: mem_start + size,
            max_order,
            area: core::array::from_fn(|_| Area::new()),
            free_count: 0,
            page_flags: vec![0u8; size >> PAGE_SHIFT].into_boxed_slice(),
            _arena: arena,
        })
    }

    /// Return the backing memory to the host. Taking `self` by value means
    /// the compiler statically rules out use-after-destroy: there is no
    /// handle left to call anything on afterwards.
    pub fn destroy(self) {
        log::info!("zone destroyed: mem_start=0x{:x}", self.mem_start);
    }

    /// Largest order this zone will ever hand out.
    #[inline]
    pub fn max_order(&self) -> u32 {
        self.max_order
    }

    /// Pages currently sitting on a free list, summed across all orders.
    #[inline]
    pub fn free_page_count(&self) -> usize {
        self.free_count
    }

    /// Number of free blocks currently linked at `order`. Used by tests and
    /// callers that want area-level visibility; not part of the allocation
    /// fast path.
    pub fn area_free_count(&self, order: u32) -> usize {
        self.area[order as usize].nr_free
    }

    /// Allocate a contiguous run of `2^order` pages.
    ///
    /// Returns `None` if `order` exceeds [`Zone::max_order`] or the zone is
    /// out of memory (including after exhausting lazy growth).
    pub fn alloc_pages(&mut self, order: u32) -> Option<PageFrame> {
        if order > self.max_order {
            return None;
        }

        if self.free_count >= (1usize << order) {
            if let Some(page) = self.rmqueue(order) {
                return Some(page);
            }
        }

        // Lazy growth: introduce one more top block from the reserved tail
        // of the arena and retry. The new block's first-page flag is left
        // at its initial zero; that is safe because `rmqueue` immediately
        // overwrites it (via `expand` or the allocated-mark below) before
        // anything could read it as a stale order.
        if self.mem_last < self.mem_end {
            let top_block_pages = 1usize << self.max_order;
            let block_addr = self.mem_last;
            self.mem_last += top_block_pages * PAGE_SIZE;
            self.free_count += top_block_pages;

            // SAFETY: block_addr is freshly committed, page-aligned arena
            // memory not yet observed by anyone else.
            let node = unsafe {
                FreePageNode::write_at(NonNull::new_unchecked(block_addr as *mut u8))
            };
            unsafe { self.area[self.max_order as usize].free_list.push_front(node) };
            self.area[self.max_order as usize].nr_free += 1;
            let idx = addr_to_index(self.mem_start, block_addr);
            self.page_flags[idx] = self.max_order as u8;

            return self.rmqueue(order);
        }

        log::trace!("alloc_pages(order={order}) out of memory");
        None
    }

    /// Find the smallest non-empty free list at order `>= order`, unlink
    /// its first block, split off anything larger than requested, and mark
    /// the remainder allocated.
    fn rmqueue(&mut self, order: u32) -> Option<PageFrame> {
        for n in order..=self.max_order {
            if self.area[n as usize].free_list.is_empty() {
                continue;
            }

            let node = self.area[n as usize].free_list.pop_front()?;
            self.area[n as usize].nr_free -= 1;
            self.free_count -= 1usize << order;

            let page_addr = node.as_ptr() as usize;
            self.expand(page_addr, order, n);

            let idx = addr_to_index(self.mem_start, page_addr);
            self.page_flags[idx] = ALLOCATED_BIT | (order as u8);

            // SAFETY: page_addr is the address just unlinked from a free
            // list of this zone's arena.
            let page = unsafe { PageFrame::from_addr(NonNull::new_unchecked(page_addr as *mut u8)) };
            return Some(page);
        }
        None
    }

    /// Split the order-`high` block at `page_addr` down to order `low`,
    /// keeping the lower half at `page_addr` (which continues to be split)
    /// and re-inserting each upper half as free at its own, smaller order.
    fn expand(&mut self, page_addr: usize, low: u32, mut high: u32) {
        let mut size = 1usize << high;
        while high > low {
            high -= 1;
            size >>= 1;

            let buddy_addr = page_ptr(page_addr, size);
            // SAFETY: buddy_addr falls within the order-`high+1` block that
            // was just unlinked whole from its free list; nothing else
            // references it yet.
            let node = unsafe { FreePageNode::write_at(NonNull::new_unchecked(buddy_addr as *mut u8)) };
            unsafe { self.area[high as usize].free_list.push_front(node) };
            self.area[high as usize].nr_free += 1;

            let idx = addr_to_index(self.mem_start, buddy_addr);
            self.page_flags[idx] = high as u8;
        }
    }

    /// Release a page run previously returned by [`Zone::alloc_pages`].
    ///
    /// Invalid input (an address outside the committed arena, or a page
    /// whose flag byte lacks the allocated bit) is silently ignored: this
    /// is a cheap safety net against double-frees and foreign pointers, not
    /// a correctness contract the caller can rely on.
    pub fn free_pages(&mut self, page: PageFrame) {
        let addr = page.as_ptr() as usize;
        let upper_bound = self.mem_last.saturating_sub(PAGE_SIZE);
        if addr < self.mem_start || addr > upper_bound {
            log::trace!("free_pages: address 0x{addr:x} outside committed arena, ignored");
            return;
        }

        let idx = addr_to_index(self.mem_start, addr);
        if self.page_flags[idx] & ALLOCATED_BIT == 0 {
            log::trace!("free_pages: address 0x{addr:x} not marked allocated, ignored");
            return;
        }

        let order = (self.page_flags[idx] & ORDER_MASK) as u32;
        self.merge_buddy(addr, order);
    }

    /// Coalesce `page_addr`'s order-`order` block with its buddy,
    /// repeating at each successively larger order until the buddy is
    /// absent, wrongly sized, or allocated, then link the (possibly
    /// merged) result onto the free list for whatever order it ended at.
    fn merge_buddy(&mut self, page_addr: usize, order: u32) {
        let mut idx = addr_to_index(self.mem_start, page_addr);
        let mut order = order;
        self.free_count += 1usize << order;

        while order < self.max_order {
            let buddy_idx = buddy_index(idx, order);
            if self.page_flags[buddy_idx] != order as u8 {
                break;
            }

            let buddy_addr = index_to_addr(self.mem_start, buddy_idx);
            // SAFETY: the flag-byte test above is exactly the invariant
            // that makes this address a currently-linked free node of this
            // order: not allocated, this order, and the start of a block.
            let buddy_node = unsafe { NonNull::new_unchecked(buddy_addr as *mut FreePageNode) };
            unsafe { self.area[order as usize].free_list.remove(buddy_node) };
            self.area[order as usize].nr_free -= 1;
            self.page_flags[buddy_idx] = 0;

            idx = combined_index(idx, order);
            order += 1;
        }

        self.page_flags[idx] = order as u8;
        let merged_addr = index_to_addr(self.mem_start, idx);
        // SAFETY: merged_addr is either the original page (untouched) or a
        // combined block whose buddy was just unlinked above; either way it
        // is free and not referenced elsewhere.
        let node = unsafe { FreePageNode::write_at(NonNull::new_unchecked(merged_addr as *mut u8)) };
        unsafe { self.area[order as usize].free_list.push_front(node) };
        self.area[order as usize].nr_free += 1;
    }
}

#[cfg(all(test, feature = "std"))]
impl Zone {
    /// Build a zone with an explicit `max_order`, bypassing the usual
    /// size-to-order derivation in [`Zone::create`].
    ///
    /// `MAX_ORDER` is large enough (12) that no realistic test size drives
    /// `create`'s own derivation past it, so this is the only way to
    /// exercise lazy growth (which only kicks in once `max_size` implies
    /// more top blocks than a single `2^max_order`-page allocation covers)
    /// without committing a multi-hundred-megabyte arena in a unit test.
    fn create_capped(max_size: usize, max_order: u32) -> Option<Zone> {
        let top_block_bytes = PAGE_SIZE << max_order;
        let arena = Arena::acquire(top_block_bytes, max_size)?;
        let mem_start = arena.as_ptr().as_ptr() as usize;
        Some(Zone {
            mem_start,
            mem_last: mem_start,
            mem_end: mem_start + max_size,
            max_order,
            area: core::array::from_fn(|_| Area::new()),
            free_count: 0,
            page_flags: vec![0u8; max_size >> PAGE_SHIFT].into_boxed_slice(),
            _arena: arena,
        })
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    const PAGE: usize = PAGE_SIZE;

    #[test]
    fn tiny_zone_round_trips_a_single_page() {
        let mut zone = Zone::create(PAGE).expect("zone_create");
        let p1 = zone.alloc_pages(0).expect("first alloc");
        assert!(zone.alloc_pages(0).is_none(), "single-page zone should be exhausted");

        zone.free_pages(p1);
        let p1_again = zone.alloc_pages(0).expect("alloc after free");
        assert_eq!(p1_again.addr(), p1.addr());
    }

    #[test]
    fn split_and_recombine_four_pages() {
        let mut zone = Zone::create(4 * PAGE).expect("zone_create");
        assert_eq!(zone.max_order(), 2);

        let a = zone.alloc_pages(0).unwrap();
        let b = zone.alloc_pages(0).unwrap();
        let c = zone.alloc_pages(0).unwrap();
        let d = zone.alloc_pages(0).unwrap();
        assert!(zone.alloc_pages(0).is_none());

        let base = a.addr().as_ptr() as usize;
        assert_eq!(a.addr().as_ptr() as usize, base);
        assert_eq!(b.addr().as_ptr() as usize, base + PAGE);
        assert_eq!(c.addr().as_ptr() as usize, base + 2 * PAGE);
        assert_eq!(d.addr().as_ptr() as usize, base + 3 * PAGE);

        zone.free_pages(b);
        zone.free_pages(a);
        zone.free_pages(d);
        zone.free_pages(c);

        let whole = zone.alloc_pages(2).expect("fully coalesced block");
        assert_eq!(whole.addr().as_ptr() as usize, base);
    }

    #[test]
    fn order_mismatch_on_free_is_ignored() {
        // A zone sized to exactly one order-3 top block: allocating it whole
        // leaves no split-off buddy lying around, so a second order-3
        // request can only succeed once `p` itself is freed.
        let mut zone = Zone::create(8 * PAGE).expect("zone_create");
        let p = zone.alloc_pages(3).expect("8-page alloc");

        let mid = unsafe {
            PageFrame::from_addr(NonNull::new_unchecked(
                (p.addr().as_ptr() as usize + PAGE) as *mut u8,
            ))
        };
        zone.free_pages(mid);

        // The 8-page block is still allocated; a second 8-page request
        // must fail until `p` itself is freed.
        assert!(zone.alloc_pages(3).is_none());
        zone.free_pages(p);
        assert!(zone.alloc_pages(3).is_some());
    }

    #[test]
    fn lazy_growth_introduces_successive_top_blocks() {
        let top_block_bytes = PAGE << 2;
        let mut zone = Zone::create_capped(4 * top_block_bytes, 2).expect("zone_create");
        assert_eq!(zone.max_order(), 2);

        let base = {
            let p = zone.alloc_pages(2).unwrap();
            p.addr().as_ptr() as usize
        };
        for i in 1..4 {
            let p = zone.alloc_pages(2).unwrap();
            assert_eq!(p.addr().as_ptr() as usize, base + i * top_block_bytes);
        }
        assert!(zone.alloc_pages(2).is_none());
    }

    #[test]
    fn order_larger_than_max_order_is_rejected() {
        let mut zone = Zone::create(4 * PAGE).expect("zone_create");
        let too_big = zone.max_order() + 1;
        assert!(zone.alloc_pages(too_big).is_none());
        assert_eq!(zone.free_page_count(), 0);
    }

    #[test]
    fn coalescing_ladder_merges_all_the_way_up() {
        let mut zone = Zone::create(8 * PAGE).expect("zone_create");
        assert_eq!(zone.max_order(), 3);

        let pages: alloc::vec::Vec<_> = (0..8).map(|_| zone.alloc_pages(0).unwrap()).collect();
        assert!(zone.alloc_pages(0).is_none());

        for p in pages {
            zone.free_pages(p);
        }

        assert_eq!(zone.area_free_count(3), 1);
        for order in 0..3 {
            assert_eq!(zone.area_free_count(order), 0);
        }
        assert_eq!(zone.free_page_count(), 8);
    }

    #[test]
    fn every_block_is_aligned_to_its_own_order() {
        // A fresh zone per order keeps this check independent of whatever
        // fragmentation earlier allocations in the same zone would leave.
        for order in 0..=2u32 {
            let mut zone = Zone::create(16 * PAGE).expect("zone_create");
            let page = zone.alloc_pages(order).unwrap();
            let addr = page.addr().as_ptr() as usize;
            let index = (addr - zone.mem_start) >> PAGE_SHIFT;
            assert_eq!(index % (1usize << order), 0);
        }
    }
}
