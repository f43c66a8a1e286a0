//! A SLUB-style fixed-size object slab allocator built on a pluggable page allocator.
//!
//! Callers supply a [`page::PageAllocator`] (whatever hands out `2^order` contiguous pages on
//! their platform) and get back [`cache::SlabCache`] pools that carve those pages into equally
//! sized, equally aligned objects: [`cache::SlabCache::alloc`]/[`cache::SlabCache::free`] amortize
//! page-level allocation the way a userspace `malloc` amortizes `mmap`, or the way Linux's SLUB
//! allocator amortizes the buddy allocator underneath it — this crate follows that design.
//!
//! Every cache's own descriptor is itself allocated from a distinguished meta-cache; see
//! [`bootstrap::allocator_init`] for how that meta-cache comes into existence before any cache
//! (including itself) can be created.
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

#[macro_use]
mod macros;

pub mod base;
pub mod bootstrap;
pub mod cache;
pub mod flags;
pub mod freelist;
pub mod oo;
pub mod page;
mod util;

pub use bootstrap::allocator_init;
pub use cache::{SlabCache, SLAB_CACHE_MIN_PARTIAL};
pub use oo::Oo;
pub use page::{Page, PageAllocator, PageFlag, PAGE_SIZE};
