//! Allocation and cache-creation flag bits.
//!
//! Plain `const` bit flags rather than a `bitflags`-typed newtype: every flag here is either
//! forwarded verbatim to a [`crate::page::PageAllocator`] or consulted with a single `&` test, so
//! a dedicated flag type would add a layer of ceremony the call sites never need.

/// Zero-fill the object up to `object_size` before returning it from `alloc`.
pub const ZERO: u32 = 1 << 0;

/// Permit the underlying page allocator to block while servicing this request.
pub const WAIT: u32 = 1 << 1;

/// Widen a cache's `align` to [`CACHE_LINE_SIZE`] at creation time.
pub const HWCACHE_ALIGN: u32 = 1 << 13;

/// Assumed hardware cache line size used by [`HWCACHE_ALIGN`].
pub const CACHE_LINE_SIZE: u32 = 64;
