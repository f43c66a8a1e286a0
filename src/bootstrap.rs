//! Two-phase bootstrap of the meta-cache: the cache that allocates [`SlabCache`] descriptors.
//!
//! Every cache's own descriptor is allocated out of `slab_cache_of_caches`, the distinguished
//! meta-cache whose objects are themselves [`SlabCache`] values. That meta-cache is, like any
//! other, a `SlabCache` — so it needs a home to allocate *its own* descriptor from before it can
//! allocate anyone else's. The chicken-and-egg is broken in two steps: a statically reserved
//! descriptor seeds the system, then is re-homed into a slab it manages itself.

use core::ptr;

use crate::cache::SlabCache;
use crate::page::PageAllocator;
use crate::util::list::List;

/// Name every meta-cache descriptor is created with.
const META_CACHE_NAME: &str = "slab_cache";

/// The static seed descriptor. Lives for the whole process but is only ever touched during
/// [`allocator_init`]; once the meta-cache is re-homed (step 2) nothing references this again.
static mut BOOT_CACHE: SlabCache = SlabCache {
    name: META_CACHE_NAME,
    object_size: 0,
    size: 0,
    align: 0,
    offset: 0,
    flags: 0,
    oo: crate::oo::Oo::make(0, 0),
    active: None,
    freelist: ptr::null_mut(),
    partial: List::new_uninit(),
    nr_partial: 0,
    full: List::new_uninit(),
};

/// Bring up the slab allocator: build the meta-cache that every other [`SlabCache::create`] call
/// draws its descriptor memory from.
///
/// Must be called exactly once, before any other operation in this crate, per [`PageAllocator`]
/// instance. Returns a pointer to the live meta-cache descriptor — callers pass `unsafe { meta.as_mut() }`
/// as the `meta` argument to subsequent [`SlabCache::create`]/[`SlabCache::destroy`] calls.
///
/// # Safety
/// Must not be called more than once for a given `pages` backend; a second call re-seeds
/// `BOOT_CACHE` and re-homes into a second descriptor, orphaning the first meta-cache along with
/// every cache it had already created.
pub unsafe fn allocator_init(pages: &mut impl PageAllocator) -> ptr::NonNull<SlabCache> {
    // Phase 1 — static seed: `__cache_create(boot, "slab_cache", size_of::<SlabCache>(), ...)`.
    // No descriptor allocation is needed; `BOOT_CACHE` storage is already provided statically.
    let object_size = core::mem::size_of::<SlabCache>() as u32;
    let align = core::mem::align_of::<SlabCache>() as u32;
    SlabCache::init_in_place(
        ptr::addr_of_mut!(BOOT_CACHE),
        META_CACHE_NAME,
        object_size,
        align,
        0,
    );

    // Phase 2 — re-home: allocate a real descriptor `S` from the meta-cache (`BOOT_CACHE` itself),
    // byte-copy `BOOT_CACHE` into it, and fix up back-pointers that still point at `BOOT_CACHE`.
    let boot = &mut *ptr::addr_of_mut!(BOOT_CACHE);
    let homed = boot
        .alloc(0, pages)
        .expect("slab allocator bootstrap: page allocator exhausted on first allocation");
    let homed_ptr = homed.as_ptr() as *mut SlabCache;

    ptr::copy_nonoverlapping(ptr::addr_of!(BOOT_CACHE), homed_ptr, 1);

    // `homed` lives inside the slab that BOOT_CACHE itself just grew, so `virt_to_page(homed)`
    // resolves to that slab's head page descriptor — the same descriptor backing every other
    // object in the slab, including any the meta-cache allocates from it later.
    if let Some(page_ptr) = pages.virt_to_page(homed_ptr as usize) {
        (*page_ptr.as_ptr()).slab_cache = homed_ptr;
    }

    // `partial`/`full` on the copy still have sentinel pointers into `BOOT_CACHE`'s storage
    // (a circular list's head always points at itself); both lists are empty at this point in
    // bootstrap, so re-initializing them in place at the new address is sufficient.
    debug_assert!(crate::util::list::is_empty(ptr::addr_of!((*homed_ptr).partial)));
    debug_assert!(crate::util::list::is_empty(ptr::addr_of!((*homed_ptr).full)));
    crate::util::list::init_empty(ptr::addr_of_mut!((*homed_ptr).partial));
    crate::util::list::init_empty(ptr::addr_of_mut!((*homed_ptr).full));

    // `BOOT_CACHE` is now unreferenced; all future allocations go through `homed`.
    ptr::NonNull::new_unchecked(homed_ptr)
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::page::tests_arena::TestPageAllocator;

    #[test]
    fn bootstrap_meta_cache_owns_its_own_descriptor() {
        let mut arena = TestPageAllocator::new(64);
        let meta = unsafe { allocator_init(&mut arena) };

        let page = arena
            .virt_to_page(meta.as_ptr() as usize)
            .expect("meta descriptor must live in a tracked slab");
        unsafe {
            assert_eq!((*page.as_ptr()).slab_cache, meta.as_ptr());
        }
    }

    #[test]
    fn meta_cache_can_mint_further_cache_descriptors() {
        let mut arena = TestPageAllocator::new(64);
        let mut meta = unsafe { allocator_init(&mut arena) };

        let small = SlabCache::create(
            unsafe { meta.as_mut() },
            "widgets",
            16,
            8,
            0,
            &mut arena,
        )
        .expect("cache_create");

        let page = arena
            .virt_to_page(small.as_ptr() as usize)
            .expect("cache descriptor must live in a tracked slab");
        unsafe {
            assert_eq!((*page.as_ptr()).slab_cache, meta.as_ptr());
        }
    }
}
