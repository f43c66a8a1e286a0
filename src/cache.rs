//! The cache descriptor and the allocation/free engines built on top of it.
//!
//! A [`SlabCache`] owns at most one *active* slab (tracked by direct pointer, with its freelist
//! cached in `freelist` for the fast path), a `partial` ring of slabs that are neither empty nor
//! full, and a `full` ring of slabs with no free objects left. `alloc`/`free` are written as a thin
//! fast path over a cold, explicit slow path.

use core::mem::size_of;
use core::ptr;
use core::ptr::NonNull;

use crate::flags;
use crate::freelist;
use crate::oo::Oo;
use crate::page::{Page, PageAllocator, PageFlag, PAGE_SIZE};
use crate::util::align::{align_up, get_order};
use crate::util::list::{self, List};

/// Above this many fully-free slabs on `partial`, the next one to go empty is returned to the
/// page allocator instead of being kept around for reuse.
pub const SLAB_CACHE_MIN_PARTIAL: u32 = 3;

/// Largest page order [`SlabCache::calculate_order`] will pick, to bound the search for objects
/// too large to pack several-to-a-page.
const MAX_ORDER: u32 = 10;

/// A pool of fixed-size, fixed-alignment objects.
///
/// `partial` and `full` are themselves the list sentinels, not separate heap objects: since
/// [`Page::link`] is the first field of [`Page`], a `List` node taken off either ring can be cast
/// directly back to `*mut Page` with no offset arithmetic.
#[repr(C)]
pub struct SlabCache {
    pub name: &'static str,
    pub object_size: u32,
    pub size: u32,
    pub align: u32,
    pub offset: u32,
    pub flags: u32,
    pub oo: Oo,
    pub active: Option<NonNull<Page>>,
    pub freelist: *mut u8,
    pub partial: List,
    pub nr_partial: u32,
    pub full: List,
}

impl SlabCache {
    /// Work out the packed slab geometry for `size`: the smallest page order that fits at least
    /// one object, capped at [`MAX_ORDER`].
    fn calculate_order(size: u32) -> Oo {
        let mut order = 0u32;
        loop {
            let slab_size = PAGE_SIZE << order;
            let objects = slab_size / size as usize;
            if objects >= 1 || order >= MAX_ORDER {
                return Oo::make(order, objects.max(1) as u32);
            }
            order += 1;
        }
    }

    /// Derive the stored slot size/alignment for a cache created with `object_size`/`align`/`flags`.
    fn calculate_sizes(object_size: u32, align: u32, flags: u32) -> (u32, u32) {
        let mut align = align.max(size_of::<usize>() as u32);
        if flags & crate::flags::HWCACHE_ALIGN != 0 {
            align = align.max(crate::flags::CACHE_LINE_SIZE);
        }
        let mut size = object_size.max(size_of::<usize>() as u32);
        size = align_up(size as usize, get_order(align as usize)) as u32;
        (size, align)
    }

    /// Build the geometry-only part of a cache descriptor (everything [`SlabCache::create`] would
    /// compute) without drawing the descriptor's own memory from anywhere. Used directly by
    /// [`crate::bootstrap`] for the static seed descriptor, which cannot be allocated from a
    /// meta-cache that does not exist yet; [`SlabCache::create`] is a thin wrapper around this plus
    /// a `meta.alloc()` call.
    ///
    /// # Safety
    /// `dst` must point to valid, writable, properly aligned `SlabCache` storage. Any previous
    /// contents of `*dst` are overwritten without being dropped.
    pub(crate) unsafe fn init_in_place(
        dst: *mut SlabCache,
        name: &'static str,
        object_size: u32,
        align: u32,
        flags: u32,
    ) {
        let (size, align) = Self::calculate_sizes(object_size, align, flags);
        let oo = Self::calculate_order(size);

        ptr::write(
            dst,
            SlabCache {
                name,
                object_size,
                size,
                align,
                offset: 0,
                flags,
                oo,
                active: None,
                freelist: ptr::null_mut(),
                partial: List::new_uninit(),
                nr_partial: 0,
                full: List::new_uninit(),
            },
        );
        list::init_empty(&mut (*dst).partial as *mut List);
        list::init_empty(&mut (*dst).full as *mut List);
    }

    /// Create a new cache. Its own descriptor memory is drawn from `meta` (the cache-of-caches),
    /// following the two-phase bootstrap described in [`crate::bootstrap`].
    pub fn create(
        meta: &mut SlabCache,
        name: &'static str,
        object_size: u32,
        align: u32,
        flags: u32,
        pages: &mut impl PageAllocator,
    ) -> Option<NonNull<SlabCache>> {
        let bytes = meta.alloc(flags, pages)?;
        let cache_ptr = bytes.as_ptr() as *mut SlabCache;
        unsafe {
            Self::init_in_place(cache_ptr, name, object_size, align, flags);
        }
        NonNull::new(cache_ptr)
    }

    /// Tear a cache down: discard every slab it owns (warning if any still had live objects) and
    /// return its own descriptor memory to `meta`.
    pub fn destroy(cache: NonNull<SlabCache>, meta: &mut SlabCache, pages: &mut impl PageAllocator) {
        unsafe {
            let c = cache.as_ptr();

            // A cache that never allocated anything has no active slab.
            if let Some(active) = (*c).active.take() {
                (*c).discard_slab(active, pages);
            }

            while let Some(node) = list::first(&mut (*c).full as *mut List) {
                list::remove(node);
                let page_ptr = NonNull::new(node as *mut Page).unwrap();
                (*c).discard_slab(page_ptr, pages);
            }

            while let Some(node) = list::first(&mut (*c).partial as *mut List) {
                list::remove(node);
                (*c).nr_partial -= 1;
                let page_ptr = NonNull::new(node as *mut Page).unwrap();
                (*c).discard_slab(page_ptr, pages);
            }
        }

        let descriptor = unsafe { NonNull::new_unchecked(cache.as_ptr() as *mut u8) };
        meta.free(descriptor, pages);
    }

    /// Allocate one object. Fast path: pop the cached active-slab freelist. Slow path: promote,
    /// reuse a partial slab, or grow.
    pub fn alloc(&mut self, flags: u32, pages: &mut impl PageAllocator) -> Option<NonNull<u8>> {
        if self.freelist.is_null() && !self.bring_up_active(flags, pages) {
            return None;
        }
        self.take_one(flags)
    }

    /// Allocate one object and zero it, regardless of whether `flags::ZERO` was passed.
    pub fn zalloc(&mut self, flags: u32, pages: &mut impl PageAllocator) -> Option<NonNull<u8>> {
        self.alloc(flags | flags::ZERO, pages)
    }

    /// Pop the cached freelist head. Requires `self.freelist` to already be non-null; callers
    /// reach this only after [`bring_up_active`] succeeds, which is the explicit guard against the
    /// null-deref the un-guarded fast path is prone to.
    ///
    /// [`bring_up_active`]: SlabCache::bring_up_active
    fn take_one(&mut self, flags: u32) -> Option<NonNull<u8>> {
        let object = self.freelist;
        if object.is_null() {
            return None;
        }
        unsafe {
            self.freelist = freelist::get_freepointer(object, self.offset as usize);
            if let Some(active) = self.active {
                (*active.as_ptr()).inuse += 1;
            }
            if flags & crate::flags::ZERO != 0 {
                ptr::write_bytes(object, 0, self.object_size as usize);
            }
        }
        NonNull::new(object)
    }

    /// Make sure `self.freelist` is populated from a usable slab: the current active slab if it
    /// still has free objects cached on it, otherwise a slab taken off `partial`, otherwise a
    /// freshly grown slab. Returns `false` only when growing the cache fails (page allocator OOM).
    fn bring_up_active(&mut self, flags: u32, pages: &mut impl PageAllocator) -> bool {
        if let Some(active) = self.active {
            unsafe {
                let page = active.as_ptr();
                if !(*page).freelist.is_null() {
                    self.install_active(active);
                    return true;
                }
                // Active slab is exhausted: it belongs on `full` now.
                list::append(&mut self.full as *mut List, &mut (*page).link as *mut List);
            }
            self.active = None;
        }

        if let Some(page_ptr) = self.get_partial() {
            self.install_active(page_ptr);
            return true;
        }

        match self.allocate_slab(flags, pages) {
            Some(page_ptr) => {
                self.install_active(page_ptr);
                true
            }
            None => {
                log::warn!("slab cache '{}': page allocator exhausted", self.name);
                false
            }
        }
    }

    /// Adopt `page_ptr` as the active slab and hoist its freelist into the cache-level cache.
    fn install_active(&mut self, page_ptr: NonNull<Page>) {
        unsafe {
            let page = page_ptr.as_ptr();
            self.freelist = (*page).freelist;
            (*page).freelist = ptr::null_mut();
        }
        self.active = Some(page_ptr);
    }

    /// Take the first slab off `partial`, if any.
    fn get_partial(&mut self) -> Option<NonNull<Page>> {
        unsafe {
            let node = list::first(&mut self.partial as *mut List)?;
            list::remove(node);
            self.nr_partial -= 1;
            let page_ptr = NonNull::new(node as *mut Page).unwrap();
            // Every slab on `partial` has a non-null freelist by construction; assert it rather
            // than silently handing a bad slab to the caller.
            debug_assert!(
                !(*page_ptr.as_ptr()).freelist.is_null(),
                "slab on partial list with no free objects"
            );
            Some(page_ptr)
        }
    }

    /// Grow the cache by one slab's worth of pages, threading the free chain ascending through
    /// every object.
    fn allocate_slab(&mut self, flags: u32, pages: &mut impl PageAllocator) -> Option<NonNull<Page>> {
        let order = self.oo.order();
        let page_ptr = pages.alloc_pages(flags, order)?;
        unsafe {
            let page = page_ptr.as_ptr();
            (*page).set_flag(PageFlag::Slab);
            (*page).slab_cache = self as *mut SlabCache;
            (*page).inuse = 0;
            (*page).order = order;

            let base = pages.page_address(page_ptr);
            let objects = self.oo.objects();
            let mut prev: *mut u8 = ptr::null_mut();
            for i in (0..objects).rev() {
                let obj = (base + i as usize * self.size as usize) as *mut u8;
                freelist::set_freepointer(obj, self.offset as usize, prev);
                prev = obj;
            }
            (*page).freelist = prev;
        }
        Some(page_ptr)
    }

    /// Return a slab's pages to the page allocator. Warns if it still had live objects — callers
    /// that reach here from `destroy` have already decided to tear the cache down regardless.
    fn discard_slab(&mut self, page_ptr: NonNull<Page>, pages: &mut impl PageAllocator) {
        unsafe {
            let page = page_ptr.as_ptr();
            if (*page).inuse != 0 {
                log::warn!(
                    "slab cache '{}': discarding slab with {} live object(s)",
                    self.name,
                    (*page).inuse
                );
            }
            (*page).clear_flag(PageFlag::Slab);
            (*page).slab_cache = ptr::null_mut();
        }
        pages.free_pages(page_ptr, self.oo.order());
    }

    /// Free one object. `self` is only the *advisory* cache: the true owner is resolved from the
    /// object's page, and the free always proceeds against that owner, even when it differs from
    /// `self` (a caller passing the wrong cache gets a warning, not a silently dropped object).
    /// Fast path: the object's slab is the owner's active slab. Slow path: full→partial
    /// transition, or partial-reclaim when the owner is over budget on empty partial slabs.
    pub fn free(&mut self, object: NonNull<u8>, pages: &mut impl PageAllocator) {
        let Some(page_ptr) = pages.virt_to_page(object.as_ptr() as usize) else {
            log::error!(
                "slab cache '{}': free of address not owned by any slab",
                self.name
            );
            return;
        };

        let owner_ptr = unsafe { (*page_ptr.as_ptr()).slab_cache };
        if owner_ptr.is_null() {
            log::error!(
                "slab cache '{}': free of address not owned by any live slab",
                self.name
            );
            return;
        }

        if owner_ptr != self as *mut SlabCache {
            log::warn!(
                "slab cache '{}': free of object actually owned by a different cache; freeing \
                 into the true owner",
                self.name
            );
        }

        // SAFETY: `owner_ptr` is a distinct, live `SlabCache` the page descriptor vouches for;
        // it cannot alias `self` when the two pointers compare unequal above, and when they do
        // compare equal this is just `self` again.
        let owner = unsafe { &mut *owner_ptr };
        owner.free_to_owner(page_ptr, object, pages);
    }

    /// Fast/slow path dispatch once the true owning cache (`self`, here) has been resolved.
    fn free_to_owner(&mut self, page_ptr: NonNull<Page>, object: NonNull<u8>, pages: &mut impl PageAllocator) {
        if self.active == Some(page_ptr) {
            unsafe {
                let page = page_ptr.as_ptr();
                freelist::set_freepointer(object.as_ptr(), self.offset as usize, self.freelist);
                self.freelist = object.as_ptr();
                (*page).inuse -= 1;
            }
            return;
        }

        self.slow_free(page_ptr, object, pages);
    }

    fn slow_free(&mut self, page_ptr: NonNull<Page>, object: NonNull<u8>, pages: &mut impl PageAllocator) {
        unsafe {
            let page = page_ptr.as_ptr();
            let was_full = (*page).freelist.is_null();
            freelist::set_freepointer(object.as_ptr(), self.offset as usize, (*page).freelist);
            (*page).freelist = object.as_ptr();
            (*page).inuse -= 1;

            if was_full {
                list::remove(&mut (*page).link as *mut List);
                list::append(&mut self.partial as *mut List, &mut (*page).link as *mut List);
                self.nr_partial += 1;
                return;
            }

            if (*page).inuse == 0 && self.nr_partial > SLAB_CACHE_MIN_PARTIAL {
                list::remove(&mut (*page).link as *mut List);
                self.nr_partial -= 1;
                self.discard_slab(page_ptr, pages);
            }
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::page::tests_arena::TestPageAllocator;

    /// A bootstrap-free cache suitable for exercising the allocation/free engine in isolation: its
    /// own descriptor lives on the Rust stack rather than being drawn from a meta-cache.
    fn standalone_cache(object_size: u32, align: u32) -> SlabCache {
        let (size, align) = SlabCache::calculate_sizes(object_size, align, 0);
        let oo = SlabCache::calculate_order(size);
        let mut cache = SlabCache {
            name: "test",
            object_size,
            size,
            align,
            offset: 0,
            flags: 0,
            oo,
            active: None,
            freelist: ptr::null_mut(),
            partial: List::new_uninit(),
            nr_partial: 0,
            full: List::new_uninit(),
        };
        unsafe {
            list::init_empty(&mut cache.partial as *mut List);
            list::init_empty(&mut cache.full as *mut List);
        }
        cache
    }

    #[test]
    fn alloc_then_free_single_object() {
        let mut arena = TestPageAllocator::new(16);
        let mut cache = standalone_cache(size_of::<u64>() as u32, 8);

        let obj = cache.alloc(0, &mut arena).expect("alloc");
        unsafe {
            (obj.as_ptr() as *mut u64).write(0x123456);
            assert_eq!((obj.as_ptr() as *const u64).read(), 0x123456);
        }
        cache.free(obj, &mut arena);
    }

    #[test]
    fn zalloc_returns_zeroed_memory() {
        let mut arena = TestPageAllocator::new(16);
        let mut cache = standalone_cache(64, 8);

        let obj = cache.zalloc(0, &mut arena).expect("zalloc");
        let bytes = unsafe { core::slice::from_raw_parts(obj.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
        cache.free(obj, &mut arena);
    }

    #[test]
    fn exhausting_a_slab_grows_a_new_one() {
        let mut arena = TestPageAllocator::new(64);
        let mut cache = standalone_cache(256, 8);
        let objects_per_slab = cache.oo.objects();

        let mut handed_out = std::vec::Vec::new();
        for _ in 0..objects_per_slab + 1 {
            handed_out.push(cache.alloc(0, &mut arena).expect("alloc"));
        }
        assert_eq!(handed_out.len(), (objects_per_slab + 1) as usize);

        for obj in handed_out {
            cache.free(obj, &mut arena);
        }
    }

    #[test]
    fn freeing_from_full_slab_moves_it_to_partial() {
        let mut arena = TestPageAllocator::new(16);
        let mut cache = standalone_cache(512, 8);
        let objects_per_slab = cache.oo.objects();

        // Fully drain the first slab.
        let mut from_first_slab = std::vec::Vec::new();
        for _ in 0..objects_per_slab {
            from_first_slab.push(cache.alloc(0, &mut arena).expect("alloc"));
        }

        // One more allocation forces the exhausted slab off `active` and onto `full`, and grows
        // a second slab to serve this request.
        let from_second_slab = cache.alloc(0, &mut arena).expect("alloc");
        assert_eq!(unsafe { list::count(&cache.full as *const List) }, 1);

        // Freeing an object from the now-non-active first slab takes the slow path and should
        // land that slab on `partial`.
        let obj = from_first_slab.pop().unwrap();
        cache.free(obj, &mut arena);
        assert_eq!(cache.nr_partial, 1);

        cache.free(from_second_slab, &mut arena);
        for obj in from_first_slab {
            cache.free(obj, &mut arena);
        }
    }

    #[test]
    fn empty_partial_above_threshold_is_reclaimed() {
        let mut arena = TestPageAllocator::new(256);
        let mut cache = standalone_cache(1024, 8);
        let objects_per_slab = cache.oo.objects() as usize;

        // Fill and then partially drain enough slabs to push nr_partial past the threshold,
        // then fully drain one more to trigger reclaim.
        let mut slabs: std::vec::Vec<std::vec::Vec<NonNull<u8>>> = std::vec::Vec::new();
        for _ in 0..(SLAB_CACHE_MIN_PARTIAL + 2) {
            let mut objs = std::vec::Vec::new();
            for _ in 0..objects_per_slab {
                objs.push(cache.alloc(0, &mut arena).expect("alloc"));
            }
            slabs.push(objs);
        }

        // Make every slab but the last partially free (leave one object allocated) so each sits
        // on `partial`, then fully drain the last one too.
        for objs in slabs.iter_mut() {
            while objs.len() > 1 {
                let obj = objs.pop().unwrap();
                cache.free(obj, &mut arena);
            }
        }
        assert!(cache.nr_partial >= SLAB_CACHE_MIN_PARTIAL);

        let last_objs = slabs.last_mut().unwrap();
        let last = last_objs.pop().unwrap();
        cache.free(last, &mut arena);

        // Whatever remains should still be internally consistent; no assertion on exact count
        // since reclaim order depends on list order, only that it didn't panic and nr_partial
        // didn't go negative (it's unsigned, so underflow would already have panicked in debug).
        for objs in slabs {
            for obj in objs {
                cache.free(obj, &mut arena);
            }
        }
    }

    #[test]
    fn misattributed_free_lands_in_the_true_owner() {
        let mut arena = TestPageAllocator::new(16);
        let mut cache_a = standalone_cache(size_of::<u64>() as u32, 8);
        let mut cache_b = standalone_cache(size_of::<u64>() as u32, 8);

        let p = cache_a.alloc(0, &mut arena).expect("alloc from A");

        // Call free on B with an object that actually belongs to A.
        cache_b.free(p, &mut arena);

        // The object was freed into A, not dropped or left dangling: the next alloc from A
        // reuses it (LIFO reuse), and B's own geometry is untouched.
        let q = cache_a.alloc(0, &mut arena).expect("alloc from A again");
        assert_eq!(p, q);
        assert!(cache_b.active.is_none());
    }
}
