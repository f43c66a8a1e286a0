//! Circular doubly linked list implementation.
//!
//! A [`List`] node is embedded directly inside the entries it links (an *intrusive* list): the
//! cache's `partial` and `full` lists are each a standalone sentinel node, and every [`crate::page::Page`]
//! that joins one of those lists embeds a `List` field that gets spliced into the sentinel's ring.
//! The sentinel is never a member of itself except when the list is empty, at which point it
//! points to itself in both directions.

use core::ptr;

/// Double linked list. Embedded in the actual entry struct to give the entry struct
/// the linked list capability.
#[repr(C)]
pub struct List {
    pub prev: *mut List,
    pub next: *mut List,
}

impl List {
    /// A `List` is not valid until it has been initialized, because `prev`/`next` must point
    /// somewhere. Prefer [`List::init_empty`] over this when the node's final address is known.
    pub const fn new_uninit() -> Self {
        Self {
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        }
    }
}

/// Initialize `node` as an empty circular list: both links point back to `node` itself.
///
/// # Safety
/// `node` must be a valid, properly aligned pointer to writable `List` storage.
#[inline]
pub unsafe fn init_empty(node: *mut List) {
    (*node).prev = node;
    (*node).next = node;
}

/// Returns `true` if `head` has no members linked into it (i.e. is an empty sentinel).
///
/// # Safety
/// `head` must point to an initialized `List`.
#[inline]
pub unsafe fn is_empty(head: *const List) -> bool {
    (*head).next as *const List == head
}

/// Splice `node` in as the immediate successor of `head`.
///
/// # Safety
/// Both pointers must point to initialized `List`s; `node` must not already be linked into a list.
#[inline]
pub unsafe fn insert_after(head: *mut List, node: *mut List) {
    let next = (*head).next;
    (*node).prev = head;
    (*node).next = next;
    (*next).prev = node;
    (*head).next = node;
}

/// Splice `node` in as the immediate predecessor of `head`. This is the natural "append to the
/// tail" operation when `head` is a sentinel, since the sentinel's `prev` is the current tail.
///
/// # Safety
/// Both pointers must point to initialized `List`s; `node` must not already be linked into a list.
#[inline]
pub unsafe fn insert_before(head: *mut List, node: *mut List) {
    let prev = (*head).prev;
    (*node).next = head;
    (*node).prev = prev;
    (*prev).next = node;
    (*head).prev = node;
}

/// Append `node` at the tail of the ring anchored at `head`. Alias of [`insert_before`] kept for
/// call-site clarity at append sites.
///
/// # Safety
/// Same as [`insert_before`].
#[inline]
pub unsafe fn append(head: *mut List, node: *mut List) {
    insert_before(head, node)
}

/// Unlink `node` from whatever ring it is currently a member of. `node` itself is left with
/// dangling `prev`/`next` and must be re-initialized (or dropped) before reuse.
///
/// # Safety
/// `node` must point to a `List` currently linked into some ring (including the degenerate
/// single-element ring where `node.prev == node.next == node` is not valid input — callers must
/// not remove a sentinel from itself).
#[inline]
pub unsafe fn remove(node: *mut List) {
    let prev = (*node).prev;
    let next = (*node).next;
    (*prev).next = next;
    (*next).prev = prev;
    (*node).prev = ptr::null_mut();
    (*node).next = ptr::null_mut();
}

/// Returns the first member linked into `head`, or `None` if the ring is empty.
///
/// # Safety
/// `head` must point to an initialized `List`.
#[inline]
pub unsafe fn first(head: *mut List) -> Option<*mut List> {
    if is_empty(head) {
        None
    } else {
        Some((*head).next)
    }
}

/// Counts the number of members linked into `head` (O(n), for assertions/tests only).
///
/// # Safety
/// `head` must point to an initialized `List` whose ring contains no cycles shorter than the
/// true ring.
#[inline]
pub unsafe fn count(head: *const List) -> usize {
    let mut n = 0;
    let mut cur = (*head).next;
    while cur as *const List != head {
        n += 1;
        cur = (*cur).next;
    }
    n
}

#[cfg(all(test, feature = "std"))]
mod tests {
    extern crate std;

    use super::*;
    use std::vec::Vec;

    #[repr(C)]
    struct Entry {
        link: List,
        value: u32,
    }

    impl Entry {
        fn new(value: u32) -> Self {
            Self {
                link: List::new_uninit(),
                value,
            }
        }
    }

    #[test]
    fn empty_head_reports_empty() {
        let mut head = List::new_uninit();
        unsafe {
            init_empty(&mut head);
            assert!(is_empty(&head));
            assert_eq!(count(&head), 0);
        }
    }

    #[test]
    fn append_and_iterate_in_order() {
        let mut head = List::new_uninit();
        let mut a = Entry::new(1);
        let mut b = Entry::new(2);
        let mut c = Entry::new(3);
        unsafe {
            init_empty(&mut head);
            append(&mut head, &mut a.link);
            append(&mut head, &mut b.link);
            append(&mut head, &mut c.link);

            assert_eq!(count(&head), 3);
            let mut cur = head.next;
            let mut seen = Vec::new();
            while cur as *const List != &head as *const List {
                let entry = cur as *const Entry;
                seen.push((*entry).value);
                cur = (*cur).next;
            }
            assert_eq!(seen, vec![1, 2, 3]);
        }
    }

    #[test]
    fn remove_middle_preserves_order() {
        let mut head = List::new_uninit();
        let mut a = Entry::new(1);
        let mut b = Entry::new(2);
        let mut c = Entry::new(3);
        unsafe {
            init_empty(&mut head);
            append(&mut head, &mut a.link);
            append(&mut head, &mut b.link);
            append(&mut head, &mut c.link);

            remove(&mut b.link);
            assert_eq!(count(&head), 2);

            let first = first(&mut head).unwrap();
            let entry = first as *const Entry;
            assert_eq!((*entry).value, 1);
        }
    }
}
