//! Arenas and fat handles.
//!
//! An arena is a region allocator keyed to a function frame (or an explicit
//! `private` block). Every heap-shaped value is reached through a [`Handle`]:
//! a fat pointer carrying the payload address, the owning arena, the payload
//! size and the callbacks that make cross-arena promotion deep. Handles stay
//! valid while their arena lives; destroying the arena invalidates all of
//! them at once.
//!
//! Allocation here is non-moving (each payload is its own heap block), so a
//! handle's `ptr` never changes behind the program's back. The transaction
//! API is kept anyway: generated code and the array runtime bracket every
//! pointer-holding region with `begin`/`renew`/`end`, and under a debug
//! build those brackets verify the handle is still alive.

use core::ffi::c_char;
use std::alloc::{alloc_zeroed, dealloc, Layout};

use crate::fatal;

/// Payload alignment for every arena allocation.
///
/// Large enough for any element the generated code stores inline (doubles,
/// pointers, the boxed `any` union).
const PAYLOAD_ALIGN: usize = 16;

/// Invoked during cross-arena promotion, after the shallow payload copy, so
/// the value can deep-promote its interior handles and fix its back-pointers.
pub type CopyCallback = unsafe extern "C" fn(dest: *mut Arena, new_handle: *mut Handle);

/// Invoked when a handle dies, either eagerly via [`free`] or during arena
/// destruction (in reverse allocation order).
pub type FreeCallback = unsafe extern "C" fn(handle: *mut Handle);

/// A fat pointer to arena-owned memory.
///
/// The layout is part of the generated-code ABI: emitted C dereferences
/// `handle->ptr` directly between transaction brackets.
#[repr(C)]
pub struct Handle {
    /// Current payload address. Stable for the handle's whole life.
    pub ptr: *mut u8,
    /// The arena that owns this handle.
    pub arena: *mut Arena,
    /// Payload size in bytes.
    pub size: usize,
    /// Deep-promotion hook; `None` for flat payloads.
    pub copy_callback: Option<CopyCallback>,
    /// Death hook; `None` for payloads without external resources.
    pub free_callback: Option<FreeCallback>,
    /// Nested transaction count.
    tx_count: u32,
    /// Set once the handle has been freed or its arena destroyed.
    pub(crate) dead: bool,
}

/// A region allocator owning a set of handles.
pub struct Arena {
    parent: *mut Arena,
    handles: Vec<*mut Handle>,
    /// Tombstones of destroyed child arenas, reclaimed when this arena dies.
    dead_children: Vec<*mut Arena>,
    destroyed: bool,
}

fn payload_layout(size: usize) -> Layout {
    // Zero-sized allocations still get a distinct live address.
    Layout::from_size_align(size.max(1), PAYLOAD_ALIGN)
        .unwrap_or_else(|_| fatal("Arena error: allocation size overflow"))
}

/// Creates a new arena. A null `parent` creates a root.
pub unsafe fn create(parent: *mut Arena) -> *mut Arena {
    Box::into_raw(Box::new(Arena {
        parent,
        handles: Vec::new(),
        dead_children: Vec::new(),
        destroyed: false,
    }))
}

/// Allocates `size` zeroed bytes in `arena` and returns a fresh live handle.
///
/// Returns null when `arena` is null or already destroyed.
pub unsafe fn alloc(arena: *mut Arena, size: usize) -> *mut Handle {
    if arena.is_null() || (*arena).destroyed {
        return core::ptr::null_mut();
    }
    let payload = alloc_zeroed(payload_layout(size));
    if payload.is_null() {
        fatal("Arena error: out of memory");
    }
    let handle = Box::into_raw(Box::new(Handle {
        ptr: payload,
        arena,
        size,
        copy_callback: None,
        free_callback: None,
        tx_count: 0,
        dead: false,
    }));
    (*arena).handles.push(handle);
    handle
}

/// Allocates a NUL-terminated copy of `s` in `arena`.
pub unsafe fn strdup(arena: *mut Arena, s: *const c_char) -> *mut Handle {
    if s.is_null() {
        return alloc(arena, 1);
    }
    let len = core::ffi::CStr::from_ptr(s).to_bytes().len();
    let h = alloc(arena, len + 1);
    if !h.is_null() {
        core::ptr::copy_nonoverlapping(s.cast::<u8>(), (*h).ptr, len);
    }
    h
}

/// Moves `handle`'s value into `dst`.
///
/// Copies the payload bytes into a fresh handle in `dst`, carries the
/// callbacks over, lets the copy callback deep-promote interior handles, and
/// marks the source dead. Returns the source unchanged when it already lives
/// in `dst`.
pub unsafe fn promote(dst: *mut Arena, handle: *mut Handle) -> *mut Handle {
    if handle.is_null() || dst.is_null() {
        return handle;
    }
    if (*handle).arena == dst {
        return handle;
    }
    let new_handle = alloc(dst, (*handle).size);
    if new_handle.is_null() {
        return core::ptr::null_mut();
    }
    core::ptr::copy_nonoverlapping((*handle).ptr, (*new_handle).ptr, (*handle).size);
    (*new_handle).copy_callback = (*handle).copy_callback;
    (*new_handle).free_callback = (*handle).free_callback;
    if let Some(cb) = (*new_handle).copy_callback {
        cb(dst, new_handle);
    }
    free(handle);
    new_handle
}

/// Marks a single handle dead eagerly, running its free callback and
/// releasing the payload. The `Handle` record itself stays allocated until
/// the arena dies, so stale pointers fail transactions instead of faulting.
pub unsafe fn free(handle: *mut Handle) {
    if handle.is_null() || (*handle).dead {
        return;
    }
    if let Some(cb) = (*handle).free_callback {
        cb(handle);
    }
    dealloc((*handle).ptr, payload_layout((*handle).size));
    (*handle).ptr = core::ptr::null_mut();
    (*handle).dead = true;
}

/// Tears down an arena: free callbacks run on live handles in reverse
/// allocation order, then all backing storage is released.
///
/// Descendant arenas must already be destroyed; that is a precondition of
/// the generated code's discipline, not something enforced here.
pub unsafe fn destroy(arena: *mut Arena) {
    if arena.is_null() || (*arena).destroyed {
        return;
    }
    let handles = core::mem::take(&mut (*arena).handles);
    for &h in handles.iter().rev() {
        if !(*h).dead {
            if let Some(cb) = (*h).free_callback {
                cb(h);
            }
            dealloc((*h).ptr, payload_layout((*h).size));
            (*h).dead = true;
        }
        drop(Box::from_raw(h));
    }
    for &child in &core::mem::take(&mut (*arena).dead_children) {
        drop(Box::from_raw(child));
    }
    (*arena).destroyed = true;
    // The tombstone lives until the parent frame ends, so that a stale
    // arena pointer yields a failed alloc rather than a wild read.
    let parent = (*arena).parent;
    if !parent.is_null() && !(*parent).destroyed {
        (*parent).dead_children.push(arena);
    }
}

/// Begins a transaction on `handle`: the payload address is pinned until the
/// matching [`end_transaction`]. Transactions nest by count.
pub unsafe fn begin_transaction(handle: *mut Handle) {
    if handle.is_null() {
        return;
    }
    if (*handle).dead {
        fatal("Handle error: transaction on a dead handle");
    }
    (*handle).tx_count += 1;
}

/// Re-derives the payload address inside a transaction, after an operation
/// that may have allocated in the same arena.
pub unsafe fn renew_transaction(handle: *mut Handle) {
    if handle.is_null() {
        return;
    }
    debug_assert!((*handle).tx_count > 0, "renew outside a transaction");
    if (*handle).dead {
        fatal("Handle error: transaction on a dead handle");
    }
}

/// Ends the innermost transaction on `handle`.
pub unsafe fn end_transaction(handle: *mut Handle) {
    if handle.is_null() {
        return;
    }
    debug_assert!((*handle).tx_count > 0, "unbalanced transaction end");
    (*handle).tx_count = (*handle).tx_count.saturating_sub(1);
}

/// True when the handle is non-null and alive.
pub unsafe fn is_live(handle: *mut Handle) -> bool {
    !handle.is_null() && !(*handle).dead
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn with_arena<T>(f: impl FnOnce(*mut Arena) -> T) -> T {
        unsafe {
            let a = create(core::ptr::null_mut());
            let out = f(a);
            destroy(a);
            drop(Box::from_raw(a));
            out
        }
    }

    #[test]
    fn alloc_zeroes_payload() {
        with_arena(|a| unsafe {
            let h = alloc(a, 64);
            assert!(is_live(h));
            let bytes = core::slice::from_raw_parts((*h).ptr, 64);
            assert!(bytes.iter().all(|&b| b == 0));
        });
    }

    #[test]
    fn alloc_on_destroyed_arena_returns_null() {
        unsafe {
            let a = create(core::ptr::null_mut());
            destroy(a);
            assert!(alloc(a, 8).is_null());
            drop(Box::from_raw(a));
        }
    }

    #[test]
    fn strdup_copies_bytes() {
        with_arena(|a| unsafe {
            let h = strdup(a, c"hello".as_ptr());
            assert_eq!((*h).size, 6);
            let s = core::ffi::CStr::from_ptr((*h).ptr.cast());
            assert_eq!(s.to_str().unwrap(), "hello");
        });
    }

    #[test]
    fn promote_moves_payload_and_kills_source() {
        unsafe {
            let src = create(core::ptr::null_mut());
            let dst = create(core::ptr::null_mut());
            let h = strdup(src, c"payload".as_ptr());
            let moved = promote(dst, h);
            assert!((*h).dead);
            assert_eq!((*moved).arena, dst);
            let s = core::ffi::CStr::from_ptr((*moved).ptr.cast());
            assert_eq!(s.to_str().unwrap(), "payload");
            destroy(src);
            destroy(dst);
            drop(Box::from_raw(src));
            drop(Box::from_raw(dst));
        }
    }

    #[test]
    fn payload_address_is_stable_across_allocations_in_a_transaction() {
        with_arena(|a| unsafe {
            let h = strdup(a, c"pinned".as_ptr());
            begin_transaction(h);
            let p = (*h).ptr;
            for _ in 0..64 {
                renew_transaction(h);
                let _ = alloc(a, 128);
            }
            assert_eq!((*h).ptr, p);
            end_transaction(h);
        });
    }

    #[test]
    fn promote_same_arena_is_identity() {
        with_arena(|a| unsafe {
            let h = alloc(a, 16);
            assert_eq!(promote(a, h), h);
            assert!(is_live(h));
        });
    }

    #[test]
    fn free_runs_callback_once() {
        unsafe extern "C" fn count(_h: *mut Handle) {
            FREED.with(|c| c.set(c.get() + 1));
        }
        thread_local! {
            static FREED: core::cell::Cell<u32> = const { core::cell::Cell::new(0) };
        }
        with_arena(|a| unsafe {
            let h = alloc(a, 8);
            (*h).free_callback = Some(count);
            free(h);
            free(h);
            assert_eq!(FREED.with(core::cell::Cell::get), 1);
        });
    }

    proptest! {
        #[test]
        fn allocations_are_distinct_and_live(sizes in proptest::collection::vec(0usize..256, 1..32)) {
            with_arena(|a| unsafe {
                let handles: Vec<_> = sizes.iter().map(|&s| alloc(a, s)).collect();
                for (i, &h) in handles.iter().enumerate() {
                    prop_assert!(is_live(h));
                    for &other in &handles[i + 1..] {
                        prop_assert_ne!(h, other);
                        prop_assert_ne!((*h).ptr, (*other).ptr);
                    }
                }
                Ok(())
            })?;
        }

        #[test]
        fn promote_preserves_payload_bytes(data in proptest::collection::vec(any::<u8>(), 0..128)) {
            unsafe {
                let src = create(core::ptr::null_mut());
                let dst = create(core::ptr::null_mut());
                let h = alloc(src, data.len());
                core::ptr::copy_nonoverlapping(data.as_ptr(), (*h).ptr, data.len());
                let moved = promote(dst, h);
                let copied = core::slice::from_raw_parts((*moved).ptr, data.len());
                prop_assert_eq!(copied, &data[..]);
                prop_assert!((*h).dead);
                destroy(src);
                destroy(dst);
                drop(Box::from_raw(src));
                drop(Box::from_raw(dst));
            }
        }
    }
}
