//! Handle-based arrays.
//!
//! Every array is a handle whose payload starts with an [`ArrayMeta`] header
//! followed by element storage. Arrays of reference element types (strings,
//! nested arrays, `any`) store handle pointers or boxed values in their
//! slots, never inline payloads, and carry a copy callback so cross-arena
//! promotion deep-copies the interior.
//!
//! The operations mirror the semantic contracts of the language's array
//! type: the non-mutating family (`clone`, `concat`, `slice`, `reverse`,
//! `insert`, `remove`, `push_copy`) always allocates, while `push`/`pop`/
//! `clear` mutate in place with `push` returning a possibly-new handle when
//! the payload grows. Mutating ops bracket every touched handle with a
//! transaction and renew once per allocating loop iteration.

use core::ffi::c_char;

use crate::any::{self, Any, Tag};
use crate::arena::{self, Arena, CopyCallback, Handle};
use crate::string;

/// Array metadata header, stored at the front of the payload.
///
/// The layout is shared with the generated C.
#[repr(C)]
pub struct ArrayMeta {
    pub arena: *mut Arena,
    pub size: usize,
    pub capacity: usize,
    pub elem_size: usize,
}

const HEADER: usize = core::mem::size_of::<ArrayMeta>();
const PTR_SIZE: usize = core::mem::size_of::<*mut Handle>();

pub unsafe fn meta(h: *mut Handle) -> *mut ArrayMeta {
    (*h).ptr.cast::<ArrayMeta>()
}

/// Pointer to the element storage, past the header.
pub unsafe fn data(h: *mut Handle) -> *mut u8 {
    (*h).ptr.add(HEADER)
}

/// Logical length; null reads as empty.
pub unsafe fn length(h: *mut Handle) -> usize {
    if h.is_null() || (*h).ptr.is_null() {
        0
    } else {
        (*meta(h)).size
    }
}

pub unsafe fn elem_size(h: *mut Handle) -> usize {
    if h.is_null() || (*h).ptr.is_null() {
        0
    } else {
        (*meta(h)).elem_size
    }
}

unsafe fn handle_slots<'a>(h: *mut Handle) -> &'a mut [*mut Handle] {
    core::slice::from_raw_parts_mut(data(h).cast::<*mut Handle>(), length(h))
}

unsafe fn any_slots<'a>(h: *mut Handle) -> &'a mut [Any] {
    core::slice::from_raw_parts_mut(data(h).cast::<Any>(), length(h))
}

/// Fixes the header's arena back-pointer after a shallow promotion copy.
/// Attached to flat (value-element) arrays.
pub unsafe extern "C" fn flat_copy_callback(dest: *mut Arena, new_handle: *mut Handle) {
    (*meta(new_handle)).arena = dest;
}

/// Deep-promotes every slot of a handle-element array (strings, nested
/// arrays) during cross-arena promotion.
pub unsafe extern "C" fn handle_array_copy_callback(dest: *mut Arena, new_handle: *mut Handle) {
    (*meta(new_handle)).arena = dest;
    for slot in handle_slots(new_handle) {
        if !slot.is_null() {
            *slot = arena::promote(dest, *slot);
        }
    }
}

/// Deep-promotes every boxed element of an `any[]` during promotion.
pub unsafe extern "C" fn any_array_copy_callback(dest: *mut Arena, new_handle: *mut Handle) {
    (*meta(new_handle)).arena = dest;
    for slot in any_slots(new_handle) {
        *slot = any::promote(dest, *slot);
    }
}

unsafe fn create_raw(
    arena: *mut Arena,
    count: usize,
    elem: usize,
    src: *const u8,
    cb: Option<CopyCallback>,
) -> *mut Handle {
    let h = arena::alloc(arena, HEADER + count * elem);
    if h.is_null() {
        return h;
    }
    arena::begin_transaction(h);
    let m = meta(h);
    (*m).arena = arena;
    (*m).size = count;
    (*m).capacity = count;
    (*m).elem_size = elem;
    if !src.is_null() && count > 0 {
        core::ptr::copy_nonoverlapping(src, data(h), count * elem);
    }
    arena::end_transaction(h);
    (*h).copy_callback = cb;
    h
}

/// Fresh flat array, optionally seeded from `src`.
pub unsafe fn create(arena: *mut Arena, count: usize, elem: usize, src: *const u8) -> *mut Handle {
    create_raw(arena, count, elem, src, Some(flat_copy_callback))
}

/// Fresh array of `count` copies of `default`.
pub unsafe fn alloc_fill(arena: *mut Arena, count: usize, elem: usize, default: *const u8) -> *mut Handle {
    let h = create_raw(arena, count, elem, core::ptr::null(), Some(flat_copy_callback));
    if h.is_null() {
        return h;
    }
    arena::begin_transaction(h);
    let base = data(h);
    for i in 0..count {
        core::ptr::copy_nonoverlapping(default, base.add(i * elem), elem);
    }
    arena::end_transaction(h);
    h
}

/// `[start, end)` as a long array; empty when `end <= start`.
pub unsafe fn range(arena: *mut Arena, start: i64, end: i64) -> *mut Handle {
    let count = if end > start { (end - start) as usize } else { 0 };
    let h = create(arena, count, 8, core::ptr::null());
    if h.is_null() {
        return h;
    }
    arena::begin_transaction(h);
    let base = data(h).cast::<i64>();
    for i in 0..count {
        *base.add(i) = start + i as i64;
    }
    arena::end_transaction(h);
    h
}

/// Fresh array with handle-pointer slots, seeded and deep-promoting.
pub unsafe fn create_handles(arena: *mut Arena, count: usize, src: *const *mut Handle) -> *mut Handle {
    create_raw(arena, count, PTR_SIZE, src.cast(), Some(handle_array_copy_callback))
}

/// Fresh string array from C string pointers; each element is duped into
/// `arena`.
pub unsafe fn create_string(arena: *mut Arena, count: usize, src: *const *const c_char) -> *mut Handle {
    let h = create_raw(arena, count, PTR_SIZE, core::ptr::null(), Some(handle_array_copy_callback));
    if h.is_null() {
        return h;
    }
    arena::begin_transaction(h);
    for i in 0..count {
        arena::renew_transaction(h);
        let s = if src.is_null() { core::ptr::null() } else { *src.add(i) };
        let dup = if s.is_null() {
            string::from_str(arena, "")
        } else {
            arena::strdup(arena, s)
        };
        *data(h).cast::<*mut Handle>().add(i) = dup;
    }
    arena::end_transaction(h);
    h
}

/// String array of `count` copies of `default`.
pub unsafe fn alloc_string(arena: *mut Arena, count: usize, default: *const c_char) -> *mut Handle {
    let h = create_raw(arena, count, PTR_SIZE, core::ptr::null(), Some(handle_array_copy_callback));
    if h.is_null() {
        return h;
    }
    arena::begin_transaction(h);
    for i in 0..count {
        arena::renew_transaction(h);
        let dup = if default.is_null() {
            string::from_str(arena, "")
        } else {
            arena::strdup(arena, default)
        };
        *data(h).cast::<*mut Handle>().add(i) = dup;
    }
    arena::end_transaction(h);
    h
}

/// Fresh `any[]` seeded from boxed values.
pub unsafe fn create_any(arena: *mut Arena, count: usize, src: *const Any) -> *mut Handle {
    create_raw(
        arena,
        count,
        core::mem::size_of::<Any>(),
        src.cast(),
        Some(any_array_copy_callback),
    )
}

/// Deep copy with the same element size, into `arena`. The copy callback
/// travels with the result so later promotions stay deep.
pub unsafe fn clone_in(arena: *mut Arena, h: *mut Handle, elem: usize) -> *mut Handle {
    if h.is_null() {
        return core::ptr::null_mut();
    }
    arena::begin_transaction(h);
    let result = create_raw(arena, length(h), elem, data(h), (*h).copy_callback);
    arena::end_transaction(h);
    result
}

pub unsafe fn clone(h: *mut Handle, elem: usize) -> *mut Handle {
    if h.is_null() {
        return core::ptr::null_mut();
    }
    clone_in((*h).arena, h, elem)
}

/// String-array clone: the outer array and every element are re-duped into
/// `arena`.
pub unsafe fn clone_string_in(arena: *mut Arena, h: *mut Handle) -> *mut Handle {
    if h.is_null() {
        return core::ptr::null_mut();
    }
    let out = clone_in(arena, h, PTR_SIZE);
    arena::begin_transaction(out);
    for slot in handle_slots(out) {
        arena::renew_transaction(out);
        *slot = arena::strdup(arena, string_payload(*slot));
    }
    arena::end_transaction(out);
    out
}

unsafe fn string_payload(h: *mut Handle) -> *const c_char {
    if h.is_null() || (*h).ptr.is_null() {
        c"".as_ptr()
    } else {
        (*h).ptr.cast()
    }
}

/// New array holding `a`'s elements followed by `b`'s, in `a`'s arena (or
/// `b`'s when `a` is null).
pub unsafe fn concat(a: *mut Handle, b: *mut Handle, elem: usize) -> *mut Handle {
    if a.is_null() && b.is_null() {
        return core::ptr::null_mut();
    }
    let arena = if a.is_null() { (*b).arena } else { (*a).arena };
    if !a.is_null() {
        arena::begin_transaction(a);
    }
    if !b.is_null() {
        arena::begin_transaction(b);
    }
    let (la, lb) = (length(a), length(b));
    let h = create_raw(
        arena,
        la + lb,
        elem,
        core::ptr::null(),
        if a.is_null() { (*b).copy_callback } else { (*a).copy_callback },
    );
    if !h.is_null() {
        arena::begin_transaction(h);
        if la > 0 {
            core::ptr::copy_nonoverlapping(data(a), data(h), la * elem);
        }
        if lb > 0 {
            core::ptr::copy_nonoverlapping(data(b), data(h).add(la * elem), lb * elem);
        }
        arena::end_transaction(h);
    }
    if !b.is_null() {
        arena::end_transaction(b);
    }
    if !a.is_null() {
        arena::end_transaction(a);
    }
    h
}

/// Sentinel for a defaulted slice bound.
pub const SLICE_DEFAULT: i64 = i64::MIN;

/// Computes the concrete `(start, end, step, len)` of a slice request.
///
/// Negative indices count from the end, `SLICE_DEFAULT` picks the
/// direction-appropriate endpoint, step 0 is treated as 1, and both bounds
/// clamp direction-sensitively.
fn slice_bounds(len: usize, start: i64, end: i64, step: i64) -> (i64, i64, i64, usize) {
    let n = len as i64;
    let step = if step == 0 || step == SLICE_DEFAULT { 1 } else { step };
    let mut start = if start == SLICE_DEFAULT {
        if step > 0 { 0 } else { n - 1 }
    } else if start < 0 {
        n + start
    } else {
        start
    };
    let mut end = if end == SLICE_DEFAULT {
        if step > 0 { n } else { -1 }
    } else if end < 0 {
        n + end
    } else {
        end
    };
    if step > 0 {
        start = start.clamp(0, n);
        end = end.clamp(0, n);
    } else {
        start = start.clamp(-1, n - 1);
        end = end.clamp(-1, n - 1);
    }
    let count = if step > 0 {
        if end > start { ((end - start) + step - 1) / step } else { 0 }
    } else if start > end {
        ((start - end) + (-step) - 1) / -step
    } else {
        0
    };
    (start, end, step, count as usize)
}

/// New array holding the requested sub-sequence.
pub unsafe fn slice(h: *mut Handle, start: i64, end: i64, step: i64, elem: usize) -> *mut Handle {
    if h.is_null() {
        return core::ptr::null_mut();
    }
    let arena = (*h).arena;
    arena::begin_transaction(h);
    let (start, _end, step, count) = slice_bounds(length(h), start, end, step);
    let out = create_raw(arena, count, elem, core::ptr::null(), (*h).copy_callback);
    if !out.is_null() {
        arena::begin_transaction(out);
        let mut idx = start;
        for i in 0..count {
            arena::renew_transaction(out);
            arena::renew_transaction(h);
            core::ptr::copy_nonoverlapping(
                data(h).add(idx as usize * elem),
                data(out).add(i * elem),
                elem,
            );
            idx += step;
        }
        arena::end_transaction(out);
    }
    arena::end_transaction(h);
    out
}

/// Slice of a string array: selected strings are re-duped into the target
/// arena so the result owns its contents.
pub unsafe fn slice_string(h: *mut Handle, start: i64, end: i64, step: i64) -> *mut Handle {
    let out = slice(h, start, end, step, PTR_SIZE);
    if out.is_null() {
        return out;
    }
    let arena = (*out).arena;
    arena::begin_transaction(out);
    for slot in handle_slots(out) {
        arena::renew_transaction(out);
        *slot = arena::strdup(arena, string_payload(*slot));
    }
    arena::end_transaction(out);
    out
}

/// New array, same length, reversed.
pub unsafe fn reverse(h: *mut Handle, elem: usize) -> *mut Handle {
    if h.is_null() {
        return core::ptr::null_mut();
    }
    let arena = (*h).arena;
    arena::begin_transaction(h);
    let len = length(h);
    let out = create_raw(arena, len, elem, core::ptr::null(), (*h).copy_callback);
    if !out.is_null() {
        arena::begin_transaction(out);
        for i in 0..len {
            arena::renew_transaction(out);
            arena::renew_transaction(h);
            core::ptr::copy_nonoverlapping(
                data(h).add((len - 1 - i) * elem),
                data(out).add(i * elem),
                elem,
            );
        }
        arena::end_transaction(out);
    }
    arena::end_transaction(h);
    out
}

pub unsafe fn reverse_string(h: *mut Handle) -> *mut Handle {
    let out = reverse(h, PTR_SIZE);
    if out.is_null() {
        return out;
    }
    let arena = (*out).arena;
    arena::begin_transaction(out);
    for slot in handle_slots(out) {
        arena::renew_transaction(out);
        *slot = arena::strdup(arena, string_payload(*slot));
    }
    arena::end_transaction(out);
    out
}

/// New array without the element at `index`; out-of-range yields a clone.
pub unsafe fn remove(h: *mut Handle, index: i64, elem: usize) -> *mut Handle {
    if h.is_null() {
        return core::ptr::null_mut();
    }
    let len = length(h);
    let mut index = index;
    if index < 0 {
        index += len as i64;
    }
    if index < 0 || index >= len as i64 {
        return clone(h, elem);
    }
    let index = index as usize;
    let arena = (*h).arena;
    arena::begin_transaction(h);
    let out = create_raw(arena, len - 1, elem, core::ptr::null(), (*h).copy_callback);
    if !out.is_null() {
        arena::begin_transaction(out);
        if index > 0 {
            core::ptr::copy_nonoverlapping(data(h), data(out), index * elem);
        }
        if index < len - 1 {
            core::ptr::copy_nonoverlapping(
                data(h).add((index + 1) * elem),
                data(out).add(index * elem),
                (len - index - 1) * elem,
            );
        }
        arena::end_transaction(out);
    }
    arena::end_transaction(h);
    out
}

/// New array with `elem_ptr` inserted before `index`. A negative index
/// wraps (`-1` appends); out-of-range clamps to an endpoint.
pub unsafe fn insert(h: *mut Handle, elem_ptr: *const u8, index: i64, elem: usize) -> *mut Handle {
    if h.is_null() {
        return core::ptr::null_mut();
    }
    let len = length(h);
    let mut index = index;
    if index < 0 {
        index += len as i64 + 1;
    }
    let index = index.clamp(0, len as i64) as usize;
    let arena = (*h).arena;
    arena::begin_transaction(h);
    let out = create_raw(arena, len + 1, elem, core::ptr::null(), (*h).copy_callback);
    if !out.is_null() {
        arena::begin_transaction(out);
        if index > 0 {
            core::ptr::copy_nonoverlapping(data(h), data(out), index * elem);
        }
        core::ptr::copy_nonoverlapping(elem_ptr, data(out).add(index * elem), elem);
        if index < len {
            core::ptr::copy_nonoverlapping(
                data(h).add(index * elem),
                data(out).add((index + 1) * elem),
                (len - index) * elem,
            );
        }
        arena::end_transaction(out);
    }
    arena::end_transaction(h);
    out
}

/// Amortized in-place append.
///
/// Appends into spare capacity when possible; otherwise grows 2x into a
/// fresh handle allocated in `arena`, frees the old handle, and returns the
/// new one. A null `h` allocates a fresh array with capacity 4. Callers
/// must always store the returned handle back.
pub unsafe fn push(arena: *mut Arena, h: *mut Handle, elem_ptr: *const u8, elem: usize) -> *mut Handle {
    if h.is_null() {
        let cap = 4;
        let out = arena::alloc(arena, HEADER + cap * elem);
        if out.is_null() {
            return out;
        }
        arena::begin_transaction(out);
        let m = meta(out);
        (*m).arena = arena;
        (*m).size = 1;
        (*m).capacity = cap;
        (*m).elem_size = elem;
        core::ptr::copy_nonoverlapping(elem_ptr, data(out), elem);
        arena::end_transaction(out);
        (*out).copy_callback = Some(flat_copy_callback);
        return out;
    }

    arena::begin_transaction(h);
    let m = meta(h);
    if (*m).size < (*m).capacity {
        core::ptr::copy_nonoverlapping(elem_ptr, data(h).add((*m).size * elem), elem);
        (*m).size += 1;
        arena::end_transaction(h);
        return h;
    }

    let old_size = (*m).size;
    let new_cap = if (*m).capacity == 0 { 4 } else { (*m).capacity * 2 };
    let out = arena::alloc(arena, HEADER + new_cap * elem);
    if out.is_null() {
        arena::end_transaction(h);
        return out;
    }
    arena::begin_transaction(out);
    let nm = meta(out);
    core::ptr::copy_nonoverlapping(data(h), data(out), old_size * elem);
    (*nm).arena = arena;
    (*nm).size = old_size + 1;
    (*nm).capacity = new_cap;
    (*nm).elem_size = elem;
    core::ptr::copy_nonoverlapping(elem_ptr, data(out).add(old_size * elem), elem);
    (*out).copy_callback = (*h).copy_callback;
    arena::end_transaction(out);
    arena::end_transaction(h);
    arena::free(h);
    out
}

/// Non-mutating append: always allocates a fresh array.
pub unsafe fn push_copy(h: *mut Handle, elem_ptr: *const u8, elem: usize) -> *mut Handle {
    if h.is_null() {
        return core::ptr::null_mut();
    }
    let arena = (*h).arena;
    arena::begin_transaction(h);
    let len = length(h);
    let out = create_raw(arena, len + 1, elem, core::ptr::null(), (*h).copy_callback);
    if !out.is_null() {
        arena::begin_transaction(out);
        if len > 0 {
            core::ptr::copy_nonoverlapping(data(h), data(out), len * elem);
        }
        core::ptr::copy_nonoverlapping(elem_ptr, data(out).add(len * elem), elem);
        arena::end_transaction(out);
    }
    arena::end_transaction(h);
    out
}

/// Removes the last element into `out`; an empty array yields the element
/// type's zero.
pub unsafe fn pop(h: *mut Handle, out: *mut u8, elem: usize) {
    if h.is_null() || out.is_null() {
        return;
    }
    arena::begin_transaction(h);
    let m = meta(h);
    if (*m).size == 0 {
        arena::end_transaction(h);
        core::ptr::write_bytes(out, 0, elem);
        return;
    }
    (*m).size -= 1;
    core::ptr::copy_nonoverlapping(data(h).add((*m).size * elem), out, elem);
    arena::end_transaction(h);
}

/// Sets size to 0, keeping capacity.
pub unsafe fn clear(h: *mut Handle) {
    if h.is_null() {
        return;
    }
    arena::begin_transaction(h);
    (*meta(h)).size = 0;
    arena::end_transaction(h);
}

/// First index of `elem_ptr` by byte comparison, or -1.
pub unsafe fn index_of(h: *mut Handle, elem_ptr: *const u8, elem: usize) -> i64 {
    if h.is_null() || elem_ptr.is_null() {
        return -1;
    }
    arena::begin_transaction(h);
    let len = length(h);
    let needle = core::slice::from_raw_parts(elem_ptr, elem);
    for i in 0..len {
        arena::renew_transaction(h);
        let candidate = core::slice::from_raw_parts(data(h).add(i * elem), elem);
        if candidate == needle {
            arena::end_transaction(h);
            return i as i64;
        }
    }
    arena::end_transaction(h);
    -1
}

pub unsafe fn contains(h: *mut Handle, elem_ptr: *const u8, elem: usize) -> bool {
    index_of(h, elem_ptr, elem) >= 0
}

/// Length plus byte-wise element comparison.
pub unsafe fn eq(a: *mut Handle, b: *mut Handle, elem: usize) -> bool {
    let (la, lb) = (length(a), length(b));
    if la != lb {
        return false;
    }
    if la == 0 {
        return true;
    }
    arena::begin_transaction(a);
    arena::begin_transaction(b);
    let sa = core::slice::from_raw_parts(data(a), la * elem);
    let sb = core::slice::from_raw_parts(data(b), la * elem);
    let result = sa == sb;
    arena::end_transaction(b);
    arena::end_transaction(a);
    result
}

/// First index of the string `elem` by contents, or -1.
pub unsafe fn index_of_string(h: *mut Handle, elem: *const c_char) -> i64 {
    if h.is_null() {
        return -1;
    }
    let needle = if elem.is_null() {
        ""
    } else {
        core::ffi::CStr::from_ptr(elem).to_str().unwrap_or("")
    };
    arena::begin_transaction(h);
    let result = handle_slots(h)
        .iter()
        .position(|&s| string::as_str(s) == needle)
        .map_or(-1, |i| i as i64);
    arena::end_transaction(h);
    result
}

pub unsafe fn contains_string(h: *mut Handle, elem: *const c_char) -> bool {
    index_of_string(h, elem) >= 0
}

/// Length plus element-wise content comparison for string arrays.
pub unsafe fn eq_string(a: *mut Handle, b: *mut Handle) -> bool {
    let (la, lb) = (length(a), length(b));
    if la != lb {
        return false;
    }
    if la == 0 {
        return true;
    }
    arena::begin_transaction(a);
    arena::begin_transaction(b);
    let result = handle_slots(a)
        .iter()
        .zip(handle_slots(b).iter())
        .all(|(&x, &y)| string::eq(x, y));
    arena::end_transaction(b);
    arena::end_transaction(a);
    result
}

/// The `main` args array: one duped string per argv entry.
pub unsafe fn args_create(arena: *mut Arena, argc: i32, argv: *const *const c_char) -> *mut Handle {
    if argc <= 0 || argv.is_null() {
        return create_string(arena, 0, core::ptr::null());
    }
    create_string(arena, argc as usize, argv)
}

// ---------------------------------------------------------------------------
// Deep promotion helpers
// ---------------------------------------------------------------------------

unsafe fn promote_outer_with(
    dest: *mut Arena,
    h: *mut Handle,
    promote_slot: unsafe fn(*mut Arena, *mut Handle) -> *mut Handle,
) -> *mut Handle {
    if h.is_null() {
        return core::ptr::null_mut();
    }
    if (*h).arena == dest {
        return h;
    }
    let len = length(h);
    let out = create_raw(dest, len, PTR_SIZE, core::ptr::null(), (*h).copy_callback);
    if out.is_null() {
        return out;
    }
    arena::begin_transaction(h);
    arena::begin_transaction(out);
    for i in 0..len {
        arena::renew_transaction(h);
        arena::renew_transaction(out);
        let slot = *data(h).cast::<*mut Handle>().add(i);
        *data(out).cast::<*mut Handle>().add(i) = promote_slot(dest, slot);
    }
    arena::end_transaction(out);
    arena::end_transaction(h);
    arena::free(h);
    out
}

unsafe fn promote_plain(dest: *mut Arena, h: *mut Handle) -> *mut Handle {
    arena::promote(dest, h)
}

/// Promotes `str[]`: the outer array and every string element.
pub unsafe fn promote_array_string(dest: *mut Arena, h: *mut Handle) -> *mut Handle {
    promote_outer_with(dest, h, promote_plain)
}

/// Promotes `T[][]`: the outer array and every inner array handle.
pub unsafe fn promote_array_handle(dest: *mut Arena, h: *mut Handle) -> *mut Handle {
    promote_outer_with(dest, h, promote_plain)
}

/// Promotes `T[][][]`: all three levels of handles.
pub unsafe fn promote_array_handle_3d(dest: *mut Arena, h: *mut Handle) -> *mut Handle {
    promote_outer_with(dest, h, promote_array_handle)
}

/// Promotes `str[][]`: outer, inner arrays, and strings.
pub unsafe fn promote_array2_string(dest: *mut Arena, h: *mut Handle) -> *mut Handle {
    promote_outer_with(dest, h, promote_array_string)
}

/// Promotes `str[][][]`: every level and every string.
pub unsafe fn promote_array3_string(dest: *mut Arena, h: *mut Handle) -> *mut Handle {
    promote_outer_with(dest, h, promote_array2_string)
}

// ---------------------------------------------------------------------------
// Stringification and joins
// ---------------------------------------------------------------------------

/// Formats `{a, b, c}` from a per-element renderer.
unsafe fn brace_join(h: *mut Handle, elem: usize, render: impl Fn(*const u8) -> String) -> String {
    let len = length(h);
    let mut out = String::from("{");
    for i in 0..len {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&render(data(h).add(i * elem).cast_const()));
    }
    out.push('}');
    out
}

unsafe fn sep_join(h: *mut Handle, elem: usize, sep: &str, render: impl Fn(*const u8) -> String) -> String {
    let len = length(h);
    let mut out = String::new();
    for i in 0..len {
        if i > 0 {
            out.push_str(sep);
        }
        out.push_str(&render(data(h).add(i * elem).cast_const()));
    }
    out
}

/// Renders one element of a flat array by tag.
unsafe fn render_elem(tag: Tag, p: *const u8) -> String {
    match tag {
        Tag::Long | Tag::Int => p.cast::<i64>().read().to_string(),
        Tag::Int32 => p.cast::<i32>().read().to_string(),
        Tag::UInt => p.cast::<u64>().read().to_string(),
        Tag::UInt32 => p.cast::<u32>().read().to_string(),
        Tag::Double => string::format_double(p.cast::<f64>().read()),
        Tag::Float => string::format_double(f64::from(p.cast::<f32>().read())),
        Tag::Char => ((p.cast::<c_char>().read() as u8) as char).to_string(),
        Tag::Bool => if p.cast::<i32>().read() != 0 { "true".into() } else { "false".into() },
        Tag::Byte => p.cast::<u8>().read().to_string(),
        Tag::Str => string::as_str(p.cast::<*mut Handle>().read()).to_owned(),
        _ => "<value>".into(),
    }
}

const fn tag_elem_size(tag: Tag) -> usize {
    match tag {
        Tag::Long | Tag::Int | Tag::UInt => 8,
        Tag::Int32 | Tag::UInt32 | Tag::Bool => 4,
        Tag::Double => 8,
        Tag::Float => 4,
        Tag::Char | Tag::Byte => 1,
        _ => PTR_SIZE,
    }
}

/// `{…}` rendering of a flat or string array.
pub unsafe fn to_string_elems(arena: *mut Arena, h: *mut Handle, tag: Tag) -> *mut Handle {
    if h.is_null() {
        return string::from_str(arena, "{}");
    }
    arena::begin_transaction(h);
    let s = brace_join(h, tag_elem_size(tag), |p| render_elem(tag, p));
    arena::end_transaction(h);
    string::from_str(arena, &s)
}

/// `{…}` rendering of a 2-D array (outer slots are inner array handles).
pub unsafe fn to_string_elems_2d(arena: *mut Arena, h: *mut Handle, tag: Tag) -> *mut Handle {
    if h.is_null() {
        return string::from_str(arena, "{}");
    }
    arena::begin_transaction(h);
    let s = brace_join(h, PTR_SIZE, |p| {
        let inner = p.cast::<*mut Handle>().read();
        let rendered = to_string_elems(arena, inner, tag);
        string::as_str(rendered).to_owned()
    });
    arena::end_transaction(h);
    string::from_str(arena, &s)
}

/// `{…}` rendering of a 3-D array.
pub unsafe fn to_string_elems_3d(arena: *mut Arena, h: *mut Handle, tag: Tag) -> *mut Handle {
    if h.is_null() {
        return string::from_str(arena, "{}");
    }
    arena::begin_transaction(h);
    let s = brace_join(h, PTR_SIZE, |p| {
        let inner = p.cast::<*mut Handle>().read();
        let rendered = to_string_elems_2d(arena, inner, tag);
        string::as_str(rendered).to_owned()
    });
    arena::end_transaction(h);
    string::from_str(arena, &s)
}

/// Separator join of a flat or string array.
pub unsafe fn join_elems(arena: *mut Arena, h: *mut Handle, tag: Tag, sep: *const c_char) -> *mut Handle {
    let sep = if sep.is_null() {
        ""
    } else {
        core::ffi::CStr::from_ptr(sep).to_str().unwrap_or("")
    };
    if h.is_null() {
        return string::from_str(arena, "");
    }
    arena::begin_transaction(h);
    let s = sep_join(h, tag_elem_size(tag), sep, |p| render_elem(tag, p));
    arena::end_transaction(h);
    string::from_str(arena, &s)
}

/// Rendering used by `any` stringification for boxed arrays.
pub unsafe fn any_array_to_string(arena: *mut Arena, v: Any) -> *mut Handle {
    let h = v.value.h;
    if h.is_null() {
        return string::from_str(arena, "{}");
    }
    if v.element_tag == Tag::Nil as i32 {
        arena::begin_transaction(h);
        let s = brace_join(h, core::mem::size_of::<Any>(), |p| {
            let elem = p.cast::<Any>().read();
            string::as_str(any::to_string(arena, elem)).to_owned()
        });
        arena::end_transaction(h);
        string::from_str(arena, &s)
    } else {
        let tag = Tag::from_i32(v.element_tag).unwrap_or(Tag::Nil);
        to_string_elems(arena, h, tag)
    }
}

// ---------------------------------------------------------------------------
// Typed-array -> any[] conversion
// ---------------------------------------------------------------------------

/// Boxes every element of a flat or string array into a fresh `any[]`.
pub unsafe fn to_any(arena: *mut Arena, h: *mut Handle, tag: Tag) -> *mut Handle {
    let len = length(h);
    let out = create_raw(
        arena,
        len,
        core::mem::size_of::<Any>(),
        core::ptr::null(),
        Some(any_array_copy_callback),
    );
    if out.is_null() || h.is_null() {
        return out;
    }
    arena::begin_transaction(h);
    arena::begin_transaction(out);
    let elem = tag_elem_size(tag);
    for i in 0..len {
        arena::renew_transaction(h);
        arena::renew_transaction(out);
        let p = data(h).add(i * elem);
        let boxed = match tag {
            Tag::Long | Tag::Int => any::box_long(p.cast::<i64>().read()),
            Tag::Int32 => any::box_int32(p.cast::<i32>().read()),
            Tag::UInt => any::box_uint(p.cast::<u64>().read()),
            Tag::UInt32 => any::box_uint32(p.cast::<u32>().read()),
            Tag::Double => any::box_double(p.cast::<f64>().read()),
            Tag::Float => any::box_float(p.cast::<f32>().read()),
            Tag::Char => any::box_char(p.cast::<c_char>().read()),
            Tag::Bool => any::box_bool(p.cast::<i32>().read() != 0),
            Tag::Byte => any::box_byte(p.cast::<u8>().read()),
            Tag::Str => any::box_string(p.cast::<*mut Handle>().read()),
            _ => Any::nil(),
        };
        *data(out).cast::<Any>().add(i) = boxed;
    }
    arena::end_transaction(out);
    arena::end_transaction(h);
    out
}

/// Converts `T[][]` into `any[][]`: a fresh outer handle array whose inner
/// arrays are each converted with [`to_any`].
pub unsafe fn to_any_2d(arena: *mut Arena, h: *mut Handle, tag: Tag) -> *mut Handle {
    let len = length(h);
    let out = create_raw(arena, len, PTR_SIZE, core::ptr::null(), Some(handle_array_copy_callback));
    if out.is_null() || h.is_null() {
        return out;
    }
    arena::begin_transaction(h);
    arena::begin_transaction(out);
    for i in 0..len {
        arena::renew_transaction(h);
        arena::renew_transaction(out);
        let inner = *data(h).cast::<*mut Handle>().add(i);
        *data(out).cast::<*mut Handle>().add(i) = to_any(arena, inner, tag);
    }
    arena::end_transaction(out);
    arena::end_transaction(h);
    out
}

/// Converts `T[][][]` into `any[][][]`.
pub unsafe fn to_any_3d(arena: *mut Arena, h: *mut Handle, tag: Tag) -> *mut Handle {
    let len = length(h);
    let out = create_raw(arena, len, PTR_SIZE, core::ptr::null(), Some(handle_array_copy_callback));
    if out.is_null() || h.is_null() {
        return out;
    }
    arena::begin_transaction(h);
    arena::begin_transaction(out);
    for i in 0..len {
        arena::renew_transaction(h);
        arena::renew_transaction(out);
        let inner = *data(h).cast::<*mut Handle>().add(i);
        *data(out).cast::<*mut Handle>().add(i) = to_any_2d(arena, inner, tag);
    }
    arena::end_transaction(out);
    arena::end_transaction(h);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    // The parent module's `any` import shadows proptest's strategy of the
    // same name; the alias keeps both usable.
    use proptest::prelude::any as arb;

    fn with_arena<T>(f: impl FnOnce(*mut Arena) -> T) -> T {
        unsafe {
            let a = arena::create(core::ptr::null_mut());
            let out = f(a);
            arena::destroy(a);
            drop(Box::from_raw(a));
            out
        }
    }

    unsafe fn longs(a: *mut Arena, v: &[i64]) -> *mut Handle {
        create(a, v.len(), 8, v.as_ptr().cast())
    }

    unsafe fn read_longs(h: *mut Handle) -> Vec<i64> {
        let len = length(h);
        (0..len).map(|i| data(h).cast::<i64>().add(i).read()).collect()
    }

    #[test]
    fn range_is_half_open() {
        with_arena(|a| unsafe {
            assert_eq!(read_longs(range(a, 2, 6)), vec![2, 3, 4, 5]);
            assert_eq!(length(range(a, 5, 5)), 0);
            assert_eq!(length(range(a, 7, 3)), 0);
        });
    }

    #[test]
    fn push_grows_and_frees_old_handle() {
        with_arena(|a| unsafe {
            let mut h = core::ptr::null_mut();
            for i in 0..10i64 {
                h = push(a, h, core::ptr::addr_of!(i).cast(), 8);
            }
            assert_eq!(read_longs(h), (0..10).collect::<Vec<_>>());
            assert!((*meta(h)).capacity >= 10);
        });
    }

    #[test]
    fn pop_empty_yields_zero() {
        with_arena(|a| unsafe {
            let h = longs(a, &[]);
            let mut out = 42i64;
            pop(h, core::ptr::addr_of_mut!(out).cast(), 8);
            assert_eq!(out, 0);
        });
    }

    #[test]
    fn slice_defaults_and_negative_step() {
        with_arena(|a| unsafe {
            let h = longs(a, &[0, 1, 2, 3, 4]);
            let s = slice(h, 1, 4, 1, 8);
            assert_eq!(read_longs(s), vec![1, 2, 3]);
            let r = slice(h, SLICE_DEFAULT, SLICE_DEFAULT, -1, 8);
            assert_eq!(read_longs(r), vec![4, 3, 2, 1, 0]);
            let mid = slice(h, 3, 0, -2, 8);
            assert_eq!(read_longs(mid), vec![3, 1]);
            // Step 0 behaves as step 1.
            assert_eq!(read_longs(slice(h, 0, 3, 0, 8)), vec![0, 1, 2]);
        });
    }

    #[test]
    fn insert_clamps_to_endpoints() {
        with_arena(|a| unsafe {
            let h = longs(a, &[1, 2, 3]);
            let big = 9i64;
            let at_end = insert(h, core::ptr::addr_of!(big).cast(), 100, 8);
            assert_eq!(read_longs(at_end), vec![1, 2, 3, 9]);
            let at_front = insert(h, core::ptr::addr_of!(big).cast(), -4, 8);
            assert_eq!(read_longs(at_front), vec![9, 1, 2, 3]);
        });
    }

    #[test]
    fn remove_out_of_range_clones() {
        with_arena(|a| unsafe {
            let h = longs(a, &[1, 2, 3]);
            let c = remove(h, 10, 8);
            assert_ne!(c, h);
            assert_eq!(read_longs(c), vec![1, 2, 3]);
            assert_eq!(read_longs(remove(h, 1, 8)), vec![1, 3]);
        });
    }

    #[test]
    fn string_arrays_compare_by_contents() {
        with_arena(|a| unsafe {
            let src = [c"ab".as_ptr(), c"cd".as_ptr()];
            let x = create_string(a, 2, src.as_ptr());
            let y = create_string(a, 2, src.as_ptr());
            assert!(eq_string(x, y));
            assert_eq!(index_of_string(x, c"cd".as_ptr()), 1);
            assert!(contains_string(x, c"ab".as_ptr()));
            assert!(!contains_string(x, c"zz".as_ptr()));
        });
    }

    #[test]
    fn promote_string_array_preserves_contents() {
        unsafe {
            let src_arena = arena::create(core::ptr::null_mut());
            let dst_arena = arena::create(core::ptr::null_mut());
            let src = [c"one".as_ptr(), c"two".as_ptr()];
            let h = create_string(src_arena, 2, src.as_ptr());
            let moved = promote_array_string(dst_arena, h);
            assert_eq!((*moved).arena, dst_arena);
            let slots = handle_slots(moved);
            assert_eq!(string::as_str(slots[0]), "one");
            assert_eq!(string::as_str(slots[1]), "two");
            assert!((*h).dead);
            arena::destroy(src_arena);
            arena::destroy(dst_arena);
            drop(Box::from_raw(src_arena));
            drop(Box::from_raw(dst_arena));
        }
    }

    #[test]
    fn stringify_brace_format() {
        with_arena(|a| unsafe {
            let empty = longs(a, &[]);
            assert_eq!(string::as_str(to_string_elems(a, empty, Tag::Long)), "{}");
            let one = longs(a, &[7]);
            assert_eq!(string::as_str(to_string_elems(a, one, Tag::Long)), "{7}");
            let many = longs(a, &[0, 1, 2]);
            assert_eq!(string::as_str(to_string_elems(a, many, Tag::Long)), "{0, 1, 2}");
        });
    }

    #[test]
    fn join_uses_separator() {
        with_arena(|a| unsafe {
            let h = longs(a, &[1, 2, 3]);
            assert_eq!(string::as_str(join_elems(a, h, Tag::Long, c"-".as_ptr())), "1-2-3");
        });
    }

    #[test]
    fn typed_array_boxes_to_any() {
        with_arena(|a| unsafe {
            let h = longs(a, &[4, 5]);
            let anys = to_any(a, h, Tag::Long);
            let slots = any_slots(anys);
            assert_eq!(crate::any::unbox_long(slots[0]), 4);
            assert_eq!(crate::any::unbox_long(slots[1]), 5);
        });
    }

    proptest! {
        #[test]
        fn push_copy_appends(v in proptest::collection::vec(arb::<i64>(), 0..32), e in arb::<i64>()) {
            with_arena(|a| unsafe {
                let h = longs(a, &v);
                let out = push_copy(h, core::ptr::addr_of!(e).cast(), 8);
                prop_assert_eq!(length(out), v.len() + 1);
                prop_assert!(contains(out, core::ptr::addr_of!(e).cast(), 8));
                prop_assert_eq!(length(h), v.len());
                Ok(())
            })?;
        }

        #[test]
        fn reverse_is_involutive(v in proptest::collection::vec(arb::<i64>(), 0..32)) {
            with_arena(|a| unsafe {
                let h = longs(a, &v);
                let back = reverse(reverse(h, 8), 8);
                prop_assert_eq!(read_longs(back), v.clone());
                Ok(())
            })?;
        }

        #[test]
        fn concat_with_empty_is_identity(v in proptest::collection::vec(arb::<i64>(), 0..32)) {
            with_arena(|a| unsafe {
                let h = longs(a, &v);
                let empty = longs(a, &[]);
                prop_assert_eq!(read_longs(concat(h, empty, 8)), v.clone());
                prop_assert_eq!(read_longs(concat(empty, h, 8)), v.clone());
                Ok(())
            })?;
        }

        #[test]
        fn identity_subslice_is_idempotent(v in proptest::collection::vec(arb::<i64>(), 0..32), i in 0i64..32, j in 0i64..32) {
            with_arena(|a| unsafe {
                let h = longs(a, &v);
                let once = slice(h, i, j, 1, 8);
                let twice = slice(once, 0, j - i, 1, 8);
                prop_assert_eq!(read_longs(twice), read_longs(once));
                Ok(())
            })?;
        }

        #[test]
        fn clone_preserves_contents(v in proptest::collection::vec(arb::<i64>(), 0..32)) {
            with_arena(|a| unsafe {
                let h = longs(a, &v);
                let c = clone(h, 8);
                prop_assert_ne!(c, h);
                prop_assert_eq!(read_longs(c), v.clone());
                prop_assert!(eq(c, h, 8));
                Ok(())
            })?;
        }
    }
}
