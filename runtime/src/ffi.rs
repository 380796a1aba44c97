//! The `sn_`-prefixed C ABI the generated code calls.
//!
//! Every entry point takes primitive C types and `*mut Handle`. The typed
//! array families are stamped out per element variant with macros; the
//! element-type suffixes match the ones the code generator derives from
//! source types (`int` lowers to the `long` family, `bool` to C `int`
//! slots).

use core::ffi::{c_char, c_void};

use crate::any::{self, Any, Tag};
use crate::arena::{self, Arena, Handle};
use crate::array;
use crate::string;
use crate::thread::{self, ThreadEntry};

// ---------------------------------------------------------------------------
// Arena and handles
// ---------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn sn_arena_create(parent: *mut Arena) -> *mut Arena {
    arena::create(parent)
}

#[no_mangle]
pub unsafe extern "C" fn sn_arena_destroy(a: *mut Arena) {
    arena::destroy(a);
}

#[no_mangle]
pub unsafe extern "C" fn sn_arena_alloc(a: *mut Arena, size: usize) -> *mut Handle {
    arena::alloc(a, size)
}

#[no_mangle]
pub unsafe extern "C" fn sn_arena_strdup(a: *mut Arena, s: *const c_char) -> *mut Handle {
    arena::strdup(a, s)
}

#[no_mangle]
pub unsafe extern "C" fn sn_arena_promote(dest: *mut Arena, h: *mut Handle) -> *mut Handle {
    arena::promote(dest, h)
}

/// Scalar string promotion; the handle carries no callbacks so the shallow
/// byte copy is the whole job.
#[no_mangle]
pub unsafe extern "C" fn sn_arena_promote_string(dest: *mut Arena, h: *mut Handle) -> *mut Handle {
    arena::promote(dest, h)
}

#[no_mangle]
pub unsafe extern "C" fn sn_arena_free(h: *mut Handle) {
    arena::free(h);
}

/// Sized value promotion: copies `size` raw bytes into a fresh allocation
/// in `dest` and returns the new payload pointer. Used for returned struct
/// values, which are not handles in the caller's frame.
#[no_mangle]
pub unsafe extern "C" fn sn_arena_promote_sized(
    dest: *mut Arena,
    p: *const c_void,
    size: usize,
) -> *mut c_void {
    let h = arena::alloc(dest, size);
    if h.is_null() {
        return core::ptr::null_mut();
    }
    if !p.is_null() {
        core::ptr::copy_nonoverlapping(p.cast::<u8>(), (*h).ptr, size);
    }
    (*h).ptr.cast()
}

/// Copies raw bytes into a fresh handle; the boxing path for struct values.
#[no_mangle]
pub unsafe extern "C" fn sn_handle_from_bytes(
    dest: *mut Arena,
    p: *const c_void,
    size: usize,
) -> *mut Handle {
    let h = arena::alloc(dest, size);
    if !h.is_null() && !p.is_null() {
        core::ptr::copy_nonoverlapping(p.cast::<u8>(), (*h).ptr, size);
    }
    h
}

#[no_mangle]
pub unsafe extern "C" fn sn_handle_begin(h: *mut Handle) {
    arena::begin_transaction(h);
}

#[no_mangle]
pub unsafe extern "C" fn sn_handle_renew(h: *mut Handle) {
    arena::renew_transaction(h);
}

#[no_mangle]
pub unsafe extern "C" fn sn_handle_end(h: *mut Handle) {
    arena::end_transaction(h);
}

// ---------------------------------------------------------------------------
// Strings and printing
// ---------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn sn_string_from(a: *mut Arena, s: *const c_char) -> *mut Handle {
    arena::strdup(a, s)
}

#[no_mangle]
pub unsafe extern "C" fn sn_string_concat(a: *mut Arena, x: *mut Handle, y: *mut Handle) -> *mut Handle {
    string::concat(a, x, y)
}

#[no_mangle]
pub unsafe extern "C" fn sn_string_eq(x: *mut Handle, y: *mut Handle) -> bool {
    string::eq(x, y)
}

#[no_mangle]
pub unsafe extern "C" fn sn_string_len(h: *mut Handle) -> i64 {
    string::len(h) as i64
}

#[no_mangle]
pub unsafe extern "C" fn sn_to_string_long(a: *mut Arena, v: i64) -> *mut Handle {
    string::to_string_long(a, v)
}

#[no_mangle]
pub unsafe extern "C" fn sn_to_string_double(a: *mut Arena, v: f64) -> *mut Handle {
    string::to_string_double(a, v)
}

#[no_mangle]
pub unsafe extern "C" fn sn_to_string_bool(a: *mut Arena, v: bool) -> *mut Handle {
    string::to_string_bool(a, v)
}

#[no_mangle]
pub unsafe extern "C" fn sn_to_string_char(a: *mut Arena, v: c_char) -> *mut Handle {
    string::to_string_char(a, v)
}

#[no_mangle]
pub unsafe extern "C" fn sn_to_string_byte(a: *mut Arena, v: u8) -> *mut Handle {
    string::to_string_byte(a, v)
}

#[no_mangle]
pub unsafe extern "C" fn sn_print_string(h: *mut Handle) {
    string::print_str(string::as_str(h), false);
}

#[no_mangle]
pub unsafe extern "C" fn sn_println_string(h: *mut Handle) {
    string::print_str(string::as_str(h), true);
}

#[no_mangle]
pub unsafe extern "C" fn sn_print_long(v: i64) {
    string::print_str(&v.to_string(), false);
}

#[no_mangle]
pub unsafe extern "C" fn sn_print_double(v: f64) {
    string::print_str(&string::format_double(v), false);
}

#[no_mangle]
pub unsafe extern "C" fn sn_print_bool(v: bool) {
    string::print_str(if v { "true" } else { "false" }, false);
}

#[no_mangle]
pub unsafe extern "C" fn sn_print_char(v: c_char) {
    string::print_str(&((v as u8) as char).to_string(), false);
}

#[no_mangle]
pub unsafe extern "C" fn sn_print_byte(v: u8) {
    string::print_str(&v.to_string(), false);
}

#[no_mangle]
pub unsafe extern "C" fn sn_println_long(v: i64) {
    string::print_str(&v.to_string(), true);
}

#[no_mangle]
pub unsafe extern "C" fn sn_println_double(v: f64) {
    string::print_str(&string::format_double(v), true);
}

#[no_mangle]
pub unsafe extern "C" fn sn_println_bool(v: bool) {
    string::print_str(if v { "true" } else { "false" }, true);
}

#[no_mangle]
pub unsafe extern "C" fn sn_println_char(v: c_char) {
    string::print_str(&((v as u8) as char).to_string(), true);
}

#[no_mangle]
pub unsafe extern "C" fn sn_println_byte(v: u8) {
    string::print_str(&v.to_string(), true);
}

// ---------------------------------------------------------------------------
// Generic array surface
// ---------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn sn_array_len(h: *mut Handle) -> i64 {
    array::length(h) as i64
}

/// Element storage pointer, past the metadata header. Indexing in generated
/// code goes through this inside a transaction bracket.
#[no_mangle]
pub unsafe extern "C" fn sn_array_data(h: *mut Handle) -> *mut c_void {
    if h.is_null() || (*h).ptr.is_null() {
        return core::ptr::null_mut();
    }
    array::data(h).cast()
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_clear(h: *mut Handle) {
    array::clear(h);
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_range(a: *mut Arena, start: i64, end: i64) -> *mut Handle {
    array::range(a, start, end)
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_create_generic(
    a: *mut Arena,
    count: usize,
    elem_size: usize,
    data: *const c_void,
) -> *mut Handle {
    array::create(a, count, elem_size, data.cast())
}

/// Deep clone with an explicit element size; used for struct arrays and
/// `as val` copies of reference arrays.
#[no_mangle]
pub unsafe extern "C" fn sn_array_clone_generic(a: *mut Arena, h: *mut Handle, elem_size: usize) -> *mut Handle {
    array::clone_in(a, h, elem_size)
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_push_struct(
    a: *mut Arena,
    h: *mut Handle,
    elem: *const c_void,
    elem_size: usize,
) -> *mut Handle {
    array::push(a, h, elem.cast(), elem_size)
}

#[no_mangle]
pub unsafe extern "C" fn sn_args_create(a: *mut Arena, argc: i32, argv: *const *const c_char) -> *mut Handle {
    array::args_create(a, argc, argv)
}

// ---------------------------------------------------------------------------
// Typed array families
// ---------------------------------------------------------------------------

macro_rules! array_family {
    ($suffix:ident, $ty:ty, $tag:ident,
     $create:ident, $alloc:ident, $clone:ident, $concat:ident, $slice:ident,
     $rev:ident, $rem:ident, $ins:ident, $push:ident, $push_copy:ident,
     $pop:ident, $index_of:ident, $contains:ident, $eq:ident,
     $to_string:ident, $to_string2:ident, $to_string3:ident, $join:ident,
     $to_any:ident, $to_any2:ident, $to_any3:ident) => {
        #[no_mangle]
        pub unsafe extern "C" fn $create(a: *mut Arena, count: usize, data: *const $ty) -> *mut Handle {
            array::create(a, count, core::mem::size_of::<$ty>(), data.cast())
        }

        #[no_mangle]
        pub unsafe extern "C" fn $alloc(a: *mut Arena, count: usize, default: $ty) -> *mut Handle {
            array::alloc_fill(a, count, core::mem::size_of::<$ty>(), core::ptr::addr_of!(default).cast())
        }

        #[no_mangle]
        pub unsafe extern "C" fn $clone(a: *mut Arena, h: *mut Handle) -> *mut Handle {
            array::clone_in(a, h, core::mem::size_of::<$ty>())
        }

        #[no_mangle]
        pub unsafe extern "C" fn $concat(ha: *mut Handle, hb: *mut Handle) -> *mut Handle {
            array::concat(ha, hb, core::mem::size_of::<$ty>())
        }

        #[no_mangle]
        pub unsafe extern "C" fn $slice(h: *mut Handle, start: i64, end: i64, step: i64) -> *mut Handle {
            array::slice(h, start, end, step, core::mem::size_of::<$ty>())
        }

        #[no_mangle]
        pub unsafe extern "C" fn $rev(h: *mut Handle) -> *mut Handle {
            array::reverse(h, core::mem::size_of::<$ty>())
        }

        #[no_mangle]
        pub unsafe extern "C" fn $rem(h: *mut Handle, index: i64) -> *mut Handle {
            array::remove(h, index, core::mem::size_of::<$ty>())
        }

        #[no_mangle]
        pub unsafe extern "C" fn $ins(h: *mut Handle, elem: $ty, index: i64) -> *mut Handle {
            array::insert(h, core::ptr::addr_of!(elem).cast(), index, core::mem::size_of::<$ty>())
        }

        #[no_mangle]
        pub unsafe extern "C" fn $push(a: *mut Arena, h: *mut Handle, elem: $ty) -> *mut Handle {
            array::push(a, h, core::ptr::addr_of!(elem).cast(), core::mem::size_of::<$ty>())
        }

        #[no_mangle]
        pub unsafe extern "C" fn $push_copy(h: *mut Handle, elem: $ty) -> *mut Handle {
            array::push_copy(h, core::ptr::addr_of!(elem).cast(), core::mem::size_of::<$ty>())
        }

        #[no_mangle]
        pub unsafe extern "C" fn $pop(h: *mut Handle) -> $ty {
            let mut out: $ty = core::mem::zeroed();
            array::pop(h, core::ptr::addr_of_mut!(out).cast(), core::mem::size_of::<$ty>());
            out
        }

        #[no_mangle]
        pub unsafe extern "C" fn $index_of(h: *mut Handle, elem: $ty) -> i64 {
            array::index_of(h, core::ptr::addr_of!(elem).cast(), core::mem::size_of::<$ty>())
        }

        #[no_mangle]
        pub unsafe extern "C" fn $contains(h: *mut Handle, elem: $ty) -> bool {
            array::contains(h, core::ptr::addr_of!(elem).cast(), core::mem::size_of::<$ty>())
        }

        #[no_mangle]
        pub unsafe extern "C" fn $eq(ha: *mut Handle, hb: *mut Handle) -> bool {
            array::eq(ha, hb, core::mem::size_of::<$ty>())
        }

        #[no_mangle]
        pub unsafe extern "C" fn $to_string(a: *mut Arena, h: *mut Handle) -> *mut Handle {
            array::to_string_elems(a, h, Tag::$tag)
        }

        #[no_mangle]
        pub unsafe extern "C" fn $to_string2(a: *mut Arena, h: *mut Handle) -> *mut Handle {
            array::to_string_elems_2d(a, h, Tag::$tag)
        }

        #[no_mangle]
        pub unsafe extern "C" fn $to_string3(a: *mut Arena, h: *mut Handle) -> *mut Handle {
            array::to_string_elems_3d(a, h, Tag::$tag)
        }

        #[no_mangle]
        pub unsafe extern "C" fn $join(a: *mut Arena, h: *mut Handle, sep: *const c_char) -> *mut Handle {
            array::join_elems(a, h, Tag::$tag, sep)
        }

        #[no_mangle]
        pub unsafe extern "C" fn $to_any(a: *mut Arena, h: *mut Handle) -> *mut Handle {
            array::to_any(a, h, Tag::$tag)
        }

        #[no_mangle]
        pub unsafe extern "C" fn $to_any2(a: *mut Arena, h: *mut Handle) -> *mut Handle {
            array::to_any_2d(a, h, Tag::$tag)
        }

        #[no_mangle]
        pub unsafe extern "C" fn $to_any3(a: *mut Arena, h: *mut Handle) -> *mut Handle {
            array::to_any_3d(a, h, Tag::$tag)
        }
    };
}

array_family!(long, i64, Long,
    sn_array_create_long, sn_array_alloc_long, sn_array_clone_long,
    sn_array_concat_long, sn_array_slice_long, sn_array_rev_long,
    sn_array_rem_long, sn_array_ins_long, sn_array_push_long,
    sn_array_push_copy_long, sn_array_pop_long, sn_array_index_of_long,
    sn_array_contains_long, sn_array_eq_long, sn_array_to_string_long,
    sn_array_to_string2_long, sn_array_to_string3_long, sn_array_join_long,
    sn_array_to_any_long, sn_array2_to_any_long, sn_array3_to_any_long);

array_family!(double, f64, Double,
    sn_array_create_double, sn_array_alloc_double, sn_array_clone_double,
    sn_array_concat_double, sn_array_slice_double, sn_array_rev_double,
    sn_array_rem_double, sn_array_ins_double, sn_array_push_double,
    sn_array_push_copy_double, sn_array_pop_double, sn_array_index_of_double,
    sn_array_contains_double, sn_array_eq_double, sn_array_to_string_double,
    sn_array_to_string2_double, sn_array_to_string3_double, sn_array_join_double,
    sn_array_to_any_double, sn_array2_to_any_double, sn_array3_to_any_double);

array_family!(char, c_char, Char,
    sn_array_create_char, sn_array_alloc_char, sn_array_clone_char,
    sn_array_concat_char, sn_array_slice_char, sn_array_rev_char,
    sn_array_rem_char, sn_array_ins_char, sn_array_push_char,
    sn_array_push_copy_char, sn_array_pop_char, sn_array_index_of_char,
    sn_array_contains_char, sn_array_eq_char, sn_array_to_string_char,
    sn_array_to_string2_char, sn_array_to_string3_char, sn_array_join_char,
    sn_array_to_any_char, sn_array2_to_any_char, sn_array3_to_any_char);

array_family!(bool, i32, Bool,
    sn_array_create_bool, sn_array_alloc_bool, sn_array_clone_bool,
    sn_array_concat_bool, sn_array_slice_bool, sn_array_rev_bool,
    sn_array_rem_bool, sn_array_ins_bool, sn_array_push_bool,
    sn_array_push_copy_bool, sn_array_pop_bool, sn_array_index_of_bool,
    sn_array_contains_bool, sn_array_eq_bool, sn_array_to_string_bool,
    sn_array_to_string2_bool, sn_array_to_string3_bool, sn_array_join_bool,
    sn_array_to_any_bool, sn_array2_to_any_bool, sn_array3_to_any_bool);

array_family!(byte, u8, Byte,
    sn_array_create_byte, sn_array_alloc_byte, sn_array_clone_byte,
    sn_array_concat_byte, sn_array_slice_byte, sn_array_rev_byte,
    sn_array_rem_byte, sn_array_ins_byte, sn_array_push_byte,
    sn_array_push_copy_byte, sn_array_pop_byte, sn_array_index_of_byte,
    sn_array_contains_byte, sn_array_eq_byte, sn_array_to_string_byte,
    sn_array_to_string2_byte, sn_array_to_string3_byte, sn_array_join_byte,
    sn_array_to_any_byte, sn_array2_to_any_byte, sn_array3_to_any_byte);

array_family!(int32, i32, Int32,
    sn_array_create_int32, sn_array_alloc_int32, sn_array_clone_int32,
    sn_array_concat_int32, sn_array_slice_int32, sn_array_rev_int32,
    sn_array_rem_int32, sn_array_ins_int32, sn_array_push_int32,
    sn_array_push_copy_int32, sn_array_pop_int32, sn_array_index_of_int32,
    sn_array_contains_int32, sn_array_eq_int32, sn_array_to_string_int32,
    sn_array_to_string2_int32, sn_array_to_string3_int32, sn_array_join_int32,
    sn_array_to_any_int32, sn_array2_to_any_int32, sn_array3_to_any_int32);

array_family!(uint32, u32, UInt32,
    sn_array_create_uint32, sn_array_alloc_uint32, sn_array_clone_uint32,
    sn_array_concat_uint32, sn_array_slice_uint32, sn_array_rev_uint32,
    sn_array_rem_uint32, sn_array_ins_uint32, sn_array_push_uint32,
    sn_array_push_copy_uint32, sn_array_pop_uint32, sn_array_index_of_uint32,
    sn_array_contains_uint32, sn_array_eq_uint32, sn_array_to_string_uint32,
    sn_array_to_string2_uint32, sn_array_to_string3_uint32, sn_array_join_uint32,
    sn_array_to_any_uint32, sn_array2_to_any_uint32, sn_array3_to_any_uint32);

array_family!(uint, u64, UInt,
    sn_array_create_uint, sn_array_alloc_uint, sn_array_clone_uint,
    sn_array_concat_uint, sn_array_slice_uint, sn_array_rev_uint,
    sn_array_rem_uint, sn_array_ins_uint, sn_array_push_uint,
    sn_array_push_copy_uint, sn_array_pop_uint, sn_array_index_of_uint,
    sn_array_contains_uint, sn_array_eq_uint, sn_array_to_string_uint,
    sn_array_to_string2_uint, sn_array_to_string3_uint, sn_array_join_uint,
    sn_array_to_any_uint, sn_array2_to_any_uint, sn_array3_to_any_uint);

array_family!(float, f32, Float,
    sn_array_create_float, sn_array_alloc_float, sn_array_clone_float,
    sn_array_concat_float, sn_array_slice_float, sn_array_rev_float,
    sn_array_rem_float, sn_array_ins_float, sn_array_push_float,
    sn_array_push_copy_float, sn_array_pop_float, sn_array_index_of_float,
    sn_array_contains_float, sn_array_eq_float, sn_array_to_string_float,
    sn_array_to_string2_float, sn_array_to_string3_float, sn_array_join_float,
    sn_array_to_any_float, sn_array2_to_any_float, sn_array3_to_any_float);

// ---------------------------------------------------------------------------
// String arrays
// ---------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn sn_array_create_string(
    a: *mut Arena,
    count: usize,
    data: *const *const c_char,
) -> *mut Handle {
    array::create_string(a, count, data)
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_alloc_string(a: *mut Arena, count: usize, default: *const c_char) -> *mut Handle {
    array::alloc_string(a, count, default)
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_clone_string(a: *mut Arena, h: *mut Handle) -> *mut Handle {
    array::clone_string_in(a, h)
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_concat_string(ha: *mut Handle, hb: *mut Handle) -> *mut Handle {
    array::concat(ha, hb, core::mem::size_of::<*mut Handle>())
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_slice_string(h: *mut Handle, start: i64, end: i64, step: i64) -> *mut Handle {
    array::slice_string(h, start, end, step)
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_rev_string(h: *mut Handle) -> *mut Handle {
    array::reverse_string(h)
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_rem_string(h: *mut Handle, index: i64) -> *mut Handle {
    array::remove(h, index, core::mem::size_of::<*mut Handle>())
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_ins_string(h: *mut Handle, elem: *const c_char, index: i64) -> *mut Handle {
    if h.is_null() {
        return core::ptr::null_mut();
    }
    let dup = arena::strdup((*h).arena, elem);
    array::insert(h, core::ptr::addr_of!(dup).cast(), index, core::mem::size_of::<*mut Handle>())
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_push_string(a: *mut Arena, h: *mut Handle, elem: *const c_char) -> *mut Handle {
    let dup = arena::strdup(a, elem);
    array::push(a, h, core::ptr::addr_of!(dup).cast(), core::mem::size_of::<*mut Handle>())
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_push_string_handle(
    a: *mut Arena,
    h: *mut Handle,
    elem: *mut Handle,
) -> *mut Handle {
    array::push(a, h, core::ptr::addr_of!(elem).cast(), core::mem::size_of::<*mut Handle>())
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_push_copy_string(h: *mut Handle, elem: *const c_char) -> *mut Handle {
    if h.is_null() {
        return core::ptr::null_mut();
    }
    let dup = arena::strdup((*h).arena, elem);
    array::push_copy(h, core::ptr::addr_of!(dup).cast(), core::mem::size_of::<*mut Handle>())
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_pop_string(h: *mut Handle) -> *mut Handle {
    let mut out: *mut Handle = core::ptr::null_mut();
    array::pop(h, core::ptr::addr_of_mut!(out).cast(), core::mem::size_of::<*mut Handle>());
    out
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_index_of_string(h: *mut Handle, elem: *const c_char) -> i64 {
    array::index_of_string(h, elem)
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_contains_string(h: *mut Handle, elem: *const c_char) -> bool {
    array::contains_string(h, elem)
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_eq_string(ha: *mut Handle, hb: *mut Handle) -> bool {
    array::eq_string(ha, hb)
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_to_string_string(a: *mut Arena, h: *mut Handle) -> *mut Handle {
    array::to_string_elems(a, h, Tag::Str)
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_to_string2_string(a: *mut Arena, h: *mut Handle) -> *mut Handle {
    array::to_string_elems_2d(a, h, Tag::Str)
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_to_string3_string(a: *mut Arena, h: *mut Handle) -> *mut Handle {
    array::to_string_elems_3d(a, h, Tag::Str)
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_join_string(a: *mut Arena, h: *mut Handle, sep: *const c_char) -> *mut Handle {
    array::join_elems(a, h, Tag::Str, sep)
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_to_any_string(a: *mut Arena, h: *mut Handle) -> *mut Handle {
    array::to_any(a, h, Tag::Str)
}

#[no_mangle]
pub unsafe extern "C" fn sn_array2_to_any_string(a: *mut Arena, h: *mut Handle) -> *mut Handle {
    array::to_any_2d(a, h, Tag::Str)
}

#[no_mangle]
pub unsafe extern "C" fn sn_array3_to_any_string(a: *mut Arena, h: *mut Handle) -> *mut Handle {
    array::to_any_3d(a, h, Tag::Str)
}

// ---------------------------------------------------------------------------
// Nested (handle-element) arrays
// ---------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn sn_array_create_handle(
    a: *mut Arena,
    count: usize,
    data: *const *mut Handle,
) -> *mut Handle {
    array::create_handles(a, count, data)
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_push_handle(a: *mut Arena, h: *mut Handle, elem: *mut Handle) -> *mut Handle {
    let out = array::push(a, h, core::ptr::addr_of!(elem).cast(), core::mem::size_of::<*mut Handle>());
    if !out.is_null() && (*out).copy_callback.is_none() {
        (*out).copy_callback = Some(array::handle_array_copy_callback);
    }
    out
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_pop_handle(h: *mut Handle) -> *mut Handle {
    let mut out: *mut Handle = core::ptr::null_mut();
    array::pop(h, core::ptr::addr_of_mut!(out).cast(), core::mem::size_of::<*mut Handle>());
    out
}

#[no_mangle]
pub unsafe extern "C" fn sn_promote_array_string(dest: *mut Arena, h: *mut Handle) -> *mut Handle {
    array::promote_array_string(dest, h)
}

#[no_mangle]
pub unsafe extern "C" fn sn_promote_array_handle(dest: *mut Arena, h: *mut Handle) -> *mut Handle {
    array::promote_array_handle(dest, h)
}

#[no_mangle]
pub unsafe extern "C" fn sn_promote_array_handle_3d(dest: *mut Arena, h: *mut Handle) -> *mut Handle {
    array::promote_array_handle_3d(dest, h)
}

#[no_mangle]
pub unsafe extern "C" fn sn_promote_array2_string(dest: *mut Arena, h: *mut Handle) -> *mut Handle {
    array::promote_array2_string(dest, h)
}

#[no_mangle]
pub unsafe extern "C" fn sn_promote_array3_string(dest: *mut Arena, h: *mut Handle) -> *mut Handle {
    array::promote_array3_string(dest, h)
}

// ---------------------------------------------------------------------------
// any[] arrays
// ---------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn sn_array_create_any(a: *mut Arena, count: usize, data: *const Any) -> *mut Handle {
    array::create_any(a, count, data)
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_push_any(a: *mut Arena, h: *mut Handle, elem: Any) -> *mut Handle {
    let out = array::push(a, h, core::ptr::addr_of!(elem).cast(), core::mem::size_of::<Any>());
    if !out.is_null() && (*out).copy_callback.is_none() {
        (*out).copy_callback = Some(array::any_array_copy_callback);
    }
    out
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_push_copy_any(h: *mut Handle, elem: Any) -> *mut Handle {
    array::push_copy(h, core::ptr::addr_of!(elem).cast(), core::mem::size_of::<Any>())
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_pop_any(h: *mut Handle) -> Any {
    let mut out = Any::nil();
    array::pop(h, core::ptr::addr_of_mut!(out).cast(), core::mem::size_of::<Any>());
    out
}

#[no_mangle]
pub unsafe extern "C" fn sn_array_to_string_any(a: *mut Arena, h: *mut Handle) -> *mut Handle {
    array::any_array_to_string(a, any::box_array(h, Tag::Nil))
}

// ---------------------------------------------------------------------------
// any values
// ---------------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn sn_box_nil() -> Any {
    Any::nil()
}

#[no_mangle]
pub extern "C" fn sn_box_int(v: i64) -> Any {
    any::box_int(v)
}

#[no_mangle]
pub extern "C" fn sn_box_long(v: i64) -> Any {
    any::box_long(v)
}

#[no_mangle]
pub extern "C" fn sn_box_int32(v: i32) -> Any {
    any::box_int32(v)
}

#[no_mangle]
pub extern "C" fn sn_box_uint(v: u64) -> Any {
    any::box_uint(v)
}

#[no_mangle]
pub extern "C" fn sn_box_uint32(v: u32) -> Any {
    any::box_uint32(v)
}

#[no_mangle]
pub extern "C" fn sn_box_double(v: f64) -> Any {
    any::box_double(v)
}

#[no_mangle]
pub extern "C" fn sn_box_float(v: f32) -> Any {
    any::box_float(v)
}

#[no_mangle]
pub extern "C" fn sn_box_string(h: *mut Handle) -> Any {
    any::box_string(h)
}

#[no_mangle]
pub extern "C" fn sn_box_char(v: c_char) -> Any {
    any::box_char(v)
}

#[no_mangle]
pub extern "C" fn sn_box_bool(v: bool) -> Any {
    any::box_bool(v)
}

#[no_mangle]
pub extern "C" fn sn_box_byte(v: u8) -> Any {
    any::box_byte(v)
}

#[no_mangle]
pub extern "C" fn sn_box_array(h: *mut Handle, element_tag: i32) -> Any {
    any::box_array(h, Tag::from_i32(element_tag).unwrap_or(Tag::Nil))
}

#[no_mangle]
pub extern "C" fn sn_box_function(h: *mut Handle) -> Any {
    any::box_function(h)
}

#[no_mangle]
pub extern "C" fn sn_box_struct(h: *mut Handle, struct_type_id: i32) -> Any {
    any::box_struct(h, struct_type_id)
}

#[no_mangle]
pub extern "C" fn sn_unbox_int(v: Any) -> i64 {
    any::unbox_int(v)
}

#[no_mangle]
pub extern "C" fn sn_unbox_long(v: Any) -> i64 {
    any::unbox_long(v)
}

#[no_mangle]
pub extern "C" fn sn_unbox_int32(v: Any) -> i32 {
    any::unbox_int32(v)
}

#[no_mangle]
pub extern "C" fn sn_unbox_uint(v: Any) -> u64 {
    any::unbox_uint(v)
}

#[no_mangle]
pub extern "C" fn sn_unbox_uint32(v: Any) -> u32 {
    any::unbox_uint32(v)
}

#[no_mangle]
pub extern "C" fn sn_unbox_double(v: Any) -> f64 {
    any::unbox_double(v)
}

#[no_mangle]
pub extern "C" fn sn_unbox_float(v: Any) -> f32 {
    any::unbox_float(v)
}

#[no_mangle]
pub extern "C" fn sn_unbox_string(v: Any) -> *mut Handle {
    any::unbox_string(v)
}

#[no_mangle]
pub extern "C" fn sn_unbox_char(v: Any) -> c_char {
    any::unbox_char(v)
}

#[no_mangle]
pub extern "C" fn sn_unbox_bool(v: Any) -> bool {
    any::unbox_bool(v)
}

#[no_mangle]
pub extern "C" fn sn_unbox_byte(v: Any) -> u8 {
    any::unbox_byte(v)
}

#[no_mangle]
pub extern "C" fn sn_unbox_array(v: Any) -> *mut Handle {
    any::unbox_array(v)
}

#[no_mangle]
pub extern "C" fn sn_unbox_function(v: Any) -> *mut Handle {
    any::unbox_function(v)
}

#[no_mangle]
pub extern "C" fn sn_unbox_struct(v: Any, expected_type_id: i32) -> *mut Handle {
    any::unbox_struct(v, expected_type_id)
}

#[no_mangle]
pub unsafe extern "C" fn sn_any_equals(a: Any, b: Any) -> bool {
    any::equals(a, b)
}

#[no_mangle]
pub extern "C" fn sn_any_same_type(a: Any, b: Any) -> bool {
    any::same_type(a, b)
}

#[no_mangle]
pub extern "C" fn sn_any_tag(v: Any) -> i32 {
    v.tag as i32
}

#[no_mangle]
pub extern "C" fn sn_any_has_tag(v: Any, tag: i32) -> bool {
    v.tag as i32 == tag
}

#[no_mangle]
pub extern "C" fn sn_any_tag_name(tag: i32) -> *const c_char {
    match Tag::from_i32(tag) {
        Some(Tag::Nil) | None => c"nil".as_ptr(),
        Some(Tag::Int) => c"int".as_ptr(),
        Some(Tag::Long) => c"long".as_ptr(),
        Some(Tag::Int32) => c"int32".as_ptr(),
        Some(Tag::UInt) => c"uint".as_ptr(),
        Some(Tag::UInt32) => c"uint32".as_ptr(),
        Some(Tag::Double) => c"double".as_ptr(),
        Some(Tag::Float) => c"float".as_ptr(),
        Some(Tag::Str) => c"str".as_ptr(),
        Some(Tag::Char) => c"char".as_ptr(),
        Some(Tag::Bool) => c"bool".as_ptr(),
        Some(Tag::Byte) => c"byte".as_ptr(),
        Some(Tag::Array) => c"array".as_ptr(),
        Some(Tag::Function) => c"function".as_ptr(),
        Some(Tag::Struct) => c"struct".as_ptr(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn sn_any_to_string(a: *mut Arena, v: Any) -> *mut Handle {
    any::to_string(a, v)
}

#[no_mangle]
pub unsafe extern "C" fn sn_any_promote(dest: *mut Arena, v: Any) -> Any {
    any::promote(dest, v)
}

// ---------------------------------------------------------------------------
// Threads and locks
// ---------------------------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn sn_thread_spawn(
    a: *mut Arena,
    entry: ThreadEntry,
    args: *const c_void,
    args_size: usize,
) -> *mut Handle {
    thread::spawn(a, entry, args.cast(), args_size)
}

/// Joins a void-returning spawn.
#[no_mangle]
pub unsafe extern "C" fn sn_thread_sync(pending: *mut Handle) {
    let r = thread::sync(pending);
    if !r.arena.is_null() {
        arena::destroy(r.arena);
    }
}

#[no_mangle]
pub unsafe extern "C" fn sn_thread_sync_long(pending: *mut Handle) -> i64 {
    let r = thread::sync(pending);
    if !r.arena.is_null() {
        arena::destroy(r.arena);
    }
    r.bits
}

#[no_mangle]
pub unsafe extern "C" fn sn_thread_sync_double(pending: *mut Handle) -> f64 {
    let r = thread::sync(pending);
    if !r.arena.is_null() {
        arena::destroy(r.arena);
    }
    r.dbits
}

/// Joins a heap-shaped spawn: the result handle is promoted into `dest`
/// before the thread's root arena is destroyed.
#[no_mangle]
pub unsafe extern "C" fn sn_thread_sync_handle(dest: *mut Arena, pending: *mut Handle) -> *mut Handle {
    let r = thread::sync(pending);
    let out = arena::promote(dest, r.handle);
    if !r.arena.is_null() {
        arena::destroy(r.arena);
    }
    out
}

#[no_mangle]
pub unsafe extern "C" fn sn_thread_sync_any(dest: *mut Arena, pending: *mut Handle) -> Any {
    let r = thread::sync(pending);
    let out = any::promote(dest, r.any);
    if !r.arena.is_null() {
        arena::destroy(r.arena);
    }
    out
}

#[no_mangle]
pub extern "C" fn sn_sync_lock(addr: *mut c_void) {
    thread::lock(addr as usize);
}

#[no_mangle]
pub extern "C" fn sn_sync_unlock(addr: *mut c_void) {
    thread::unlock(addr as usize);
}
