//! The dynamically typed `any` value.
//!
//! An [`Any`] is a tagged union: a closed tag enum, a payload union holding
//! either an inline primitive or a handle, and an auxiliary tag that records
//! the element variant of boxed arrays (and the nominal struct id of boxed
//! structs). Unboxing with the wrong tag is a fatal runtime error.

use core::ffi::c_char;

use crate::arena::{self, Arena, Handle};
use crate::fatal;
use crate::string;

/// Runtime type tags. The discriminants are part of the generated-code ABI.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    Nil = 0,
    Int,
    Long,
    Int32,
    UInt,
    UInt32,
    Double,
    Float,
    Str,
    Char,
    Bool,
    Byte,
    Array,
    Function,
    Struct,
}

/// Payload storage for [`Any`].
#[repr(C)]
#[derive(Clone, Copy)]
pub union Value {
    pub i64_: i64,
    pub i32_: i32,
    pub u64_: u64,
    pub u32_: u32,
    pub d: f64,
    pub f: f32,
    pub c: c_char,
    pub b: bool,
    pub byte: u8,
    /// Strings, arrays, closures and boxed structs all travel as handles.
    pub h: *mut Handle,
}

impl Tag {
    /// Recovers a tag from its ABI discriminant.
    pub const fn from_i32(v: i32) -> Option<Self> {
        Some(match v {
            0 => Tag::Nil,
            1 => Tag::Int,
            2 => Tag::Long,
            3 => Tag::Int32,
            4 => Tag::UInt,
            5 => Tag::UInt32,
            6 => Tag::Double,
            7 => Tag::Float,
            8 => Tag::Str,
            9 => Tag::Char,
            10 => Tag::Bool,
            11 => Tag::Byte,
            12 => Tag::Array,
            13 => Tag::Function,
            14 => Tag::Struct,
            _ => return None,
        })
    }
}

/// A boxed dynamic value.
///
/// `element_tag` is a raw discriminant rather than a [`Tag`]: for boxed
/// arrays it holds the element variant, but for boxed structs it is
/// repurposed to carry the nominal struct id, which is not a valid tag.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Any {
    pub tag: Tag,
    pub value: Value,
    pub element_tag: i32,
}

impl Any {
    pub const fn nil() -> Self {
        Any { tag: Tag::Nil, value: Value { i64_: 0 }, element_tag: Tag::Nil as i32 }
    }

    const fn new(tag: Tag, value: Value) -> Self {
        Any { tag, value, element_tag: Tag::Nil as i32 }
    }
}

pub const fn box_int(v: i64) -> Any {
    Any::new(Tag::Int, Value { i64_: v })
}

pub const fn box_long(v: i64) -> Any {
    Any::new(Tag::Long, Value { i64_: v })
}

pub const fn box_int32(v: i32) -> Any {
    Any::new(Tag::Int32, Value { i32_: v })
}

pub const fn box_uint(v: u64) -> Any {
    Any::new(Tag::UInt, Value { u64_: v })
}

pub const fn box_uint32(v: u32) -> Any {
    Any::new(Tag::UInt32, Value { u32_: v })
}

pub const fn box_double(v: f64) -> Any {
    Any::new(Tag::Double, Value { d: v })
}

pub const fn box_float(v: f32) -> Any {
    Any::new(Tag::Float, Value { f: v })
}

pub const fn box_string(h: *mut Handle) -> Any {
    Any::new(Tag::Str, Value { h })
}

pub const fn box_char(v: c_char) -> Any {
    Any::new(Tag::Char, Value { c: v })
}

pub const fn box_bool(v: bool) -> Any {
    Any::new(Tag::Bool, Value { b: v })
}

pub const fn box_byte(v: u8) -> Any {
    Any::new(Tag::Byte, Value { byte: v })
}

/// Boxes an array handle, recording its element variant.
pub const fn box_array(h: *mut Handle, element_tag: Tag) -> Any {
    Any { tag: Tag::Array, value: Value { h }, element_tag: element_tag as i32 }
}

pub const fn box_function(h: *mut Handle) -> Any {
    Any::new(Tag::Function, Value { h })
}

/// Boxes a struct handle, recording its nominal type id in `element_tag`.
pub const fn box_struct(h: *mut Handle, struct_type_id: i32) -> Any {
    Any { tag: Tag::Struct, value: Value { h }, element_tag: struct_type_id }
}

pub const fn tag_name(tag: Tag) -> &'static str {
    match tag {
        Tag::Nil => "nil",
        Tag::Int => "int",
        Tag::Long => "long",
        Tag::Int32 => "int32",
        Tag::UInt => "uint",
        Tag::UInt32 => "uint32",
        Tag::Double => "double",
        Tag::Float => "float",
        Tag::Str => "str",
        Tag::Char => "char",
        Tag::Bool => "bool",
        Tag::Byte => "byte",
        Tag::Array => "array",
        Tag::Function => "function",
        Tag::Struct => "struct",
    }
}

fn type_error(expected: &str, got: Any) -> ! {
    fatal(&format!(
        "Type error: expected {expected}, got {}",
        tag_name(got.tag)
    ));
}

macro_rules! unbox {
    ($name:ident, $tag:ident, $field:ident, $ty:ty, $want:literal) => {
        pub fn $name(v: Any) -> $ty {
            if v.tag != Tag::$tag {
                type_error($want, v);
            }
            unsafe { v.value.$field }
        }
    };
}

unbox!(unbox_int, Int, i64_, i64, "int");
unbox!(unbox_long, Long, i64_, i64, "long");
unbox!(unbox_int32, Int32, i32_, i32, "int32");
unbox!(unbox_uint, UInt, u64_, u64, "uint");
unbox!(unbox_uint32, UInt32, u32_, u32, "uint32");
unbox!(unbox_double, Double, d, f64, "double");
unbox!(unbox_float, Float, f, f32, "float");
unbox!(unbox_string, Str, h, *mut Handle, "str");
unbox!(unbox_char, Char, c, c_char, "char");
unbox!(unbox_bool, Bool, b, bool, "bool");
unbox!(unbox_byte, Byte, byte, u8, "byte");
unbox!(unbox_array, Array, h, *mut Handle, "array");
unbox!(unbox_function, Function, h, *mut Handle, "function");

/// Unboxes a struct, checking the nominal type id as well as the tag.
pub fn unbox_struct(v: Any, expected_type_id: i32) -> *mut Handle {
    if v.tag != Tag::Struct {
        type_error("struct", v);
    }
    let actual = v.element_tag;
    if actual != expected_type_id {
        fatal(&format!(
            "Type error: struct type mismatch (expected type id {expected_type_id}, got {actual})"
        ));
    }
    unsafe { v.value.h }
}

pub fn same_type(a: Any, b: Any) -> bool {
    a.tag == b.tag
}

/// Strict equality: tags must match, then payloads compare structurally.
/// Strings compare by contents, arrays by length then element-wise, structs
/// and closures by identity.
pub unsafe fn equals(a: Any, b: Any) -> bool {
    if a.tag != b.tag {
        return false;
    }
    match a.tag {
        Tag::Nil => true,
        Tag::Int | Tag::Long => a.value.i64_ == b.value.i64_,
        Tag::Int32 => a.value.i32_ == b.value.i32_,
        Tag::UInt => a.value.u64_ == b.value.u64_,
        Tag::UInt32 => a.value.u32_ == b.value.u32_,
        Tag::Double => a.value.d == b.value.d,
        Tag::Float => a.value.f == b.value.f,
        Tag::Char => a.value.c == b.value.c,
        Tag::Bool => a.value.b == b.value.b,
        Tag::Byte => a.value.byte == b.value.byte,
        Tag::Str => string::eq(a.value.h, b.value.h),
        Tag::Array => {
            let (ha, hb) = (a.value.h, b.value.h);
            if ha.is_null() && hb.is_null() {
                return true;
            }
            if ha.is_null() || hb.is_null() {
                return false;
            }
            let len_a = crate::array::length(ha);
            if len_a != crate::array::length(hb) {
                return false;
            }
            if a.element_tag == Tag::Nil as i32 {
                // any[]: compare element-wise through the boxed values.
                let ea = crate::array::data(ha).cast::<Any>();
                let eb = crate::array::data(hb).cast::<Any>();
                (0..len_a).all(|i| equals(*ea.add(i), *eb.add(i)))
            } else {
                let elem = crate::array::elem_size(ha);
                if elem != crate::array::elem_size(hb) {
                    return false;
                }
                let sa = core::slice::from_raw_parts(crate::array::data(ha), len_a * elem);
                let sb = core::slice::from_raw_parts(crate::array::data(hb), len_a * elem);
                sa == sb
            }
        }
        Tag::Function => a.value.h == b.value.h,
        Tag::Struct => a.element_tag == b.element_tag && a.value.h == b.value.h,
    }
}

/// Renders the value for printing and interpolation.
pub unsafe fn to_string(arena: *mut Arena, v: Any) -> *mut Handle {
    match v.tag {
        Tag::Nil => string::from_str(arena, "nil"),
        Tag::Int | Tag::Long => string::from_str(arena, &v.value.i64_.to_string()),
        Tag::Int32 => string::from_str(arena, &v.value.i32_.to_string()),
        Tag::UInt => string::from_str(arena, &v.value.u64_.to_string()),
        Tag::UInt32 => string::from_str(arena, &v.value.u32_.to_string()),
        Tag::Double => string::from_str(arena, &string::format_double(v.value.d)),
        Tag::Float => string::from_str(arena, &string::format_double(f64::from(v.value.f))),
        Tag::Str => {
            if v.value.h.is_null() {
                string::from_str(arena, "")
            } else {
                arena::strdup(arena, (*v.value.h).ptr.cast())
            }
        }
        Tag::Char => {
            let c = v.value.c as u8 as char;
            string::from_str(arena, &c.to_string())
        }
        Tag::Bool => string::from_str(arena, if v.value.b { "true" } else { "false" }),
        Tag::Byte => string::from_str(arena, &v.value.byte.to_string()),
        Tag::Array => crate::array::any_array_to_string(arena, v),
        Tag::Function => string::from_str(arena, "<function>"),
        Tag::Struct => string::from_str(arena, "<struct>"),
    }
}

/// Duplicates heap-shaped payloads into `dst`; primitives return unchanged.
///
/// Strings are re-duped, arrays go through arena promotion (their copy
/// callback walks the elements), structs and closures promote their handle.
pub unsafe fn promote(dst: *mut Arena, v: Any) -> Any {
    let mut out = v;
    match v.tag {
        Tag::Str => {
            if !v.value.h.is_null() {
                out.value.h = arena::strdup(dst, (*v.value.h).ptr.cast());
            }
        }
        Tag::Array | Tag::Function | Tag::Struct => {
            out.value.h = arena::promote(dst, v.value.h);
        }
        _ => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn unbox_box_round_trips() {
        assert_eq!(unbox_int(box_int(-7)), -7);
        assert_eq!(unbox_long(box_long(1 << 40)), 1 << 40);
        assert_eq!(unbox_int32(box_int32(-5)), -5);
        assert_eq!(unbox_uint(box_uint(u64::MAX)), u64::MAX);
        assert_eq!(unbox_uint32(box_uint32(9)), 9);
        assert_eq!(unbox_double(box_double(2.5)), 2.5);
        assert_eq!(unbox_float(box_float(0.5)), 0.5);
        assert_eq!(unbox_char(box_char(b'x' as c_char)), b'x' as c_char);
        assert!(unbox_bool(box_bool(true)));
        assert_eq!(unbox_byte(box_byte(255)), 255);
    }

    #[test]
    fn tags_have_stable_names() {
        assert_eq!(tag_name(Tag::Str), "str");
        assert_eq!(tag_name(Tag::Long), "long");
        assert_eq!(tag_name(Tag::Struct), "struct");
    }

    #[test]
    fn different_tags_never_equal() {
        unsafe {
            assert!(!equals(box_int(1), box_long(1)));
            assert!(!equals(box_bool(false), Any::nil()));
        }
    }

    proptest! {
        #[test]
        fn equals_is_reflexive_for_primitives(v in any::<i64>(), d in any::<f64>().prop_filter("NaN breaks reflexivity", |d| !d.is_nan())) {
            unsafe {
                prop_assert!(equals(box_long(v), box_long(v)));
                prop_assert!(equals(box_double(d), box_double(d)));
            }
        }

        #[test]
        fn unbox_round_trips_longs(v in any::<i64>()) {
            prop_assert_eq!(unbox_long(box_long(v)), v);
        }
    }
}
