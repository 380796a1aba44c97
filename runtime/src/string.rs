//! Arena-owned strings and the print entry points.
//!
//! A Senna string is a handle whose payload is a NUL-terminated byte
//! sequence. Everything here is a thin layer over [`arena::strdup`]; the
//! interesting part is keeping every produced string inside the arena the
//! caller passed, so promotion and destruction behave like any other value.

use core::ffi::{c_char, CStr};
use std::io::Write;

use crate::arena::{self, Arena, Handle};

/// Allocates `s` as a fresh string handle in `arena`.
pub unsafe fn from_str(arena: *mut Arena, s: &str) -> *mut Handle {
    let h = arena::alloc(arena, s.len() + 1);
    if !h.is_null() {
        core::ptr::copy_nonoverlapping(s.as_ptr(), (*h).ptr, s.len());
    }
    h
}

/// Borrows the payload of a string handle. Null handles read as "".
pub unsafe fn as_str<'a>(h: *mut Handle) -> &'a str {
    if h.is_null() || (*h).ptr.is_null() {
        return "";
    }
    CStr::from_ptr((*h).ptr.cast()).to_str().unwrap_or("")
}

/// Content equality; null compares equal only to null or "".
pub unsafe fn eq(a: *mut Handle, b: *mut Handle) -> bool {
    as_str(a) == as_str(b)
}

pub unsafe fn len(h: *mut Handle) -> usize {
    as_str(h).len()
}

/// New string in `arena` holding `a` followed by `b`.
pub unsafe fn concat(arena: *mut Arena, a: *mut Handle, b: *mut Handle) -> *mut Handle {
    let joined = format!("{}{}", as_str(a), as_str(b));
    from_str(arena, &joined)
}

pub unsafe fn concat_cstr(arena: *mut Arena, a: *mut Handle, b: *const c_char) -> *mut Handle {
    let rhs = if b.is_null() { "" } else { CStr::from_ptr(b).to_str().unwrap_or("") };
    let joined = format!("{}{rhs}", as_str(a));
    from_str(arena, &joined)
}

/// Formats a double the way the generated code expects: integral values
/// print without a trailing fraction, everything else with shortest-digits.
pub fn format_double(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

pub unsafe fn to_string_long(arena: *mut Arena, v: i64) -> *mut Handle {
    from_str(arena, &v.to_string())
}

pub unsafe fn to_string_double(arena: *mut Arena, v: f64) -> *mut Handle {
    from_str(arena, &format_double(v))
}

pub unsafe fn to_string_bool(arena: *mut Arena, v: bool) -> *mut Handle {
    from_str(arena, if v { "true" } else { "false" })
}

pub unsafe fn to_string_char(arena: *mut Arena, v: c_char) -> *mut Handle {
    from_str(arena, &((v as u8) as char).to_string())
}

pub unsafe fn to_string_byte(arena: *mut Arena, v: u8) -> *mut Handle {
    from_str(arena, &v.to_string())
}

pub unsafe fn print_str(s: &str, newline: bool) {
    let mut out = std::io::stdout().lock();
    let _ = if newline { writeln!(out, "{s}") } else { write!(out, "{s}") };
    let _ = out.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_arena<T>(f: impl FnOnce(*mut Arena) -> T) -> T {
        unsafe {
            let a = arena::create(core::ptr::null_mut());
            let out = f(a);
            arena::destroy(a);
            drop(Box::from_raw(a));
            out
        }
    }

    #[test]
    fn concat_joins_contents() {
        with_arena(|a| unsafe {
            let x = from_str(a, "foo");
            let y = from_str(a, "bar");
            assert_eq!(as_str(concat(a, x, y)), "foobar");
        });
    }

    #[test]
    fn eq_compares_by_contents() {
        with_arena(|a| unsafe {
            let x = from_str(a, "same");
            let y = from_str(a, "same");
            assert_ne!(x, y);
            assert!(eq(x, y));
            assert!(!eq(x, from_str(a, "other")));
        });
    }

    #[test]
    fn doubles_format_like_c() {
        assert_eq!(format_double(1.0), "1");
        assert_eq!(format_double(1.5), "1.5");
        assert_eq!(format_double(-0.25), "-0.25");
    }
}
