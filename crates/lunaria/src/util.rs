//! Low-level helpers shared by the state, handle and runner modules.

use std::any::Any;
use std::ffi::{c_char, c_int, CStr, CString};
use std::ptr;
use std::slice;

use lunaria_sys::{self as ffi, lua_State};

use crate::error::{Error, Result};

/// Restores the stack top of a state when dropped.
pub(crate) struct StackGuard {
    l: *mut lua_State,
    top: c_int,
}

impl StackGuard {
    /// # Safety
    /// `l` must be a live state for the guard's lifetime.
    #[inline]
    pub(crate) unsafe fn new(l: *mut lua_State) -> Self {
        Self {
            l,
            top: ffi::lua_gettop(l),
        }
    }
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        unsafe {
            if ffi::lua_gettop(self.l) > self.top {
                ffi::lua_settop(self.l, self.top);
            }
        }
    }
}

#[inline]
pub(crate) unsafe fn push_str(l: *mut lua_State, s: &str) {
    push_bytes(l, s.as_bytes());
}

#[inline]
pub(crate) unsafe fn push_bytes(l: *mut lua_State, bytes: &[u8]) {
    ffi::lua_pushlstring(l, bytes.as_ptr() as *const c_char, bytes.len());
}

/// Copy the bytes of the string at `idx`, or `None` when it is not a string.
pub(crate) unsafe fn read_bytes<'a>(l: *mut lua_State, idx: c_int) -> Option<&'a [u8]> {
    let mut len = 0usize;
    let data = ffi::lua_tolstring(l, idx, &mut len);
    if data.is_null() {
        None
    } else {
        Some(slice::from_raw_parts(data as *const u8, len))
    }
}

pub(crate) unsafe fn type_name(l: *mut lua_State, idx: c_int) -> String {
    let name = ffi::lua_typename(l, ffi::lua_type(l, idx));
    if name.is_null() {
        "no value".to_owned()
    } else {
        CStr::from_ptr(name).to_string_lossy().into_owned()
    }
}

/// Pop the error object on top of the stack and render it.
pub(crate) unsafe fn pop_error_message(l: *mut lua_State) -> String {
    let message = match ffi::lua_type(l, -1) {
        ffi::LUA_TSTRING | ffi::LUA_TNUMBER => read_bytes(l, -1)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default(),
        _ => format!("(error object is a {} value)", type_name(l, -1)),
    };
    ffi::lua_pop(l, 1);
    message
}

/// Classify a failing native status code.
pub(crate) fn error_from_status(status: c_int, message: String) -> Error {
    match status {
        ffi::LUA_ERRSYNTAX => Error::Syntax(message),
        ffi::LUA_ERRMEM => Error::Resource(message),
        _ => Error::Runtime(message),
    }
}

/// Call `f` in protected mode with the top `nargs` values as arguments.
///
/// On success `nresults` values are left on the stack; on failure the error
/// object is popped and returned.
pub(crate) unsafe fn protect(
    l: *mut lua_State,
    nargs: c_int,
    nresults: c_int,
    f: ffi::lua_CFunction,
) -> Result<()> {
    ffi::lua_pushcfunction(l, f, ptr::null());
    ffi::lua_insert(l, -(nargs + 1));
    match ffi::lua_pcall(l, nargs, nresults, 0) {
        ffi::LUA_OK => Ok(()),
        status => Err(error_from_status(status, pop_error_message(l))),
    }
}

/// Fail with a resource error when `n` more slots cannot be reserved.
pub(crate) unsafe fn reserve(l: *mut lua_State, n: c_int) -> Result<()> {
    if n > 0 && ffi::lua_checkstack(l, n) == 0 {
        return Err(Error::Resource(format!("stack overflow (cannot grow by {} slots)", n)));
    }
    Ok(())
}

pub(crate) fn to_cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| Error::InvalidArgument(format!("{:?} contains a NUL byte", s)))
}

/// Render a panic payload caught at a callback boundary.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    };
    format!("host function panicked: {}", detail)
}
