//! Value: tagged representation of every Luau value kind
//!
//! Scalars (nil, booleans, light userdata, numbers, vectors) are stored
//! inline. Strings are copied out of the VM eagerly as raw bytes, so a
//! `Value::String` never aliases VM memory and keeps non-UTF-8 content
//! intact. Tables, functions, userdata, buffers and threads are carried as
//! live handles that pin their referent in the VM registry (see
//! [`crate::registry`]).
//!
//! # Equality
//!
//! ```text
//! Nil == Nil
//! Boolean / Number / Vector / LightUserData  compared by value
//! String                                     compared by content
//! Table / Function / UserData / Buffer       compared by handle identity
//! Thread                                     compared by wrapper identity
//! ```

use std::borrow::Cow;
use std::ffi::{c_int, c_void};
use std::fmt;
use std::rc::Rc;

use lunaria_sys as ffi;

use crate::buffer::Buffer;
use crate::convert::FromValue;
use crate::error::{Error, Result};
use crate::function::Function;
use crate::state::State;
use crate::table::Table;
use crate::userdata::UserData;

// ============================================================================
// Value Kind
// ============================================================================

/// Kind tag of a [`Value`], matching the VM's basic types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// `nil`
    Nil,
    /// `true` / `false`
    Boolean,
    /// Opaque, non-owning pointer
    LightUserData,
    /// Double-precision number
    Number,
    /// Three-component float vector
    Vector,
    /// Immutable byte string
    String,
    /// Table
    Table,
    /// Script or host function
    Function,
    /// Full userdata block
    UserData,
    /// Coroutine
    Thread,
    /// Fixed-size mutable byte buffer
    Buffer,
}

impl ValueKind {
    /// Map a native type tag to a kind; `None` for `LUA_TNONE` and unknown tags.
    pub(crate) fn from_type_tag(tag: c_int) -> Option<Self> {
        Some(match tag {
            ffi::LUA_TNIL => ValueKind::Nil,
            ffi::LUA_TBOOLEAN => ValueKind::Boolean,
            ffi::LUA_TLIGHTUSERDATA => ValueKind::LightUserData,
            ffi::LUA_TNUMBER => ValueKind::Number,
            ffi::LUA_TVECTOR => ValueKind::Vector,
            ffi::LUA_TSTRING => ValueKind::String,
            ffi::LUA_TTABLE => ValueKind::Table,
            ffi::LUA_TFUNCTION => ValueKind::Function,
            ffi::LUA_TUSERDATA => ValueKind::UserData,
            ffi::LUA_TTHREAD => ValueKind::Thread,
            ffi::LUA_TBUFFER => ValueKind::Buffer,
            _ => return None,
        })
    }

    /// Script-facing type name
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Nil => "nil",
            ValueKind::Boolean => "boolean",
            ValueKind::LightUserData => "lightuserdata",
            ValueKind::Number => "number",
            ValueKind::Vector => "vector",
            ValueKind::String => "string",
            ValueKind::Table => "table",
            ValueKind::Function => "function",
            ValueKind::UserData => "userdata",
            ValueKind::Thread => "thread",
            ValueKind::Buffer => "buffer",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Scalars
// ============================================================================

/// Native three-component vector.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector {
    /// Create a vector from its components
    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl From<[f32; 3]> for Vector {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<Vector> for [f32; 3] {
    fn from(v: Vector) -> Self {
        [v.x, v.y, v.z]
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.x, self.y, self.z)
    }
}

/// Opaque pointer passed through the VM without ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LightUserData(pub *mut c_void);

impl fmt::Display for LightUserData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lightuserdata: 0x{:016x}", self.0 as usize)
    }
}

/// Immutable byte string copied out of the VM.
///
/// VM strings are arbitrary bytes; UTF-8 is only checked when a `&str` is
/// requested.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LuauString(Rc<[u8]>);

impl LuauString {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Borrow as UTF-8, failing with a conversion error otherwise.
    pub fn to_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.0).map_err(|_| Error::Conversion {
            from: ValueKind::String,
            to: "utf-8 string",
        })
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for LuauString {
    fn from(bytes: &[u8]) -> Self {
        Self(Rc::from(bytes))
    }
}

impl From<Vec<u8>> for LuauString {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Rc::from(bytes))
    }
}

impl From<&str> for LuauString {
    fn from(s: &str) -> Self {
        Self(Rc::from(s.as_bytes()))
    }
}

impl From<String> for LuauString {
    fn from(s: String) -> Self {
        Self(Rc::from(s.into_bytes()))
    }
}

impl PartialEq<str> for LuauString {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for LuauString {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Debug for LuauString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{:?}", s),
            Err(_) => write!(f, "b\"{}\"", self.0.escape_ascii()),
        }
    }
}

impl fmt::Display for LuauString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

// ============================================================================
// Value
// ============================================================================

/// A VM value held by the host.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// `nil`
    #[default]
    Nil,
    /// Boolean
    Boolean(bool),
    /// Opaque pointer
    LightUserData(LightUserData),
    /// Number
    Number(f64),
    /// Vector
    Vector(Vector),
    /// String copied out of the VM
    String(LuauString),
    /// Table handle
    Table(Table),
    /// Function handle
    Function(Function),
    /// Userdata handle
    UserData(UserData),
    /// Coroutine
    Thread(State),
    /// Buffer handle
    Buffer(Buffer),
}

impl Value {
    /// Kind tag of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Nil => ValueKind::Nil,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::LightUserData(_) => ValueKind::LightUserData,
            Value::Number(_) => ValueKind::Number,
            Value::Vector(_) => ValueKind::Vector,
            Value::String(_) => ValueKind::String,
            Value::Table(_) => ValueKind::Table,
            Value::Function(_) => ValueKind::Function,
            Value::UserData(_) => ValueKind::UserData,
            Value::Thread(_) => ValueKind::Thread,
            Value::Buffer(_) => ValueKind::Buffer,
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Script truthiness: everything except `nil` and `false` is true.
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// Read the value as `T`, or `None` when the kinds are incompatible.
    #[inline]
    pub fn try_read<T: FromValue>(&self) -> Option<T> {
        T::from_value(self)
    }

    /// Read the value as `T`, failing with a conversion error.
    pub fn read<T: FromValue>(&self) -> Result<T> {
        T::from_value(self).ok_or(Error::Conversion {
            from: self.kind(),
            to: T::TYPE_NAME,
        })
    }

    /// Borrow the string contents, if this is a string holding valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => s.to_str().ok(),
            _ => None,
        }
    }

    /// Raw bytes of a string value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_thread(&self) -> Option<&State> {
        match self {
            Value::Thread(s) => Some(s),
            _ => None,
        }
    }

    /// Render through the VM's `tostring` for handle kinds.
    ///
    /// Scalars never fail. Handles fail when disposed or when a `__tostring`
    /// metamethod raises.
    pub fn to_display_string(&self) -> Result<String> {
        match self {
            Value::Table(t) => t.to_display_string(),
            Value::Function(f) => f.to_display_string(),
            Value::UserData(u) => u.to_display_string(),
            Value::Buffer(b) => b.to_display_string(),
            other => Ok(other.to_string()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::LightUserData(a), Value::LightUserData(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::UserData(a), Value::UserData(b)) => a == b,
            (Value::Thread(a), Value::Thread(b)) => a == b,
            (Value::Buffer(a), Value::Buffer(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::LightUserData(p) => write!(f, "{}", p),
            Value::Number(n) => write!(f, "{}", n),
            Value::Vector(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::Thread(s) => write!(f, "{}", s),
            handle => match handle.to_display_string() {
                Ok(s) => f.write_str(&s),
                Err(_) => write!(f, "{}: <disposed>", handle.kind()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(ValueKind::LightUserData.to_string(), "lightuserdata");
        assert_eq!(ValueKind::from_type_tag(ffi::LUA_TBUFFER), Some(ValueKind::Buffer));
        assert_eq!(ValueKind::from_type_tag(ffi::LUA_TNONE), None);
    }

    #[test]
    fn test_scalar_display() {
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Boolean(true).to_string(), "true");
        assert_eq!(Value::Number(10.0).to_string(), "10");
        assert_eq!(Value::Number(0.5).to_string(), "0.5");
        assert_eq!(Value::Vector(Vector::new(1.0, 2.5, -3.0)).to_string(), "1, 2.5, -3");
        assert_eq!(Value::String("hello".into()).to_string(), "hello");
    }

    #[test]
    fn test_scalar_equality() {
        assert_eq!(Value::Nil, Value::Nil);
        assert_eq!(Value::String("a".into()), Value::String("a".into()));
        assert_ne!(Value::Number(1.0), Value::Boolean(true));
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
    }

    #[test]
    fn test_strings_compare_bytes() {
        let a = Value::String(LuauString::from(&b"\xff"[..]));
        let b = Value::String(LuauString::from(&b"\xfe"[..]));
        assert_ne!(a, b);
        assert_eq!(a.as_bytes(), Some(&b"\xff"[..]));
        assert_eq!(a.as_str(), None);
        assert_eq!(format!("{:?}", a), "String(b\"\\xff\")");
        assert_eq!(LuauString::from("hi"), "hi");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(Value::Number(0.0).is_truthy());
        assert!(Value::String("".into()).is_truthy());
    }
}
