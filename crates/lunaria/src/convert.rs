//! Conversions between [`Value`] and host types.
//!
//! `FromValue` backs [`Value::try_read`] and [`Value::read`]. Numbers convert
//! to integral types only when the conversion is exact: the number must be
//! finite, have no fractional part, be non-negative for unsigned targets and
//! fit the target range. Floating-point targets accept any number.
//!
//! Strings read as `String`/`&str` only when they hold valid UTF-8;
//! [`LuauString`] and `Vec<u8>` take any bytes.
//!
//! `From<T> for Value` covers the other direction.

use crate::buffer::Buffer;
use crate::function::Function;
use crate::state::State;
use crate::table::Table;
use crate::userdata::UserData;
use crate::value::{LightUserData, LuauString, Value, Vector};

/// Extract a host type from a [`Value`].
pub trait FromValue: Sized {
    /// Host type name used in conversion errors
    const TYPE_NAME: &'static str;

    /// Convert, returning `None` when the value kind is incompatible
    fn from_value(value: &Value) -> Option<Self>;
}

/// Exact integral reading of a number, wide enough for every 64-bit target.
fn exact_integer(n: f64) -> Option<i128> {
    if !n.is_finite() || n.fract() != 0.0 {
        return None;
    }
    Some(n as i128)
}

macro_rules! impl_integer {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromValue for $ty {
                const TYPE_NAME: &'static str = stringify!($ty);

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::Number(n) => exact_integer(*n).and_then(|i| <$ty>::try_from(i).ok()),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for Value {
                #[inline]
                fn from(v: $ty) -> Self {
                    Value::Number(v as f64)
                }
            }
        )*
    };
}

impl_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl FromValue for f64 {
    const TYPE_NAME: &'static str = "f64";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_number()
    }
}

impl FromValue for f32 {
    const TYPE_NAME: &'static str = "f32";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_number().map(|n| n as f32)
    }
}

impl FromValue for bool {
    const TYPE_NAME: &'static str = "bool";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromValue for String {
    const TYPE_NAME: &'static str = "utf-8 string";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl FromValue for Vec<u8> {
    const TYPE_NAME: &'static str = "string";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bytes().map(<[u8]>::to_vec)
    }
}

impl FromValue for Value {
    const TYPE_NAME: &'static str = "value";

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Nil => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

macro_rules! impl_variant {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl FromValue for $ty {
            const TYPE_NAME: &'static str = $name;

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Value {
            #[inline]
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }

        impl From<&$ty> for Value {
            #[inline]
            fn from(v: &$ty) -> Self {
                Value::$variant(v.clone())
            }
        }
    };
}

impl_variant!(LuauString, String, "string");
impl_variant!(Vector, Vector, "vector");
impl_variant!(LightUserData, LightUserData, "lightuserdata");
impl_variant!(Table, Table, "table");
impl_variant!(Function, Function, "function");
impl_variant!(UserData, UserData, "userdata");
impl_variant!(Buffer, Buffer, "buffer");
impl_variant!(State, Thread, "thread");

impl From<bool> for Value {
    #[inline]
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    #[inline]
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<f32> for Value {
    #[inline]
    fn from(n: f32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    #[inline]
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    #[inline]
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<&[u8]> for Value {
    #[inline]
    fn from(bytes: &[u8]) -> Self {
        Value::String(bytes.into())
    }
}

impl From<Vec<u8>> for Value {
    #[inline]
    fn from(bytes: Vec<u8>) -> Self {
        Value::String(bytes.into())
    }
}

impl From<&Value> for Value {
    #[inline]
    fn from(v: &Value) -> Self {
        v.clone()
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::value::ValueKind;

    #[test]
    fn test_exact_integer_policy() {
        assert_eq!(Value::Number(10.0).try_read::<i32>(), Some(10));
        assert_eq!(Value::Number(-3.0).try_read::<i64>(), Some(-3));
        assert_eq!(Value::Number(10.5).try_read::<i32>(), None);
        assert_eq!(Value::Number(-1.0).try_read::<u32>(), None);
        assert_eq!(Value::Number(f64::NAN).try_read::<i32>(), None);
        assert_eq!(Value::Number(f64::INFINITY).try_read::<u64>(), None);
        assert_eq!(Value::Number(300.0).try_read::<u8>(), None);
        assert_eq!(Value::Number(-0.0).try_read::<u8>(), Some(0));
    }

    #[test]
    fn test_number_round_trip() {
        for n in [0i32, 1, -1, 42, i32::MAX, i32::MIN] {
            assert_eq!(Value::from(n).read::<i32>().unwrap(), n);
        }
        assert_eq!(Value::from(2.5f64).read::<f64>().unwrap(), 2.5);
        assert_eq!(Value::from(2.5f64).read::<f32>().unwrap(), 2.5f32);
    }

    #[test]
    fn test_conversion_error() {
        let err = Value::from("text").read::<f64>().unwrap_err();
        assert_eq!(
            err,
            Error::Conversion {
                from: ValueKind::String,
                to: "f64"
            }
        );
        assert!(err.is_usage_error());
    }

    #[test]
    fn test_option_reads_nil() {
        assert_eq!(Value::Nil.try_read::<Option<f64>>(), Some(None));
        assert_eq!(Value::Number(1.0).try_read::<Option<f64>>(), Some(Some(1.0)));
        assert_eq!(Value::Boolean(true).try_read::<Option<f64>>(), None);
    }

    #[test]
    fn test_strings_and_vectors() {
        let v = Value::from("hello");
        assert_eq!(v.read::<String>().unwrap(), "hello");
        let vec = Value::from(Vector::new(1.0, 2.0, 3.0));
        assert_eq!(vec.read::<Vector>().unwrap(), Vector::new(1.0, 2.0, 3.0));
        assert_eq!(Value::from(None::<f64>), Value::Nil);
    }

    #[test]
    fn test_non_utf8_string() {
        let v = Value::from(vec![b'a', 0xff]);
        assert_eq!(
            v.read::<String>().unwrap_err(),
            Error::Conversion {
                from: ValueKind::String,
                to: "utf-8 string"
            }
        );
        assert_eq!(v.read::<Vec<u8>>().unwrap(), vec![b'a', 0xff]);
        assert_eq!(v.read::<LuauString>().unwrap().len(), 2);
    }
}
