//! Globals, metatables and libraries.

use std::ffi::c_int;

use lunaria_sys::{self as ffi, lua_State};

use super::{write_value, State};
use crate::convert::FromValue;
use crate::error::{Error, Result};
use crate::registry::Pinned;
use crate::table::Table;
use crate::util::{self, StackGuard};
use crate::value::Value;

/// A host-defined library installed as a global table.
///
/// ```ignore
/// struct Greeter;
///
/// impl Library for Greeter {
///     fn name(&self) -> &str {
///         "greeter"
///     }
///
///     fn register(&self, state: &State, table: &Table) -> Result<()> {
///         let hello = state.create_function("hello", |s| {
///             s.push("hello")?;
///             Ok(1)
///         })?;
///         table.set("hello", &hello)
///     }
/// }
/// ```
pub trait Library {
    /// Global name the library table is bound to
    fn name(&self) -> &str;

    /// Populate the library table.
    fn register(&self, state: &State, table: &Table) -> Result<()>;
}

impl State {
    /// The global environment table.
    pub fn globals(&self) -> Result<Table> {
        self.create_pinned(
            |l| unsafe {
                ffi::lua_pushvalue(l, ffi::LUA_GLOBALSINDEX);
                Ok(())
            },
            Table::from_pinned,
        )
    }

    /// Read global `name`, honoring metamethods of the environment.
    pub fn get_global<T: FromValue>(&self, name: &str) -> Result<T> {
        self.globals()?.get(name)
    }

    /// Assign global `name`.
    pub fn set_global(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.globals()?.set(name, value)
    }

    /// Metatable of `value`, if it has one.
    pub fn get_metatable(&self, value: &Value) -> Result<Option<Table>> {
        let l = self.main_ptr()?;
        unsafe {
            let _guard = StackGuard::new(l);
            util::reserve(l, 2)?;
            write_value(self, l, value)?;
            if ffi::lua_getmetatable(l, -1) == 0 {
                return Ok(None);
            }
            Ok(Some(Table::from_pinned(Pinned::pin(self, l, -1))))
        }
    }

    /// Set or clear the metatable of a table or userdata.
    pub fn set_metatable(&self, value: &Value, metatable: Option<&Table>) -> Result<()> {
        if !matches!(value, Value::Table(_) | Value::UserData(_)) {
            return Err(Error::InvalidArgument(format!(
                "cannot set the metatable of a {} value",
                value.kind()
            )));
        }
        let l = self.main_ptr()?;
        unsafe {
            let _guard = StackGuard::new(l);
            util::reserve(l, 2)?;
            write_value(self, l, value)?;
            if ffi::lua_type(l, -1) == ffi::LUA_TTABLE && ffi::lua_getreadonly(l, -1) != 0 {
                return Err(Error::runtime("attempt to modify a readonly table"));
            }
            match metatable {
                Some(mt) => mt.pinned.push_onto(self, l, Table::KIND)?,
                None => ffi::lua_pushnil(l),
            }
            ffi::lua_setmetatable(l, -2);
        }
        Ok(())
    }

    // ========================================================================
    // Libraries
    // ========================================================================

    fn open_with(&self, name: &'static str, open: ffi::lua_CFunction) -> Result<()> {
        let l = self.main_ptr()?;
        let _heap = self.enter_heap()?;
        unsafe {
            let _guard = StackGuard::new(l);
            util::reserve(l, 4)?;
            util::protect(l, 0, 0, open)?;
        }
        tracing::trace!(library = name, "opened library");
        Ok(())
    }

    /// Open every standard library.
    pub fn open_libraries(&self) -> Result<()> {
        self.open_with("all", openlibs_impl)
    }

    pub fn open_base_library(&self) -> Result<()> {
        self.open_with("base", ffi::luaopen_base)
    }

    pub fn open_coroutine_library(&self) -> Result<()> {
        self.open_with("coroutine", ffi::luaopen_coroutine)
    }

    pub fn open_table_library(&self) -> Result<()> {
        self.open_with("table", ffi::luaopen_table)
    }

    pub fn open_os_library(&self) -> Result<()> {
        self.open_with("os", ffi::luaopen_os)
    }

    pub fn open_string_library(&self) -> Result<()> {
        self.open_with("string", ffi::luaopen_string)
    }

    pub fn open_bit32_library(&self) -> Result<()> {
        self.open_with("bit32", ffi::luaopen_bit32)
    }

    pub fn open_buffer_library(&self) -> Result<()> {
        self.open_with("buffer", ffi::luaopen_buffer)
    }

    pub fn open_utf8_library(&self) -> Result<()> {
        self.open_with("utf8", ffi::luaopen_utf8)
    }

    pub fn open_math_library(&self) -> Result<()> {
        self.open_with("math", ffi::luaopen_math)
    }

    pub fn open_debug_library(&self) -> Result<()> {
        self.open_with("debug", ffi::luaopen_debug)
    }

    /// Open a standard library by its global name.
    pub fn open_library_by_name(&self, name: &str) -> Result<()> {
        match name {
            "base" => self.open_base_library(),
            "coroutine" => self.open_coroutine_library(),
            "table" => self.open_table_library(),
            "os" => self.open_os_library(),
            "string" => self.open_string_library(),
            "bit32" => self.open_bit32_library(),
            "buffer" => self.open_buffer_library(),
            "utf8" => self.open_utf8_library(),
            "math" => self.open_math_library(),
            "debug" => self.open_debug_library(),
            other => Err(Error::InvalidArgument(format!("unknown library '{}'", other))),
        }
    }

    /// Build `library` into a fresh table bound to its global name.
    pub fn open_library<L: Library + ?Sized>(&self, library: &L) -> Result<Table> {
        let table = self.create_table()?;
        library.register(self, &table)?;
        self.set_global(library.name(), &table)?;
        Ok(table)
    }
}

unsafe extern "C-unwind" fn openlibs_impl(l: *mut lua_State) -> c_int {
    ffi::luaL_openlibs(l);
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter;

    impl Library for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn register(&self, state: &State, table: &Table) -> Result<()> {
            let double = state.create_function("double", |s| {
                let n: f64 = s.arg(1)?;
                s.push(n * 2.0)?;
                Ok(1)
            })?;
            table.set("double", &double)?;
            table.set("version", 3.0)
        }
    }

    #[test]
    fn test_globals_round_trip() {
        let state = State::new().unwrap();
        state.set_global("answer", 42.0).unwrap();
        assert_eq!(state.get_global::<f64>("answer").unwrap(), 42.0);
        assert_eq!(state.do_string("return answer").unwrap(), vec![Value::Number(42.0)]);
        assert!(state.registry_stats().is_balanced());
    }

    #[test]
    fn test_open_library() {
        let state = State::new().unwrap();
        state.open_library(&Counter).unwrap();
        let values = state.do_string("return counter.double(21), counter.version").unwrap();
        assert_eq!(values, vec![Value::Number(42.0), Value::Number(3.0)]);
    }

    #[test]
    fn test_bad_argument_message() {
        let state = State::new().unwrap();
        state.open_library(&Counter).unwrap();
        let err = state.do_string("return counter.double('x')").unwrap_err();
        assert!(err.to_string().contains("bad argument #1"), "{}", err);
    }

    #[test]
    fn test_standard_libraries() {
        let state = State::new().unwrap();
        assert!(state.do_string("return math.floor(1.5)").is_err());
        state.open_math_library().unwrap();
        assert_eq!(state.do_string("return math.floor(1.5)").unwrap(), vec![Value::Number(1.0)]);
        state.open_libraries().unwrap();
        assert_eq!(
            state.do_string("return string.upper('a')").unwrap(),
            vec![Value::from("A")]
        );
        assert!(state.open_library_by_name("nope").is_err());
    }

    #[test]
    fn test_metatable_round_trip() {
        let state = State::new().unwrap();
        let table = state.create_table().unwrap();
        let mt = state.create_table().unwrap();
        let value = Value::from(&table);

        assert!(state.get_metatable(&value).unwrap().is_none());
        state.set_metatable(&value, Some(&mt)).unwrap();
        let got = state.get_metatable(&value).unwrap().unwrap();
        assert_eq!(got.to_pointer().unwrap(), mt.to_pointer().unwrap());

        state.set_metatable(&value, None).unwrap();
        assert!(state.get_metatable(&value).unwrap().is_none());

        let err = state.set_metatable(&Value::Number(1.0), Some(&mt)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
