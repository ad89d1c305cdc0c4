//! Module loading
//!
//! `require(name)` resolves `name` to a cache key through a [`Requirer`],
//! runs the module chunk once and caches its single result per heap. Later
//! requires of the same key return the cached value without re-running the
//! module body.
//!
//! ```text
//! require(name) ──► cache_key(name) ──► cached? ──yes──► value
//!                                          │ no
//!                                          ▼
//!                   load(key) ──► execute ──► exactly one result ──► cache
//! ```
//!
//! A module returning `nil` is not cached and runs again on the next require.

mod fs;

pub use fs::FileSystemRequirer;

use std::cell::RefCell;
use std::collections::HashSet;
use std::ffi::c_int;

use lunaria_sys::{self as ffi, lua_State};

use crate::error::{Error, Result};
use crate::state::State;
use crate::table::Table;
use crate::util;
use crate::value::Value;

/// Registry field holding the per-heap module cache.
const MODULES_KEY: &std::ffi::CStr = c"_MODULES";

/// Compiled module ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleChunk {
    /// Chunk name reported in error messages and tracebacks
    pub chunk_name: String,
    pub bytecode: Vec<u8>,
}

/// Resolves and loads modules for `require`.
pub trait Requirer: 'static {
    /// Canonical cache key for the argument given to `require`.
    ///
    /// Two names resolving to the same module must produce the same key.
    fn cache_key(&self, name: &str) -> Result<String>;

    /// Load the module identified by `cache_key`.
    fn load(&self, state: &State, cache_key: &str) -> Result<ModuleChunk>;
}

struct ModuleLoader<R> {
    requirer: R,
    /// Keys whose module body is currently running.
    loading: RefCell<HashSet<String>>,
}

impl<R: Requirer> ModuleLoader<R> {
    fn require(&self, state: &State, name: &str) -> Result<Value> {
        let key = self.requirer.cache_key(name)?;
        let cache = module_cache(state)?;
        let cached: Value = cache.raw_get(key.as_str())?;
        if !cached.is_nil() {
            tracing::trace!(module = name, key = %key, "module cache hit");
            return Ok(cached);
        }

        if !self.loading.borrow_mut().insert(key.clone()) {
            return Err(Error::runtime(format!("cyclic require of module '{}'", name)));
        }
        let result = self.run(state, name, &key);
        self.loading.borrow_mut().remove(&key);

        let value = result.inspect_err(|err| {
            tracing::warn!(module = name, key = %key, error = %err, "failed to load module");
        })?;
        if !value.is_nil() {
            cache.raw_set(key.as_str(), &value)?;
        }
        tracing::debug!(module = name, key = %key, "loaded module");
        Ok(value)
    }

    fn run(&self, state: &State, name: &str, key: &str) -> Result<Value> {
        let chunk = self.requirer.load(state, key)?;
        let mut results = state.execute(&chunk.bytecode, Some(&chunk.chunk_name))?;
        if results.len() != 1 {
            return Err(Error::runtime(format!(
                "module '{}' must return exactly one value, got {}",
                name,
                results.len()
            )));
        }
        Ok(results.pop().unwrap_or(Value::Nil))
    }
}

/// The module cache table of `state`'s heap, created on first use.
fn module_cache(state: &State) -> Result<Table> {
    state.create_pinned(
        |l| unsafe { util::protect(l, 0, 1, module_cache_impl) },
        Table::from_pinned,
    )
}

unsafe extern "C-unwind" fn module_cache_impl(l: *mut lua_State) -> c_int {
    ffi::lua_getfield(l, ffi::LUA_REGISTRYINDEX, MODULES_KEY.as_ptr());
    if ffi::lua_type(l, -1) != ffi::LUA_TTABLE {
        ffi::lua_pop(l, 1);
        ffi::lua_newtable(l);
        ffi::lua_pushvalue(l, -1);
        ffi::lua_setfield(l, ffi::LUA_REGISTRYINDEX, MODULES_KEY.as_ptr());
    }
    1
}

impl State {
    /// Install a global `require` backed by `requirer`.
    pub fn open_require<R: Requirer>(&self, requirer: R) -> Result<()> {
        let loader = ModuleLoader {
            requirer,
            loading: RefCell::new(HashSet::new()),
        };
        let require = self.create_function("require", move |state| {
            let name: String = state.arg(1)?;
            let value = loader.require(state, &name)?;
            state.push(value)?;
            Ok(1)
        })?;
        self.set_global("require", &require)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, CompileOptions};
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::rc::Rc;

    /// Modules held in memory, counting how often each is loaded.
    struct MemoryRequirer {
        sources: HashMap<&'static str, &'static str>,
        loads: Rc<Cell<usize>>,
    }

    impl Requirer for MemoryRequirer {
        fn cache_key(&self, name: &str) -> Result<String> {
            let key = name.trim_start_matches("./");
            if self.sources.contains_key(key) {
                Ok(key.to_owned())
            } else {
                Err(Error::runtime(format!("module '{}' not found", name)))
            }
        }

        fn load(&self, _state: &State, cache_key: &str) -> Result<ModuleChunk> {
            self.loads.set(self.loads.get() + 1);
            let source = self.sources.get(cache_key).copied().unwrap_or_default();
            Ok(ModuleChunk {
                chunk_name: format!("={}", cache_key),
                bytecode: compile(source, &CompileOptions::default())?,
            })
        }
    }

    fn state_with(sources: &[(&'static str, &'static str)]) -> (State, Rc<Cell<usize>>) {
        let state = State::new().unwrap();
        let loads = Rc::new(Cell::new(0));
        state
            .open_require(MemoryRequirer {
                sources: sources.iter().copied().collect(),
                loads: loads.clone(),
            })
            .unwrap();
        (state, loads)
    }

    #[test]
    fn test_require_is_cached() {
        let (state, loads) = state_with(&[("counter", "count = (count or 0) + 1 return { n = count }")]);
        let values = state
            .do_string("local a = require('counter') local b = require('./counter') return a == b, a.n")
            .unwrap();
        assert_eq!(values, vec![Value::Boolean(true), Value::Number(1.0)]);
        assert_eq!(loads.get(), 1);
    }

    #[test]
    fn test_nil_result_is_not_cached() {
        let (state, loads) = state_with(&[("side", "hits = (hits or 0) + 1 return nil")]);
        state.do_string("require('side') require('side')").unwrap();
        assert_eq!(loads.get(), 2);
        assert_eq!(state.get_global::<f64>("hits").unwrap(), 2.0);
    }

    #[test]
    fn test_module_must_return_one_value() {
        let (state, _) = state_with(&[("two", "return 1, 2"), ("none", "local x = 1")]);
        let err = state.do_string("require('two')").unwrap_err();
        assert!(err.to_string().contains("exactly one value, got 2"), "{}", err);
        let err = state.do_string("require('none')").unwrap_err();
        assert!(err.to_string().contains("got 0"), "{}", err);
    }

    #[test]
    fn test_missing_module() {
        let (state, _) = state_with(&[]);
        let err = state.do_string("require('ghost')").unwrap_err();
        assert_eq!(err, Error::Runtime("module 'ghost' not found".into()));
    }

    #[test]
    fn test_cyclic_require_is_reported() {
        let (state, _) = state_with(&[("a", "return require('b')"), ("b", "return require('a')")]);
        let err = state.do_string("require('a')").unwrap_err();
        assert!(err.to_string().contains("cyclic require of module 'a'"), "{}", err);
    }
}
