//! Creation of VM heap objects.
//!
//! Every constructor pins exactly one registry slot for the handle it returns.

use std::ffi::c_int;
use std::future::Future;

use lunaria_sys as ffi;

use super::{write_value, State};
use crate::buffer::Buffer;
use crate::callback;
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::function::Function;
use crate::registry::Pinned;
use crate::table::Table;
use crate::userdata::UserData;
use crate::util::{self, StackGuard};
use crate::value::Value;

/// Largest capacity hint forwarded to the VM.
const MAX_CAPACITY_HINT: usize = 1 << 24;

impl State {
    /// Run `f` on the main stack and pin the single value it leaves on top.
    pub(crate) fn create_pinned<R>(
        &self,
        build: impl FnOnce(*mut ffi::lua_State) -> Result<()>,
        wrap: impl FnOnce(std::rc::Rc<Pinned>) -> R,
    ) -> Result<R> {
        let l = self.main_ptr()?;
        let _heap = self.enter_heap()?;
        unsafe {
            let _guard = StackGuard::new(l);
            util::reserve(l, 4)?;
            build(l)?;
            Ok(wrap(Pinned::pin(self, l, -1)))
        }
    }

    /// Create an empty table.
    pub fn create_table(&self) -> Result<Table> {
        self.create_table_with_capacity(0, 0)
    }

    /// Create an empty table with preallocated array and hash parts.
    pub fn create_table_with_capacity(&self, narr: usize, nrec: usize) -> Result<Table> {
        let narr = narr.min(MAX_CAPACITY_HINT) as c_int;
        let nrec = nrec.min(MAX_CAPACITY_HINT) as c_int;
        self.create_pinned(
            |l| unsafe {
                ffi::lua_createtable(l, narr, nrec);
                Ok(())
            },
            Table::from_pinned,
        )
    }

    /// Create a sequence table `{values[0], values[1], ...}`.
    ///
    /// Trailing `nil` values are stored as holes.
    pub fn create_table_from_values<I, V>(&self, values: I) -> Result<Table>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.create_pinned(
            |l| unsafe {
                ffi::lua_createtable(l, values.len().min(MAX_CAPACITY_HINT) as c_int, 0);
                for (i, value) in values.iter().enumerate() {
                    let index = c_int::try_from(i + 1)
                        .map_err(|_| Error::InvalidArgument("too many values for one table".into()))?;
                    write_value(self, l, value)?;
                    ffi::lua_rawseti(l, -2, index);
                }
                Ok(())
            },
            Table::from_pinned,
        )
    }

    /// Create a table from key/value pairs. `nil` and NaN keys are rejected.
    pub fn create_table_from_pairs<I, K, V>(&self, pairs: I) -> Result<Table>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        let pairs: Vec<(Value, Value)> = pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        for (key, _) in &pairs {
            check_key(key)?;
        }
        self.create_pinned(
            |l| unsafe {
                ffi::lua_createtable(l, 0, pairs.len().min(MAX_CAPACITY_HINT) as c_int);
                for (key, value) in &pairs {
                    write_value(self, l, key)?;
                    write_value(self, l, value)?;
                    ffi::lua_rawset(l, -3);
                }
                Ok(())
            },
            Table::from_pinned,
        )
    }

    /// Create a function backed by a synchronous host callback.
    ///
    /// The callback reads its arguments with [`State::arg`], pushes its
    /// results and returns how many it pushed. Errors and panics are raised
    /// into the script as runtime errors.
    pub fn create_function<F>(&self, name: &str, func: F) -> Result<Function>
    where
        F: Fn(&State) -> Result<i32> + 'static,
    {
        let name = util::to_cstring(name)?;
        self.create_pinned(
            |l| unsafe { callback::push_sync(l, name, func) },
            Function::from_pinned,
        )
    }

    /// Create a function backed by an asynchronous host callback.
    ///
    /// The callback receives the calling state and the cancellation token of
    /// the current run. Arguments must be read in the callback itself: once
    /// the coroutine suspends they are no longer addressable. When the future
    /// resolves it must have pushed the number of results it returns onto
    /// that state. Inside an asynchronous
    /// run the calling coroutine is suspended until the future completes;
    /// the script never observes the suspension.
    pub fn create_async_function<F, Fut>(&self, name: &str, func: F) -> Result<Function>
    where
        F: Fn(State, CancellationToken) -> Fut + 'static,
        Fut: Future<Output = Result<i32>> + 'static,
    {
        let name = util::to_cstring(name)?;
        self.create_pinned(
            |l| unsafe { callback::push_async(l, name, func) },
            Function::from_pinned,
        )
    }

    /// Create a suspended coroutine whose body is `body`.
    ///
    /// The first resume passes its arguments to `body`.
    pub fn create_coroutine(&self, body: &Function) -> Result<State> {
        let thread = self.create_thread()?;
        let co = thread.ptr()?;
        let main = self.main_ptr()?;
        unsafe {
            let _guard = StackGuard::new(main);
            body.pinned.push_onto(self, main, Function::KIND)?;
            ffi::lua_xmove(main, co, 1);
        }
        Ok(thread)
    }

    /// Create a zero-filled buffer of `size` bytes.
    pub fn create_buffer(&self, size: usize) -> Result<Buffer> {
        self.create_pinned(
            |l| unsafe {
                protected_newbuffer(l, size)?;
                Ok(())
            },
            Buffer::from_pinned,
        )
    }

    /// Create a buffer holding a copy of `bytes`.
    pub fn create_buffer_from(&self, bytes: &[u8]) -> Result<Buffer> {
        self.create_pinned(
            |l| unsafe {
                let data = protected_newbuffer(l, bytes.len())?;
                if !bytes.is_empty() {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), data, bytes.len());
                }
                Ok(())
            },
            Buffer::from_pinned,
        )
    }

    /// Create a full userdata block holding a copy of `value`.
    pub fn create_userdata<T: Copy + 'static>(&self, value: T) -> Result<UserData> {
        let size = std::mem::size_of::<T>();
        self.create_pinned(
            |l| unsafe {
                let data = ffi::lua_newuserdata(l, size) as *mut T;
                if data.is_null() && size > 0 {
                    return Err(Error::Resource("not enough memory for userdata".into()));
                }
                if size > 0 {
                    data.write_unaligned(value);
                }
                Ok(())
            },
            UserData::from_pinned,
        )
    }
}

/// `nil` and NaN cannot be table keys.
pub(crate) fn check_key(key: &Value) -> Result<()> {
    match key {
        Value::Nil => Err(Error::InvalidArgument("table index is nil".into())),
        Value::Number(n) if n.is_nan() => Err(Error::InvalidArgument("table index is NaN".into())),
        _ => Ok(()),
    }
}

/// Allocate a buffer in protected mode so an oversized request is reported
/// instead of raised.
unsafe fn protected_newbuffer(l: *mut ffi::lua_State, size: usize) -> Result<*mut u8> {
    if size > i32::MAX as usize {
        return Err(Error::Resource(format!("buffer of {} bytes is too large", size)));
    }
    ffi::lua_pushnumber(l, size as f64);
    util::protect(l, 1, 1, newbuffer_impl)?;
    let mut len = 0usize;
    Ok(ffi::lua_tobuffer(l, -1, &mut len) as *mut u8)
}

unsafe extern "C-unwind" fn newbuffer_impl(l: *mut ffi::lua_State) -> c_int {
    let size = ffi::lua_tonumber(l, 1) as usize;
    ffi::lua_newbuffer(l, size);
    1
}
