//! Table handles

use std::ffi::c_int;

use lunaria_sys::{self as ffi, lua_State};

use crate::convert::FromValue;
use crate::error::{Error, Result};
use crate::registry::{registry_handle, Pinned};
use crate::state::{read_value, write_value};
use crate::util;
use crate::value::Value;

registry_handle!(
    /// Handle to a table on the VM heap.
    ///
    /// `get`/`set` go through metamethods; the `raw_*` variants bypass them.
    Table,
    "table"
);

impl Table {
    /// Read `table[key]`, honoring `__index`.
    pub fn get<T: FromValue>(&self, key: impl Into<Value>) -> Result<T> {
        self.get_value(key.into())?.read()
    }

    /// Read `table[key]` as `T`, or `None` when absent or of another kind.
    pub fn try_get<T: FromValue>(&self, key: impl Into<Value>) -> Result<Option<T>> {
        Ok(self.get_value(key.into())?.try_read())
    }

    fn get_value(&self, key: Value) -> Result<Value> {
        self.pinned.with_value(Self::KIND, |l, owner| unsafe {
            write_value(owner, l, &key)?;
            util::protect(l, 2, 1, gettable_impl)?;
            read_value(owner, l, -1)
        })
    }

    /// Assign `table[key] = value`, honoring `__newindex`.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        let (key, value) = (key.into(), value.into());
        crate::state::check_key(&key)?;
        self.pinned.with_value(Self::KIND, |l, owner| unsafe {
            write_value(owner, l, &key)?;
            write_value(owner, l, &value)?;
            util::protect(l, 3, 0, settable_impl)
        })
    }

    /// Read `table[key]` without metamethods.
    pub fn raw_get<T: FromValue>(&self, key: impl Into<Value>) -> Result<T> {
        let key = key.into();
        self.pinned
            .with_value(Self::KIND, |l, owner| unsafe {
                write_value(owner, l, &key)?;
                ffi::lua_rawget(l, -2);
                read_value(owner, l, -1)
            })?
            .read()
    }

    /// Assign `table[key] = value` without metamethods.
    pub fn raw_set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        let (key, value) = (key.into(), value.into());
        crate::state::check_key(&key)?;
        self.pinned.with_value(Self::KIND, |l, owner| unsafe {
            check_writable(l)?;
            write_value(owner, l, &key)?;
            write_value(owner, l, &value)?;
            util::protect(l, 3, 0, rawset_impl)
        })
    }

    /// True when the table itself holds a non-nil value at `key`.
    pub fn contains_key(&self, key: impl Into<Value>) -> Result<bool> {
        let key = key.into();
        if key.is_nil() {
            return Ok(false);
        }
        self.pinned.with_value(Self::KIND, |l, owner| unsafe {
            write_value(owner, l, &key)?;
            ffi::lua_rawget(l, -2);
            Ok(!ffi::lua_isnil(l, -1))
        })
    }

    /// Length of the array part (the `#` operator without `__len`).
    pub fn len(&self) -> Result<usize> {
        self.pinned
            .with_value(Self::KIND, |l, _| unsafe { Ok(ffi::lua_objlen(l, -1).max(0) as usize) })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.next(&Value::Nil)?.is_none())
    }

    /// The entry following `key` in traversal order; pass `nil` to start.
    pub fn next(&self, key: &Value) -> Result<Option<(Value, Value)>> {
        self.pinned.with_value(Self::KIND, |l, owner| unsafe {
            write_value(owner, l, key)?;
            util::protect(l, 2, 2, next_impl)?;
            if ffi::lua_isnil(l, -2) {
                return Ok(None);
            }
            let k = read_value(owner, l, -2)?;
            let v = read_value(owner, l, -1)?;
            Ok(Some((k, v)))
        })
    }

    /// Iterate over every entry. The table must not gain new keys while
    /// iterating.
    pub fn pairs(&self) -> Pairs {
        Pairs {
            table: self.clone(),
            key: Some(Value::Nil),
        }
    }

    /// Remove every entry, keeping the allocated capacity.
    pub fn clear(&self) -> Result<()> {
        self.pinned.with_value(Self::KIND, |l, _| unsafe {
            check_writable(l)?;
            ffi::lua_cleartable(l, -1);
            Ok(())
        })
    }

    /// Shallow copy sharing the metatable. The copy is writable.
    pub fn clone_table(&self) -> Result<Table> {
        self.pinned.with_value(Self::KIND, |l, owner| unsafe {
            util::protect(l, 1, 1, clone_impl)?;
            Ok(Table::from_pinned(Pinned::pin(owner, l, -1)))
        })
    }

    /// Freeze or unfreeze the table. Writes to a frozen table fail.
    pub fn set_readonly(&self, readonly: bool) -> Result<()> {
        self.pinned.with_value(Self::KIND, |l, _| unsafe {
            ffi::lua_setreadonly(l, -1, readonly as c_int);
            Ok(())
        })
    }

    pub fn is_readonly(&self) -> Result<bool> {
        self.pinned
            .with_value(Self::KIND, |l, _| unsafe { Ok(ffi::lua_getreadonly(l, -1) != 0) })
    }

    /// The table's metatable, if any.
    pub fn metatable(&self) -> Result<Option<Table>> {
        self.owner().get_metatable(&Value::Table(self.clone()))
    }

    /// Set or clear the table's metatable.
    pub fn set_metatable(&self, metatable: Option<&Table>) -> Result<()> {
        self.owner().set_metatable(&Value::Table(self.clone()), metatable)
    }
}

/// Iterator over the entries of a [`Table`].
pub struct Pairs {
    table: Table,
    /// `None` once exhausted.
    key: Option<Value>,
}

impl Iterator for Pairs {
    type Item = Result<(Value, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.key.take()?;
        match self.table.next(&key) {
            Ok(Some((k, v))) => {
                self.key = Some(k.clone());
                Some(Ok((k, v)))
            }
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

unsafe fn check_writable(l: *mut lua_State) -> Result<()> {
    if ffi::lua_getreadonly(l, -1) != 0 {
        return Err(Error::runtime("attempt to modify a readonly table"));
    }
    Ok(())
}

unsafe extern "C-unwind" fn gettable_impl(l: *mut lua_State) -> c_int {
    ffi::lua_gettable(l, 1);
    1
}

unsafe extern "C-unwind" fn settable_impl(l: *mut lua_State) -> c_int {
    ffi::lua_settable(l, 1);
    0
}

unsafe extern "C-unwind" fn rawset_impl(l: *mut lua_State) -> c_int {
    ffi::lua_rawset(l, 1);
    0
}

unsafe extern "C-unwind" fn next_impl(l: *mut lua_State) -> c_int {
    if ffi::lua_next(l, 1) == 0 {
        ffi::lua_pushnil(l);
        ffi::lua_pushnil(l);
    }
    2
}

unsafe extern "C-unwind" fn clone_impl(l: *mut lua_State) -> c_int {
    ffi::lua_createtable(l, ffi::lua_objlen(l, 1), 0);
    ffi::lua_pushnil(l);
    while ffi::lua_next(l, 1) != 0 {
        ffi::lua_pushvalue(l, -2);
        ffi::lua_insert(l, -2);
        ffi::lua_rawset(l, 2);
    }
    if ffi::lua_getmetatable(l, 1) != 0 {
        ffi::lua_setmetatable(l, 2);
    }
    1
}
