//! Stack manipulation and value marshalling.

use std::ffi::{c_int, c_void};

use lunaria_sys::{self as ffi, lua_State};

use super::State;
use crate::buffer::Buffer;
use crate::convert::FromValue;
use crate::error::{Error, Result};
use crate::function::Function;
use crate::registry::Pinned;
use crate::table::Table;
use crate::userdata::UserData;
use crate::util;
use crate::value::{LightUserData, LuauString, Value, ValueKind, Vector};

// ============================================================================
// Marshalling
// ============================================================================

/// Convert the value at `idx` of `l` into a host value owned by `owner`.
///
/// Handle kinds pin a registry slot; strings are copied.
///
/// # Safety
/// `l` must be a live state of `owner`'s heap.
pub(crate) unsafe fn read_value(owner: &State, l: *mut lua_State, idx: c_int) -> Result<Value> {
    Ok(match ffi::lua_type(l, idx) {
        ffi::LUA_TNONE | ffi::LUA_TNIL => Value::Nil,
        ffi::LUA_TBOOLEAN => Value::Boolean(ffi::lua_toboolean(l, idx) != 0),
        ffi::LUA_TLIGHTUSERDATA => Value::LightUserData(LightUserData(ffi::lua_tolightuserdata(l, idx))),
        ffi::LUA_TNUMBER => Value::Number(ffi::lua_tonumber(l, idx)),
        ffi::LUA_TVECTOR => {
            let v = ffi::lua_tovector(l, idx);
            Value::Vector(Vector::new(*v, *v.add(1), *v.add(2)))
        }
        ffi::LUA_TSTRING => {
            let bytes = util::read_bytes(l, idx).unwrap_or_default();
            Value::String(LuauString::from(bytes))
        }
        ffi::LUA_TTABLE => Value::Table(Table::from_pinned(Pinned::pin(owner, l, idx))),
        ffi::LUA_TFUNCTION => Value::Function(Function::from_pinned(Pinned::pin(owner, l, idx))),
        ffi::LUA_TUSERDATA => Value::UserData(UserData::from_pinned(Pinned::pin(owner, l, idx))),
        ffi::LUA_TBUFFER => Value::Buffer(Buffer::from_pinned(Pinned::pin(owner, l, idx))),
        ffi::LUA_TTHREAD => Value::Thread(owner.thread_at(l, idx)?),
        other => return Err(Error::runtime(format!("unsupported Luau type tag {}", other))),
    })
}

/// Push `value` onto `l` on behalf of `target`.
///
/// Handles must be owned by `target`; threads must belong to its heap.
///
/// # Safety
/// `l` must be a live state of `target`'s heap.
pub(crate) unsafe fn write_value(target: &State, l: *mut lua_State, value: &Value) -> Result<()> {
    util::reserve(l, 1)?;
    match value {
        Value::Nil => ffi::lua_pushnil(l),
        Value::Boolean(b) => ffi::lua_pushboolean(l, *b as c_int),
        Value::LightUserData(p) => ffi::lua_pushlightuserdata(l, p.0),
        Value::Number(n) => ffi::lua_pushnumber(l, *n),
        Value::Vector(v) => ffi::lua_pushvector(l, v.x, v.y, v.z),
        Value::String(s) => util::push_bytes(l, s.as_bytes()),
        Value::Table(t) => t.pinned.push_onto(target, l, Table::KIND)?,
        Value::Function(f) => f.pinned.push_onto(target, l, Function::KIND)?,
        Value::UserData(u) => u.pinned.push_onto(target, l, UserData::KIND)?,
        Value::Buffer(b) => b.pinned.push_onto(target, l, Buffer::KIND)?,
        Value::Thread(thread) => push_thread(target, l, thread)?,
    }
    Ok(())
}

unsafe fn push_thread(target: &State, l: *mut lua_State, thread: &State) -> Result<()> {
    let co = thread.ptr()?;
    if !thread.same_heap(target) {
        return Err(Error::CrossState("thread"));
    }
    if co == l {
        ffi::lua_pushthread(l);
    } else {
        util::reserve(co, 1)?;
        ffi::lua_pushthread(co);
        ffi::lua_xmove(co, l, 1);
    }
    Ok(())
}

/// Pop `count` values from `l`, in call order.
pub(crate) unsafe fn pop_results(owner: &State, l: *mut lua_State, count: c_int) -> Result<Vec<Value>> {
    let mut values = vec![Value::Nil; count.max(0) as usize];
    fill_from_top(owner, l, &mut values)?;
    Ok(values)
}

/// Pop `count` values from `l` into `dest`, in call order.
///
/// When `dest` is too short the values are discarded and a usage error is
/// returned.
pub(crate) unsafe fn pop_results_into(
    owner: &State,
    l: *mut lua_State,
    count: c_int,
    dest: &mut [Value],
) -> Result<usize> {
    let needed = count.max(0) as usize;
    if dest.len() < needed {
        ffi::lua_pop(l, count);
        return Err(Error::DestinationTooShort {
            needed,
            capacity: dest.len(),
        });
    }
    fill_from_top(owner, l, &mut dest[..needed])?;
    Ok(needed)
}

/// Walk from the top of the stack downward, writing `dest` back to front.
unsafe fn fill_from_top(owner: &State, l: *mut lua_State, dest: &mut [Value]) -> Result<()> {
    let n = dest.len() as c_int;
    let result = (0..n).rev().try_for_each(|i| {
        dest[i as usize] = read_value(owner, l, -(n - i))?;
        Ok(())
    });
    ffi::lua_pop(l, n);
    result
}

// ============================================================================
// Stack API
// ============================================================================

impl State {
    /// Number of values on the stack.
    pub fn top(&self) -> Result<i32> {
        let l = self.ptr()?;
        Ok(unsafe { ffi::lua_gettop(l) })
    }

    /// Set the stack height. Growing pads with `nil`; negative indices count
    /// from the top.
    pub fn set_top(&self, idx: i32) -> Result<()> {
        let l = self.ptr()?;
        unsafe {
            let top = ffi::lua_gettop(l);
            if idx < 0 {
                self.check_index(l, idx)?;
            } else if idx > top {
                util::reserve(l, idx - top)?;
            }
            ffi::lua_settop(l, idx);
        }
        Ok(())
    }

    /// Convert a relative index into an absolute one.
    pub fn abs_index(&self, idx: i32) -> Result<i32> {
        let l = self.ptr()?;
        Ok(unsafe { ffi::lua_absindex(l, idx) })
    }

    /// Move the top value into `idx`, shifting values above it up.
    pub fn insert(&self, idx: i32) -> Result<()> {
        let l = self.ptr()?;
        unsafe {
            self.check_index(l, idx)?;
            ffi::lua_insert(l, idx);
        }
        Ok(())
    }

    /// Pop the top value into `idx`, overwriting it.
    pub fn replace(&self, idx: i32) -> Result<()> {
        let l = self.ptr()?;
        unsafe {
            self.check_index(l, idx)?;
            ffi::lua_replace(l, idx);
        }
        Ok(())
    }

    /// Remove the value at `idx`, shifting values above it down.
    pub fn remove(&self, idx: i32) -> Result<()> {
        let l = self.ptr()?;
        unsafe {
            self.check_index(l, idx)?;
            ffi::lua_remove(l, idx);
        }
        Ok(())
    }

    /// Push a copy of the value at `idx`.
    pub fn push_copy(&self, idx: i32) -> Result<()> {
        let l = self.ptr()?;
        unsafe {
            self.check_index(l, idx)?;
            util::reserve(l, 1)?;
            ffi::lua_pushvalue(l, idx);
        }
        Ok(())
    }

    /// Ensure room for `extra` more values.
    pub fn check_stack(&self, extra: i32) -> Result<bool> {
        let l = self.ptr()?;
        Ok(unsafe { ffi::lua_checkstack(l, extra) } != 0)
    }

    unsafe fn check_index(&self, l: *mut lua_State, idx: i32) -> Result<()> {
        let top = ffi::lua_gettop(l);
        if idx == 0 || idx > top || idx < -top {
            return Err(Error::InvalidArgument(format!(
                "stack index {} is out of range (top is {})",
                idx, top
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Push
    // ========================================================================

    /// Push a value. Handles must be owned by this state.
    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let l = self.ptr()?;
        unsafe { write_value(self, l, &value) }
    }

    /// Push every value in order.
    pub fn push_values(&self, values: &[Value]) -> Result<()> {
        let l = self.ptr()?;
        unsafe {
            util::reserve(l, values.len() as c_int)?;
            for value in values {
                write_value(self, l, value)?;
            }
        }
        Ok(())
    }

    pub fn push_nil(&self) -> Result<()> {
        self.push(Value::Nil)
    }

    pub fn push_boolean(&self, b: bool) -> Result<()> {
        self.push(Value::Boolean(b))
    }

    pub fn push_number(&self, n: f64) -> Result<()> {
        self.push(Value::Number(n))
    }

    /// Push an integer as a number.
    pub fn push_integer(&self, n: i32) -> Result<()> {
        let l = self.ptr()?;
        unsafe {
            util::reserve(l, 1)?;
            ffi::lua_pushinteger(l, n);
        }
        Ok(())
    }

    /// Push an unsigned integer as a number.
    pub fn push_unsigned(&self, n: u32) -> Result<()> {
        let l = self.ptr()?;
        unsafe {
            util::reserve(l, 1)?;
            ffi::lua_pushunsigned(l, n);
        }
        Ok(())
    }

    pub fn push_vector(&self, v: Vector) -> Result<()> {
        self.push(Value::Vector(v))
    }

    pub fn push_string(&self, s: &str) -> Result<()> {
        let l = self.ptr()?;
        unsafe {
            util::reserve(l, 1)?;
            util::push_str(l, s);
        }
        Ok(())
    }

    pub fn push_light_userdata(&self, p: *mut c_void) -> Result<()> {
        self.push(Value::LightUserData(LightUserData(p)))
    }

    // ========================================================================
    // Read
    // ========================================================================

    /// Kind of the value at `idx`, or `None` for an absent slot.
    pub fn type_of(&self, idx: i32) -> Result<Option<ValueKind>> {
        let l = self.ptr()?;
        Ok(ValueKind::from_type_tag(unsafe { ffi::lua_type(l, idx) }))
    }

    /// Convert the value at `idx`. Absent slots read as `nil`.
    pub fn to_value(&self, idx: i32) -> Result<Value> {
        let l = self.ptr()?;
        unsafe { read_value(self, l, idx) }
    }

    /// Convert the value at `idx` to `T`.
    pub fn to<T: FromValue>(&self, idx: i32) -> Result<T> {
        self.to_value(idx)?.read()
    }

    /// Script truthiness of the value at `idx`.
    pub fn to_boolean(&self, idx: i32) -> Result<bool> {
        let l = self.ptr()?;
        Ok(unsafe { ffi::lua_toboolean(l, idx) } != 0)
    }

    pub fn to_number(&self, idx: i32) -> Result<f64> {
        self.to(idx)
    }

    /// Exact integer reading: fractional numbers fail.
    pub fn to_integer(&self, idx: i32) -> Result<i32> {
        self.to(idx)
    }

    /// Exact unsigned reading: fractional and negative numbers fail.
    pub fn to_unsigned(&self, idx: i32) -> Result<u32> {
        self.to(idx)
    }

    pub fn to_vector(&self, idx: i32) -> Result<Vector> {
        self.to(idx)
    }

    pub fn to_str(&self, idx: i32) -> Result<String> {
        self.to(idx)
    }

    pub fn to_light_userdata(&self, idx: i32) -> Result<LightUserData> {
        self.to(idx)
    }

    pub fn to_table(&self, idx: i32) -> Result<Table> {
        self.to(idx)
    }

    pub fn to_function(&self, idx: i32) -> Result<Function> {
        self.to(idx)
    }

    pub fn to_userdata(&self, idx: i32) -> Result<UserData> {
        self.to(idx)
    }

    pub fn to_buffer(&self, idx: i32) -> Result<Buffer> {
        self.to(idx)
    }

    pub fn to_thread(&self, idx: i32) -> Result<State> {
        self.to(idx)
    }

    /// Address of the VM object at `idx`; zero for values without identity.
    pub fn to_pointer(&self, idx: i32) -> Result<usize> {
        let l = self.ptr()?;
        Ok(unsafe { ffi::lua_topointer(l, idx) } as usize)
    }

    /// Number of arguments passed to the running host function.
    pub fn arg_count(&self) -> Result<i32> {
        self.top()
    }

    /// Argument `n` (1-based) of the running host function.
    pub fn arg<T: FromValue>(&self, n: i32) -> Result<T> {
        self.to_value(n)?.read().map_err(|e| match e {
            Error::Conversion { from, to } => {
                Error::InvalidArgument(format!("bad argument #{} ({} expected, got {})", n, to, from))
            }
            other => other,
        })
    }

    // ========================================================================
    // Pop
    // ========================================================================

    /// Pop the top value.
    pub fn pop(&self) -> Result<Value> {
        let l = self.ptr()?;
        unsafe {
            if ffi::lua_gettop(l) == 0 {
                return Err(Error::InvalidArgument("stack is empty".into()));
            }
            let value = read_value(self, l, -1);
            ffi::lua_pop(l, 1);
            value
        }
    }

    /// Pop the top `n` values, in push order.
    pub fn pop_n(&self, n: i32) -> Result<Vec<Value>> {
        let l = self.ptr()?;
        unsafe {
            self.check_count(l, n)?;
            pop_results(self, l, n)
        }
    }

    /// Pop the top `n` values into `dest`, in push order.
    pub fn pop_into(&self, n: i32, dest: &mut [Value]) -> Result<usize> {
        let l = self.ptr()?;
        unsafe {
            self.check_count(l, n)?;
            pop_results_into(self, l, n, dest)
        }
    }

    unsafe fn check_count(&self, l: *mut lua_State, n: i32) -> Result<()> {
        let top = ffi::lua_gettop(l);
        if n < 0 || n > top {
            return Err(Error::InvalidArgument(format!(
                "cannot pop {} values from a stack of {}",
                n, top
            )));
        }
        Ok(())
    }

    /// Move the top `n` values onto `dest`, which must share this heap.
    pub fn xmove(&self, dest: &State, n: i32) -> Result<()> {
        let l = self.ptr()?;
        let to = dest.ptr()?;
        if !self.same_heap(dest) {
            return Err(Error::CrossState("value"));
        }
        unsafe {
            self.check_count(l, n)?;
            util::reserve(to, n)?;
            ffi::lua_xmove(l, to, n);
        }
        Ok(())
    }

    /// Call the function below the top `nargs` values in protected mode,
    /// leaving `nresults` results (or all of them for `LUA_MULTRET`).
    pub fn call(&self, nargs: i32, nresults: i32) -> Result<()> {
        let l = self.ptr()?;
        let _heap = self.enter_heap()?;
        unsafe {
            self.check_count(l, nargs + 1)?;
            if ffi::lua_type(l, -(nargs + 1)) != ffi::LUA_TFUNCTION {
                return Err(Error::InvalidArgument("attempt to call a non-function value".into()));
            }
            match ffi::lua_pcall(l, nargs, nresults, 0) {
                ffi::LUA_OK => Ok(()),
                status => Err(util::error_from_status(status, util::pop_error_message(l))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_strings_keep_their_bytes() {
        let state = State::new().unwrap();
        state.open_libraries().unwrap();
        let values = state.do_string("return string.char(255), string.char(254)").unwrap();
        assert_ne!(values[0], values[1]);
        assert_eq!(values[0].as_bytes(), Some(&b"\xff"[..]));
        assert!(matches!(values[0].read::<String>(), Err(Error::Conversion { .. })));

        let length = state.do_string("return function(s) return #s, s == string.char(255) end").unwrap();
        let length = length[0].read::<Function>().unwrap();
        let results = length.call(&[values[0].clone()]).unwrap();
        assert_eq!(results, vec![Value::Number(1.0), Value::Boolean(true)]);
    }

    #[test]
    fn test_push_pop_scalars() {
        let state = State::new().unwrap();
        state.push(10.5).unwrap();
        state.push("hi").unwrap();
        state.push(true).unwrap();
        assert_eq!(state.top().unwrap(), 3);
        assert_eq!(state.type_of(1).unwrap(), Some(ValueKind::Number));
        assert_eq!(state.type_of(4).unwrap(), None);

        let values = state.pop_n(3).unwrap();
        assert_eq!(values, vec![Value::Number(10.5), Value::from("hi"), Value::Boolean(true)]);
        assert_eq!(state.top().unwrap(), 0);
    }

    #[test]
    fn test_integer_round_trip() {
        let state = State::new().unwrap();
        state.push_integer(-7).unwrap();
        state.push_unsigned(7).unwrap();
        assert_eq!(state.to_integer(-2).unwrap(), -7);
        assert_eq!(state.to_unsigned(-1).unwrap(), 7);
        assert!(state.to_unsigned(-2).is_err());
        state.push_number(1.5).unwrap();
        assert!(matches!(state.to_integer(-1), Err(Error::Conversion { .. })));
    }

    #[test]
    fn test_vector_round_trip() {
        let state = State::new().unwrap();
        state.push_vector(Vector::new(1.0, 2.0, 3.0)).unwrap();
        assert_eq!(state.to_vector(-1).unwrap(), Vector::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_index_operations() {
        let state = State::new().unwrap();
        for n in 1..=3 {
            state.push_integer(n).unwrap();
        }
        state.insert(1).unwrap();
        assert_eq!(state.to_integer(1).unwrap(), 3);
        state.remove(1).unwrap();
        assert_eq!(state.to_integer(1).unwrap(), 1);
        state.push_copy(1).unwrap();
        state.replace(2).unwrap();
        assert_eq!(state.to_integer(2).unwrap(), 1);
        assert_eq!(state.abs_index(-1).unwrap(), 2);
        assert!(state.remove(5).is_err());
        state.set_top(0).unwrap();
        assert_eq!(state.top().unwrap(), 0);
    }

    #[test]
    fn test_pop_into_too_short() {
        let state = State::new().unwrap();
        state.push_integer(1).unwrap();
        state.push_integer(2).unwrap();
        let mut dest = [Value::Nil];
        let err = state.pop_into(2, &mut dest).unwrap_err();
        assert_eq!(err, Error::DestinationTooShort { needed: 2, capacity: 1 });
        assert_eq!(state.top().unwrap(), 0);

        state.push_integer(1).unwrap();
        state.push_integer(2).unwrap();
        let mut dest = [Value::Nil, Value::Nil, Value::Nil];
        assert_eq!(state.pop_into(2, &mut dest).unwrap(), 2);
        assert_eq!(dest[0], Value::Number(1.0));
        assert_eq!(dest[1], Value::Number(2.0));
    }

    #[test]
    fn test_disposed_state_rejects_stack_access() {
        let state = State::new().unwrap();
        state.dispose();
        assert_eq!(state.push(1.0).unwrap_err(), Error::Disposed("state"));
        assert_eq!(state.top().unwrap_err(), Error::Disposed("state"));
    }

    #[test]
    fn test_cross_state_push_rejected() {
        let a = State::new().unwrap();
        let b = State::new().unwrap();
        let table = a.create_table().unwrap();
        assert_eq!(b.push(&table).unwrap_err(), Error::CrossState("table"));
        let thread = a.create_thread().unwrap();
        assert_eq!(thread.push(&table).unwrap_err(), Error::CrossState("table"));
        a.push(&table).unwrap();
    }

    #[test]
    fn test_xmove_between_threads() {
        let state = State::new().unwrap();
        let thread = state.create_thread().unwrap();
        state.push(1.0).unwrap();
        state.push(2.0).unwrap();
        state.xmove(&thread, 2).unwrap();
        assert_eq!(state.top().unwrap(), 0);
        assert_eq!(thread.pop_n(2).unwrap(), vec![Value::Number(1.0), Value::Number(2.0)]);

        let other = State::new().unwrap();
        state.push(1.0).unwrap();
        assert_eq!(state.xmove(&other, 1).unwrap_err(), Error::CrossState("value"));
    }
}
