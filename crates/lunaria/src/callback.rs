//! Host callbacks exposed to scripts as native closures.
//!
//! A callback is boxed and stored in a userdata upvalue of the closure; the
//! userdata destructor frees the box when the VM collects the closure.
//!
//! Nothing unwinds out of a trampoline except the VM's own error: Rust errors
//! and panics are caught at the boundary, every Rust local is dropped, and
//! only then is the rendered message raised with `lua_error`.

use std::ffi::{c_int, c_void, CString};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::{pin, Pin};
use std::task::{Context, Poll, Waker};

use lunaria_sys::{self as ffi, lua_State};

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::runner::RunMode;
use crate::state::State;
use crate::util;

/// Pending completion of an asynchronous host function: the number of
/// results it pushed, or a fault.
pub(crate) type HostFuture = Pin<Box<dyn Future<Output = Result<c_int>>>>;

struct HostFunction<F> {
    name: CString,
    func: F,
}

/// Push a closure calling `func` synchronously.
pub(crate) unsafe fn push_sync<F>(l: *mut lua_State, name: CString, func: F) -> Result<()>
where
    F: Fn(&State) -> Result<i32> + 'static,
{
    util::reserve(l, 2)?;
    let host = push_boxed(l, HostFunction { name, func });
    ffi::lua_pushcclosurek(l, sync_trampoline::<F>, (*host).name.as_ptr(), 1, None);
    Ok(())
}

/// Push a closure calling `func` and awaiting the future it returns.
pub(crate) unsafe fn push_async<F, Fut>(l: *mut lua_State, name: CString, func: F) -> Result<()>
where
    F: Fn(State, CancellationToken) -> Fut + 'static,
    Fut: Future<Output = Result<i32>> + 'static,
{
    util::reserve(l, 2)?;
    let host = push_boxed(l, HostFunction { name, func });
    ffi::lua_pushcclosurek(l, async_trampoline::<F, Fut>, (*host).name.as_ptr(), 1, None);
    Ok(())
}

unsafe fn push_boxed<T: 'static>(l: *mut lua_State, value: T) -> *const T {
    let raw = Box::into_raw(Box::new(value));
    let slot = ffi::lua_newuserdatadtor(l, std::mem::size_of::<*mut T>(), drop_boxed::<T>) as *mut *mut T;
    slot.write(raw);
    raw
}

unsafe extern "C-unwind" fn drop_boxed<T>(ud: *mut c_void) {
    let raw = *(ud as *mut *mut T);
    if raw.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| drop(Box::from_raw(raw))));
}

#[inline]
unsafe fn upvalue<'a, T>(l: *mut lua_State) -> &'a T {
    &**(ffi::lua_touserdata(l, ffi::lua_upvalueindex(1)) as *const *const T)
}

/// A host function may return at most as many values as its frame holds.
pub(crate) unsafe fn check_results(l: *mut lua_State, n: i32) -> Result<c_int> {
    let top = ffi::lua_gettop(l);
    if n < 0 || n > top {
        return Err(Error::runtime(format!(
            "host function returned {} results but its stack holds {} values",
            n, top
        )));
    }
    Ok(n)
}

/// Raise `message` as a VM error. `message` is dropped before the jump.
unsafe fn raise(l: *mut lua_State, message: String) -> ! {
    ffi::lua_settop(l, 0);
    util::push_str(l, &message);
    drop(message);
    ffi::lua_error(l)
}

unsafe extern "C-unwind" fn sync_trampoline<F>(l: *mut lua_State) -> c_int
where
    F: Fn(&State) -> Result<i32> + 'static,
{
    let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<c_int> {
        let host = upvalue::<HostFunction<F>>(l);
        let state = State::from_ptr(l)?;
        let n = (host.func)(&state)?;
        check_results(l, n)
    }));
    let message = match outcome {
        Ok(Ok(n)) => return n,
        Ok(Err(err)) => err.to_string(),
        Err(payload) => util::panic_message(payload),
    };
    raise(l, message)
}

enum AsyncStep {
    Return(c_int),
    Suspend,
}

unsafe extern "C-unwind" fn async_trampoline<F, Fut>(l: *mut lua_State) -> c_int
where
    F: Fn(State, CancellationToken) -> Fut + 'static,
    Fut: Future<Output = Result<i32>> + 'static,
{
    let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<AsyncStep> {
        let host = upvalue::<HostFunction<F>>(l);
        let state = State::from_ptr(l)?;
        begin_async(l, &state, |cancel| (host.func)(state.clone(), cancel))
    }));
    let message = match outcome {
        Ok(Ok(AsyncStep::Return(n))) => return n,
        Ok(Ok(AsyncStep::Suspend)) => return ffi::lua_yield(l, 0),
        Ok(Err(err)) => err.to_string(),
        Err(payload) => util::panic_message(payload),
    };
    raise(l, message)
}

/// Start an asynchronous host call on `state`.
///
/// Inside an asynchronous run the future is parked in the run context and
/// the coroutine suspends. Anywhere else (synchronous runs, coroutines
/// resumed by scripts) the future is polled once and must already be ready.
unsafe fn begin_async<Fut>(
    l: *mut lua_State,
    state: &State,
    start: impl FnOnce(CancellationToken) -> Fut,
) -> Result<AsyncStep>
where
    Fut: Future<Output = Result<i32>> + 'static,
{
    let (cancel, suspend) = match state.inner().run.lock().as_ref() {
        Some(ctx) => (
            ctx.cancel.clone(),
            ctx.mode == RunMode::Async && ffi::lua_isyieldable(l) != 0,
        ),
        None => (CancellationToken::new(), false),
    };

    let future = start(cancel);
    if !suspend {
        let n = poll_now(future)?;
        return check_results(l, n).map(AsyncStep::Return);
    }

    let mut run = state.inner().run.lock();
    match run.as_mut() {
        Some(ctx) => {
            ctx.pending = Some(Box::pin(future));
            ctx.host_yield = true;
            tracing::trace!(thread = ?l, "suspending for asynchronous host function");
            Ok(AsyncStep::Suspend)
        }
        None => Err(Error::runtime("run ended while starting an asynchronous host function")),
    }
}

/// Poll `future` once without a runtime.
pub(crate) fn poll_now<Fut>(future: Fut) -> Result<i32>
where
    Fut: Future<Output = Result<i32>>,
{
    let mut future = pin!(future);
    let mut cx = Context::from_waker(Waker::noop());
    match future.as_mut().poll(&mut cx) {
        Poll::Ready(result) => result,
        Poll::Pending => Err(Error::runtime(
            "asynchronous host function cannot complete during a synchronous run",
        )),
    }
}
