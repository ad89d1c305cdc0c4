//! Function handles

use std::ffi::c_int;

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::registry::registry_handle;
use crate::runner::{RunMode, Runner};
use crate::state::{pop_results, pop_results_into, write_value, State};
use crate::util;
use crate::value::Value;

registry_handle!(
    /// Handle to a script or host function on the VM heap.
    ///
    /// Calls run on a fresh thread of the owning heap, so a function may
    /// await asynchronous host functions when called with
    /// [`call_async`](Function::call_async).
    Function,
    "function"
);

impl Function {
    /// Thread holding this function and `args`, ready to start.
    fn prepare(&self, args: &[Value]) -> Result<(State, c_int)> {
        if self.is_disposed() {
            return Err(Error::Disposed(Self::KIND));
        }
        let nargs = c_int::try_from(args.len())
            .map_err(|_| Error::InvalidArgument("too many call arguments".into()))?;
        let owner = self.owner();
        let thread = owner.create_thread()?;
        let co = thread.ptr()?;
        unsafe {
            util::reserve(co, nargs + 1)?;
            self.pinned.push_onto(owner, co, Self::KIND)?;
            for arg in args {
                write_value(owner, co, arg)?;
            }
        }
        Ok((thread, nargs))
    }

    /// Call with `args` and return every result.
    pub fn call(&self, args: &[Value]) -> Result<Vec<Value>> {
        let (thread, nargs) = self.prepare(args)?;
        let count = Runner::acquire(&thread, RunMode::Sync, None)?.run_sync(nargs)?;
        unsafe { pop_results(self.owner(), thread.ptr()?, count) }
    }

    /// Call with `args`, writing the results into `dest`.
    pub fn call_into(&self, args: &[Value], dest: &mut [Value]) -> Result<usize> {
        let (thread, nargs) = self.prepare(args)?;
        let count = Runner::acquire(&thread, RunMode::Sync, None)?.run_sync(nargs)?;
        unsafe { pop_results_into(self.owner(), thread.ptr()?, count, dest) }
    }

    /// Call with `args`, awaiting asynchronous host functions.
    pub async fn call_async(&self, args: &[Value], cancel: Option<&CancellationToken>) -> Result<Vec<Value>> {
        let (thread, nargs) = self.prepare(args)?;
        let count = Runner::acquire(&thread, RunMode::Async, cancel)?
            .run_async(nargs)
            .await?;
        unsafe { pop_results(self.owner(), thread.ptr()?, count) }
    }
}
