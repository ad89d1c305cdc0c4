//! Loading, executing and resuming.
//!
//! Chunks are executed on a fresh thread of the heap so the main state is
//! never resumed directly. A chunk that yields at top level hands the yielded
//! values back as its results.

use std::ffi::{c_char, c_int};

use lunaria_sys::{self as ffi, lua_State};

use super::{stack, State, ThreadStatus, DEFAULT_CHUNK_NAME};
use crate::cancel::CancellationToken;
use crate::compiler::{self, CompileOptions};
use crate::error::{Error, Result};
use crate::function::Function;
use crate::runner::{RunMode, Runner};
use crate::util;
use crate::value::Value;

/// Load `bytecode` as a function on top of `l`.
pub(crate) unsafe fn load_chunk(l: *mut lua_State, bytecode: &[u8], chunk_name: &str) -> Result<()> {
    if bytecode.is_empty() {
        return Err(Error::InvalidArgument("bytecode is empty".into()));
    }
    let name = util::to_cstring(chunk_name)?;
    util::reserve(l, 1)?;
    let status = ffi::luau_load(
        l,
        name.as_ptr(),
        bytecode.as_ptr() as *const c_char,
        bytecode.len(),
        0,
    );
    if status != 0 {
        let message = util::pop_error_message(l);
        tracing::debug!(chunk = chunk_name, error = %message, "failed to load chunk");
        return Err(Error::Syntax(message));
    }
    Ok(())
}

impl State {
    /// Load compiled bytecode as a function without running it.
    pub fn load(&self, bytecode: &[u8], chunk_name: Option<&str>) -> Result<Function> {
        let chunk = chunk_name.unwrap_or(DEFAULT_CHUNK_NAME);
        self.create_pinned(|l| unsafe { load_chunk(l, bytecode, chunk) }, Function::from_pinned)
    }

    /// Thread with the loaded chunk ready to start.
    fn chunk_thread(&self, bytecode: &[u8], chunk_name: Option<&str>) -> Result<State> {
        let thread = self.create_thread()?;
        let co = thread.ptr()?;
        unsafe { load_chunk(co, bytecode, chunk_name.unwrap_or(DEFAULT_CHUNK_NAME))? };
        Ok(thread)
    }

    /// Run compiled bytecode and return its results.
    pub fn execute(&self, bytecode: &[u8], chunk_name: Option<&str>) -> Result<Vec<Value>> {
        let thread = self.chunk_thread(bytecode, chunk_name)?;
        let count = Runner::acquire(&thread, RunMode::Sync, None)?.run_sync(0)?;
        unsafe { stack::pop_results(self, thread.ptr()?, count) }
    }

    /// Run compiled bytecode, writing its results into `dest`.
    pub fn execute_into(&self, bytecode: &[u8], chunk_name: Option<&str>, dest: &mut [Value]) -> Result<usize> {
        let thread = self.chunk_thread(bytecode, chunk_name)?;
        let count = Runner::acquire(&thread, RunMode::Sync, None)?.run_sync(0)?;
        unsafe { stack::pop_results_into(self, thread.ptr()?, count, dest) }
    }

    /// Run compiled bytecode, awaiting asynchronous host functions.
    pub async fn execute_async(
        &self,
        bytecode: &[u8],
        chunk_name: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Value>> {
        let thread = self.chunk_thread(bytecode, chunk_name)?;
        let count = Runner::acquire(&thread, RunMode::Async, cancel)?.run_async(0).await?;
        unsafe { stack::pop_results(self, thread.ptr()?, count) }
    }

    /// Compile and run `source` with default options.
    pub fn do_string(&self, source: &str) -> Result<Vec<Value>> {
        self.do_string_with(source, None, &CompileOptions::default())
    }

    /// Compile and run `source` under `chunk_name` with `options`.
    pub fn do_string_with(
        &self,
        source: &str,
        chunk_name: Option<&str>,
        options: &CompileOptions,
    ) -> Result<Vec<Value>> {
        let bytecode = compiler::compile(source, options)?;
        self.execute(&bytecode, chunk_name)
    }

    /// Compile and run `source`, awaiting asynchronous host functions.
    pub async fn do_string_async(&self, source: &str, cancel: Option<&CancellationToken>) -> Result<Vec<Value>> {
        let bytecode = compiler::compile(source, &CompileOptions::default())?;
        self.execute_async(&bytecode, None, cancel).await
    }

    // ========================================================================
    // Coroutines
    // ========================================================================

    /// Claim this coroutine and push the resume arguments.
    fn begin_resume(
        &self,
        args: &[Value],
        mode: RunMode,
        cancel: Option<&CancellationToken>,
    ) -> Result<(Runner<'_>, c_int)> {
        let l = self.ptr()?;
        if self.is_main_thread() {
            return Err(Error::NotACoroutine);
        }
        if matches!(self.status()?, ThreadStatus::Finished | ThreadStatus::Error) {
            return Err(Error::runtime("cannot resume dead coroutine"));
        }
        let runner = Runner::acquire(self, mode, cancel)?;
        let nargs = c_int::try_from(args.len())
            .map_err(|_| Error::InvalidArgument("too many resume arguments".into()))?;
        unsafe {
            let top = ffi::lua_gettop(l);
            if let Err(err) = self.push_values(args) {
                ffi::lua_settop(l, top);
                return Err(err);
            }
        }
        Ok((runner, nargs))
    }

    /// Resume this coroutine until it yields, returns or fails.
    ///
    /// Yielded or returned values come back in call order. Resuming the main
    /// state or a coroutine that is already running is a usage error.
    pub fn resume(&self, args: &[Value]) -> Result<Vec<Value>> {
        let (runner, nargs) = self.begin_resume(args, RunMode::Sync, None)?;
        let count = runner.run_sync(nargs)?;
        unsafe { stack::pop_results(self, self.ptr()?, count) }
    }

    /// Like [`resume`](Self::resume), writing the results into `dest`.
    pub fn resume_into(&self, args: &[Value], dest: &mut [Value]) -> Result<usize> {
        let (runner, nargs) = self.begin_resume(args, RunMode::Sync, None)?;
        let count = runner.run_sync(nargs)?;
        unsafe { stack::pop_results_into(self, self.ptr()?, count, dest) }
    }

    /// Resume this coroutine, awaiting asynchronous host functions it calls.
    ///
    /// `cancel` is observed only while such a function is pending; it is
    /// raised inside the coroutine and reported as [`Error::Cancelled`].
    pub async fn resume_async(&self, args: &[Value], cancel: Option<&CancellationToken>) -> Result<Vec<Value>> {
        let (runner, nargs) = self.begin_resume(args, RunMode::Async, cancel)?;
        let count = runner.run_async(nargs).await?;
        unsafe { stack::pop_results(self, self.ptr()?, count) }
    }

    /// Like [`resume_async`](Self::resume_async), writing the results into `dest`.
    pub async fn resume_async_into(
        &self,
        args: &[Value],
        dest: &mut [Value],
        cancel: Option<&CancellationToken>,
    ) -> Result<usize> {
        let (runner, nargs) = self.begin_resume(args, RunMode::Async, cancel)?;
        let count = runner.run_async(nargs).await?;
        unsafe { stack::pop_results_into(self, self.ptr()?, count, dest) }
    }
}
