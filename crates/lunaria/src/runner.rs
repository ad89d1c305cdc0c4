//! Coroutine execution engine
//!
//! A [`Runner`] owns the run marker of one state for the duration of a
//! resume and drives the native resume loop:
//!
//! ```text
//!            resume
//!   Idle ────────────► Running ──── OK ────────► Completed
//!                        │  ▲
//!        host yield      │  │ resume(n) / resumeerror(msg)
//!                        ▼  │
//!                  Suspended-by-Host ── await pending host future
//!                        │
//!        script yield ───┴────────────────────► Yielded-to-Caller
//! ```
//!
//! A host-initiated suspension is recognized by the `host_yield` flag the
//! asynchronous trampoline sets just before yielding; it is checked and
//! cleared after every native resume. Cancellation is only observed while a
//! pending host future is being awaited and is raised inside the coroutine.

use std::ffi::c_int;
use std::future::poll_fn;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::task::Poll;

use lunaria_sys as ffi;

use crate::callback::{self, HostFuture};
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::state::{HeapGuard, State};
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunMode {
    Sync,
    Async,
}

/// Per-state record of the resume in flight.
pub(crate) struct RunContext {
    pub(crate) mode: RunMode,
    pub(crate) cancel: CancellationToken,
    /// Set when the last suspension was requested by the bridge itself.
    pub(crate) host_yield: bool,
    /// The host operation the coroutine is suspended on.
    pub(crate) pending: Option<HostFuture>,
}

enum Step {
    Resume(c_int),
    Raise(String),
}

enum Resumed {
    /// Number of result values on top of the stack
    Done(c_int),
    Suspended(HostFuture),
}

pub(crate) struct Runner<'a> {
    state: &'a State,
    cancel: CancellationToken,
    /// Cancellation raised into the coroutine and not yet caught.
    cancelled: bool,
    _heap: HeapGuard,
}

impl<'a> Runner<'a> {
    /// Claim the run marker of `state`.
    pub(crate) fn acquire(
        state: &'a State,
        mode: RunMode,
        cancel: Option<&CancellationToken>,
    ) -> Result<Runner<'a>> {
        let heap = state.enter_heap()?;
        let cancel = cancel.cloned().unwrap_or_default();
        {
            let mut run = state.inner().run.lock();
            if run.is_some() {
                return Err(Error::AlreadyRunning);
            }
            *run = Some(RunContext {
                mode,
                cancel: cancel.clone(),
                host_yield: false,
                pending: None,
            });
        }
        Ok(Runner {
            state,
            cancel,
            cancelled: false,
            _heap: heap,
        })
    }

    /// Record the stack height below the body when the coroutine has not
    /// started yet. The body and `nargs` arguments must be on top.
    fn begin(&self, nargs: c_int) -> Result<()> {
        let l = self.state.ptr()?;
        unsafe {
            if ffi::lua_status(l) == ffi::LUA_OK {
                let base = (ffi::lua_gettop(l) - nargs - 1).max(0);
                self.state.inner().call_base.store(base, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Run to completion or to a script yield, completing host operations
    /// by polling them once.
    pub(crate) fn run_sync(mut self, nargs: c_int) -> Result<c_int> {
        self.begin(nargs)?;
        let mut step = Step::Resume(nargs);
        loop {
            match self.resume_once(step)? {
                Resumed::Done(n) => return Ok(n),
                Resumed::Suspended(future) => {
                    let result = catch_unwind(AssertUnwindSafe(|| callback::poll_now(future)))
                        .unwrap_or_else(|payload| Err(Error::Runtime(util::panic_message(payload))));
                    step = self.after_host(result);
                }
            }
        }
    }

    /// Run to completion or to a script yield, awaiting host operations.
    pub(crate) async fn run_async(mut self, nargs: c_int) -> Result<c_int> {
        self.begin(nargs)?;
        let cancel = self.cancel.clone();
        let mut step = Step::Resume(nargs);
        loop {
            match self.resume_once(step)? {
                Resumed::Done(n) => return Ok(n),
                Resumed::Suspended(future) => {
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            tracing::debug!("run cancelled while awaiting a host function");
                            Err(Error::Cancelled)
                        }
                        result = contain_panics(future) => result,
                    };
                    step = self.after_host(result);
                }
            }
        }
    }

    fn after_host(&mut self, result: Result<i32>) -> Step {
        let checked = result.and_then(|n| {
            let l = self.state.ptr()?;
            unsafe { callback::check_results(l, n) }
        });
        match checked {
            Ok(n) => Step::Resume(n),
            Err(err) => {
                if err == Error::Cancelled {
                    self.cancelled = true;
                }
                Step::Raise(err.to_string())
            }
        }
    }

    fn resume_once(&mut self, step: Step) -> Result<Resumed> {
        let l = self.state.ptr()?;
        let from = self.state.main_ptr()?;
        unsafe {
            let status = match step {
                Step::Resume(n) => ffi::lua_resume(l, from, n),
                Step::Raise(message) => {
                    util::reserve(l, 1)?;
                    util::push_str(l, &message);
                    ffi::lua_resumeerror(l, from)
                }
            };
            match status {
                ffi::LUA_OK => {
                    self.cancelled = false;
                    let base = self.state.inner().call_base.load(Ordering::Relaxed);
                    Ok(Resumed::Done((ffi::lua_gettop(l) - base).max(0)))
                }
                ffi::LUA_YIELD => {
                    // The coroutine survived, so any raised cancellation was caught.
                    self.cancelled = false;
                    match self.take_pending() {
                        Some(future) => Ok(Resumed::Suspended(future)),
                        None => Ok(Resumed::Done(ffi::lua_gettop(l))),
                    }
                }
                status => {
                    let message = util::pop_error_message(l);
                    if self.cancelled && message == Error::Cancelled.to_string() {
                        Err(Error::Cancelled)
                    } else {
                        Err(util::error_from_status(status, message))
                    }
                }
            }
        }
    }

    /// Take the pending host operation if the last yield was host-initiated.
    fn take_pending(&self) -> Option<HostFuture> {
        let mut run = self.state.inner().run.lock();
        let ctx = run.as_mut()?;
        if !std::mem::replace(&mut ctx.host_yield, false) {
            return None;
        }
        ctx.pending.take()
    }
}

impl Drop for Runner<'_> {
    fn drop(&mut self) {
        // The context may own host futures holding handles; drop it unlocked.
        let ctx = self.state.inner().run.lock().take();
        drop(ctx);
    }
}

/// Turn a panic while polling `future` into a runtime error.
async fn contain_panics(mut future: HostFuture) -> Result<i32> {
    poll_fn(move |cx| match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(cx))) {
        Ok(poll) => poll,
        Err(payload) => Poll::Ready(Err(Error::Runtime(util::panic_message(payload)))),
    })
    .await
}
