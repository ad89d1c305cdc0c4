//! VM states
//!
//! A [`State`] wraps one native execution context: either the main state,
//! which owns the VM heap, or a thread (coroutine) that shares the heap and
//! registry of its main state while keeping its own stack.
//!
//! Every live native pointer maps to exactly one wrapper through a
//! process-wide identity cache. Threads the host never created explicitly
//! (coroutines made by scripts, or the current thread inside a host
//! callback) are materialized lazily the first time the bridge sees their
//! pointer.
//!
//! # Disposal
//!
//! ```text
//! main.dispose()    closes the VM; every thread and handle of the heap
//!                   reports itself disposed from then on
//! thread.dispose()  releases the thread's registry slot only
//! ```
//!
//! Disposing the main state while a run or protected call is still on the
//! native stack marks the heap disposed at once but defers closing the VM
//! until the outermost such call returns.
//!
//! Dropping the last clone of a wrapper disposes it.

mod cache;
mod create;
mod execute;
mod globals;
mod stack;

use std::ffi::c_int;
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use lunaria_sys::{self as ffi, lua_State};

use crate::error::{Error, Result};
use crate::registry::{RegistryCounters, RegistryStats};
use crate::runner::RunContext;

pub use globals::Library;
pub(crate) use create::check_key;
pub(crate) use stack::{pop_results, pop_results_into, read_value, write_value};

/// Chunk name used when the caller does not supply one.
pub const DEFAULT_CHUNK_NAME: &str = "main";

// ============================================================================
// Thread status
// ============================================================================

/// Scheduling status of a state, as seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Currently executing (always the case for the main state)
    Running,
    /// Yielded, or created and not yet started
    Suspended,
    /// Active but not running: it resumed another coroutine
    Normal,
    /// Returned from its body
    Finished,
    /// Terminated by an error
    Error,
}

// ============================================================================
// Shared state record
// ============================================================================

pub(crate) struct StateInner {
    /// Null once disposed.
    ptr: AtomicPtr<lua_State>,
    /// Main state of the heap; `None` for the main state itself.
    main: Option<Arc<StateInner>>,
    /// Registry slot keeping a thread alive; `LUA_NOREF` for the main state.
    slot: c_int,
    counters: Arc<RegistryCounters>,
    /// Run marker: `Some` while a resume is in flight.
    pub(crate) run: Mutex<Option<RunContext>>,
    /// Stack height below the coroutine body, recorded when it is first started.
    pub(crate) call_base: AtomicI32,
    /// Runs and protected calls in flight on this heap (main state only).
    active: AtomicUsize,
    /// Main state disposed while `active` was non-zero, awaiting `lua_close`.
    deferred_close: AtomicPtr<lua_State>,
}

// SAFETY: the native state is only ever driven from one OS thread at a time
// (the public `State` wrapper is `!Send`). The record itself is shared with the
// process-wide identity cache, which only stores weak pointers and compares
// addresses; every mutable field is atomic or behind a mutex.
unsafe impl Send for StateInner {}
unsafe impl Sync for StateInner {}

impl StateInner {
    fn is_disposed(&self) -> bool {
        self.ptr.load(Ordering::Acquire).is_null()
            || self.main.as_ref().is_some_and(|main| main.is_disposed())
    }

    fn main_ptr(&self) -> *mut lua_State {
        match &self.main {
            Some(main) => main.ptr.load(Ordering::Acquire),
            None => self.ptr.load(Ordering::Acquire),
        }
    }

    fn dispose(&self) {
        let ptr = self.ptr.swap(ptr::null_mut(), Ordering::AcqRel);
        if ptr.is_null() {
            return;
        }
        cache::forget(ptr, self);
        match &self.main {
            None if self.active.load(Ordering::Acquire) > 0 => {
                self.deferred_close.store(ptr, Ordering::Release);
                tracing::debug!(state = ?ptr, "Luau state disposed while running, close deferred");
            }
            None => {
                unsafe { ffi::lua_close(ptr) };
                tracing::debug!(state = ?ptr, "closed Luau state");
            }
            Some(main) => {
                let main_ptr = main.ptr.load(Ordering::Acquire);
                if !main_ptr.is_null() && self.slot != ffi::LUA_NOREF {
                    unsafe { ffi::lua_unref(main_ptr, self.slot) };
                    self.counters.unpinned();
                }
                tracing::trace!(thread = ?ptr, "released Luau thread");
            }
        }
    }
}

impl Drop for StateInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Marks native frames of a heap as live; the VM is not closed while any
/// guard exists.
pub(crate) struct HeapGuard {
    main: Arc<StateInner>,
}

impl Drop for HeapGuard {
    fn drop(&mut self) {
        if self.main.active.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let ptr = self.main.deferred_close.swap(ptr::null_mut(), Ordering::AcqRel);
        if !ptr.is_null() {
            unsafe { ffi::lua_close(ptr) };
            tracing::debug!(state = ?ptr, "closed Luau state after the last run returned");
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// Host wrapper over a Luau main state or thread.
///
/// Cloning is cheap and yields the same wrapper. `State` is neither `Send`
/// nor `Sync`: a VM must be driven from a single OS thread.
#[derive(Clone)]
pub struct State {
    inner: Arc<StateInner>,
    _not_send: PhantomData<*const ()>,
}

impl State {
    /// Create a fresh VM with an empty global environment.
    ///
    /// No libraries are opened; see [`State::open_libraries`].
    pub fn new() -> Result<State> {
        let l = unsafe { ffi::luaL_newstate() };
        if l.is_null() {
            return Err(Error::Resource("not enough memory to create a Luau state".into()));
        }
        let inner = Arc::new(StateInner {
            ptr: AtomicPtr::new(l),
            main: None,
            slot: ffi::LUA_NOREF,
            counters: Arc::new(RegistryCounters::default()),
            run: Mutex::new(None),
            call_base: AtomicI32::new(0),
            active: AtomicUsize::new(0),
            deferred_close: AtomicPtr::new(ptr::null_mut()),
        });
        cache::register(l, &inner);
        tracing::debug!(state = ?l, "created Luau state");
        Ok(State::from_inner(inner))
    }

    #[inline]
    pub(crate) fn from_inner(inner: Arc<StateInner>) -> State {
        State {
            inner,
            _not_send: PhantomData,
        }
    }

    /// Wrap the thread at `l`, pinned at `slot`, under `main`.
    fn new_thread(l: *mut lua_State, main: Arc<StateInner>, slot: c_int) -> Arc<StateInner> {
        let counters = main.counters.clone();
        counters.pinned();
        Arc::new(StateInner {
            ptr: AtomicPtr::new(l),
            main: Some(main),
            slot,
            counters,
            run: Mutex::new(None),
            call_base: AtomicI32::new(0),
            active: AtomicUsize::new(0),
            deferred_close: AtomicPtr::new(ptr::null_mut()),
        })
    }

    /// Look up (or lazily materialize) the wrapper for a native pointer seen
    /// inside a host callback.
    ///
    /// # Safety
    /// `l` must be a live state created through this bridge's heap.
    pub(crate) unsafe fn from_ptr(l: *mut lua_State) -> Result<State> {
        if let Some(inner) = cache::lookup(l) {
            return Ok(State::from_inner(inner));
        }
        let main = Self::heap_of(l)?;
        let inner = cache::materialize(l, || {
            ffi::lua_pushthread(l);
            let slot = ffi::lua_ref(l, -1);
            ffi::lua_pop(l, 1);
            Self::new_thread(l, main, slot)
        });
        Ok(State::from_inner(inner))
    }

    /// Wrapper for the thread value at `idx` of `self`.
    pub(crate) unsafe fn thread_at(&self, l: *mut lua_State, idx: c_int) -> Result<State> {
        let co = ffi::lua_tothread(l, idx);
        if co.is_null() {
            return Err(Error::runtime("value is not a thread"));
        }
        if let Some(inner) = cache::lookup(co) {
            return Ok(State::from_inner(inner));
        }
        let main = self.main_inner();
        let inner = cache::materialize(co, || {
            let slot = ffi::lua_ref(l, idx);
            Self::new_thread(co, main, slot)
        });
        Ok(State::from_inner(inner))
    }

    unsafe fn heap_of(l: *mut lua_State) -> Result<Arc<StateInner>> {
        let main = ffi::lua_mainthread(l);
        cache::lookup(main).ok_or_else(|| Error::runtime("Luau state does not belong to a live heap"))
    }

    // ========================================================================
    // Identity and lifetime
    // ========================================================================

    /// Native pointer, or a usage error once disposed.
    #[inline]
    pub(crate) fn ptr(&self) -> Result<*mut lua_State> {
        if self.is_disposed() {
            return Err(Error::Disposed("state"));
        }
        Ok(self.inner.ptr.load(Ordering::Acquire))
    }

    /// Native pointer of the heap's main state.
    #[inline]
    pub(crate) fn main_ptr(&self) -> Result<*mut lua_State> {
        if self.is_disposed() {
            return Err(Error::Disposed("state"));
        }
        Ok(self.inner.main_ptr())
    }

    /// Hold the heap open for a call that may reenter host code.
    pub(crate) fn enter_heap(&self) -> Result<HeapGuard> {
        self.ptr()?;
        let main = self.main_inner();
        main.active.fetch_add(1, Ordering::AcqRel);
        Ok(HeapGuard { main })
    }

    pub(crate) fn main_inner(&self) -> Arc<StateInner> {
        match &self.inner.main {
            Some(main) => main.clone(),
            None => self.inner.clone(),
        }
    }

    #[inline]
    pub(crate) fn inner(&self) -> &StateInner {
        &self.inner
    }

    #[inline]
    pub(crate) fn counters(&self) -> &RegistryCounters {
        &self.inner.counters
    }

    /// Same wrapper (and therefore the same native context)?
    #[inline]
    pub fn same(&self, other: &State) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Do both states share one VM heap?
    pub fn same_heap(&self, other: &State) -> bool {
        Arc::ptr_eq(&self.main_inner(), &other.main_inner())
    }

    /// Native pointer for interop with other Luau bindings.
    pub fn as_ptr(&self) -> Result<*mut lua_State> {
        self.ptr()
    }

    /// True once disposed, or once the main state of the heap is disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Dispose this state. Idempotent.
    ///
    /// For the main state this closes the VM and invalidates every thread and
    /// handle rooted in it. Called from inside a host callback, the close waits
    /// until the outermost run on the heap returns; every operation reports
    /// [`Error::Disposed`] in the meantime. For a thread it releases the thread's registry
    /// slot; the coroutine itself is collected by the VM once unreachable.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_main_thread(&self) -> bool {
        self.inner.main.is_none()
    }

    /// The main state of this heap.
    pub fn main_thread(&self) -> Result<State> {
        self.ptr()?;
        Ok(State::from_inner(self.main_inner()))
    }

    /// Registry pin/unpin counters of this heap.
    pub fn registry_stats(&self) -> RegistryStats {
        self.inner.counters.snapshot()
    }

    /// Scheduling status of this state.
    pub fn status(&self) -> Result<ThreadStatus> {
        let l = self.ptr()?;
        if self.is_main_thread() || self.inner.run.lock().is_some() {
            return Ok(ThreadStatus::Running);
        }
        let code = unsafe { ffi::lua_costatus(self.inner.main_ptr(), l) };
        Ok(match code {
            ffi::LUA_CORUN => ThreadStatus::Running,
            ffi::LUA_COSUS => ThreadStatus::Suspended,
            ffi::LUA_CONOR => ThreadStatus::Normal,
            ffi::LUA_COFIN => ThreadStatus::Finished,
            _ => ThreadStatus::Error,
        })
    }

    /// Create a new thread sharing this heap. The thread starts with an empty
    /// stack.
    pub fn create_thread(&self) -> Result<State> {
        let main = self.main_ptr()?;
        unsafe {
            crate::util::reserve(main, 1)?;
            let co = ffi::lua_newthread(main);
            let slot = ffi::lua_ref(main, -1);
            ffi::lua_pop(main, 1);
            let inner = Self::new_thread(co, self.main_inner(), slot);
            cache::register(co, &inner);
            Ok(State::from_inner(inner))
        }
    }

    /// Run a full garbage collection cycle.
    pub fn collect_garbage(&self) -> Result<()> {
        let l = self.ptr()?;
        unsafe { ffi::lua_gc(l, ffi::LUA_GCCOLLECT, 0) };
        Ok(())
    }

    /// Heap size in kilobytes.
    pub fn memory_kb(&self) -> Result<usize> {
        let l = self.ptr()?;
        Ok(unsafe { ffi::lua_gc(l, ffi::LUA_GCCOUNT, 0) }.max(0) as usize)
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for State {}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("ptr", &self.inner.ptr.load(Ordering::Relaxed))
            .field("main", &self.is_main_thread())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread: 0x{:016x}", self.inner.ptr.load(Ordering::Relaxed) as usize)
    }
}
