//! Handle registry bridge
//!
//! Every host handle to a VM heap object owns exactly one registry slot. The
//! slot keeps the object alive for as long as the handle lives and is
//! released exactly once: on explicit disposal or when the last clone of the
//! handle is dropped, whichever comes first.
//!
//! Handle operations are staged on the stack of the heap's main state. The
//! registry is shared by every thread of a heap, so a slot pinned from any
//! thread can be pushed onto any other. The *owner* recorded on the handle is
//! the state it was extracted from and is what cross-state checks compare.

use std::cell::Cell;
use std::ffi::c_int;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use lunaria_sys::{self as ffi, lua_State};

use crate::error::{Error, Result};
use crate::state::State;
use crate::util::{self, StackGuard};

// ============================================================================
// Counters
// ============================================================================

/// Per-heap pin/unpin counters.
#[derive(Debug, Default)]
pub(crate) struct RegistryCounters {
    pins: AtomicU64,
    unpins: AtomicU64,
}

impl RegistryCounters {
    #[inline]
    pub(crate) fn pinned(&self) {
        self.pins.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn unpinned(&self) {
        self.unpins.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RegistryStats {
        RegistryStats {
            pins: self.pins.load(Ordering::Relaxed),
            unpins: self.unpins.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of registry activity for one VM heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Slots pinned since the heap was created
    pub pins: u64,
    /// Slots released since the heap was created
    pub unpins: u64,
}

impl RegistryStats {
    /// Slots currently held by live handles and threads
    pub fn outstanding(&self) -> u64 {
        self.pins.saturating_sub(self.unpins)
    }

    pub fn is_balanced(&self) -> bool {
        self.pins == self.unpins
    }
}

// ============================================================================
// Pinned slot
// ============================================================================

/// A registry slot owned by a host handle.
pub(crate) struct Pinned {
    owner: State,
    slot: c_int,
    released: Cell<bool>,
}

impl Pinned {
    /// Pin the value at `idx` of `l`, attributing the handle to `owner`.
    ///
    /// # Safety
    /// `l` must be a live state of `owner`'s heap and `idx` a valid index.
    pub(crate) unsafe fn pin(owner: &State, l: *mut lua_State, idx: c_int) -> Rc<Pinned> {
        let slot = ffi::lua_ref(l, idx);
        owner.counters().pinned();
        Rc::new(Pinned {
            owner: owner.clone(),
            slot,
            released: Cell::new(false),
        })
    }

    #[inline]
    pub(crate) fn owner(&self) -> &State {
        &self.owner
    }

    #[inline]
    pub(crate) fn slot(&self) -> c_int {
        self.slot
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.released.get() || self.owner.is_disposed()
    }

    /// Push the pinned value onto `l` after checking disposal and ownership.
    ///
    /// `target` is the state whose stack `l` belongs to, or whose values are
    /// being staged on `l`.
    pub(crate) unsafe fn push_onto(&self, target: &State, l: *mut lua_State, kind: &'static str) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed(kind));
        }
        if !self.owner.same(target) {
            return Err(Error::CrossState(kind));
        }
        util::reserve(l, 1)?;
        ffi::lua_getref(l, self.slot);
        Ok(())
    }

    /// Run `f` with the pinned value pushed on the main stack of the heap.
    ///
    /// The stack is restored when `f` returns, on every path.
    pub(crate) fn with_value<R>(
        &self,
        kind: &'static str,
        f: impl FnOnce(*mut lua_State, &State) -> Result<R>,
    ) -> Result<R> {
        if self.is_disposed() {
            return Err(Error::Disposed(kind));
        }
        let l = self.owner.main_ptr()?;
        let _heap = self.owner.enter_heap()?;
        unsafe {
            let _guard = StackGuard::new(l);
            util::reserve(l, 8)?;
            ffi::lua_getref(l, self.slot);
            f(l, &self.owner)
        }
    }

    /// Render the pinned value with the VM's `tostring`.
    pub(crate) fn to_display_string(&self, kind: &'static str) -> Result<String> {
        self.with_value(kind, |l, _| unsafe {
            util::protect(l, 1, 1, tostring_impl)?;
            Ok(util::read_bytes(l, -1)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default())
        })
    }

    /// Identity of the referenced object, stable for its lifetime.
    pub(crate) fn to_pointer(&self, kind: &'static str) -> Result<usize> {
        self.with_value(kind, |l, _| unsafe { Ok(ffi::lua_topointer(l, -1) as usize) })
    }

    /// Release the slot. Idempotent; a no-op once the heap is gone.
    pub(crate) fn release(&self) {
        if self.released.replace(true) {
            return;
        }
        if let Ok(main) = self.owner.main_ptr() {
            unsafe { ffi::lua_unref(main, self.slot) };
            self.owner.counters().unpinned();
        }
    }
}

impl Drop for Pinned {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Pinned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pinned")
            .field("slot", &self.slot)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

unsafe extern "C-unwind" fn tostring_impl(l: *mut lua_State) -> c_int {
    ffi::luaL_tolstring(l, 1, std::ptr::null_mut());
    1
}

// ============================================================================
// Handle declaration
// ============================================================================

/// Declare a handle type over a pinned registry slot.
macro_rules! registry_handle {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            pub(crate) pinned: std::rc::Rc<$crate::registry::Pinned>,
        }

        impl $name {
            pub(crate) const KIND: &'static str = $kind;

            #[inline]
            pub(crate) fn from_pinned(pinned: std::rc::Rc<$crate::registry::Pinned>) -> Self {
                Self { pinned }
            }

            /// State this handle was extracted from
            #[inline]
            pub fn owner(&self) -> &$crate::state::State {
                self.pinned.owner()
            }

            /// True once this handle or its owning heap has been disposed.
            #[inline]
            pub fn is_disposed(&self) -> bool {
                self.pinned.is_disposed()
            }

            /// Release the registry slot. Clones of this handle are released too.
            #[inline]
            pub fn dispose(&self) {
                self.pinned.release()
            }

            /// Address of the referenced VM object
            pub fn to_pointer(&self) -> $crate::error::Result<usize> {
                self.pinned.to_pointer(Self::KIND)
            }

            /// Render with the VM's `tostring`
            pub fn to_display_string(&self) -> $crate::error::Result<String> {
                self.pinned.to_display_string(Self::KIND)
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                std::rc::Rc::ptr_eq(&self.pinned, &other.pinned)
            }
        }

        impl Eq for $name {}

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.pinned.slot()).finish()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self.to_display_string() {
                    Ok(s) => f.write_str(&s),
                    Err(_) => write!(f, "{}: <disposed>", $kind),
                }
            }
        }
    };
}

pub(crate) use registry_handle;
