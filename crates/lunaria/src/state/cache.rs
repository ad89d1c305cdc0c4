//! Process-wide identity cache from native state pointers to wrappers.
//!
//! Entries hold weak pointers, so the cache never keeps a state alive. A
//! wrapper removes its own entry when disposed; entries whose wrapper is
//! gone or disposed are treated as absent and overwritten.
//!
//! No shard guard is ever held while a wrapper may be dropped: dropping the
//! last strong reference disposes the state, which removes its entry.

use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;

use lunaria_sys::lua_State;

use super::StateInner;

static STATES: Lazy<DashMap<usize, Weak<StateInner>>> = Lazy::new(DashMap::new);

#[inline]
fn key(l: *mut lua_State) -> usize {
    l as usize
}

/// Live, undisposed wrapper for `l`, if any.
pub(super) fn lookup(l: *mut lua_State) -> Option<Arc<StateInner>> {
    let weak = STATES.get(&key(l)).map(|entry| entry.value().clone())?;
    weak.upgrade().filter(|inner| !inner.is_disposed())
}

/// Record a wrapper created for a pointer the bridge just allocated.
pub(super) fn register(l: *mut lua_State, inner: &Arc<StateInner>) {
    let stale = STATES.insert(key(l), Arc::downgrade(inner));
    debug_assert!(
        stale.and_then(|w| w.upgrade()).map_or(true, |s| s.is_disposed()),
        "native state registered twice"
    );
}

/// Return the wrapper for `l`, creating it with `create` when absent.
///
/// Insertion is atomic: when two callers race, one wrapper wins and the
/// other is dropped (which releases whatever it pinned).
pub(super) fn materialize(
    l: *mut lua_State,
    create: impl FnOnce() -> Arc<StateInner>,
) -> Arc<StateInner> {
    let created = create();
    let existing = match STATES.entry(key(l)) {
        Entry::Vacant(slot) => {
            slot.insert(Arc::downgrade(&created));
            None
        }
        Entry::Occupied(mut slot) => {
            if slot.get().strong_count() == 0 {
                slot.insert(Arc::downgrade(&created));
                None
            } else {
                Some(slot.get().clone())
            }
        }
    };

    match existing.and_then(|weak| weak.upgrade()) {
        Some(winner) if !winner.is_disposed() => winner,
        _ => {
            STATES.insert(key(l), Arc::downgrade(&created));
            created
        }
    }
}

/// Remove the entry for `l` if it still refers to `inner`.
pub(super) fn forget(l: *mut lua_State, inner: &StateInner) {
    STATES.remove_if(&key(l), |_, weak| std::ptr::eq(weak.as_ptr(), inner));
}
