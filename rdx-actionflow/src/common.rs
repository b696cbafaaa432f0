//! Contains common, primitive types shared across the crate.
//!
//! This module defines the ID type used to identify event bindings, the
//! predicate type used by the control combinators, and a small locking helper
//! used wherever shared completion state is guarded by a mutex.

use slotmap::new_key_type;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

new_key_type! {
    /// Uniquely and safely identifies a handler bound in an `EventBindings` registry.
    ///
    /// It is guaranteed to be unique and will not be reused after the binding
    /// is removed, preventing stale ID bugs.
    pub struct HandlerId;
}

/// A synchronous test evaluated by the control combinators every time they run.
///
/// Predicates usually close over caller-owned state. They are never memoized.
pub type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Locks `mutex`, recovering the guard if a panicking action poisoned it.
///
/// Caller panics unwind through combinator state on purpose, so a poisoned
/// lock only means an earlier run was abandoned.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
