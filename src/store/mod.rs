//! ==============================================================================
//! store - per-view state tables
//! ==============================================================================
//!
//! purpose:
//!     the two tables a view owns for its lifetime:
//!     - reading.rs: latest SensorReading per (container, rack) + chart history
//!     - managed.rs: containers/racks the acting identity manages
//!
//!     both are split into a writer (held by the reconciler) and readers
//!     (handed to rendering code). readers cannot mutate.
//!
//! ==============================================================================

pub mod managed;
pub mod reading;

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

// poisoning is ignored: no critical section leaves a table half-updated
fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
