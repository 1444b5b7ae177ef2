//! Kernel-level tests.
//!
//! These drive the full state machine (creation, rotation, sleeping,
//! suspension) through the host stub, which advances scheduler state on
//! yield and substitutes a synthetic tick while idling. Because all
//! kernel state is global, every test serializes on [`guard`] and starts
//! from a fresh [`crate::kernel::reset_for_test`].

use std::sync::{Mutex, MutexGuard};

mod integration;

static LOCK: Mutex<()> = Mutex::new(());

fn guard() -> MutexGuard<'static, ()> {
    // A poisoned lock only means an earlier test failed; the state is
    // rebuilt by reset_for_test either way.
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

extern "C" fn spin_entry(_my_id: crate::ThreadId, _arg: *mut ()) {}
