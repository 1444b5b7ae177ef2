//! Round-robin thread selection.
//!
//! Selection scans slot ids starting just after the current thread and
//! wraps around, taking the first slot whose bit is clear in the union of
//! the disabled, suspended and sleeping sets. When nothing is runnable the
//! scheduler idles with interrupts enabled, since only the tick
//! interrupt can unblock a sleeper, and rescans after every wake-up.
//!
//! The two `extern "C"` entry points at the bottom are the Rust half of
//! the context switch: the architecture layer parks the outgoing thread's
//! registers, hands its stack pointer to [`store_current_sp`], asks
//! [`schedule_next`] for the incoming thread's stack pointer, and restores
//! from there.

use crate::arch::{Arch, DefaultArch};
use crate::config::MAX_THREADS;
use crate::kernel;
use crate::thread::{bit_to_mask, ThreadId};
use crate::trace;

/// Pick the next runnable slot after `current`, round-robin.
///
/// `blocked` is the union of the disabled, suspended and sleeping sets.
/// The scan covers every slot once, ending with `current` itself, so a
/// thread that is the only runnable slot keeps running. Returns `None`
/// when no slot is runnable.
pub(crate) fn select_runnable(current: ThreadId, blocked: u8) -> Option<ThreadId> {
    let mut step = 1;
    while step <= MAX_THREADS {
        let candidate = ((current as usize + step) % MAX_THREADS) as ThreadId;
        if blocked & bit_to_mask(candidate) == 0 {
            return Some(candidate);
        }
        step += 1;
    }
    None
}

/// Select the next thread to run and return its saved stack pointer.
///
/// Updates the current-thread id and cached mask before returning; the
/// caller (the context-switch code, running on the outgoing thread's
/// stack) completes the hand-off by loading the returned stack pointer
/// and popping the incoming thread's registers.
///
/// Idles until the tick interrupt makes a slot runnable if none is. The
/// idle path leaves interrupts enabled afterwards; progress depends on
/// the tick firing.
pub(crate) extern "C" fn schedule_next() -> u16 {
    loop {
        let blocked = kernel::blocked_set();
        if let Some(next) = select_runnable(kernel::current_thread(), blocked) {
            trace!("schedule: {} -> {}", kernel::current_thread(), next);
            kernel::set_current(next);
            return kernel::saved_sp(next);
        }
        DefaultArch::idle_wait();
    }
}

/// Record the outgoing thread's stack pointer in its slot. Called from
/// the AVR yield path once the callee-saved registers are parked.
#[cfg_attr(not(target_arch = "avr"), allow(dead_code))]
pub(crate) extern "C" fn store_current_sp(sp: u16) {
    kernel::store_saved_sp(kernel::current_thread(), sp);
}
