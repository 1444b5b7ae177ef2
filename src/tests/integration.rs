//! End-to-end scheduling scenarios.

use super::{guard, spin_entry};
use crate::{kernel, thread, yield_now};
use crate::{
    create_thread, current_thread, millis, resume, sleep, sleep_long, suspend, thread_enabled,
    thread_sleeping, thread_suspended, THREAD0, THREAD1, THREAD2,
};
use core::ptr;

#[test]
fn test_two_threads_alternate() {
    let _g = guard();
    kernel::reset_for_test();

    create_thread(THREAD1, spin_entry, false, ptr::null_mut());
    assert_eq!(current_thread(), THREAD0);

    // Strict 0, 1, 0, 1, ... alternation across yields.
    for _ in 0..4 {
        yield_now();
        assert_eq!(current_thread(), THREAD1);
        yield_now();
        assert_eq!(current_thread(), THREAD0);
    }
}

#[test]
fn test_sleep_returns_no_earlier_than_requested() {
    let _g = guard();
    kernel::reset_for_test();

    let start = millis();
    sleep(100);

    // Sole thread: the scheduler idled through exactly the sleep window.
    assert_eq!(current_thread(), THREAD0);
    assert!(millis() >= start + 100);
    assert!(millis() <= start + 101);
    assert!(!thread_sleeping(THREAD0));
}

#[test]
fn test_sleep_zero_is_plain_yield() {
    let _g = guard();
    kernel::reset_for_test();

    let start = millis();
    sleep(0);
    assert_eq!(millis(), start);
    assert!(!thread_sleeping(THREAD0));
}

#[test]
fn test_all_blocked_idles_until_tick() {
    let _g = guard();
    kernel::reset_for_test();

    // Slot 0 runnable, everything else disabled. Sleeping leaves nothing
    // runnable, so the scheduler idles on the (synthetic) tick.
    let start = millis();
    sleep(5);
    assert_eq!(current_thread(), THREAD0);
    assert_eq!(millis(), start + 5);
}

#[test]
fn test_suspend_resume_handoff() {
    let _g = guard();
    kernel::reset_for_test();

    create_thread(THREAD1, spin_entry, false, ptr::null_mut());
    create_thread(THREAD2, spin_entry, false, ptr::null_mut());

    // Thread 0 suspends itself: control passes to 1, and the rotation
    // closes over 1 and 2.
    suspend(THREAD0);
    assert_eq!(current_thread(), THREAD1);
    assert!(thread_suspended(THREAD0));

    yield_now();
    assert_eq!(current_thread(), THREAD2);
    yield_now();
    assert_eq!(current_thread(), THREAD1);
    yield_now();
    assert_eq!(current_thread(), THREAD2);

    // Once resumed, 0 re-enters the rotation within one round.
    resume(THREAD0);
    assert!(!thread_suspended(THREAD0));
    yield_now();
    assert_eq!(current_thread(), THREAD0);
}

#[test]
fn test_sleeping_thread_skipped_until_wake() {
    let _g = guard();
    kernel::reset_for_test();

    create_thread(THREAD1, spin_entry, false, ptr::null_mut());

    // Put slot 1 to sleep by hand (it cannot call sleep for itself on
    // the host) and check the rotation degenerates to slot 0 alone.
    critical_section::with(|_| {
        crate::time::set_counter(THREAD1 as usize, 3);
        kernel::sleeping_set().insert(thread::bit_to_mask(THREAD1));
    });
    assert!(thread_sleeping(THREAD1));

    yield_now();
    assert_eq!(current_thread(), THREAD0);

    for _ in 0..3 {
        crate::time::isr_tick();
    }
    assert!(!thread_sleeping(THREAD1));

    yield_now();
    assert_eq!(current_thread(), THREAD1);
}

#[test]
fn test_sleep_long_aggregates_exactly() {
    let _g = guard();
    kernel::reset_for_test();

    let start = millis();
    sleep_long(70_000);
    assert_eq!(current_thread(), THREAD0);
    assert!(millis() >= start + 70_000);
    // Two chunks, so at most two scheduling-latency ticks on top.
    assert!(millis() <= start + 70_002);
}

#[test]
fn test_create_into_foreign_slot_does_not_switch() {
    let _g = guard();
    kernel::reset_for_test();

    create_thread(THREAD1, spin_entry, true, ptr::null_mut());
    // Creating another slot is not a suspension point.
    assert_eq!(current_thread(), THREAD0);
    assert!(thread_enabled(THREAD1));
    assert!(thread_suspended(THREAD1));

    // Suspended from birth: never selected until resumed.
    yield_now();
    assert_eq!(current_thread(), THREAD0);
    resume(THREAD1);
    yield_now();
    assert_eq!(current_thread(), THREAD1);
}

#[test]
fn test_self_replacement_resets_own_slot() {
    let _g = guard();
    kernel::reset_for_test();

    // Leave stale sleep state on the caller's own slot to prove the
    // rewrite scrubs it.
    critical_section::with(|_| {
        crate::time::set_counter(THREAD0 as usize, 250);
        kernel::sleeping_set().insert(thread::bit_to_mask(THREAD0));
    });

    // Recreating the current slot never returns; on the host the
    // non-returning hop panics, but only after the slot's state has
    // been rewritten, so catch the panic and inspect what stuck.
    let hop = std::panic::catch_unwind(|| {
        create_thread(current_thread(), spin_entry, true, ptr::null_mut());
    });
    assert!(hop.is_err());

    assert!(thread_enabled(THREAD0));
    assert!(thread_suspended(THREAD0));
    assert!(!thread_sleeping(THREAD0));
    assert_eq!(
        crate::time::SLEEP_COUNTERS[THREAD0 as usize].load(portable_atomic::Ordering::Acquire),
        0
    );

    // The slot's stack was reset to a fresh initial frame.
    let base = crate::stack::STACK_BASES[THREAD0 as usize];
    assert_eq!(
        kernel::saved_sp(THREAD0),
        base - crate::stack::INITIAL_STACK_USAGE as u16
    );
}

#[test]
#[should_panic(expected = "not available on the host")]
fn test_replace_self_does_not_return() {
    let _g = guard();
    kernel::reset_for_test();
    crate::replace_self(spin_entry, false, ptr::null_mut());
}

#[test]
#[should_panic(expected = "thread id out of range")]
fn test_create_out_of_range_trips_assert() {
    let _g = guard();
    kernel::reset_for_test();
    create_thread(8, spin_entry, false, ptr::null_mut());
}

#[test]
fn test_predicates_reject_invalid_ids() {
    let _g = guard();
    kernel::reset_for_test();

    assert!(!thread_enabled(8));
    assert!(!thread_suspended(8));
    assert!(!thread_sleeping(8));
    assert!(!thread_enabled(0xFF));
}
