//! Kernel state and the public thread API.
//!
//! All kernel state lives in process-wide statics: the three slot sets,
//! the current-thread id with its cached mask, and each slot's saved stack
//! pointer. On this class of hardware there is exactly one kernel per
//! program, initialized once, so the singletons are the design rather than
//! a compromise.
//!
//! The sharing rules are narrow. The tick interrupt touches only the
//! sleeping set, the sleep counters and the millisecond clock; thread
//! code updating those masks interrupts around the access. The disabled
//! and suspended sets are thread-context-only, and threads cannot race
//! each other because scheduling is cooperative.

use portable_atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};

use crate::arch::{Arch, DefaultArch};
use crate::config::MAX_THREADS;
use crate::stack;
use crate::thread::{bit_to_mask, SlotSet, ThreadEntry, ThreadId};
use crate::time;
use crate::trace;

#[cfg(all(feature = "stack-canary", target_arch = "avr"))]
use crate::config::STACK_CANARY;

// ============================================================================
// Kernel state
// ============================================================================

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Id of the currently executing thread.
static CUR_THREAD: AtomicU8 = AtomicU8::new(0);

/// Mask of the currently executing thread, cached because every state
/// update on the current slot needs it.
static CUR_MASK: AtomicU8 = AtomicU8::new(0x01);

/// Slots with no live thread. A disabled slot is never selected, and its
/// suspended/sleeping bits are don't-cares. Before `init` runs (and after
/// it, until threads are created) every slot but 0 is disabled.
static DISABLED: SlotSet = SlotSet::new(!0x01);

/// Slots whose execution is paused until resumed.
static SUSPENDED: SlotSet = SlotSet::new(0x00);

/// Slots waiting for their sleep counter to reach zero. Shared with the
/// tick interrupt.
static SLEEPING: SlotSet = SlotSet::new(0x00);

/// Saved stack pointer per slot. Written when a thread is switched out or
/// created, read to resume it. The tick interrupt never touches these.
static SAVED_SP: [AtomicU16; MAX_THREADS] = [const { AtomicU16::new(0) }; MAX_THREADS];

// Crate-internal accessors for the scheduler and tick code.

#[inline]
pub(crate) fn sleeping_set() -> &'static SlotSet {
    &SLEEPING
}

/// Union of every set that keeps a slot off the CPU.
#[inline]
pub(crate) fn blocked_set() -> u8 {
    DISABLED.value() | SUSPENDED.value() | SLEEPING.value()
}

#[inline]
pub(crate) fn set_current(t_id: ThreadId) {
    CUR_THREAD.store(t_id, Ordering::Release);
    CUR_MASK.store(bit_to_mask(t_id), Ordering::Release);
}

#[inline]
pub(crate) fn saved_sp(t_id: ThreadId) -> u16 {
    SAVED_SP[t_id as usize].load(Ordering::Acquire)
}

#[inline]
pub(crate) fn store_saved_sp(t_id: ThreadId, sp: u16) {
    SAVED_SP[t_id as usize].store(sp, Ordering::Release);
}

/// Whether [`init`] has run.
pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

// ============================================================================
// Init
// ============================================================================

/// Initialize the kernel. Must be called once, before any other kernel
/// function, while only the startup code has run.
///
/// After `init` returns the caller is thread 0, the sole enabled thread,
/// running on the reset stack, which on AVR is already slot 0's region
/// since that region's base is the top of SRAM. The 1 ms tick timer is
/// armed, but global interrupts are left as they were: enable them when
/// the application is ready for time to start passing.
///
/// Returns `Err(())` if the kernel was already initialized.
pub fn init() -> Result<(), ()> {
    if INITIALIZED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Err(());
    }

    for slot in 0..MAX_THREADS {
        store_saved_sp(slot as ThreadId, stack::STACK_BASES[slot]);
        time::zero_counter(slot);

        #[cfg(all(feature = "stack-canary", target_arch = "avr"))]
        // SAFETY: the canary byte is inside the slot's reserved stack
        // region and nothing runs there yet.
        unsafe {
            (stack::CANARY_LOCS[slot] as *mut u8).write_volatile(STACK_CANARY);
        }
    }

    set_current(0);
    DISABLED.set_value(!bit_to_mask(0));
    SUSPENDED.set_value(0x00);
    SLEEPING.set_value(0x00);
    time::reset_clock();

    // SAFETY: single call site guarded by INITIALIZED; the timer is ours
    // by contract.
    unsafe { DefaultArch::timer_init() };

    trace!("kernel: init complete, thread 0 running");
    Ok(())
}

// ============================================================================
// Thread API
// ============================================================================

/// Create a new thread in slot `t_id`, replacing whatever the slot held.
///
/// The slot's stack is rewritten with an initial frame so the scheduler
/// can enter the thread the same way it resumes a yielded one. The slot
/// comes out enabled and not sleeping, with `suspended` as requested and
/// its sleep counter cleared.
///
/// If `t_id` is the calling thread's own slot this call does not return:
/// the caller is torn down and control transfers to the next runnable
/// thread (possibly the recreated slot itself).
///
/// Passing an out-of-range id is a precondition violation: it trips a
/// debug assertion, and in release builds the call is ignored.
pub fn create_thread(t_id: ThreadId, entry: ThreadEntry, suspended: bool, arg: *mut ()) {
    debug_assert!((t_id as usize) < MAX_THREADS, "thread id out of range");
    debug_assert!(is_initialized(), "kernel not initialized");
    if (t_id as usize) >= MAX_THREADS {
        return;
    }

    let mask = bit_to_mask(t_id);
    let entry_word = entry as usize as u16;
    let arg_word = arg as usize as u16;
    let replacing_self = t_id == current_thread();

    trace!("create: slot {} suspended={}", t_id, suspended);

    if !replacing_self {
        // The slot is not running (it is disabled, or parked in the
        // scheduler and about to be overwritten), so its region is free
        // to rewrite.
        unsafe {
            stack::install_initial_frame(t_id, entry_word, arg_word, DefaultArch::bootstrap_address())
        };
    }

    // The tick interrupt read-modify-writes the sleeping byte and the
    // counters, so clear both in one masked section.
    critical_section::with(|_| {
        SLEEPING.remove(mask);
        time::zero_counter(t_id as usize);
    });
    DISABLED.remove(mask);
    SUSPENDED.assign(mask, suspended);
    store_saved_sp(t_id, stack::initial_sp(t_id));

    if replacing_self {
        // Writing the frame would scribble over our own activation record
        // if the caller sits near the top of the region. Hop the stack
        // pointer below the frame area first; the architecture layer then
        // finishes the rewrite and enters the scheduler without saving us.
        unsafe { DefaultArch::replace_current(stack::initial_sp(t_id), t_id, entry_word, arg_word) }
    }
}

/// Second half of a self-replacing [`create_thread`], entered after the
/// stack hand-off: write the slot's initial frame and leave through the
/// scheduler. Never returns. Reached only from the AVR hand-off code.
#[cfg_attr(not(target_arch = "avr"), allow(dead_code))]
pub(crate) extern "C" fn finish_replace(t_id: ThreadId, entry_word: u16, arg_word: u16) -> ! {
    // SAFETY: the caller has moved SP below the frame area of this slot.
    unsafe {
        stack::install_initial_frame(t_id, entry_word, arg_word, DefaultArch::bootstrap_address())
    };
    // SAFETY: the outgoing context has been deliberately abandoned.
    unsafe { DefaultArch::dispatch_no_save() }
}

/// Replace the calling thread with a new thread in the same slot. A
/// wrapper for [`create_thread`] that supplies the caller's own id.
/// Does not return.
pub fn replace_self(entry: ThreadEntry, suspended: bool, arg: *mut ()) -> ! {
    create_thread(current_thread(), entry, suspended, arg);
    unreachable!("replacing the current thread does not return")
}

/// Disable thread `t_id`. The slot's stack contents become irrelevant;
/// only [`create_thread`] can bring the slot back. To pause a thread with
/// the option of continuing it later, use [`suspend`] instead.
///
/// If `t_id` is the calling thread this call does not return.
/// Out-of-range ids are ignored.
pub fn disable(t_id: ThreadId) {
    if (t_id as usize) >= MAX_THREADS {
        return;
    }
    DISABLED.insert(bit_to_mask(t_id));
    trace!("disable: slot {}", t_id);
    if t_id == current_thread() {
        // SAFETY: the caller's context is deliberately abandoned.
        unsafe { DefaultArch::dispatch_no_save() }
    }
}

/// Suspend thread `t_id` until [`resume`] clears it. Suspending the
/// calling thread yields immediately; the call then returns once the
/// thread has been resumed and scheduled again. Out-of-range ids are
/// ignored.
pub fn suspend(t_id: ThreadId) {
    if (t_id as usize) >= MAX_THREADS {
        return;
    }
    SUSPENDED.insert(bit_to_mask(t_id));
    trace!("suspend: slot {}", t_id);
    if t_id == current_thread() {
        yield_current();
    }
}

/// Resume a suspended thread so the scheduler may select it again. Has no
/// effect on a slot that is not suspended, and does not re-enable a
/// disabled slot. Out-of-range ids are ignored.
pub fn resume(t_id: ThreadId) {
    if (t_id as usize) >= MAX_THREADS {
        return;
    }
    SUSPENDED.remove(bit_to_mask(t_id));
    trace!("resume: slot {}", t_id);
}

/// Put the calling thread to sleep for at least `ms` milliseconds.
///
/// The thread is off the rotation until the tick interrupt counts the
/// duration down, and returns once it is next scheduled after waking,
/// so the actual delay is `ms` plus up to one tick of quantization plus
/// any queueing behind other runnable threads. `sleep(0)` is a plain
/// yield.
pub fn sleep(ms: u16) {
    if ms == 0 {
        yield_current();
        return;
    }

    trace!("sleep: slot {} for {} ms", current_thread(), ms);

    // Counter and sleeping bit must change together from the tick
    // interrupt's point of view.
    critical_section::with(|_| {
        time::set_counter(current_thread() as usize, ms);
        SLEEPING.insert(CUR_MASK.load(Ordering::Acquire));
    });
    yield_current();
}

/// Sleep for a 32-bit duration by chaining 16-bit sleeps. The chunks sum
/// to `ms` exactly, so the aggregate sleep is no shorter and no longer
/// than requested (up to the usual per-wake-up scheduling latency).
pub fn sleep_long(ms: u32) {
    for chunk in time::SleepChunks::new(ms) {
        sleep(chunk);
    }
}

/// An atomic snapshot of system uptime in milliseconds.
#[inline]
pub fn millis() -> u32 {
    time::now()
}

/// The id of the currently running thread.
#[inline]
pub fn current_thread() -> ThreadId {
    CUR_THREAD.load(Ordering::Acquire)
}

/// True if `t_id` names an enabled slot. The thread may still be
/// suspended or sleeping rather than running.
pub fn thread_enabled(t_id: ThreadId) -> bool {
    (t_id as usize) < MAX_THREADS && !DISABLED.contains(bit_to_mask(t_id))
}

/// True if `t_id` is enabled but suspended.
pub fn thread_suspended(t_id: ThreadId) -> bool {
    if (t_id as usize) >= MAX_THREADS {
        return false;
    }
    let mask = bit_to_mask(t_id);
    !DISABLED.contains(mask) && SUSPENDED.contains(mask)
}

/// True if `t_id` is enabled but sleeping.
pub fn thread_sleeping(t_id: ThreadId) -> bool {
    if (t_id as usize) >= MAX_THREADS {
        return false;
    }
    let mask = bit_to_mask(t_id);
    !DISABLED.contains(mask) && SLEEPING.contains(mask)
}

/// Check the sentinel byte at the floor of `t_id`'s stack region. A
/// clobbered canary means the stack has overflowed at some point; the
/// kernel takes no action on its own, this is purely diagnostic.
#[cfg(feature = "stack-canary")]
pub fn stack_canary_intact(t_id: ThreadId) -> bool {
    if (t_id as usize) >= MAX_THREADS {
        return false;
    }

    #[cfg(target_arch = "avr")]
    {
        // SAFETY: the canary address is a reserved byte inside the slot's
        // region.
        unsafe { (stack::CANARY_LOCS[t_id as usize] as *const u8).read_volatile() == STACK_CANARY }
    }

    #[cfg(not(target_arch = "avr"))]
    {
        true
    }
}

/// Cooperative yield, the context switch behind
/// [`yield_now`](crate::yield_now) and every blocking call.
pub(crate) fn yield_current() {
    if !is_initialized() {
        return;
    }
    // SAFETY: called from thread context; the architecture layer saves
    // and restores whole contexts symmetrically.
    unsafe { DefaultArch::yield_context() }
}

// ============================================================================
// Test support
// ============================================================================

/// Put every kernel static back to its post-`init` shape so tests can run
/// back to back in one process.
#[cfg(test)]
pub(crate) fn reset_for_test() {
    INITIALIZED.store(true, Ordering::Release);
    set_current(0);
    DISABLED.set_value(!bit_to_mask(0));
    SUSPENDED.set_value(0x00);
    SLEEPING.set_value(0x00);
    for slot in 0..MAX_THREADS {
        store_saved_sp(slot as ThreadId, stack::STACK_BASES[slot]);
        time::zero_counter(slot);
    }
    time::reset_clock();
}
