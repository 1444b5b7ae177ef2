//! State-only stand-in for the AVR layer on non-AVR hosts.
//!
//! There are no thread stacks to switch between on the host, so "context
//! switches" here advance the scheduler's bookkeeping and nothing else:
//! a yield runs one selection step, and the idle wait substitutes a
//! synthetic tick for the hardware timer so sleeps still count down.
//! That is enough for `cargo test` to drive the whole state machine
//! (rotation order, sleep accounting, suspend/resume) without a target
//! board.
//!
//! The genuinely non-returning operations (self-disable,
//! self-replacement) cannot be emulated without a second stack and
//! panic instead. Their state updates all land before the hop, so tests
//! catch the panic and inspect what stuck.

use super::Arch;
use crate::thread::ThreadId;

pub struct HostArch;

impl Arch for HostArch {
    unsafe fn yield_context() {
        let _ = crate::sched::schedule_next();
    }

    unsafe fn dispatch_no_save() -> ! {
        panic!("abandoning a context requires a real stack switch; not available on the host");
    }

    unsafe fn replace_current(
        _new_sp: u16,
        _t_id: ThreadId,
        _entry_word: u16,
        _arg_word: u16,
    ) -> ! {
        panic!("self-replacement requires a real stack switch; not available on the host");
    }

    fn bootstrap_address() -> u16 {
        0
    }

    unsafe fn timer_init() {}

    fn idle_wait() {
        crate::time::isr_tick();
    }
}
