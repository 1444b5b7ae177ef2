//! AVR (ATmega328P) implementation: the context switch, the bootstrap
//! trampoline, the TC0 tick and the idle wait.
//!
//! The avr-gcc ABI makes r2–r17, r28 and r29 callee-saved, so a context
//! is exactly those 18 registers plus the return address the `call` into
//! the switch left on the stack. A thread's saved stack pointer always
//! points just below such a block, whether it got there by yielding or
//! by [`crate::kernel::create_thread`] laying out a synthetic one.

use core::arch::naked_asm;

use super::Arch;
use crate::config::TICK_COMPARE;
use crate::thread::ThreadId;

/// I/O-space addresses of the stack pointer and status register.
const SPL: u8 = 0x3d;
const SPH: u8 = 0x3e;
const SREG: u8 = 0x3f;

pub struct AvrArch;

impl Arch for AvrArch {
    #[inline(always)]
    unsafe fn yield_context() {
        // SAFETY: forwarded contract.
        unsafe { __thread_yield() }
    }

    #[inline(always)]
    unsafe fn dispatch_no_save() -> ! {
        // SAFETY: forwarded contract.
        unsafe { __dispatch() }
    }

    #[inline(always)]
    unsafe fn replace_current(new_sp: u16, t_id: ThreadId, entry_word: u16, arg_word: u16) -> ! {
        // SAFETY: forwarded contract.
        unsafe { __replace_current(new_sp, t_id, entry_word, arg_word) }
    }

    fn bootstrap_address() -> u16 {
        // Code addresses on AVR are word addresses; this is the value
        // `ret` consumes from the initial frame.
        __thread_bootstrap as *const () as usize as u16
    }

    unsafe fn timer_init() {
        // TC0 in CTC mode, clk/64, compare match every millisecond.
        // SAFETY: the kernel owns TC0 by contract; init is the only
        // writer and runs before threads exist.
        let tc0 = unsafe { &*avr_device::atmega328p::TC0::ptr() };
        tc0.tccr0a.write(|w| w.wgm0().ctc());
        tc0.ocr0a.write(|w| w.bits(TICK_COMPARE as u8));
        tc0.tccr0b.write(|w| w.cs0().prescale_64());
        tc0.timsk0.write(|w| w.ocie0a().set_bit());
    }

    fn idle_wait() {
        // Idle sleep keeps the timer clocked; any interrupt wakes the
        // core. Interrupts must be on or the tick can never fire.
        // SAFETY: register writes on the CPU's own sleep controller;
        // enabling interrupts here is the documented idle contract.
        unsafe {
            let cpu = &*avr_device::atmega328p::CPU::ptr();
            cpu.smcr.write(|w| w.sm().idle().se().set_bit());
            avr_device::interrupt::enable();
            avr_device::asm::sleep();
            cpu.smcr.write(|w| w.se().clear_bit());
        }
    }
}

/// The 1 ms tick. Keep it short: bump the clock, walk the sleepers.
#[avr_device::interrupt(atmega328p)]
fn TIMER0_COMPA() {
    crate::time::isr_tick();
}

/// Cooperative yield entry.
///
/// Pushes the callee-saved registers onto the caller's stack (the `call`
/// that got us here already pushed the resume address), records the stack
/// pointer in the caller's slot, and falls through to the dispatcher.
/// When another thread later yields back to this one, the dispatcher's
/// epilogue pops these registers and `ret`s to the resume address,
/// which is the instruction after the caller's `call`.
#[unsafe(naked)]
unsafe extern "C" fn __thread_yield() {
    naked_asm!(
        "push r2",
        "push r3",
        "push r4",
        "push r5",
        "push r6",
        "push r7",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "push r16",
        "push r17",
        "push r28",
        "push r29",
        "in r24, {spl}",
        "in r25, {sph}",
        "call {store_sp}",
        "jmp {dispatch}",
        spl = const SPL,
        sph = const SPH,
        store_sp = sym crate::sched::store_current_sp,
        dispatch = sym __dispatch,
    )
}

/// Scheduler dispatch: restore the next runnable thread.
///
/// Also the whole story for the no-save paths (self-disable,
/// self-replacement): entering here without pushing anything simply means
/// the outgoing context is never resumed.
///
/// `schedule_next` runs on the outgoing thread's stack, below its saved
/// context, and returns the incoming thread's stack pointer. The stack
/// pointer swap is done with interrupts masked (an interrupt between the
/// two byte writes would push into the wrong region), and the status
/// register is restored afterwards so the interrupt flag stays as the
/// caller had it.
#[unsafe(naked)]
unsafe extern "C" fn __dispatch() -> ! {
    naked_asm!(
        "call {schedule}",
        "in r18, {sreg}",
        "cli",
        "out {sph}, r25",
        "out {spl}, r24",
        "out {sreg}, r18",
        "pop r29",
        "pop r28",
        "pop r17",
        "pop r16",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop r7",
        "pop r6",
        "pop r5",
        "pop r4",
        "pop r3",
        "pop r2",
        "ret",
        spl = const SPL,
        sph = const SPH,
        sreg = const SREG,
        schedule = sym crate::sched::schedule_next,
    )
}

/// First entry into a new thread.
///
/// The dispatcher's `ret` lands here with the slot's initial frame
/// reduced to five bytes: thread id, argument (high, low), entry address
/// (high, low). Pop the parameters into the avr-gcc argument registers
/// (id in r24, argument in r23:r22) and jump to the entry point through
/// Z. No return address is pushed: a thread that returns is undefined.
#[unsafe(naked)]
unsafe extern "C" fn __thread_bootstrap() -> ! {
    naked_asm!(
        "pop r24",
        "pop r23",
        "pop r22",
        "pop r31",
        "pop r30",
        "ijmp",
    )
}

/// Stack hand-off for a thread replacing its own slot.
///
/// Arrives with `new_sp` in r25:r24, the id in r22, the entry word in
/// r21:r20 and the argument word in r19:r18. Moves the stack pointer to
/// `new_sp` (masked, same as the dispatcher), shuffles the parameters
/// into the argument registers of `finish_replace(t_id, entry, arg)`,
/// and jumps there to write the slot's initial frame and dispatch.
#[unsafe(naked)]
unsafe extern "C" fn __replace_current(
    new_sp: u16,
    t_id: ThreadId,
    entry_word: u16,
    arg_word: u16,
) -> ! {
    naked_asm!(
        "in r26, {sreg}",
        "cli",
        "out {sph}, r25",
        "out {spl}, r24",
        "out {sreg}, r26",
        "mov r24, r22",
        "movw r22, r20",
        "movw r20, r18",
        "jmp {finish}",
        spl = const SPL,
        sph = const SPH,
        sreg = const SREG,
        finish = sym crate::kernel::finish_replace,
    )
}
