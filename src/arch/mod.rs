//! Architecture abstraction for context switching, the tick timer and
//! idle waiting.
//!
//! The kernel proper is target-independent state machinery; everything
//! that touches registers, the stack pointer or peripherals sits behind
//! this trait. The real implementation is the AVR one; on other targets a
//! state-only stub is substituted so the crate's logic can be tested on
//! the build host.

use crate::thread::ThreadId;

/// Architecture operations the kernel needs.
///
/// # Safety
///
/// Implementations manipulate raw stacks and processor state. The methods
/// marked unsafe each carry preconditions the kernel upholds: they are
/// called from thread context only, and the divergent ones are only
/// reached when the calling context has been deliberately abandoned.
pub trait Arch {
    /// Cooperative yield: save the caller's callee-saved registers onto
    /// its stack, park its stack pointer, and resume the next runnable
    /// thread. Returns when the scheduler selects the caller again.
    /// The global interrupt flag is left as the caller had it.
    ///
    /// # Safety
    ///
    /// Must be called from thread context, never from an interrupt.
    unsafe fn yield_context();

    /// Enter the scheduler without saving the calling context. Used when
    /// the current thread disables or replaces itself and its stack
    /// contents no longer matter.
    ///
    /// # Safety
    ///
    /// The caller's context must be abandoned for good: nothing may hold
    /// a live reference into its stack that a resumed thread could reach.
    unsafe fn dispatch_no_save() -> !;

    /// Self-replacement hand-off: move the stack pointer to `new_sp`
    /// (just below slot `t_id`'s initial frame, so the frame writer
    /// cannot clobber its own activation record) and finish creating the
    /// slot before leaving through the scheduler.
    ///
    /// # Safety
    ///
    /// `t_id` must be the calling thread's own slot and `new_sp` must be
    /// its initial stack pointer; the caller is abandoned.
    unsafe fn replace_current(new_sp: u16, t_id: ThreadId, entry_word: u16, arg_word: u16) -> !;

    /// Code-word address of the bootstrap trampoline that first-time
    /// entry frames "return" into.
    fn bootstrap_address() -> u16;

    /// Arm the 1 ms periodic tick and enable its compare-match interrupt
    /// source. Global interrupts are not touched.
    ///
    /// # Safety
    ///
    /// Must be called once, during kernel init, before threads exist.
    unsafe fn timer_init();

    /// Low-power wait for an interrupt, with interrupts enabled for the
    /// duration. Used by the scheduler when no slot is runnable.
    fn idle_wait();
}

#[cfg(target_arch = "avr")]
pub mod avr;
#[cfg(target_arch = "avr")]
pub use avr::AvrArch as DefaultArch;

#[cfg(not(target_arch = "avr"))]
pub mod host_stub;
#[cfg(not(target_arch = "avr"))]
pub use host_stub::HostArch as DefaultArch;
