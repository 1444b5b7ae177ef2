//! Two threads handing the CPU back and forth, plus a slow blinker.
//!
//! Build for the target board with
//! `cargo build --example alternate --target avr-unknown-none-atmega328p`.
//! On a host this compiles to an empty stub; the demo only means
//! something on hardware.

#![cfg_attr(target_arch = "avr", no_std)]
#![cfg_attr(target_arch = "avr", no_main)]

#[cfg(target_arch = "avr")]
mod demo {
    use cooperative_threads as kn;
    use core::ptr;
    use portable_atomic::{AtomicU16, Ordering};

    static HANDOFFS: AtomicU16 = AtomicU16::new(0);

    extern "C" fn ponger(_my_id: kn::ThreadId, _arg: *mut ()) {
        loop {
            HANDOFFS.fetch_add(1, Ordering::AcqRel);
            kn::yield_now();
        }
    }

    extern "C" fn blinker(_my_id: kn::ThreadId, _arg: *mut ()) {
        loop {
            // A real board would toggle a pin here.
            kn::sleep(500);
        }
    }

    #[avr_device::entry]
    fn main() -> ! {
        kn::init().expect("kernel already initialized");
        kn::create_thread(kn::THREAD1, ponger, false, ptr::null_mut());
        kn::create_thread(kn::THREAD2, blinker, false, ptr::null_mut());

        // Time starts passing once interrupts are on.
        unsafe { avr_device::interrupt::enable() };

        loop {
            kn::yield_now();
        }
    }

    #[panic_handler]
    fn panic(_info: &core::panic::PanicInfo) -> ! {
        avr_device::interrupt::disable();
        loop {
            avr_device::asm::sleep();
        }
    }
}

#[cfg(not(target_arch = "avr"))]
fn main() {}
