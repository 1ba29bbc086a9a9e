//! ISR bodies. Every handler here is an ordinary `extern "x86-interrupt"`
//! function — there is no ring 3, no syscall gate, and no per-interrupt
//! trap frame to hand to a scheduler: a thread voluntarily gives up its
//! core by calling into `task::context::switch` from ordinary Rust code
//! (`task::scheduler::yield_now`), and these handlers only ever *request*
//! that a core do so, either by returning normally into code that checks a
//! flag or by the interrupted thread itself never being touched at all.

use crate::interrupt::nmi_handler_state::{NMI_HANDLER_STATES, NmiHandlerState};
use crate::memory::cpu_local_data::get_local;
use core::sync::atomic::Ordering;
use x86_64::structures::idt::{InterruptStackFrame, PageFaultErrorCode};

fn end_of_interrupt() {
    let local = get_local();
    let local_apic = unsafe { &mut *local.local_apic.get().unwrap().get() };
    unsafe { local_apic.end_of_interrupt() };
}

pub extern "x86-interrupt" fn page_fault_handler(
    frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    let fault_address = x86_64::registers::control::Cr2::read();
    panic!(
        "page fault at {:?} ({:?})\n{:#?}",
        fault_address, error_code, frame
    );
}

pub extern "x86-interrupt" fn double_fault_handler(
    frame: InterruptStackFrame,
    error_code: u64,
) -> ! {
    panic!("double fault ({}):\n{:#?}", error_code, frame);
}

pub extern "x86-interrupt" fn breakpoint_handler(frame: InterruptStackFrame) {
    log::warn!("breakpoint:\n{:#?}", frame);
}

pub extern "x86-interrupt" fn general_protection_fault_handler(
    frame: InterruptStackFrame,
    error_code: u64,
) {
    panic!("general protection fault ({}):\n{:#?}", error_code, frame);
}

/// NMIs double as the cross-core "a peer kernel panicked, stop" signal: a
/// panicking core broadcasts an NMI to every other core before halting, and
/// each NMI handler checks whether the panic flag was already set for it
/// (meaning this NMI is that broadcast, not a hardware NMI) before doing
/// anything else.
pub extern "x86-interrupt" fn nmi_handler(_frame: InterruptStackFrame) {
    let local = get_local();
    if NMI_HANDLER_STATES.get().unwrap()[local.kernel_id as usize]
        .swap(NmiHandlerState::KernelPanicked, Ordering::Relaxed)
        == NmiHandlerState::KernelPanicked
    {
        return;
    }
    handle_panic_from_other_cpu();
}

/// Never returns: a peer core panicked, so this core halts for good.
pub fn handle_panic_from_other_cpu() -> ! {
    x86_64::instructions::interrupts::disable();
    crate::hlt_loop();
}

pub extern "x86-interrupt" fn timer_interrupt_handler(_frame: InterruptStackFrame) {
    crate::time::on_timer_tick();
    end_of_interrupt();
}

/// Requests that this core yield, raised against a core whose running
/// thread has exceeded `THREAD_QUANTUM` while a same-affinity thread
/// waits (spec.md §4.3).
pub extern "x86-interrupt" fn sched_interrupt_handler(_frame: InterruptStackFrame) {
    end_of_interrupt();
    crate::task::scheduler::yield_now();
}

/// Drains this core's task-engine emission queue (spec.md §5.5).
pub extern "x86-interrupt" fn task_interrupt_handler(_frame: InterruptStackFrame) {
    crate::task::engine::drain_emissions();
    end_of_interrupt();
}

pub extern "x86-interrupt" fn spurious_interrupt_handler(_frame: InterruptStackFrame) {}

pub extern "x86-interrupt" fn error_interrupt_handler(_frame: InterruptStackFrame) {
    log::error!("local apic error (core {})", get_local().kernel_id);
    end_of_interrupt();
}
