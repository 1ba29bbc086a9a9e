use crate::gdt::IstStackIndexes;
use crate::interrupt::InterruptVector;
use crate::interrupt::handlers::{
    breakpoint_handler, double_fault_handler, error_interrupt_handler,
    general_protection_fault_handler, handle_panic_from_other_cpu, nmi_handler,
    page_fault_handler, sched_interrupt_handler, spurious_interrupt_handler,
    task_interrupt_handler, timer_interrupt_handler,
};
use crate::interrupt::nmi_handler_state::{NMI_HANDLER_STATES, NmiHandlerState};
use crate::memory::cpu_local_data::get_local;
use core::sync::atomic::Ordering;
use x86_64::structures::idt::InterruptDescriptorTable;

pub fn init() {
    let idt = get_local().idt.call_once(|| {
        let mut idt = InterruptDescriptorTable::new();
        unsafe {
            idt.page_fault
                .set_handler_fn(page_fault_handler)
                .set_stack_index(u8::from(IstStackIndexes::Exception).into())
        };
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(u8::from(IstStackIndexes::Exception).into())
        };
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault_handler);
        idt.non_maskable_interrupt.set_handler_fn(nmi_handler);
        idt[u8::from(InterruptVector::LocalApicTimer)].set_handler_fn(timer_interrupt_handler);
        idt[u8::from(InterruptVector::LocalApicError)].set_handler_fn(error_interrupt_handler);
        idt[u8::from(InterruptVector::LocalApicSpurious)]
            .set_handler_fn(spurious_interrupt_handler);
        idt[u8::from(InterruptVector::Sched)].set_handler_fn(sched_interrupt_handler);
        idt[u8::from(InterruptVector::Task)].set_handler_fn(task_interrupt_handler);
        idt
    });
    idt.load();

    // Update state to available to receive NMIs
    let local = get_local();
    if NMI_HANDLER_STATES.get().unwrap()[local.kernel_id as usize]
        .compare_exchange(
            NmiHandlerState::NmiHandlerNotSet,
            NmiHandlerState::NmiHandlerSet,
            Ordering::Relaxed,
            Ordering::Relaxed,
        )
        .is_err()
    {
        // Kernel already panicked
        handle_panic_from_other_cpu()
    }
}
