#![no_std]
#![no_main]

extern crate alloc;
extern crate kernel;

use core::panic::PanicInfo;
use kernel::interrupt::nmi_handler_state;
use kernel::limine_requests::{BASE_REVISION, MP_REQUEST};
use kernel::memory::cpu_local_data::get_local;
use kernel::memory::guarded_stack::{GuardedStack, NORMAL_STACK_SIZE, StackId, StackType};
use kernel::task::{engine, scheduler};
use kernel::{apic, gdt, interrupt, logger, memory};

/// Same BSP bring-up `kernel::main` performs, but hands off to the test
/// harness instead of `master_loop` once the concurrency core is up.
#[unsafe(no_mangle)]
unsafe extern "C" fn kernel_main() -> ! {
    assert!(BASE_REVISION.is_supported());

    unsafe { memory::init() };
    unsafe { kernel::memory::cpu_local_data::init_bsp() };

    logger::init().unwrap();
    log::info!("test kernel booting");

    GuardedStack::new_kernel(
        NORMAL_STACK_SIZE,
        StackId {
            _type: StackType::Normal,
            cpu_id: get_local().kernel_id,
        },
    )
    .switch(init_bsp)
}

extern "sysv64" fn init_bsp() -> ! {
    nmi_handler_state::init();

    gdt::init();
    interrupt::init();
    apic::init_bsp();
    apic::init_local_apic();

    let cores_num = kernel::task::hooks::cores_num() as u32;

    unsafe { scheduler::init(cores_num, engine::dispatch_loop as usize) };
    unsafe { engine::init(cores_num as usize) };

    let mp_response = MP_REQUEST.get_response().unwrap();
    for cpu in mp_response.cpus() {
        cpu.goto_address.write(ap_entry);
    }

    x86_64::instructions::interrupts::enable();
    tests::run_tests()
}

unsafe extern "C" fn ap_entry(cpu: &limine::mp::Cpu) -> ! {
    unsafe { kernel::memory::cpu_local_data::init_ap(cpu) };

    GuardedStack::new_kernel(
        NORMAL_STACK_SIZE,
        StackId {
            _type: StackType::Normal,
            cpu_id: get_local().kernel_id,
        },
    )
    .switch(init_ap)
}

extern "sysv64" fn init_ap() -> ! {
    gdt::init();
    interrupt::init();
    apic::init_local_apic();
    scheduler::ap_enter(get_local().kernel_id)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    tests::test_panic_handler(info);
}
