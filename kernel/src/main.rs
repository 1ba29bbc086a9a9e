#![no_std]
#![no_main]

extern crate alloc;
extern crate kernel;

use core::sync::atomic::{AtomicBool, Ordering};
use kernel::interrupt::nmi_handler_state;
use kernel::limine_requests::{BASE_REVISION, MP_REQUEST};
use kernel::memory::cpu_local_data::get_local;
use kernel::memory::guarded_stack::{GuardedStack, NORMAL_STACK_SIZE, StackId, StackType};
use kernel::task::{engine, hooks, scheduler};
use kernel::{apic, gdt, hlt_loop, interrupt, logger, memory};

/// Boots the BSP far enough to stand up the concurrency core (spec.md §2),
/// then starts every AP the bootloader found. The BSP itself becomes
/// `MASTER` (tid 0, spec.md §3): it never goes through `thread_create`,
/// since it is already "running" on the stack the bootloader handed it.
#[unsafe(no_mangle)]
unsafe extern "C" fn kernel_main() -> ! {
    assert!(BASE_REVISION.is_supported());

    unsafe { memory::init() };
    unsafe { kernel::memory::cpu_local_data::init_bsp() };

    logger::init().unwrap();
    log::info!("concurrency core booting");

    // GDT/IDT setup wants a stack it isn't at risk of outgrowing or sharing
    // with the bootloader; switch onto MASTER's own stack first, matching
    // the one-time-allocation, never-freed policy spec.md §4.1 gives system
    // threads.
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
    log::info!("BSP GDT/IDT initialized");

    apic::init_bsp();
    apic::init_local_apic();
    log::info!("BSP Local APIC initialized");

    let cores_num = hooks::cores_num() as u32;

    // Safety: scheduler::init/engine::init each run exactly once, here, on
    // the BSP, before any AP starts or any thread/task API is called.
    unsafe { scheduler::init(cores_num, engine::dispatch_loop as usize) };
    unsafe { engine::init(cores_num as usize) };
    log::info!("scheduler and task engine initialized for {cores_num} core(s)");

    // Limine does not invoke `goto_address` on the BSP itself; every other
    // entry lands on `ap_entry`.
    let mp_response = MP_REQUEST.get_response().unwrap();
    for cpu in mp_response.cpus() {
        cpu.goto_address.write(ap_entry);
    }

    master_loop()
}

/// `MASTER`'s body once setup is done: nothing further to bootstrap, so it
/// behaves like an idle thread for the rest of the kernel's life, waking
/// only to service IPIs (spec.md §4.3 "Idle thread") or to notice shutdown.
fn master_loop() -> ! {
    loop {
        if scheduler::is_shutdown() {
            hooks::core_release();
        }
        hooks::kevent_wait();
        scheduler::yield_now();
    }
}

/// AP entry point (the `core_start` collaborator hook, spec.md §6): brings
/// the core's local state up, then hands off to the scheduler's idle loop
/// for this core, which never returns.
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

    let core_id = get_local().kernel_id;
    log::info!("core {core_id} online");

    scheduler::ap_enter(core_id)
}

static DID_PANIC: AtomicBool = AtomicBool::new(false);

#[panic_handler]
fn rust_panic(info: &core::panic::PanicInfo) -> ! {
    if !DID_PANIC.swap(true, Ordering::Relaxed) {
        log::error!("{info}");
        hlt_loop();
    } else {
        hlt_loop();
    }
}
