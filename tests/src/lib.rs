#![no_std]
#![no_main]

extern crate alloc;

mod engine_tests;
mod scheduler_tests;
mod sync_tests;

use core::panic::PanicInfo;
use kernel::hlt_loop;

pub fn test_runner(tests: &[&dyn Fn()]) {
    log::info!("Running {} tests", tests.len());
    for test in tests {
        test();
    }
    exit_qemu(QemuExitCode::Success);

    hlt_loop();
}

pub fn test_panic_handler(info: &PanicInfo) -> ! {
    log::error!("[failed]");
    log::error!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failed);

    hlt_loop();
}

// Custom test harness
pub trait KernelTest {
    fn name(&self) -> &'static str;
    fn run(&self);
}

impl<F> KernelTest for F
where
    F: Fn(),
{
    fn name(&self) -> &'static str {
        core::any::type_name::<F>()
    }

    fn run(&self) {
        log::info!("{}:\t", core::any::type_name::<F>());

        self();

        log::info!("\x1b[32m[ok]\x1b[0m");
    }
}


pub fn tests() -> &'static [&'static dyn KernelTest] {
    &[
        &trivial_assertion,
        &scheduler_tests::thread_join_returns_exit_value,
        &scheduler_tests::joining_self_is_rejected,
        &scheduler_tests::many_threads_all_complete,
        &scheduler_tests::thread_respects_explicit_affinity,
        &sync_tests::ticket_mutex_serializes_increments,
        &sync_tests::semaphore_balances_producers_and_consumers,
        &sync_tests::condvar_broadcast_wakes_every_waiter_once,
        &engine_tests::hard_parents_gate_child_until_both_satisfied,
        &engine_tests::flow_parent_runs_child_without_waiting_on_hard_parents,
        &engine_tests::diamond_error_propagation_notifies_sink_exactly_once,
        &engine_tests::periodic_tasks_fire_in_proportion_to_their_period,
    ]
}

pub fn run_tests() -> ! {
    let tests = tests();

    log::info!("Running {} kernel tests", tests.len());

    for test in tests {
        test.run();
    }

    exit_qemu(QemuExitCode::Success);
    hlt_loop();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed  = 0x11,
}

pub fn exit_qemu(exit_code: QemuExitCode) {
    use x86_64::instructions::port::Port;

    unsafe {
        let mut port = Port::new(0xf4);
        port.write(exit_code as u32);
    }
}

fn trivial_assertion() {
    assert_eq!(1, 1);
}
