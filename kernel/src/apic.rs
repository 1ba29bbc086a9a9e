//! Local APIC bring-up. x2APIC only: CORES_NUM and per-core identity come
//! from Limine's MP response (`limine_requests::MP_REQUEST`) rather than
//! ACPI/MADT parsing, so the xAPIC MMIO fallback (which needed the
//! now-dropped virtual-memory-allocator subsystem to map the Local APIC
//! page) has nothing left to depend on. A CPU without x2APIC support
//! cannot run this kernel.
//!
//! Also folds in LAPIC-timer calibration (spec.md §4 "a periodic tick
//! drives thread aging and the task engine's delta-queue"): a separate
//! `time::lapic_timer`/`time::tsc` calibration dance is replaced by a single
//! PIT-timed count-down, since we only need one periodic source and x2APIC
//! MSRs are already being poked here.

use crate::consts::{
    IA32_X2APIC_CUR_COUNT, IA32_X2APIC_DIV_CONF, IA32_X2APIC_INIT_COUNT, IA32_X2APIC_LVT_TIMER,
};
use crate::interrupt::InterruptVector;
use crate::memory::cpu_local_data::get_local;
use crate::time::pit;
use core::cell::UnsafeCell;
use force_send_sync::SendSync;
use raw_cpuid::CpuId;
use x2apic::lapic::{LocalApicBuilder, TimerDivide, TimerMode};
use x86_64::registers::model_specific::Msr;

const IA32_X2APIC_SVR: u32 = 0x80F;

/// Microseconds the PIT is timed for while the Local APIC timer free-runs,
/// used to convert its countdown into a ticks-per-millisecond rate.
const CALIBRATION_MS: u32 = 10;

pub fn cpu_has_x2apic() -> bool {
    CpuId::new()
        .get_feature_info()
        .is_some_and(|info| info.has_x2apic())
}

/// Must run once, on the BSP, before any core calls [`init_local_apic`].
pub fn init_bsp() {
    assert!(cpu_has_x2apic(), "x2APIC support is required");
}

/// Counts down `IA32_X2APIC_INIT_COUNT` for `CALIBRATION_MS` milliseconds
/// using the PIT as a reference clock, returning the ticks consumed —
/// i.e. the Local APIC's tick rate scaled to one tick per millisecond.
fn calibrate() -> u32 {
    const INITIAL_COUNT: u32 = 0xFFFF_FFFF;

    unsafe {
        Msr::new(IA32_X2APIC_DIV_CONF).write(TimerDivide::Div16 as u64);
        Msr::new(IA32_X2APIC_INIT_COUNT).write(INITIAL_COUNT as u64);
    }

    pit::sleep_ms(CALIBRATION_MS);

    let remaining = unsafe { Msr::new(IA32_X2APIC_CUR_COUNT).read() } as u32;
    (INITIAL_COUNT - remaining) / CALIBRATION_MS
}

/// This function must be called on every core, after [`init_bsp`].
pub fn init_local_apic() {
    let ticks_per_ms = calibrate();

    get_local().local_apic.call_once(|| {
        UnsafeCell::new({
            let mut local_apic = LocalApicBuilder::new()
                .timer_vector(u8::from(InterruptVector::LocalApicTimer).into())
                .error_vector(u8::from(InterruptVector::LocalApicError).into())
                .spurious_vector(u8::from(InterruptVector::LocalApicSpurious).into())
                .timer_divide(TimerDivide::Div16)
                .timer_mode(TimerMode::Periodic)
                .timer_initial(ticks_per_ms)
                .build()
                .unwrap();
            unsafe { local_apic.enable() }
            unsafe { SendSync::new(local_apic) }
        })
    });
}

pub fn is_enabled() -> bool {
    let svr = unsafe { Msr::new(IA32_X2APIC_SVR).read() };
    svr & (1 << 8) != 0
}
