//! The Local APIC timer (`apic::init_local_apic`) is programmed for one
//! tick per millisecond and drives everything time-related in the
//! concurrency core: thread aging/preemption (spec.md §4.3) and the task
//! engine's delta-queue (spec.md §5.4). TSC-deadline and wall-clock/RTC
//! machinery is dropped; nothing here needs wall-clock time, only a
//! monotonic tick count.

pub mod pit;

use core::sync::atomic::{AtomicU64, Ordering};

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Called from the Local APIC timer interrupt handler on every core.
pub fn on_timer_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    crate::task::scheduler::on_tick();
    crate::task::engine::on_tick();
}

/// Monotonic tick count since boot. Serves as the `clock_read` collaborator
/// hook (spec.md §6) for the periodic task scheduler's delta-queue math.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}
