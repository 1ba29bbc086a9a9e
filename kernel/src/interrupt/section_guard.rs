//! Interrupt-Safe Critical Sections.
//!
//! Pairs a spinlock with an interrupt-level change so both are released on
//! every exit path, including early returns and panics-that-unwind-never
//! (we abort on panic, but the guard is still exception safe w.r.t. `?`).
//! Every mutation of the scheduler's queues, the per-core current-thread
//! slot, and the task board goes through this.

use spin::{Mutex, MutexGuard};

/// x86_64 has no hardware notion of numbered interrupt priority levels, so
/// this collapses nanvix's level scheme to the two levels this core's
/// collaborators actually need: interrupts on, or all maskable interrupts
/// off. `None` is strictly higher priority than `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InterruptLevel {
    Normal,
    None,
}

pub fn get_level() -> InterruptLevel {
    if x86_64::instructions::interrupts::are_enabled() {
        InterruptLevel::Normal
    } else {
        InterruptLevel::None
    }
}

/// Sets the interrupt level and returns the previous one.
///
/// # Safety
/// Must not be called from within a naked/interrupt-handler prologue where
/// register state for the CPU interrupt flag is not yet consistent.
pub fn set_level(level: InterruptLevel) -> InterruptLevel {
    let prev = get_level();
    match level {
        InterruptLevel::Normal => x86_64::instructions::interrupts::enable(),
        InterruptLevel::None => x86_64::instructions::interrupts::disable(),
    }
    prev
}

/// A held critical section: a lock plus (conditionally) a raised interrupt
/// level, both released together when the guard drops.
pub struct SectionGuard<'a, T> {
    guard: Option<MutexGuard<'a, T>>,
    prev_level: InterruptLevel,
    changed: bool,
}

impl<'a, T> SectionGuard<'a, T> {
    /// Raises the interrupt level to `level` only if it is stricter than the
    /// current one, then acquires `lock`.
    pub fn enter(lock: &'a Mutex<T>, level: InterruptLevel) -> Self {
        let current = get_level();
        let changed = level > current;
        let prev_level = if changed { set_level(level) } else { current };

        Self {
            guard: Some(lock.lock()),
            prev_level,
            changed,
        }
    }

    pub fn get(&self) -> &T {
        self.guard.as_ref().unwrap()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.guard.as_mut().unwrap()
    }
}

impl<'a, T> Drop for SectionGuard<'a, T> {
    fn drop(&mut self) {
        self.guard.take();
        if self.changed {
            set_level(self.prev_level);
        }
    }
}

/// Raises the interrupt level to `level` if it is stricter than the
/// current one, returning the previous level. Pairs with [`restore_if`].
///
/// This is the asymmetric half of [`SectionGuard`]'s acquire/release: the
/// sleep/wakeup protocol (spec.md §4.4) raises the level, takes and drops
/// two different locks in turn, yields, and only then restores — a span no
/// single RAII guard can express since the guard that raised the level is
/// gone by the time it is safe to lower it again.
pub fn raise_if_stricter(level: InterruptLevel) -> InterruptLevel {
    let current = get_level();
    if level > current {
        set_level(level);
    }
    current
}

/// Restores `prev` if it differs from the current level. The counterpart
/// to [`raise_if_stricter`].
pub fn restore_if(prev: InterruptLevel) {
    if prev != get_level() {
        set_level(prev);
    }
}
