//! Synchronization Primitives (spec.md §4.4): sleep/wakeup, condition
//! variables, counting semaphores, ticket mutexes. All expressed as a wait
//! arrangement (a `VecDeque<Tid>` behind its own spinlock) plus a handful
//! of scheduler operations; `sleep` hands the enqueue straight to
//! `scheduler::sleep_on`, which holds the scheduler lock from the moment
//! the thread is marked sleeping through the switch away from it.
//!
//! Failure semantics (spec.md §4.4): every operation here is infallible on
//! a correctly initialized primitive. Misuse — unlocking a ticket mutex
//! you don't own — is a kernel panic, not a `Result`.

use crate::error::KernelError;
use crate::interrupt::section_guard::{InterruptLevel, raise_if_stricter, restore_if};
use crate::task::scheduler;
use crate::task::thread::Tid;
use alloc::collections::VecDeque;
use spin::{Mutex, MutexGuard};

/// The triple-lock sleep/wakeup protocol (spec.md §4.4). Marks the current
/// thread SLEEPING and enqueues it on `wait_queue`, drops the caller's
/// `user_guard`, and switches away — all under one continuous hold of the
/// scheduler lock (`scheduler::sleep_on`), so a concurrent `wakeup` can't
/// land in the gap between the enqueue and the actual suspend. Re-acquires
/// and returns the user lock on resume.
pub fn sleep<'a, T>(
    wait_queue: &Mutex<VecDeque<Tid>>,
    user_lock: &'a Mutex<T>,
    user_guard: MutexGuard<'a, T>,
) -> MutexGuard<'a, T> {
    let prev_level = raise_if_stricter(InterruptLevel::None);

    let tid = scheduler::current_tid();
    scheduler::sleep_on(wait_queue, tid, || drop(user_guard));

    let guard = user_lock.lock();
    restore_if(prev_level);
    guard
}

/// Moves `tid` from whatever wait arrangement it was sleeping on to the
/// ready queue, and nudges an idle core if one matches its affinity
/// (spec.md §4.4).
pub fn wakeup(tid: Tid) {
    scheduler::wakeup(tid);
}

/// `(lock, wait_list)` (spec.md §3).
pub struct CondVar {
    queue: Mutex<VecDeque<Tid>>,
}

impl CondVar {
    pub const fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn wait<'a, T>(&self, user_lock: &'a Mutex<T>, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        sleep(&self.queue, user_lock, guard)
    }

    /// Drains the wait list, waking every thread on it exactly once.
    pub fn broadcast(&self) {
        let drained: VecDeque<Tid> = {
            let mut queue = self.queue.lock();
            core::mem::take(&mut *queue)
        };
        for tid in drained {
            wakeup(tid);
        }
    }

    /// Wakes the one waiter whose tid matches, if still waiting.
    pub fn unicast(&self, tid: Tid) {
        let found = {
            let mut queue = self.queue.lock();
            if let Some(pos) = queue.iter().position(|&t| t == tid) {
                queue.remove(pos)
            } else {
                None
            }
        };
        if let Some(tid) = found {
            wakeup(tid);
        }
    }

    /// Wakes the head of the wait list, if any.
    pub fn anycast(&self) {
        let head = self.queue.lock().pop_front();
        if let Some(tid) = head {
            wakeup(tid);
        }
    }
}

/// `(count, lock, condvar)` (spec.md §3). `down` blocks once the count
/// would go negative; the magnitude of a negative count equals the
/// waiter count.
pub struct Semaphore {
    count: Mutex<i64>,
    cond: CondVar,
}

impl Semaphore {
    pub const fn new(initial: i64) -> Self {
        Self {
            count: Mutex::new(initial),
            cond: CondVar::new(),
        }
    }

    pub fn down(&self) {
        let mut guard = self.count.lock();
        *guard -= 1;
        if *guard < 0 {
            guard = sleep(&self.cond.queue, &self.count, guard);
        }
        drop(guard);
    }

    /// Returns `EPROTO` instead of blocking when the count would go
    /// negative.
    pub fn trydown(&self) -> Result<(), KernelError> {
        let mut guard = self.count.lock();
        if *guard > 0 {
            *guard -= 1;
            Ok(())
        } else {
            Err(KernelError::EProto)
        }
    }

    pub fn up(&self) {
        let mut guard = self.count.lock();
        let prior = *guard;
        *guard += 1;
        drop(guard);
        if prior < 0 {
            self.cond.anycast();
        }
    }

    pub fn count(&self) -> i64 {
        *self.count.lock()
    }
}

struct TicketState {
    curr_ticket: u64,
    next_ticket: u64,
    curr_owner: Option<Tid>,
}

/// `(curr_ticket, next_ticket, curr_owner, lock, condvar)` (spec.md §3): a
/// ticket lock giving strict FIFO fairness among contenders without
/// starvation.
pub struct TicketMutex {
    state: Mutex<TicketState>,
    cond: CondVar,
}

impl TicketMutex {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(TicketState {
                curr_ticket: 0,
                next_ticket: 0,
                curr_owner: None,
            }),
            cond: CondVar::new(),
        }
    }

    pub fn lock(&self) {
        let mut guard = self.state.lock();
        let ticket = guard.next_ticket;
        guard.next_ticket += 1;
        while guard.curr_ticket != ticket {
            guard = sleep(&self.cond.queue, &self.state, guard);
        }
        guard.curr_owner = Some(scheduler::current_tid());
    }

    /// # Panics
    /// If the calling thread is not the current owner (spec.md §4.4
    /// "Failure semantics").
    pub fn unlock(&self) {
        let mut guard = self.state.lock();
        let caller = scheduler::current_tid();
        assert_eq!(
            guard.curr_owner,
            Some(caller),
            "ticket mutex unlocked by non-owner"
        );
        guard.curr_owner = None;
        guard.curr_ticket += 1;
        drop(guard);
        self.cond.broadcast();
    }

    pub fn is_locked_by(&self, tid: Tid) -> bool {
        self.state.lock().curr_owner == Some(tid)
    }
}
