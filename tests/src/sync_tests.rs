//! Real, preemptible-thread exercises of the primitives in
//! `kernel::task::sync` — mutual exclusion, fair wakeup, and broadcast,
//! all under actual interleaving rather than a single-threaded unit test.

use core::sync::atomic::{AtomicU32, Ordering};
use kernel::task::scheduler;
use kernel::task::sync::{CondVar, Semaphore, TicketMutex};

static COUNTER: AtomicU32 = AtomicU32::new(0);
static MUTEX: TicketMutex = TicketMutex::new();

extern "C" fn increment_under_lock(iterations: usize) -> i64 {
    for _ in 0..iterations {
        MUTEX.lock();
        let seen = COUNTER.load(Ordering::Relaxed);
        COUNTER.store(seen + 1, Ordering::Relaxed);
        MUTEX.unlock();
    }
    0
}

/// Three threads hammer a shared counter behind a ticket mutex; if the
/// mutex ever let two holders in at once, interleaved non-atomic
/// read-modify-write would lose increments and the final count would come
/// up short.
pub fn ticket_mutex_serializes_increments() {
    COUNTER.store(0, Ordering::SeqCst);
    const ITER: usize = 2000;

    let a = scheduler::thread_create(increment_under_lock, ITER, None).unwrap();
    let b = scheduler::thread_create(increment_under_lock, ITER, None).unwrap();
    let c = scheduler::thread_create(increment_under_lock, ITER, None).unwrap();

    scheduler::thread_join(a).unwrap();
    scheduler::thread_join(b).unwrap();
    scheduler::thread_join(c).unwrap();

    assert_eq!(COUNTER.load(Ordering::SeqCst), (3 * ITER) as u32);
}

static PRODUCER_SEM: Semaphore = Semaphore::new(0);
static REMAINING_UPS: AtomicU32 = AtomicU32::new(0);
static CONSUMED: AtomicU32 = AtomicU32::new(0);

extern "C" fn producer_body(ups: usize) -> i64 {
    for _ in 0..ups {
        PRODUCER_SEM.up();
    }
    0
}

extern "C" fn consumer_body(_arg: usize) -> i64 {
    loop {
        if REMAINING_UPS
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n == 0 { None } else { Some(n - 1) }
            })
            .is_err()
        {
            return 0;
        }
        PRODUCER_SEM.down();
        CONSUMED.fetch_add(1, Ordering::SeqCst);
    }
}

/// 4 producers each `up()` 250 times (1000 total), 4 consumers race to
/// `down()` exactly that many times; once every thread has joined, the
/// semaphore's count must have returned to zero and every unit produced
/// must have been consumed exactly once.
pub fn semaphore_balances_producers_and_consumers() {
    const TOTAL: u32 = 1000;
    const PER_PRODUCER: usize = 250;
    REMAINING_UPS.store(TOTAL, Ordering::SeqCst);
    CONSUMED.store(0, Ordering::SeqCst);

    let mut producers = alloc::vec::Vec::new();
    for _ in 0..4 {
        producers.push(scheduler::thread_create(producer_body, PER_PRODUCER, None).unwrap());
    }
    let mut consumers = alloc::vec::Vec::new();
    for _ in 0..4 {
        consumers.push(scheduler::thread_create(consumer_body, 0, None).unwrap());
    }

    for tid in producers {
        scheduler::thread_join(tid).unwrap();
    }
    for tid in consumers {
        scheduler::thread_join(tid).unwrap();
    }

    assert_eq!(CONSUMED.load(Ordering::SeqCst), TOTAL);
    assert_eq!(PRODUCER_SEM.count(), 0);
}

static BROADCAST_COND: CondVar = CondVar::new();
static WAITING: AtomicU32 = AtomicU32::new(0);
static WOKEN: AtomicU32 = AtomicU32::new(0);
static RELEASE: AtomicU32 = AtomicU32::new(0);

/// `CondVar::wait` takes a `Mutex<T>` guard, not the lock-free `TicketMutex`
/// this crate otherwise favors, so this scenario is built over a plain
/// `spin::Mutex<()>` standing in for "the condition's associated state".
static GATE: spin::Mutex<()> = spin::Mutex::new(());

extern "C" fn waiter_body(_arg: usize) -> i64 {
    WAITING.fetch_add(1, Ordering::SeqCst);
    let mut guard = GATE.lock();
    while RELEASE.load(Ordering::SeqCst) == 0 {
        guard = BROADCAST_COND.wait(&GATE, guard);
    }
    drop(guard);
    WOKEN.fetch_add(1, Ordering::SeqCst);
    0
}

/// 8 threads park on a condvar; a single `broadcast()` must wake every one
/// of them exactly once, never fewer (lost wakeup) and never duplicated
/// (double count).
pub fn condvar_broadcast_wakes_every_waiter_once() {
    WAITING.store(0, Ordering::SeqCst);
    WOKEN.store(0, Ordering::SeqCst);
    RELEASE.store(0, Ordering::SeqCst);

    let mut waiters = alloc::vec::Vec::new();
    for _ in 0..8 {
        waiters.push(scheduler::thread_create(waiter_body, 0, None).unwrap());
    }

    while WAITING.load(Ordering::SeqCst) < 8 {
        scheduler::yield_now();
    }
    // Give every waiter a chance to actually reach `cond.wait` and
    // register on the wait queue before the broadcast goes out.
    for _ in 0..1000 {
        scheduler::yield_now();
    }

    RELEASE.store(1, Ordering::SeqCst);
    BROADCAST_COND.broadcast();

    for tid in waiters {
        scheduler::thread_join(tid).unwrap();
    }

    assert_eq!(WOKEN.load(Ordering::SeqCst), 8);
}
