//! End-to-end scheduler scenarios: these run under the real timer and
//! Local APIC, with actual preemption enabled, unlike the pure data-
//! structure unit tests in `kernel::task::scheduler`.

use core::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use kernel::task::scheduler;

extern "C" fn increment_and_return(arg: usize) -> i64 {
    let counter = unsafe { &*(arg as *const AtomicU32) };
    counter.fetch_add(1, Ordering::SeqCst);
    42
}

pub fn thread_join_returns_exit_value() {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    COUNTER.store(0, Ordering::SeqCst);

    let tid = scheduler::thread_create(increment_and_return, &COUNTER as *const _ as usize, None)
        .expect("thread_create should succeed");
    let retval = scheduler::thread_join(tid).expect("join should succeed");

    assert_eq!(COUNTER.load(Ordering::SeqCst), 1);
    assert_eq!(retval, 42);
}

pub fn joining_self_is_rejected() {
    let err = scheduler::thread_join(scheduler::current_tid()).unwrap_err();
    assert_eq!(err, kernel::error::KernelError::EInval);
}

extern "C" fn spin_forever_then_exit(_arg: usize) -> i64 {
    for _ in 0..1000 {
        core::hint::spin_loop();
    }
    7
}

/// Spawns several threads concurrently and confirms every one of them
/// actually runs to completion and is individually joinable, i.e. the
/// ready queue and per-core dispatch don't starve or drop anyone.
pub fn many_threads_all_complete() {
    const N: usize = 16;
    let mut tids = alloc::vec::Vec::with_capacity(N);
    for _ in 0..N {
        let tid = scheduler::thread_create(spin_forever_then_exit, 0, None)
            .expect("thread_create should succeed");
        tids.push(tid);
    }
    for tid in tids {
        assert_eq!(scheduler::thread_join(tid).unwrap(), 7);
    }
}

extern "C" fn record_affinity(arg: usize) -> i64 {
    let slot = unsafe { &*(arg as *const AtomicI64) };
    slot.store(kernel::task::hooks::core_get_id() as i64, Ordering::SeqCst);
    0
}

/// A thread created with a single-core affinity mask must actually run on
/// that core.
pub fn thread_respects_explicit_affinity() {
    static SEEN_CORE: AtomicI64 = AtomicI64::new(-1);
    SEEN_CORE.store(-1, Ordering::SeqCst);

    let target_core = if kernel::task::hooks::cores_num() > 1 {
        1
    } else {
        0
    };
    let affinity = kernel::task::thread::Thread::affinity_mask(target_core);
    let tid = scheduler::thread_create(
        record_affinity,
        &SEEN_CORE as *const _ as usize,
        Some(affinity),
    )
    .unwrap();
    scheduler::thread_join(tid).unwrap();

    assert_eq!(SEEN_CORE.load(Ordering::SeqCst), target_core as i64);
}
