//! Scheduler (spec.md §4.3): the thread table, the global ready queue, the
//! per-core current-thread array, and the master/dispatcher/idle system
//! threads.
//!
//! One global spinlock (`SCHEDULER`) serializes every thread state-machine
//! mutation, exactly as spec.md §5 "Shared-resource policy" requires. The
//! lock is deliberately held *across* the low-level `context::switch` call
//! in [`switch_locked`]: the call leaves the lock's word set and
//! `core::mem::forget`s the guard, and [`thread_prolog`] — called first by
//! every path that can land on a core after a switch, whether that's a
//! thread resuming mid-function or a brand new context starting cold at a
//! trampoline — force-unlocks it before touching scheduler state again.
//! This is the Rust-idiom rendering of nanvix's prolog handoff (spec.md §9
//! "self-free after exit" / §4.3 "Prolog handoff"): the work deferred to it
//! is freeing a just-terminated thread's own stacks (since a thread cannot
//! free the stack it is still executing on) and recording the *outgoing*
//! thread's saved stack pointer, which it has no way to store into its own
//! table slot once it is no longer executing. Per-core `pending_outgoing`/
//! `switch_scratch` slots carry that handoff; `pending_zombie` carries the
//! zombie one. Ready-queue re-insertion of a voluntarily yielding thread
//! happens synchronously before the switch, which this crate treats as an
//! equivalent, idiomatic simplification of the same handoff (documented in
//! DESIGN.md) — the intrusive "next" link the original ties to every thread
//! becomes these fixed per-core slots instead, since threads are addressed
//! by `Tid` through a fixed table rather than raw pointers (spec.md §9
//! "Intrusive queues").

use crate::consts::{EXIT_RING_SIZE, MAX_CORES, THREAD_MAX, THREAD_QUANTUM};
use crate::error::KernelError;
use crate::interrupt::InterruptVector;
use crate::interrupt::section_guard::{InterruptLevel, raise_if_stricter, restore_if};
use crate::memory::guarded_stack::{GuardedStack, NORMAL_STACK_SIZE, StackId, StackType};
use crate::task::context;
use crate::task::hooks;
use crate::task::thread::{Priority, Thread, ThreadState, Tid};
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use spin::{Mutex, MutexGuard};

pub const MASTER_TID: Tid = 0;
pub const DISPATCHER_TID: Tid = 1;
const FIRST_IDLE_TID: Tid = 2;

fn idle_tid(core_id: u32) -> Tid {
    FIRST_IDLE_TID + core_id
}

struct Scheduler {
    threads: [Option<Thread>; THREAD_MAX],
    ready: VecDeque<Tid>,
    current: [Tid; MAX_CORES],
    next_tid: Tid,
    cores_num: u32,
    shutdown: bool,
    exit_ring: [(Tid, i64); EXIT_RING_SIZE],
    exit_ring_next: usize,
    /// Per-core: a just-terminated thread whose stacks the next thread to
    /// run on that core must free before doing anything else.
    pending_zombie: [Option<Tid>; MAX_CORES],
    /// Per-core: the thread that was switched out of that core, whose
    /// suspended stack pointer (parked in `switch_scratch`) the next thread
    /// to run on that core must store back into its table slot — it cannot
    /// do this for itself, since by the time anything runs again it is no
    /// longer executing.
    pending_outgoing: [Option<Tid>; MAX_CORES],
    /// Per-core scratch slot `context::switch` writes the outgoing thread's
    /// suspended stack pointer into. A static slot rather than a stack local
    /// in the switching function, since that function's own stack frame is
    /// exactly what gets suspended.
    switch_scratch: [usize; MAX_CORES],
    /// User threads created so far; drives the round-robin default affinity
    /// in [`thread_create`] independent of thread-table slot reuse.
    user_count: u32,
}

static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler {
    threads: [None; THREAD_MAX],
    ready: VecDeque::new(),
    current: [0; MAX_CORES],
    next_tid: 0,
    cores_num: 1,
    shutdown: false,
    exit_ring: [(0, 0); EXIT_RING_SIZE],
    exit_ring_next: 0,
    pending_zombie: [None; MAX_CORES],
    pending_outgoing: [None; MAX_CORES],
    switch_scratch: [0; MAX_CORES],
    user_count: 0,
});

impl Scheduler {
    fn find_index(&self, tid: Tid) -> Option<usize> {
        self.threads
            .iter()
            .position(|t| matches!(t, Some(th) if th.tid == tid))
    }

    fn alloc_slot(&mut self) -> Option<usize> {
        self.threads.iter().position(Option::is_none)
    }

    fn record_exit(&mut self, tid: Tid, retval: i64) {
        self.exit_ring[self.exit_ring_next] = (tid, retval);
        self.exit_ring_next = (self.exit_ring_next + 1) % self.exit_ring.len();
    }

    fn scan_exit_ring(&self, tid: Tid) -> Option<i64> {
        self.exit_ring
            .iter()
            .find(|(t, _)| *t == tid)
            .map(|(_, retval)| *retval)
    }

    /// Wakes `tid` (moves it to the ready queue), nudging an idle matching
    /// core. Assumes the scheduler lock is already held.
    fn wakeup_locked(&mut self, tid: Tid) {
        let Some(idx) = self.find_index(tid) else {
            return;
        };
        let thread = self.threads[idx].as_mut().unwrap();
        if matches!(thread.state, ThreadState::Zombie | ThreadState::Terminated) {
            return;
        }
        thread.state = ThreadState::Ready;
        let affinity = thread.affinity;
        self.ready.push_back(tid);

        for core in 0..self.cores_num {
            if affinity & Thread::affinity_mask(core) == 0 {
                continue;
            }
            if self.current[core as usize] == idle_tid(core) {
                hooks::kevent_notify(core, InterruptVector::Sched);
                break;
            }
        }
    }

    /// Picks the next thread to run on `core_id`: the first ready thread
    /// matching its affinity (head to tail), else the current thread if it
    /// still matches, else that core's idle thread (spec.md §4.3 "Ready
    /// selection").
    fn pick_next(&mut self, core_id: u32) -> Tid {
        if let Some(pos) = self
            .ready
            .iter()
            .position(|&tid| self.threads[tid as usize].as_ref().unwrap().matches_affinity(core_id))
        {
            return self.ready.remove(pos).unwrap();
        }
        let current = self.current[core_id as usize];
        let current_thread = self.threads[current as usize].as_ref().unwrap();
        if current_thread.state == ThreadState::Running && current_thread.matches_affinity(core_id)
        {
            current
        } else {
            idle_tid(core_id)
        }
    }

    fn park_outgoing(&mut self, tid: Tid, core_id: u32, priority: Priority) {
        let thread = self.threads[tid as usize].as_mut().unwrap();
        match thread.state {
            ThreadState::Running => {
                thread.state = ThreadState::Ready;
                match priority {
                    Priority::High => self.ready.push_front(tid),
                    Priority::Low => self.ready.push_back(tid),
                }
            }
            ThreadState::Terminated => {
                self.pending_zombie[core_id as usize] = Some(tid);
            }
            // Sleeping/Stopped/Periodic: the caller already placed this
            // thread on its own wait/periodic arrangement before yielding.
            _ => {}
        }
    }

    fn free_zombie(&mut self, tid: Tid) {
        let Some(idx) = self.find_index(tid) else {
            return;
        };
        let mut thread = self.threads[idx].take().unwrap();
        thread.kstack.take();
        thread.ustack.take();
    }
}

/// Initializes the thread table: MASTER (already "running" — this call
/// happens on its own boot stack), one IDLE per core, and the DISPATCHER
/// slot (context-created but left `Ready`, picked up by the first yield).
///
/// # Safety
/// Must be called exactly once, on the BSP, before any other core starts.
pub unsafe fn init(cores_num: u32, dispatcher_entry: usize) {
    let mut sched = SCHEDULER.lock();
    sched.cores_num = cores_num;
    sched.next_tid = FIRST_IDLE_TID + cores_num;

    sched.threads[MASTER_TID as usize] = Some(Thread {
        tid: MASTER_TID,
        core_id: 0,
        state: ThreadState::Running,
        affinity: full_affinity(cores_num),
        age: 0,
        start: 0,
        arg: 0,
        ctx: None,
        kstack: None,
        ustack: None,
        join_waiters: VecDeque::new(),
    });
    sched.current[0] = MASTER_TID;

    for core in 0..cores_num {
        let tid = idle_tid(core);
        let kstack = GuardedStack::new_kernel(
            NORMAL_STACK_SIZE,
            StackId {
                _type: StackType::Normal,
                cpu_id: core,
            },
        );
        let ctx = if core == 0 {
            None // BSP's idle never actually starts; BSP continues as MASTER
        } else {
            Some(unsafe {
                context::context_create(
                    kstack.top().as_mut_ptr::<u8>(),
                    idle_trampoline as usize,
                    core as usize,
                )
            })
        };
        sched.threads[tid as usize] = Some(Thread {
            tid,
            core_id: core,
            state: ThreadState::Ready,
            affinity: Thread::affinity_mask(core),
            age: 0,
            start: idle_trampoline as usize,
            arg: core as usize,
            ctx,
            kstack: Some(kstack),
            ustack: None,
            join_waiters: VecDeque::new(),
        });
    }

    let dispatcher_stack = GuardedStack::new_kernel(
        NORMAL_STACK_SIZE,
        StackId {
            _type: StackType::Normal,
            cpu_id: 0,
        },
    );
    let ctx = unsafe {
        context::context_create(
            dispatcher_stack.top().as_mut_ptr::<u8>(),
            dispatcher_entry,
            DISPATCHER_TID as usize,
        )
    };
    sched.threads[DISPATCHER_TID as usize] = Some(Thread {
        tid: DISPATCHER_TID,
        core_id: 0,
        state: ThreadState::Ready,
        affinity: full_affinity(cores_num),
        age: 0,
        start: dispatcher_entry,
        arg: DISPATCHER_TID as usize,
        ctx: Some(ctx),
        kstack: Some(dispatcher_stack),
        ustack: None,
        join_waiters: VecDeque::new(),
    });
    sched.ready.push_back(DISPATCHER_TID);
}

fn full_affinity(cores_num: u32) -> u64 {
    if cores_num >= 64 {
        u64::MAX
    } else {
        (1u64 << cores_num) - 1
    }
}

/// An AP's entry point into the scheduler: registers this core's idle
/// thread as running and enters its loop directly on the AP's boot stack
/// (no context switch needed — nothing on this stack will ever be resumed).
pub fn ap_enter(core_id: u32) -> ! {
    let mut sched = SCHEDULER.lock();
    let tid = idle_tid(core_id);
    sched.current[core_id as usize] = tid;
    let thread = sched.threads[tid as usize].as_mut().unwrap();
    thread.state = ThreadState::Running;
    thread.ctx = None;
    sched.pending_outgoing[core_id as usize] = None;
    // No real predecessor on this core; forget the guard anyway so
    // `idle_trampoline`'s leading `thread_prolog` call has the same
    // lock-held precondition every other entry path does.
    core::mem::forget(sched);
    idle_trampoline(core_id as usize)
}

extern "C" fn idle_trampoline(core_id: usize) -> ! {
    thread_prolog();
    loop {
        if is_shutdown() {
            hooks::core_release();
        }
        hooks::kevent_wait();
        yield_now();
    }
}

extern "C" fn thread_trampoline(tid_as_usize: usize) -> ! {
    thread_prolog();
    let tid = tid_as_usize as Tid;
    let (start, arg) = {
        let sched = SCHEDULER.lock();
        let thread = sched.threads[tid as usize].as_ref().unwrap();
        (thread.start, thread.arg)
    };
    let entry: extern "C" fn(usize) -> i64 = unsafe { core::mem::transmute(start) };
    let retval = entry(arg);
    thread_exit(retval)
}

/// Runs first on every path that can start executing on a core after a
/// switch: a fresh trampoline's very first instructions, or a thread
/// resuming where `switch_locked` left off. Force-unlocks the scheduler
/// lock a predecessor `core::mem::forget`'d across the switch, stores that
/// predecessor's saved stack pointer into its own table slot (it could not
/// do this for itself), and frees a predecessor that terminated instead.
pub(crate) fn thread_prolog() {
    let core_id = hooks::core_get_id();
    unsafe { SCHEDULER.force_unlock() };
    let mut guard = SCHEDULER.lock();
    if let Some(outgoing) = guard.pending_outgoing[core_id as usize].take() {
        let rsp = guard.switch_scratch[core_id as usize];
        if let Some(thread) = guard.threads[outgoing as usize].as_mut() {
            thread.ctx = Some(rsp as *mut usize);
        }
    }
    if let Some(zombie) = guard.pending_zombie[core_id as usize].take() {
        guard.free_zombie(zombie);
    }
}

pub fn current_tid() -> Tid {
    SCHEDULER.lock().current[hooks::core_get_id() as usize]
}

pub fn is_shutdown() -> bool {
    SCHEDULER.lock().shutdown
}

/// Sets the global shutdown flag; idle threads observe it on their next
/// wakeup and release their core for good (spec.md §4.3 "Shutdown").
pub fn shutdown() {
    SCHEDULER.lock().shutdown = true;
}

fn set_state_locked(sched: &mut Scheduler, tid: Tid, state: ThreadState) {
    if let Some(idx) = sched.find_index(tid) {
        sched.threads[idx].as_mut().unwrap().state = state;
    }
}

/// Moves `tid` to the ready queue (spec.md §4.4 `wakeup`).
pub fn wakeup(tid: Tid) {
    SCHEDULER.lock().wakeup_locked(tid);
}

/// Allocates a thread: a fresh slot (spec.md §4.3 "Create"), two stacks,
/// and an initial context pointing at the shared trampoline, which calls
/// `start(arg)` and feeds its return value to `thread_exit`. Default
/// affinity binds round-robin to one non-master core, following spec.md
/// §4.3's static-affinity model.
pub fn thread_create(
    start: extern "C" fn(usize) -> i64,
    arg: usize,
    affinity: Option<u64>,
) -> Result<Tid, KernelError> {
    let mut sched = SCHEDULER.lock();
    let idx = sched.alloc_slot().ok_or(KernelError::EAgain)?;
    let tid = sched.next_tid;
    sched.next_tid += 1;

    let user_index = sched.user_count;
    sched.user_count += 1;
    let non_master_cores = (sched.cores_num - 1).max(1);
    let user_core_index = (user_index % non_master_cores) + 1;
    let affinity = affinity.unwrap_or_else(|| Thread::affinity_mask(user_core_index));

    let kstack = GuardedStack::new_kernel(
        NORMAL_STACK_SIZE,
        StackId {
            _type: StackType::Normal,
            cpu_id: user_core_index,
        },
    );
    let ustack = GuardedStack::new_kernel(
        NORMAL_STACK_SIZE,
        StackId {
            _type: StackType::Normal,
            cpu_id: user_core_index,
        },
    );
    let ctx = unsafe {
        context::context_create(kstack.top().as_mut_ptr::<u8>(), thread_trampoline as usize, tid as usize)
    };

    sched.threads[idx] = Some(Thread {
        tid,
        core_id: user_core_index,
        state: ThreadState::Ready,
        affinity,
        age: 0,
        start: start as usize,
        arg,
        ctx: Some(ctx),
        kstack: Some(kstack),
        ustack: Some(ustack),
        join_waiters: VecDeque::new(),
    });
    sched.ready.push_back(tid);
    Ok(tid)
}

/// Records `retval` in the exit ring, wakes any joiners, and yields for
/// the last time: this thread is never scheduled again (spec.md §4.3
/// "Exit").
pub fn thread_exit(retval: i64) -> ! {
    let tid = current_tid();
    {
        let mut sched = SCHEDULER.lock();
        sched.record_exit(tid, retval);
        set_state_locked(&mut sched, tid, ThreadState::Terminated);
        if let Some(idx) = sched.find_index(tid) {
            let waiters = core::mem::take(&mut sched.threads[idx].as_mut().unwrap().join_waiters);
            for waiter in waiters {
                sched.wakeup_locked(waiter);
            }
        }
    }
    yield_now();
    unreachable!("a terminated thread is never rescheduled");
}

/// Waits for `target` to terminate and returns the value it passed to
/// `thread_exit` (spec.md §4.3 "Join"), or `0` if the exit ring already
/// overwrote it. Joining self, or a tid that was never allocated, fails.
pub fn thread_join(target: Tid) -> Result<i64, KernelError> {
    let caller = current_tid();
    if target == caller {
        return Err(KernelError::EInval);
    }
    loop {
        let core_id = hooks::core_get_id();
        let mut sched = SCHEDULER.lock();
        let Some(idx) = sched.find_index(target) else {
            let retval = sched.scan_exit_ring(target).unwrap_or(0);
            return Ok(retval);
        };
        // thread_exit leaves `target` TERMINATED, with its exit value
        // already recorded, for the whole window before a later
        // `free_zombie` drops its table slot; the exit ring already has
        // the value either way, so there is nothing left to wait for.
        if matches!(
            sched.threads[idx].as_ref().unwrap().state,
            ThreadState::Zombie | ThreadState::Terminated
        ) {
            let retval = sched.scan_exit_ring(target).unwrap_or(0);
            return Ok(retval);
        }
        sched.threads[idx].as_mut().unwrap().join_waiters.push_back(caller);
        set_state_locked(&mut sched, caller, ThreadState::Sleeping);
        switch_locked(sched, core_id, Priority::Low, caller);
    }
}

pub fn thread_self() -> Tid {
    current_tid()
}

pub fn thread_set_affinity(tid: Tid, affinity: u64) -> Result<(), KernelError> {
    if affinity == 0 {
        return Err(KernelError::EInval);
    }
    let mut sched = SCHEDULER.lock();
    let idx = sched.find_index(tid).ok_or(KernelError::EInval)?;
    sched.threads[idx].as_mut().unwrap().affinity = affinity;
    Ok(())
}

pub fn yield_now() {
    yield_with_priority(Priority::Low)
}

pub fn yield_high_priority() {
    yield_with_priority(Priority::High)
}

/// The core of the scheduler: pick the next runnable thread for this core
/// and switch to it, carrying the scheduler lock across the switch (see
/// module docs). `guard` must have been acquired with nothing else done to
/// scheduler state since (no other core can have observed an inconsistent
/// half-suspended `current_tid` in between).
fn switch_locked(mut guard: MutexGuard<'static, Scheduler>, core_id: u32, priority: Priority, current_tid: Tid) {
    let next_tid = guard.pick_next(core_id);
    if next_tid == current_tid {
        return;
    }

    guard.park_outgoing(current_tid, core_id, priority);
    let next_thread = guard.threads[next_tid as usize].as_mut().unwrap();
    let next_ctx = next_thread.ctx.take().expect("ready thread without a saved context");
    next_thread.state = ThreadState::Running;
    next_thread.core_id = core_id;
    next_thread.age = 0;
    guard.current[core_id as usize] = next_tid;
    guard.pending_outgoing[core_id as usize] = Some(current_tid);
    let scratch_ptr = &mut guard.switch_scratch[core_id as usize] as *mut usize;

    // Lock stays logically held across the switch; released by whichever
    // thread's code runs next, right after it resumes, in `thread_prolog`.
    core::mem::forget(guard);

    unsafe {
        context::switch(scratch_ptr, next_ctx as usize);
    }

    // We have resumed — possibly on a different core than the one this call
    // started on, if `current_tid` was migrated while suspended; either
    // way, this call only ever returns into the exact stack frame that
    // invoked it, and `thread_prolog` settles whatever that core left
    // pending for us.
    thread_prolog();
}

pub fn yield_with_priority(priority: Priority) {
    let prev_level = raise_if_stricter(InterruptLevel::None);
    let core_id = hooks::core_get_id();

    let guard = SCHEDULER.lock();
    let current_tid = guard.current[core_id as usize];
    switch_locked(guard, core_id, priority, current_tid);

    restore_if(prev_level);
}

/// The suspend half of the sleep/wakeup triple-lock protocol (spec.md
/// §4.4): marks `tid` SLEEPING and enqueues it on `wait_queue`, then picks
/// and switches to the next runnable thread, all under one continuous hold
/// of the scheduler lock. Without that, a `wakeup(tid)` from another core
/// could land in the gap between "marked sleeping" and "actually switched
/// away" and have its effect erased or duplicated by this thread's own
/// park-on-yield bookkeeping. `on_committed` runs after `tid` is marked
/// sleeping and enqueued but before the switch, to release whatever lock
/// the caller held while deciding to sleep.
pub(crate) fn sleep_on(wait_queue: &Mutex<VecDeque<Tid>>, tid: Tid, on_committed: impl FnOnce()) {
    let core_id = hooks::core_get_id();
    let mut guard = SCHEDULER.lock();
    set_state_locked(&mut guard, tid, ThreadState::Sleeping);
    wait_queue.lock().push_back(tid);
    on_committed();
    switch_locked(guard, core_id, Priority::Low, tid);
}

/// Runs from the timer ISR on every core (spec.md §4.3 "Aging and IPI").
/// Ages the currently running thread on each core and raises a `SCHED`
/// IPI at any core whose occupant has overstayed its quantum while a
/// same-affinity thread waits ready.
pub fn on_tick() {
    let mut guard = SCHEDULER.lock();
    for core in 0..guard.cores_num {
        let tid = guard.current[core as usize];
        if let Some(thread) = guard.threads[tid as usize].as_mut() {
            thread.age += 1;
        }
    }

    let mut to_notify = Vec::new();
    for core in 0..guard.cores_num {
        let tid = guard.current[core as usize];
        let age = guard.threads[tid as usize].as_ref().map(|t| t.age).unwrap_or(0);
        if age <= THREAD_QUANTUM {
            continue;
        }
        let eligible = guard
            .ready
            .iter()
            .any(|&rtid| guard.threads[rtid as usize].as_ref().unwrap().matches_affinity(core));
        if eligible {
            to_notify.push(core);
        }
    }
    drop(guard);

    for core in to_notify {
        hooks::kevent_notify(core, InterruptVector::Sched);
    }
}
