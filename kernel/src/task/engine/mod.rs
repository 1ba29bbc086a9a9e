//! Task Engine (spec.md §4.5): a dataflow DAG executed by a single
//! Dispatcher thread, driven by a board-wide spinlock, a semaphore counting
//! ready tasks, a periodic delta-queue, and per-core emission queues for
//! inline cross-core dispatch. The board is the process-wide singleton
//! spec.md §9 "Global singletons" asks for: one aggregate owning every
//! lock, queue and counter the engine needs.

pub mod periodic;

use crate::consts::{TASK_ARGS_NUM, TASK_CHILDREN_MAX, TASK_MAX, TASK_PARENTS_MAX};
use crate::error::KernelError;
use crate::interrupt::InterruptVector;
use crate::task::hooks;
use crate::task::scheduler;
use crate::task::sync::Semaphore;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use bitflags::bitflags;
use periodic::PeriodicQueue;
use spin::Mutex;

pub type TaskId = u32;
pub type TaskFn = extern "C" fn(&[usize; TASK_ARGS_NUM]) -> i32;
pub type MergeFn = extern "C" fn(&[usize; TASK_ARGS_NUM], &mut [usize; TASK_ARGS_NUM]);

bitflags! {
    /// 8-bit per-edge trigger mask (spec.md §4.5 "Triggers"). A management
    /// outcome selects exactly one of these (or, for `Completed`, a small
    /// combination of the three user codes); a child edge fires when its
    /// `triggers` intersects the outcome.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Triggers: u8 {
        const USER0        = 1 << 0;
        const USER1        = 1 << 1;
        const USER2        = 1 << 2;
        const AGAIN        = 1 << 3;
        const STOP         = 1 << 4;
        const PERIODIC     = 1 << 5;
        const ERROR_THROW  = 1 << 6;
        const ERROR_CATCH  = 1 << 7;
    }
}

impl Triggers {
    pub const ERROR: Triggers = Triggers::ERROR_THROW.union(Triggers::ERROR_CATCH);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    NotStarted,
    Ready,
    Running,
    Completed,
    Stopped,
    Periodic,
    Error,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleType {
    Ready,
    Stopped,
    Periodic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPriority {
    Low,
    High,
}

/// The management code a task's exit selects (spec.md §4.5 "Management
/// outcomes"). `Completed` carries the subset of `{USER0,USER1,USER2}` the
/// task fired with; everything else is a single fixed trigger.
#[derive(Debug, Clone, Copy)]
pub enum Management {
    Again,
    Stop,
    Periodic(u32),
    Completed(Triggers),
    Error,
}

#[derive(Clone, Copy)]
struct ChildEdge {
    child: TaskId,
    triggers: Triggers,
    is_dependency: bool,
    is_temporary: bool,
    valid: bool,
}

impl ChildEdge {
    const INVALID: ChildEdge = ChildEdge {
        child: 0,
        triggers: Triggers::empty(),
        is_dependency: false,
        is_temporary: false,
        valid: false,
    };
}

struct Task {
    id: TaskId,
    state: TaskState,
    schedule_type: ScheduleType,
    priority: TaskPriority,
    /// Reload value for `delta_factor`; re-armed on every PERIODIC exit.
    period: u32,
    delta_factor: u32,
    /// Live countdown of unmet hard parents; reset to `rparents` each time
    /// the task is dispatched (spec.md §4.5 "Dispatcher loop" step 2).
    nparents: u32,
    /// Reload value: total number of currently connected hard-dependency
    /// parents.
    rparents: u32,
    /// Left-packed bitmask over `[0, rparents)`: bit set means that hard
    /// parent slot is still unsatisfied this cycle. `popcount == nparents`
    /// always.
    parent_types: u32,
    nchildren: usize,
    children: [ChildEdge; TASK_CHILDREN_MAX],
    func: TaskFn,
    args: [usize; TASK_ARGS_NUM],
    retval: i32,
    /// Which completion trigger bit(s) release `sem`.
    releases: Triggers,
    sem: Semaphore,
    /// Cycle-breaking color for error propagation (spec.md §9 "Cyclic
    /// graphs"); a task already stamped with the board's current color is
    /// skipped.
    color: u32,
}

fn full_mask(bits: u32) -> u32 {
    if bits >= 32 { u32::MAX } else { (1u32 << bits) - 1 }
}

/// Clears one parent slot from a left-packed `[0, rparents)` bitmask,
/// preserving left-packing by moving the top bit down into the vacated
/// slot. There is no per-edge identity in the mask, only population count,
/// so any set (unsatisfied) bit is as good as any other to remove — this is
/// the deliberate simplification of the C original's pointer-chasing
/// compaction (see DESIGN.md).
fn remove_parent_bit(parent_types: u32, rparents: u32) -> (u32, bool) {
    if rparents == 0 {
        return (parent_types, false);
    }
    let top = rparents - 1;
    let bit = (0..rparents)
        .find(|&b| parent_types & (1 << b) != 0)
        .unwrap_or(top);
    let was_set = parent_types & (1 << bit) != 0;
    let mut mask = parent_types & !(1 << bit);
    if bit != top {
        mask &= !(1 << top);
        if parent_types & (1 << top) != 0 {
            mask |= 1 << bit;
        }
    }
    (mask, was_set)
}

fn connect_hard_parent(child: &mut Task) {
    let bit = child.rparents;
    child.rparents += 1;
    child.nparents += 1;
    if bit < 32 {
        child.parent_types |= 1 << bit;
    }
}

/// Manual/structural removal of a hard-parent edge (`task_disconnect`, or a
/// temporary dependency edge dissolving after it fires).
fn disconnect_hard_parent(child: &mut Task) {
    let (mask, was_set) = remove_parent_bit(child.parent_types, child.rparents);
    child.parent_types = mask;
    child.rparents = child.rparents.saturating_sub(1);
    if was_set && child.nparents > 0 {
        child.nparents -= 1;
    }
}

/// A persistent hard-parent edge firing this cycle: clears one unsatisfied
/// bit without touching `rparents` (the edge still exists for next cycle).
fn satisfy_hard_parent(child: &mut Task) {
    if let Some(bit) = (0..child.rparents).find(|&b| child.parent_types & (1 << b) != 0) {
        child.parent_types &= !(1 << bit);
        if child.nparents > 0 {
            child.nparents -= 1;
        }
    }
}

struct TaskBoard {
    tasks: [Option<Task>; TASK_MAX],
    next_id: TaskId,
    /// Ready tasks, consumed only by the Dispatcher (spec.md §4.5 "Task
    /// board invariants").
    actives: VecDeque<TaskId>,
    waiting: VecDeque<TaskId>,
    periodic: PeriodicQueue,
    /// One queue per core, populated by `task_emit`/`drain_emissions`; grown
    /// to `cores_num` entries in `init`.
    emissions: Vec<VecDeque<TaskId>>,
    color: u32,
    shutdown: bool,
    current: Option<TaskId>,
    management: Management,
    pending_retval: i32,
    merge_fn: Option<MergeFn>,
    exit_args: [usize; TASK_ARGS_NUM],
    /// Set by `task_exit`; cleared before each dispatch. Distinguishes "the
    /// task called `task_exit`" from "the task returned plainly", since only
    /// the latter takes its retval from the raw function return.
    explicit_exit: bool,
}

static TASK_BOARD: Mutex<TaskBoard> = Mutex::new(TaskBoard {
    tasks: [const { None }; TASK_MAX],
    next_id: 0,
    actives: VecDeque::new(),
    waiting: VecDeque::new(),
    periodic: PeriodicQueue::new(),
    emissions: Vec::new(),
    // Starts at 1, never 0: fresh tasks default to `color: 0`, so an
    // initial board color of 0 would make the very first error
    // propagation's color-gate check true before it ever stamps anything.
    color: 1,
    shutdown: false,
    current: None,
    management: Management::Completed(Triggers::USER0),
    pending_retval: 0,
    merge_fn: None,
    exit_args: [0; TASK_ARGS_NUM],
    explicit_exit: false,
});

/// Counts READY tasks in `actives`; the Dispatcher's only suspension point
/// (spec.md §5 "Suspension points").
static DISPATCH_SEM: Semaphore = Semaphore::new(0);

impl TaskBoard {
    fn find_index(&self, id: TaskId) -> Option<usize> {
        self.tasks
            .iter()
            .position(|t| matches!(t, Some(task) if task.id == id))
    }

    fn alloc_slot(&mut self) -> Option<usize> {
        self.tasks.iter().position(Option::is_none)
    }

    fn task(&self, id: TaskId) -> &Task {
        let idx = self.find_index(id).expect("unknown task id");
        self.tasks[idx].as_ref().unwrap()
    }

    fn task_mut(&mut self, id: TaskId) -> &mut Task {
        let idx = self.find_index(id).expect("unknown task id");
        self.tasks[idx].as_mut().unwrap()
    }

    fn is_valid(&self, id: TaskId) -> bool {
        self.find_index(id).is_some()
    }
}

/// Initializes the per-core emission queues and the Dispatcher thread.
///
/// # Safety
/// Must be called exactly once, on the BSP, after `scheduler::init` has
/// reserved the Dispatcher's thread slot.
pub unsafe fn init(cores_num: usize) {
    let mut board = TASK_BOARD.lock();
    board.emissions = alloc::vec![VecDeque::new(); cores_num];
}

pub fn shutdown() {
    TASK_BOARD.lock().shutdown = true;
    DISPATCH_SEM.up();
}

fn is_shutdown() -> bool {
    TASK_BOARD.lock().shutdown
}

/// Enqueues `id` onto `actives` at head (HIGH) or tail (LOW priority),
/// marks it READY, and ups the dispatch semaphore (spec.md §4.5 "Dispatcher
/// loop" priority rule).
fn schedule(board: &mut TaskBoard, id: TaskId) {
    let task = board.task_mut(id);
    task.state = TaskState::Ready;
    match task.priority {
        TaskPriority::High => board.actives.push_front(id),
        TaskPriority::Low => board.actives.push_back(id),
    }
    DISPATCH_SEM.up();
}

pub fn task_create(
    func: TaskFn,
    priority: TaskPriority,
    schedule_type: ScheduleType,
    period: u32,
    releases: Triggers,
) -> Result<TaskId, KernelError> {
    let mut board = TASK_BOARD.lock();
    let idx = board.alloc_slot().ok_or(KernelError::EAgain)?;
    let id = board.next_id;
    board.next_id += 1;
    board.tasks[idx] = Some(Task {
        id,
        state: TaskState::NotStarted,
        schedule_type,
        priority,
        period,
        delta_factor: period,
        nparents: 0,
        rparents: 0,
        parent_types: 0,
        nchildren: 0,
        children: [ChildEdge::INVALID; TASK_CHILDREN_MAX],
        func,
        args: [0; TASK_ARGS_NUM],
        retval: 0,
        releases,
        sem: Semaphore::new(0),
        color: 0,
    });
    Ok(id)
}

/// Removes a task record. Only legal when it has no parents and no
/// children and isn't currently executing (spec.md §4.5 "task_unlink").
/// Frees the slot back to `None`; unlike the table-indexed-forever C
/// original, capacity here is bounded by `TASK_MAX` and slots are reused
/// (see DESIGN.md).
pub fn task_unlink(id: TaskId) -> Result<(), KernelError> {
    let mut board = TASK_BOARD.lock();
    let idx = board.find_index(id).ok_or(KernelError::EBadF)?;
    if board.current == Some(id) {
        return Err(KernelError::EBusy);
    }
    let task = board.tasks[idx].as_ref().unwrap();
    if task.rparents != 0 || task.nchildren != 0 {
        return Err(KernelError::EBusy);
    }
    board.tasks[idx] = None;
    Ok(())
}

/// Adds an edge `parent -> child` (spec.md §4.5 "task_connect"). Fails if
/// either task is unknown, `triggers` is empty, or either side's capacity
/// (`TASK_CHILDREN_MAX` children, `TASK_PARENTS_MAX` hard parents) is
/// exceeded, without mutating any state in the failing cases.
pub fn task_connect(
    parent: TaskId,
    child: TaskId,
    is_dependency: bool,
    is_temporary: bool,
    triggers: Triggers,
) -> Result<(), KernelError> {
    if triggers.is_empty() {
        return Err(KernelError::EInval);
    }
    let mut board = TASK_BOARD.lock();
    if !board.is_valid(parent) || !board.is_valid(child) {
        return Err(KernelError::EBadF);
    }
    if board.task(parent).nchildren >= TASK_CHILDREN_MAX {
        return Err(KernelError::EAgain);
    }
    if is_dependency && board.task(child).rparents as usize >= TASK_PARENTS_MAX {
        return Err(KernelError::EAgain);
    }

    let idx = board.task(parent).nchildren;
    board.task_mut(parent).children[idx] = ChildEdge {
        child,
        triggers,
        is_dependency,
        is_temporary,
        valid: true,
    };
    board.task_mut(parent).nchildren += 1;
    if is_dependency {
        connect_hard_parent(board.task_mut(child));
    }
    Ok(())
}

/// Removes the edge `parent -> child`, compacting `parent`'s children array
/// and `child`'s hard-parent bookkeeping so both restore to their
/// pre-connect values (spec.md §8 round-trip property).
pub fn task_disconnect(parent: TaskId, child: TaskId) -> Result<(), KernelError> {
    let mut board = TASK_BOARD.lock();
    if !board.is_valid(parent) || !board.is_valid(child) {
        return Err(KernelError::EBadF);
    }
    let nchildren = board.task(parent).nchildren;
    let pos = (0..nchildren)
        .find(|&i| {
            let edge = board.task(parent).children[i];
            edge.valid && edge.child == child
        })
        .ok_or(KernelError::EInval)?;
    remove_child_edge(&mut board, parent, pos);
    Ok(())
}

/// Compacts `parent`'s children array by swapping the last valid slot into
/// `idx` (spec.md §3 "children slots [0..nchildren) are valid and
/// compact"), and — if the removed edge was a hard dependency — undoes its
/// parent-side bookkeeping on the child.
fn remove_child_edge(board: &mut TaskBoard, parent: TaskId, idx: usize) {
    let edge = board.task(parent).children[idx];
    if edge.is_dependency {
        disconnect_hard_parent(board.task_mut(edge.child));
    }
    let parent_task = board.task_mut(parent);
    let last = parent_task.nchildren - 1;
    parent_task.children[idx] = parent_task.children[last];
    parent_task.children[last] = ChildEdge::INVALID;
    parent_task.nchildren -= 1;
}

/// Sets `t`'s arguments and moves it to READY (spec.md §4.5
/// "task_dispatch").
pub fn task_dispatch(id: TaskId, args: [usize; TASK_ARGS_NUM]) -> Result<(), KernelError> {
    let mut board = TASK_BOARD.lock();
    if !board.is_valid(id) {
        return Err(KernelError::EBadF);
    }
    board.task_mut(id).args = args;
    schedule(&mut board, id);
    Ok(())
}

pub fn task_stop(id: TaskId) -> Result<(), KernelError> {
    let mut board = TASK_BOARD.lock();
    if !board.is_valid(id) {
        return Err(KernelError::EBadF);
    }
    let task = board.task_mut(id);
    if !matches!(task.state, TaskState::Ready | TaskState::Running) {
        return Err(KernelError::EBadF);
    }
    task.state = TaskState::Stopped;
    board.waiting.push_back(id);
    Ok(())
}

pub fn task_continue(id: TaskId) -> Result<(), KernelError> {
    let mut board = TASK_BOARD.lock();
    if !board.is_valid(id) {
        return Err(KernelError::EBadF);
    }
    if board.task(id).state != TaskState::Stopped {
        return Err(KernelError::EBadF);
    }
    if let Some(pos) = board.waiting.iter().position(|&t| t == id) {
        board.waiting.remove(pos);
    }
    schedule(&mut board, id);
    Ok(())
}

/// Out-of-band completion, bypassing a dispatch (spec.md §4.5
/// "task_complete"): applies `management` directly as if the Dispatcher had
/// just run this task and reached step 4.
pub fn task_complete(id: TaskId, management: Management) -> Result<(), KernelError> {
    let mut board = TASK_BOARD.lock();
    if !board.is_valid(id) {
        return Err(KernelError::EBadF);
    }
    board.management = management;
    board.pending_retval = board.task(id).retval;
    board.merge_fn = None;
    board.exit_args = [0; TASK_ARGS_NUM];
    apply_management(&mut board, id);
    Ok(())
}

/// Records the exit decision for the task the Dispatcher is currently
/// running (spec.md §4.5 "task_exit"). Only legal from the Dispatcher
/// thread during `dispatch_loop`'s call into `task.fn`.
///
/// # Panics
/// If called from any thread other than the Dispatcher.
pub fn task_exit(
    retval: i32,
    management: Management,
    merge_fn: Option<MergeFn>,
    args: [usize; TASK_ARGS_NUM],
) {
    assert_eq!(
        scheduler::current_tid(),
        scheduler::DISPATCHER_TID,
        "task_exit called outside the Dispatcher"
    );
    let mut board = TASK_BOARD.lock();
    board.management = management;
    board.pending_retval = retval;
    board.merge_fn = merge_fn;
    board.exit_args = args;
    board.explicit_exit = true;
}

/// Blocks on `t`'s release semaphore, returning its `retval` once released
/// (spec.md §4.5 "task_wait").
pub fn task_wait(id: TaskId) -> Result<i32, KernelError> {
    if !TASK_BOARD.lock().is_valid(id) {
        return Err(KernelError::EBadF);
    }
    // Safety: the semaphore lives inside the board's fixed task table for
    // the task's whole life; `down` only touches the semaphore's own lock,
    // never the board lock, so this is safe to call unlocked (mirrors
    // `task::thread::Thread`'s `unsafe impl Send` rationale: the pointer is
    // only ever used while the referent is known live).
    let sem: *const Semaphore = &TASK_BOARD.lock().task(id).sem;
    unsafe { (*sem).down() };
    Ok(TASK_BOARD.lock().task(id).retval)
}

pub fn task_trywait(id: TaskId) -> Result<i32, KernelError> {
    if !TASK_BOARD.lock().is_valid(id) {
        return Err(KernelError::EBadF);
    }
    let sem: *const Semaphore = &TASK_BOARD.lock().task(id).sem;
    unsafe { (*sem).trydown() }?;
    Ok(TASK_BOARD.lock().task(id).retval)
}

/// Applies the recorded management outcome for `id` (spec.md §4.5
/// "Management outcomes"): transitions state, notifies matching children,
/// and re-enqueues/releases as the outcome dictates.
fn apply_management(board: &mut TaskBoard, id: TaskId) {
    let retval = board.pending_retval;
    let merge_fn = board.merge_fn;
    let exit_args = board.exit_args;
    let management = board.management;

    match management {
        Management::Again => {
            board.task_mut(id).retval = retval;
            notify_children(board, id, Triggers::AGAIN, retval, merge_fn, exit_args);
            schedule(board, id);
        }
        Management::Stop => {
            board.task_mut(id).state = TaskState::Stopped;
            board.task_mut(id).retval = retval;
            notify_children(board, id, Triggers::STOP, retval, merge_fn, exit_args);
            board.waiting.push_back(id);
        }
        Management::Periodic(period) => {
            let task = board.task_mut(id);
            task.state = TaskState::Periodic;
            task.period = period;
            task.delta_factor = period;
            task.retval = retval;
            notify_children(board, id, Triggers::PERIODIC, retval, merge_fn, exit_args);
            board.periodic.insert(id, period);
        }
        Management::Completed(bits) => {
            board.task_mut(id).state = TaskState::Completed;
            board.task_mut(id).retval = retval;
            notify_children(board, id, bits, retval, merge_fn, exit_args);
            let task = board.task_mut(id);
            if task.releases.intersects(bits) {
                task.sem.up();
            }
        }
        Management::Error => {
            board.task_mut(id).state = TaskState::Error;
            board.task_mut(id).retval = retval;
            propagate_error(board, id, retval);
            board.color = match board.color.wrapping_add(1) {
                0 => 1,
                next => next,
            };
            let task = board.task_mut(id);
            if task.releases.intersects(Triggers::ERROR) {
                task.sem.up();
            }
        }
    }
}

/// Notifies every child edge of `parent` whose `triggers` intersects
/// `fired` (spec.md §4.5 "For each notified child").
fn notify_children(
    board: &mut TaskBoard,
    parent: TaskId,
    fired: Triggers,
    retval: i32,
    merge_fn: Option<MergeFn>,
    exit_args: [usize; TASK_ARGS_NUM],
) {
    let mut i = 0;
    while i < board.task(parent).nchildren {
        let edge = board.task(parent).children[i];
        if !edge.valid || !edge.triggers.intersects(fired) {
            i += 1;
            continue;
        }
        let was_temporary = edge.is_temporary;
        notify_one(board, parent, i, edge, retval, merge_fn, exit_args);
        // A temporary edge dissolves: `remove_child_edge` swaps the last
        // valid slot into `i`, so re-examine `i` instead of advancing past
        // the edge that was just moved there.
        if !was_temporary {
            i += 1;
        }
    }
}

fn notify_one(
    board: &mut TaskBoard,
    parent: TaskId,
    idx: usize,
    edge: ChildEdge,
    retval: i32,
    merge_fn: Option<MergeFn>,
    exit_args: [usize; TASK_ARGS_NUM],
) {
    let child_id = edge.child;
    {
        let child = board.task_mut(child_id);
        child.retval = retval;
        if let Some(merge) = merge_fn {
            merge(&exit_args, &mut child.args);
        }
    }

    let mut should_reschedule = !edge.is_dependency;
    if edge.is_dependency {
        if edge.is_temporary {
            disconnect_hard_parent(board.task_mut(child_id));
        } else {
            satisfy_hard_parent(board.task_mut(child_id));
        }
        should_reschedule = board.task(child_id).nparents == 0;
    }
    if edge.is_temporary {
        remove_child_edge(board, parent, idx);
    }
    if should_reschedule {
        reschedule_for(board, child_id);
    }
}

/// Re-admits `id` per its `schedule_type` after a parent notification
/// satisfied it (spec.md §4.5 "reschedule the child according to its
/// schedule_type").
fn reschedule_for(board: &mut TaskBoard, id: TaskId) {
    match board.task(id).schedule_type {
        ScheduleType::Ready => schedule(board, id),
        ScheduleType::Stopped => {
            board.task_mut(id).state = TaskState::Stopped;
            board.waiting.push_back(id);
        }
        ScheduleType::Periodic => {
            let period = board.task(id).period;
            board.task_mut(id).state = TaskState::Periodic;
            board.periodic.insert(id, period);
        }
    }
}

/// Depth-first error propagation with a color gate to break cycles/diamonds
/// (spec.md §4.5 "Error propagation", §9 "Cyclic graphs"): a task already
/// stamped with the board's current color is skipped, so a diamond target
/// reachable via two paths is notified at most once per color epoch.
fn propagate_error(board: &mut TaskBoard, id: TaskId, retval: i32) {
    let color = board.color;
    propagate_error_inner(board, id, retval, color);
}

fn propagate_error_inner(board: &mut TaskBoard, parent: TaskId, retval: i32, color: u32) {
    if board.task(parent).color == color {
        return;
    }
    board.task_mut(parent).color = color;

    let nchildren = board.task(parent).nchildren;
    for i in 0..nchildren {
        if i >= board.task(parent).nchildren {
            break;
        }
        let edge = board.task(parent).children[i];
        if !edge.valid || !edge.triggers.intersects(Triggers::ERROR) {
            continue;
        }
        let child_id = edge.child;
        if board.task(child_id).color == color {
            continue;
        }
        {
            let child = board.task_mut(child_id);
            child.retval = retval;
        }
        if edge.triggers.contains(Triggers::ERROR_THROW) {
            propagate_error_inner(board, child_id, retval, color);
        } else {
            board.task_mut(child_id).color = color;
        }
        board.task_mut(child_id).state = TaskState::Error;
        let child = board.task(child_id);
        if child.releases.intersects(Triggers::ERROR) {
            board.task(child_id).sem.up();
        }
    }
}

/// Bypasses the Dispatcher entirely (spec.md §4.5 "Cross-core emit"): only
/// legal for tasks free of parents/children and not periodic. Runs inline
/// if already on `core`, otherwise queues it there and raises a `Task` IPI.
pub fn task_emit(
    id: TaskId,
    core: u32,
    args: [usize; TASK_ARGS_NUM],
) -> Result<(), KernelError> {
    {
        let mut board = TASK_BOARD.lock();
        let task = board
            .tasks
            .iter_mut()
            .flatten()
            .find(|t| t.id == id)
            .ok_or(KernelError::EBadF)?;
        if task.rparents != 0 || task.nchildren != 0 || task.schedule_type == ScheduleType::Periodic
        {
            return Err(KernelError::EBusy);
        }
        task.args = args;
        let core_idx = core as usize;
        board
            .emissions
            .get_mut(core_idx)
            .ok_or(KernelError::EInval)?
            .push_back(id);
    }

    if hooks::core_get_id() == core {
        drain_emissions();
    } else {
        hooks::kevent_notify(core, InterruptVector::Task);
    }
    Ok(())
}

/// Drains this core's emission queue, running each task inline under the
/// board lock released around the call (spec.md §4.5 "The IPI handler
/// drains the per-core queue"). Emitted tasks only release their own
/// semaphore; they never traverse the graph.
pub fn drain_emissions() {
    let core = hooks::core_get_id() as usize;
    loop {
        let next = {
            let mut board = TASK_BOARD.lock();
            board.emissions.get_mut(core).and_then(|q| q.pop_front())
        };
        let Some(id) = next else { break };

        let (func, args) = {
            let board = TASK_BOARD.lock();
            let task = board.task(id);
            (task.func, task.args)
        };
        let retval = func(&args);
        let mut board = TASK_BOARD.lock();
        let task = board.task_mut(id);
        task.retval = retval;
        task.sem.up();
    }
}

/// Periodic delta-queue tick (spec.md §4.5 "Periodic tick"), called from
/// the timer ISR on every core. Tries the board lock without blocking,
/// returning immediately if it's held (e.g. by the Dispatcher or another
/// core's tick) to avoid reentering the board from interrupt context.
pub fn on_tick() {
    let Some(mut board) = TASK_BOARD.try_lock() else {
        return;
    };
    board.periodic.advance();
    while let Some(id) = board.periodic.pop_due() {
        schedule(&mut board, id);
    }
}

/// The Dispatcher system thread's body (spec.md §4.5 "Dispatcher loop"),
/// wired as the entry point `scheduler::init` builds a context for.
pub extern "C" fn dispatch_loop(_tid_as_usize: usize) -> ! {
    scheduler::thread_prolog();
    loop {
        DISPATCH_SEM.down();
        if is_shutdown() {
            hooks::core_release();
        }

        let id = {
            let mut board = TASK_BOARD.lock();
            let Some(id) = board.actives.pop_front() else {
                continue;
            };
            let task = board.task_mut(id);
            task.state = TaskState::Running;
            task.nparents = task.rparents;
            task.parent_types = full_mask(task.rparents);
            board.current = Some(id);
            board.management = Management::Completed(Triggers::USER0);
            board.pending_retval = 0;
            board.merge_fn = None;
            board.exit_args = [0; TASK_ARGS_NUM];
            board.explicit_exit = false;
            id
        };

        let (func, args) = {
            let board = TASK_BOARD.lock();
            let task = board.task(id);
            (task.func, task.args)
        };
        let retval = func(&args);

        let mut board = TASK_BOARD.lock();
        if !board.explicit_exit {
            board.pending_retval = retval;
        }
        apply_management(&mut board, id);
        board.current = None;
    }
}
