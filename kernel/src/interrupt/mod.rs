use num_enum::IntoPrimitive;

pub mod idt;
pub mod nmi_handler_state;
pub mod section_guard;
mod handlers;

#[derive(Debug, IntoPrimitive)]
#[repr(u8)]
pub enum InterruptVector {
    LocalApicSpurious = 0x20,
    LocalApicTimer,
    LocalApicError,
    /// IPI kicking the target core into `task::scheduler::yield_now`, raised
    /// when its running thread exceeds `THREAD_QUANTUM` and a same-affinity
    /// ready thread is waiting (spec.md §4.3).
    Sched,
    /// IPI telling the target core to drain its task-engine emission queue
    /// (spec.md §5.5 cross-core inline dispatch).
    Task,
}