pub const PIT_FREQ: u32 = 1_193_182;
pub const PIT_CH0: u16 = 0x40;
pub const PIT_CMD: u16 = 0x43;

/// x2APIC MSR indices (`0x800 + xapic_mmio_offset / 0x10`), used directly
/// through `x86_64::registers::model_specific::Msr` rather than pulling in a
/// second low-level `x86` crate alongside `x86_64`.
pub const IA32_X2APIC_LVT_TIMER: u32 = 0x832;
pub const IA32_X2APIC_INIT_COUNT: u32 = 0x838;
pub const IA32_X2APIC_CUR_COUNT: u32 = 0x839;
pub const IA32_X2APIC_DIV_CONF: u32 = 0x83E;

/// Upper bound on cores this kernel will track per-core state for. The
/// actual core count is discovered at boot from the Limine MP response
/// and must not exceed this.
pub const MAX_CORES: usize = 64;

/// Fixed-size thread table slots: MASTER (0), DISPATCHER (1), one IDLE per
/// core, then user threads.
pub const THREAD_MAX: usize = 256;

/// Ticks a thread may hold a core before a SCHED IPI is raised against it.
pub const THREAD_QUANTUM: u64 = 128;

/// Fixed-size task table, sized the same way `THREAD_MAX` is: a task graph
/// large enough for a real workload without per-node heap allocation. Not
/// named by spec.md directly (only the per-task/per-board limits are); added
/// as the ambient capacity bound the task board needs to exist as a fixed
/// array rather than a growable collection.
pub const TASK_MAX: usize = 256;

pub const TASK_CHILDREN_MAX: usize = 10;
pub const TASK_PARENTS_MAX: usize = 32;
pub const TASK_ARGS_NUM: usize = 5;
pub const EXIT_RING_SIZE: usize = 32;
