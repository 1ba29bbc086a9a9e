//! Memory is deliberately thin here: frame/page allocation and paging policy
//! are out of scope for the concurrency core (spec.md §1), which consumes
//! only a flat kernel heap (`kpage_get`/`kpage_put`, via `global_allocator`)
//! and per-core identity (`cpu_local_data`). Page-table, physical-memory and
//! virtual-memory-allocator machinery is dropped rather than carried along
//! unused.

pub mod cpu_local_data;
pub mod global_allocator;
pub mod guarded_stack;

/// Claims the static kernel heap. Must run once, on the BSP, before any
/// allocation (including the first `Box`/`Arc`/`VecDeque` the scheduler or
/// task engine creates).
///
/// # Safety
/// Must be called exactly once.
pub unsafe fn init() {
    unsafe { global_allocator::init() };
}
