//! Collaborator hooks (spec.md §1/§6): the small set of free functions the
//! concurrency core consumes from the subsystems deliberately kept out of
//! scope (page/frame allocation, NoC IPC, device drivers, early boot). This
//! is thin glue over what the boot/APIC/allocator code already does, not a
//! reimplementation of those subsystems.

use crate::interrupt::InterruptVector;
use crate::memory::cpu_local_data::{cpus_count, get_local, local_apic_id_of};
use alloc::alloc::{alloc, dealloc};
use core::alloc::Layout;
use core::ptr::NonNull;

pub const KPAGE_SIZE: usize = 4096;

/// Allocates one zeroed, page-aligned kernel page. Backed by the global
/// allocator (`kernel::memory::global_allocator`) rather than a frame
/// allocator + page tables, since paging policy is out of scope here.
pub fn kpage_get() -> Option<NonNull<u8>> {
    let layout = Layout::from_size_align(KPAGE_SIZE, KPAGE_SIZE).unwrap();
    // Safety: layout is non-zero sized.
    let ptr = unsafe { alloc(layout) };
    NonNull::new(ptr)
}

/// Releases a page previously returned by `kpage_get`.
///
/// # Safety
/// `ptr` must have been returned by `kpage_get` and not already freed.
pub unsafe fn kpage_put(ptr: NonNull<u8>) {
    let layout = Layout::from_size_align(KPAGE_SIZE, KPAGE_SIZE).unwrap();
    unsafe { dealloc(ptr.as_ptr(), layout) };
}

/// The identity of the core executing this call.
pub fn core_get_id() -> u32 {
    get_local().kernel_id
}

pub fn cores_num() -> usize {
    cpus_count()
}

/// Sends an inter-processor event to `core_id`'s local APIC, vectored so the
/// target's `kevent_set_handler` callback runs there.
pub fn kevent_notify(core_id: u32, vector: InterruptVector) {
    let local = get_local();
    let local_apic = unsafe { &mut *local.local_apic.get().unwrap().get() };
    unsafe {
        local_apic.send_ipi(
            u8::from(vector),
            local_apic_id_of(core_id),
        )
    };
}

/// Blocks the calling core until an inter-processor event wakes it, by
/// halting with interrupts enabled (the one instant a pending interrupt is
/// guaranteed to be taken before the core re-halts).
pub fn kevent_wait() {
    x86_64::instructions::interrupts::enable_and_hlt();
}

/// Parks this core for good once the scheduler has shut down (spec.md §4.3
/// "Shutdown"): no further thread will ever run here.
pub fn core_release() -> ! {
    x86_64::instructions::interrupts::disable();
    crate::hlt_loop();
}
