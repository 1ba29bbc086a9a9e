//! Per-thread stack allocation (spec.md §4.1 "Stack policy").
//!
//! Page/frame allocation and paging policy are out of scope for this core;
//! stacks are backed by pages pulled from `task::hooks::kpage_get` rather
//! than a dedicated frame allocator plus an unmapped guard-page mapping.

use crate::task::hooks::{KPAGE_SIZE, kpage_get, kpage_put};
use alloc::alloc::{alloc, dealloc};
use core::alloc::Layout;
use core::arch::naked_asm;
use core::ptr::NonNull;
use x86_64::VirtAddr;

/// One page each, matching spec.md §4.1: every user/dispatcher thread owns
/// exactly two page-sized stacks.
pub const NORMAL_STACK_SIZE: u64 = KPAGE_SIZE as u64;
pub const EXCEPTION_HANDLER_STACK_SIZE: u64 = 4 * KPAGE_SIZE as u64;

#[derive(Debug, Clone, Copy)]
pub enum StackType {
    Normal,
    ExceptionHandler,
}

#[derive(Debug, Clone, Copy)]
pub struct StackId {
    pub _type: StackType,
    pub cpu_id: u32,
}

/// A thread's kernel stack. Two of these back every non-service thread
/// (spec.md §4.1); master/idle/dispatcher stacks are allocated once and
/// never freed. Backed by one contiguous, page-aligned allocation rather
/// than an unmapped guard page, since MMU guard pages are a paging-policy
/// concern out of scope here.
pub struct GuardedStack {
    base: NonNull<u8>,
    size: usize,
    top: VirtAddr,
    #[allow(unused)]
    id: StackId,
}

// Safety: exclusively owned by this GuardedStack.
unsafe impl Send for GuardedStack {}

impl GuardedStack {
    /// Allocates a stack of `size` (rounded up to a whole number of pages).
    /// Single-page stacks go through `kpage_get`/`kpage_put`, the hook this
    /// core is meant to route page-grained allocation through; multi-page
    /// exception-handler stacks need a contiguous run `kpage_get` cannot
    /// promise, so those fall back to the allocator directly.
    pub fn new_kernel(size: u64, id: StackId) -> Self {
        let size = size.next_multiple_of(KPAGE_SIZE as u64) as usize;
        let base = if size == KPAGE_SIZE {
            kpage_get().expect("out of memory allocating kernel stack")
        } else {
            let layout = Layout::from_size_align(size, KPAGE_SIZE).unwrap();
            // Safety: layout is non-zero sized and page-aligned.
            NonNull::new(unsafe { alloc(layout) }).expect("out of memory allocating kernel stack")
        };
        let top = VirtAddr::from_ptr(base.as_ptr()) + size as u64;

        Self {
            base,
            size,
            top,
            id,
        }
    }

    pub fn top(&self) -> VirtAddr {
        self.top
    }

    /// Switches onto this stack and calls `f`, which must not return.
    pub fn switch(self, f: extern "sysv64" fn() -> !) -> ! {
        let new_rsp = self.top.as_u64();
        // Leak: this stack backs whatever runs forever from here on (the
        // boot path into master/idle init); it is never freed.
        core::mem::forget(self);
        unsafe { switch_to(new_rsp, f) }
    }
}

impl Drop for GuardedStack {
    fn drop(&mut self) {
        if self.size == KPAGE_SIZE {
            // Safety: base came from kpage_get in new_kernel for this size.
            unsafe { kpage_put(self.base) };
        } else {
            let layout = Layout::from_size_align(self.size, KPAGE_SIZE).unwrap();
            unsafe { dealloc(self.base.as_ptr(), layout) };
        }
    }
}

#[unsafe(naked)]
unsafe extern "sysv64" fn switch_to(new_rsp: u64, f: extern "sysv64" fn() -> !) -> ! {
    naked_asm!(
        "
        mov rsp, rdi
        call rsi
        "
    );
}
