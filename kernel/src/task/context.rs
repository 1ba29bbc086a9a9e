//! Context & Stack Plumbing.
//!
//! A `Context` is the saved machine state of a suspended thread: it lives at
//! the top of that thread's own kernel stack, not in a separate struct on the
//! heap. `switch` swaps between two such stacks; `create` lays a fresh one out
//! so that the first `switch` into it lands on the thread's entry point.

/// Saved state of a suspended thread, as it sits on top of its kernel stack.
/// Field order is the push order `switch` uses, low address (top of stack,
/// first popped) to high address (bottom of this frame, popped last).
#[repr(C, packed)]
pub struct Context {
    rflags: usize,
    r15: usize,
    r14: usize,
    r13: usize,
    r12: usize,
    rbp: usize,
    /// For a never-run thread, the real entry point; `rip` always lands on
    /// [`thread_bootstrap`] instead, which moves this into `rax` and `r15`
    /// into `rdi` before jumping here. A bare `ret`-based resume restores
    /// registers, not calling-convention arguments — an `extern "C"
    /// fn(usize)` entry point needs its argument in `rdi`, not whatever
    /// callee-saved register a one-shot context happened to stash it in.
    rbx: usize,
    /// Skipped by `switch`'s restore path; kept only so the frame size
    /// matches a stack that has actually been saved by `switch` once.
    _skip: usize,
    rip: usize,
}

impl Context {
    fn new(entry: usize, first_arg: usize) -> Context {
        Context {
            rflags: 1 << 9, // interrupts enabled
            r15: first_arg,
            r14: 0,
            r13: 0,
            r12: 0,
            rbp: 0,
            rbx: entry,
            _skip: 0,
            rip: thread_bootstrap as usize,
        }
    }
}

/// Builds a fresh kernel stack for a thread that has never run, so that the
/// first `switch` into it resumes at `entry` with `arg` as its first
/// `extern "C"` argument. Returns the stack pointer to hand to `switch`.
///
/// # Safety
/// `stack_top` must be the top (highest address, 16-byte aligned) of a live,
/// writable stack at least `size_of::<Context>()` bytes long that nothing
/// else is using.
pub unsafe fn context_create(stack_top: *mut u8, entry: usize, arg: usize) -> *mut usize {
    unsafe {
        let sp = (stack_top as *mut Context).sub(1);
        sp.write(Context::new(entry, arg));
        sp as *mut usize
    }
}

/// Lands here, never by `call`, the first time a freshly created context
/// resumes. `rbx` holds the real entry point and `r15` its argument (see
/// [`Context::new`]); this shuffles them into the `sysv64` argument
/// register and tail-jumps, so the entry point can be an ordinary
/// `extern "C" fn(usize) -> !` that never needs to know its first run was
/// a bare register restore rather than a call.
#[unsafe(naked)]
unsafe extern "C" fn thread_bootstrap() -> ! {
    core::arch::naked_asm!("mov rdi, r15", "jmp rbx")
}

/// Assembly
/// Save context registers by pushing them on the stack
#[macro_export]
macro_rules! save_context {
    () => (
        r#"
            push rbx
            push rbp
            push r12
            push r13
            push r14
            push r15
            pushfq
        "#
    )
}

/// Assembly
/// Switch stacks
/// * The 'rdi' register must contain the previous process stack pointer
/// * The 'rsi' register must contain the next process stack pointer
#[macro_export]
macro_rules! switch_stacks {
    () => (
        // switch the stack pointers
        r#"
            mov [rdi], rsp
            mov rsp, rsi
        "#
    );
}

/// Assembly
/// Restore context by popping them of the stack
#[macro_export]
macro_rules! restore_context {
    () => (
        r#"
            popfq
            pop r15
            pop r14
            pop r13
            pop r12
            pop rbp
            pop rbx
        "#
    );
}

/// Saves the caller's machine state at `*prev_stack_pointer` and resumes
/// execution at `next_stack_pointer_value`. This is `context_switch_to`
/// from the outside world's point of view: it returns only once something
/// else switches back into the stack captured at `prev_stack_pointer`.
///
/// # Safety
/// `prev_stack_pointer` must point to a valid, currently-unused `usize` slot.
/// `next_stack_pointer_value` must be a stack pointer previously produced by
/// `context_create` or previously saved here by this same function.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(prev_stack_pointer: *mut usize, next_stack_pointer_value: usize) {
    // Logs are not allowed here
    core::arch::naked_asm!(
        "push [rsp]", // duplicate rip so the saved frame matches Context's shape
        save_context!(),
        switch_stacks!(),
        restore_context!(),
        "add rsp, 8", // skip the duplicated/placeholder rip
        "ret",
    );
}
