//! Public fallible-API error type (spec.md §7.1 "user-visible recoverable
//! errors"). Everything else — task-graph errors and kernel-invariant
//! violations — is handled in-band (§7.2) or by `panic!` (§7.3); this enum
//! only covers misuse a caller can recover from.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Bad argument (unknown tid/task id, empty trigger set, ...).
    EInval,
    /// No free slot, or a page allocation failed.
    EAgain,
    /// Target in use or locked (e.g. a task still executing).
    EBusy,
    /// Invalid handle, or resource in the wrong state for the operation.
    EBadF,
    /// `trywait`/`trydown` would have blocked.
    EProto,
}
