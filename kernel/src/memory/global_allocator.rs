use talc::{ErrOnOom, Span, Talc, Talck};

/// Static backing for the kernel heap. Page/frame management is out of
/// scope for this core; rather than reaching into the bootloader's memory
/// map, the heap is carved out of `.bss` once at boot.
pub const GLOBAL_ALLOCATOR_SIZE: usize = 4 * 0x100000; // 4 MiB

#[repr(align(4096))]
struct HeapArena([u8; GLOBAL_ALLOCATOR_SIZE]);

static mut HEAP: HeapArena = HeapArena([0; GLOBAL_ALLOCATOR_SIZE]);

#[global_allocator]
pub static GLOBAL_ALLOCATOR: Talck<spin::Mutex<()>, ErrOnOom> = Talck::new({
    // Initially, there is no memory backing `Talc`. We will add memory at run time
    Talc::new(ErrOnOom)
});

/// Claims the static heap arena for the global allocator.
///
/// # Safety
/// Must be called exactly once, before any allocation.
pub unsafe fn init() {
    let span = unsafe { Span::from_array(&raw mut HEAP.0) };
    let mut talc = GLOBAL_ALLOCATOR.lock();
    unsafe { talc.claim(span) }.unwrap();
}
