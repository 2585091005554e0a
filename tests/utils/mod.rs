//! Shared helpers for integration tests

use calltrace::alloc_hook::host_allocator;
use std::alloc::{GlobalAlloc, Layout};

/// Process allocator that routes every request through the host slot
///
/// Test binaries declare it as their `#[global_allocator]` so that the
/// engine's own frames and symbols are seen by `MEMORY_ALLOC` tracing.
pub struct SlotAllocator;

unsafe impl GlobalAlloc for SlotAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        unsafe { host_allocator().alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { host_allocator().dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        unsafe { host_allocator().realloc(ptr, layout, new_size) }
    }
}
