//! Allocator instrumentation
//!
//! The host runtime routes its heap traffic through an [`AllocatorSlot`].
//! While a trace with `MEMORY_ALLOC` is active, the slot holds a
//! [`CountingAllocator`] wrapped around whatever allocator was configured
//! before; ending the trace puts the saved allocator back.
//!
//! Known imprecision: the slot is process-wide. Every allocation made
//! through it while the hook is installed is counted, including those from
//! threads and code paths outside the traced call tree.

use crate::error::{Result, TraceError};
use crate::flags::TraceFlags;
use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// An allocator the host can plug into the slot
pub type SharedAllocator = Arc<dyn GlobalAlloc + Send + Sync>;

/// Snapshot of allocation counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct AllocStats {
    pub num_alloc: u64,
    pub num_free: u64,
    pub amount_alloc: u64,
}

impl AllocStats {
    /// Counter growth since `earlier`
    pub fn since(&self, earlier: &AllocStats) -> AllocStats {
        AllocStats {
            num_alloc: self.num_alloc.saturating_sub(earlier.num_alloc),
            num_free: self.num_free.saturating_sub(earlier.num_free),
            amount_alloc: self.amount_alloc.saturating_sub(earlier.amount_alloc),
        }
    }
}

/// Live allocation counters shared between a trace and its decorator
#[derive(Debug, Default)]
pub struct AllocCounters {
    num_alloc: AtomicU64,
    num_free: AtomicU64,
    amount_alloc: AtomicU64,
}

impl AllocCounters {
    pub fn snapshot(&self) -> AllocStats {
        AllocStats {
            num_alloc: self.num_alloc.load(Ordering::Relaxed),
            num_free: self.num_free.load(Ordering::Relaxed),
            amount_alloc: self.amount_alloc.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.num_alloc.store(0, Ordering::Relaxed);
        self.num_free.store(0, Ordering::Relaxed);
        self.amount_alloc.store(0, Ordering::Relaxed);
    }

    fn on_alloc(&self, size: usize) {
        self.num_alloc.fetch_add(1, Ordering::Relaxed);
        self.amount_alloc.fetch_add(size as u64, Ordering::Relaxed);
    }

    fn on_free(&self) {
        self.num_free.fetch_add(1, Ordering::Relaxed);
    }
}

/// Decorator that counts traffic and forwards to the wrapped allocator
pub struct CountingAllocator {
    inner: SharedAllocator,
    counters: Arc<AllocCounters>,
}

impl CountingAllocator {
    pub fn new(inner: SharedAllocator, counters: Arc<AllocCounters>) -> Self {
        Self { inner, counters }
    }
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.counters.on_alloc(layout.size());
        unsafe { self.inner.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.counters.on_free();
        unsafe { self.inner.dealloc(ptr, layout) }
    }

    // Counted as one allocation plus one free of the old block.
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        self.counters.on_alloc(new_size);
        self.counters.on_free();
        unsafe { self.inner.realloc(ptr, layout, new_size) }
    }
}

/// Process-wide allocator entry point
///
/// Holds the host's custom allocator, or nothing when the default
/// [`System`] allocator is in use. Only one trace at a time may own the
/// slot for instrumentation.
pub struct AllocatorSlot {
    current: RwLock<Option<SharedAllocator>>,
    instrumented: AtomicBool,
}

static HOST_ALLOCATOR: AllocatorSlot = AllocatorSlot::new();

/// The slot the host runtime allocates through
pub fn host_allocator() -> &'static AllocatorSlot {
    &HOST_ALLOCATOR
}

impl AllocatorSlot {
    pub const fn new() -> Self {
        AllocatorSlot {
            current: RwLock::new(None),
            instrumented: AtomicBool::new(false),
        }
    }

    /// Configure a custom allocator, returning the previous one
    pub fn install(&self, allocator: SharedAllocator) -> Option<SharedAllocator> {
        self.write().replace(allocator)
    }

    /// Return to the default allocator, returning the previous one
    pub fn clear(&self) -> Option<SharedAllocator> {
        self.write().take()
    }

    pub fn is_customized(&self) -> bool {
        self.read().is_some()
    }

    /// Whether a trace currently owns the slot
    pub fn is_instrumented(&self) -> bool {
        self.instrumented.load(Ordering::Acquire)
    }

    /// # Safety
    /// Same contract as [`GlobalAlloc::alloc`].
    pub unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        match &*self.read() {
            Some(allocator) => unsafe { allocator.alloc(layout) },
            None => unsafe { System.alloc(layout) },
        }
    }

    /// # Safety
    /// Same contract as [`GlobalAlloc::dealloc`]; `ptr` must come from this slot.
    pub unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        match &*self.read() {
            Some(allocator) => unsafe { allocator.dealloc(ptr, layout) },
            None => unsafe { System.dealloc(ptr, layout) },
        }
    }

    /// # Safety
    /// Same contract as [`GlobalAlloc::realloc`]; `ptr` must come from this slot.
    pub unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        match &*self.read() {
            Some(allocator) => unsafe { allocator.realloc(ptr, layout, new_size) },
            None => unsafe { System.realloc(ptr, layout, new_size) },
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<SharedAllocator>> {
        self.current.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<SharedAllocator>> {
        self.current.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for AllocatorSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-trace handle that installs and removes the counting decorator
pub struct AllocHook {
    slot: &'static AllocatorSlot,
    counters: Arc<AllocCounters>,
    /// What the slot held before `enable`; `Some` exactly while installed
    saved: Option<Option<SharedAllocator>>,
}

impl AllocHook {
    pub fn new() -> Self {
        Self::with_slot(host_allocator())
    }

    pub fn with_slot(slot: &'static AllocatorSlot) -> Self {
        AllocHook {
            slot,
            counters: Arc::new(AllocCounters::default()),
            saved: None,
        }
    }

    /// Install the decorator if `flags` request allocation tracking
    ///
    /// Returns whether the hook is installed afterwards. Fails with
    /// [`TraceError::AllocatorBusy`] if another trace owns the slot.
    pub fn enable(&mut self, flags: TraceFlags) -> Result<bool> {
        if !flags.tracks_allocations() {
            return Ok(false);
        }
        if self.saved.is_some() {
            return Ok(true);
        }
        if self
            .slot
            .instrumented
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TraceError::AllocatorBusy);
        }

        self.counters.reset();
        // The slot may back the process allocator, so nothing is allocated
        // or freed while its write lock is held.
        let current = self.slot.read().clone();
        let inner: SharedAllocator = match &current {
            Some(allocator) => Arc::clone(allocator),
            None => Arc::new(System),
        };
        let decorator: SharedAllocator = Arc::new(CountingAllocator::new(
            inner,
            Arc::clone(&self.counters),
        ));
        let saved = std::mem::replace(&mut *self.slot.write(), Some(decorator));
        drop(current);

        tracing::debug!(customized = saved.is_some(), "allocator hook installed");
        self.saved = Some(saved);
        Ok(true)
    }

    /// Restore the saved allocator. No-op when nothing is installed.
    pub fn disable(&mut self) {
        if let Some(saved) = self.saved.take() {
            let decorator = std::mem::replace(&mut *self.slot.write(), saved);
            self.slot.instrumented.store(false, Ordering::Release);
            drop(decorator);
            tracing::debug!("allocator hook removed");
        }
    }

    pub fn is_active(&self) -> bool {
        self.saved.is_some()
    }

    pub fn stats(&self) -> AllocStats {
        self.counters.snapshot()
    }
}

impl Default for AllocHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AllocHook {
    fn drop(&mut self) {
        self.disable();
    }
}
