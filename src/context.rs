//! Trace context: one independent profiler per execution context
//!
//! The host drives a [`TraceContext`] synchronously from its call/return
//! hooks: `enter_frame` on entry, `exit_frame` on return. Nothing here
//! blocks or fails. A context is not shared between threads; give each
//! thread (or fiber) its own. The only process-wide resource is the
//! allocator slot used by `MEMORY_ALLOC` tracing.
//!
//! Lifecycle: `begin` (enters the `main()` root frame) -> nested
//! enter/exit -> `end` (force-unwinds whatever is still open) -> `export`.

use crate::alloc_hook::{AllocHook, AllocStats};
use crate::call_stack::ShadowStack;
use crate::callgraph::{CallGraph, EdgeRecord};
use crate::clock::{ClockSource, MemoryProbe, MonotonicClock, ProcessMemory};
use crate::flags::TraceFlags;
use crate::frame::CallSite;
use crate::frame_pool::{FramePool, PoolStats};
use crate::recorder::{FrameRecord, FrameRecorder};
use crate::symbol::Symbol;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identity of the synthetic frame entered at trace start
pub const ROOT_SYMBOL: &str = "main()";

/// Size of the auxiliary per-function counter array used for recursion levels
pub const CALLGRAPH_COUNTER_SIZE: usize = 1024;

/// Lifecycle and counter summary of a trace
#[derive(Debug, Clone, Serialize)]
pub struct TraceSummary {
    pub enabled: bool,
    pub flags: u32,
    pub start_time: u64,
    pub start_timestamp: u64,
    pub recorded_frames: usize,
    pub dropped_frames: u64,
    pub edges: usize,
    pub active_frames: usize,
    pub pool: PoolStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alloc: Option<AllocStats>,
}

pub struct TraceContext<C: ClockSource = MonotonicClock> {
    enabled: bool,
    flags: TraceFlags,
    clock: C,
    memory: Box<dyn MemoryProbe>,
    stack: ShadowStack,
    pool: FramePool,
    callgraph: CallGraph,
    counters: Box<[u32]>,
    recorder: FrameRecorder,
    alloc: AllocHook,
    root: Option<Symbol>,
    start_time: u64,
    start_timestamp: u64,
}

impl TraceContext<MonotonicClock> {
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }
}

impl Default for TraceContext<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ClockSource> TraceContext<C> {
    pub fn with_clock(clock: C) -> Self {
        TraceContext {
            enabled: false,
            flags: TraceFlags::empty(),
            clock,
            memory: Box::new(ProcessMemory),
            stack: ShadowStack::new(),
            pool: FramePool::new(),
            callgraph: CallGraph::new(),
            counters: vec![0; CALLGRAPH_COUNTER_SIZE].into_boxed_slice(),
            recorder: FrameRecorder::new(),
            alloc: AllocHook::new(),
            root: None,
            start_time: 0,
            start_timestamp: 0,
        }
    }

    /// Replace the memory usage source for the MU/PMU modes
    pub fn with_memory_probe(mut self, probe: impl MemoryProbe + 'static) -> Self {
        self.memory = Box::new(probe);
        self
    }

    /// Replace the allocator hook (e.g. to instrument a private slot)
    pub fn with_alloc_hook(mut self, hook: AllocHook) -> Self {
        self.alloc = hook;
        self
    }

    /// Start a trace and enter the root frame
    ///
    /// A trace that is still running is ended first. Buffered frames,
    /// edges and recursion counters from the previous trace are discarded.
    pub fn begin(&mut self, flags: TraceFlags) {
        if self.enabled {
            self.end();
        }

        self.flags = flags;
        self.recorder.release_all(&mut self.pool);
        self.callgraph.clear();
        self.counters.fill(0);

        let root = Symbol::new(ROOT_SYMBOL);
        if let Err(e) = self.alloc.enable(flags) {
            tracing::warn!("allocation tracking disabled for this trace: {}", e);
            self.flags.remove(TraceFlags::MEMORY_ALLOC_AS_MU);
        }

        self.start_time = self.clock.now_ms();
        self.start_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.enabled = true;

        self.push_frame(root.clone(), None, true);
        self.root = Some(root);

        tracing::debug!(flags = self.flags.bits(), "trace started");
    }

    /// Push a frame for `call`, returning whether one was pushed
    ///
    /// Calls without a resolvable function name, and builtins while
    /// `NO_BUILTINS` is set, are not pushed; their time is attributed to
    /// the caller. The host must only call `exit_frame` for returns whose
    /// entry returned `true`.
    #[inline]
    pub fn enter_frame(&mut self, call: &CallSite) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(function) = &call.function else {
            return false;
        };
        if call.builtin && self.flags.excludes_builtins() {
            return false;
        }
        self.push_frame(function.clone(), call.class.clone(), false);
        true
    }

    fn push_frame(&mut self, function: Symbol, class: Option<Symbol>, is_root: bool) {
        let counter_slot = (function.hash_value() % CALLGRAPH_COUNTER_SIZE as u64) as usize;
        let recurse_level = if self.counters[counter_slot] > 0 {
            self.stack
                .find_active(&function, class.as_ref())
                .map_or(0, |f| f.recurse_level + 1)
        } else {
            0
        };
        self.counters[counter_slot] += 1;

        let now = self.clock.now_ms();
        let mut frame = self.pool.acquire();
        frame.function = Some(function);
        frame.class = class;
        frame.is_root = is_root;
        frame.recurse_level = recurse_level;
        frame.counter_slot = counter_slot;
        frame.wt_start = now;
        frame.wt_end = now;
        frame.duration = 0;
        frame.edge = None;
        if self.flags.tracks_cpu() {
            frame.cpu_start = self.clock.cpu_us();
        }
        if self.flags.contains(TraceFlags::MEMORY_MU) || self.flags.alloc_as_memory_usage() {
            frame.mu_start = self.memory_usage();
        }
        if self.flags.contains(TraceFlags::MEMORY_PMU) {
            frame.pmu_start = self.memory.peak_bytes();
        }
        if self.alloc.is_active() {
            frame.alloc_start = self.alloc.stats();
        }
        self.stack.push(frame);

        if let Some(top) = self.stack.top_mut() {
            let id = self.callgraph.resolve(top);
            self.callgraph.bucket_mut(id).stats.count += 1;
            top.edge = Some(id);
        }
    }

    /// Pop the innermost frame, stamp its duration and record or release it
    #[inline]
    pub fn exit_frame(&mut self) {
        if !self.enabled || self.stack.is_empty() {
            return;
        }

        let flags = self.flags;
        let now = self.clock.now_ms();
        let cpu_now = if flags.tracks_cpu() { self.clock.cpu_us() } else { 0 };
        let track_mu = flags.contains(TraceFlags::MEMORY_MU) || flags.alloc_as_memory_usage();
        let mu_now = if track_mu { self.memory_usage() } else { 0 };
        let pmu_now = if flags.contains(TraceFlags::MEMORY_PMU) {
            self.memory.peak_bytes()
        } else {
            0
        };
        let alloc_now = self.alloc.is_active().then(|| self.alloc.stats());

        let Some(mut frame) = self.stack.pop() else {
            return;
        };
        frame.wt_end = now.max(frame.wt_start);
        frame.duration = frame.wt_end - frame.wt_start;
        self.release_counter(frame.counter_slot);

        if let Some(id) = frame.edge {
            let stats = &mut self.callgraph.bucket_mut(id).stats;
            stats.wall_time += frame.duration;
            if flags.tracks_cpu() {
                stats.cpu_time += cpu_now.saturating_sub(frame.cpu_start);
            }
            if track_mu {
                stats.memory += mu_now as i64 - frame.mu_start as i64;
            }
            if flags.contains(TraceFlags::MEMORY_PMU) {
                stats.memory_peak += pmu_now as i64 - frame.pmu_start as i64;
            }
            if let Some(alloc_now) = alloc_now {
                let delta = alloc_now.since(&frame.alloc_start);
                stats.num_alloc += delta.num_alloc;
                stats.num_free += delta.num_free;
                stats.amount_alloc += delta.amount_alloc;
            }
        }

        if let Err(frame) = self.recorder.offer(frame) {
            self.pool.release(frame);
        }
    }

    /// Release every open frame without recording it; returns how many
    pub fn force_unwind(&mut self) -> usize {
        let mut released = 0;
        while let Some(frame) = self.stack.pop() {
            self.release_counter(frame.counter_slot);
            self.pool.release(frame);
            released += 1;
        }
        if released > 0 {
            tracing::debug!(released, "force-unwound open frames");
        }
        released
    }

    /// Stop tracing. Open frames are released unrecorded; repeated calls are no-ops.
    ///
    /// Recorded frames and call-graph edges stay available to `export`
    /// until the next `begin` or `shutdown`.
    pub fn end(&mut self) {
        if !self.enabled {
            return;
        }
        self.force_unwind();
        self.alloc.disable();
        self.root = None;
        self.enabled = false;
        tracing::debug!(
            recorded = self.recorder.len(),
            dropped = self.recorder.dropped(),
            edges = self.callgraph.len(),
            "trace ended"
        );
    }

    /// End the trace and free every frame this context owns
    ///
    /// Frames are freed before the allocator hook is removed, so with
    /// `MEMORY_ALLOC` the frame traffic of a trace nets out to zero.
    pub fn shutdown(&mut self) {
        self.force_unwind();
        self.recorder.release_all(&mut self.pool);
        self.callgraph.clear();
        self.pool.drain();
        self.end();
    }

    /// Recorded frames in exit order
    pub fn export(&self) -> Vec<FrameRecord> {
        self.recorder.records()
    }

    /// Aggregated call-graph edges
    pub fn export_callgraph(&self) -> Vec<EdgeRecord> {
        self.callgraph.edges(self.flags)
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary {
            enabled: self.enabled,
            flags: self.flags.bits(),
            start_time: self.start_time,
            start_timestamp: self.start_timestamp,
            recorded_frames: self.recorder.len(),
            dropped_frames: self.recorder.dropped(),
            edges: self.callgraph.len(),
            active_frames: self.stack.depth(),
            pool: self.pool.stats(),
            alloc: self.flags.tracks_allocations().then(|| self.alloc.stats()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn flags(&self) -> TraceFlags {
        self.flags
    }

    pub fn root(&self) -> Option<&Symbol> {
        self.root.as_ref()
    }

    pub fn stack(&self) -> &ShadowStack {
        &self.stack
    }

    pub fn callgraph(&self) -> &CallGraph {
        &self.callgraph
    }

    pub fn recorder(&self) -> &FrameRecorder {
        &self.recorder
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn alloc_stats(&self) -> AllocStats {
        self.alloc.stats()
    }

    pub fn alloc_tracking_active(&self) -> bool {
        self.alloc.is_active()
    }

    /// Value of the auxiliary counter for `function`
    pub fn function_counter(&self, function: &Symbol) -> u32 {
        self.counters[(function.hash_value() % CALLGRAPH_COUNTER_SIZE as u64) as usize]
    }

    fn release_counter(&mut self, slot: usize) {
        self.counters[slot] = self.counters[slot].saturating_sub(1);
    }

    fn memory_usage(&self) -> u64 {
        if self.flags.alloc_as_memory_usage() && self.alloc.is_active() {
            self.alloc.stats().amount_alloc
        } else {
            self.memory.usage_bytes()
        }
    }
}

impl<C: ClockSource> Drop for TraceContext<C> {
    fn drop(&mut self) {
        self.end();
    }
}
