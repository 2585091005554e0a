//! Measurement mode bitmask accepted by `TraceContext::begin`

bitflags::bitflags! {
    /// Independently combinable measurement modes.
    ///
    /// The numeric values are part of the host contract and must not change.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TraceFlags: u32 {
        /// Per-edge thread CPU time
        const CPU = 1;
        /// Per-edge memory usage delta
        const MEMORY_MU = 2;
        /// Per-edge peak memory usage delta
        const MEMORY_PMU = 4;
        const MEMORY = Self::MEMORY_MU.bits() | Self::MEMORY_PMU.bits();
        /// Skip frames for builtin (host-native) functions
        const NO_BUILTINS = 8;
        /// Install the counting allocator decorator while tracing
        const MEMORY_ALLOC = 16;
        /// Report allocated bytes as memory usage (implies MEMORY_ALLOC)
        const MEMORY_ALLOC_AS_MU = 32 | Self::MEMORY_ALLOC.bits();
    }
}

impl TraceFlags {
    /// Build from the raw integer handed over by the host, ignoring unknown bits
    pub fn from_raw(raw: i64) -> Self {
        Self::from_bits_truncate(raw as u32)
    }

    pub fn tracks_cpu(self) -> bool {
        self.contains(Self::CPU)
    }

    pub fn tracks_allocations(self) -> bool {
        self.contains(Self::MEMORY_ALLOC)
    }

    pub fn alloc_as_memory_usage(self) -> bool {
        self.contains(Self::MEMORY_ALLOC_AS_MU)
    }

    pub fn excludes_builtins(self) -> bool {
        self.contains(Self::NO_BUILTINS)
    }
}
