//! Time and memory sources for frame stamps
//!
//! Wall time is read from `CLOCK_MONOTONIC` and scaled by a timebase factor
//! computed once per process. CPU time comes from the calling thread's CPU
//! clock and memory readings from an injected [`MemoryProbe`].

use nix::time::{clock_gettime, ClockId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

const NANOS_PER_MS: u64 = 1_000_000;

/// Conversion factor from raw clock ticks to milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimebaseFactor {
    ticks_per_ms: u64,
}

impl TimebaseFactor {
    pub fn ticks_per_ms(self) -> u64 {
        self.ticks_per_ms
    }
}

static TIMEBASE: OnceLock<TimebaseFactor> = OnceLock::new();

/// Compute (once) the tick-to-millisecond factor for the monotonic clock
pub fn init_timebase() -> TimebaseFactor {
    *TIMEBASE.get_or_init(|| {
        // CLOCK_MONOTONIC ticks in nanoseconds on every supported platform
        let factor = TimebaseFactor {
            ticks_per_ms: NANOS_PER_MS,
        };
        tracing::debug!(ticks_per_ms = factor.ticks_per_ms, "timebase initialized");
        factor
    })
}

/// Current monotonic time in milliseconds
pub fn now_ms(factor: TimebaseFactor) -> u64 {
    monotonic_ticks() / factor.ticks_per_ms
}

fn monotonic_ticks() -> u64 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64,
        Err(_) => fallback_ticks(),
    }
}

fn fallback_ticks() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Thread CPU time in microseconds, zero when the clock is unavailable
pub fn thread_cpu_us() -> u64 {
    clock_gettime(ClockId::CLOCK_THREAD_CPUTIME_ID)
        .map(|ts| ts.tv_sec() as u64 * 1_000_000 + ts.tv_nsec() as u64 / 1_000)
        .unwrap_or(0)
}

/// Source of frame timestamps
///
/// Implementations must be non-decreasing so that `wt_end >= wt_start`.
pub trait ClockSource {
    fn now_ms(&self) -> u64;

    /// CPU time consumed by the current thread, in microseconds
    fn cpu_us(&self) -> u64 {
        thread_cpu_us()
    }
}

/// Production clock backed by `CLOCK_MONOTONIC`
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    factor: TimebaseFactor,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            factor: init_timebase(),
        }
    }

    pub fn factor(&self) -> TimebaseFactor {
        self.factor
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for MonotonicClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        now_ms(self.factor)
    }
}

/// Externally driven clock for replays and deterministic tests
///
/// Clones share the same time cell. Setting an earlier time than the
/// current one is ignored so readings stay monotonic.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        ManualClock {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::Relaxed);
    }
}

impl ClockSource for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }

    fn cpu_us(&self) -> u64 {
        0
    }
}

/// Source of memory usage readings for the MU/PMU modes
pub trait MemoryProbe {
    /// Current memory usage in bytes
    fn usage_bytes(&self) -> u64;
    /// High-water mark of memory usage in bytes
    fn peak_bytes(&self) -> u64;
}

/// Process resident set size and peak RSS
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMemory;

impl MemoryProbe for ProcessMemory {
    fn usage_bytes(&self) -> u64 {
        resident_pages()
            .map(|pages| pages * page_size())
            .unwrap_or(0)
    }

    fn peak_bytes(&self) -> u64 {
        use nix::sys::resource::{getrusage, UsageWho};

        match getrusage(UsageWho::RUSAGE_SELF) {
            // Linux reports kilobytes, macOS bytes
            #[cfg(target_os = "macos")]
            Ok(usage) => usage.max_rss() as u64,
            #[cfg(not(target_os = "macos"))]
            Ok(usage) => usage.max_rss() as u64 * 1024,
            Err(_) => 0,
        }
    }
}

fn resident_pages() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    statm.split_whitespace().nth(1)?.parse().ok()
}

fn page_size() -> u64 {
    use nix::unistd::{sysconf, SysconfVar};

    sysconf(SysconfVar::PAGE_SIZE)
        .ok()
        .flatten()
        .map(|size| size as u64)
        .unwrap_or(4096)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_timebase_is_computed_once() {
        let a = init_timebase();
        let b = init_timebase();
        assert_eq!(a, b);
        assert_eq!(a.ticks_per_ms(), NANOS_PER_MS);
    }

    #[test]
    fn test_monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let mut last = clock.now_ms();
        for _ in 0..1000 {
            let now = clock.now_ms();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_monotonic_clock_tracks_sleep() {
        let clock = MonotonicClock::new();
        let start = clock.now_ms();
        thread::sleep(Duration::from_millis(15));
        let elapsed = clock.now_ms() - start;
        assert!(elapsed >= 14, "elapsed {}ms", elapsed);
        assert!(elapsed < 500);
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(100);
        let handle = clock.clone();
        handle.advance(25);
        assert_eq!(clock.now_ms(), 125);
        handle.set(200);
        assert_eq!(clock.now_ms(), 200);
    }

    #[test]
    fn test_manual_clock_ignores_earlier_time() {
        let clock = ManualClock::new(50);
        clock.set(10);
        assert_eq!(clock.now_ms(), 50);
        assert_eq!(clock.cpu_us(), 0);
    }

    #[test]
    fn test_thread_cpu_advances_during_compute() {
        let before = thread_cpu_us();
        let mut acc = 0u64;
        for i in 0..5_000_000u64 {
            acc = acc.wrapping_mul(31).wrapping_add(i);
        }
        std::hint::black_box(acc);
        assert!(thread_cpu_us() >= before);
    }

    #[test]
    fn test_process_memory_reports_peak() {
        let probe = ProcessMemory;
        assert!(probe.peak_bytes() > 0);
    }
}
