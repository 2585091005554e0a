//! Completed-frame recorder
//!
//! Keeps frames whose wall time exceeded the noise threshold, up to a fixed
//! capacity, in the order they exited. Everything else goes back to the pool.

use crate::frame::{Frame, FrameLink};
use crate::frame_pool::FramePool;
use serde::{Deserialize, Serialize};

/// Maximum frames kept per trace
pub const MAX_RECORDED_FRAMES: usize = 10_000;

/// Frames must take strictly longer than this to be kept
pub const MIN_RECORDED_DURATION_MS: u64 = 10;

/// Exported view of one completed frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub function_name: String,
    pub wt_start: u64,
    pub wt_end: u64,
    pub duration: u64,
}

impl From<&Frame> for FrameRecord {
    fn from(frame: &Frame) -> Self {
        FrameRecord {
            function_name: frame.display_name(),
            wt_start: frame.wt_start,
            wt_end: frame.wt_end,
            duration: frame.duration,
        }
    }
}

#[derive(Debug)]
pub struct FrameRecorder {
    frames: Vec<Box<Frame>>,
    dropped: u64,
}

impl FrameRecorder {
    pub fn new() -> Self {
        FrameRecorder {
            frames: Vec::with_capacity(MAX_RECORDED_FRAMES),
            dropped: 0,
        }
    }

    /// Take ownership of `frame` if it is slow enough and there is room
    ///
    /// Rejected frames are handed back for release.
    #[inline]
    pub fn offer(&mut self, mut frame: Box<Frame>) -> Result<(), Box<Frame>> {
        if frame.duration <= MIN_RECORDED_DURATION_MS {
            return Err(frame);
        }
        if self.is_full() {
            self.dropped += 1;
            if self.dropped == 1 {
                tracing::warn!(
                    capacity = MAX_RECORDED_FRAMES,
                    "completed-frame buffer full, further frames are not recorded"
                );
            }
            return Err(frame);
        }
        frame.link = FrameLink::Recorded;
        self.frames.push(frame);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= MAX_RECORDED_FRAMES
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Qualifying frames turned away because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter().map(|f| &**f)
    }

    /// Records in exit order
    pub fn records(&self) -> Vec<FrameRecord> {
        self.frames().map(FrameRecord::from).collect()
    }

    /// Hand every buffered frame back to `pool` and reset the overflow count
    pub fn release_all(&mut self, pool: &mut FramePool) {
        for frame in self.frames.drain(..) {
            pool.release(frame);
        }
        self.dropped = 0;
    }
}

impl Default for FrameRecorder {
    fn default() -> Self {
        Self::new()
    }
}
