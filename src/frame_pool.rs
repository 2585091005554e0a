//! Frame recycling allocator
//!
//! Released frames are parked on an intrusive free list threaded through
//! their own [`FrameLink`], so a steady enter/exit pattern reuses the same
//! few boxes instead of hitting the allocator on every call.

use crate::frame::{Frame, FrameLink};

/// Free list of reusable frames
#[derive(Debug, Default)]
pub struct FramePool {
    free_list: Option<Box<Frame>>,
    available: usize,
    allocated: usize,
    reused: usize,
    freed: usize,
}

impl FramePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a frame off the free list, or allocate one if it is empty
    ///
    /// Fields other than the link are left as they were; the caller
    /// overwrites everything it reads.
    #[inline]
    pub fn acquire(&mut self) -> Box<Frame> {
        match self.free_list.take() {
            Some(mut frame) => {
                self.free_list = frame.link.take_next();
                self.available -= 1;
                self.reused += 1;
                frame
            }
            None => {
                self.allocated += 1;
                Box::default()
            }
        }
    }

    /// Drop the frame's identifiers and push it onto the free list
    #[inline]
    pub fn release(&mut self, mut frame: Box<Frame>) {
        frame.clear_identity();
        frame.link = FrameLink::OnFreeList(self.free_list.take());
        self.free_list = Some(frame);
        self.available += 1;
    }

    /// Free every parked frame. Safe to call repeatedly.
    pub fn drain(&mut self) {
        let mut next = self.free_list.take();
        while let Some(mut frame) = next {
            next = frame.link.take_next();
            self.freed += 1;
        }
        self.available = 0;
    }

    /// Frames currently parked on the free list
    pub fn available(&self) -> usize {
        self.available
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated,
            reused: self.reused,
            freed: self.freed,
            available: self.available,
        }
    }
}

/// Frame pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct PoolStats {
    /// Frames ever allocated from the heap
    pub allocated: usize,
    /// Acquires served from the free list
    pub reused: usize,
    /// Frames returned to the heap by `drain`
    pub freed: usize,
    /// Frames parked on the free list
    pub available: usize,
}

impl PoolStats {
    /// Frames handed out and not yet back in the pool or freed
    pub fn outstanding(&self) -> usize {
        self.allocated - self.freed - self.available
    }

    /// Percentage of acquires served without allocating
    pub fn hit_rate(&self) -> f64 {
        let acquired = self.allocated + self.reused;
        if acquired == 0 {
            return 0.0;
        }
        (self.reused as f64 / acquired as f64) * 100.0
    }
}
