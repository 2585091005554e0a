//! Shadow call stack
//!
//! A singly-linked stack of active frames mirroring the program's own call
//! stack. Each frame owns its caller through [`FrameLink::OnStack`], so the
//! head is the innermost activation and walking callers walks outward.

use crate::frame::{Frame, FrameLink};
use crate::symbol::Symbol;

#[derive(Debug, Default)]
pub struct ShadowStack {
    head: Option<Box<Frame>>,
    depth: usize,
}

impl ShadowStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `frame` on top of the current head
    #[inline]
    pub fn push(&mut self, mut frame: Box<Frame>) {
        frame.link = FrameLink::OnStack(self.head.take());
        self.head = Some(frame);
        self.depth += 1;
    }

    /// Unlink the head and make its caller the new head
    ///
    /// The returned frame is detached.
    #[inline]
    pub fn pop(&mut self) -> Option<Box<Frame>> {
        let mut frame = self.head.take()?;
        self.head = frame.link.take_next();
        self.depth -= 1;
        Some(frame)
    }

    pub fn top(&self) -> Option<&Frame> {
        self.head.as_deref()
    }

    pub(crate) fn top_mut(&mut self) -> Option<&mut Frame> {
        self.head.as_deref_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Frames from innermost to outermost
    pub fn iter(&self) -> Frames<'_> {
        Frames {
            next: self.head.as_deref(),
        }
    }

    /// Nearest active frame with the given identity
    pub fn find_active(&self, function: &Symbol, class: Option<&Symbol>) -> Option<&Frame> {
        self.iter()
            .find(|f| f.function.as_ref() == Some(function) && f.class.as_ref() == class)
    }
}

/// Iterator over the active frames, innermost first
pub struct Frames<'a> {
    next: Option<&'a Frame>,
}

impl<'a> Iterator for Frames<'a> {
    type Item = &'a Frame;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.next?;
        self.next = frame.caller();
        Some(frame)
    }
}
