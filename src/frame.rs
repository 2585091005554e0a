//! Frame records and their lifecycle link
//!
//! A frame is always in exactly one place: on the shadow stack, on the
//! pool's free list, in the recorder buffer, or detached in transit between
//! them. [`FrameLink`] makes that state explicit, so the caller link of an
//! active frame and the next link of a free frame can never be confused.

use crate::alloc_hook::AllocStats;
use crate::callgraph::BucketId;
use crate::symbol::Symbol;

/// Identity of a call as reported by the host on function entry
#[derive(Debug, Clone, Default)]
pub struct CallSite {
    /// Absent for activations that cannot be traced (file-level eval/include bodies)
    pub function: Option<Symbol>,
    /// Enclosing type; absent for free functions and closures
    pub class: Option<Symbol>,
    /// Host-native function
    pub builtin: bool,
}

impl CallSite {
    pub fn function(name: impl Into<Symbol>) -> Self {
        CallSite {
            function: Some(name.into()),
            class: None,
            builtin: false,
        }
    }

    pub fn method(class: impl Into<Symbol>, name: impl Into<Symbol>) -> Self {
        CallSite {
            function: Some(name.into()),
            class: Some(class.into()),
            builtin: false,
        }
    }

    /// An activation with no resolvable function identity
    pub fn unresolved() -> Self {
        CallSite::default()
    }

    pub fn builtin(mut self) -> Self {
        self.builtin = true;
        self
    }
}

/// Where a frame currently lives
#[derive(Debug, Default)]
pub enum FrameLink {
    /// Freshly acquired or just popped, linked nowhere
    #[default]
    Detached,
    /// Active; owns the caller's frame (absent for the bottom of the stack)
    OnStack(Option<Box<Frame>>),
    /// Released; owns the next free frame
    OnFreeList(Option<Box<Frame>>),
    /// Owned by the completed-frame recorder
    Recorded,
}

impl FrameLink {
    /// Detach and return whichever frame this link owns
    pub(crate) fn take_next(&mut self) -> Option<Box<Frame>> {
        match std::mem::take(self) {
            FrameLink::OnStack(next) | FrameLink::OnFreeList(next) => next,
            FrameLink::Detached | FrameLink::Recorded => None,
        }
    }
}

/// One function activation
#[derive(Debug, Default)]
pub struct Frame {
    pub(crate) function: Option<Symbol>,
    pub(crate) class: Option<Symbol>,
    pub(crate) recurse_level: u32,
    /// Slot in the auxiliary per-function counter array
    pub(crate) counter_slot: usize,
    pub(crate) is_root: bool,
    /// Call-graph edge this activation is aggregated into
    pub(crate) edge: Option<BucketId>,
    pub(crate) link: FrameLink,
    pub(crate) wt_start: u64,
    pub(crate) wt_end: u64,
    pub(crate) duration: u64,
    pub(crate) cpu_start: u64,
    pub(crate) mu_start: u64,
    pub(crate) pmu_start: u64,
    pub(crate) alloc_start: AllocStats,
}

impl Frame {
    pub fn function(&self) -> Option<&Symbol> {
        self.function.as_ref()
    }

    pub fn class(&self) -> Option<&Symbol> {
        self.class.as_ref()
    }

    pub fn recurse_level(&self) -> u32 {
        self.recurse_level
    }

    pub fn wt_start(&self) -> u64 {
        self.wt_start
    }

    pub fn wt_end(&self) -> u64 {
        self.wt_end
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn link(&self) -> &FrameLink {
        &self.link
    }

    /// The calling frame, while this frame is on the shadow stack
    pub fn caller(&self) -> Option<&Frame> {
        match &self.link {
            FrameLink::OnStack(caller) => caller.as_deref(),
            _ => None,
        }
    }

    /// Rendered name used in exported records
    pub fn display_name(&self) -> String {
        let function = self.function.as_ref().map(Symbol::as_str).unwrap_or("");
        match (&self.class, self.is_root) {
            (_, true) => function.to_string(),
            (Some(class), false) => format!("{}::{}()", class, function),
            (None, false) => format!("closure::{}()", function),
        }
    }

    /// Drop owned identifiers before the frame is parked for reuse
    pub(crate) fn clear_identity(&mut self) {
        self.function = None;
        self.class = None;
        self.is_root = false;
        self.edge = None;
    }
}

impl Drop for Frame {
    // Unlink iteratively so dropping a deep stack or long free list
    // does not recurse once per frame.
    fn drop(&mut self) {
        let mut next = self.link.take_next();
        while let Some(mut frame) = next {
            next = frame.link.take_next();
        }
    }
}
