//! Error taxonomy for the tracing engine
//!
//! Nothing on the per-call path returns these. Unresolved identities,
//! recorder overflow and mid-trace termination are policies, not errors;
//! only lifecycle and tooling operations surface a `TraceError`.

use thiserror::Error;

/// Errors for trace lifecycle and replay operations
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Allocator hook is owned by another tracing session")]
    AllocatorBusy,

    #[error("Invalid event script: {0}")]
    ReplayParse(#[from] serde_json::Error),

    #[error("Event {index} exits a frame but the shadow stack is empty")]
    UnbalancedExit { index: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TraceError>;
