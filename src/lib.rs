//! calltrace - always-on call-graph profiler engine
//!
//! A host runtime reports every function entry and return to a
//! [`TraceContext`]. The context keeps a shadow call stack of pooled
//! frames, records frames slower than a noise threshold, and aggregates
//! parent->child call-graph edges with optional CPU, memory and
//! allocation measurements.

pub mod alloc_hook;
pub mod call_stack;
pub mod callgraph;
pub mod cli;
pub mod clock;
pub mod context;
pub mod error;
pub mod flags;
pub mod frame;
pub mod frame_pool;
pub mod recorder;
pub mod replay;
pub mod symbol;

pub use context::{TraceContext, TraceSummary, CALLGRAPH_COUNTER_SIZE, ROOT_SYMBOL};
pub use error::{Result, TraceError};
pub use flags::TraceFlags;
pub use frame::CallSite;
pub use recorder::{FrameRecord, MAX_RECORDED_FRAMES, MIN_RECORDED_DURATION_MS};
pub use symbol::Symbol;
