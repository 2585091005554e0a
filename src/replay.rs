//! Event-script replay
//!
//! Drives a [`TraceContext`] from a recorded sequence of enter/exit events
//! with a manual clock, so traces can be reproduced without a live host.
//!
//! A script is a JSON array:
//!
//! ```json
//! [
//!   {"event": "enter", "function": "handle", "class": "Server", "at": 0},
//!   {"event": "enter_builtin", "function": "strlen", "at": 3},
//!   {"event": "exit", "at": 4},
//!   {"event": "exit", "at": 30}
//! ]
//! ```

use crate::callgraph::EdgeRecord;
use crate::clock::ManualClock;
use crate::context::{TraceContext, TraceSummary};
use crate::error::{Result, TraceError};
use crate::flags::TraceFlags;
use crate::frame::CallSite;
use crate::recorder::FrameRecord;
use crate::symbol::Interner;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One host callback in a replay script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReplayEvent {
    Enter {
        #[serde(default)]
        function: Option<String>,
        #[serde(default)]
        class: Option<String>,
        #[serde(default)]
        at: Option<u64>,
    },
    EnterBuiltin {
        #[serde(default)]
        function: Option<String>,
        #[serde(default)]
        class: Option<String>,
        #[serde(default)]
        at: Option<u64>,
    },
    Exit {
        #[serde(default)]
        at: Option<u64>,
    },
}

impl ReplayEvent {
    fn at(&self) -> Option<u64> {
        match self {
            ReplayEvent::Enter { at, .. }
            | ReplayEvent::EnterBuiltin { at, .. }
            | ReplayEvent::Exit { at } => *at,
        }
    }
}

fn call_site(
    symbols: &mut Interner,
    function: &Option<String>,
    class: &Option<String>,
    builtin: bool,
) -> CallSite {
    CallSite {
        function: function.as_deref().map(|name| symbols.intern(name)),
        class: class.as_deref().map(|name| symbols.intern(name)),
        builtin,
    }
}

/// Everything a replay produced
#[derive(Debug, Clone, Serialize)]
pub struct ReplayOutcome {
    pub frames: Vec<FrameRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callgraph: Option<Vec<EdgeRecord>>,
    pub summary: TraceSummary,
}

/// Parse a JSON event script
pub fn parse_script(json: &str) -> Result<Vec<ReplayEvent>> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_script(path: &Path) -> Result<Vec<ReplayEvent>> {
    let json = std::fs::read_to_string(path)?;
    parse_script(&json)
}

/// Replay `events` into a fresh trace and export the result
///
/// The clock starts at the first event's timestamp (or zero). Events
/// without `at` reuse the previous time. The `main()` root is open from
/// the start, so a script may exit it after its last call returns. Frames
/// still open at the end of the script are force-unwound. An `exit` with
/// nothing left open fails with [`TraceError::UnbalancedExit`].
pub fn replay(events: &[ReplayEvent], flags: TraceFlags, callgraph: bool) -> Result<ReplayOutcome> {
    let clock = ManualClock::new(events.first().and_then(ReplayEvent::at).unwrap_or(0));
    let mut ctx = TraceContext::with_clock(clock.clone());
    ctx.begin(flags);

    let mut symbols = Interner::new();
    // One entry per open activation, root first: whether it pushed a frame
    let mut entered: Vec<bool> = vec![true];

    for (index, event) in events.iter().enumerate() {
        if let Some(at) = event.at() {
            clock.set(at);
        }
        match event {
            ReplayEvent::Enter { function, class, .. } => {
                let call = call_site(&mut symbols, function, class, false);
                entered.push(ctx.enter_frame(&call));
            }
            ReplayEvent::EnterBuiltin { function, class, .. } => {
                let call = call_site(&mut symbols, function, class, true);
                entered.push(ctx.enter_frame(&call));
            }
            ReplayEvent::Exit { .. } => match entered.pop() {
                Some(true) => ctx.exit_frame(),
                Some(false) => {}
                None => return Err(TraceError::UnbalancedExit { index }),
            },
        }
    }

    if !entered.is_empty() {
        tracing::debug!(open = entered.len(), "script ended with open frames");
    }
    ctx.end();

    Ok(ReplayOutcome {
        frames: ctx.export(),
        callgraph: callgraph.then(|| ctx.export_callgraph()),
        summary: ctx.summary(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_event_kinds() {
        let events = parse_script(
            r#"[
                {"event":"enter","function":"bar","class":"Foo","at":5},
                {"event":"enter_builtin","function":"strlen"},
                {"event":"exit"},
                {"event":"exit","at":30}
            ]"#,
        )
        .unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[0],
            ReplayEvent::Enter {
                function: Some("bar".into()),
                class: Some("Foo".into()),
                at: Some(5)
            }
        );
        assert!(matches!(events[1], ReplayEvent::EnterBuiltin { at: None, .. }));
        assert_eq!(events[3], ReplayEvent::Exit { at: Some(30) });
    }

    #[test]
    fn test_parse_rejects_unknown_event() {
        let err = parse_script(r#"[{"event":"yield"}]"#).unwrap_err();
        assert!(matches!(err, TraceError::ReplayParse(_)));
    }

    #[test]
    fn test_replay_records_slow_method() {
        let events = parse_script(
            r#"[
                {"event":"enter","function":"bar","class":"Foo","at":5},
                {"event":"exit","at":30}
            ]"#,
        )
        .unwrap();
        let outcome = replay(&events, TraceFlags::empty(), false).unwrap();
        assert_eq!(outcome.frames.len(), 1);
        assert_eq!(outcome.frames[0].function_name, "Foo::bar()");
        assert_eq!(outcome.frames[0].wt_start, 5);
        assert_eq!(outcome.frames[0].duration, 25);
        assert!(outcome.callgraph.is_none());
        assert!(!outcome.summary.enabled);
    }

    #[test]
    fn test_replay_skipped_builtin_exit_is_ignored() {
        let events = parse_script(
            r#"[
                {"event":"enter","function":"work","at":0},
                {"event":"enter_builtin","function":"strlen","at":1},
                {"event":"exit","at":40},
                {"event":"exit","at":50}
            ]"#,
        )
        .unwrap();
        let outcome = replay(&events, TraceFlags::NO_BUILTINS, true).unwrap();
        assert_eq!(outcome.frames.len(), 1);
        assert_eq!(outcome.frames[0].function_name, "closure::work()");
        assert_eq!(outcome.frames[0].duration, 50);

        let edges = outcome.callgraph.unwrap();
        assert!(edges.iter().all(|e| !e.edge.contains("strlen")));
    }

    #[test]
    fn test_replay_unbalanced_exit() {
        let events = parse_script(
            r#"[{"event":"enter","function":"a"},{"event":"exit"},{"event":"exit"},{"event":"exit"}]"#,
        )
        .unwrap();
        let err = replay(&events, TraceFlags::empty(), false).unwrap_err();
        assert!(matches!(err, TraceError::UnbalancedExit { index: 3 }));
    }

    #[test]
    fn test_replay_exiting_root_records_main() {
        let events = parse_script(
            r#"[
                {"event":"enter","function":"bar","class":"Foo","at":0},
                {"event":"exit","at":20},
                {"event":"exit","at":21}
            ]"#,
        )
        .unwrap();
        let outcome = replay(&events, TraceFlags::empty(), false).unwrap();
        let names: Vec<&str> = outcome
            .frames
            .iter()
            .map(|f| f.function_name.as_str())
            .collect();
        assert_eq!(names, vec!["Foo::bar()", "main()"]);
        assert_eq!(outcome.frames[1].duration, 21);
    }

    #[test]
    fn test_replay_open_frames_are_not_recorded() {
        let events = parse_script(
            r#"[
                {"event":"enter","function":"outer","at":0},
                {"event":"enter","function":"inner","at":10},
                {"event":"exit","at":100}
            ]"#,
        )
        .unwrap();
        let outcome = replay(&events, TraceFlags::empty(), false).unwrap();
        assert_eq!(outcome.frames.len(), 1);
        assert_eq!(outcome.frames[0].function_name, "closure::inner()");
        assert_eq!(outcome.summary.active_frames, 0);
        // only the recorded frame is still held outside the pool
        assert_eq!(outcome.summary.pool.outstanding(), 1);
    }
}
