// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Stack trace capture for an uncaught exception.
//!
//! A frame is gone the moment `unwind` pops it, so a trace has to be taken
//! eagerly, before the pop, rather than reconstructed afterwards. Runtime
//! [`Value`]s have no `serde::Serialize` impl of their own (a `Pointer`'s
//! `Arc<Mutex<Value>>` target and a `Closure`'s captured registers aren't
//! meaningfully serialisable without a process to resolve them against), so
//! the JSON renderer here goes through `Debug` for payload fields instead.

use viua_process::Stack;
use viua_value::{Atom, Value};

/// One activation record as it looked the instant its stack was found to
/// have no catcher for the exception in flight.
#[derive(Clone, Debug)]
pub struct TraceFrame {
    pub function_name: Atom,
    pub module: Atom,
    pub parameters: Vec<Value>,
    pub locals: Vec<Value>,
}

/// A snapshot of every live frame on a stack, most-recent-last, plus the
/// value that was in flight when it was taken.
#[derive(Clone, Debug)]
pub struct Stacktrace {
    pub frames: Vec<TraceFrame>,
    pub exception: Value,
}

/// Snapshot every frame still on `stack`. Frames are stored oldest-first
/// internally (a stack only grows at its tail), which is already the
/// most-recent-last order a trace renders in.
#[must_use]
pub fn capture(stack: &Stack, exception: Value) -> Stacktrace {
    let frames = stack
        .frames()
        .iter()
        .map(|frame| TraceFrame {
            function_name: frame.function_name.clone(),
            module: frame.module.clone(),
            parameters: frame.parameters.snapshot(),
            locals: frame.locals.snapshot(),
        })
        .collect();
    Stacktrace { frames, exception }
}

impl Stacktrace {
    #[must_use]
    pub fn render_human(&self) -> String {
        let mut out = format!("uncaught exception: {:?}\n", self.exception);
        for (depth, frame) in self.frames.iter().enumerate() {
            out.push_str(&format!(
                "  #{depth} {}@{} args={:?} locals={:?}\n",
                frame.function_name.as_str(),
                frame.module.as_str(),
                frame.parameters,
                frame.locals
            ));
        }
        out
    }

    pub fn render_json(&self) -> Result<String, serde_json::Error> {
        let frames: Vec<serde_json::Value> = self
            .frames
            .iter()
            .map(|frame| {
                serde_json::json!({
                    "function": frame.function_name.as_str(),
                    "module": frame.module.as_str(),
                    "parameters": frame.parameters.iter().map(|v| format!("{v:?}")).collect::<Vec<_>>(),
                    "locals": frame.locals.iter().map(|v| format!("{v:?}")).collect::<Vec<_>>(),
                })
            })
            .collect();
        serde_json::to_string_pretty(&serde_json::json!({
            "exception": format!("{:?}", self.exception),
            "frames": frames,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viua_isa::RegisterAccess;
    use viua_process::{Frame, RegisterSet};

    #[test]
    fn captures_every_live_frame_most_recent_last() {
        let mut stack = Stack::new();
        stack
            .push_frame(Frame::new(Atom::intern("outer"), Atom::intern("m"), RegisterSet::allocate(0), 0, RegisterAccess::VOID))
            .unwrap();
        stack
            .push_frame(Frame::new(Atom::intern("inner"), Atom::intern("m"), RegisterSet::allocate(0), 0, RegisterAccess::VOID))
            .unwrap();

        let trace = capture(&stack, Value::Atom(Atom::intern("boom")));
        assert_eq!(trace.frames.len(), 2);
        assert_eq!(trace.frames[0].function_name.as_str(), "outer");
        assert_eq!(trace.frames[1].function_name.as_str(), "inner");
    }

    #[test]
    fn human_rendering_names_every_frame() {
        let mut stack = Stack::new();
        stack
            .push_frame(Frame::new(Atom::intern("main"), Atom::intern("m"), RegisterSet::allocate(0), 0, RegisterAccess::VOID))
            .unwrap();
        let trace = capture(&stack, Value::Atom(Atom::intern("boom")));
        let rendered = trace.render_human();
        assert!(rendered.contains("main@m"));
    }

    #[test]
    fn json_rendering_is_well_formed() {
        let trace = capture(&Stack::new(), Value::Int64(1));
        let rendered = trace.render_json().unwrap();
        assert!(rendered.contains("\"exception\""));
        assert!(rendered.contains("\"frames\""));
    }
}
