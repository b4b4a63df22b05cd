// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Stacks: an ordered sequence of frames plus a parallel sequence of
//! try-frames, with an instruction pointer and a lifecycle state.

use viua_value::Value;

use crate::frame::Frame;
use crate::try_frame::TryFrame;

/// Deepest a single stack may grow before `StackOverflow` is raised.
pub const MAX_STACK_SIZE: usize = 8192;

/// A stack's lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackState {
    Uninitialised,
    Running,
    /// A popped frame's deferred calls are running as a nested stack; the
    /// dispatch loop only re-enters `RETURN` handling once that nested
    /// stack halts.
    SuspendedByDeferredOnFramePop,
    /// The unwinder is waiting for a popped frame's deferred calls to
    /// finish running as a nested stack before resuming the search for a
    /// catcher.
    SuspendedByDeferredDuringUnwind,
    Halted,
}

/// An ordered sequence of frames and try-frames, with its own instruction
/// pointer and the `thrown`/`caught`/`return_value` slots the unwinder and
/// the `RETURN`/`CATCH`/`DRAW` opcodes operate on.
#[derive(Debug)]
pub struct Stack {
    frames: Vec<Frame>,
    try_frames: Vec<TryFrame>,
    pub state: StackState,
    pub ip: usize,
    pub thrown: Option<Value>,
    pub caught: Option<Value>,
    pub return_value: Option<Value>,
}

/// Pushing this frame would exceed [`MAX_STACK_SIZE`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("stack overflow: exceeded {MAX_STACK_SIZE} frames")]
pub struct StackOverflow;

impl Stack {
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            try_frames: Vec::new(),
            state: StackState::Uninitialised,
            ip: 0,
            thrown: None,
            caught: None,
            return_value: None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push_frame(&mut self, frame: Frame) -> Result<(), StackOverflow> {
        if self.frames.len() >= MAX_STACK_SIZE {
            return Err(StackOverflow);
        }
        self.frames.push(frame);
        self.state = StackState::Running;
        Ok(())
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        let frame = self.frames.pop();
        // discard try-frames installed by the popped frame
        let depth = self.frames.len();
        self.try_frames.retain(|tf| tf.frame_index < depth);
        frame
    }

    #[must_use]
    pub fn active_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Every live frame, oldest-first, for a diagnostics snapshot.
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn active_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn install_try_frame(&mut self, try_frame: TryFrame) {
        self.try_frames.push(try_frame);
    }

    pub fn pop_try_frame(&mut self) -> Option<TryFrame> {
        self.try_frames.pop()
    }

    #[must_use]
    pub fn try_frames(&self) -> &[TryFrame] {
        &self.try_frames
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.state == StackState::Halted || self.is_empty()
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viua_isa::{RegisterAccess, RegisterSet as Rs};
    use viua_value::Atom;

    use crate::register_set::RegisterSet;

    fn frame() -> Frame {
        Frame::new(
            Atom::intern("f"),
            Atom::intern("m"),
            RegisterSet::allocate(0),
            0,
            RegisterAccess::direct(Rs::Local, 0).unwrap(),
        )
    }

    #[test]
    fn popping_a_frame_discards_its_try_frames() {
        let mut stack = Stack::new();
        stack.push_frame(frame()).unwrap();
        stack.install_try_frame(TryFrame::new(0));
        assert_eq!(stack.try_frames().len(), 1);
        stack.pop_frame();
        assert_eq!(stack.try_frames().len(), 0);
    }

    #[test]
    fn overflow_is_detected() {
        let mut stack = Stack::new();
        for _ in 0..MAX_STACK_SIZE {
            stack.push_frame(frame()).unwrap();
        }
        assert!(stack.push_frame(frame()).is_err());
    }

    #[test]
    fn empty_stack_is_halted() {
        assert!(Stack::new().is_halted());
    }
}
