// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Processes: the unit of isolated execution.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use viua_value::{Atom, IoHandle, Pid, Value};

use crate::register_set::RegisterSet;
use crate::stack::Stack;

/// Default instruction quantum for the process started from `main`.
pub const MAIN_PRIORITY: u32 = 512;
/// Default instruction quantum for processes spawned with `PROCESS`/`ACTOR`.
pub const SPAWNED_PRIORITY: u32 = 16;

/// Why a process is not currently runnable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Suspension {
    NotSuspended,
    AwaitingMessage,
    AwaitingJoin(Pid),
    AwaitingIo(IoHandle),
    AwaitingDeferred,
    AwaitingFfi,
}

/// The FIFO mailbox a process reads from. The kernel holds the authoritative
/// table of these, keyed by PID; a process holds the same handle so its
/// scheduler can drain it without going through the kernel lock on every
/// `RECEIVE`.
pub type Mailbox = Arc<Mutex<VecDeque<Value>>>;

/// A unit of isolated execution: one global register set, one static
/// register set per function it has called, a stack of stacks (to host
/// nested stacks spawned by deferred calls and exception unwinding), and a
/// mailbox.
pub struct Process {
    pub pid: Pid,
    pub global: RegisterSet,
    statics: HashMap<Atom, RegisterSet>,
    stacks: Vec<Stack>,
    active_stack: usize,
    pub mailbox: Mailbox,
    pub priority: u32,
    pub joinable: bool,
    pub suspension: Suspension,
    pub pinned: bool,
    io_interactions: HashSet<IoHandle>,
    pub watchdog: Option<Atom>,
}

impl Process {
    #[must_use]
    pub fn new(pid: Pid, priority: u32) -> Self {
        let mut stacks = Vec::with_capacity(1);
        stacks.push(Stack::new());
        Self {
            pid,
            global: RegisterSet::allocate(0),
            statics: HashMap::new(),
            stacks,
            active_stack: 0,
            mailbox: Arc::new(Mutex::new(VecDeque::new())),
            priority,
            joinable: true,
            suspension: Suspension::NotSuspended,
            pinned: false,
            io_interactions: HashSet::new(),
            watchdog: None,
        }
    }

    /// Static registers are per-function, lazily materialised at
    /// [`crate::register_set::STATIC_REGISTER_SET_SIZE`] cells.
    pub fn statics_for(&mut self, function: &Atom) -> &mut RegisterSet {
        self.statics
            .entry(function.clone())
            .or_insert_with(|| RegisterSet::allocate(crate::register_set::STATIC_REGISTER_SET_SIZE))
    }

    #[must_use]
    pub fn active_stack(&self) -> &Stack {
        &self.stacks[self.active_stack]
    }

    pub fn active_stack_mut(&mut self) -> &mut Stack {
        &mut self.stacks[self.active_stack]
    }

    /// Borrow the active stack together with the two register sets its
    /// active frame may address outside its own locals and parameters:
    /// process-wide globals and this frame's function's lazily materialised
    /// statics. Exposed as one call so a dispatcher can build a
    /// `RegisterAccess` resolver without re-borrowing `self` field by field.
    pub fn active_registers(&mut self) -> (&mut Stack, &mut RegisterSet, &mut RegisterSet) {
        let active = self.active_stack;
        let function_name = self.stacks[active]
            .active_frame()
            .map(|f| f.function_name.clone())
            .unwrap_or_else(|| Atom::intern("<no-active-frame>"));
        let statics = self
            .statics
            .entry(function_name)
            .or_insert_with(|| RegisterSet::allocate(crate::register_set::STATIC_REGISTER_SET_SIZE));
        (&mut self.stacks[active], &mut self.global, statics)
    }

    /// Push a nested stack (to run a deferred call) and make it active;
    /// returns the index of the stack that was active before the push, so
    /// the caller can restore it once the nested stack halts.
    pub fn push_nested_stack(&mut self, stack: Stack) -> usize {
        let previous = self.active_stack;
        self.stacks.push(stack);
        self.active_stack = self.stacks.len() - 1;
        previous
    }

    /// Pop the currently active stack (it must have halted) and resume the
    /// stack at `resume_index`.
    pub fn pop_nested_stack(&mut self, resume_index: usize) -> Stack {
        let popped = self.stacks.pop().expect("pop_nested_stack called with no nested stack");
        self.active_stack = resume_index;
        popped
    }

    #[must_use]
    pub fn has_nested_stacks(&self) -> bool {
        self.stacks.len() > 1
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.stacks.len() == 1 && self.active_stack().is_halted()
    }

    pub fn enqueue_message(&self, value: Value) {
        self.mailbox.lock().expect("mailbox mutex poisoned").push_back(value);
    }

    pub fn dequeue_message(&self) -> Option<Value> {
        self.mailbox.lock().expect("mailbox mutex poisoned").pop_front()
    }

    pub fn register_io_interaction(&mut self, handle: IoHandle) {
        self.io_interactions.insert(handle);
    }

    pub fn forget_io_interaction(&mut self, handle: IoHandle) -> bool {
        self.io_interactions.remove(&handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process() -> Process {
        Process::new(Pid::from_raw(1), MAIN_PRIORITY)
    }

    #[test]
    fn statics_are_materialised_lazily_and_shared_across_calls() {
        let mut p = process();
        let name = Atom::intern("f/0");
        p.statics_for(&name).bind(0, Value::Int64(1)).unwrap();
        assert_eq!(p.statics_for(&name).len(), crate::register_set::STATIC_REGISTER_SET_SIZE);
    }

    #[test]
    fn mailbox_is_fifo() {
        let p = process();
        p.enqueue_message(Value::Int64(1));
        p.enqueue_message(Value::Int64(2));
        assert!(matches!(p.dequeue_message(), Some(Value::Int64(1))));
        assert!(matches!(p.dequeue_message(), Some(Value::Int64(2))));
        assert!(p.dequeue_message().is_none());
    }

    #[test]
    fn nested_stack_push_pop_restores_active_index() {
        let mut p = process();
        assert!(!p.has_nested_stacks());
        let resume = p.push_nested_stack(Stack::new());
        assert!(p.has_nested_stacks());
        let _ = p.pop_nested_stack(resume);
        assert!(!p.has_nested_stacks());
    }
}
