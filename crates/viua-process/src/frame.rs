// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Call frames and deferred calls.

use viua_isa::RegisterAccess;
use viua_value::{Atom, FunctionRef};

use crate::register_set::RegisterSet;

/// A call registered by `DEFER`, to run when its owning frame returns or is
/// unwound, executed as a nested stack.
#[derive(Clone, Debug)]
pub struct DeferredCall {
    pub function: FunctionRef,
    pub arguments: RegisterSet,
}

/// An activation record for one function call.
#[derive(Clone, Debug)]
pub struct Frame {
    pub function_name: Atom,
    /// The module whose `.text` this frame's instruction pointer addresses.
    pub module: Atom,
    /// This frame's local register set, allocated by `ALLOCATE_REGISTERS`.
    pub locals: RegisterSet,
    /// The `arguments` register set the caller prepared for this call,
    /// visible here as `parameters`.
    pub parameters: RegisterSet,
    /// The `arguments` register set currently being prepared for the next
    /// call this frame will issue, if any (`FRAME n` allocates it).
    pub arguments: Option<RegisterSet>,
    pub return_address: usize,
    pub return_register: RegisterAccess,
    /// Calls registered by `DEFER`, executed LIFO on frame pop or unwind.
    pub deferred: Vec<DeferredCall>,
}

impl Frame {
    #[must_use]
    pub fn new(
        function_name: Atom,
        module: Atom,
        parameters: RegisterSet,
        return_address: usize,
        return_register: RegisterAccess,
    ) -> Self {
        Self {
            function_name,
            module,
            locals: RegisterSet::allocate(0),
            parameters,
            arguments: None,
            return_address,
            return_register,
            deferred: Vec::new(),
        }
    }

    /// Register a deferred call; deferred calls run LIFO, so push onto the
    /// end and pop from the end when unwinding or returning.
    pub fn defer(&mut self, function: FunctionRef, arguments: RegisterSet) {
        self.deferred.push(DeferredCall { function, arguments });
    }

    /// Take the deferred calls in the LIFO execution order they must run in.
    pub fn take_deferred_in_execution_order(&mut self) -> Vec<DeferredCall> {
        let mut calls = std::mem::take(&mut self.deferred);
        calls.reverse();
        calls
    }

    /// Begin preparing an `arguments` register set for the next call; only
    /// one may be in flight at a time (the "frame_new" balance invariant).
    pub fn open_arguments(&mut self, slots: usize) -> bool {
        if self.arguments.is_some() {
            return false;
        }
        self.arguments = Some(RegisterSet::allocate(slots));
        true
    }

    /// Take the prepared `arguments` set, if fully bound, for handoff to a
    /// new callee frame.
    pub fn take_arguments_if_ready(&mut self) -> Option<RegisterSet> {
        match &self.arguments {
            Some(args) if args.all_bound() => self.arguments.take(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viua_isa::{RegisterAccess, RegisterSet as Rs};
    use viua_value::Value;

    fn frame() -> Frame {
        Frame::new(
            Atom::intern("main/0"),
            Atom::intern("main"),
            RegisterSet::allocate(0),
            0,
            RegisterAccess::direct(Rs::Local, 0).unwrap(),
        )
    }

    #[test]
    fn only_one_arguments_frame_may_be_open() {
        let mut f = frame();
        assert!(f.open_arguments(2));
        assert!(!f.open_arguments(1));
    }

    #[test]
    fn arguments_are_not_ready_until_fully_bound() {
        let mut f = frame();
        f.open_arguments(1);
        assert!(f.take_arguments_if_ready().is_none());
        f.arguments.as_mut().unwrap().bind(0, Value::Int64(1)).unwrap();
        assert!(f.take_arguments_if_ready().is_some());
        assert!(f.arguments.is_none());
    }

    #[test]
    fn deferred_calls_run_lifo() {
        let mut f = frame();
        let fr = |n| FunctionRef { module: Atom::intern("m"), text_offset: n };
        f.defer(fr(1), RegisterSet::allocate(0));
        f.defer(fr(2), RegisterSet::allocate(0));
        f.defer(fr(3), RegisterSet::allocate(0));
        let order: Vec<u32> = f.take_deferred_in_execution_order().iter().map(|d| d.function.text_offset).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }
}
