// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! FFI: a table of host-implemented functions a process calls through, and
//! the shared request queue the FFI scheduler pool drains.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use viua_value::{Atom, Pid, Value};

use crate::error::KernelError;

/// A host-implemented FFI function. Receives the caller's argument values
/// and produces a result or a call-site error message.
pub type FfiFn = fn(&[Value]) -> Result<Value, String>;

#[derive(Default)]
pub struct FfiTable {
    functions: RwLock<HashMap<Atom, FfiFn>>,
}

impl FfiTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: Atom, f: FfiFn) {
        self.functions.write().expect("ffi table poisoned").insert(name, f);
    }

    pub fn call(&self, name: &Atom, args: &[Value]) -> Result<Value, KernelError> {
        let f = *self
            .functions
            .read()
            .expect("ffi table poisoned")
            .get(name)
            .ok_or_else(|| KernelError::NoSuchFfiFunction(name.as_str().to_string()))?;
        f(args).map_err(|e| KernelError::FfiCallFailed(name.as_str().to_string(), e))
    }
}

/// A pending FFI call, queued by a process scheduler and drained by an FFI
/// scheduler thread. The result is deposited back through the process table
/// and the caller is woken by clearing its suspension.
pub struct FfiRequest {
    pub caller: Pid,
    pub function: Atom,
    pub arguments: Vec<Value>,
}

/// What came back from running a queued [`FfiRequest`].
pub enum FfiOutcome {
    Completed(Value),
    Failed(String),
}

#[derive(Default)]
pub struct FfiQueue {
    pending: Mutex<Vec<FfiRequest>>,
    /// Keyed by caller: a process has at most one `CALL`/`TAILCALL` in
    /// flight against an FFI function at a time.
    outcomes: Mutex<HashMap<Pid, FfiOutcome>>,
}

impl FfiQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, request: FfiRequest) {
        self.pending.lock().expect("ffi queue poisoned").push(request);
    }

    /// Pop the oldest pending request, if any.
    pub fn take(&self) -> Option<FfiRequest> {
        let mut pending = self.pending.lock().expect("ffi queue poisoned");
        if pending.is_empty() {
            None
        } else {
            Some(pending.remove(0))
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().expect("ffi queue poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn complete(&self, caller: Pid, outcome: FfiOutcome) {
        self.outcomes.lock().expect("ffi outcome table poisoned").insert(caller, outcome);
    }

    pub fn take_outcome(&self, caller: Pid) -> Option<FfiOutcome> {
        self.outcomes.lock().expect("ffi outcome table poisoned").remove(&caller)
    }
}

/// Drain and run one pending request against `table`, if there is one.
/// Returns whether there was work to do - an FFI scheduler thread polls this
/// in a loop, sleeping between empty polls.
pub fn drain_one(queue: &FfiQueue, table: &FfiTable) -> bool {
    let Some(request) = queue.take() else { return false };
    let outcome = match table.call(&request.function, &request.arguments) {
        Ok(value) => FfiOutcome::Completed(value),
        Err(e) => FfiOutcome::Failed(e.to_string()),
    };
    queue.complete(request.caller, outcome);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double(args: &[Value]) -> Result<Value, String> {
        match args {
            [Value::Int64(n)] => Ok(Value::Int64(n * 2)),
            _ => Err("expected one integer argument".to_string()),
        }
    }

    #[test]
    fn registered_function_is_callable_by_name() {
        let table = FfiTable::new();
        table.register(Atom::intern("double/1"), double);
        let result = table.call(&Atom::intern("double/1"), &[Value::Int64(21)]).unwrap();
        assert!(matches!(result, Value::Int64(42)));
    }

    #[test]
    fn unknown_function_is_an_error() {
        let table = FfiTable::new();
        assert!(table.call(&Atom::intern("missing/0"), &[]).is_err());
    }

    #[test]
    fn queue_drains_fifo() {
        let queue = FfiQueue::new();
        queue.submit(FfiRequest { caller: Pid::from_raw(1), function: Atom::intern("a"), arguments: vec![] });
        queue.submit(FfiRequest { caller: Pid::from_raw(2), function: Atom::intern("b"), arguments: vec![] });
        assert_eq!(queue.take().unwrap().caller, Pid::from_raw(1));
        assert_eq!(queue.take().unwrap().caller, Pid::from_raw(2));
        assert!(queue.take().is_none());
    }

    #[test]
    fn drain_one_deposits_the_outcome_under_the_caller() {
        let table = FfiTable::new();
        table.register(Atom::intern("double/1"), double);
        let queue = FfiQueue::new();
        queue.submit(FfiRequest { caller: Pid::from_raw(7), function: Atom::intern("double/1"), arguments: vec![Value::Int64(21)] });

        assert!(drain_one(&queue, &table));
        assert!(matches!(queue.take_outcome(Pid::from_raw(7)), Some(FfiOutcome::Completed(Value::Int64(42)))));
        assert!(!drain_one(&queue, &table));
    }

    #[test]
    fn drain_one_deposits_a_failure_outcome() {
        let table = FfiTable::new();
        let queue = FfiQueue::new();
        queue.submit(FfiRequest { caller: Pid::from_raw(1), function: Atom::intern("missing/0"), arguments: vec![] });

        assert!(drain_one(&queue, &table));
        assert!(matches!(queue.take_outcome(Pid::from_raw(1)), Some(FfiOutcome::Failed(_))));
    }
}
