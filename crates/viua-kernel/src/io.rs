// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! I/O: a shared request queue an I/O scheduler pool drains, and the
//! interaction-handle table that tracks which process owns which in-flight
//! interaction so `IO_CANCEL`/`IO_WAIT` can find it.

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use viua_value::{IoHandle, Pid, Value};

use crate::error::KernelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
}

pub struct IoRequest {
    pub handle: IoHandle,
    pub owner: Pid,
    pub op: IoOp,
    /// The descriptor this request targets: 0 for stdin, 1 for stdout, 2 for
    /// stderr. The instruction set has no `OPEN`, so these are the only
    /// values an I/O scheduler thread ever has to handle.
    pub fd: i64,
    pub payload: Value,
}

pub enum IoOutcome {
    Completed(Value),
    Failed(String),
    Cancelled,
}

#[derive(Default)]
pub struct IoTable {
    next_sequence: AtomicU64,
    pending: Mutex<Vec<IoRequest>>,
    owners: RwLock<HashMap<IoHandle, Pid>>,
    outcomes: Mutex<HashMap<IoHandle, IoOutcome>>,
}

impl IoTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, scheduler_id: u32, owner: Pid, op: IoOp, fd: i64, payload: Value) -> IoHandle {
        let handle = IoHandle { scheduler_id, sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed) };
        self.owners.write().expect("io owner table poisoned").insert(handle, owner);
        self.pending.lock().expect("io queue poisoned").push(IoRequest { handle, owner, op, fd, payload });
        handle
    }

    pub fn take(&self) -> Option<IoRequest> {
        let mut pending = self.pending.lock().expect("io queue poisoned");
        if pending.is_empty() {
            None
        } else {
            Some(pending.remove(0))
        }
    }

    pub fn complete(&self, handle: IoHandle, outcome: IoOutcome) {
        self.outcomes.lock().expect("io outcome table poisoned").insert(handle, outcome);
    }

    pub fn take_outcome(&self, handle: IoHandle) -> Option<IoOutcome> {
        self.outcomes.lock().expect("io outcome table poisoned").remove(&handle)
    }

    pub fn cancel(&self, handle: IoHandle, requester: Pid) -> Result<(), KernelError> {
        let owner = *self
            .owners
            .read()
            .expect("io owner table poisoned")
            .get(&handle)
            .ok_or(KernelError::UnknownIoInteraction(handle.sequence))?;
        if owner != requester {
            return Err(KernelError::UnknownIoInteraction(handle.sequence));
        }
        self.pending.lock().expect("io queue poisoned").retain(|r| r.handle != handle);
        self.outcomes.lock().expect("io outcome table poisoned").insert(handle, IoOutcome::Cancelled);
        Ok(())
    }

    pub fn close(&self, handle: IoHandle) {
        self.owners.write().expect("io owner table poisoned").remove(&handle);
        self.outcomes.lock().expect("io outcome table poisoned").remove(&handle);
    }
}

/// Perform one request against a real descriptor, synchronously. An I/O
/// scheduler thread calls this after draining `IoTable::take()` and deposits
/// the result with `complete()`.
#[must_use]
pub fn perform(request: &IoRequest) -> IoOutcome {
    match (request.op, request.fd) {
        (IoOp::Read, 0) => {
            let mut line = String::new();
            match std::io::stdin().read_line(&mut line) {
                Ok(0) => IoOutcome::Failed("end of file".to_string()),
                Ok(_) => IoOutcome::Completed(Value::StringV(Arc::new(line.trim_end_matches('\n').to_string()))),
                Err(e) => IoOutcome::Failed(e.to_string()),
            }
        }
        (IoOp::Write, 1 | 2) => {
            let text = request.payload.to_string();
            let result = if request.fd == 1 { std::io::stdout().write_all(text.as_bytes()) } else { std::io::stderr().write_all(text.as_bytes()) };
            match result {
                Ok(()) => IoOutcome::Completed(Value::Int64(text.len() as i64)),
                Err(e) => IoOutcome::Failed(e.to_string()),
            }
        }
        _ => IoOutcome::Failed(format!("unsupported descriptor {}", request.fd)),
    }
}

/// Drain and perform one pending request against `table`, if there is one.
/// Returns whether there was work to do - an I/O scheduler thread polls this
/// in a loop, sleeping between empty polls.
pub fn drain_one(table: &IoTable) -> bool {
    let Some(request) = table.take() else { return false };
    let outcome = perform(&request);
    table.complete(request.handle, outcome);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_then_take_round_trips() {
        let table = IoTable::new();
        let handle = table.submit(0, Pid::from_raw(1), IoOp::Read, 0, Value::Void);
        let request = table.take().unwrap();
        assert_eq!(request.handle, handle);
        assert!(table.take().is_none());
    }

    #[test]
    fn cancel_by_non_owner_is_rejected() {
        let table = IoTable::new();
        let handle = table.submit(0, Pid::from_raw(1), IoOp::Read, 0, Value::Void);
        assert!(table.cancel(handle, Pid::from_raw(2)).is_err());
    }

    #[test]
    fn cancel_by_owner_removes_the_pending_request() {
        let table = IoTable::new();
        let handle = table.submit(0, Pid::from_raw(1), IoOp::Write, 1, Value::Void);
        table.cancel(handle, Pid::from_raw(1)).unwrap();
        assert!(table.take().is_none());
        assert!(matches!(table.take_outcome(handle), Some(IoOutcome::Cancelled)));
    }

    #[test]
    fn drain_one_writes_to_stdout_and_completes() {
        let table = IoTable::new();
        let handle = table.submit(0, Pid::from_raw(1), IoOp::Write, 1, Value::StringV(Arc::new("hi".to_string())));
        assert!(drain_one(&table));
        assert!(matches!(table.take_outcome(handle), Some(IoOutcome::Completed(Value::Int64(2)))));
        assert!(!drain_one(&table));
    }

    #[test]
    fn unsupported_descriptor_fails_the_request() {
        let request = IoRequest { handle: IoHandle { scheduler_id: 0, sequence: 0 }, owner: Pid::from_raw(1), op: IoOp::Write, fd: 9, payload: Value::Void };
        assert!(matches!(perform(&request), IoOutcome::Failed(_)));
    }
}
