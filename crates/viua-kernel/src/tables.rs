// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The kernel's authoritative tables: the process table, the mailbox lookup
//! table (so a `SEND` to a PID not resident on the sending thread can still
//! find a queue to push into), and the result-slot table `JOIN` reads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use viua_elf::Module;
use viua_process::{Mailbox, Process};
use viua_value::{Atom, Pid, PidGenerator, Value};

use crate::error::KernelError;

/// Owns every process, keyed by PID. A `RwLock` because lookups (by
/// scheduler workers checking suspension state, by `SEND` resolving a
/// mailbox) vastly outnumber structural changes (spawn, reap).
#[derive(Default)]
pub struct ProcessTable {
    processes: RwLock<HashMap<Pid, Arc<Mutex<Process>>>>,
    mailboxes: RwLock<HashMap<Pid, Mailbox>>,
    results: Mutex<HashMap<Pid, Value>>,
    pids: PidGenerator,
}

impl ProcessTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a PID, register a fresh process under it, and return both.
    pub fn spawn(&self, priority: u32) -> (Pid, Arc<Mutex<Process>>) {
        let pid = self.pids.next();
        let process = Process::new(pid, priority);
        let mailbox = process.mailbox.clone();
        let handle = Arc::new(Mutex::new(process));
        self.processes.write().expect("process table poisoned").insert(pid, handle.clone());
        self.mailboxes.write().expect("mailbox table poisoned").insert(pid, mailbox);
        (pid, handle)
    }

    pub fn get(&self, pid: Pid) -> Result<Arc<Mutex<Process>>, KernelError> {
        self.processes
            .read()
            .expect("process table poisoned")
            .get(&pid)
            .cloned()
            .ok_or(KernelError::NoSuchProcess(pid))
    }

    /// Drop a finished process's table entry. Its mailbox and result slot
    /// outlive it so a late `SEND` or `JOIN` still resolves.
    pub fn reap(&self, pid: Pid) {
        self.processes.write().expect("process table poisoned").remove(&pid);
    }

    pub fn send(&self, target: Pid, value: Value) -> Result<(), KernelError> {
        let mailbox = self
            .mailboxes
            .read()
            .expect("mailbox table poisoned")
            .get(&target)
            .cloned()
            .ok_or(KernelError::NoSuchProcess(target))?;
        mailbox.lock().expect("mailbox mutex poisoned").push_back(value);
        Ok(())
    }

    pub fn deposit_result(&self, pid: Pid, value: Value) {
        self.results.lock().expect("result table poisoned").insert(pid, value);
    }

    pub fn take_result(&self, pid: Pid) -> Option<Value> {
        self.results.lock().expect("result table poisoned").remove(&pid)
    }

    #[must_use]
    pub fn is_alive(&self, pid: Pid) -> bool {
        self.processes.read().expect("process table poisoned").contains_key(&pid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.processes.read().expect("process table poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Loaded modules, keyed by module name.
#[derive(Default)]
pub struct ModuleTable {
    modules: RwLock<HashMap<Atom, Arc<Module>>>,
}

impl ModuleTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, name: Atom, module: Module) {
        self.modules.write().expect("module table poisoned").insert(name, Arc::new(module));
    }

    pub fn get(&self, name: &Atom) -> Result<Arc<Module>, KernelError> {
        self.modules
            .read()
            .expect("module table poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| KernelError::NoSuchModule(name.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_then_get_round_trips() {
        let table = ProcessTable::new();
        let (pid, _) = table.spawn(16);
        assert!(table.get(pid).is_ok());
        assert!(table.is_alive(pid));
    }

    #[test]
    fn reap_removes_from_table_but_leaves_results_readable() {
        let table = ProcessTable::new();
        let (pid, _) = table.spawn(16);
        table.deposit_result(pid, Value::Int64(42));
        table.reap(pid);
        assert!(!table.is_alive(pid));
        assert!(matches!(table.take_result(pid), Some(Value::Int64(42))));
    }

    #[test]
    fn send_to_unknown_pid_is_an_error() {
        let table = ProcessTable::new();
        assert!(table.send(Pid::from_raw(999), Value::Void).is_err());
    }

    #[test]
    fn send_reaches_the_mailbox_of_a_spawned_process() {
        let table = ProcessTable::new();
        let (pid, process) = table.spawn(16);
        table.send(pid, Value::Int64(7)).unwrap();
        let got = process.lock().unwrap().dequeue_message();
        assert!(matches!(got, Some(Value::Int64(7))));
    }
}
