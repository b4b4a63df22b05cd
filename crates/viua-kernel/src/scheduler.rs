// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The multi-threaded work-stealing process scheduler.
//!
//! Each worker owns a run queue of ready PIDs. A worker that runs dry steals
//! half of the most-loaded peer's queue once that peer exceeds the
//! configured overload threshold; pinned processes are never stolen. FFI and
//! I/O are handled by separate worker pools that drain a shared queue
//! instead of stealing, since those requests have no per-process affinity
//! worth preserving.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use viua_value::Pid;

use crate::config::{Config, OverloadThreshold};
use crate::tables::ProcessTable;

/// What a scheduler worker should do with a process after running one
/// quantum of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantumOutcome {
    /// Still runnable; put it back on a run queue.
    Requeue,
    /// Blocked on a message, join, I/O, or deferred call; do not requeue
    /// until something wakes it.
    Suspended,
    /// Its last stack halted; reap it.
    Finished,
}

/// Runs one instruction quantum of a process. Implemented by `viua-vm`; the
/// kernel only needs to know how to drive *a* process, not how bytecode
/// dispatch works.
pub trait Dispatcher: Send + Sync {
    fn run_quantum(&self, pid: Pid, processes: &ProcessTable) -> QuantumOutcome;
}

struct Worker {
    queue: Mutex<Vec<Pid>>,
}

impl Worker {
    fn new() -> Self {
        Self { queue: Mutex::new(Vec::new()) }
    }

    fn len(&self) -> usize {
        self.queue.lock().expect("run queue poisoned").len()
    }

    fn push(&self, pid: Pid) {
        self.queue.lock().expect("run queue poisoned").push(pid);
    }

    fn pop(&self) -> Option<Pid> {
        self.queue.lock().expect("run queue poisoned").pop()
    }

    /// Steal up to half of this worker's queue.
    fn steal_half(&self) -> Vec<Pid> {
        let mut queue = self.queue.lock().expect("run queue poisoned");
        let take = queue.len() / 2;
        let split_at = queue.len() - take;
        queue.split_off(split_at)
    }
}

/// A pool of process-scheduler worker threads sharing one process table.
pub struct Scheduler {
    workers: Vec<Arc<Worker>>,
    overload_threshold: OverloadThreshold,
    processes: Arc<ProcessTable>,
    pinned: Mutex<std::collections::HashSet<Pid>>,
    /// Processes a quantum suspended on (`RECEIVE`, `JOIN`). Nothing indexes
    /// *what* they are waiting for, so a worker going idle just retries all
    /// of them; a process not yet ready to proceed just re-suspends.
    suspended: Mutex<Vec<Pid>>,
    idle: Condvar,
    idle_lock: Mutex<()>,
    shutdown: AtomicBool,
}

impl Scheduler {
    #[must_use]
    pub fn new(config: &Config, processes: Arc<ProcessTable>) -> Self {
        let workers = (0..config.proc_schedulers.max(1)).map(|_| Arc::new(Worker::new())).collect();
        Self {
            workers,
            overload_threshold: config.overload_threshold,
            processes,
            pinned: Mutex::new(std::collections::HashSet::new()),
            suspended: Mutex::new(Vec::new()),
            idle: Condvar::new(),
            idle_lock: Mutex::new(()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Enqueue a freshly spawned process onto the shortest worker queue.
    pub fn schedule(&self, pid: Pid) {
        let worker = self.workers.iter().min_by_key(|w| w.len()).expect("at least one worker");
        worker.push(pid);
        drop(self.idle_lock.lock().expect("idle lock poisoned"));
        self.idle.notify_all();
    }

    pub fn pin(&self, pid: Pid) {
        self.pinned.lock().expect("pinned set poisoned").insert(pid);
    }

    fn is_pinned(&self, pid: Pid) -> bool {
        self.pinned.lock().expect("pinned set poisoned").contains(&pid)
    }

    /// Run worker threads to completion (every process finished and reaped)
    /// using `dispatcher` to execute each quantum. Blocks the calling thread.
    pub fn run_to_completion(&self, dispatcher: &dyn Dispatcher) {
        thread::scope(|scope| {
            for index in 0..self.workers.len() {
                scope.spawn(move || self.worker_loop(index, dispatcher));
            }
        });
    }

    pub fn shut_down(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.idle.notify_all();
    }

    fn worker_loop(&self, index: usize, dispatcher: &dyn Dispatcher) {
        let own = &self.workers[index];
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            self.requeue_suspended();
            let Some(pid) = own.pop().or_else(|| self.steal_for(index)) else {
                if self.processes.is_empty() {
                    return;
                }
                let guard = self.idle_lock.lock().expect("idle lock poisoned");
                let _ = self.idle.wait_timeout(guard, std::time::Duration::from_millis(5));
                continue;
            };

            match dispatcher.run_quantum(pid, &self.processes) {
                QuantumOutcome::Requeue => own.push(pid),
                QuantumOutcome::Suspended => self.suspended.lock().expect("suspended set poisoned").push(pid),
                QuantumOutcome::Finished => self.processes.reap(pid),
            }
        }
    }

    /// Move every process parked on `RECEIVE`/`JOIN` back onto a run queue
    /// for another attempt.
    fn requeue_suspended(&self) {
        let pending = std::mem::take(&mut *self.suspended.lock().expect("suspended set poisoned"));
        for pid in pending {
            self.schedule(pid);
        }
    }

    /// Steal from whichever peer is most overloaded relative to `own`,
    /// skipping pinned processes.
    fn steal_for(&self, own_index: usize) -> Option<Pid> {
        let own_len = self.workers[own_index].len();
        let (victim_index, victim_len) = self
            .workers
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != own_index)
            .map(|(i, w)| (i, w.len()))
            .max_by_key(|&(_, len)| len)?;

        if !self.overload_threshold.exceeded(own_len, victim_len) {
            return None;
        }

        let mut stolen = self.workers[victim_index].steal_half();
        stolen.retain(|&pid| !self.is_pinned(pid));
        let taken = stolen.pop();
        for pid in stolen {
            self.workers[own_index].push(pid);
        }
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    struct CountingDispatcher {
        remaining: AtomicUsize,
    }

    impl Dispatcher for CountingDispatcher {
        fn run_quantum(&self, _pid: Pid, _processes: &ProcessTable) -> QuantumOutcome {
            if self.remaining.fetch_sub(1, Ordering::SeqCst) <= 1 {
                QuantumOutcome::Finished
            } else {
                QuantumOutcome::Requeue
            }
        }
    }

    #[test]
    fn single_worker_drains_its_queue() {
        let processes = Arc::new(ProcessTable::new());
        let (pid, _) = processes.spawn(16);
        let config = Config {
            proc_schedulers: 1,
            ffi_schedulers: 1,
            io_schedulers: 1,
            overload_threshold: OverloadThreshold::DEFAULT,
            enable_tracing: false,
            stack_traces: false,
            stacktrace_serialisation: crate::config::StacktraceSerialisation::Human,
            stacktrace_print_to: crate::config::StacktraceSink::Stderr,
        };
        let scheduler = Scheduler::new(&config, processes.clone());
        scheduler.schedule(pid);
        let dispatcher = CountingDispatcher { remaining: AtomicUsize::new(3) };
        scheduler.run_to_completion(&dispatcher);
        assert!(!processes.is_alive(pid));
    }

    #[test]
    fn a_suspended_process_is_retried_until_it_finishes() {
        struct SuspendOnceDispatcher {
            suspended_once: AtomicBool,
        }

        impl Dispatcher for SuspendOnceDispatcher {
            fn run_quantum(&self, _pid: Pid, _processes: &ProcessTable) -> QuantumOutcome {
                if self.suspended_once.swap(true, Ordering::SeqCst) {
                    QuantumOutcome::Finished
                } else {
                    QuantumOutcome::Suspended
                }
            }
        }

        let processes = Arc::new(ProcessTable::new());
        let (pid, _) = processes.spawn(16);
        let config = Config {
            proc_schedulers: 1,
            ffi_schedulers: 1,
            io_schedulers: 1,
            overload_threshold: OverloadThreshold::DEFAULT,
            enable_tracing: false,
            stack_traces: false,
            stacktrace_serialisation: crate::config::StacktraceSerialisation::Human,
            stacktrace_print_to: crate::config::StacktraceSink::Stderr,
        };
        let scheduler = Scheduler::new(&config, processes.clone());
        scheduler.schedule(pid);
        let dispatcher = SuspendOnceDispatcher { suspended_once: AtomicBool::new(false) };
        scheduler.run_to_completion(&dispatcher);
        assert!(!processes.is_alive(pid));
    }

    #[test]
    fn pinned_process_is_never_selected_by_steal() {
        let processes = Arc::new(ProcessTable::new());
        let config = Config {
            proc_schedulers: 2,
            ffi_schedulers: 1,
            io_schedulers: 1,
            overload_threshold: OverloadThreshold::DEFAULT,
            enable_tracing: false,
            stack_traces: false,
            stacktrace_serialisation: crate::config::StacktraceSerialisation::Human,
            stacktrace_print_to: crate::config::StacktraceSink::Stderr,
        };
        let scheduler = Scheduler::new(&config, processes);
        let (pid, _) = scheduler.processes.spawn(16);
        scheduler.pin(pid);
        scheduler.workers[0].push(pid);
        // force an overload gap so worker 1 would want to steal
        for _ in 0..10 {
            let (extra, _) = scheduler.processes.spawn(16);
            scheduler.workers[0].push(extra);
        }
        let stolen = scheduler.steal_for(1);
        assert_ne!(stolen, Some(pid));
    }
}
