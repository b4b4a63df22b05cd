// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The dispatch loop: decodes one instruction at a time off the active
//! process's active stack and drives it to completion or suspension.
//!
//! Calls, returns, exception unwinding, deferred calls and the watchdog are
//! handled here rather than in `step`, since all of them push or pop a
//! frame or a whole nested stack - state `RegisterFile` alone can't reach.
//!
//! `CALL`/`TAILCALL` against an FFI function and `IO_READ`/`IO_WRITE` never
//! touch the host synchronously from the calling quantum: they submit to
//! [`viua_kernel::FfiQueue`]/[`viua_kernel::IoTable`] and suspend
//! (`Suspension::AwaitingFfi`/`AwaitingIo`) the same way `RECEIVE`/`JOIN` do,
//! and `Executor::run_to_completion` drains those queues from its own FFI
//! and I/O scheduler pools, sized by `Config::ffi_schedulers`/
//! `io_schedulers`. `IO_WRITE`'s external contract is fire-and-forget - it
//! returns a handle without suspending - so only the syscall itself moves to
//! the pool; `IO_READ` blocks the caller until the pool deposits an outcome.
//! `IO_READ` addresses a small set of well-known descriptors
//! (stdin/stdout/stderr) rather than an opened-handle table, since the
//! instruction set has no `OPEN`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use viua_elf::Module;
use viua_isa::{Instruction, RegisterAccess};
use viua_kernel::{ffi, io, Config, FfiOutcome, FfiQueue, FfiRequest, FfiTable, IoOp, IoOutcome, IoTable, ModuleTable, ProcessTable, QuantumOutcome, Scheduler};
use viua_process::{Process, Stack, StackState, Suspension, TryFrame, MAIN_PRIORITY, SPAWNED_PRIORITY};
use viua_value::{Atom, Exception, FunctionRef, IoHandle, Pid, TypeTag, Value};

use crate::calls::{self, Callable};
use crate::error::RuntimeError;
use crate::memory;
use crate::registers::RegisterFile;
use crate::step;

/// What one call to [`Executor::step_once`] accomplished.
enum StepOutcome {
    Ran,
    /// A greedy instruction ran; does not consume the quantum budget.
    Greedy,
    Suspend(Suspension),
}

/// Drives processes registered in a [`ProcessTable`] against modules
/// registered in a [`ModuleTable`], offloading FFI calls to an
/// [`FfiTable`] and I/O interactions to an [`IoTable`].
pub struct Executor {
    pub modules: Arc<ModuleTable>,
    pub processes: Arc<ProcessTable>,
    pub ffi: Arc<FfiTable>,
    pub io: Arc<IoTable>,
    pub scheduler: Arc<Scheduler>,
    /// Exception-type inheritance: child -> parent, consulted by the
    /// unwinder when a try-frame has no exact-match catcher.
    pub ancestors: HashMap<Atom, Atom>,
    /// Stack traces captured the instant a process's active stack ran out
    /// of frames with an exception still in flight. Kept here rather than
    /// on `Process` so a reap doesn't discard it before a caller reads it.
    traces: std::sync::Mutex<HashMap<Pid, crate::trace::Stacktrace>>,
    /// FFI calls queued by `do_call` and drained by `ffi_worker_loop`.
    ffi_queue: Arc<FfiQueue>,
    /// Callers with an FFI call already submitted, so a retried `CALL`
    /// doesn't re-take the frame's arguments or submit a second request.
    ffi_inflight: std::sync::Mutex<HashSet<Pid>>,
    /// Callers with an `IO_READ` already submitted, keyed to the handle so a
    /// retry can poll the same interaction.
    io_inflight: std::sync::Mutex<HashMap<Pid, IoHandle>>,
    ffi_schedulers: usize,
    io_schedulers: usize,
}

impl Executor {
    #[must_use]
    pub fn new(modules: Arc<ModuleTable>, processes: Arc<ProcessTable>, ffi: Arc<FfiTable>, io: Arc<IoTable>, scheduler: Arc<Scheduler>, config: &Config) -> Self {
        Self {
            modules,
            processes,
            ffi,
            io,
            scheduler,
            ancestors: HashMap::new(),
            traces: std::sync::Mutex::new(HashMap::new()),
            ffi_queue: Arc::new(FfiQueue::new()),
            ffi_inflight: std::sync::Mutex::new(HashSet::new()),
            io_inflight: std::sync::Mutex::new(HashMap::new()),
            ffi_schedulers: config.ffi_schedulers,
            io_schedulers: config.io_schedulers,
        }
    }

    /// Run every process, FFI, and I/O scheduler thread to completion. FFI
    /// and I/O workers poll their shared queues until every process has
    /// finished and been reaped, then stop.
    pub fn run_to_completion(&self) {
        let shutdown = AtomicBool::new(false);
        std::thread::scope(|scope| {
            for _ in 0..self.ffi_schedulers {
                scope.spawn(|| self.ffi_worker_loop(&shutdown));
            }
            for _ in 0..self.io_schedulers {
                scope.spawn(|| self.io_worker_loop(&shutdown));
            }
            self.scheduler.run_to_completion(self);
            shutdown.store(true, Ordering::SeqCst);
        });
    }

    fn ffi_worker_loop(&self, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::SeqCst) {
            if !ffi::drain_one(&self.ffi_queue, &self.ffi) {
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
        }
    }

    fn io_worker_loop(&self, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::SeqCst) {
            if !io::drain_one(&self.io) {
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
        }
    }

    /// Take the stack trace captured for `pid`'s main stack running out of
    /// catchers, if its last quantum ended that way.
    pub fn take_trace(&self, pid: Pid) -> Option<crate::trace::Stacktrace> {
        self.traces.lock().expect("trace table poisoned").remove(&pid)
    }

    pub fn register_ancestor(&mut self, child: Atom, parent: Atom) {
        self.ancestors.insert(child, parent);
    }

    /// Spawn the entry process for `module`'s exported entry point, with
    /// `args` bound as its `parameters` set, and schedule it to run.
    pub fn spawn_main(&self, module_name: &Atom, args: Vec<Value>) -> Result<Pid, RuntimeError> {
        let module = self.modules.get(module_name).map_err(|_| RuntimeError::UnresolvedSymbol)?;
        let entry = module.entry_point().ok_or(RuntimeError::UnresolvedSymbol)?;
        let text_offset = entry.value.ok_or(RuntimeError::UnresolvedSymbol)? as u32;

        let (pid, handle) = self.processes.spawn(MAIN_PRIORITY);
        let mut process = handle.lock().expect("process mutex poisoned");
        let mut parameters = viua_process::RegisterSet::allocate(args.len());
        for (i, value) in args.into_iter().enumerate() {
            let _ = parameters.bind(i as u16, value);
        }
        let frame = calls::build_frame(
            FunctionRef { module: module_name.clone(), text_offset },
            &module,
            parameters,
            usize::MAX,
            RegisterAccess::VOID,
        );
        let stack = process.active_stack_mut();
        stack.push_frame(frame).map_err(|_| RuntimeError::StackOverflow)?;
        stack.ip = text_offset as usize;
        drop(process);
        self.scheduler.schedule(pid);
        Ok(pid)
    }

    fn current_module(&self, process: &mut Process) -> Result<Arc<Module>, RuntimeError> {
        let name = process.active_stack().active_frame().map(|f| f.module.clone()).ok_or(RuntimeError::NoActiveFrame)?;
        self.modules.get(&name).map_err(|_| RuntimeError::UnresolvedSymbol)
    }

    /// Run a nested stack (pushed for a deferred call or the watchdog) to
    /// completion. Never spans a scheduler quantum: a blocking instruction
    /// encountered inside escapes as a synthetic `DeferredSuspension`
    /// exception rather than truly suspending the process, since nested
    /// stacks have no suspension slot of their own to resume into later.
    fn drive_stack_to_halt(&self, process: &mut Process) -> Value {
        loop {
            if process.active_stack().is_halted() {
                let stack = process.active_stack_mut();
                return stack.return_value.take().or_else(|| stack.thrown.take()).unwrap_or(Value::Void);
            }
            match self.step_once(process) {
                Ok(StepOutcome::Suspend(_)) => {
                    let exception = Value::Exception(Arc::new(Exception {
                        kind: Atom::intern("DeferredSuspension"),
                        payload: Box::new(Value::Void),
                    }));
                    process.active_stack_mut().thrown = Some(exception.clone());
                    self.unwind(process);
                    if process.active_stack().is_halted() {
                        return exception;
                    }
                }
                Ok(_) => {}
                Err(_) => {
                    // an internal error inside a deferred/watchdog body ends
                    // that nested stack rather than propagating further.
                    process.active_stack_mut().state = StackState::Halted;
                }
            }
        }
    }

    /// Push `deferred` calls as nested stacks, in their LIFO execution
    /// order, and run each to completion before starting the next.
    fn run_deferred(&self, process: &mut Process, deferred: Vec<viua_process::DeferredCall>, state: StackState) {
        for call in deferred {
            let Ok(module) = self.modules.get(&call.function.module) else { continue };
            let text_offset = call.function.text_offset;
            let frame = calls::build_frame(call.function, &module, call.arguments, 0, RegisterAccess::VOID);
            let mut stack = Stack::new();
            stack.state = state;
            let _ = stack.push_frame(frame);
            stack.ip = text_offset as usize;
            let resume = process.push_nested_stack(stack);
            let _ = self.drive_stack_to_halt(process);
            let _ = process.pop_nested_stack(resume);
        }
    }

    /// Run a process's registered watchdog, if any, with the uncaught
    /// `exception`. Returns `true` if the watchdog ran (whether or not it
    /// itself raised).
    fn run_watchdog(&self, process: &mut Process, exception: Value) -> bool {
        let Some(watchdog) = process.watchdog.clone() else { return false };
        let current_module = process.active_stack().active_frame().map(|f| f.module.clone());
        let module_name = current_module.unwrap_or_else(|| watchdog.clone());
        let Ok(module) = self.modules.get(&module_name) else { return false };
        let Some(symbol) = module.symbol(watchdog.as_str()) else { return false };
        let Some(text_offset) = symbol.value else { return false };

        let mut parameters = viua_process::RegisterSet::allocate(1);
        let _ = parameters.bind(0, exception);
        let frame = calls::build_frame(
            FunctionRef { module: module_name.clone(), text_offset: text_offset as u32 },
            &module,
            parameters,
            0,
            RegisterAccess::VOID,
        );
        let mut stack = Stack::new();
        let _ = stack.push_frame(frame);
        stack.ip = text_offset as usize;
        let resume = process.push_nested_stack(stack);
        let result = self.drive_stack_to_halt(process);
        let _ = process.pop_nested_stack(resume);
        process.active_stack_mut().return_value = Some(result);
        true
    }

    /// Unwind the active stack looking for a catcher, running each popped
    /// frame's deferred calls along the way. Falls back to the watchdog and
    /// then to terminating the process (leaving the thrown value in the
    /// stack's `thrown` slot) if nothing catches.
    fn unwind(&self, process: &mut Process) {
        // captured lazily the first time a catcher search comes up empty;
        // holds the fullest surviving snapshot of the stack, since later
        // iterations only ever have fewer frames left to show.
        let mut pending_trace: Option<crate::trace::Stacktrace> = None;

        loop {
            let exception_kind = match process.active_stack().thrown.as_ref() {
                Some(Value::Exception(e)) => e.kind.clone(),
                Some(_) | None => Atom::intern("Exception"),
            };
            let catch = crate::unwind::find_catcher(process.active_stack(), &exception_kind, &self.ancestors);

            if let Some(catch) = catch {
                while process.active_stack().depth() > catch.frame_depth {
                    let popped = process.active_stack_mut().pop_frame();
                    if let Some(mut frame) = popped {
                        let deferred = frame.take_deferred_in_execution_order();
                        self.run_deferred(process, deferred, StackState::SuspendedByDeferredDuringUnwind);
                    }
                }
                let stack = process.active_stack_mut();
                stack.ip = catch.handler_address;
                stack.state = StackState::Running;
                return;
            }

            let exception = process.active_stack().thrown.clone().unwrap_or(Value::Void);
            if pending_trace.is_none() {
                pending_trace = Some(crate::trace::capture(process.active_stack(), exception.clone()));
            }

            let Some(mut frame) = process.active_stack_mut().pop_frame() else {
                // nothing left to pop and no catcher found: terminate, unless
                // a watchdog intercepts and replaces the result.
                process.active_stack_mut().state = StackState::Halted;
                if self.run_watchdog(process, exception) {
                    return;
                }
                if let Some(trace) = pending_trace {
                    self.traces.lock().expect("trace table poisoned").insert(process.pid, trace);
                }
                return;
            };
            let deferred = frame.take_deferred_in_execution_order();
            self.run_deferred(process, deferred, StackState::SuspendedByDeferredDuringUnwind);
        }
    }

    /// Convert a per-instruction [`RuntimeError`] into a thrown exception
    /// and begin unwinding for it.
    fn raise(&self, process: &mut Process, error: RuntimeError) {
        let exception = Value::Exception(Arc::new(Exception {
            kind: Atom::intern("RuntimeError"),
            payload: Box::new(Value::StringV(Arc::new(error.to_string()))),
        }));
        process.active_stack_mut().thrown = Some(exception);
        self.unwind(process);
    }

    fn step_once(&self, process: &mut Process) -> Result<StepOutcome, RuntimeError> {
        let module = self.current_module(process)?;
        let ip = process.active_stack().ip;
        let word = *module.text.get(ip).ok_or(RuntimeError::InvalidBytecodeAddress { address: ip })?;
        let (instr, greedy) = Instruction::decode(word).map_err(RuntimeError::Undecodable)?;

        let outcome = self.dispatch(process, &module, instr)?;

        // a suspended instruction (RECEIVE with an empty mailbox, JOIN on a
        // still-alive target, ...) hasn't run yet in any meaningful sense;
        // leave `ip` where it is so the scheduler re-enters on the same
        // instruction once the process is woken up.
        if matches!(outcome, StepOutcome::Suspend(_)) {
            return Ok(outcome);
        }

        // instructions that explicitly manage `ip` (branches, calls,
        // returns, frame open/close) signal so by having already moved it;
        // anything else advances by one word.
        if process.active_stack().ip == ip && !matches!(instr, Instruction::Halt) {
            process.active_stack_mut().ip = ip + 1;
        }

        Ok(if greedy { StepOutcome::Greedy } else { outcome })
    }

    #[allow(clippy::too_many_lines)]
    fn dispatch(&self, process: &mut Process, module: &Arc<Module>, instr: Instruction) -> Result<StepOutcome, RuntimeError> {
        use Instruction as I;

        match instr {
            I::Nop => {}
            I::Halt => {
                process.active_stack_mut().state = StackState::Halted;
            }
            I::Try => {
                let depth = process.active_stack().depth();
                process.active_stack_mut().install_try_frame(TryFrame::new(depth.saturating_sub(1)));
            }
            I::Catch { exception_type, handler_offset } => {
                let name = self.with_regs(process, |regs| regs.read(exception_type))?;
                let name = match name {
                    Value::Atom(a) => a,
                    other => return Err(RuntimeError::InvalidType { expected: TypeTag::Atom, found: other.type_tag() }),
                };
                let ip = process.active_stack().ip;
                let handler = (ip as i64 + i64::from(handler_offset)) as usize;
                let stack = process.active_stack_mut();
                if let Some(tf) = stack.pop_try_frame() {
                    let mut tf = tf;
                    tf.install(name, handler);
                    stack.install_try_frame(tf);
                } else {
                    let depth = stack.depth();
                    let mut tf = TryFrame::new(depth.saturating_sub(1));
                    tf.install(name, handler);
                    stack.install_try_frame(tf);
                }
            }
            I::Enter => {
                let stack = process.active_stack_mut();
                stack.caught = stack.thrown.take();
            }
            I::Leave => {
                process.active_stack_mut().pop_try_frame();
            }
            I::Draw { out } => {
                let value = process.active_stack_mut().caught.take().unwrap_or(Value::Void);
                self.with_regs(process, |regs| regs.write(out, value))?;
            }
            I::Throw { value } => {
                let thrown = self.with_regs(process, |regs| regs.take(value))?;
                process.active_stack_mut().thrown = Some(thrown);
                self.unwind(process);
                return Ok(StepOutcome::Ran);
            }
            I::Return { value } => {
                let returned = self.with_regs(process, |regs| regs.take(value))?;
                self.do_return(process, returned);
                return Ok(StepOutcome::Ran);
            }

            I::PtrLive { reg } => self.with_regs(process, |regs| step::ptr_live(regs, reg))?,
            I::Delete { reg } => self.with_regs(process, |regs| step::delete(regs, reg))?,
            I::Vector { out } => self.with_regs(process, |regs| step::new_vector(regs, out))?,
            I::Struct { out } => self.with_regs(process, |regs| step::new_struct(regs, out))?,
            I::Move { out, input } => self.with_regs(process, |regs| step::mv(regs, out, input))?,
            I::Copy { out, input } => self.with_regs(process, |regs| step::cp(regs, out, input))?,
            I::Ptr { out, input } => {
                let owner = process.pid;
                self.with_regs(process, |regs| step::ptr(regs, out, input, owner))?;
            }
            I::Swap { a, b } => self.with_regs(process, |regs| step::swap(regs, a, b))?,
            I::IsNull { out, input } => self.with_regs(process, |regs| step::is_null(regs, out, input))?,
            I::VLen { out, vector } => self.with_regs(process, |regs| step::vlen(regs, out, vector))?,
            I::StructKeys { out, structure } => self.with_regs(process, |regs| step::struct_keys(regs, out, structure))?,
            I::VPush { vector, value } => self.with_regs(process, |regs| step::vpush(regs, vector, value))?,
            I::VInsert { vector, value, index } => self.with_regs(process, |regs| step::vinsert(regs, vector, value, index))?,
            I::VPop { out, vector, index } => self.with_regs(process, |regs| step::vpop(regs, out, vector, index))?,
            I::VAt { out, vector, index } => self.with_regs(process, |regs| step::vat(regs, out, vector, index))?,
            I::StructInsert { structure, key, value } => self.with_regs(process, |regs| step::struct_insert(regs, structure, key, value))?,
            I::StructRemove { out, structure, key } => self.with_regs(process, |regs| step::struct_remove(regs, out, structure, key))?,
            I::StructAt { out, structure, key } => self.with_regs(process, |regs| step::struct_at(regs, out, structure, key))?,
            I::PidEq { out, a, b } => self.with_regs(process, |regs| step::pid_eq(regs, out, a, b))?,
            I::Cast { out, type_tag } => self.with_regs(process, |regs| step::cast(regs, out, type_tag))?,
            I::Atom { out, rodata_offset } => self.with_regs(process, |regs| step::load_atom(regs, module, out, rodata_offset))?,
            I::Double { out, rodata_offset } => self.with_regs(process, |regs| step::load_double(regs, module, out, rodata_offset))?,
            I::String { out, rodata_offset } => self.with_regs(process, |regs| step::load_string(regs, module, out, rodata_offset))?,
            I::Arodp { out, rodata_offset } => self.with_regs(process, |regs| step::arodp(regs, module, out, rodata_offset))?,
            I::Atxtp { out, text_offset } => {
                let current = process.active_stack().active_frame().map(|f| f.module.clone()).ok_or(RuntimeError::NoActiveFrame)?;
                self.with_regs(process, |regs| step::atxtp(regs, current, out, text_offset))?;
            }
            I::Addi { out, input, immediate, unsigned } => self.with_regs(process, |regs| step::addi(regs, out, input, immediate, unsigned))?,
            I::Aa { out, input, .. } => self.with_regs(process, |regs| step::pointer_arith(regs, out, input))?,
            I::Ad { out, input, .. } => self.with_regs(process, |regs| step::pointer_arith(regs, out, input))?,
            I::Lui { out, bits, unsigned } => self.with_regs(process, |regs| step::lui(regs, out, bits, unsigned))?,
            I::Lli { out, bits } => self.with_regs(process, |regs| step::lli(regs, out, bits))?,
            I::Sm { base, value, size, offset } => self.with_regs(process, |regs| memory::store(regs, base, value, size, offset))?,
            I::Lm { out, base, size, offset } => self.with_regs(process, |regs| memory::load(regs, out, base, size, offset))?,

            I::If { condition, offset } => {
                let value = self.with_regs(process, |regs| regs.read(condition))?;
                let truthy = !matches!(value, Value::Int64(0) | Value::UInt64(0) | Value::Void);
                if truthy {
                    let ip = process.active_stack().ip;
                    process.active_stack_mut().ip = (ip as i64 + i64::from(offset)) as usize;
                }
            }
            I::Jump { offset } => {
                let ip = process.active_stack().ip;
                process.active_stack_mut().ip = (ip as i64 + i64::from(offset)) as usize;
            }
            I::Frame { slots } => {
                let frame = process.active_stack_mut().active_frame_mut().ok_or(RuntimeError::NoActiveFrame)?;
                if !frame.open_arguments(slots as usize) {
                    return Err(RuntimeError::FrameImbalance);
                }
            }
            I::AllocateRegisters { count } => {
                let frame = process.active_stack_mut().active_frame_mut().ok_or(RuntimeError::NoActiveFrame)?;
                frame.locals = viua_process::RegisterSet::allocate(count as usize);
            }
            I::Param { slot_index, input } => {
                let value = self.with_regs(process, |regs| regs.read(input))?;
                let frame = process.active_stack_mut().active_frame_mut().ok_or(RuntimeError::NoActiveFrame)?;
                let args = frame.arguments.as_mut().ok_or(RuntimeError::NoActiveArguments)?;
                args.bind(slot_index as u16, value).map_err(|e| RuntimeError::InvalidRegisterIndex { index: e.index })?;
            }
            I::Pamv { slot, input } => {
                let value = self.with_regs(process, |regs| regs.take(input))?;
                let frame = process.active_stack_mut().active_frame_mut().ok_or(RuntimeError::NoActiveFrame)?;
                let args = frame.arguments.as_mut().ok_or(RuntimeError::NoActiveArguments)?;
                args.bind(slot.index(), value).map_err(|e| RuntimeError::InvalidRegisterIndex { index: e.index })?;
            }
            I::Arg { out, parameter } => self.with_regs(process, |regs| step::cp(regs, out, parameter))?,

            I::Call { out, function } => return self.do_call(process, function, out, false),
            I::Tailcall { function } => return self.do_call(process, function, RegisterAccess::VOID, true),
            I::Defer { function } => self.do_defer(process, function)?,
            I::Watchdog { function } => {
                let value = self.with_regs(process, |regs| regs.read(function))?;
                match value {
                    Value::Atom(a) => process.watchdog = Some(a),
                    Value::FunctionRef(fr) => process.watchdog = Some(fr.module),
                    _ => return Err(RuntimeError::NotCallable),
                }
            }

            I::SelfPid { out } => {
                let pid = process.pid;
                self.with_regs(process, |regs| regs.write(out, Value::Pid(pid)))?;
            }
            I::Process { out, function } => self.do_spawn(process, function, out, true)?,
            I::Actor { out, function } => self.do_spawn(process, function, out, false)?,
            I::Send { target, value } => {
                let target_pid = self.with_regs(process, |regs| regs.read(target))?;
                let payload = self.with_regs(process, |regs| regs.take(value))?;
                let target_pid = match target_pid {
                    Value::Pid(p) => p,
                    other => return Err(RuntimeError::InvalidType { expected: TypeTag::Pid, found: other.type_tag() }),
                };
                if !payload.is_sendable() {
                    return Err(RuntimeError::UnsendableValue);
                }
                self.processes.send(target_pid, payload).map_err(|_| RuntimeError::UnresolvedSymbol)?;
                self.scheduler.schedule(target_pid);
            }
            I::Receive { out, .. } => {
                if let Some(message) = process.dequeue_message() {
                    self.with_regs(process, |regs| regs.write(out, message))?;
                } else {
                    return Ok(StepOutcome::Suspend(Suspension::AwaitingMessage));
                }
            }
            I::Join { out, pid, .. } => {
                let target = self.with_regs(process, |regs| regs.read(pid))?;
                let target = match target {
                    Value::Pid(p) => p,
                    other => return Err(RuntimeError::InvalidType { expected: TypeTag::Pid, found: other.type_tag() }),
                };
                if self.processes.is_alive(target) {
                    return Ok(StepOutcome::Suspend(Suspension::AwaitingJoin(target)));
                }
                let result = self.processes.take_result(target).unwrap_or(Value::Void);
                self.with_regs(process, |regs| regs.write(out, result))?;
            }

            I::IoRead { out, handle } => return self.do_io_read(process, out, handle),
            I::IoWrite { out, handle } => self.do_io_write(process, out, handle)?,
            I::IoWait { out, interaction, .. } => self.do_io_wait(process, out, interaction)?,
            I::IoCancel { interaction } => {
                let handle = self.with_regs(process, |regs| regs.read(interaction))?;
                if let Value::IoHandle(h) = handle {
                    let _ = self.io.cancel(h, process.pid);
                }
            }
            I::IoClose { handle } => {
                let value = self.with_regs(process, |regs| regs.read(handle))?;
                if let Value::IoHandle(h) = value {
                    self.io.close(h);
                    process.forget_io_interaction(h);
                }
            }

            I::Import { module_name_rodata_offset } => {
                let bytes = module.rodata_entry(module_name_rodata_offset).map_err(|_| RuntimeError::UnresolvedSymbol)?;
                let _ = String::from_utf8_lossy(bytes);
            }
        }

        Ok(StepOutcome::Ran)
    }

    fn with_regs<T>(&self, process: &mut Process, f: impl FnOnce(&mut RegisterFile<'_>) -> Result<T, RuntimeError>) -> Result<T, RuntimeError> {
        let (stack, global, statics) = process.active_registers();
        let frame = stack.active_frame_mut().ok_or(RuntimeError::NoActiveFrame)?;
        let mut regs = RegisterFile { frame, global, statics };
        f(&mut regs)
    }

    fn do_return(&self, process: &mut Process, value: Value) {
        let Some(mut frame) = process.active_stack_mut().pop_frame() else { return };
        let deferred = frame.take_deferred_in_execution_order();
        self.run_deferred(process, deferred, StackState::SuspendedByDeferredOnFramePop);

        if process.active_stack().is_empty() {
            process.active_stack_mut().return_value = Some(value);
            process.active_stack_mut().state = StackState::Halted;
            return;
        }
        let return_register = frame.return_register;
        let return_address = frame.return_address;
        {
            let stack = process.active_stack_mut();
            stack.ip = return_address;
            stack.state = StackState::Running;
        }
        let _ = self.with_regs(process, |regs| regs.write(return_register, value));
    }

    fn do_call(&self, process: &mut Process, function: RegisterAccess, out: RegisterAccess, tail: bool) -> Result<StepOutcome, RuntimeError> {
        // already submitted on a prior quantum: either the result is in by
        // now, or we suspend again and get retried.
        if self.ffi_inflight.lock().expect("ffi in-flight set poisoned").contains(&process.pid) {
            return match self.ffi_queue.take_outcome(process.pid) {
                Some(outcome) => {
                    self.ffi_inflight.lock().expect("ffi in-flight set poisoned").remove(&process.pid);
                    self.complete_ffi_call(process, out, tail, outcome)?;
                    Ok(StepOutcome::Ran)
                }
                None => Ok(StepOutcome::Suspend(Suspension::AwaitingFfi)),
            };
        }

        let callee_value = self.with_regs(process, |regs| regs.read(function))?;
        let current_module = process.active_stack().active_frame().map(|f| f.module.clone()).ok_or(RuntimeError::NoActiveFrame)?;
        let callable = calls::resolve_callable(&callee_value, &current_module)?;

        let frame = process.active_stack_mut().active_frame_mut().ok_or(RuntimeError::NoActiveFrame)?;
        let arguments = frame.take_arguments_if_ready().ok_or(RuntimeError::FrameImbalance)?;

        match callable {
            Callable::Function(target) => {
                let module = self.modules.get(&target.module).map_err(|_| RuntimeError::UnresolvedSymbol)?;
                if tail {
                    let frame = process.active_stack_mut().pop_frame().expect("active frame exists");
                    let deferred_calls = {
                        let mut f = frame;
                        let d = f.take_deferred_in_execution_order();
                        self.run_deferred(process, d, StackState::SuspendedByDeferredOnFramePop);
                        (f.return_address, f.return_register)
                    };
                    let text_offset = target.text_offset;
                    let new_frame = calls::build_frame(target, &module, arguments, deferred_calls.0, deferred_calls.1);
                    process.active_stack_mut().push_frame(new_frame).map_err(|_| RuntimeError::StackOverflow)?;
                    process.active_stack_mut().ip = text_offset as usize;
                } else {
                    let ip = process.active_stack().ip;
                    let text_offset = target.text_offset;
                    let new_frame = calls::build_frame(target, &module, arguments, ip + 1, out);
                    process.active_stack_mut().push_frame(new_frame).map_err(|_| RuntimeError::StackOverflow)?;
                    process.active_stack_mut().ip = text_offset as usize;
                }
                Ok(StepOutcome::Ran)
            }
            Callable::Ffi(name) => {
                let mut values = Vec::with_capacity(arguments.len());
                for i in 0..arguments.len() as u16 {
                    values.push(arguments.get(i).map_err(|e| RuntimeError::InvalidRegisterIndex { index: e.index })?.get().clone());
                }
                self.ffi_queue.submit(FfiRequest { caller: process.pid, function: name, arguments: values });
                self.ffi_inflight.lock().expect("ffi in-flight set poisoned").insert(process.pid);
                Ok(StepOutcome::Suspend(Suspension::AwaitingFfi))
            }
        }
    }

    fn complete_ffi_call(&self, process: &mut Process, out: RegisterAccess, tail: bool, outcome: FfiOutcome) -> Result<(), RuntimeError> {
        match outcome {
            FfiOutcome::Completed(result) => {
                if !tail {
                    self.with_regs(process, |regs| regs.write(out, result))?;
                }
                Ok(())
            }
            FfiOutcome::Failed(message) => {
                let exception = Value::Exception(Arc::new(Exception { kind: Atom::intern("FfiError"), payload: Box::new(Value::StringV(Arc::new(message))) }));
                process.active_stack_mut().thrown = Some(exception);
                self.unwind(process);
                Ok(())
            }
        }
    }

    fn do_defer(&self, process: &mut Process, function: RegisterAccess) -> Result<(), RuntimeError> {
        let callee_value = self.with_regs(process, |regs| regs.read(function))?;
        let current_module = process.active_stack().active_frame().map(|f| f.module.clone()).ok_or(RuntimeError::NoActiveFrame)?;
        let callable = calls::resolve_callable(&callee_value, &current_module)?;
        let target = match callable {
            Callable::Function(fr) => fr,
            Callable::Ffi(_) => return Err(RuntimeError::NotCallable),
        };
        let frame = process.active_stack_mut().active_frame_mut().ok_or(RuntimeError::NoActiveFrame)?;
        let arguments = frame.take_arguments_if_ready().ok_or(RuntimeError::FrameImbalance)?;
        frame.defer(target, arguments);
        Ok(())
    }

    fn do_spawn(&self, process: &mut Process, function: RegisterAccess, out: RegisterAccess, joinable: bool) -> Result<(), RuntimeError> {
        let callee_value = self.with_regs(process, |regs| regs.read(function))?;
        let current_module = process.active_stack().active_frame().map(|f| f.module.clone()).ok_or(RuntimeError::NoActiveFrame)?;
        let callable = calls::resolve_callable(&callee_value, &current_module)?;
        let target = match callable {
            Callable::Function(fr) => fr,
            Callable::Ffi(_) => return Err(RuntimeError::NotCallable),
        };
        let module = self.modules.get(&target.module).map_err(|_| RuntimeError::UnresolvedSymbol)?;

        let frame = process.active_stack_mut().active_frame_mut().ok_or(RuntimeError::NoActiveFrame)?;
        let arguments = frame.take_arguments_if_ready().ok_or(RuntimeError::FrameImbalance)?;

        let (pid, handle) = self.processes.spawn(SPAWNED_PRIORITY);
        {
            let mut spawned = handle.lock().expect("process mutex poisoned");
            spawned.joinable = joinable;
            let text_offset = target.text_offset;
            let new_frame = calls::build_frame(target, &module, arguments, usize::MAX, RegisterAccess::VOID);
            let stack = spawned.active_stack_mut();
            let _ = stack.push_frame(new_frame);
            stack.ip = text_offset as usize;
        }
        self.scheduler.schedule(pid);
        self.with_regs(process, |regs| regs.write(out, Value::Pid(pid)))
    }

    /// `IO_WRITE`'s contract is fire-and-forget: it returns a handle
    /// immediately without suspending. Only the syscall itself moves to the
    /// I/O scheduler pool - submit and hand the handle back straight away.
    fn do_io_write(&self, process: &mut Process, out: RegisterAccess, handle: RegisterAccess) -> Result<(), RuntimeError> {
        let payload = self.with_regs(process, |regs| regs.read(out))?;
        let descriptor = self.with_regs(process, |regs| regs.read(handle))?;
        let fd = match descriptor {
            Value::Int64(n) => n,
            other => return Err(RuntimeError::InvalidType { expected: TypeTag::Int64, found: other.type_tag() }),
        };
        if fd != 1 && fd != 2 {
            return Err(RuntimeError::Errno(9));
        }
        let io_handle = self.io.submit(0, process.pid, IoOp::Write, fd, payload);
        process.register_io_interaction(io_handle);
        self.with_regs(process, |regs| regs.write(out, Value::IoHandle(io_handle)))
    }

    /// `IO_READ` blocks the caller: submit on first visit and suspend, then
    /// on every retry check whether the I/O scheduler pool has deposited an
    /// outcome yet, re-suspending against the same handle until it has.
    fn do_io_read(&self, process: &mut Process, out: RegisterAccess, handle: RegisterAccess) -> Result<StepOutcome, RuntimeError> {
        let mut inflight = self.io_inflight.lock().expect("io in-flight table poisoned");
        if let Some(&io_handle) = inflight.get(&process.pid) {
            let Some(outcome) = self.io.take_outcome(io_handle) else {
                return Ok(StepOutcome::Suspend(Suspension::AwaitingIo(io_handle)));
            };
            inflight.remove(&process.pid);
            drop(inflight);
            return self.complete_io_read(process, out, io_handle, outcome);
        }
        drop(inflight);

        let descriptor = self.with_regs(process, |regs| regs.read(handle))?;
        let fd = match descriptor {
            Value::Int64(n) => n,
            other => return Err(RuntimeError::InvalidType { expected: TypeTag::Int64, found: other.type_tag() }),
        };
        if fd != 0 {
            return Err(RuntimeError::Errno(9));
        }

        let io_handle = self.io.submit(0, process.pid, IoOp::Read, 0, Value::Void);
        self.io_inflight.lock().expect("io in-flight table poisoned").insert(process.pid, io_handle);
        Ok(StepOutcome::Suspend(Suspension::AwaitingIo(io_handle)))
    }

    fn complete_io_read(&self, process: &mut Process, out: RegisterAccess, io_handle: IoHandle, outcome: IoOutcome) -> Result<StepOutcome, RuntimeError> {
        match outcome {
            IoOutcome::Completed(value) => {
                process.register_io_interaction(io_handle);
                self.with_regs(process, |regs| regs.write(out, value))?;
                Ok(StepOutcome::Ran)
            }
            IoOutcome::Failed(message) => {
                let exception = Value::Exception(Arc::new(Exception { kind: Atom::intern("IoError"), payload: Box::new(Value::StringV(Arc::new(message))) }));
                process.active_stack_mut().thrown = Some(exception);
                self.unwind(process);
                Ok(StepOutcome::Ran)
            }
            IoOutcome::Cancelled => {
                let exception = Value::Exception(Arc::new(Exception { kind: Atom::intern("IoCancelled"), payload: Box::new(Value::Void) }));
                process.active_stack_mut().thrown = Some(exception);
                self.unwind(process);
                Ok(StepOutcome::Ran)
            }
        }
    }

    fn do_io_wait(&self, process: &mut Process, out: RegisterAccess, interaction: RegisterAccess) -> Result<(), RuntimeError> {
        let handle = self.with_regs(process, |regs| regs.read(interaction))?;
        let handle = match handle {
            Value::IoHandle(h) => h,
            other => return Err(RuntimeError::InvalidType { expected: TypeTag::IoHandle, found: other.type_tag() }),
        };
        match self.io.take_outcome(handle) {
            Some(IoOutcome::Completed(value)) => self.with_regs(process, |regs| regs.write(out, value)),
            Some(IoOutcome::Failed(message)) => {
                let exception = Value::Exception(Arc::new(Exception { kind: Atom::intern("IoError"), payload: Box::new(Value::StringV(Arc::new(message))) }));
                process.active_stack_mut().thrown = Some(exception);
                self.unwind(process);
                Ok(())
            }
            Some(IoOutcome::Cancelled) => {
                let exception = Value::Exception(Arc::new(Exception { kind: Atom::intern("IoCancelled"), payload: Box::new(Value::Void) }));
                process.active_stack_mut().thrown = Some(exception);
                self.unwind(process);
                Ok(())
            }
            None => Err(RuntimeError::Timeout),
        }
    }
}

impl viua_kernel::Dispatcher for Executor {
    fn run_quantum(&self, pid: Pid, processes: &ProcessTable) -> QuantumOutcome {
        let Ok(handle) = processes.get(pid) else { return QuantumOutcome::Finished };
        let mut process = handle.lock().expect("process mutex poisoned");
        let budget = process.priority;
        let mut spent = 0u32;

        loop {
            if process.is_finished() {
                let stack_result = {
                    let stack = process.active_stack_mut();
                    stack.return_value.take().or_else(|| stack.thrown.take())
                };
                self.processes.deposit_result(pid, stack_result.unwrap_or(Value::Void));
                return QuantumOutcome::Finished;
            }

            match self.step_once(&mut process) {
                Ok(StepOutcome::Suspend(suspension)) => {
                    process.suspension = suspension;
                    return QuantumOutcome::Suspended;
                }
                Ok(StepOutcome::Greedy) => {}
                Ok(StepOutcome::Ran) => {
                    spent += 1;
                    if spent >= budget {
                        process.suspension = Suspension::NotSuspended;
                        return QuantumOutcome::Requeue;
                    }
                }
                Err(error) => self.raise(&mut process, error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viua_elf::{Linkage, Symbol, SymbolKind};
    use viua_isa::RegisterSet as Rs;
    use viua_kernel::config::{StacktraceSerialisation, StacktraceSink};
    use viua_kernel::OverloadThreshold;
    use viua_process::RegisterSet;

    fn local(i: u16) -> RegisterAccess {
        RegisterAccess::direct(Rs::Local, i).unwrap()
    }

    fn param(i: u16) -> RegisterAccess {
        RegisterAccess::direct(Rs::Parameters, i).unwrap()
    }

    fn global(i: u16) -> RegisterAccess {
        RegisterAccess::direct(Rs::Global, i).unwrap()
    }

    fn test_config() -> viua_kernel::Config {
        viua_kernel::Config {
            proc_schedulers: 1,
            ffi_schedulers: 1,
            io_schedulers: 1,
            overload_threshold: OverloadThreshold::DEFAULT,
            enable_tracing: false,
            stack_traces: false,
            stacktrace_serialisation: StacktraceSerialisation::Human,
            stacktrace_print_to: StacktraceSink::Stderr,
        }
    }

    struct Harness {
        modules: Arc<ModuleTable>,
        processes: Arc<ProcessTable>,
        executor: Executor,
    }

    impl Harness {
        fn new() -> Self {
            let modules = Arc::new(ModuleTable::new());
            let processes = Arc::new(ProcessTable::new());
            let ffi = Arc::new(FfiTable::new());
            let io = Arc::new(IoTable::new());
            let scheduler = Arc::new(Scheduler::new(&test_config(), processes.clone()));
            let executor = Executor::new(modules.clone(), processes.clone(), ffi, io, scheduler, &test_config());
            Self { modules, processes, executor }
        }

        /// Load `text` as a module's entry function, spawn it as the main
        /// process, run every worker to completion, and return its result.
        fn run(&self, name: &str, text: Vec<Instruction>, rodata: &[&[u8]]) -> Value {
            self.run_with_pid(name, text, rodata).0
        }

        fn run_with_pid(&self, name: &str, text: Vec<Instruction>, rodata: &[&[u8]]) -> (Value, Pid) {
            let module_name = Atom::intern(name);
            let mut module =
                Module { text: text.into_iter().map(Instruction::encode).collect(), is_executable: true, ..Module::default() };
            for entry in rodata {
                module.add_rodata(entry);
            }
            module.symbols.push(Symbol {
                name: "main/0".to_string(),
                kind: SymbolKind::Function,
                linkage: Linkage::External,
                value: Some(0),
                size: module.text.len() as u64,
                is_entry_point: true,
            });
            self.modules.load(module_name.clone(), module);
            let pid = self.executor.spawn_main(&module_name, Vec::new()).unwrap();
            self.executor.run_to_completion();
            (self.processes.take_result(pid).unwrap_or(Value::Void), pid)
        }
    }

    #[test]
    fn arithmetic_round_trips_through_call_and_return() {
        let h = Harness::new();
        let result = h.run(
            "arith",
            vec![
                Instruction::AllocateRegisters { count: 2 },
                Instruction::Frame { slots: 1 },
                Instruction::Lui { out: local(1), bits: 0, unsigned: false },
                Instruction::Lli { out: local(1), bits: 10 },
                Instruction::Param { slot_index: 0, input: local(1) },
                Instruction::Lui { out: local(0), bits: 0, unsigned: true },
                Instruction::Lli { out: local(0), bits: 9 },
                Instruction::Call { out: local(0), function: local(0) },
                Instruction::Return { value: local(0) },
                Instruction::Addi { out: param(0), input: param(0), immediate: 5, unsigned: false },
                Instruction::Return { value: param(0) },
            ],
            &[],
        );
        assert!(matches!(result, Value::Int64(15)));
    }

    #[test]
    fn throw_unwinds_to_the_matching_catch_handler() {
        let h = Harness::new();
        let result = h.run(
            "throwcatch",
            vec![
                Instruction::AllocateRegisters { count: 1 },
                Instruction::Try,
                Instruction::Atom { out: local(0), rodata_offset: 8 },
                Instruction::Catch { exception_type: local(0), handler_offset: 3 },
                Instruction::Atom { out: local(0), rodata_offset: 8 + 8 + "Exception".len() as u32 },
                Instruction::Throw { value: local(0) },
                Instruction::Enter,
                Instruction::Draw { out: local(0) },
                Instruction::Return { value: local(0) },
            ],
            &[b"Exception", b"boom"],
        );
        assert!(matches!(result, Value::Atom(a) if a.as_str() == "boom"));
    }

    #[test]
    fn an_uncaught_throw_leaves_a_stack_trace_behind() {
        let h = Harness::new();
        let (result, pid) = h.run_with_pid(
            "uncaught",
            vec![
                Instruction::AllocateRegisters { count: 1 },
                Instruction::Atom { out: local(0), rodata_offset: 8 },
                Instruction::Throw { value: local(0) },
            ],
            &[b"boom"],
        );
        assert!(matches!(result, Value::Atom(a) if a.as_str() == "boom"));
        let trace = h.executor.take_trace(pid).expect("uncaught throw should leave a trace");
        assert_eq!(trace.frames.len(), 1);
        assert_eq!(trace.frames[0].function_name.as_str(), "main/0");
        assert!(h.executor.take_trace(pid).is_none(), "trace is taken, not peeked");
    }

    #[test]
    fn deferred_call_runs_before_the_caller_resumes() {
        let h = Harness::new();
        let module_name = Atom::intern("defer");
        let text = vec![
            Instruction::AllocateRegisters { count: 1 },
            Instruction::Frame { slots: 0 },
            Instruction::Lui { out: local(0), bits: 0, unsigned: true },
            Instruction::Lli { out: local(0), bits: 8 },
            Instruction::Defer { function: local(0) },
            Instruction::Lui { out: local(0), bits: 0, unsigned: false },
            Instruction::Lli { out: local(0), bits: 42 },
            Instruction::Return { value: local(0) },
            Instruction::Addi { out: global(0), input: global(0), immediate: 1, unsigned: false },
            Instruction::Return { value: RegisterAccess::VOID },
        ];
        let mut module = Module { text: text.into_iter().map(Instruction::encode).collect(), is_executable: true, ..Module::default() };
        module.symbols.push(Symbol {
            name: "main/0".to_string(),
            kind: SymbolKind::Function,
            linkage: Linkage::External,
            value: Some(0),
            size: module.text.len() as u64,
            is_entry_point: true,
        });
        h.modules.load(module_name.clone(), module);

        let pid = h.executor.spawn_main(&module_name, Vec::new()).unwrap();
        let handle = h.processes.get(pid).unwrap();
        {
            let mut process = handle.lock().unwrap();
            process.global = RegisterSet::allocate(1);
            process.global.bind(0, Value::Int64(0)).unwrap();
        }
        h.executor.run_to_completion();

        let result = h.processes.take_result(pid).unwrap();
        assert!(matches!(result, Value::Int64(42)));
        let bumped = handle.lock().unwrap().global.get(0).unwrap().get().clone();
        assert!(matches!(bumped, Value::Int64(1)));
    }

    #[test]
    fn process_and_join_round_trip_a_spawned_processs_return_value() {
        let h = Harness::new();
        let result = h.run(
            "spawnjoin",
            vec![
                Instruction::AllocateRegisters { count: 1 },
                Instruction::Frame { slots: 0 },
                Instruction::Lui { out: local(0), bits: 0, unsigned: true },
                Instruction::Lli { out: local(0), bits: 7 },
                Instruction::Process { out: local(0), function: local(0) },
                Instruction::Join { out: local(0), pid: local(0), timeout: RegisterAccess::VOID },
                Instruction::Return { value: local(0) },
                Instruction::AllocateRegisters { count: 1 },
                Instruction::Lui { out: local(0), bits: 0, unsigned: false },
                Instruction::Lli { out: local(0), bits: 7 },
                Instruction::Return { value: local(0) },
            ],
            &[],
        );
        assert!(matches!(result, Value::Int64(7)));
    }

    #[test]
    fn send_and_receive_round_trip_a_message_between_processes() {
        let h = Harness::new();
        let result = h.run(
            "sendreceive",
            vec![
                Instruction::AllocateRegisters { count: 2 },
                Instruction::Frame { slots: 0 },
                Instruction::Lui { out: local(0), bits: 0, unsigned: true },
                Instruction::Lli { out: local(0), bits: 10 },
                Instruction::Process { out: local(0), function: local(0) },
                Instruction::Lui { out: local(1), bits: 0, unsigned: false },
                Instruction::Lli { out: local(1), bits: 41 },
                Instruction::Send { target: local(0), value: local(1) },
                Instruction::Join { out: local(0), pid: local(0), timeout: RegisterAccess::VOID },
                Instruction::Return { value: local(0) },
                Instruction::AllocateRegisters { count: 1 },
                Instruction::Receive { out: local(0), timeout: RegisterAccess::VOID },
                Instruction::Addi { out: local(0), input: local(0), immediate: 1, unsigned: false },
                Instruction::Return { value: local(0) },
            ],
            &[],
        );
        assert!(matches!(result, Value::Int64(42)));
    }

    #[test]
    fn ffi_error_is_thrown_as_a_catchable_exception() {
        let h = Harness::new();
        h.executor.ffi.register(Atom::intern("fail/0"), |_| Err("always fails".to_string()));
        let result = h.run(
            "ffierr",
            vec![
                Instruction::AllocateRegisters { count: 1 },
                Instruction::Try,
                Instruction::Atom { out: local(0), rodata_offset: 8 },
                Instruction::Catch { exception_type: local(0), handler_offset: 3 },
                Instruction::Frame { slots: 0 },
                Instruction::Atom { out: local(0), rodata_offset: 24 },
                Instruction::Call { out: local(0), function: local(0) },
                Instruction::Halt,
                Instruction::Enter,
                Instruction::Draw { out: local(0) },
                Instruction::Return { value: local(0) },
            ],
            &[b"FfiError", b"fail/0"],
        );
        assert!(matches!(result, Value::Exception(e) if e.kind.as_str() == "FfiError"));
    }
}
