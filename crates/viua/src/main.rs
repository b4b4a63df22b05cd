// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! `viua vm <executable> [args...]`: boots the kernel's tables and the
//! process scheduler against an already-linked executable, runs it to
//! completion, and reports the main process's result.
//!
//! Exit codes: 0 on clean exit, 1 if the main process terminated with an
//! uncaught exception, 2 on anything that means the run never really
//! started (bad usage, a file that doesn't parse, an unresolved entry
//! point).

use std::io::Write as _;
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use viua_elf::Module;
use viua_kernel::{Config, FfiTable, IoTable, ModuleTable, ProcessTable, Scheduler};
use viua_value::{Atom, Value};
use viua_vm::Executor;

fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    match run(std::env::args().skip(1).collect()) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("viua: {message}");
            ExitCode::from(2)
        }
    }
}

fn run(argv: Vec<String>) -> Result<ExitCode, String> {
    let [subcommand, path, rest @ ..] = argv.as_slice() else {
        return Err(usage());
    };
    if subcommand != "vm" {
        return Err(usage());
    }

    let bytes = std::fs::read(path).map_err(|e| format!("cannot read `{path}`: {e}"))?;
    let module = Module::from_bytes(&bytes).map_err(|e| format!("`{path}` is not a valid executable: {e}"))?;
    if !module.is_executable {
        return Err(format!("`{path}` is a relocatable object, not a linked executable; run `viua-link` first"));
    }

    let config = Config::from_env();
    tracing::info!(proc_schedulers = config.proc_schedulers, "booting viua kernel");

    let module_name = Atom::intern(module_name_for(path));
    let modules = Arc::new(ModuleTable::new());
    modules.load(module_name.clone(), module);
    let processes = Arc::new(ProcessTable::new());
    let ffi = Arc::new(FfiTable::new());
    let io = Arc::new(IoTable::new());
    let scheduler = Arc::new(Scheduler::new(&config, processes.clone()));
    let executor = Executor::new(modules, processes.clone(), ffi, io, scheduler.clone(), &config);

    let args = rest.iter().cloned().map(|s| Value::StringV(Arc::new(s))).collect();
    let pid = executor.spawn_main(&module_name, args).map_err(|e| format!("failed to start `main`: {e}"))?;
    executor.run_to_completion();

    let result = processes.take_result(pid).unwrap_or(Value::Void);
    if let Value::Exception(exception) = &result {
        if config.stack_traces {
            let trace = executor.take_trace(pid);
            report_failure(&config, &result, trace.as_ref());
        }
        tracing::warn!(kind = exception.kind.as_str(), "main process terminated with an uncaught exception");
        return Ok(ExitCode::from(1));
    }

    Ok(ExitCode::SUCCESS)
}

fn module_name_for(path: &str) -> &str {
    std::path::Path::new(path).file_stem().and_then(|s| s.to_str()).unwrap_or(path)
}

fn report_failure(config: &Config, result: &Value, trace: Option<&viua_vm::Stacktrace>) {
    use viua_kernel::config::{StacktraceSerialisation, StacktraceSink};

    let rendered = match (trace, &config.stacktrace_serialisation) {
        (Some(trace), StacktraceSerialisation::Json) => trace.render_json().unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}")),
        (Some(trace), StacktraceSerialisation::Human) => trace.render_human(),
        (None, StacktraceSerialisation::Json) => format!("{{\"exception\": {result:?}}}"),
        (None, StacktraceSerialisation::Human) => format!("uncaught exception: {result:?}\n"),
    };

    match &config.stacktrace_print_to {
        StacktraceSink::Stderr => eprint!("{rendered}"),
        StacktraceSink::Stdout => print!("{rendered}"),
        StacktraceSink::File(path) => {
            if let Ok(mut file) = std::fs::File::create(path) {
                let _ = file.write_all(rendered.as_bytes());
            }
        }
    }
}

fn usage() -> String {
    "usage: viua vm <executable> [args...]".to_string()
}
