// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Environment-driven scheduler configuration.

use std::env;
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// How the dispatcher renders an uncaught exception's stack trace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StacktraceSerialisation {
    Human,
    Json,
}

/// Where an uncaught exception's stack trace is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StacktraceSink {
    Stderr,
    Stdout,
    File(PathBuf),
}

/// How many OS threads host each kind of scheduler, plus the ambient
/// tracing/stack-trace knobs every `VIUA_*` environment variable feeds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub proc_schedulers: usize,
    pub ffi_schedulers: usize,
    pub io_schedulers: usize,
    /// A process scheduler steals from its most-loaded peer once its own run
    /// queue is shorter than `1 / overload_threshold` of that peer's.
    pub overload_threshold: OverloadThreshold,
    /// Gates per-instruction trace events, which are expensive enough to
    /// want off by default; scheduler/kernel lifecycle events log regardless.
    pub enable_tracing: bool,
    /// Whether an uncaught exception prints a stack trace before the
    /// process's result slot is set.
    pub stack_traces: bool,
    pub stacktrace_serialisation: StacktraceSerialisation,
    pub stacktrace_print_to: StacktraceSink,
}

/// A ratio expressed as a fixed-point `x.xx` multiplier, avoiding a bare
/// float in a value that's compared every scheduler tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverloadThreshold(u32);

impl OverloadThreshold {
    /// The specified default: a peer is "overloaded" once its queue is more
    /// than 1.40x the length of the stealer's queue.
    pub const DEFAULT: Self = Self(140);

    #[must_use]
    pub const fn from_hundredths(hundredths: u32) -> Self {
        Self(hundredths)
    }

    /// Whether `peer_len` justifies stealing from a queue of `own_len`.
    #[must_use]
    pub const fn exceeded(self, own_len: usize, peer_len: usize) -> bool {
        (peer_len as u64 * 100) > (own_len as u64 * self.0 as u64)
    }
}

impl Config {
    /// Read `VIUA_PROC_SCHEDULERS`, `VIUA_FFI_SCHEDULERS`, and
    /// `VIUA_IO_SCHEDULERS` from the environment, falling back to
    /// `std::thread::available_parallelism()` (and 1 for the I/O-bound
    /// pools) when unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let parallelism = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        Self {
            proc_schedulers: env_usize("VIUA_PROC_SCHEDULERS").unwrap_or(parallelism),
            ffi_schedulers: env_usize("VIUA_FFI_SCHEDULERS").unwrap_or(2),
            io_schedulers: env_usize("VIUA_IO_SCHEDULERS").unwrap_or(2),
            overload_threshold: OverloadThreshold::DEFAULT,
            enable_tracing: env_bool("VIUA_ENABLE_TRACING").unwrap_or(false),
            stack_traces: env_bool("VIUA_STACK_TRACES").unwrap_or(true),
            stacktrace_serialisation: match env::var("VIUA_STACKTRACE_SERIALISATION").as_deref() {
                Ok("json") => StacktraceSerialisation::Json,
                _ => StacktraceSerialisation::Human,
            },
            stacktrace_print_to: match env::var("VIUA_STACKTRACE_PRINT_TO") {
                Ok(v) if v == "stdout" => StacktraceSink::Stdout,
                Ok(v) if v != "stderr" => StacktraceSink::File(PathBuf::from(v)),
                _ => StacktraceSink::Stderr,
            },
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.parse().ok()).filter(|&n: &usize| n > 0)
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_matches_the_specified_ratio() {
        let t = OverloadThreshold::DEFAULT;
        assert!(t.exceeded(10, 15));
        assert!(!t.exceeded(10, 14));
    }

    #[test]
    fn zero_env_value_falls_back_to_default() {
        // env_usize filters out 0, which would otherwise create a scheduler
        // pool with no threads.
        assert_eq!(env_usize("VIUA_NONEXISTENT_VAR_FOR_TESTS"), None);
    }
}
