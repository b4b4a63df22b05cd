// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Kernel-level errors: failures resolving a PID, module, or FFI function,
//! as distinct from per-instruction runtime errors (those live in `viua-vm`).

use viua_value::{Atom, Pid};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("no such process: {0}")]
    NoSuchProcess(Pid),
    #[error("process {0} is not joinable (already detached or already joined)")]
    NotJoinable(Pid),
    #[error("no module named `{0}` is loaded")]
    NoSuchModule(String),
    #[error("module `{0}` has no function `{1}`")]
    NoSuchFunction(String, String),
    #[error("no FFI function named `{0}` is registered")]
    NoSuchFfiFunction(String),
    #[error("FFI call to `{0}` failed: {1}")]
    FfiCallFailed(String, String),
    #[error("I/O interaction {0:?} is unknown to this process")]
    UnknownIoInteraction(u64),
    #[error("process pool is shut down")]
    PoolShutDown,
}

impl KernelError {
    #[must_use]
    pub fn no_such_function(module: &Atom, function: &Atom) -> Self {
        Self::NoSuchFunction(module.as_str().to_string(), function.as_str().to_string())
    }
}
