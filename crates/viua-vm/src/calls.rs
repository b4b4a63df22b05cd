// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Resolving a callable register value and building the frame a `CALL`,
//! `TAILCALL`, `PROCESS`, or `ACTOR` pushes.

use viua_elf::{Module, SymbolKind};
use viua_isa::RegisterAccess;
use viua_process::{Frame, RegisterSet};
use viua_value::{Atom, FunctionRef, Value};

use crate::error::RuntimeError;

/// What a register named by a `CALL`-family instruction's `function`
/// operand turned out to hold.
pub enum Callable {
    Function(FunctionRef),
    /// An atom names a registered foreign function rather than bytecode.
    Ffi(Atom),
}

/// Resolve a callee value. A bare `UInt64` is a raw text offset within the
/// calling frame's own module - the shape `LUI`/`LLI` produce for a local,
/// non-relocated call target.
pub fn resolve_callable(value: &Value, current_module: &Atom) -> Result<Callable, RuntimeError> {
    match value {
        Value::FunctionRef(fr) => Ok(Callable::Function(fr.clone())),
        Value::Closure(c) => Ok(Callable::Function(c.function.clone())),
        Value::Atom(name) => Ok(Callable::Ffi(name.clone())),
        Value::UInt64(addr) => {
            Ok(Callable::Function(FunctionRef { module: current_module.clone(), text_offset: *addr as u32 }))
        }
        _ => Err(RuntimeError::NotCallable),
    }
}

/// Look up the symbol naming a function's entry point, falling back to a
/// synthetic name for addresses with no matching symbol (e.g. a closure
/// body entered through a raw offset rather than its own exported symbol).
#[must_use]
pub fn function_name_for(module: &Module, text_offset: u32) -> Atom {
    module
        .symbols
        .iter()
        .find(|s| {
            matches!(s.kind, SymbolKind::Function | SymbolKind::Closure | SymbolKind::Block)
                && s.value == Some(u64::from(text_offset))
        })
        .map(|s| Atom::intern(&s.name))
        .unwrap_or_else(|| Atom::intern(&format!("<anonymous+{text_offset}>")))
}

/// Build the callee frame for `target`, with `parameters` already bound.
#[must_use]
pub fn build_frame(
    target: FunctionRef,
    module: &Module,
    parameters: RegisterSet,
    return_address: usize,
    return_register: RegisterAccess,
) -> Frame {
    Frame::new(function_name_for(module, target.text_offset), target.module, parameters, return_address, return_register)
}
