// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Resolving a [`RegisterAccess`] against the register sets a frame has in
//! scope: the active frame's locals, the parameters it was called with, the
//! `arguments` frame it may be preparing for its own next call, the
//! process-wide globals, and the per-function statics table.

use viua_isa::{AccessSpecifier, RegisterAccess, RegisterSet as RegSet};
use viua_process::{Frame, RegisterSet};
use viua_value::{TypeTag, Value};

use crate::error::RuntimeError;

/// Borrows every register set one instruction's operands might name.
///
/// `ClosureLocal` is resolved onto the active frame's `parameters` set: a
/// closure's captured values are handed to its body the same way an ordinary
/// call's arguments are, so there is no separate storage to borrow.
pub struct RegisterFile<'a> {
    pub frame: &'a mut Frame,
    pub global: &'a mut RegisterSet,
    pub statics: &'a mut RegisterSet,
}

impl<'a> RegisterFile<'a> {
    fn set_mut(&mut self, set: RegSet) -> Result<&mut RegisterSet, RuntimeError> {
        match set {
            RegSet::Local => Ok(&mut self.frame.locals),
            RegSet::Static => Ok(self.statics),
            RegSet::Global => Ok(self.global),
            RegSet::Parameters | RegSet::ClosureLocal => Ok(&mut self.frame.parameters),
            RegSet::Arguments => self.frame.arguments.as_mut().ok_or(RuntimeError::NoActiveArguments),
            RegSet::Void => unreachable!("Void accesses never reach set resolution"),
        }
    }

    fn index_error(e: viua_process::InvalidRegisterIndex) -> RuntimeError {
        RuntimeError::InvalidRegisterIndex { index: e.index }
    }

    /// Resolve `access`'s final register index, following `RegisterIndirect`
    /// one level through the same set.
    fn resolved_index(&mut self, set: RegSet, index: u16) -> Result<u16, RuntimeError> {
        let cell = self.set_mut(set)?.get(index).map_err(Self::index_error)?;
        match cell.get() {
            Value::Int64(n) if *n >= 0 => Ok(*n as u16),
            Value::UInt64(n) => Ok(*n as u16),
            _ => Err(RuntimeError::InvalidType { expected: TypeTag::Int64, found: cell.get().type_tag() }),
        }
    }

    /// Read a value out of `access` without disturbing the source cell
    /// (`COPY`-flavoured read: scalars and `Arc`-backed compounds alike are
    /// cheap to clone here; deep copies are a deliberate, separate step).
    pub fn read(&mut self, access: RegisterAccess) -> Result<Value, RuntimeError> {
        if access.is_void() {
            return Ok(Value::Void);
        }
        let index = match access.access() {
            AccessSpecifier::RegisterIndirect => self.resolved_index(access.set(), access.index())?,
            _ => access.index(),
        };
        let cell = self.set_mut(access.set())?.get(index).map_err(Self::index_error)?;
        match access.access() {
            AccessSpecifier::PointerDereference => match cell.get() {
                Value::Pointer(p) => Ok(p.target.lock().expect("pointer target mutex poisoned").clone()),
                other => Err(RuntimeError::InvalidType { expected: TypeTag::Pointer, found: other.type_tag() }),
            },
            _ => Ok(cell.get().clone()),
        }
    }

    /// `MOVE`-flavoured read: take the value out of the source cell, leaving
    /// it moved-and-void.
    pub fn take(&mut self, access: RegisterAccess) -> Result<Value, RuntimeError> {
        if access.is_void() {
            return Ok(Value::Void);
        }
        let index = match access.access() {
            AccessSpecifier::RegisterIndirect => self.resolved_index(access.set(), access.index())?,
            _ => access.index(),
        };
        match access.access() {
            AccessSpecifier::PointerDereference => {
                let cell = self.set_mut(access.set())?.get(index).map_err(Self::index_error)?;
                match cell.get() {
                    Value::Pointer(p) => {
                        let mut guard = p.target.lock().expect("pointer target mutex poisoned");
                        Ok(std::mem::take(&mut *guard))
                    }
                    other => Err(RuntimeError::InvalidType { expected: TypeTag::Pointer, found: other.type_tag() }),
                }
            }
            _ => {
                let cell = self.set_mut(access.set())?.get_mut(index).map_err(Self::index_error)?;
                Ok(cell.take())
            }
        }
    }

    /// `COPY`: deep-copy the source rather than clone the `Arc`, leaving the
    /// source cell untouched.
    pub fn copy(&mut self, access: RegisterAccess) -> Result<Value, RuntimeError> {
        Ok(self.read(access)?.deep_copy())
    }

    /// Bind `value` into `access`'s target cell.
    pub fn write(&mut self, access: RegisterAccess, value: Value) -> Result<(), RuntimeError> {
        if access.is_void() {
            return Ok(());
        }
        let index = match access.access() {
            AccessSpecifier::RegisterIndirect => self.resolved_index(access.set(), access.index())?,
            _ => access.index(),
        };
        match access.access() {
            AccessSpecifier::PointerDereference => {
                let cell = self.set_mut(access.set())?.get(index).map_err(Self::index_error)?;
                match cell.get() {
                    Value::Pointer(p) => {
                        *p.target.lock().expect("pointer target mutex poisoned") = value;
                        Ok(())
                    }
                    other => Err(RuntimeError::InvalidType { expected: TypeTag::Pointer, found: other.type_tag() }),
                }
            }
            _ => {
                let cell = self.set_mut(access.set())?.get_mut(index).map_err(Self::index_error)?;
                cell.bind(value);
                Ok(())
            }
        }
    }

    /// `PTR`: bind a reference cell pointing at `access`'s current cell.
    pub fn bind_pointer(&mut self, out: RegisterAccess, pointer: Value) -> Result<(), RuntimeError> {
        if out.is_void() {
            return Ok(());
        }
        let cell = self.set_mut(out.set())?.get_mut(out.index()).map_err(Self::index_error)?;
        cell.bind_reference(pointer);
        Ok(())
    }
}
