// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Runtime value representation for the Viua VM: the tagged [`Value`] sum
//! type, interned [`atom::Atom`]s, process identifiers, and the
//! [`cell::RegisterCell`] a register set is built from.

pub mod atom;
pub mod cell;
pub mod pid;
pub mod value;

pub use atom::Atom;
pub use cell::{cell_flags, RegisterCell};
pub use pid::{Pid, PidGenerator};
pub use value::{Closure, Exception, FunctionRef, IoHandle, Pointer, TypeTag, Value};
