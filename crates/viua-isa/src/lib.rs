// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Bytecode instruction set for the process-oriented virtual machine: the
//! fixed-width instruction word layout, register access encoding, and the
//! typed [`Instruction`] codec built on top of them.
//!
//! This crate has no I/O and no allocation dependency; it is pure encode and
//! decode logic shared by the VM dispatcher, the static linker, and the
//! disassembler.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod format;
pub mod instruction;
pub mod opcode;
pub mod register;

pub use format::{Format, Header};
pub use instruction::{DecodeError, Instruction};
pub use opcode::{DOp, EOp, FOp, MOp, MemSize, NOp, ROp, SOp, TOp};
pub use register::{AccessSpecifier, InvalidRegisterAccess, RegisterAccess, RegisterSet, MAX_REGISTER_INDEX};
