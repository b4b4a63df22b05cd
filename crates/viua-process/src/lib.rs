// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Register windows, call frames, try-frames, stacks, and processes: the
//! per-process state the dispatch loop in `viua-vm` operates on.

pub mod frame;
pub mod process;
pub mod register_set;
pub mod stack;
pub mod try_frame;

pub use frame::{DeferredCall, Frame};
pub use process::{Mailbox, Process, Suspension, MAIN_PRIORITY, SPAWNED_PRIORITY};
pub use register_set::{InvalidRegisterIndex, RegisterSet, STATIC_REGISTER_SET_SIZE};
pub use stack::{Stack, StackOverflow, StackState, MAX_STACK_SIZE};
pub use try_frame::TryFrame;
