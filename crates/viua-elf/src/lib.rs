// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The on-disk object and executable format: a bespoke ELF64 convention
//! (`.viua.magic`, `.interp`, `.text`, `.rodata`, `.symtab`, `.strtab`,
//! `.rel`, `.comment`) plus the single-pass static linker that turns
//! relocatable modules into a runnable image.

pub mod linker;
pub mod module;
pub mod raw;

pub use linker::{link, LinkError, LinkInput};
pub use module::{ElfError, Linkage, Module, Relocation, Symbol, SymbolKind};
