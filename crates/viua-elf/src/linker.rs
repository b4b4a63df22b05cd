// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The static linker: merges relocatable modules into one executable image,
//! patching every `LUI`/`LLI` pair that addresses a symbol.

use std::collections::HashMap;

use viua_isa::Instruction;

use crate::module::{Linkage, Module, Symbol, SymbolKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("input module `{0}` is already linked (ET_EXEC), not relocatable")]
    NotRelocatable(String),
    #[error("symbol `{0}` is defined in more than one input module")]
    DuplicateSymbol(String),
    #[error("symbol `{0}` referenced by a relocation was never defined")]
    UnresolvedSymbol(String),
    #[error("entry point function `{0}` was not found among the linked symbols")]
    NoEntryPoint(String),
    #[error("entry point symbol `{0}` does not name a function")]
    EntryPointNotFunction(String),
    #[error("relocation in module `{module}` targets .text word {offset}, out of bounds")]
    BadRelocationTarget { module: String, offset: u64 },
    #[error("relocation in module `{module}` at word {offset} is not a LUI/LLI pair")]
    NotALuiLliPair { module: String, offset: u64 },
}

/// One relocatable input, tagged with the name it is known by to the linker
/// (for diagnostics and for `IMPORT`-style module-qualified lookups).
pub struct LinkInput {
    pub name: String,
    pub module: Module,
}

/// Link `inputs` into a single executable image whose entry point is the
/// function named `main_function` (conventionally `"main/0"` or similar).
///
/// Symbols with [`Linkage::External`] are visible to every input module and
/// must be unique across the whole link; [`Linkage::Local`] and
/// [`Linkage::ModuleLocal`] symbols are only visible within their defining
/// module. Relocations are resolved in a single pass: every `.text` offset a
/// module recorded a [`crate::module::Relocation`] against is looked up
/// (module-local first, then global) and the `LUI`/`LLI` pair at that offset
/// is rewritten to carry the resolved absolute word address.
pub fn link(main_function: &str, inputs: Vec<LinkInput>) -> Result<Module, LinkError> {
    for input in &inputs {
        if input.module.is_executable {
            return Err(LinkError::NotRelocatable(input.name.clone()));
        }
    }

    // assign each input's .text a base offset in the combined image
    let mut text = Vec::new();
    let mut base_offsets = Vec::with_capacity(inputs.len());
    for input in &inputs {
        base_offsets.push(text.len() as u64);
        text.extend_from_slice(&input.module.text);
    }

    let mut rodata = Vec::new();
    let mut rodata_base_offsets = Vec::with_capacity(inputs.len());
    for input in &inputs {
        rodata_base_offsets.push(rodata.len() as u32);
        rodata.extend_from_slice(&input.module.rodata);
    }

    // global symbol table: External symbols, qualified by nothing (visible
    // under their bare name everywhere); Local/ModuleLocal symbols, keyed by
    // (module index, name) and only resolved against relocations from the
    // same module.
    let mut globals: HashMap<String, (usize, u64, u64)> = HashMap::new(); // name -> (module_idx, text_value, size)
    let mut locals: HashMap<(usize, String), (u64, u64)> = HashMap::new();
    let mut merged_symbols = Vec::new();

    for (idx, input) in inputs.iter().enumerate() {
        for sym in &input.module.symbols {
            let resolved_value = resolved_text_value(sym, base_offsets[idx], rodata_base_offsets[idx]);
            match sym.linkage {
                Linkage::External => {
                    if globals.contains_key(&sym.name) {
                        return Err(LinkError::DuplicateSymbol(sym.name.clone()));
                    }
                    if let Some(value) = resolved_value {
                        globals.insert(sym.name.clone(), (idx, value, sym.size));
                    }
                }
                Linkage::Local | Linkage::ModuleLocal => {
                    if let Some(value) = resolved_value {
                        locals.insert((idx, sym.name.clone()), (value, sym.size));
                    }
                }
            }
            merged_symbols.push(Symbol {
                name: qualified_name(&input.name, sym),
                kind: sym.kind,
                linkage: sym.linkage,
                value: resolved_value,
                size: sym.size,
                is_entry_point: false,
            });
        }
    }

    for (idx, input) in inputs.iter().enumerate() {
        for reloc in &input.module.relocations {
            let resolved = locals
                .get(&(idx, reloc.symbol.clone()))
                .copied()
                .or_else(|| globals.get(&reloc.symbol).map(|&(_, v, s)| (v, s)))
                .ok_or_else(|| LinkError::UnresolvedSymbol(reloc.symbol.clone()))?;
            patch_lui_lli(
                &mut text,
                base_offsets[idx] + reloc.text_word_offset,
                resolved.0,
                &input.name,
            )?;
        }
    }

    let (entry_module_idx, entry_value, _) = globals
        .get(main_function)
        .copied()
        .ok_or_else(|| LinkError::NoEntryPoint(main_function.to_string()))?;
    let entry_is_function = inputs[entry_module_idx]
        .module
        .symbols
        .iter()
        .find(|s| s.name == main_function)
        .map(|s| matches!(s.kind, SymbolKind::Function | SymbolKind::Closure))
        .unwrap_or(false);
    if !entry_is_function {
        return Err(LinkError::EntryPointNotFunction(main_function.to_string()));
    }

    for sym in &mut merged_symbols {
        if sym.value == Some(entry_value) && sym.name.ends_with(main_function) {
            sym.is_entry_point = true;
        }
    }

    let comment = inputs.iter().map(|i| i.module.comment.clone()).collect::<Vec<_>>().join("\n");

    Ok(Module {
        text,
        rodata,
        symbols: merged_symbols,
        relocations: Vec::new(),
        comment,
        is_executable: true,
    })
}

fn qualified_name(module_name: &str, sym: &Symbol) -> String {
    match sym.linkage {
        Linkage::External => sym.name.clone(),
        Linkage::Local | Linkage::ModuleLocal => format!("{module_name}::{}", sym.name),
    }
}

fn resolved_text_value(sym: &Symbol, text_base: u64, rodata_base: u32) -> Option<u64> {
    match sym.kind {
        SymbolKind::Function | SymbolKind::Closure | SymbolKind::Block => {
            sym.value.map(|v| v + text_base)
        }
        SymbolKind::Object => sym.value.map(|v| v + u64::from(rodata_base)),
    }
}

fn patch_lui_lli(text: &mut [u64], offset: u64, value: u64, module_name: &str) -> Result<(), LinkError> {
    let offset = offset as usize;
    let lo_word = *text.get(offset).ok_or_else(|| LinkError::BadRelocationTarget {
        module: module_name.to_string(),
        offset: offset as u64,
    })?;
    let hi_word = *text.get(offset + 1).ok_or_else(|| LinkError::BadRelocationTarget {
        module: module_name.to_string(),
        offset: offset as u64,
    })?;

    let (lui, _) = Instruction::decode(lo_word).map_err(|_| LinkError::NotALuiLliPair {
        module: module_name.to_string(),
        offset: offset as u64,
    })?;
    let (lli, _) = Instruction::decode(hi_word).map_err(|_| LinkError::NotALuiLliPair {
        module: module_name.to_string(),
        offset: offset as u64,
    })?;

    let Instruction::Lui { out, unsigned, .. } = lui else {
        return Err(LinkError::NotALuiLliPair { module: module_name.to_string(), offset: offset as u64 });
    };
    let Instruction::Lli { out: lli_out, .. } = lli else {
        return Err(LinkError::NotALuiLliPair { module: module_name.to_string(), offset: offset as u64 });
    };

    text[offset] = Instruction::Lui { out, bits: (value >> 32) as u32, unsigned }.encode();
    text[offset + 1] = Instruction::Lli { out: lli_out, bits: value as u32 }.encode();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Relocation;
    use viua_isa::{RegisterAccess, RegisterSet};

    fn register(index: u16) -> RegisterAccess {
        RegisterAccess::direct(RegisterSet::Local, index).unwrap()
    }

    fn lui_lli_pair(out: RegisterAccess) -> Vec<u64> {
        vec![
            Instruction::Lui { out, bits: 0, unsigned: true }.encode(),
            Instruction::Lli { out, bits: 0 }.encode(),
        ]
    }

    #[test]
    fn links_two_modules_and_patches_the_call_site() {
        let callee = Module {
            text: vec![Instruction::Return { value: register(0) }.encode()],
            symbols: vec![Symbol {
                name: "callee/0".into(),
                kind: SymbolKind::Function,
                linkage: Linkage::External,
                value: Some(0),
                size: 1,
                is_entry_point: false,
            }],
            ..Module::default()
        };

        let mut caller_text = lui_lli_pair(register(0));
        caller_text.push(Instruction::Halt.encode());
        let caller = Module {
            text: caller_text,
            symbols: vec![Symbol {
                name: "main/0".into(),
                kind: SymbolKind::Function,
                linkage: Linkage::External,
                value: Some(0),
                size: 3,
                is_entry_point: false,
            }],
            relocations: vec![Relocation { text_word_offset: 0, symbol: "callee/0".into() }],
            ..Module::default()
        };

        let linked = link(
            "main/0",
            vec![
                LinkInput { name: "caller".into(), module: caller },
                LinkInput { name: "callee".into(), module: callee },
            ],
        )
        .unwrap();

        assert!(linked.is_executable);
        assert!(linked.entry_point().is_some());
        let (patched, _) = Instruction::decode(linked.text[0]).unwrap();
        assert!(matches!(patched, Instruction::Lui { bits: 0, .. }));
        let (patched_lo, _) = Instruction::decode(linked.text[1]).unwrap();
        // callee/0 now lives after caller's 3-word .text, so its resolved
        // word address low bits are 3.
        assert!(matches!(patched_lo, Instruction::Lli { bits: 3, .. }));
    }

    #[test]
    fn duplicate_external_symbol_is_rejected() {
        let make = || Module {
            symbols: vec![Symbol {
                name: "main/0".into(),
                kind: SymbolKind::Function,
                linkage: Linkage::External,
                value: Some(0),
                size: 0,
                is_entry_point: false,
            }],
            ..Module::default()
        };
        let result = link(
            "main/0",
            vec![
                LinkInput { name: "a".into(), module: make() },
                LinkInput { name: "b".into(), module: make() },
            ],
        );
        assert_eq!(result.unwrap_err(), LinkError::DuplicateSymbol("main/0".into()));
    }

    #[test]
    fn missing_entry_point_is_rejected() {
        let result = link("main/0", vec![LinkInput { name: "a".into(), module: Module::default() }]);
        assert_eq!(result.unwrap_err(), LinkError::NoEntryPoint("main/0".into()));
    }
}
