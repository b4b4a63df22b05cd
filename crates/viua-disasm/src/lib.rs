// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Bytecode disassembler for debugging.
//!
//! Decodes a module's `.text` one word at a time and performs the cosmetic
//! re-foldings a hand-written listing is expected to show rather than the
//! raw two- and three-instruction sequences the encoder actually emits:
//! a `LUI`/`LLI` pair collapses into a single `li`, an `ADDI` against the
//! void register collapses into the same `li`, memory ops grow a size
//! suffix, and branch/catch offsets print as logical instruction indices
//! rather than raw word deltas.

use std::fmt::Write as _;

use viua_elf::Module;
use viua_isa::Instruction;

/// Disassemble `module`'s `.text` into a listing, one line per logical
/// instruction (a folded `LUI`/`LLI` or `ADDI void` pair counts as one).
#[must_use]
pub fn disassemble(module: &Module) -> String {
    let mut out = String::new();
    let mut i = 0usize;

    while i < module.text.len() {
        let Ok((instr, greedy)) = decode_at(module, i) else {
            let _ = writeln!(out, "{i:04}: <undecodable 0x{:016x}>", module.text[i]);
            i += 1;
            continue;
        };

        if let Instruction::Lui { out: hi_out, bits: hi, unsigned } = instr {
            if let Some(Ok((Instruction::Lli { out: lo_out, bits: lo }, _))) = (i + 1 < module.text.len()).then(|| decode_at(module, i + 1)) {
                if lo_out == hi_out {
                    let value = (u64::from(hi) << 32) | u64::from(lo);
                    let _ = writeln!(out, "{i:04}: li        {hi_out:?}, {}", render_immediate(module, value, unsigned));
                    i += 2;
                    continue;
                }
            }
        }

        if let Instruction::Addi { out: reg, input, immediate, unsigned: false } = instr {
            if input.is_void() {
                let _ = writeln!(out, "{i:04}: li        {reg:?}, {immediate}");
                i += 1;
                continue;
            }
        }

        let body = render(module, i, &instr);
        if greedy {
            let _ = writeln!(out, "{i:04}: {body}  ; greedy");
        } else {
            let _ = writeln!(out, "{i:04}: {body}");
        }
        i += 1;
    }

    out
}

fn decode_at(module: &Module, index: usize) -> Result<(Instruction, bool), viua_isa::DecodeError> {
    Instruction::decode(module.text[index])
}

/// Translate a `LUI`/`LLI`-assembled value into its canonical textual form:
/// a matching function symbol's name if one addresses that exact offset,
/// otherwise the plain decimal value.
fn render_immediate(module: &Module, value: u64, unsigned: bool) -> String {
    if unsigned {
        if let Some(name) = function_symbol_at(module, value) {
            return format!("@{name}");
        }
        value.to_string()
    } else {
        (value as i64).to_string()
    }
}

fn function_symbol_at(module: &Module, text_offset: u64) -> Option<&str> {
    module
        .symbols
        .iter()
        .find(|s| {
            matches!(s.kind, viua_elf::SymbolKind::Function | viua_elf::SymbolKind::Closure | viua_elf::SymbolKind::Block)
                && s.value == Some(text_offset)
        })
        .map(|s| s.name.as_str())
}

/// Render a rodata-addressed literal: the text/bytes it points to when the
/// offset resolves, else the raw offset (an unresolved rodata address is a
/// module integrity problem, not something the disassembler should hide).
fn render_rodata_text(module: &Module, offset: u32) -> String {
    match module.rodata_entry(offset) {
        Ok(bytes) => format!("{:?}", String::from_utf8_lossy(bytes)),
        Err(_) => format!("<bad rodata offset {offset}>"),
    }
}

fn render_rodata_double(module: &Module, offset: u32) -> String {
    match module.rodata_entry(offset).and_then(|b| b.try_into().map_err(|_| viua_elf::ElfError::BadRodataOffset(offset.into()))) {
        Ok(arr) => f64::from_le_bytes(arr).to_string(),
        Err(_) => format!("<bad rodata offset {offset}>"),
    }
}

fn branch_target(ip: usize, offset: i32) -> i64 {
    ip as i64 + i64::from(offset)
}

#[allow(clippy::too_many_lines)]
fn render(module: &Module, ip: usize, instr: &Instruction) -> String {
    use Instruction as I;

    match *instr {
        I::Nop => "nop".to_string(),
        I::Try => "try".to_string(),
        I::Enter => "enter".to_string(),
        I::Leave => "leave".to_string(),
        I::Halt => "halt".to_string(),

        I::PtrLive { reg } => format!("ptrlive   {reg:?}"),
        I::Delete { reg } => format!("delete    {reg:?}"),
        I::Vector { out } => format!("vector    {out:?}"),
        I::Struct { out } => format!("struct    {out:?}"),
        I::SelfPid { out } => format!("selfpid   {out:?}"),
        I::Tailcall { function } => format!("tailcall  {function:?}"),
        I::Defer { function } => format!("defer     {function:?}"),
        I::Watchdog { function } => format!("watchdog  {function:?}"),
        I::Return { value } => format!("return    {value:?}"),
        I::Throw { value } => format!("throw     {value:?}"),
        I::IoCancel { interaction } => format!("io_cancel {interaction:?}"),
        I::IoClose { handle } => format!("io_close  {handle:?}"),
        I::Draw { out } => format!("draw      {out:?}"),

        I::Move { out, input } => format!("move      {out:?}, {input:?}"),
        I::Copy { out, input } => format!("copy      {out:?}, {input:?}"),
        I::Ptr { out, input } => format!("ptr       {out:?}, {input:?}"),
        I::Swap { a, b } => format!("swap      {a:?}, {b:?}"),
        I::IsNull { out, input } => format!("is_null   {out:?}, {input:?}"),
        I::VLen { out, vector } => format!("vlen      {out:?}, {vector:?}"),
        I::StructKeys { out, structure } => format!("struct_keys {out:?}, {structure:?}"),
        I::Call { out, function } => format!("call      {out:?}, {function:?}"),
        I::Process { out, function } => format!("process   {out:?}, {function:?}"),
        I::Actor { out, function } => format!("actor     {out:?}, {function:?}"),
        I::Send { target, value } => format!("send      {target:?}, {value:?}"),
        I::Receive { out, timeout } => format!("receive   {out:?}, {timeout:?}"),
        I::VPush { vector, value } => format!("vpush     {vector:?}, {value:?}"),
        I::Pamv { slot, input } => format!("pamv      {slot:?}, {input:?}"),
        I::Arg { out, parameter } => format!("arg       {out:?}, {parameter:?}"),
        I::IoRead { out, handle } => format!("io_read   {out:?}, {handle:?}"),
        I::IoWrite { out, handle } => format!("io_write  {out:?}, {handle:?}"),

        I::VInsert { vector, value, index } => format!("vinsert   {vector:?}, {value:?}, {index:?}"),
        I::VPop { out, vector, index } => format!("vpop      {out:?}, {vector:?}, {index:?}"),
        I::VAt { out, vector, index } => format!("vat       {out:?}, {vector:?}, {index:?}"),
        I::StructInsert { structure, key, value } => format!("struct_insert {structure:?}, {key:?}, {value:?}"),
        I::StructRemove { out, structure, key } => format!("struct_remove {out:?}, {structure:?}, {key:?}"),
        I::StructAt { out, structure, key } => format!("struct_at {out:?}, {structure:?}, {key:?}"),
        I::PidEq { out, a, b } => format!("pid_eq    {out:?}, {a:?}, {b:?}"),
        I::Join { out, pid, timeout } => format!("join      {out:?}, {pid:?}, {timeout:?}"),
        I::IoWait { out, interaction, timeout } => format!("io_wait   {out:?}, {interaction:?}, {timeout:?}"),

        I::Cast { out, type_tag } => format!("cast      {out:?}, #{type_tag}"),
        I::Atom { out, rodata_offset } => format!("atom      {out:?}, {}", render_rodata_text(module, rodata_offset)),
        I::Double { out, rodata_offset } => format!("double    {out:?}, {}", render_rodata_double(module, rodata_offset)),
        I::String { out, rodata_offset } => format!("string    {out:?}, {}", render_rodata_text(module, rodata_offset)),
        I::Frame { slots } => format!("frame     {slots}"),
        I::AllocateRegisters { count } => format!("allocate_registers {count}"),
        I::Jump { offset } => format!("jump      {}", branch_target(ip, offset)),
        I::Import { module_name_rodata_offset } => format!("import    {}", render_rodata_text(module, module_name_rodata_offset)),
        I::Arodp { out, rodata_offset } => format!("arodp     {out:?}, K{rodata_offset}"),
        I::Atxtp { out, text_offset } => match function_symbol_at(module, u64::from(text_offset)) {
            Some(name) => format!("atxtp     {out:?}, @{name}"),
            None => format!("atxtp     {out:?}, {text_offset}"),
        },

        I::Addi { out, input, immediate, unsigned } => {
            format!("addi{}     {out:?}, {input:?}, {immediate}", if unsigned { "u" } else { "" })
        }
        I::If { condition, offset } => format!("if        {condition:?}, {}", branch_target(ip, offset)),
        I::Catch { exception_type, handler_offset } => {
            format!("catch     {exception_type:?}, {}", branch_target(ip, handler_offset))
        }
        I::Aa { out, input, offset } => format!("aa        {out:?}, {input:?}, {offset}"),
        I::Ad { out, input, offset } => format!("ad        {out:?}, {input:?}, {offset}"),
        I::Param { slot_index, input } => format!("param     {slot_index}, {input:?}"),

        I::Lui { out, bits, unsigned } => format!("lui{}      {out:?}, {bits}", if unsigned { "u" } else { "" }),
        I::Lli { out, bits } => format!("lli       {out:?}, {bits}"),

        I::Sm { base, value, size, offset } => format!("sm.{size}     {base:?}, {value:?}, {offset}"),
        I::Lm { out, base, size, offset } => format!("lm.{size}     {out:?}, {base:?}, {offset}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viua_elf::{Linkage, Symbol, SymbolKind};
    use viua_isa::{RegisterAccess, RegisterSet as Rs};

    fn local(i: u16) -> RegisterAccess {
        RegisterAccess::direct(Rs::Local, i).unwrap()
    }

    #[test]
    fn lui_lli_pair_folds_into_a_single_li_line() {
        let module = Module {
            text: vec![
                Instruction::Lui { out: local(0), bits: 0, unsigned: false }.encode(),
                Instruction::Lli { out: local(0), bits: 42 }.encode(),
                Instruction::Halt.encode(),
            ],
            ..Module::default()
        };
        let listing = disassemble(&module);
        assert_eq!(listing.lines().count(), 2);
        assert!(listing.lines().next().unwrap().contains("li"));
        assert!(listing.lines().next().unwrap().contains("42"));
    }

    #[test]
    fn lui_lli_pair_loading_a_function_offset_prints_the_symbol_name() {
        let mut module = Module {
            text: vec![
                Instruction::Lui { out: local(0), bits: 0, unsigned: true }.encode(),
                Instruction::Lli { out: local(0), bits: 3 }.encode(),
                Instruction::Halt.encode(),
                Instruction::Return { value: RegisterAccess::VOID }.encode(),
            ],
            ..Module::default()
        };
        module.symbols.push(Symbol {
            name: "helper/0".to_string(),
            kind: SymbolKind::Function,
            linkage: Linkage::Local,
            value: Some(3),
            size: 1,
            is_entry_point: false,
        });
        let listing = disassemble(&module);
        assert!(listing.lines().next().unwrap().contains("@helper/0"));
    }

    #[test]
    fn addi_against_void_folds_into_li() {
        let module = Module {
            text: vec![Instruction::Addi { out: local(0), input: RegisterAccess::VOID, immediate: 7, unsigned: false }.encode()],
            ..Module::default()
        };
        let listing = disassemble(&module);
        assert!(listing.contains("li"));
        assert!(listing.contains('7'));
        assert!(!listing.contains("addi"));
    }

    #[test]
    fn addi_unsigned_against_void_is_not_folded() {
        let module = Module {
            text: vec![Instruction::Addi { out: local(0), input: RegisterAccess::VOID, immediate: 7, unsigned: true }.encode()],
            ..Module::default()
        };
        let listing = disassemble(&module);
        assert!(listing.contains("addiu"));
    }

    #[test]
    fn memory_ops_render_with_a_size_suffix() {
        let module = Module {
            text: vec![Instruction::Sm { base: local(0), value: local(1), size: viua_isa::MemSize::Word, offset: 4 }.encode()],
            ..Module::default()
        };
        let listing = disassemble(&module);
        assert!(listing.contains("sm.w"));
    }

    #[test]
    fn jump_offsets_print_as_logical_target_indices() {
        let module = Module {
            text: vec![
                Instruction::Nop.encode(),
                Instruction::Jump { offset: 2 }.encode(),
                Instruction::Nop.encode(),
                Instruction::Halt.encode(),
            ],
            ..Module::default()
        };
        let listing = disassemble(&module);
        let jump_line = listing.lines().nth(1).unwrap();
        assert!(jump_line.contains("jump"));
        assert!(jump_line.contains('3'));
    }

    #[test]
    fn atom_literal_renders_its_rodata_text() {
        let mut module = Module { text: Vec::new(), ..Module::default() };
        let offset = module.add_rodata(b"boom");
        module.text.push(Instruction::Atom { out: local(0), rodata_offset: offset }.encode());
        let listing = disassemble(&module);
        assert!(listing.contains("boom"));
    }

    #[test]
    fn undecodable_word_is_reported_but_does_not_stop_the_listing() {
        let module = Module { text: vec![u64::MAX, Instruction::Halt.encode()], ..Module::default() };
        let listing = disassemble(&module);
        assert_eq!(listing.lines().count(), 2);
        assert!(listing.lines().next().unwrap().contains("undecodable"));
    }
}
