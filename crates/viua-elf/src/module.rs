// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! `Module`: the in-memory form of a relocatable or executable ELF64 image.

use crate::raw::{
    Elf64Header, Elf64Rel, Elf64Sym, SectionHeader, ELFCLASS64, ELFDATA2LSB, ET_EXEC, ET_REL, SHF_ALLOC,
    SHF_EXECINSTR, SHF_WRITE, SHT_NOBITS, SHT_NULL, SHT_PROGBITS, SHT_RELA, SHT_STRTAB, SHT_SYMTAB,
    STB_GLOBAL, STB_LOCAL, STT_FUNC, STT_OBJECT, STV_DEFAULT, STV_HIDDEN, VIUA_INTERP, VIUA_MAGIC,
};

/// What a symbol names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Closure,
    Block,
    Object,
}

/// A symbol's export visibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Linkage {
    /// `STB_LOCAL` + `STV_DEFAULT`: unit-local.
    Local,
    /// `STB_GLOBAL` + `STV_HIDDEN`: module-local, exported only within the
    /// linked image.
    ModuleLocal,
    /// `STB_GLOBAL` + `STV_DEFAULT`: globally exported.
    External,
}

/// A resolved or unresolved symbol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub linkage: Linkage,
    /// Offset in `.text` words (functions/blocks) or `.rodata` bytes
    /// (objects). `None` for an unresolved extern symbol (`st_value == 0`).
    pub value: Option<u64>,
    pub size: u64,
    pub is_entry_point: bool,
}

/// A relocation: patch the LUI/LLI pair starting at `.text` word index
/// `text_word_offset` with the resolved value of `symbol`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relocation {
    pub text_word_offset: u64,
    pub symbol: String,
}

/// A loaded or about-to-be-written module.
#[derive(Clone, Debug, Default)]
pub struct Module {
    pub text: Vec<u64>,
    /// Concatenation of length-prefixed `.rodata` entries; an offset into
    /// this buffer as recorded on a `Symbol` points at the first data byte,
    /// not the 8-byte size word that precedes it.
    pub rodata: Vec<u8>,
    pub symbols: Vec<Symbol>,
    pub relocations: Vec<Relocation>,
    pub comment: String,
    pub is_executable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ElfError {
    #[error("not a Viua module: bad ELF magic or class")]
    BadMagic,
    #[error("missing or corrupt .viua.magic section")]
    BadViuaMagic,
    #[error("missing or corrupt .interp section")]
    BadInterp,
    #[error("section table truncated or out of bounds")]
    TruncatedSections,
    #[error("malformed symbol table entry")]
    MalformedSymbol,
    #[error("malformed relocation entry")]
    MalformedRelocation,
    #[error(".rodata offset {0} is out of bounds or not entry-aligned")]
    BadRodataOffset(u64),
}

impl Module {
    /// Append a length-prefixed `.rodata` entry, returning the offset of its
    /// first data byte.
    pub fn add_rodata(&mut self, bytes: &[u8]) -> u32 {
        let offset = self.rodata.len() as u32 + 8;
        self.rodata.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        self.rodata.extend_from_slice(bytes);
        offset
    }

    /// Read the `.rodata` entry whose first data byte is at `offset`.
    pub fn rodata_entry(&self, offset: u32) -> Result<&[u8], ElfError> {
        let offset = offset as usize;
        if offset < 8 || offset > self.rodata.len() {
            return Err(ElfError::BadRodataOffset(offset as u64));
        }
        let size_bytes = self.rodata.get(offset - 8..offset).ok_or(ElfError::BadRodataOffset(offset as u64))?;
        let size = u64::from_le_bytes(size_bytes.try_into().unwrap()) as usize;
        self.rodata.get(offset..offset + size).ok_or(ElfError::BadRodataOffset(offset as u64))
    }

    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    pub fn entry_point(&self) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.is_entry_point)
    }

    /// Serialise into the on-disk section layout described by the data
    /// model: `.viua.magic`, `.interp`, `.text`, `.rodata`, `.symtab`,
    /// `.strtab`, `.rel`, `.comment`, `.shstrtab`.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut strtab = StringTable::default();
        let mut shstrtab = StringTable::default();

        let text_bytes: Vec<u8> = self.text.iter().flat_map(|w| w.to_le_bytes()).collect();

        let sym_name_offsets: Vec<u32> = self.symbols.iter().map(|s| strtab.intern(&s.name)).collect();
        let symtab_bytes: Vec<u8> = self
            .symbols
            .iter()
            .zip(&sym_name_offsets)
            .flat_map(|(sym, &name_off)| {
                let (bind, other) = match sym.linkage {
                    Linkage::Local => (STB_LOCAL, STV_DEFAULT),
                    Linkage::ModuleLocal => (STB_GLOBAL, STV_HIDDEN),
                    Linkage::External => (STB_GLOBAL, STV_DEFAULT),
                };
                let kind = match sym.kind {
                    SymbolKind::Function | SymbolKind::Closure | SymbolKind::Block => STT_FUNC,
                    SymbolKind::Object => STT_OBJECT,
                };
                Elf64Sym {
                    st_name: name_off,
                    st_info: Elf64Sym::make_info(bind, kind),
                    st_other: other,
                    st_shndx: 1,
                    st_value: sym.value.unwrap_or(0),
                    st_size: sym.size,
                }
                .to_bytes()
            })
            .collect();

        let rel_bytes: Vec<u8> = self
            .relocations
            .iter()
            .flat_map(|rel| {
                let sym_index = self.symbols.iter().position(|s| s.name == rel.symbol).unwrap_or(0) as u32;
                Elf64Rel { r_offset: rel.text_word_offset * 8, r_sym: sym_index }.to_bytes()
            })
            .collect();

        let comment_bytes = self.comment.as_bytes().to_vec();

        // section name table entries, in final section order
        let names = [".viua.magic", ".interp", ".text", ".rodata", ".symtab", ".strtab", ".rel", ".comment", ".shstrtab"];
        let name_offsets: Vec<u32> = names.iter().map(|n| shstrtab.intern(n)).collect();
        let shstrtab_bytes = shstrtab.into_bytes();

        let mut body = Vec::new();
        let mut headers = vec![SectionHeader { sh_name: 0, sh_type: SHT_NULL, sh_flags: 0, sh_offset: 0, sh_size: 0, sh_link: 0, sh_entsize: 0 }];

        let push_section = |body: &mut Vec<u8>, headers: &mut Vec<SectionHeader>, name_off: u32, ty: u32, flags: u64, data: &[u8], link: u32, entsize: u64| {
            while body.len() % 8 != 0 {
                body.push(0);
            }
            let offset = Elf64Header::EHSIZE as u64 + body.len() as u64;
            body.extend_from_slice(data);
            headers.push(SectionHeader { sh_name: name_off, sh_type: ty, sh_flags: flags, sh_offset: offset, sh_size: data.len() as u64, sh_link: link, sh_entsize: entsize });
        };

        push_section(&mut body, &mut headers, name_offsets[0], SHT_NOBITS, SHF_ALLOC, &VIUA_MAGIC, 0, 0);
        push_section(&mut body, &mut headers, name_offsets[1], SHT_PROGBITS, SHF_ALLOC, VIUA_INTERP, 0, 0);
        push_section(&mut body, &mut headers, name_offsets[2], SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, &text_bytes, 0, 8);
        push_section(&mut body, &mut headers, name_offsets[3], SHT_PROGBITS, SHF_ALLOC, &self.rodata, 0, 0);
        push_section(&mut body, &mut headers, name_offsets[4], SHT_SYMTAB, 0, &symtab_bytes, 5, Elf64Sym::SIZE as u64);
        push_section(&mut body, &mut headers, name_offsets[5], SHT_STRTAB, 0, &strtab.into_bytes(), 0, 0);
        push_section(&mut body, &mut headers, name_offsets[6], SHT_RELA, SHF_WRITE, &rel_bytes, 4, Elf64Rel::SIZE as u64);
        push_section(&mut body, &mut headers, name_offsets[7], SHT_PROGBITS, 0, &comment_bytes, 0, 0);
        let shstrtab_index = headers.len() as u16;
        push_section(&mut body, &mut headers, name_offsets[8], SHT_STRTAB, 0, &shstrtab_bytes, 0, 0);

        while body.len() % 8 != 0 {
            body.push(0);
        }
        let sh_offset = Elf64Header::EHSIZE as u64 + body.len() as u64;

        let e_entry = self
            .entry_point()
            .and_then(|s| s.value)
            .map_or(0, |v| Elf64Header::EHSIZE as u64 + text_offset_within(&headers) + v * 8);

        let header = Elf64Header {
            e_type: if self.is_executable { ET_EXEC } else { ET_REL },
            e_entry,
            e_phoff: 0,
            e_shoff: sh_offset,
            e_flags: 0,
            e_phnum: 0,
            e_shnum: headers.len() as u16,
            e_shstrndx: shstrtab_index,
        };

        let mut out = header.to_bytes();
        out.extend_from_slice(&body);
        for sh in headers {
            out.extend_from_slice(&sh.to_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ElfError> {
        let header = Elf64Header::from_bytes(bytes).ok_or(ElfError::BadMagic)?;
        if bytes[4] != ELFCLASS64 || bytes[5] != ELFDATA2LSB {
            return Err(ElfError::BadMagic);
        }

        let sh_start = header.e_shoff as usize;
        let mut sections = Vec::with_capacity(header.e_shnum as usize);
        for i in 0..header.e_shnum as usize {
            let off = sh_start + i * Elf64Header::SHENTSIZE as usize;
            let raw = bytes.get(off..off + 64).ok_or(ElfError::TruncatedSections)?;
            sections.push(SectionHeader::from_bytes(raw).ok_or(ElfError::TruncatedSections)?);
        }
        let shstrtab_data = section_data(bytes, &sections[header.e_shstrndx as usize])?;

        let find = |wanted: &str| -> Option<usize> {
            sections.iter().position(|s| read_cstr(shstrtab_data, s.sh_name as usize) == wanted)
        };

        let magic_idx = find(".viua.magic").ok_or(ElfError::BadViuaMagic)?;
        if sections[magic_idx].sh_type != SHT_NOBITS {
            return Err(ElfError::BadViuaMagic);
        }
        // the magic section is NOBITS: its file offset field is checked
        // against the reserved constant at parse time, but it contributes
        // no file bytes.
        if sections.get(1).map(|s| s.sh_name) != Some(sections[magic_idx].sh_name) {
            return Err(ElfError::BadViuaMagic);
        }

        let interp_idx = find(".interp").ok_or(ElfError::BadInterp)?;
        let interp_data = section_data(bytes, &sections[interp_idx])?;
        if interp_data != VIUA_INTERP {
            return Err(ElfError::BadInterp);
        }

        let text_data = find(".text").map(|i| section_data(bytes, &sections[i])).transpose()?.unwrap_or(&[]);
        let text: Vec<u64> = text_data.chunks_exact(8).map(|c| u64::from_le_bytes(c.try_into().unwrap())).collect();

        let rodata = find(".rodata").map(|i| section_data(bytes, &sections[i])).transpose()?.unwrap_or(&[]).to_vec();

        let strtab_data = find(".strtab").map(|i| section_data(bytes, &sections[i])).transpose()?.unwrap_or(&[]);

        let symbols = if let Some(i) = find(".symtab") {
            let data = section_data(bytes, &sections[i])?;
            data.chunks_exact(Elf64Sym::SIZE)
                .map(|chunk| {
                    let sym = Elf64Sym::from_bytes(chunk).ok_or(ElfError::MalformedSymbol)?;
                    let name = read_cstr(strtab_data, sym.st_name as usize);
                    let linkage = match (sym.bind(), sym.st_other) {
                        (b, o) if b == STB_LOCAL && o == STV_DEFAULT => Linkage::Local,
                        (b, o) if b == STB_GLOBAL && o == STV_HIDDEN => Linkage::ModuleLocal,
                        _ => Linkage::External,
                    };
                    let kind = if sym.kind() == STT_OBJECT { SymbolKind::Object } else { SymbolKind::Function };
                    Ok(Symbol {
                        name,
                        kind,
                        linkage,
                        value: if sym.st_value == 0 && sym.kind() != STT_OBJECT { None } else { Some(sym.st_value) },
                        size: sym.st_size,
                        is_entry_point: false,
                    })
                })
                .collect::<Result<Vec<_>, ElfError>>()?
        } else {
            Vec::new()
        };

        let relocations = if let Some(i) = find(".rel") {
            let data = section_data(bytes, &sections[i])?;
            data.chunks_exact(Elf64Rel::SIZE)
                .map(|chunk| {
                    let rel = Elf64Rel::from_bytes(chunk).ok_or(ElfError::MalformedRelocation)?;
                    let symbol = symbols.get(rel.r_sym as usize).map(|s| s.name.clone()).unwrap_or_default();
                    Ok(Relocation { text_word_offset: rel.r_offset / 8, symbol })
                })
                .collect::<Result<Vec<_>, ElfError>>()?
        } else {
            Vec::new()
        };

        let comment = find(".comment")
            .map(|i| section_data(bytes, &sections[i]))
            .transpose()?
            .map(|d| String::from_utf8_lossy(d).into_owned())
            .unwrap_or_default();

        Ok(Self { text, rodata, symbols, relocations, comment, is_executable: header.e_type == ET_EXEC })
    }
}

fn text_offset_within(headers: &[SectionHeader]) -> u64 {
    // index 3 is always `.text` in the fixed section order `to_bytes` emits
    // (null, magic, interp, text, ...)
    headers[3].sh_offset - Elf64Header::EHSIZE as u64
}

fn section_data<'a>(bytes: &'a [u8], sh: &SectionHeader) -> Result<&'a [u8], ElfError> {
    if sh.sh_type == SHT_NOBITS {
        return Ok(&[]);
    }
    bytes
        .get(sh.sh_offset as usize..(sh.sh_offset + sh.sh_size) as usize)
        .ok_or(ElfError::TruncatedSections)
}

fn read_cstr(table: &[u8], offset: usize) -> String {
    table
        .get(offset..)
        .and_then(|rest| rest.iter().position(|&b| b == 0).map(|end| &rest[..end]))
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .unwrap_or_default()
}

#[derive(Default)]
struct StringTable {
    bytes: Vec<u8>,
}

impl StringTable {
    fn intern(&mut self, s: &str) -> u32 {
        if self.bytes.is_empty() {
            self.bytes.push(0);
        }
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        offset
    }

    fn into_bytes(self) -> Vec<u8> {
        if self.bytes.is_empty() {
            vec![0]
        } else {
            self.bytes
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rodata_round_trip() {
        let mut module = Module::default();
        let off = module.add_rodata(b"hello");
        assert_eq!(module.rodata_entry(off).unwrap(), b"hello");
    }

    #[test]
    fn elf_round_trips_through_bytes() {
        let mut module = Module { text: vec![0, 1, 2], is_executable: false, ..Module::default() };
        module.symbols.push(Symbol {
            name: "main/0".to_string(),
            kind: SymbolKind::Function,
            linkage: Linkage::External,
            value: Some(0),
            size: 3,
            is_entry_point: true,
        });
        let bytes = module.to_bytes();
        let parsed = Module::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.text, module.text);
        assert_eq!(parsed.symbols.len(), 1);
        assert_eq!(parsed.symbols[0].name, "main/0");
    }

    #[test]
    fn rejects_non_viua_elf() {
        assert!(Module::from_bytes(&[0u8; 16]).is_err());
    }
}
