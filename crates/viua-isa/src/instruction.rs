// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Decoded instructions: the ergonomic, typed view of a bytecode word that
//! the VM's dispatcher and the disassembler both consume.

#[cfg(test)]
#[path = "instruction_test.rs"]
mod instruction_test;

use core::fmt;

use crate::format::{Format, Header, PAYLOAD_BITS};
use crate::opcode::{DOp, EOp, FOp, MOp, MemSize, NOp, ROp, SOp, TOp};
use crate::register::{InvalidRegisterAccess, RegisterAccess, REGISTER_ACCESS_BITS};

/// A fully decoded instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    Try,
    Enter,
    Leave,
    Halt,

    PtrLive { reg: RegisterAccess },
    Delete { reg: RegisterAccess },
    Vector { out: RegisterAccess },
    Struct { out: RegisterAccess },
    SelfPid { out: RegisterAccess },
    Tailcall { function: RegisterAccess },
    Defer { function: RegisterAccess },
    Watchdog { function: RegisterAccess },
    Return { value: RegisterAccess },
    Throw { value: RegisterAccess },
    IoCancel { interaction: RegisterAccess },
    IoClose { handle: RegisterAccess },
    Draw { out: RegisterAccess },

    Move { out: RegisterAccess, input: RegisterAccess },
    Copy { out: RegisterAccess, input: RegisterAccess },
    Ptr { out: RegisterAccess, input: RegisterAccess },
    Swap { a: RegisterAccess, b: RegisterAccess },
    IsNull { out: RegisterAccess, input: RegisterAccess },
    VLen { out: RegisterAccess, vector: RegisterAccess },
    StructKeys { out: RegisterAccess, structure: RegisterAccess },
    Call { out: RegisterAccess, function: RegisterAccess },
    Process { out: RegisterAccess, function: RegisterAccess },
    Actor { out: RegisterAccess, function: RegisterAccess },
    Send { target: RegisterAccess, value: RegisterAccess },
    Receive { out: RegisterAccess, timeout: RegisterAccess },
    VPush { vector: RegisterAccess, value: RegisterAccess },
    Pamv { slot: RegisterAccess, input: RegisterAccess },
    Arg { out: RegisterAccess, parameter: RegisterAccess },
    IoRead { out: RegisterAccess, handle: RegisterAccess },
    IoWrite { out: RegisterAccess, handle: RegisterAccess },

    VInsert { vector: RegisterAccess, value: RegisterAccess, index: RegisterAccess },
    VPop { out: RegisterAccess, vector: RegisterAccess, index: RegisterAccess },
    VAt { out: RegisterAccess, vector: RegisterAccess, index: RegisterAccess },
    StructInsert { structure: RegisterAccess, key: RegisterAccess, value: RegisterAccess },
    StructRemove { out: RegisterAccess, structure: RegisterAccess, key: RegisterAccess },
    StructAt { out: RegisterAccess, structure: RegisterAccess, key: RegisterAccess },
    PidEq { out: RegisterAccess, a: RegisterAccess, b: RegisterAccess },
    Join { out: RegisterAccess, pid: RegisterAccess, timeout: RegisterAccess },
    IoWait { out: RegisterAccess, interaction: RegisterAccess, timeout: RegisterAccess },

    Cast { out: RegisterAccess, type_tag: u8 },
    Atom { out: RegisterAccess, rodata_offset: u32 },
    Double { out: RegisterAccess, rodata_offset: u32 },
    String { out: RegisterAccess, rodata_offset: u32 },
    Frame { slots: u32 },
    AllocateRegisters { count: u32 },
    Jump { offset: i32 },
    Import { module_name_rodata_offset: u32 },
    Arodp { out: RegisterAccess, rodata_offset: u32 },
    Atxtp { out: RegisterAccess, text_offset: u32 },

    Addi { out: RegisterAccess, input: RegisterAccess, immediate: i32, unsigned: bool },
    If { condition: RegisterAccess, offset: i32 },
    Catch { exception_type: RegisterAccess, handler_offset: i32 },
    Aa { out: RegisterAccess, input: RegisterAccess, offset: i32 },
    Ad { out: RegisterAccess, input: RegisterAccess, offset: i32 },
    Param { slot_index: i32, input: RegisterAccess },

    Lui { out: RegisterAccess, bits: u32, unsigned: bool },
    Lli { out: RegisterAccess, bits: u32 },

    Sm { base: RegisterAccess, value: RegisterAccess, size: MemSize, offset: i32 },
    Lm { out: RegisterAccess, base: RegisterAccess, size: MemSize, offset: i32 },
}

/// An instruction word failed to decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The format nibble was out of range (only 0..=7 are defined).
    InvalidFormat(u8),
    /// The (format, mnemonic) pair has no meaning.
    UnknownOpcode { format: Format, mnemonic: u8 },
    /// A register-access field failed to decode.
    InvalidRegisterAccess(InvalidRegisterAccess),
    /// An `M`-format size spec named an unknown width.
    InvalidTypeCast(u8),
}

impl From<InvalidRegisterAccess> for DecodeError {
    fn from(e: InvalidRegisterAccess) -> Self {
        Self::InvalidRegisterAccess(e)
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFormat(b) => write!(f, "invalid instruction format nibble: {b}"),
            Self::UnknownOpcode { format, mnemonic } => {
                write!(f, "unknown opcode {mnemonic} in format {format}")
            }
            Self::InvalidRegisterAccess(e) => write!(f, "{e}"),
            Self::InvalidTypeCast(b) => write!(f, "invalid memory/type spec byte: {b}"),
        }
    }
}

// --- payload bit-field helpers -------------------------------------------
//
// Register accesses and immediates are packed left-to-right (most
// significant bits first) within the 54-bit payload so that the first
// textual operand always occupies the highest bits.

const fn reg_at(payload: u64, slot: u32) -> u32 {
    let shift = PAYLOAD_BITS - REGISTER_ACCESS_BITS * (slot + 1);
    ((payload >> shift) & ((1 << REGISTER_ACCESS_BITS) - 1)) as u32
}

const fn imm_bits(payload: u64, used_regs: u32, width: u32) -> u64 {
    let consumed = REGISTER_ACCESS_BITS * used_regs;
    let shift = PAYLOAD_BITS - consumed - width;
    (payload >> shift) & ((1u64 << width) - 1)
}

const fn sign_extend(value: u64, width: u32) -> i64 {
    let shift = 64 - width;
    ((value << shift) as i64) >> shift
}

fn decode_reg(payload: u64, slot: u32) -> Result<RegisterAccess, DecodeError> {
    Ok(RegisterAccess::decode(reg_at(payload, slot))?)
}

const fn pack_regs(regs: &[RegisterAccess]) -> u64 {
    let mut payload: u64 = 0;
    let mut i = 0;
    while i < regs.len() {
        let shift = PAYLOAD_BITS - REGISTER_ACCESS_BITS * (i as u32 + 1);
        payload |= (regs[i].encode() as u64) << shift;
        i += 1;
    }
    payload
}

fn pack_imm(n_regs: u32, width: u32, value: u64) -> u64 {
    let shift = PAYLOAD_BITS - REGISTER_ACCESS_BITS * n_regs - width;
    (value & ((1u64 << width) - 1)) << shift
}

impl Instruction {
    /// Encode this instruction into a single 64-bit word.
    #[must_use]
    pub fn encode(self) -> u64 {
        let (format, mnemonic, greedy, unsigned, payload) = self.parts();
        Header {
            format,
            greedy,
            unsigned,
            mnemonic,
            payload,
        }
        .encode()
    }

    /// Decode a single 64-bit word.
    pub fn decode(word: u64) -> Result<(Self, bool), DecodeError> {
        let header = Header::decode(word).ok_or(DecodeError::InvalidFormat((word >> 61) as u8))?;
        let instr = Self::decode_body(header)?;
        Ok((instr, header.greedy))
    }

    #[allow(clippy::too_many_lines)]
    fn decode_body(h: Header) -> Result<Self, DecodeError> {
        let p = h.payload;
        let unknown = || DecodeError::UnknownOpcode {
            format: h.format,
            mnemonic: h.mnemonic,
        };

        Ok(match h.format {
            Format::N => match h.mnemonic {
                m if m == NOp::Nop as u8 => Self::Nop,
                m if m == NOp::Try as u8 => Self::Try,
                m if m == NOp::Enter as u8 => Self::Enter,
                m if m == NOp::Leave as u8 => Self::Leave,
                m if m == NOp::Halt as u8 => Self::Halt,
                _ => return Err(unknown()),
            },
            Format::S => {
                let reg = decode_reg(p, 0)?;
                match h.mnemonic {
                    m if m == SOp::PtrLive as u8 => Self::PtrLive { reg },
                    m if m == SOp::Delete as u8 => Self::Delete { reg },
                    m if m == SOp::Vector as u8 => Self::Vector { out: reg },
                    m if m == SOp::Struct as u8 => Self::Struct { out: reg },
                    m if m == SOp::SelfPid as u8 => Self::SelfPid { out: reg },
                    m if m == SOp::Tailcall as u8 => Self::Tailcall { function: reg },
                    m if m == SOp::Defer as u8 => Self::Defer { function: reg },
                    m if m == SOp::Watchdog as u8 => Self::Watchdog { function: reg },
                    m if m == SOp::Return as u8 => Self::Return { value: reg },
                    m if m == SOp::Throw as u8 => Self::Throw { value: reg },
                    m if m == SOp::IoCancel as u8 => Self::IoCancel { interaction: reg },
                    m if m == SOp::IoClose as u8 => Self::IoClose { handle: reg },
                    m if m == SOp::Draw as u8 => Self::Draw { out: reg },
                    _ => return Err(unknown()),
                }
            }
            Format::D => {
                let out = decode_reg(p, 0)?;
                let input = decode_reg(p, 1)?;
                match h.mnemonic {
                    m if m == DOp::Move as u8 => Self::Move { out, input },
                    m if m == DOp::Copy as u8 => Self::Copy { out, input },
                    m if m == DOp::Ptr as u8 => Self::Ptr { out, input },
                    m if m == DOp::Swap as u8 => Self::Swap { a: out, b: input },
                    m if m == DOp::IsNull as u8 => Self::IsNull { out, input },
                    m if m == DOp::VLen as u8 => Self::VLen { out, vector: input },
                    m if m == DOp::StructKeys as u8 => Self::StructKeys { out, structure: input },
                    m if m == DOp::Call as u8 => Self::Call { out, function: input },
                    m if m == DOp::Process as u8 => Self::Process { out, function: input },
                    m if m == DOp::Actor as u8 => Self::Actor { out, function: input },
                    m if m == DOp::Send as u8 => Self::Send { target: out, value: input },
                    m if m == DOp::Receive as u8 => Self::Receive { out, timeout: input },
                    m if m == DOp::VPush as u8 => Self::VPush { vector: out, value: input },
                    m if m == DOp::Pamv as u8 => Self::Pamv { slot: out, input },
                    m if m == DOp::Arg as u8 => Self::Arg { out, parameter: input },
                    m if m == DOp::IoRead as u8 => Self::IoRead { out, handle: input },
                    m if m == DOp::IoWrite as u8 => Self::IoWrite { out, handle: input },
                    _ => return Err(unknown()),
                }
            }
            Format::T => {
                let out = decode_reg(p, 0)?;
                let lhs = decode_reg(p, 1)?;
                let rhs = decode_reg(p, 2)?;
                match h.mnemonic {
                    m if m == TOp::VInsert as u8 => Self::VInsert { vector: out, value: lhs, index: rhs },
                    m if m == TOp::VPop as u8 => Self::VPop { out, vector: lhs, index: rhs },
                    m if m == TOp::VAt as u8 => Self::VAt { out, vector: lhs, index: rhs },
                    m if m == TOp::StructInsert as u8 => {
                        Self::StructInsert { structure: out, key: lhs, value: rhs }
                    }
                    m if m == TOp::StructRemove as u8 => Self::StructRemove { out, structure: lhs, key: rhs },
                    m if m == TOp::StructAt as u8 => Self::StructAt { out, structure: lhs, key: rhs },
                    m if m == TOp::PidEq as u8 => Self::PidEq { out, a: lhs, b: rhs },
                    m if m == TOp::Join as u8 => Self::Join { out, pid: lhs, timeout: rhs },
                    m if m == TOp::IoWait as u8 => Self::IoWait { out, interaction: lhs, timeout: rhs },
                    _ => return Err(unknown()),
                }
            }
            Format::E => {
                let out = decode_reg(p, 0)?;
                let imm40 = imm_bits(p, 1, 40);
                let imm32 = imm_bits(p, 1, 32) as u32;
                match h.mnemonic {
                    m if m == EOp::Cast as u8 => {
                        let tag = imm40 as u8;
                        Self::Cast { out, type_tag: tag }
                    }
                    m if m == EOp::Atom as u8 => Self::Atom { out, rodata_offset: imm32 },
                    m if m == EOp::Double as u8 => Self::Double { out, rodata_offset: imm32 },
                    m if m == EOp::String as u8 => Self::String { out, rodata_offset: imm32 },
                    m if m == EOp::Frame as u8 => Self::Frame { slots: imm32 },
                    m if m == EOp::AllocateRegisters as u8 => Self::AllocateRegisters { count: imm32 },
                    m if m == EOp::Jump as u8 => Self::Jump {
                        offset: sign_extend(imm40, 40) as i32,
                    },
                    m if m == EOp::Import as u8 => Self::Import { module_name_rodata_offset: imm32 },
                    m if m == EOp::Arodp as u8 => Self::Arodp { out, rodata_offset: imm32 },
                    m if m == EOp::Atxtp as u8 => Self::Atxtp { out, text_offset: imm32 },
                    _ => return Err(unknown()),
                }
            }
            Format::R => {
                let out = decode_reg(p, 0)?;
                let input = decode_reg(p, 1)?;
                let imm = imm_bits(p, 2, 32) as u32;
                let signed = sign_extend(u64::from(imm), 32) as i32;
                match h.mnemonic {
                    m if m == ROp::Addi as u8 => Self::Addi {
                        out,
                        input,
                        immediate: signed,
                        unsigned: h.unsigned,
                    },
                    m if m == ROp::If as u8 => Self::If {
                        condition: input,
                        offset: signed,
                    },
                    m if m == ROp::Catch as u8 => Self::Catch {
                        exception_type: input,
                        handler_offset: signed,
                    },
                    m if m == ROp::Aa as u8 => Self::Aa { out, input, offset: signed },
                    m if m == ROp::Ad as u8 => Self::Ad { out, input, offset: signed },
                    m if m == ROp::Param as u8 => Self::Param {
                        slot_index: signed,
                        input,
                    },
                    _ => return Err(unknown()),
                }
            }
            Format::F => {
                let out = decode_reg(p, 0)?;
                let bits = imm_bits(p, 1, 32) as u32;
                match h.mnemonic {
                    m if m == FOp::Lui as u8 => Self::Lui {
                        out,
                        bits,
                        unsigned: h.unsigned,
                    },
                    m if m == FOp::Lli as u8 => Self::Lli { out, bits },
                    _ => return Err(unknown()),
                }
            }
            Format::M => {
                let out = decode_reg(p, 0)?;
                let base = decode_reg(p, 1)?;
                let size_bits = imm_bits(p, 2, 8) as u8;
                let size = MemSize::from_bits(size_bits).ok_or(DecodeError::InvalidTypeCast(size_bits))?;
                let offset24 = {
                    // offset occupies the low 24 bits after the 8-bit size spec
                    let shift = PAYLOAD_BITS - REGISTER_ACCESS_BITS * 2 - 8 - 24;
                    let bits = (p >> shift) & ((1 << 24) - 1);
                    sign_extend(bits, 24) as i32
                };
                match h.mnemonic {
                    m if m == MOp::Sm as u8 => Self::Sm {
                        base,
                        value: out,
                        size,
                        offset: offset24,
                    },
                    m if m == MOp::Lm as u8 => Self::Lm {
                        out,
                        base,
                        size,
                        offset: offset24,
                    },
                    _ => return Err(unknown()),
                }
            }
        })
    }

    /// Run-length of this instruction's LUI/LLI-style immediate, if any.
    ///
    /// Decompose into `(format, mnemonic, greedy, unsigned, payload)` for
    /// re-encoding.
    #[allow(clippy::too_many_lines)]
    fn parts(self) -> (Format, u8, bool, bool, u64) {
        match self {
            Self::Nop => (Format::N, NOp::Nop as u8, false, false, 0),
            Self::Try => (Format::N, NOp::Try as u8, false, false, 0),
            Self::Enter => (Format::N, NOp::Enter as u8, false, false, 0),
            Self::Leave => (Format::N, NOp::Leave as u8, false, false, 0),
            Self::Halt => (Format::N, NOp::Halt as u8, false, false, 0),

            Self::PtrLive { reg } => (Format::S, SOp::PtrLive as u8, false, false, pack_regs(&[reg])),
            Self::Delete { reg } => (Format::S, SOp::Delete as u8, false, false, pack_regs(&[reg])),
            Self::Vector { out } => (Format::S, SOp::Vector as u8, false, false, pack_regs(&[out])),
            Self::Struct { out } => (Format::S, SOp::Struct as u8, false, false, pack_regs(&[out])),
            Self::SelfPid { out } => (Format::S, SOp::SelfPid as u8, false, false, pack_regs(&[out])),
            Self::Tailcall { function } => {
                (Format::S, SOp::Tailcall as u8, false, false, pack_regs(&[function]))
            }
            Self::Defer { function } => (Format::S, SOp::Defer as u8, false, false, pack_regs(&[function])),
            Self::Watchdog { function } => {
                (Format::S, SOp::Watchdog as u8, false, false, pack_regs(&[function]))
            }
            Self::Return { value } => (Format::S, SOp::Return as u8, false, false, pack_regs(&[value])),
            Self::Throw { value } => (Format::S, SOp::Throw as u8, false, false, pack_regs(&[value])),
            Self::IoCancel { interaction } => {
                (Format::S, SOp::IoCancel as u8, false, false, pack_regs(&[interaction]))
            }
            Self::IoClose { handle } => (Format::S, SOp::IoClose as u8, false, false, pack_regs(&[handle])),
            Self::Draw { out } => (Format::S, SOp::Draw as u8, false, false, pack_regs(&[out])),

            Self::Move { out, input } => (Format::D, DOp::Move as u8, false, false, pack_regs(&[out, input])),
            Self::Copy { out, input } => (Format::D, DOp::Copy as u8, false, false, pack_regs(&[out, input])),
            Self::Ptr { out, input } => (Format::D, DOp::Ptr as u8, false, false, pack_regs(&[out, input])),
            Self::Swap { a, b } => (Format::D, DOp::Swap as u8, false, false, pack_regs(&[a, b])),
            Self::IsNull { out, input } => {
                (Format::D, DOp::IsNull as u8, false, false, pack_regs(&[out, input]))
            }
            Self::VLen { out, vector } => (Format::D, DOp::VLen as u8, false, false, pack_regs(&[out, vector])),
            Self::StructKeys { out, structure } => {
                (Format::D, DOp::StructKeys as u8, false, false, pack_regs(&[out, structure]))
            }
            Self::Call { out, function } => {
                (Format::D, DOp::Call as u8, false, false, pack_regs(&[out, function]))
            }
            Self::Process { out, function } => {
                (Format::D, DOp::Process as u8, false, false, pack_regs(&[out, function]))
            }
            Self::Actor { out, function } => {
                (Format::D, DOp::Actor as u8, false, false, pack_regs(&[out, function]))
            }
            Self::Send { target, value } => {
                (Format::D, DOp::Send as u8, false, false, pack_regs(&[target, value]))
            }
            Self::Receive { out, timeout } => {
                (Format::D, DOp::Receive as u8, false, false, pack_regs(&[out, timeout]))
            }
            Self::VPush { vector, value } => {
                (Format::D, DOp::VPush as u8, false, false, pack_regs(&[vector, value]))
            }
            Self::Pamv { slot, input } => (Format::D, DOp::Pamv as u8, false, false, pack_regs(&[slot, input])),
            Self::Arg { out, parameter } => {
                (Format::D, DOp::Arg as u8, false, false, pack_regs(&[out, parameter]))
            }
            Self::IoRead { out, handle } => {
                (Format::D, DOp::IoRead as u8, false, false, pack_regs(&[out, handle]))
            }
            Self::IoWrite { out, handle } => {
                (Format::D, DOp::IoWrite as u8, false, false, pack_regs(&[out, handle]))
            }

            Self::VInsert { vector, value, index } => {
                (Format::T, TOp::VInsert as u8, false, false, pack_regs(&[vector, value, index]))
            }
            Self::VPop { out, vector, index } => {
                (Format::T, TOp::VPop as u8, false, false, pack_regs(&[out, vector, index]))
            }
            Self::VAt { out, vector, index } => {
                (Format::T, TOp::VAt as u8, false, false, pack_regs(&[out, vector, index]))
            }
            Self::StructInsert { structure, key, value } => (
                Format::T,
                TOp::StructInsert as u8,
                false,
                false,
                pack_regs(&[structure, key, value]),
            ),
            Self::StructRemove { out, structure, key } => {
                (Format::T, TOp::StructRemove as u8, false, false, pack_regs(&[out, structure, key]))
            }
            Self::StructAt { out, structure, key } => {
                (Format::T, TOp::StructAt as u8, false, false, pack_regs(&[out, structure, key]))
            }
            Self::PidEq { out, a, b } => (Format::T, TOp::PidEq as u8, false, false, pack_regs(&[out, a, b])),
            Self::Join { out, pid, timeout } => {
                (Format::T, TOp::Join as u8, false, false, pack_regs(&[out, pid, timeout]))
            }
            Self::IoWait { out, interaction, timeout } => (
                Format::T,
                TOp::IoWait as u8,
                false,
                false,
                pack_regs(&[out, interaction, timeout]),
            ),

            Self::Cast { out, type_tag } => (
                Format::E,
                EOp::Cast as u8,
                false,
                false,
                pack_regs(&[out]) | pack_imm(1, 40, u64::from(type_tag)),
            ),
            Self::Atom { out, rodata_offset } => (
                Format::E,
                EOp::Atom as u8,
                false,
                false,
                pack_regs(&[out]) | pack_imm(1, 40, u64::from(rodata_offset)),
            ),
            Self::Double { out, rodata_offset } => (
                Format::E,
                EOp::Double as u8,
                false,
                false,
                pack_regs(&[out]) | pack_imm(1, 40, u64::from(rodata_offset)),
            ),
            Self::String { out, rodata_offset } => (
                Format::E,
                EOp::String as u8,
                false,
                false,
                pack_regs(&[out]) | pack_imm(1, 40, u64::from(rodata_offset)),
            ),
            Self::Frame { slots } => (
                Format::E,
                EOp::Frame as u8,
                false,
                false,
                pack_regs(&[RegisterAccess::VOID]) | pack_imm(1, 40, u64::from(slots)),
            ),
            Self::AllocateRegisters { count } => (
                Format::E,
                EOp::AllocateRegisters as u8,
                false,
                false,
                pack_regs(&[RegisterAccess::VOID]) | pack_imm(1, 40, u64::from(count)),
            ),
            Self::Jump { offset } => (
                Format::E,
                EOp::Jump as u8,
                false,
                false,
                pack_regs(&[RegisterAccess::VOID]) | pack_imm(1, 40, (offset as i64 as u64) & ((1 << 40) - 1)),
            ),
            Self::Import { module_name_rodata_offset } => (
                Format::E,
                EOp::Import as u8,
                false,
                false,
                pack_regs(&[RegisterAccess::VOID])
                    | pack_imm(1, 40, u64::from(module_name_rodata_offset)),
            ),
            Self::Arodp { out, rodata_offset } => (
                Format::E,
                EOp::Arodp as u8,
                false,
                false,
                pack_regs(&[out]) | pack_imm(1, 40, u64::from(rodata_offset)),
            ),
            Self::Atxtp { out, text_offset } => (
                Format::E,
                EOp::Atxtp as u8,
                false,
                false,
                pack_regs(&[out]) | pack_imm(1, 40, u64::from(text_offset)),
            ),

            Self::Addi { out, input, immediate, unsigned } => (
                Format::R,
                ROp::Addi as u8,
                false,
                unsigned,
                pack_regs(&[out, input]) | pack_imm(2, 32, (immediate as i64 as u64) & 0xFFFF_FFFF),
            ),
            Self::If { condition, offset } => (
                Format::R,
                ROp::If as u8,
                false,
                false,
                pack_regs(&[RegisterAccess::VOID, condition])
                    | pack_imm(2, 32, (offset as i64 as u64) & 0xFFFF_FFFF),
            ),
            Self::Catch { exception_type, handler_offset } => (
                Format::R,
                ROp::Catch as u8,
                false,
                false,
                pack_regs(&[RegisterAccess::VOID, exception_type])
                    | pack_imm(2, 32, (handler_offset as i64 as u64) & 0xFFFF_FFFF),
            ),
            Self::Aa { out, input, offset } => (
                Format::R,
                ROp::Aa as u8,
                false,
                false,
                pack_regs(&[out, input]) | pack_imm(2, 32, (offset as i64 as u64) & 0xFFFF_FFFF),
            ),
            Self::Ad { out, input, offset } => (
                Format::R,
                ROp::Ad as u8,
                false,
                false,
                pack_regs(&[out, input]) | pack_imm(2, 32, (offset as i64 as u64) & 0xFFFF_FFFF),
            ),
            Self::Param { slot_index, input } => (
                Format::R,
                ROp::Param as u8,
                false,
                false,
                pack_regs(&[RegisterAccess::VOID, input])
                    | pack_imm(2, 32, (slot_index as i64 as u64) & 0xFFFF_FFFF),
            ),

            Self::Lui { out, bits, unsigned } => (
                Format::F,
                FOp::Lui as u8,
                false,
                unsigned,
                pack_regs(&[out]) | pack_imm(1, 32, u64::from(bits)),
            ),
            Self::Lli { out, bits } => (
                Format::F,
                FOp::Lli as u8,
                false,
                false,
                pack_regs(&[out]) | pack_imm(1, 32, u64::from(bits)),
            ),

            Self::Sm { base, value, size, offset } => (
                Format::M,
                MOp::Sm as u8,
                false,
                false,
                pack_regs(&[value, base])
                    | pack_imm(2, 8, u64::from(size.to_bits()))
                    | pack_imm_at_tail(offset),
            ),
            Self::Lm { out, base, size, offset } => (
                Format::M,
                MOp::Lm as u8,
                false,
                false,
                pack_regs(&[out, base])
                    | pack_imm(2, 8, u64::from(size.to_bits()))
                    | pack_imm_at_tail(offset),
            ),
        }
    }

    /// Set the `GREEDY` flag on an encoded instruction.
    #[must_use]
    pub fn encode_with_greedy(self, greedy: bool) -> u64 {
        let (format, mnemonic, _, unsigned, payload) = self.parts();
        Header {
            format,
            greedy,
            unsigned,
            mnemonic,
            payload,
        }
        .encode()
    }
}

/// Pack a 24-bit signed offset into the low 24 bits of the `M` format
/// payload (after two register accesses and the 8-bit size spec).
fn pack_imm_at_tail(offset: i32) -> u64 {
    let shift = PAYLOAD_BITS - REGISTER_ACCESS_BITS * 2 - 8 - 24;
    ((offset as i64 as u64) & ((1 << 24) - 1)) << shift
}
