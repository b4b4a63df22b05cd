// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Register access encoding.
//!
//! A register access names one register cell: which register *set* it lives
//! in, how it should be dereferenced, and its index within that set. This is
//! the smallest addressable unit the ISA ever operates on; every S/D/T/E/R/M
//! format field that isn't a bare immediate is one of these, packed into 11
//! bits of an instruction word (see `crate::format`).

#[cfg(test)]
#[path = "register_test.rs"]
mod register_test;

use core::fmt;

/// Which register set an access refers to.
///
/// `Void` is not a real set; it is the sentinel meaning "no register here"
/// (e.g. an unused out-register on an instruction executed for effect only).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegisterSet {
    /// Local registers of the active frame.
    Local = 0,
    /// Static registers, one table per function, lazily materialised.
    Static = 1,
    /// Global registers, one set per process.
    Global = 2,
    /// The `arguments` set being assembled for a not-yet-issued call.
    Arguments = 3,
    /// The `parameters` set the callee received from its caller.
    Parameters = 4,
    /// Registers captured by a closure at creation time.
    ClosureLocal = 5,
    /// No register (sentinel).
    Void = 6,
}

impl RegisterSet {
    const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Local),
            1 => Some(Self::Static),
            2 => Some(Self::Global),
            3 => Some(Self::Arguments),
            4 => Some(Self::Parameters),
            5 => Some(Self::ClosureLocal),
            6 => Some(Self::Void),
            _ => None,
        }
    }

    const fn to_bits(self) -> u8 {
        self as u8
    }
}

/// How a register access dereferences its slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AccessSpecifier {
    /// `$i` - read/write the value owned by the cell directly.
    Direct = 0,
    /// `*i` - the cell holds a pointer; follow it before use.
    PointerDereference = 1,
    /// `@i` - the cell holds an integer; use *that* as the index into the
    /// same register set.
    RegisterIndirect = 2,
}

impl AccessSpecifier {
    const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Direct),
            1 => Some(Self::PointerDereference),
            2 => Some(Self::RegisterIndirect),
            _ => None,
        }
    }

    const fn to_bits(self) -> u8 {
        self as u8
    }
}

/// Highest addressable index within a register set.
pub const MAX_REGISTER_INDEX: u16 = 63;

const SET_BITS: u32 = 3;
const ACCESS_BITS: u32 = 2;
const INDEX_BITS: u32 = 6;
/// Total width in bits of an encoded [`RegisterAccess`].
pub const REGISTER_ACCESS_BITS: u32 = SET_BITS + ACCESS_BITS + INDEX_BITS;

const SET_SHIFT: u32 = ACCESS_BITS + INDEX_BITS;
const ACCESS_SHIFT: u32 = INDEX_BITS;
const INDEX_MASK: u16 = (1 << INDEX_BITS) - 1;

/// `(register_set, index, access_specifier)`, or the `Void` sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterAccess {
    set: RegisterSet,
    index: u16,
    access: AccessSpecifier,
}

impl RegisterAccess {
    /// The sentinel meaning "no register".
    pub const VOID: Self = Self {
        set: RegisterSet::Void,
        index: 0,
        access: AccessSpecifier::Direct,
    };

    /// Build a direct access into `set[index]`.
    ///
    /// Returns `None` if `index` exceeds [`MAX_REGISTER_INDEX`].
    #[must_use]
    pub const fn direct(set: RegisterSet, index: u16) -> Option<Self> {
        Self::new(set, index, AccessSpecifier::Direct)
    }

    /// Build a register access with an explicit [`AccessSpecifier`].
    ///
    /// Returns `None` if `index` exceeds [`MAX_REGISTER_INDEX`].
    #[must_use]
    pub const fn new(set: RegisterSet, index: u16, access: AccessSpecifier) -> Option<Self> {
        if index > MAX_REGISTER_INDEX {
            return None;
        }
        Some(Self { set, index, access })
    }

    /// Whether this is the `Void` sentinel.
    #[must_use]
    pub const fn is_void(self) -> bool {
        matches!(self.set, RegisterSet::Void)
    }

    #[must_use]
    pub const fn set(self) -> RegisterSet {
        self.set
    }

    #[must_use]
    pub const fn index(self) -> u16 {
        self.index
    }

    #[must_use]
    pub const fn access(self) -> AccessSpecifier {
        self.access
    }

    /// Pack into the low [`REGISTER_ACCESS_BITS`] bits of a `u32`.
    #[must_use]
    pub const fn encode(self) -> u32 {
        ((self.set.to_bits() as u32) << SET_SHIFT)
            | ((self.access.to_bits() as u32) << ACCESS_SHIFT)
            | (self.index as u32)
    }

    /// Inverse of [`Self::encode`]; only the low [`REGISTER_ACCESS_BITS`] bits
    /// of `bits` are consulted.
    pub fn decode(bits: u32) -> Result<Self, InvalidRegisterAccess> {
        let set_bits = ((bits >> SET_SHIFT) & 0b111) as u8;
        let access_bits = ((bits >> ACCESS_SHIFT) & 0b11) as u8;
        let index = (bits as u16) & INDEX_MASK;

        let set = RegisterSet::from_bits(set_bits).ok_or(InvalidRegisterAccess::BadSet(set_bits))?;
        let access = AccessSpecifier::from_bits(access_bits)
            .ok_or(InvalidRegisterAccess::BadAccessSpecifier(access_bits))?;

        if matches!(set, RegisterSet::Void) {
            return Ok(Self::VOID);
        }

        Ok(Self { set, index, access })
    }
}

impl fmt::Debug for RegisterAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_void() {
            return write!(f, "void");
        }
        let sigil = match self.access {
            AccessSpecifier::Direct => '$',
            AccessSpecifier::PointerDereference => '*',
            AccessSpecifier::RegisterIndirect => '@',
        };
        write!(f, "{sigil}{}.{:?}", self.index, self.set)
    }
}

/// A [`RegisterAccess`] failed to decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidRegisterAccess {
    /// The 3-bit set selector did not name a known register set.
    BadSet(u8),
    /// The 2-bit access selector did not name a known specifier.
    BadAccessSpecifier(u8),
}

impl fmt::Display for InvalidRegisterAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSet(b) => write!(f, "invalid register set selector: {b}"),
            Self::BadAccessSpecifier(b) => write!(f, "invalid access specifier: {b}"),
        }
    }
}
