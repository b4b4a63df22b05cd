// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The runtime value representation.
//!
//! Tags follow the data model: immediates (`Int64`, `UInt64`, `F32`, `F64`,
//! `Pid`, `IoHandle`) are stored inline; compound values (`StringV`,
//! `Bits`, `Vector`, `Struct`, `Closure`) are heap-allocated behind an `Arc`
//! so `Value::clone()` is the ownership-preserving "reference" operation the
//! register cell flags build on top of, not a deep copy - `COPY` performs
//! the deep copy explicitly, per type. `Arc`/`Mutex` rather than `Rc`/
//! `RefCell`: a process's registers may be inspected by a scheduler worker
//! thread other than the one currently running it, and a value handed to
//! `SEND` moves into another process's mailbox on a different thread.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::atom::Atom;
use crate::pid::Pid;

/// A function reference: a resolved `(module, text offset)` pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionRef {
    pub module: Atom,
    pub text_offset: u32,
}

/// A closure: a function reference plus the register cells it captured at
/// creation time.
#[derive(Debug)]
pub struct Closure {
    pub function: FunctionRef,
    pub captured: Vec<Value>,
}

/// An I/O interaction handle, `(scheduler_id, sequence)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IoHandle {
    pub scheduler_id: u32,
    pub sequence: u64,
}

/// A raised or caught exception: a type name plus an arbitrary payload.
#[derive(Debug, Clone)]
pub struct Exception {
    pub kind: Atom,
    pub payload: Box<Value>,
}

/// A pointer: a weak reference to a value owned by some process, authenticated
/// against the current process before dereference.
#[derive(Clone, Debug)]
pub struct Pointer {
    pub owner: Pid,
    pub target: Arc<Mutex<Value>>,
}

impl PartialEq for Pointer {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && Arc::ptr_eq(&self.target, &other.target)
    }
}

/// The runtime value representation.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Void,
    Int64(i64),
    UInt64(u64),
    F32(f32),
    F64(f64),
    Pointer(Pointer),
    Atom(Atom),
    Pid(Pid),
    StringV(Arc<String>),
    Bits(Arc<Vec<u8>>),
    Vector(Arc<Mutex<Vec<Value>>>),
    Struct(Arc<Mutex<BTreeMap<Atom, Value>>>),
    Closure(Arc<Closure>),
    FunctionRef(FunctionRef),
    IoHandle(IoHandle),
    Exception(Arc<Exception>),
}

/// The type tags values carry, independent of their payload - what `CAST`
/// and `ISNULL`-style type checks switch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeTag {
    Void = 0,
    Int64 = 1,
    UInt64 = 2,
    F32 = 3,
    F64 = 4,
    Pointer = 5,
    Atom = 6,
    Pid = 7,
    StringV = 8,
    Bits = 9,
    Vector = 10,
    Struct = 11,
    Closure = 12,
    FunctionRef = 13,
    IoHandle = 14,
    Exception = 15,
}

impl Value {
    #[must_use]
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Void => TypeTag::Void,
            Self::Int64(_) => TypeTag::Int64,
            Self::UInt64(_) => TypeTag::UInt64,
            Self::F32(_) => TypeTag::F32,
            Self::F64(_) => TypeTag::F64,
            Self::Pointer(_) => TypeTag::Pointer,
            Self::Atom(_) => TypeTag::Atom,
            Self::Pid(_) => TypeTag::Pid,
            Self::StringV(_) => TypeTag::StringV,
            Self::Bits(_) => TypeTag::Bits,
            Self::Vector(_) => TypeTag::Vector,
            Self::Struct(_) => TypeTag::Struct,
            Self::Closure(_) => TypeTag::Closure,
            Self::FunctionRef(_) => TypeTag::FunctionRef,
            Self::IoHandle(_) => TypeTag::IoHandle,
            Self::Exception(_) => TypeTag::Exception,
        }
    }

    #[must_use]
    pub const fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    /// Whether this value may legally cross a `SEND` boundary.
    ///
    /// Pointers and closures are tied to the registers of the process that
    /// created them; letting them cross would violate process isolation.
    #[must_use]
    pub const fn is_sendable(&self) -> bool {
        !matches!(self, Self::Pointer(_) | Self::Closure(_))
    }

    /// Deep-copy this value the way `COPY` and message-passing do: scalars
    /// copy trivially, compound values clone their heap payload rather than
    /// sharing the `Arc`.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        match self {
            Self::StringV(s) => Self::StringV(Arc::new((**s).clone())),
            Self::Bits(b) => Self::Bits(Arc::new((**b).clone())),
            Self::Vector(v) => {
                let copied: Vec<Value> =
                    v.lock().expect("vector mutex poisoned").iter().map(Value::deep_copy).collect();
                Self::Vector(Arc::new(Mutex::new(copied)))
            }
            Self::Struct(s) => {
                let copied: BTreeMap<Atom, Value> = s
                    .lock()
                    .expect("struct mutex poisoned")
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy()))
                    .collect();
                Self::Struct(Arc::new(Mutex::new(copied)))
            }
            other => other.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "void"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Pointer(_) => write!(f, "<ptr>"),
            Self::Atom(a) => write!(f, "{a}"),
            Self::Pid(p) => write!(f, "{p}"),
            Self::StringV(s) => write!(f, "{s}"),
            Self::Bits(b) => write!(f, "<{} bits>", b.len() * 8),
            Self::Vector(v) => {
                write!(f, "[")?;
                for (i, item) in v.lock().expect("vector mutex poisoned").iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Struct(s) => {
                write!(f, "{{")?;
                for (i, (k, v)) in s.lock().expect("struct mutex poisoned").iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Self::Closure(c) => write!(f, "<closure {}>", c.function.module),
            Self::FunctionRef(fr) => write!(f, "<fn {}>", fr.module),
            Self::IoHandle(h) => write!(f, "<io {}:{}>", h.scheduler_id, h.sequence),
            Self::Exception(e) => write!(f, "<exception {}>", e.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_copy_of_vector_is_independent() {
        let original = Value::Vector(Arc::new(Mutex::new(vec![Value::Int64(1)])));
        let copy = original.deep_copy();
        if let Value::Vector(v) = &copy {
            v.lock().unwrap().push(Value::Int64(2));
        }
        if let Value::Vector(v) = &original {
            assert_eq!(v.lock().unwrap().len(), 1);
        }
    }

    #[test]
    fn closures_and_pointers_are_not_sendable() {
        let closure = Value::Closure(Arc::new(Closure {
            function: FunctionRef { module: Atom::intern("main"), text_offset: 0 },
            captured: vec![],
        }));
        assert!(!closure.is_sendable());
        assert!(Value::Int64(4).is_sendable());
        assert!(Value::Atom(Atom::intern("ok")).is_sendable());
    }

    #[test]
    fn void_is_default() {
        assert!(Value::default().is_void());
    }
}
