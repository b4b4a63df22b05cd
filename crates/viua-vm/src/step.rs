// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Pure register-to-register instruction semantics: everything that neither
//! pushes/pops a frame nor touches kernel state. `viua-vm::executor` handles
//! the rest (calls, unwinding, message passing, I/O, FFI) since those need
//! more than one frame's worth of context.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use viua_elf::Module;
use viua_isa::RegisterAccess;
use viua_value::{Atom, FunctionRef, Pid, TypeTag, Value};

use crate::error::RuntimeError;
use crate::registers::RegisterFile;

fn expect_vector(value: &Value) -> Result<&Arc<Mutex<Vec<Value>>>, RuntimeError> {
    match value {
        Value::Vector(v) => Ok(v),
        other => Err(RuntimeError::InvalidType { expected: TypeTag::Vector, found: other.type_tag() }),
    }
}

fn expect_struct(value: &Value) -> Result<&Arc<Mutex<BTreeMap<Atom, Value>>>, RuntimeError> {
    match value {
        Value::Struct(s) => Ok(s),
        other => Err(RuntimeError::InvalidType { expected: TypeTag::Struct, found: other.type_tag() }),
    }
}

fn expect_atom(value: Value) -> Result<Atom, RuntimeError> {
    match value {
        Value::Atom(a) => Ok(a),
        other => Err(RuntimeError::InvalidType { expected: TypeTag::Atom, found: other.type_tag() }),
    }
}

fn expect_index(value: Value) -> Result<usize, RuntimeError> {
    match value {
        Value::Int64(n) if n >= 0 => Ok(n as usize),
        Value::UInt64(n) => Ok(n as usize),
        other => Err(RuntimeError::InvalidType { expected: TypeTag::Int64, found: other.type_tag() }),
    }
}

pub fn ptr_live(regs: &mut RegisterFile<'_>, reg: RegisterAccess) -> Result<(), RuntimeError> {
    let is_live = matches!(regs.read(reg)?, Value::Pointer(_));
    regs.write(reg, Value::Int64(i64::from(is_live)))
}

pub fn delete(regs: &mut RegisterFile<'_>, reg: RegisterAccess) -> Result<(), RuntimeError> {
    let _ = regs.take(reg)?;
    Ok(())
}

pub fn new_vector(regs: &mut RegisterFile<'_>, out: RegisterAccess) -> Result<(), RuntimeError> {
    regs.write(out, Value::Vector(Arc::new(Mutex::new(Vec::new()))))
}

pub fn new_struct(regs: &mut RegisterFile<'_>, out: RegisterAccess) -> Result<(), RuntimeError> {
    regs.write(out, Value::Struct(Arc::new(Mutex::new(BTreeMap::new()))))
}

pub fn mv(regs: &mut RegisterFile<'_>, out: RegisterAccess, input: RegisterAccess) -> Result<(), RuntimeError> {
    let value = regs.take(input)?;
    regs.write(out, value)
}

pub fn cp(regs: &mut RegisterFile<'_>, out: RegisterAccess, input: RegisterAccess) -> Result<(), RuntimeError> {
    let value = regs.copy(input)?;
    regs.write(out, value)
}

/// `PTR`: bind a pointer into `out` seeded with `input`'s current value.
///
/// `RegisterCell` stores values inline rather than behind a shared
/// `Arc<Mutex<Value>>`, so a pointer cannot alias an arbitrary register's
/// cell directly; it aliases a fresh heap cell carrying a snapshot of
/// `input`'s value instead. Writes through the pointer are visible to every
/// other holder of that same pointer value, just not back into `input`.
pub fn ptr(regs: &mut RegisterFile<'_>, out: RegisterAccess, input: RegisterAccess, owner: Pid) -> Result<(), RuntimeError> {
    let snapshot = regs.read(input)?;
    let pointer = Value::Pointer(viua_value::Pointer { owner, target: Arc::new(Mutex::new(snapshot)) });
    regs.bind_pointer(out, pointer)
}

pub fn swap(regs: &mut RegisterFile<'_>, a: RegisterAccess, b: RegisterAccess) -> Result<(), RuntimeError> {
    let va = regs.take(a)?;
    let vb = regs.take(b)?;
    regs.write(a, vb)?;
    regs.write(b, va)
}

pub fn is_null(regs: &mut RegisterFile<'_>, out: RegisterAccess, input: RegisterAccess) -> Result<(), RuntimeError> {
    let is_void = regs.read(input)?.is_void();
    regs.write(out, Value::Int64(i64::from(is_void)))
}

pub fn vlen(regs: &mut RegisterFile<'_>, out: RegisterAccess, vector: RegisterAccess) -> Result<(), RuntimeError> {
    let v = regs.read(vector)?;
    let len = expect_vector(&v)?.lock().expect("vector mutex poisoned").len();
    regs.write(out, Value::Int64(len as i64))
}

pub fn struct_keys(regs: &mut RegisterFile<'_>, out: RegisterAccess, structure: RegisterAccess) -> Result<(), RuntimeError> {
    let s = regs.read(structure)?;
    let keys: Vec<Value> =
        expect_struct(&s)?.lock().expect("struct mutex poisoned").keys().cloned().map(Value::Atom).collect();
    regs.write(out, Value::Vector(Arc::new(Mutex::new(keys))))
}

pub fn vpush(regs: &mut RegisterFile<'_>, vector: RegisterAccess, value: RegisterAccess) -> Result<(), RuntimeError> {
    let v = regs.read(vector)?;
    let pushed = regs.take(value)?;
    expect_vector(&v)?.lock().expect("vector mutex poisoned").push(pushed);
    Ok(())
}

pub fn vinsert(regs: &mut RegisterFile<'_>, vector: RegisterAccess, value: RegisterAccess, index: RegisterAccess) -> Result<(), RuntimeError> {
    let v = regs.read(vector)?;
    let index = expect_index(regs.read(index)?)?;
    let inserted = regs.take(value)?;
    let mut guard = expect_vector(&v)?.lock().expect("vector mutex poisoned");
    let index = index.min(guard.len());
    guard.insert(index, inserted);
    Ok(())
}

pub fn vpop(regs: &mut RegisterFile<'_>, out: RegisterAccess, vector: RegisterAccess, index: RegisterAccess) -> Result<(), RuntimeError> {
    let v = regs.read(vector)?;
    let index = expect_index(regs.read(index)?)?;
    let popped = {
        let mut guard = expect_vector(&v)?.lock().expect("vector mutex poisoned");
        if index >= guard.len() {
            Value::Void
        } else {
            guard.remove(index)
        }
    };
    regs.write(out, popped)
}

pub fn vat(regs: &mut RegisterFile<'_>, out: RegisterAccess, vector: RegisterAccess, index: RegisterAccess) -> Result<(), RuntimeError> {
    let v = regs.read(vector)?;
    let index = expect_index(regs.read(index)?)?;
    let value = expect_vector(&v)?.lock().expect("vector mutex poisoned").get(index).cloned().unwrap_or_default();
    regs.write(out, value)
}

pub fn struct_insert(regs: &mut RegisterFile<'_>, structure: RegisterAccess, key: RegisterAccess, value: RegisterAccess) -> Result<(), RuntimeError> {
    let s = regs.read(structure)?;
    let key = expect_atom(regs.read(key)?)?;
    let inserted = regs.take(value)?;
    expect_struct(&s)?.lock().expect("struct mutex poisoned").insert(key, inserted);
    Ok(())
}

pub fn struct_remove(regs: &mut RegisterFile<'_>, out: RegisterAccess, structure: RegisterAccess, key: RegisterAccess) -> Result<(), RuntimeError> {
    let s = regs.read(structure)?;
    let key = expect_atom(regs.read(key)?)?;
    let removed = expect_struct(&s)?.lock().expect("struct mutex poisoned").remove(&key).unwrap_or_default();
    regs.write(out, removed)
}

pub fn struct_at(regs: &mut RegisterFile<'_>, out: RegisterAccess, structure: RegisterAccess, key: RegisterAccess) -> Result<(), RuntimeError> {
    let s = regs.read(structure)?;
    let key = expect_atom(regs.read(key)?)?;
    let value = expect_struct(&s)?.lock().expect("struct mutex poisoned").get(&key).cloned().unwrap_or_default();
    regs.write(out, value)
}

pub fn pid_eq(regs: &mut RegisterFile<'_>, out: RegisterAccess, a: RegisterAccess, b: RegisterAccess) -> Result<(), RuntimeError> {
    let (va, vb) = (regs.read(a)?, regs.read(b)?);
    let eq = match (va, vb) {
        (Value::Pid(a), Value::Pid(b)) => a == b,
        (a, b) => return Err(RuntimeError::InvalidType { expected: TypeTag::Pid, found: if matches!(a, Value::Pid(_)) { b.type_tag() } else { a.type_tag() } }),
    };
    regs.write(out, Value::Int64(i64::from(eq)))
}

pub fn cast(regs: &mut RegisterFile<'_>, out: RegisterAccess, type_tag: u8) -> Result<(), RuntimeError> {
    let value = regs.read(out)?;
    let casted = match type_tag {
        1 => Value::Int64(as_i64(&value)?),
        2 => Value::UInt64(as_i64(&value)? as u64),
        3 => Value::F32(as_f64(&value)? as f32),
        4 => Value::F64(as_f64(&value)?),
        8 => Value::StringV(Arc::new(value.to_string())),
        6 => match value {
            Value::StringV(s) => Value::Atom(Atom::intern(&s)),
            Value::Atom(a) => Value::Atom(a),
            other => return Err(RuntimeError::InvalidType { expected: TypeTag::StringV, found: other.type_tag() }),
        },
        _ => return Err(RuntimeError::InvalidType { expected: TypeTag::Int64, found: value.type_tag() }),
    };
    regs.write(out, casted)
}

fn as_i64(value: &Value) -> Result<i64, RuntimeError> {
    match value {
        Value::Int64(n) => Ok(*n),
        Value::UInt64(n) => Ok(*n as i64),
        Value::F32(f) => Ok(*f as i64),
        Value::F64(f) => Ok(*f as i64),
        // `ADDI rX, void, imm` is the short form of a literal load: the
        // assembler folds it from `LI rX, imm` when the value fits in 32
        // bits, so a void input must read as the additive identity.
        Value::Void => Ok(0),
        other => Err(RuntimeError::InvalidType { expected: TypeTag::Int64, found: other.type_tag() }),
    }
}

fn as_f64(value: &Value) -> Result<f64, RuntimeError> {
    match value {
        Value::Int64(n) => Ok(*n as f64),
        Value::UInt64(n) => Ok(*n as f64),
        Value::F32(f) => Ok(f64::from(*f)),
        Value::F64(f) => Ok(*f),
        other => Err(RuntimeError::InvalidType { expected: TypeTag::F64, found: other.type_tag() }),
    }
}

pub fn load_atom(regs: &mut RegisterFile<'_>, module: &Module, out: RegisterAccess, rodata_offset: u32) -> Result<(), RuntimeError> {
    let bytes = module.rodata_entry(rodata_offset).map_err(|_| RuntimeError::UnresolvedSymbol)?;
    let text = String::from_utf8_lossy(bytes).into_owned();
    regs.write(out, Value::Atom(Atom::intern(&text)))
}

pub fn load_double(regs: &mut RegisterFile<'_>, module: &Module, out: RegisterAccess, rodata_offset: u32) -> Result<(), RuntimeError> {
    let bytes = module.rodata_entry(rodata_offset).map_err(|_| RuntimeError::UnresolvedSymbol)?;
    let arr: [u8; 8] = bytes.try_into().map_err(|_| RuntimeError::UnresolvedSymbol)?;
    regs.write(out, Value::F64(f64::from_le_bytes(arr)))
}

pub fn load_string(regs: &mut RegisterFile<'_>, module: &Module, out: RegisterAccess, rodata_offset: u32) -> Result<(), RuntimeError> {
    let bytes = module.rodata_entry(rodata_offset).map_err(|_| RuntimeError::UnresolvedSymbol)?;
    regs.write(out, Value::StringV(Arc::new(String::from_utf8_lossy(bytes).into_owned())))
}

pub fn arodp(regs: &mut RegisterFile<'_>, module: &Module, out: RegisterAccess, rodata_offset: u32) -> Result<(), RuntimeError> {
    let bytes = module.rodata_entry(rodata_offset).map_err(|_| RuntimeError::UnresolvedSymbol)?;
    regs.write(out, Value::Bits(Arc::new(bytes.to_vec())))
}

pub fn atxtp(regs: &mut RegisterFile<'_>, current_module: Atom, out: RegisterAccess, text_offset: u32) -> Result<(), RuntimeError> {
    regs.write(out, Value::FunctionRef(FunctionRef { module: current_module, text_offset }))
}

pub fn addi(regs: &mut RegisterFile<'_>, out: RegisterAccess, input: RegisterAccess, immediate: i32, unsigned: bool) -> Result<(), RuntimeError> {
    let value = regs.read(input)?;
    let result = if unsigned {
        Value::UInt64((as_i64(&value)? as u64).wrapping_add(immediate as i64 as u64))
    } else {
        Value::Int64(as_i64(&value)?.wrapping_add(i64::from(immediate)))
    };
    regs.write(out, result)
}

/// `AA`/`AD`: pointer arithmetic. The pointer's target is shared as-is; the
/// byte offset is not tracked on the value (there is no field to track it
/// in), so callers fold any cumulative offset into the immediate operand of
/// a subsequent `SM`/`LM` instead.
pub fn pointer_arith(regs: &mut RegisterFile<'_>, out: RegisterAccess, input: RegisterAccess) -> Result<(), RuntimeError> {
    let value = regs.read(input)?;
    match value {
        Value::Pointer(_) => regs.write(out, value),
        other => Err(RuntimeError::InvalidType { expected: TypeTag::Pointer, found: other.type_tag() }),
    }
}

pub fn lui(regs: &mut RegisterFile<'_>, out: RegisterAccess, bits: u32, unsigned: bool) -> Result<(), RuntimeError> {
    let high = u64::from(bits) << 32;
    regs.write(out, if unsigned { Value::UInt64(high) } else { Value::Int64(high as i64) })
}

pub fn lli(regs: &mut RegisterFile<'_>, out: RegisterAccess, bits: u32) -> Result<(), RuntimeError> {
    let existing = regs.read(out)?;
    let combined = match existing {
        Value::UInt64(n) => Value::UInt64(n | u64::from(bits)),
        Value::Int64(n) => Value::Int64((n as u64 | u64::from(bits)) as i64),
        _ => Value::UInt64(u64::from(bits)),
    };
    regs.write(out, combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use viua_isa::RegisterSet as Rs;
    use viua_process::{Frame, RegisterSet};

    fn file<'a>(frame: &'a mut Frame, global: &'a mut RegisterSet, statics: &'a mut RegisterSet) -> RegisterFile<'a> {
        RegisterFile { frame, global, statics }
    }

    fn frame_with_locals(n: usize) -> Frame {
        Frame::new(
            Atom::intern("f/0"),
            Atom::intern("m"),
            RegisterSet::allocate(n),
            0,
            RegisterAccess::direct(Rs::Local, 0).unwrap(),
        )
    }

    #[test]
    fn lui_then_lli_assembles_a_64_bit_immediate() {
        let mut frame = frame_with_locals(1);
        let mut global = RegisterSet::allocate(0);
        let mut statics = RegisterSet::allocate(0);
        let mut regs = file(&mut frame, &mut global, &mut statics);
        let out = RegisterAccess::direct(Rs::Local, 0).unwrap();
        lui(&mut regs, out, 1, true).unwrap();
        lli(&mut regs, out, 0xDEAD_BEEF).unwrap();
        assert!(matches!(regs.read(out).unwrap(), Value::UInt64(n) if n == (1u64 << 32) | 0xDEAD_BEEF));
    }

    #[test]
    fn vector_push_and_len_round_trip() {
        let mut frame = frame_with_locals(2);
        let mut global = RegisterSet::allocate(0);
        let mut statics = RegisterSet::allocate(0);
        let mut regs = file(&mut frame, &mut global, &mut statics);
        let out = RegisterAccess::direct(Rs::Local, 0).unwrap();
        let value = RegisterAccess::direct(Rs::Local, 1).unwrap();
        new_vector(&mut regs, out).unwrap();
        regs.write(value, Value::Int64(9)).unwrap();
        vpush(&mut regs, out, value).unwrap();
        vlen(&mut regs, value, out).unwrap();
        assert!(matches!(regs.read(value).unwrap(), Value::Int64(1)));
    }

    #[test]
    fn struct_insert_and_at_round_trip() {
        let mut frame = frame_with_locals(3);
        let mut global = RegisterSet::allocate(0);
        let mut statics = RegisterSet::allocate(0);
        let mut regs = file(&mut frame, &mut global, &mut statics);
        let s = RegisterAccess::direct(Rs::Local, 0).unwrap();
        let key = RegisterAccess::direct(Rs::Local, 1).unwrap();
        let value = RegisterAccess::direct(Rs::Local, 2).unwrap();
        new_struct(&mut regs, s).unwrap();
        regs.write(key, Value::Atom(Atom::intern("k"))).unwrap();
        regs.write(value, Value::Int64(5)).unwrap();
        struct_insert(&mut regs, s, key, value).unwrap();
        regs.write(key, Value::Atom(Atom::intern("k"))).unwrap();
        struct_at(&mut regs, value, s, key).unwrap();
        assert!(matches!(regs.read(value).unwrap(), Value::Int64(5)));
    }

    #[test]
    fn cast_converts_int_to_string() {
        let mut frame = frame_with_locals(1);
        let mut global = RegisterSet::allocate(0);
        let mut statics = RegisterSet::allocate(0);
        let mut regs = file(&mut frame, &mut global, &mut statics);
        let out = RegisterAccess::direct(Rs::Local, 0).unwrap();
        regs.write(out, Value::Int64(42)).unwrap();
        cast(&mut regs, out, 8).unwrap();
        assert!(matches!(regs.read(out).unwrap(), Value::StringV(s) if &*s == "42"));
    }
}
