// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! `SM`/`LM`: byte-addressed access into a `Bits` buffer through a pointer.
//!
//! The base register must hold a `Pointer` whose target is a `Bits` value;
//! `offset` is a plain byte displacement from the start of that buffer, not
//! from the pointer's own position. A store past the current end of the
//! buffer grows it with zero bytes rather than erroring, the way a stack or
//! heap allocator's backing store would; only a negative start index is
//! rejected.

use viua_isa::opcode::MemSize;
use viua_isa::RegisterAccess;
use viua_value::{TypeTag, Value};

use crate::error::RuntimeError;
use crate::registers::RegisterFile;

fn value_to_bytes(value: &Value, size: MemSize) -> Result<Vec<u8>, RuntimeError> {
    let bits: u64 = match value {
        Value::Int64(n) => *n as u64,
        Value::UInt64(n) => *n,
        Value::F64(f) => f.to_bits(),
        Value::F32(f) => u64::from(f.to_bits()),
        other => {
            return Err(RuntimeError::InvalidType { expected: TypeTag::UInt64, found: other.type_tag() })
        }
    };
    let full = bits.to_le_bytes();
    let n = (size.bytes() as usize).min(8);
    let mut out = full[..n].to_vec();
    // Quad (16 bytes) zero-extends the upper half; there is no 128-bit
    // value variant to source the high bytes from.
    out.resize(size.bytes() as usize, 0);
    Ok(out)
}

fn bytes_to_value(bytes: &[u8]) -> Value {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    Value::Int64(i64::from_le_bytes(buf))
}

fn target_bits<'a>(pointer: &'a Value) -> Result<&'a std::sync::Mutex<Value>, RuntimeError> {
    match pointer {
        Value::Pointer(p) => Ok(&p.target),
        other => Err(RuntimeError::InvalidType { expected: TypeTag::Pointer, found: other.type_tag() }),
    }
}

pub fn store(
    regs: &mut RegisterFile<'_>,
    base: RegisterAccess,
    value: RegisterAccess,
    size: MemSize,
    offset: i32,
) -> Result<(), RuntimeError> {
    let pointer = regs.read(base)?;
    let payload = regs.read(value)?;
    let bytes = value_to_bytes(&payload, size)?;
    let target = target_bits(&pointer)?;
    let mut guard = target.lock().expect("pointer target mutex poisoned");
    let buffer = match &mut *guard {
        Value::Bits(b) => b,
        other => return Err(RuntimeError::InvalidType { expected: TypeTag::Bits, found: other.type_tag() }),
    };
    if offset < 0 {
        return Err(RuntimeError::MemoryOutOfBounds { size, offset: i64::from(offset) });
    }
    let start = offset as usize;
    let end = start + bytes.len();
    let vec = std::sync::Arc::make_mut(buffer);
    if vec.len() < end {
        vec.resize(end, 0);
    }
    vec[start..end].copy_from_slice(&bytes);
    Ok(())
}

pub fn load(
    regs: &mut RegisterFile<'_>,
    out: RegisterAccess,
    base: RegisterAccess,
    size: MemSize,
    offset: i32,
) -> Result<(), RuntimeError> {
    let pointer = regs.read(base)?;
    let target = target_bits(&pointer)?;
    let guard = target.lock().expect("pointer target mutex poisoned");
    let buffer = match &*guard {
        Value::Bits(b) => b,
        other => return Err(RuntimeError::InvalidType { expected: TypeTag::Bits, found: other.type_tag() }),
    };
    if offset < 0 {
        return Err(RuntimeError::MemoryOutOfBounds { size, offset: i64::from(offset) });
    }
    let start = offset as usize;
    let end = start + size.bytes() as usize;
    let slice = buffer
        .get(start..end.min(buffer.len()))
        .ok_or(RuntimeError::MemoryOutOfBounds { size, offset: i64::from(offset) })?;
    if slice.len() != size.bytes() as usize {
        return Err(RuntimeError::MemoryOutOfBounds { size, offset: i64::from(offset) });
    }
    let value = bytes_to_value(slice);
    drop(guard);
    regs.write(out, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use viua_isa::RegisterSet as Rs;
    use viua_process::{Frame, RegisterSet};
    use viua_value::{Atom, Pid, Pointer};

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
    fn store_then_load_round_trips_through_a_bits_buffer() {
        let mut frame = frame_with_locals(2);
        let mut global = RegisterSet::allocate(0);
        let mut statics = RegisterSet::allocate(0);
        let target = std::sync::Arc::new(std::sync::Mutex::new(Value::Bits(std::sync::Arc::new(Vec::new()))));
        let pointer = Value::Pointer(Pointer { owner: Pid::from_raw(1), target: target.clone() });
        let base = RegisterAccess::direct(Rs::Local, 0).unwrap();
        let slot = RegisterAccess::direct(Rs::Local, 1).unwrap();
        {
            let mut regs = file(&mut frame, &mut global, &mut statics);
            regs.write(base, pointer).unwrap();
            regs.write(slot, Value::Int64(12)).unwrap();
            store(&mut regs, base, slot, MemSize::Double, 0).unwrap();
            load(&mut regs, slot, base, MemSize::Double, 0).unwrap();
            assert!(matches!(regs.read(slot).unwrap(), Value::Int64(12)));
        }
    }

    #[test]
    fn store_grows_the_buffer_to_fit() {
        let mut frame = frame_with_locals(2);
        let mut global = RegisterSet::allocate(0);
        let mut statics = RegisterSet::allocate(0);
        let target = std::sync::Arc::new(std::sync::Mutex::new(Value::Bits(std::sync::Arc::new(Vec::new()))));
        let pointer = Value::Pointer(Pointer { owner: Pid::from_raw(1), target: target.clone() });
        let base = RegisterAccess::direct(Rs::Local, 0).unwrap();
        let slot = RegisterAccess::direct(Rs::Local, 1).unwrap();
        let mut regs = file(&mut frame, &mut global, &mut statics);
        regs.write(base, pointer).unwrap();
        regs.write(slot, Value::Int64(1)).unwrap();
        store(&mut regs, base, slot, MemSize::Byte, 7).unwrap();
        match &*target.lock().unwrap() {
            Value::Bits(b) => assert_eq!(b.len(), 8),
            _ => unreachable!(),
        };
    }

    #[test]
    fn negative_offset_is_out_of_bounds() {
        let mut frame = frame_with_locals(2);
        let mut global = RegisterSet::allocate(0);
        let mut statics = RegisterSet::allocate(0);
        let target = std::sync::Arc::new(std::sync::Mutex::new(Value::Bits(std::sync::Arc::new(Vec::new()))));
        let pointer = Value::Pointer(Pointer { owner: Pid::from_raw(1), target });
        let base = RegisterAccess::direct(Rs::Local, 0).unwrap();
        let slot = RegisterAccess::direct(Rs::Local, 1).unwrap();
        let mut regs = file(&mut frame, &mut global, &mut statics);
        regs.write(base, pointer).unwrap();
        regs.write(slot, Value::Int64(1)).unwrap();
        assert!(store(&mut regs, base, slot, MemSize::Byte, -1).is_err());
    }
}
