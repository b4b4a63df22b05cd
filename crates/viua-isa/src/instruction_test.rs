use proptest::prelude::*;

use super::Instruction;
use crate::opcode::MemSize;
use crate::register::{AccessSpecifier, RegisterAccess, RegisterSet};

fn local(index: u16) -> RegisterAccess {
    RegisterAccess::direct(RegisterSet::Local, index).unwrap()
}

fn sample_instructions() -> Vec<Instruction> {
    vec![
        Instruction::Nop,
        Instruction::Halt,
        Instruction::Return { value: local(3) },
        Instruction::Draw { out: local(0) },
        Instruction::Move { out: local(1), input: local(2) },
        Instruction::Swap { a: local(4), b: local(5) },
        Instruction::Call { out: local(0), function: local(1) },
        Instruction::Send { target: local(0), value: local(1) },
        Instruction::VAt { out: local(0), vector: local(1), index: local(2) },
        Instruction::StructInsert { structure: local(0), key: local(1), value: local(2) },
        Instruction::Cast { out: local(0), type_tag: 7 },
        Instruction::Atom { out: local(0), rodata_offset: 0xDEAD_BEEF },
        Instruction::Frame { slots: 4 },
        Instruction::Jump { offset: -12345 },
        Instruction::Addi { out: local(0), input: local(1), immediate: -9, unsigned: false },
        Instruction::Addi { out: local(0), input: local(1), immediate: 9, unsigned: true },
        Instruction::If { condition: local(2), offset: 64 },
        Instruction::Catch { exception_type: local(2), handler_offset: -8 },
        Instruction::Lui { out: local(0), bits: 0xFFFF_0000, unsigned: false },
        Instruction::Lli { out: local(0), bits: 0x0000_FFFF },
        Instruction::Sm {
            base: local(1),
            value: local(0),
            size: MemSize::Quad,
            offset: -100,
        },
        Instruction::Lm {
            out: local(0),
            base: local(1),
            size: MemSize::Byte,
            offset: 100,
        },
    ]
}

#[test]
fn every_sample_round_trips() {
    for instr in sample_instructions() {
        let word = instr.encode();
        let (decoded, greedy) = Instruction::decode(word).unwrap();
        assert_eq!(decoded, instr, "word = {word:#018x}");
        assert!(!greedy);
    }
}

#[test]
fn greedy_flag_round_trips_independently_of_payload() {
    let instr = Instruction::Frame { slots: 2 };
    let word = instr.encode_with_greedy(true);
    let (decoded, greedy) = Instruction::decode(word).unwrap();
    assert_eq!(decoded, instr);
    assert!(greedy);
}

#[test]
fn unsigned_flag_is_preserved_through_addi() {
    let instr = Instruction::Addi {
        out: local(0),
        input: local(1),
        immediate: 5,
        unsigned: true,
    };
    let (decoded, _) = Instruction::decode(instr.encode()).unwrap();
    match decoded {
        Instruction::Addi { unsigned, .. } => assert!(unsigned),
        other => panic!("expected Addi, got {other:?}"),
    }
}

#[test]
fn unknown_mnemonic_in_known_format_is_rejected() {
    // format N only defines mnemonics 0..=4; 31 is in-range for the 5-bit
    // field but names nothing.
    let word = (0u64 << 61) | (31u64 << 54);
    assert!(Instruction::decode(word).is_err());
}

#[test]
fn pointer_dereference_register_access_survives_round_trip() {
    let ptr = RegisterAccess::new(RegisterSet::Global, 9, AccessSpecifier::PointerDereference).unwrap();
    let instr = Instruction::Delete { reg: ptr };
    let (decoded, _) = Instruction::decode(instr.encode()).unwrap();
    assert_eq!(decoded, instr);
}

proptest! {
    #[test]
    fn addi_round_trips_arbitrary_immediates(
        index in 0u16..=63,
        immediate: i32,
        unsigned: bool,
    ) {
        let instr = Instruction::Addi {
            out: local(index),
            input: local(index),
            immediate,
            unsigned,
        };
        let (decoded, _) = Instruction::decode(instr.encode()).unwrap();
        prop_assert_eq!(decoded, instr);
    }

    #[test]
    fn jump_offsets_round_trip(offset: i32) {
        let instr = Instruction::Jump { offset };
        let (decoded, _) = Instruction::decode(instr.encode()).unwrap();
        prop_assert_eq!(decoded, instr);
    }

    #[test]
    fn sm_lm_offsets_round_trip_within_24_bit_range(offset in -(1i32 << 23)..(1i32 << 23) - 1) {
        let instr = Instruction::Sm {
            base: local(1),
            value: local(0),
            size: MemSize::Word,
            offset,
        };
        let (decoded, _) = Instruction::decode(instr.encode()).unwrap();
        prop_assert_eq!(decoded, instr);
    }
}
