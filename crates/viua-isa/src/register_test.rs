use proptest::prelude::*;

use super::{AccessSpecifier, InvalidRegisterAccess, RegisterAccess, RegisterSet, MAX_REGISTER_INDEX};

#[test]
fn void_is_void() {
    assert!(RegisterAccess::VOID.is_void());
    assert_eq!(RegisterAccess::VOID.index(), 0);
}

#[test]
fn direct_rejects_out_of_range_index() {
    assert!(RegisterAccess::direct(RegisterSet::Local, MAX_REGISTER_INDEX).is_some());
    assert!(RegisterAccess::direct(RegisterSet::Local, MAX_REGISTER_INDEX + 1).is_none());
}

#[test]
fn round_trips_every_set_and_specifier() {
    let sets = [
        RegisterSet::Local,
        RegisterSet::Static,
        RegisterSet::Global,
        RegisterSet::Arguments,
        RegisterSet::Parameters,
        RegisterSet::ClosureLocal,
    ];
    let specs = [
        AccessSpecifier::Direct,
        AccessSpecifier::PointerDereference,
        AccessSpecifier::RegisterIndirect,
    ];
    for &set in &sets {
        for &access in &specs {
            let ra = RegisterAccess::new(set, 17, access).unwrap();
            let decoded = RegisterAccess::decode(ra.encode()).unwrap();
            assert_eq!(decoded.set(), set);
            assert_eq!(decoded.index(), 17);
            assert_eq!(decoded.access(), access);
        }
    }
}

#[test]
fn decode_rejects_bad_set_selector() {
    // set selector bits 7 names nothing (only 0..=6 are defined)
    let bits = 7u32 << (2 + 6);
    assert_eq!(
        RegisterAccess::decode(bits),
        Err(InvalidRegisterAccess::BadSet(7))
    );
}

#[test]
fn decode_rejects_bad_access_specifier() {
    // access selector 3 names nothing (only 0..=2 are defined)
    let bits = (0u32 << (2 + 6)) | (3u32 << 6);
    assert_eq!(
        RegisterAccess::decode(bits),
        Err(InvalidRegisterAccess::BadAccessSpecifier(3))
    );
}

#[test]
fn debug_rendering_uses_the_expected_sigils() {
    let direct = RegisterAccess::direct(RegisterSet::Local, 3).unwrap();
    assert_eq!(format!("{direct:?}"), "$3.Local");
    let ptr = RegisterAccess::new(RegisterSet::Global, 3, AccessSpecifier::PointerDereference).unwrap();
    assert_eq!(format!("{ptr:?}"), "*3.Global");
    let indirect = RegisterAccess::new(RegisterSet::Parameters, 3, AccessSpecifier::RegisterIndirect).unwrap();
    assert_eq!(format!("{indirect:?}"), "@3.Parameters");
    assert_eq!(format!("{:?}", RegisterAccess::VOID), "void");
}

proptest! {
    #[test]
    fn encode_decode_round_trips(
        set_bits in 0u8..=5,
        index in 0u16..=MAX_REGISTER_INDEX,
        access_bits in 0u8..=2,
    ) {
        let set = match set_bits {
            0 => RegisterSet::Local,
            1 => RegisterSet::Static,
            2 => RegisterSet::Global,
            3 => RegisterSet::Arguments,
            4 => RegisterSet::Parameters,
            _ => RegisterSet::ClosureLocal,
        };
        let access = match access_bits {
            0 => AccessSpecifier::Direct,
            1 => AccessSpecifier::PointerDereference,
            _ => AccessSpecifier::RegisterIndirect,
        };
        let ra = RegisterAccess::new(set, index, access).unwrap();
        let decoded = RegisterAccess::decode(ra.encode()).unwrap();
        prop_assert_eq!(decoded.set(), set);
        prop_assert_eq!(decoded.index(), index);
        prop_assert_eq!(decoded.access(), access);
    }
}
