use proptest::prelude::*;

use super::{Format, Header};

#[test]
fn round_trips_all_formats() {
    let formats = [
        Format::N,
        Format::S,
        Format::D,
        Format::T,
        Format::E,
        Format::R,
        Format::F,
        Format::M,
    ];
    for format in formats {
        let header = Header {
            format,
            greedy: true,
            unsigned: false,
            mnemonic: 9,
            payload: 0x3F_FFFF_FFFF_FFFF,
        };
        let decoded = Header::decode(header.encode()).unwrap();
        assert_eq!(decoded, header);
    }
}

#[test]
fn rejects_unassigned_format_bits() {
    // format bits 0b101 through 0b111 are all assigned; this test instead
    // forges a word whose format nibble would need to exceed 3 bits, which
    // the 3-bit field makes impossible, so decode must never return None
    // for any word - every 3-bit pattern names a format.
    for bits in 0u64..8 {
        let word = bits << 61;
        assert!(Header::decode(word).is_some());
    }
}

#[test]
fn flags_are_independent_of_payload() {
    let header = Header {
        format: Format::R,
        greedy: false,
        unsigned: true,
        mnemonic: 0,
        payload: 0,
    };
    let word = header.encode();
    assert_eq!((word >> 60) & 1, 0, "greedy bit must be clear");
    assert_eq!((word >> 59) & 1, 1, "unsigned bit must be set");
}

#[test]
fn display_uses_single_letter() {
    assert_eq!(Format::N.to_string(), "N");
    assert_eq!(Format::M.to_string(), "M");
}

proptest! {
    #[test]
    fn header_round_trips_arbitrary_payloads(
        format_bits in 0u8..8,
        greedy: bool,
        unsigned: bool,
        mnemonic in 0u8..32,
        payload in 0u64..(1u64 << 54),
    ) {
        let format = Format::from_bits(format_bits).unwrap();
        let header = Header { format, greedy, unsigned, mnemonic, payload };
        let decoded = Header::decode(header.encode()).unwrap();
        prop_assert_eq!(decoded, header);
    }
}
