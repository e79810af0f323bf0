//! Decoder robustness against arbitrary input.
//!
//! The fixed inputs below once crashed frame decoders; the property tests
//! extend the same check to random bytes.

use std::sync::Arc;

use cqlwire_proto::{read_header, DeflateCompressor, Framer, ProtocolVersion};
use proptest::prelude::*;

const CRASHERS: &[&[u8]] = &[
    b"00000\xa0000",
    b"\x8000\x0e\x00\x00\x00\x000",
    b"\x8000\x00\x00\x00\x00\t0000000000",
    b"\xa0\xff\x01\xae\xefqE\xf2\x1a",
    b"\x8200\x08\x00\x00\x00c\x00\x00\x00\x02000\x01\x00\x00\x00\x03\x00\n0000000000\x00\x14000000\
      00000000000000\x00\x020000\x00\x07000000000\x00\x050000000\xff0000000000000000000\
      0000000",
    b"\x82\xe600\x00\x00\x00\x000",
    b"\x8200\x08\x00\x00\x00\x080\x00\x00\x00\x040000",
    b"\x8200\x00\x00\x00\x00\x100\x00\x00\x12\x00\x00\x000000000000",
    b"\x83000\x08\x00\x00\x00\x14\x00\x00\x00\x020000000000000000",
    b"\x83000\x08\x00\x00\x000\x00\x00\x00\x04\x00\x1000000\
      00000000000000e00000000\x800000000000000000\
      0000000000000",
];

/// Run the full read path: header, body, then typed decode.
fn decode_all(framer: &Framer, input: &[u8]) -> bool {
    let mut reader = input;
    let Ok(header) = read_header(&mut reader) else {
        return false;
    };
    let Ok(frame) = framer.read_frame(&mut reader, &header) else {
        return false;
    };
    if header.response {
        frame.response().is_ok()
    } else {
        frame.request().is_ok()
    }
}

#[test]
fn test_known_crashers_are_rejected() {
    let framer = Framer::new(ProtocolVersion::V4);
    for (i, input) in CRASHERS.iter().enumerate() {
        assert!(!decode_all(&framer, input), "input {i} decoded: {input:?}");
    }
}

#[test]
fn test_known_crashers_with_compressor() {
    let framer =
        Framer::new(ProtocolVersion::V4).with_compressor(Arc::new(DeflateCompressor::new()));
    for input in CRASHERS {
        let _ = decode_all(&framer, input);
    }
}

#[test]
fn test_empty_input() {
    let framer = Framer::new(ProtocolVersion::V4);
    assert!(framer.decode(&[]).is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2048))]

    #[test]
    fn prop_arbitrary_bytes_never_panic(input in proptest::collection::vec(any::<u8>(), 0..512)) {
        let framer = Framer::new(ProtocolVersion::V4);
        let _ = decode_all(&framer, &input);
    }

    #[test]
    fn prop_valid_header_arbitrary_body(
        version in 1u8..=5,
        response in any::<bool>(),
        opcode in 0u8..=0x10,
        body in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let framer = Framer::new(ProtocolVersion::V4);
        let mut input = vec![if response { version | 0x80 } else { version }, 0];
        if version >= 3 {
            input.extend_from_slice(&[0, 1]);
        } else {
            input.push(1);
        }
        input.push(opcode);
        input.extend_from_slice(&(body.len() as u32).to_be_bytes());
        input.extend_from_slice(&body);
        let _ = decode_all(&framer, &input);
    }
}
