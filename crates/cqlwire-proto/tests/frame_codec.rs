//! Integration tests for frame building and reading.

use std::io::{self, Read};

use bytes::Bytes;
use cqlwire_proto::request::events;
use cqlwire_proto::{
    Batch, BatchKind, BatchStatement, Consistency, Execute, FrameHeader, Framer, HeaderFlags,
    Opcode, ProtocolVersion, Query, QueryParams, QueryValue, Register, Request, Error,
    MAX_FRAME_SIZE,
};

const HELLO_WORLD: &[u8] = b"HelloWorld";
const PREPARED_ID: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0, 1, 2, 3, 4, 5];

fn two_values() -> Vec<QueryValue> {
    vec![
        QueryValue::positional(HELLO_WORLD),
        QueryValue::positional(HELLO_WORLD),
    ]
}

struct InfoCase {
    name: &'static str,
    request: Request,
    opcode: Opcode,
    uncompressed_size: usize,
    values_size: usize,
    count: usize,
}

fn info_cases() -> Vec<InfoCase> {
    let query = Query::new(
        "SELECT * FROM mytable WHERE id=? AND x=?",
        QueryParams::new(Consistency::One)
            .with_values(two_values())
            .with_page_size(5000),
    );
    let execute = Execute::new(
        Bytes::copy_from_slice(&PREPARED_ID),
        QueryParams::default().with_values(two_values()),
    );
    let batch = Batch::new(BatchKind::Unlogged, Consistency::One)
        .with_statement(BatchStatement::text(
            "SELECT * FROM mytable WHERE id=? AND x=?",
            two_values(),
        ))
        .with_statement(BatchStatement::prepared(
            Bytes::copy_from_slice(&PREPARED_ID),
            two_values(),
        ));

    vec![
        InfoCase {
            name: "query",
            request: Request::Query(query),
            opcode: Opcode::Query,
            uncompressed_size: 81,
            values_size: 20,
            count: 1,
        },
        InfoCase {
            name: "execute",
            request: Request::Execute(execute),
            opcode: Opcode::Execute,
            uncompressed_size: 51,
            values_size: 20,
            count: 1,
        },
        InfoCase {
            name: "batch",
            request: Request::Batch(batch),
            opcode: Opcode::Batch,
            uncompressed_size: 130,
            values_size: 40,
            count: 2,
        },
        InfoCase {
            name: "options",
            request: Request::Options,
            opcode: Opcode::Options,
            uncompressed_size: 0,
            values_size: 0,
            count: 0,
        },
        InfoCase {
            name: "register",
            request: Request::Register(Register::new(["event1", "event2"])),
            opcode: Opcode::Register,
            uncompressed_size: 18,
            values_size: 0,
            count: 0,
        },
    ]
}

#[test]
fn test_out_frame_info() {
    let framer = Framer::new(ProtocolVersion::V4);
    for case in info_cases() {
        let frame = framer.build(&case.request, 42).unwrap();
        let info = frame.info;
        assert_eq!(info.opcode, case.opcode, "{}", case.name);
        assert_eq!(info.uncompressed_size, case.uncompressed_size, "{}", case.name);
        assert_eq!(info.compressed_size, case.uncompressed_size, "{}", case.name);
        assert_eq!(info.values_size, case.values_size, "{}", case.name);
        assert_eq!(info.count, case.count, "{}", case.name);

        let header = FrameHeader::parse(&frame.bytes).unwrap();
        assert_eq!(header.stream, 42);
        assert_eq!(header.length as usize, case.uncompressed_size);
    }
}

#[test]
fn test_out_frame_info_compressed() {
    let framer = Framer::new(ProtocolVersion::V4)
        .with_compressor(std::sync::Arc::new(cqlwire_proto::DeflateCompressor::new()));
    for case in info_cases() {
        let frame = framer.build(&case.request, 42).unwrap();
        assert_eq!(frame.info.uncompressed_size, case.uncompressed_size, "{}", case.name);
        let header = FrameHeader::parse(&frame.bytes).unwrap();
        assert_eq!(header.length as usize, frame.info.compressed_size, "{}", case.name);
        assert_eq!(header.flags.compressed(), case.uncompressed_size > 0, "{}", case.name);

        let decoded = framer.decode(&frame.bytes).unwrap();
        assert_eq!(decoded.request().unwrap(), case.request, "{}", case.name);
    }
}

#[test]
fn test_roundtrip_every_version() {
    let versions = [
        ProtocolVersion::V2,
        ProtocolVersion::V3,
        ProtocolVersion::V4,
        ProtocolVersion::V5,
    ];
    for version in versions {
        let framer = Framer::new(version);
        let mut execute = Execute::new(
            Bytes::copy_from_slice(&PREPARED_ID),
            QueryParams::new(Consistency::LocalOne).with_values(two_values()),
        );
        if version >= ProtocolVersion::V5 {
            execute.result_metadata_id = Some(Bytes::from_static(&[0xEE; 8]));
        }
        let requests = [
            Request::Options,
            Request::Register(Register::new([events::STATUS_CHANGE])),
            Request::Query(Query::new(
                "SELECT now() FROM system.local",
                QueryParams::new(Consistency::Quorum).with_page_size(10),
            )),
            Request::Execute(execute),
            Request::Batch(
                Batch::new(BatchKind::Logged, Consistency::One)
                    .with_statement(BatchStatement::text("INSERT INTO t (a) VALUES (?)", two_values())),
            ),
        ];
        for request in requests {
            let frame = framer.build(&request, 7).unwrap();
            let decoded = framer.read_next(&mut frame.bytes.as_slice()).unwrap();
            assert_eq!(decoded.request().unwrap(), request, "{version}");
        }
    }
}

#[test]
fn test_frame_write_too_long() {
    let framer = Framer::new(ProtocolVersion::V2).with_max_frame_size(1024);
    let query = Request::Query(Query::new("x".repeat(1025), QueryParams::default()));
    let mut out = Vec::new();
    let err = framer.write_frame(&mut out, &query, 0).unwrap_err();
    assert!(matches!(err, Error::FrameTooBig { max: 1024, .. }));
    assert!(out.is_empty());
}

#[test]
fn test_frame_read_too_long_keeps_stream_aligned() {
    // a v2 READY header right after an oversized body
    let next = [0x82u8, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00];
    let oversized = MAX_FRAME_SIZE + 1;
    let mut stream = io::repeat(0).take(oversized as u64).chain(&next[..]);

    let framer = Framer::new(ProtocolVersion::V2);
    let mut header = FrameHeader::response(
        ProtocolVersion::V2,
        HeaderFlags::empty(),
        0,
        Opcode::Ready,
    );
    header.length = oversized as u32;

    let err = framer.read_frame(&mut stream, &header).unwrap_err();
    assert!(matches!(err, Error::FrameTooBig { .. }));

    let frame = framer.read_next(&mut stream).unwrap();
    assert_eq!(frame.header.opcode, Opcode::Ready);
    assert!(frame.body.is_empty());
}

#[test]
fn test_back_to_back_frames() {
    let framer = Framer::new(ProtocolVersion::V4);
    let mut wire = Vec::new();
    for stream in 0..4 {
        framer
            .write_frame(&mut wire, &Request::Register(Register::new([events::SCHEMA_CHANGE])), stream)
            .unwrap();
    }
    let mut reader = wire.as_slice();
    for stream in 0..4 {
        let frame = framer.read_next(&mut reader).unwrap();
        assert_eq!(frame.header.stream, stream);
    }
    assert!(reader.is_empty());
}
