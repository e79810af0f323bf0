//! Frame header encoding and decoding.
//!
//! Layout (big-endian):
//!
//! ```text
//! v1/v2: | version | flags | stream:i8  | opcode | length:i32 |   8 bytes
//! v3+:   | version | flags | stream:i16 | opcode | length:i32 |   9 bytes
//! ```
//!
//! Headers are stateless: each one parses on its own. Only structure is
//! checked here; unknown opcodes are passed through.

use std::io::{self, Read};

use crate::error::{Error, Result};
use crate::flags::HeaderFlags;
use crate::opcode::Opcode;
use crate::version::{ProtocolVersion, RESPONSE_DIRECTION};

/// Widest header of any supported version.
pub const MAX_HEADER_LEN: usize = 9;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: ProtocolVersion,
    /// Set on frames sent by the server.
    pub response: bool,
    pub flags: HeaderFlags,
    pub stream: i16,
    pub opcode: Opcode,
    /// Declared body length.
    pub length: u32,
}

impl FrameHeader {
    /// Header for an outbound request with a zero length placeholder.
    pub fn request(version: ProtocolVersion, flags: HeaderFlags, stream: i16, opcode: Opcode) -> Self {
        Self {
            version,
            response: false,
            flags,
            stream,
            opcode,
            length: 0,
        }
    }

    /// Header for a server response with a zero length placeholder.
    pub fn response(version: ProtocolVersion, flags: HeaderFlags, stream: i16, opcode: Opcode) -> Self {
        Self {
            response: true,
            ..Self::request(version, flags, stream, opcode)
        }
    }

    /// Width of this header on the wire.
    pub fn encoded_len(&self) -> usize {
        self.version.header_len()
    }

    /// Offset of the length field, used to backfill it after the body is known.
    pub fn length_offset(version: ProtocolVersion) -> usize {
        version.header_len() - 4
    }

    /// Parse a header from the front of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let first = *bytes
            .first()
            .ok_or_else(|| Error::MalformedHeader("empty input".to_string()))?;
        let version = ProtocolVersion::from_byte(first)?;
        let len = version.header_len();
        if bytes.len() < len {
            return Err(Error::MalformedHeader(format!(
                "need {len} header bytes for protocol {version}, got {}",
                bytes.len()
            )));
        }
        Ok(Self::decode_fixed(version, &bytes[..len]))
    }

    /// Decode fields from a buffer of exactly `version.header_len()` bytes.
    fn decode_fixed(version: ProtocolVersion, p: &[u8]) -> Self {
        let response = p[0] & RESPONSE_DIRECTION != 0;
        let flags = HeaderFlags::from_byte(p[1]);
        let (stream, rest) = if version.wide_stream_ids() {
            (i16::from_be_bytes([p[2], p[3]]), &p[4..])
        } else {
            (i16::from(p[2] as i8), &p[3..])
        };
        let opcode = Opcode::from_u8(rest[0]);
        let length = u32::from_be_bytes([rest[1], rest[2], rest[3], rest[4]]);
        Self {
            version,
            response,
            flags,
            stream,
            opcode,
            length,
        }
    }

    /// Append the encoded header to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut version = self.version.as_u8();
        if self.response {
            version |= RESPONSE_DIRECTION;
        }
        out.push(version);
        out.push(self.flags.to_byte());
        if self.version.wide_stream_ids() {
            out.extend_from_slice(&self.stream.to_be_bytes());
        } else {
            let stream = i8::try_from(self.stream).map_err(|_| Error::ValueTooLarge {
                field: "stream id",
                size: self.stream.unsigned_abs() as usize,
                max: i8::MAX as usize,
            })?;
            out.push(stream as u8);
        }
        out.push(self.opcode.to_u8());
        out.extend_from_slice(&self.length.to_be_bytes());
        Ok(())
    }
}

/// Read exactly one header from `reader`.
///
/// The version byte is read first and selects the header width; the rest
/// of the header is then read in one go. Running out of bytes before the
/// header is complete is a [`Error::MalformedHeader`].
pub fn read_header<R: Read + ?Sized>(reader: &mut R) -> Result<FrameHeader> {
    let mut scratch = [0u8; MAX_HEADER_LEN];
    read_full(reader, &mut scratch[..1])?;
    let version = ProtocolVersion::from_byte(scratch[0])?;
    let len = version.header_len();
    read_full(reader, &mut scratch[1..len])?;
    Ok(FrameHeader::decode_fixed(version, &scratch[..len]))
}

fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            Error::MalformedHeader("stream ended before header was complete".to_string())
        }
        _ => Error::Io(e),
    })
}
