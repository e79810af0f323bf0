//! CQL native protocol frame codec.
//!
//! This crate encodes client requests into frames and decodes frames read
//! from a byte stream, for protocol versions 1 through 5:
//! - Version-dependent header layout ([`header`])
//! - Request and response bodies ([`request`], [`response`])
//! - Optional body compression ([`compression`])
//! - Frame assembly, size limits and diagnostics ([`framer`])
//!
//! Decoding never trusts a declared length: every length and count is
//! checked against the bytes actually available, so arbitrary input yields
//! either a value or an [`Error`].

pub mod compression;
pub mod consistency;
pub mod error;
pub mod flags;
pub mod framer;
pub mod header;
pub mod opcode;
pub mod params;
pub mod primitives;
pub mod request;
pub mod response;
pub mod version;

pub use compression::{Compressor, DeflateCompressor, Lz4Compressor, SnappyCompressor};
pub use consistency::Consistency;
pub use error::{Error, Result};
pub use flags::{HeaderFlags, MetadataFlags, PrepareFlags, QueryFlags};
pub use framer::{Frame, FrameInfo, Framer, OutFrame};
pub use header::{read_header, FrameHeader, MAX_HEADER_LEN};
pub use opcode::Opcode;
pub use params::{QueryParams, QueryValue};
pub use primitives::{Value, WireReader, WireWriter};
pub use request::{
    AuthResponse, Batch, BatchKind, BatchStatement, BodyStats, Execute, Prepare, Query, Register,
    Request, Startup,
};
pub use response::{Envelope, Event, Prepared, Response, ResultBody, Rows, ServerError};
pub use version::ProtocolVersion;

/// Largest frame body accepted or produced, in bytes.
pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;
