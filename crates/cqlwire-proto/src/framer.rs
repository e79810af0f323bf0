//! Frame assembly and disassembly.
//!
//! A [`Framer`] is bound to one connection's negotiated protocol version and
//! compressor. It holds no mutable state, so one instance can be shared by
//! every request path on that connection.

use std::io::{self, Read, Write};
use std::sync::Arc;

use bytes::Bytes;

use crate::compression::Compressor;
use crate::error::{Error, Result};
use crate::flags::HeaderFlags;
use crate::header::{read_header, FrameHeader};
use crate::opcode::Opcode;
use crate::primitives::WireWriter;
use crate::request::Request;
use crate::response::{Envelope, Response};
use crate::version::ProtocolVersion;
use crate::MAX_FRAME_SIZE;

/// Size summary of an outbound frame, for observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub opcode: Opcode,
    /// Body length before compression.
    pub uncompressed_size: usize,
    /// Body length as sent; equals `uncompressed_size` when not compressed.
    pub compressed_size: usize,
    /// Sum of raw bound-value payload lengths.
    pub values_size: usize,
    /// 1 for QUERY/EXECUTE, statement count for BATCH, 0 otherwise.
    pub count: usize,
}

/// A fully built frame ready for the transport.
#[derive(Debug, Clone)]
pub struct OutFrame {
    pub bytes: Vec<u8>,
    pub info: FrameInfo,
}

/// An inbound frame with its body already decompressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: Bytes,
}

impl Frame {
    /// Decode the body as a client request.
    pub fn request(&self) -> Result<Request> {
        if self.header.response {
            return Err(Error::InvalidBody(
                "frame is a response, expected a request".to_string(),
            ));
        }
        Request::decode(self.header.opcode, self.header.version, self.body.clone())
    }

    /// Decode the body as a server response.
    pub fn response(&self) -> Result<(Envelope, Response)> {
        if !self.header.response {
            return Err(Error::InvalidBody(
                "frame is a request, expected a response".to_string(),
            ));
        }
        Response::decode(
            self.header.opcode,
            self.header.version,
            self.header.flags,
            self.body.clone(),
        )
    }
}

/// Per-connection frame codec.
#[derive(Debug, Clone)]
pub struct Framer {
    version: ProtocolVersion,
    compressor: Option<Arc<dyn Compressor>>,
    max_frame_size: usize,
}

impl Framer {
    /// Framer for `version` with no compression.
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            compressor: None,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Compress request bodies and accept compressed responses with `compressor`.
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// Lower the body size limit. Values above [`MAX_FRAME_SIZE`] are clamped.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max.min(MAX_FRAME_SIZE);
        self
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn compressor(&self) -> Option<&Arc<dyn Compressor>> {
        self.compressor.as_ref()
    }

    /// Largest frame accepted or produced, header included.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Build a request frame for `stream`.
    pub fn build(&self, request: &Request, stream: i16) -> Result<OutFrame> {
        self.build_with_flags(request, stream, HeaderFlags::empty())
    }

    /// Build a request frame with extra header flags such as
    /// [`HeaderFlags::TRACING`]. The compression bit is managed here and
    /// ignored if passed in.
    pub fn build_with_flags(
        &self,
        request: &Request,
        stream: i16,
        flags: HeaderFlags,
    ) -> Result<OutFrame> {
        let mut body = WireWriter::new();
        let stats = request.encode_body(self.version, &mut body)?;
        let header = FrameHeader::request(
            self.version,
            flags.difference(HeaderFlags::COMPRESSION),
            stream,
            request.opcode(),
        );
        let (bytes, uncompressed_size, compressed_size) =
            self.assemble(header, body.into_inner(), request.compressible())?;
        Ok(OutFrame {
            bytes,
            info: FrameInfo {
                opcode: request.opcode(),
                uncompressed_size,
                compressed_size,
                values_size: stats.values_size,
                count: stats.count,
            },
        })
    }

    /// Build a response frame. Used by in-process fakes and tests.
    pub fn build_response(
        &self,
        response: &Response,
        envelope: &Envelope,
        stream: i16,
    ) -> Result<Vec<u8>> {
        let mut body = WireWriter::new();
        envelope.encode(&mut body)?;
        response.encode_body(self.version, &mut body)?;
        let header = FrameHeader::response(self.version, envelope.flags(), stream, response.opcode());
        let (bytes, _, _) = self.assemble(header, body.into_inner(), true)?;
        Ok(bytes)
    }

    /// Build `request` and write it to `writer` in one call.
    ///
    /// Nothing reaches `writer` unless the whole frame was built.
    pub fn write_frame<W: Write + ?Sized>(
        &self,
        writer: &mut W,
        request: &Request,
        stream: i16,
    ) -> Result<FrameInfo> {
        let frame = self.build(request, stream)?;
        writer.write_all(&frame.bytes)?;
        Ok(frame.info)
    }

    fn assemble(
        &self,
        mut header: FrameHeader,
        body: Vec<u8>,
        compressible: bool,
    ) -> Result<(Vec<u8>, usize, usize)> {
        let uncompressed_size = body.len();
        let body = match &self.compressor {
            Some(compressor) if compressible && !body.is_empty() => {
                header.flags.insert(HeaderFlags::COMPRESSION);
                compressor.compress(&body)?
            }
            _ => body,
        };
        if body.len() > self.max_frame_size {
            return Err(Error::FrameTooBig {
                size: body.len(),
                max: self.max_frame_size,
            });
        }

        // placeholder header, length backfilled once the body is final
        let mut out = Vec::with_capacity(header.encoded_len() + body.len());
        header.write_to(&mut out)?;
        out.extend_from_slice(&body);
        let offset = FrameHeader::length_offset(self.version);
        let length = u32::try_from(body.len()).map_err(|_| Error::FrameTooBig {
            size: body.len(),
            max: self.max_frame_size,
        })?;
        out[offset..offset + 4].copy_from_slice(&length.to_be_bytes());
        Ok((out, uncompressed_size, body.len()))
    }

    /// Read the body that follows `header`.
    ///
    /// An oversized body is still consumed in full before
    /// [`Error::FrameTooBig`] is returned, leaving `reader` at the start of
    /// the next frame.
    pub fn read_frame<R: Read + ?Sized>(&self, reader: &mut R, header: &FrameHeader) -> Result<Frame> {
        if header.length > i32::MAX as u32 {
            return Err(Error::NegativeLength {
                field: "frame length",
                value: i64::from(header.length as i32),
            });
        }
        let length = header.length as usize;
        if length > self.max_frame_size {
            io::copy(&mut (&mut *reader).take(length as u64), &mut io::sink())?;
            return Err(Error::FrameTooBig {
                size: length,
                max: self.max_frame_size,
            });
        }

        // grow with the data actually present instead of trusting the header
        let mut body = Vec::new();
        (&mut *reader).take(length as u64).read_to_end(&mut body)?;
        if body.len() < length {
            return Err(Error::truncated("frame body", length, body.len()));
        }

        let body = if header.flags.compressed() {
            let compressor = self.compressor.as_ref().ok_or(Error::NoCompressor)?;
            compressor.decompress(&body)?
        } else {
            body
        };
        Ok(Frame {
            header: *header,
            body: Bytes::from(body),
        })
    }

    /// Read one header and its body.
    pub fn read_next<R: Read + ?Sized>(&self, reader: &mut R) -> Result<Frame> {
        let header = read_header(reader)?;
        if header.version != self.version {
            return Err(Error::MalformedHeader(format!(
                "frame version {} does not match connection version {}",
                header.version, self.version
            )));
        }
        self.read_frame(reader, &header)
    }

    /// Decode one frame from the front of `bytes`, whatever its version.
    pub fn decode(&self, mut bytes: &[u8]) -> Result<Frame> {
        let header = read_header(&mut bytes)?;
        self.read_frame(&mut bytes, &header)
    }
}
