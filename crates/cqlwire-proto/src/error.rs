//! Protocol error types.

use thiserror::Error;

/// Result alias used throughout the codec.
pub type Result<T> = std::result::Result<T, Error>;

/// Frame codec errors.
///
/// Decode variants describe corrupt or truncated input and are always
/// recoverable: the caller treats the frame as unusable and usually closes
/// the owning connection. Encode variants are raised before any byte of the
/// frame is handed to the transport.
#[derive(Debug, Error)]
pub enum Error {
    /// Frame body exceeds the protocol maximum.
    #[error("frame body of {size} bytes exceeds maximum {max}")]
    FrameTooBig { size: usize, max: usize },

    /// Header could not be read or is structurally invalid.
    #[error("malformed frame header: {0}")]
    MalformedHeader(String),

    /// Version byte outside the supported range.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Fewer bytes were available than a field requires.
    #[error("truncated input: needed {needed} bytes for {field}, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    /// A length or count field was negative where that is not allowed.
    #[error("negative length {value} for {field}")]
    NegativeLength { field: &'static str, value: i64 },

    /// Body contents are internally inconsistent.
    #[error("invalid frame body: {0}")]
    InvalidBody(String),

    /// Frame is flagged compressed but no compressor is configured.
    #[error("compressed frame received but no compressor is configured")]
    NoCompressor,

    /// Body failed to decompress.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// Body failed to compress.
    #[error("compression failed: {0}")]
    Compression(String),

    /// A value does not fit its wire representation.
    #[error("{field} too large: {size} exceeds {max}")]
    ValueTooLarge {
        field: &'static str,
        size: usize,
        max: usize,
    },

    /// Request is internally inconsistent and cannot be encoded.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Request uses a feature the negotiated protocol version lacks.
    #[error("unsupported on protocol v{version}: {feature}")]
    UnsupportedFeature { feature: &'static str, version: u8 },

    /// I/O failure on the underlying byte stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors produced while decoding inbound bytes.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Error::MalformedHeader(_)
                | Error::UnsupportedVersion(_)
                | Error::Truncated { .. }
                | Error::NegativeLength { .. }
                | Error::InvalidBody(_)
                | Error::NoCompressor
                | Error::Decompression(_)
        )
    }

    pub(crate) fn truncated(field: &'static str, needed: usize, remaining: usize) -> Self {
        Error::Truncated {
            field,
            needed,
            remaining,
        }
    }
}
