//! Negotiated protocol version.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bit set in the version byte of frames sent by the server.
pub const RESPONSE_DIRECTION: u8 = 0x80;

/// Mask extracting the version number from the version byte.
pub const VERSION_MASK: u8 = 0x7F;

/// Supported protocol versions.
///
/// The version decides the header width and stream id width and gates which
/// query parameters may be encoded. It is fixed for the lifetime of a
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProtocolVersion {
    V1 = 1,
    V2 = 2,
    V3 = 3,
    V4 = 4,
    V5 = 5,
}

impl ProtocolVersion {
    /// Parse the version byte of a frame, ignoring the direction bit.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte & VERSION_MASK {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            4 => Ok(Self::V4),
            5 => Ok(Self::V5),
            other => Err(Error::UnsupportedVersion(other)),
        }
    }

    /// The plain version number.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Header width in bytes.
    pub fn header_len(self) -> usize {
        if self < Self::V3 {
            8
        } else {
            9
        }
    }

    /// Whether stream ids are encoded on two bytes.
    pub fn wide_stream_ids(self) -> bool {
        self >= Self::V3
    }

    /// Largest stream id representable for this version.
    pub fn max_stream_id(self) -> i16 {
        if self.wide_stream_ids() {
            i16::MAX
        } else {
            i8::MAX as i16
        }
    }

    /// Smallest stream id representable for this version.
    pub fn min_stream_id(self) -> i16 {
        if self.wide_stream_ids() {
            i16::MIN
        } else {
            i8::MIN as i16
        }
    }

    /// Query flags are an `[int]` from v5 and a single byte before.
    pub fn wide_query_flags(self) -> bool {
        self >= Self::V5
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V4
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::from_byte(value)
    }
}

impl From<ProtocolVersion> for u8 {
    fn from(value: ProtocolVersion) -> Self {
        value.as_u8()
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_len_by_version() {
        assert_eq!(ProtocolVersion::V1.header_len(), 8);
        assert_eq!(ProtocolVersion::V2.header_len(), 8);
        assert_eq!(ProtocolVersion::V3.header_len(), 9);
        assert_eq!(ProtocolVersion::V5.header_len(), 9);
    }

    #[test]
    fn test_direction_bit_ignored() {
        assert_eq!(ProtocolVersion::from_byte(0x84).unwrap(), ProtocolVersion::V4);
        assert_eq!(ProtocolVersion::from_byte(0x02).unwrap(), ProtocolVersion::V2);
    }

    #[test]
    fn test_unsupported_version() {
        assert!(matches!(
            ProtocolVersion::from_byte(0x00),
            Err(Error::UnsupportedVersion(0))
        ));
        assert!(matches!(
            ProtocolVersion::from_byte(0x86),
            Err(Error::UnsupportedVersion(6))
        ));
    }

    #[test]
    fn test_stream_id_range() {
        assert_eq!(ProtocolVersion::V2.max_stream_id(), 127);
        assert_eq!(ProtocolVersion::V2.min_stream_id(), -128);
        assert_eq!(ProtocolVersion::V4.max_stream_id(), i16::MAX);
    }
}
