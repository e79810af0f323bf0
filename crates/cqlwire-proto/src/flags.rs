//! Flag words carried in headers and bodies.
//!
//! Header flags keep unknown bits so a frame can be inspected and forwarded
//! unchanged. Body flag words are strict on decode: an unknown query or batch
//! bit means the body cannot be parsed further.

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::primitives::{WireReader, WireWriter};
use crate::version::ProtocolVersion;

bitflags! {
    /// Bitmask carried in the second header byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HeaderFlags: u8 {
        /// Body is compressed with the negotiated compressor.
        const COMPRESSION = 0x01;
        /// Request tracing (request) or tracing id present (response).
        const TRACING = 0x02;
        /// Body is prefixed with a custom payload map.
        const CUSTOM_PAYLOAD = 0x04;
        /// Response body is prefixed with warnings.
        const WARNING = 0x08;
        /// Opt in to beta protocol features.
        const USE_BETA = 0x10;
    }
}

impl HeaderFlags {
    /// Flags from the raw header byte. Never fails; unknown bits are kept.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self::from_bits_retain(byte)
    }

    #[must_use]
    pub const fn to_byte(self) -> u8 {
        self.bits()
    }

    pub const fn compressed(self) -> bool {
        self.contains(Self::COMPRESSION)
    }

    pub const fn tracing(self) -> bool {
        self.contains(Self::TRACING)
    }

    pub const fn custom_payload(self) -> bool {
        self.contains(Self::CUSTOM_PAYLOAD)
    }

    pub const fn warning(self) -> bool {
        self.contains(Self::WARNING)
    }
}

bitflags! {
    /// Flag word of a QUERY/EXECUTE parameter block and of a BATCH trailer.
    ///
    /// One byte on the wire up to v4, a four-byte int from v5.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QueryFlags: u32 {
        const VALUES = 0x01;
        const SKIP_METADATA = 0x02;
        const PAGE_SIZE = 0x04;
        const PAGING_STATE = 0x08;
        const SERIAL_CONSISTENCY = 0x10;
        const DEFAULT_TIMESTAMP = 0x20;
        const NAMES_FOR_VALUES = 0x40;
        const KEYSPACE = 0x80;
    }
}

impl QueryFlags {
    /// Bits a BATCH trailer may carry.
    pub const BATCH: Self = Self::SERIAL_CONSISTENCY
        .union(Self::DEFAULT_TIMESTAMP)
        .union(Self::KEYSPACE);

    /// Write the flag word at the width `version` uses.
    pub fn write(self, version: ProtocolVersion, w: &mut WireWriter) {
        if version.wide_query_flags() {
            w.write_uint(self.bits());
        } else {
            w.write_u8(self.bits() as u8);
        }
    }

    /// Read a flag word, rejecting bits outside `allowed`.
    pub fn read(
        version: ProtocolVersion,
        r: &mut WireReader,
        field: &'static str,
        allowed: Self,
    ) -> Result<Self> {
        let raw = if version.wide_query_flags() {
            r.read_uint(field)?
        } else {
            u32::from(r.read_u8(field)?)
        };
        Self::from_bits(raw)
            .filter(|flags| allowed.contains(*flags))
            .ok_or_else(|| Error::InvalidBody(format!("unknown {field} {raw:#x}")))
    }
}

bitflags! {
    /// Flags of a PREPARE body (v5).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PrepareFlags: u32 {
        const KEYSPACE = 0x01;
    }
}

bitflags! {
    /// Flags opening rows and prepared metadata.
    ///
    /// Unknown bits are kept; none of them changes the layout that follows.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MetadataFlags: u32 {
        const GLOBAL_TABLES_SPEC = 0x0001;
        const HAS_MORE_PAGES = 0x0002;
        const NO_METADATA = 0x0004;
        const METADATA_CHANGED = 0x0008;
    }
}
