//! Session configuration.

use std::sync::Arc;
use std::time::Duration;

use cqlwire_proto::{Compressor, DeflateCompressor, Lz4Compressor, ProtocolVersion, SnappyCompressor};
use serde::{Deserialize, Serialize};

use crate::prepared::DEFAULT_MAX_PREPARED_STATEMENTS;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(11);

/// Default number of concurrent requests admitted per node.
pub const DEFAULT_MAX_REQUESTS_PER_NODE: usize = 1024;

/// Body compression negotiated for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Deflate,
    Snappy,
    Lz4,
}

impl Compression {
    /// Compressor handed to the framer, if any.
    pub fn compressor(self) -> Option<Arc<dyn Compressor>> {
        match self {
            Compression::None => None,
            Compression::Deflate => Some(Arc::new(DeflateCompressor::new())),
            Compression::Snappy => Some(Arc::new(SnappyCompressor)),
            Compression::Lz4 => Some(Arc::new(Lz4Compressor)),
        }
    }
}

/// Request-path configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Negotiated protocol version.
    pub protocol_version: ProtocolVersion,

    pub compression: Compression,

    /// Keyspace folded into prepared-statement cache keys.
    pub keyspace: Option<String>,

    /// Prepared-statement cache capacity.
    pub max_prepared_statements: usize,

    /// Admission slots per node.
    pub max_requests_per_node: usize,

    /// Deadline applied to requests whose context has none.
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
}

impl SessionConfig {
    pub fn new(protocol_version: ProtocolVersion) -> Self {
        Self {
            protocol_version,
            compression: Compression::None,
            keyspace: None,
            max_prepared_statements: DEFAULT_MAX_PREPARED_STATEMENTS,
            max_requests_per_node: DEFAULT_MAX_REQUESTS_PER_NODE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    pub fn with_max_prepared_statements(mut self, max: usize) -> Self {
        self.max_prepared_statements = max;
        self
    }

    pub fn with_max_requests_per_node(mut self, max: usize) -> Self {
        self.max_requests_per_node = max;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(ProtocolVersion::default())
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
