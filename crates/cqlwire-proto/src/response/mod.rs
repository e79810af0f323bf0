//! Response bodies sent by the server.

mod error;
mod event;
mod result;
mod types;

use std::collections::HashMap;

use bytes::Bytes;

pub use error::{error_codes, ErrorDetail, Failures, ServerError};
pub use event::Event;
pub use result::{
    kinds, ColumnSpec, Prepared, PreparedMetadata, ResultBody, ResultMetadata,
    Rows, SchemaChange,
};
pub use types::{ColumnType, MAX_TYPE_DEPTH};

use crate::error::{Error, Result};
use crate::flags::HeaderFlags;
use crate::opcode::Opcode;
use crate::primitives::{WireReader, WireWriter};
use crate::version::ProtocolVersion;

/// Optional prefixes carried ahead of a response body, selected by header flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    /// Tracing session id when the request asked for tracing.
    pub tracing_id: Option<[u8; 16]>,
    /// Server warnings (v4+).
    pub warnings: Vec<String>,
    /// Custom payload (v4+).
    pub custom_payload: HashMap<String, Bytes>,
}

impl Envelope {
    /// Header flags announcing the prefixes present.
    pub fn flags(&self) -> HeaderFlags {
        let mut flags = HeaderFlags::empty();
        if self.tracing_id.is_some() {
            flags.insert(HeaderFlags::TRACING);
        }
        if !self.warnings.is_empty() {
            flags.insert(HeaderFlags::WARNING);
        }
        if !self.custom_payload.is_empty() {
            flags.insert(HeaderFlags::CUSTOM_PAYLOAD);
        }
        flags
    }

    pub fn decode(flags: HeaderFlags, r: &mut WireReader) -> Result<Self> {
        let mut envelope = Envelope::default();
        if flags.tracing() {
            let raw = r.read_raw("tracing id", 16)?;
            let mut id = [0u8; 16];
            id.copy_from_slice(&raw);
            envelope.tracing_id = Some(id);
        }
        if flags.warning() {
            envelope.warnings = r.read_string_list("warnings")?;
        }
        if flags.custom_payload() {
            let count = r.read_short_count("custom payload", 6)?;
            let mut payload = HashMap::with_capacity(count);
            for _ in 0..count {
                let key = r.read_string("custom payload key")?;
                let value = r.read_bytes("custom payload value")?.unwrap_or_default();
                payload.insert(key, value);
            }
            envelope.custom_payload = payload;
        }
        Ok(envelope)
    }

    pub fn encode(&self, w: &mut WireWriter) -> Result<()> {
        if let Some(id) = &self.tracing_id {
            w.write_raw(id);
        }
        if !self.warnings.is_empty() {
            w.write_string_list("warnings", &self.warnings)?;
        }
        if !self.custom_payload.is_empty() {
            let count = u16::try_from(self.custom_payload.len()).map_err(|_| {
                Error::ValueTooLarge {
                    field: "custom payload",
                    size: self.custom_payload.len(),
                    max: u16::MAX as usize,
                }
            })?;
            w.write_short(count);
            let mut entries: Vec<_> = self.custom_payload.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (key, value) in entries {
                w.write_string("custom payload key", key)?;
                w.write_bytes("custom payload value", Some(value.as_ref()))?;
            }
        }
        Ok(())
    }
}

/// Any response the server can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Error(ServerError),
    Ready,
    /// Authenticator class name.
    Authenticate(String),
    Supported(HashMap<String, Vec<String>>),
    Result(ResultBody),
    Event(Event),
    AuthChallenge(Option<Bytes>),
    AuthSuccess(Option<Bytes>),
}

impl Response {
    pub fn opcode(&self) -> Opcode {
        match self {
            Response::Error(_) => Opcode::Error,
            Response::Ready => Opcode::Ready,
            Response::Authenticate(_) => Opcode::Authenticate,
            Response::Supported(_) => Opcode::Supported,
            Response::Result(_) => Opcode::Result,
            Response::Event(_) => Opcode::Event,
            Response::AuthChallenge(_) => Opcode::AuthChallenge,
            Response::AuthSuccess(_) => Opcode::AuthSuccess,
        }
    }

    /// Decode a response body including any envelope prefixes.
    pub fn decode(
        opcode: Opcode,
        version: ProtocolVersion,
        flags: HeaderFlags,
        body: Bytes,
    ) -> Result<(Envelope, Self)> {
        let mut r = WireReader::new(body);
        let envelope = Envelope::decode(flags, &mut r)?;
        let response = match opcode {
            Opcode::Error => Response::Error(ServerError::decode(version, &mut r)?),
            Opcode::Ready => Response::Ready,
            Opcode::Authenticate => Response::Authenticate(r.read_string("authenticator")?),
            Opcode::Supported => Response::Supported(r.read_string_multimap("supported options")?),
            Opcode::Result => Response::Result(ResultBody::decode(version, &mut r)?),
            Opcode::Event => Response::Event(Event::decode(version, &mut r)?),
            Opcode::AuthChallenge => Response::AuthChallenge(r.read_bytes("auth challenge")?),
            Opcode::AuthSuccess => Response::AuthSuccess(r.read_bytes("auth success")?),
            other => {
                return Err(Error::InvalidBody(format!(
                    "opcode {other} is not a response"
                )))
            }
        };
        r.finish("response body")?;
        Ok((envelope, response))
    }

    /// Write the body for `version`, without envelope prefixes.
    pub fn encode_body(&self, version: ProtocolVersion, w: &mut WireWriter) -> Result<()> {
        match self {
            Response::Error(err) => err.encode(version, w),
            Response::Ready => Ok(()),
            Response::Authenticate(class) => w.write_string("authenticator", class),
            Response::Supported(options) => w.write_string_multimap("supported options", options),
            Response::Result(body) => body.encode(version, w),
            Response::Event(event) => event.encode(version, w),
            Response::AuthChallenge(token) => w.write_bytes("auth challenge", token.as_deref()),
            Response::AuthSuccess(token) => w.write_bytes("auth success", token.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_prefixes() {
        let mut payload = HashMap::new();
        payload.insert("k".to_string(), Bytes::from_static(b"v"));
        let envelope = Envelope {
            tracing_id: Some([7; 16]),
            warnings: vec!["batch too large".into()],
            custom_payload: payload,
        };
        let mut w = WireWriter::new();
        envelope.encode(&mut w).unwrap();
        Response::Ready.encode_body(ProtocolVersion::V4, &mut w).unwrap();

        let (decoded, response) = Response::decode(
            Opcode::Ready,
            ProtocolVersion::V4,
            envelope.flags(),
            Bytes::from(w.into_inner()),
        )
        .unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(response, Response::Ready);
    }

    #[test]
    fn test_request_opcode_rejected() {
        let err = Response::decode(
            Opcode::Query,
            ProtocolVersion::V4,
            HeaderFlags::empty(),
            Bytes::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidBody(_)));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let err = Response::decode(
            Opcode::Ready,
            ProtocolVersion::V4,
            HeaderFlags::empty(),
            Bytes::from_static(&[0]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidBody(_)));
    }

    #[test]
    fn test_supported_roundtrip() {
        let mut options = HashMap::new();
        options.insert("COMPRESSION".to_string(), vec!["deflate".to_string()]);
        let response = Response::Supported(options);
        let mut w = WireWriter::new();
        response.encode_body(ProtocolVersion::V4, &mut w).unwrap();
        let (_, decoded) = Response::decode(
            Opcode::Supported,
            ProtocolVersion::V4,
            HeaderFlags::empty(),
            Bytes::from(w.into_inner()),
        )
        .unwrap();
        assert_eq!(decoded, response);
    }
}
