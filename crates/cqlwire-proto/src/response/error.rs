//! ERROR bodies.

use std::net::IpAddr;

use bytes::Bytes;

use crate::consistency::Consistency;
use crate::error::{Error, Result};
use crate::primitives::{WireReader, WireWriter};
use crate::version::ProtocolVersion;

/// Server error codes.
pub mod error_codes {
    pub const SERVER_ERROR: i32 = 0x0000;
    pub const PROTOCOL_ERROR: i32 = 0x000A;
    pub const BAD_CREDENTIALS: i32 = 0x0100;
    pub const UNAVAILABLE: i32 = 0x1000;
    pub const OVERLOADED: i32 = 0x1001;
    pub const IS_BOOTSTRAPPING: i32 = 0x1002;
    pub const TRUNCATE_ERROR: i32 = 0x1003;
    pub const WRITE_TIMEOUT: i32 = 0x1100;
    pub const READ_TIMEOUT: i32 = 0x1200;
    pub const READ_FAILURE: i32 = 0x1300;
    pub const FUNCTION_FAILURE: i32 = 0x1400;
    pub const WRITE_FAILURE: i32 = 0x1500;
    pub const CDC_WRITE_FAILURE: i32 = 0x1600;
    pub const CAS_WRITE_UNKNOWN: i32 = 0x1700;
    pub const SYNTAX_ERROR: i32 = 0x2000;
    pub const UNAUTHORIZED: i32 = 0x2100;
    pub const INVALID: i32 = 0x2200;
    pub const CONFIG_ERROR: i32 = 0x2300;
    pub const ALREADY_EXISTS: i32 = 0x2400;
    pub const UNPREPARED: i32 = 0x2500;

    /// Codes the protocol can assign: server, availability and request
    /// error classes.
    pub const ASSIGNABLE: std::ops::RangeInclusive<i32> = 0x0000..=0x2FFF;
}

/// Replicas that failed a read or write.
///
/// Up to v4 the server only sends a count; from v5 it sends a failure code
/// per replica address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failures {
    Count(i32),
    ByEndpoint(Vec<(IpAddr, u16)>),
}

impl Failures {
    /// Number of failed replicas.
    pub fn count(&self) -> usize {
        match self {
            Failures::Count(n) => usize::try_from(*n).unwrap_or_default(),
            Failures::ByEndpoint(reasons) => reasons.len(),
        }
    }

    fn decode(version: ProtocolVersion, r: &mut WireReader) -> Result<Self> {
        if version < ProtocolVersion::V5 {
            return Ok(Failures::Count(r.read_int("failure count")?));
        }
        // 1-byte size, 4-byte address, failure code
        let count = r.read_count("failure reasons", 7)?;
        let mut reasons = Vec::with_capacity(count);
        for _ in 0..count {
            let endpoint = r.read_inetaddr("failure endpoint")?;
            reasons.push((endpoint, r.read_short("failure code")?));
        }
        Ok(Failures::ByEndpoint(reasons))
    }

    fn encode(&self, version: ProtocolVersion, w: &mut WireWriter) -> Result<()> {
        match self {
            Failures::Count(n) if version < ProtocolVersion::V5 => w.write_int(*n),
            Failures::ByEndpoint(reasons) if version < ProtocolVersion::V5 => {
                w.write_int(super::result::int_count("failure count", reasons.len())?)
            }
            Failures::ByEndpoint(reasons) => {
                w.write_int(super::result::int_count("failure reasons", reasons.len())?);
                for (endpoint, code) in reasons {
                    w.write_inetaddr(endpoint);
                    w.write_short(*code);
                }
            }
            Failures::Count(_) => {
                return Err(Error::InvalidRequest(
                    "v5 failures need a reason per endpoint".to_string(),
                ))
            }
        }
        Ok(())
    }
}

/// Code-specific payload following the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDetail {
    None,
    Unavailable {
        consistency: Consistency,
        required: i32,
        alive: i32,
    },
    WriteTimeout {
        consistency: Consistency,
        received: i32,
        block_for: i32,
        write_type: String,
        /// CAS contentions, sent on v5 when `write_type` is `CAS`.
        contentions: Option<u16>,
    },
    ReadTimeout {
        consistency: Consistency,
        received: i32,
        block_for: i32,
        data_present: bool,
    },
    ReadFailure {
        consistency: Consistency,
        received: i32,
        block_for: i32,
        failures: Failures,
        data_present: bool,
    },
    FunctionFailure {
        keyspace: String,
        function: String,
        arg_types: Vec<String>,
    },
    WriteFailure {
        consistency: Consistency,
        received: i32,
        block_for: i32,
        failures: Failures,
        write_type: String,
    },
    CasWriteUnknown {
        consistency: Consistency,
        received: i32,
        block_for: i32,
    },
    AlreadyExists {
        keyspace: String,
        table: String,
    },
    /// The server no longer knows this prepared id.
    Unprepared { id: Bytes },
    /// Bytes following the message of a code this crate does not model.
    Raw(Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: i32,
    pub message: String,
    pub detail: ErrorDetail,
}

impl ServerError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: ErrorDetail::None,
        }
    }

    pub fn unprepared(id: Bytes) -> Self {
        Self {
            code: error_codes::UNPREPARED,
            message: "prepared statement not found".to_string(),
            detail: ErrorDetail::Unprepared { id },
        }
    }

    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.detail = detail;
        self
    }

    pub fn is_unprepared(&self) -> bool {
        self.code == error_codes::UNPREPARED
    }

    /// Decode an ERROR body. The reader must hold nothing past the body.
    ///
    /// Codes without a modelled payload keep whatever follows the message as
    /// [`ErrorDetail::Raw`], so a newer server code never fails the frame.
    /// Codes outside [`error_codes::ASSIGNABLE`] get no detail; trailing
    /// bytes are then left for the caller's `finish` to reject.
    pub fn decode(version: ProtocolVersion, r: &mut WireReader) -> Result<Self> {
        let code = r.read_int("error code")?;
        let message = r.read_string("error message")?;
        let detail = match code {
            error_codes::UNAVAILABLE => ErrorDetail::Unavailable {
                consistency: r.read_consistency("consistency")?,
                required: r.read_int("required")?,
                alive: r.read_int("alive")?,
            },
            error_codes::WRITE_TIMEOUT => {
                let consistency = r.read_consistency("consistency")?;
                let received = r.read_int("received")?;
                let block_for = r.read_int("block for")?;
                let write_type = r.read_string("write type")?;
                let contentions = if version >= ProtocolVersion::V5 && write_type == "CAS" {
                    Some(r.read_short("contentions")?)
                } else {
                    None
                };
                ErrorDetail::WriteTimeout {
                    consistency,
                    received,
                    block_for,
                    write_type,
                    contentions,
                }
            }
            error_codes::READ_TIMEOUT => ErrorDetail::ReadTimeout {
                consistency: r.read_consistency("consistency")?,
                received: r.read_int("received")?,
                block_for: r.read_int("block for")?,
                data_present: r.read_u8("data present")? != 0,
            },
            error_codes::READ_FAILURE => ErrorDetail::ReadFailure {
                consistency: r.read_consistency("consistency")?,
                received: r.read_int("received")?,
                block_for: r.read_int("block for")?,
                failures: Failures::decode(version, r)?,
                data_present: r.read_u8("data present")? != 0,
            },
            error_codes::FUNCTION_FAILURE => ErrorDetail::FunctionFailure {
                keyspace: r.read_string("keyspace")?,
                function: r.read_string("function")?,
                arg_types: r.read_string_list("argument types")?,
            },
            error_codes::WRITE_FAILURE => ErrorDetail::WriteFailure {
                consistency: r.read_consistency("consistency")?,
                received: r.read_int("received")?,
                block_for: r.read_int("block for")?,
                failures: Failures::decode(version, r)?,
                write_type: r.read_string("write type")?,
            },
            error_codes::CAS_WRITE_UNKNOWN => ErrorDetail::CasWriteUnknown {
                consistency: r.read_consistency("consistency")?,
                received: r.read_int("received")?,
                block_for: r.read_int("block for")?,
            },
            error_codes::ALREADY_EXISTS => ErrorDetail::AlreadyExists {
                keyspace: r.read_string("keyspace")?,
                table: r.read_string("table")?,
            },
            error_codes::UNPREPARED => ErrorDetail::Unprepared {
                id: r.read_short_bytes("unprepared id")?,
            },
            _ if error_codes::ASSIGNABLE.contains(&code) && r.remaining() > 0 => {
                ErrorDetail::Raw(r.read_raw("error detail", r.remaining())?)
            }
            _ => ErrorDetail::None,
        };
        Ok(Self {
            code,
            message,
            detail,
        })
    }

    pub fn encode(&self, version: ProtocolVersion, w: &mut WireWriter) -> Result<()> {
        w.write_int(self.code);
        w.write_string("error message", &self.message)?;
        match &self.detail {
            ErrorDetail::None => {}
            ErrorDetail::Unavailable {
                consistency,
                required,
                alive,
            } => {
                w.write_consistency(*consistency);
                w.write_int(*required);
                w.write_int(*alive);
            }
            ErrorDetail::WriteTimeout {
                consistency,
                received,
                block_for,
                write_type,
                contentions,
            } => {
                w.write_consistency(*consistency);
                w.write_int(*received);
                w.write_int(*block_for);
                w.write_string("write type", write_type)?;
                if let Some(contentions) = contentions {
                    w.write_short(*contentions);
                }
            }
            ErrorDetail::ReadTimeout {
                consistency,
                received,
                block_for,
                data_present,
            } => {
                w.write_consistency(*consistency);
                w.write_int(*received);
                w.write_int(*block_for);
                w.write_u8(u8::from(*data_present));
            }
            ErrorDetail::ReadFailure {
                consistency,
                received,
                block_for,
                failures,
                data_present,
            } => {
                w.write_consistency(*consistency);
                w.write_int(*received);
                w.write_int(*block_for);
                failures.encode(version, w)?;
                w.write_u8(u8::from(*data_present));
            }
            ErrorDetail::FunctionFailure {
                keyspace,
                function,
                arg_types,
            } => {
                w.write_string("keyspace", keyspace)?;
                w.write_string("function", function)?;
                w.write_string_list("argument types", arg_types)?;
            }
            ErrorDetail::WriteFailure {
                consistency,
                received,
                block_for,
                failures,
                write_type,
            } => {
                w.write_consistency(*consistency);
                w.write_int(*received);
                w.write_int(*block_for);
                failures.encode(version, w)?;
                w.write_string("write type", write_type)?;
            }
            ErrorDetail::CasWriteUnknown {
                consistency,
                received,
                block_for,
            } => {
                w.write_consistency(*consistency);
                w.write_int(*received);
                w.write_int(*block_for);
            }
            ErrorDetail::AlreadyExists { keyspace, table } => {
                w.write_string("keyspace", keyspace)?;
                w.write_string("table", table)?;
            }
            ErrorDetail::Unprepared { id } => w.write_short_bytes("unprepared id", id)?,
            ErrorDetail::Raw(bytes) => w.write_raw(bytes),
        }
        Ok(())
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "server error {:#06x}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_v(err: &ServerError, version: ProtocolVersion) -> ServerError {
        let mut w = WireWriter::new();
        err.encode(version, &mut w).unwrap();
        let mut r = WireReader::new(Bytes::from(w.into_inner()));
        let decoded = ServerError::decode(version, &mut r).unwrap();
        r.finish("error").unwrap();
        decoded
    }

    fn roundtrip(err: &ServerError) -> ServerError {
        roundtrip_v(err, ProtocolVersion::V4)
    }

    #[test]
    fn test_unprepared_carries_id() {
        let err = ServerError::unprepared(Bytes::from_static(&[1, 2, 3]));
        let decoded = roundtrip(&err);
        assert!(decoded.is_unprepared());
        assert_eq!(
            decoded.detail,
            ErrorDetail::Unprepared {
                id: Bytes::from_static(&[1, 2, 3])
            }
        );
    }

    #[test]
    fn test_timeout_details() {
        let err = ServerError {
            code: error_codes::READ_TIMEOUT,
            message: "timed out".into(),
            detail: ErrorDetail::ReadTimeout {
                consistency: Consistency::Quorum,
                received: 1,
                block_for: 2,
                data_present: false,
            },
        };
        assert_eq!(roundtrip(&err), err);
    }

    #[test]
    fn test_plain_code_has_no_detail() {
        let err = ServerError::new(error_codes::SYNTAX_ERROR, "line 1:0 no viable alternative");
        assert_eq!(roundtrip(&err).detail, ErrorDetail::None);
        assert_eq!(
            err.to_string(),
            "server error 0x2000: line 1:0 no viable alternative"
        );
    }

    #[test]
    fn test_read_failure_v4_layout() {
        let mut w = WireWriter::new();
        w.write_int(error_codes::READ_FAILURE);
        w.write_string("message", "Operation failed - received 1 responses and 2 failures").unwrap();
        w.write_consistency(Consistency::Quorum);
        w.write_int(1);
        w.write_int(2);
        w.write_int(2);
        w.write_u8(1);
        let mut r = WireReader::new(Bytes::from(w.into_inner()));
        let err = ServerError::decode(ProtocolVersion::V4, &mut r).unwrap();
        r.finish("error").unwrap();
        assert_eq!(
            err.detail,
            ErrorDetail::ReadFailure {
                consistency: Consistency::Quorum,
                received: 1,
                block_for: 2,
                failures: Failures::Count(2),
                data_present: true,
            }
        );
    }

    #[test]
    fn test_write_failure_v5_reason_map() {
        let err = ServerError::new(error_codes::WRITE_FAILURE, "write failed").with_detail(
            ErrorDetail::WriteFailure {
                consistency: Consistency::LocalQuorum,
                received: 1,
                block_for: 2,
                failures: Failures::ByEndpoint(vec![
                    ("10.0.0.2".parse().unwrap(), 0x0001),
                    ("::1".parse().unwrap(), 0x0002),
                ]),
                write_type: "SIMPLE".into(),
            },
        );
        let decoded = roundtrip_v(&err, ProtocolVersion::V5);
        assert_eq!(decoded, err);
        let ErrorDetail::WriteFailure { failures, .. } = decoded.detail else {
            panic!("expected write failure");
        };
        assert_eq!(failures.count(), 2);

        // a v4 peer only sees the count
        let v4 = roundtrip(&err);
        assert!(matches!(
            v4.detail,
            ErrorDetail::WriteFailure { failures: Failures::Count(2), .. }
        ));
    }

    #[test]
    fn test_function_failure() {
        let err = ServerError::new(error_codes::FUNCTION_FAILURE, "execution of ks.f failed").with_detail(
            ErrorDetail::FunctionFailure {
                keyspace: "ks".into(),
                function: "f".into(),
                arg_types: vec!["int".into(), "text".into()],
            },
        );
        assert_eq!(roundtrip(&err), err);
    }

    #[test]
    fn test_cas_write_timeout_contentions_v5() {
        let err = ServerError::new(error_codes::WRITE_TIMEOUT, "CAS timed out").with_detail(
            ErrorDetail::WriteTimeout {
                consistency: Consistency::Serial,
                received: 0,
                block_for: 1,
                write_type: "CAS".into(),
                contentions: Some(3),
            },
        );
        assert_eq!(roundtrip_v(&err, ProtocolVersion::V5), err);
    }

    #[test]
    fn test_unknown_code_keeps_trailing_bytes() {
        let mut w = WireWriter::new();
        w.write_int(0x1800);
        w.write_string("message", "something new").unwrap();
        w.write_raw(&[1, 2, 3]);
        let mut r = WireReader::new(Bytes::from(w.into_inner()));
        let err = ServerError::decode(ProtocolVersion::V5, &mut r).unwrap();
        r.finish("error").unwrap();
        assert_eq!(err.detail, ErrorDetail::Raw(Bytes::from_static(&[1, 2, 3])));

        // not a code the protocol could send: the bytes stay unread
        let mut w = WireWriter::new();
        w.write_int(0x3000_0012);
        w.write_string("message", "").unwrap();
        w.write_raw(&[0; 10]);
        let mut r = WireReader::new(Bytes::from(w.into_inner()));
        let err = ServerError::decode(ProtocolVersion::V4, &mut r).unwrap();
        assert_eq!(err.detail, ErrorDetail::None);
        assert!(r.finish("error").is_err());
    }
}
