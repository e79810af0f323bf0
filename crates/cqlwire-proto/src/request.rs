//! Request bodies sent by the client.
//!
//! Each shape knows how to write its body for a given protocol version and
//! how to read it back. The read side is used by in-process fakes, tests and
//! the fuzz target; drivers only ever encode requests.

use std::collections::HashMap;

use bytes::Bytes;

use crate::consistency::Consistency;
use crate::error::{Error, Result};
use crate::flags::{PrepareFlags, QueryFlags};
use crate::opcode::Opcode;
use crate::params::{
    check_serial, check_version, read_values, uses_names, values_size, write_values,
    QueryParams, QueryValue,
};
use crate::primitives::{WireReader, WireWriter};
use crate::version::ProtocolVersion;

/// STARTUP option naming the CQL dialect.
pub const STARTUP_CQL_VERSION: &str = "CQL_VERSION";

/// STARTUP option naming the body compressor.
pub const STARTUP_COMPRESSION: &str = "COMPRESSION";

/// Default CQL dialect requested at startup.
pub const DEFAULT_CQL_VERSION: &str = "3.0.0";

/// Event types accepted by REGISTER.
pub mod events {
    pub const TOPOLOGY_CHANGE: &str = "TOPOLOGY_CHANGE";
    pub const STATUS_CHANGE: &str = "STATUS_CHANGE";
    pub const SCHEMA_CHANGE: &str = "SCHEMA_CHANGE";
}

/// Connection negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Startup {
    pub options: HashMap<String, String>,
}

impl Startup {
    pub fn new(cql_version: impl Into<String>) -> Self {
        let mut options = HashMap::new();
        options.insert(STARTUP_CQL_VERSION.to_string(), cql_version.into());
        Self { options }
    }

    pub fn with_compression(mut self, name: impl Into<String>) -> Self {
        self.options.insert(STARTUP_COMPRESSION.to_string(), name.into());
        self
    }
}

impl Default for Startup {
    fn default() -> Self {
        Self::new(DEFAULT_CQL_VERSION)
    }
}

/// Ad-hoc statement execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub statement: String,
    pub params: QueryParams,
}

impl Query {
    pub fn new(statement: impl Into<String>, params: QueryParams) -> Self {
        Self {
            statement: statement.into(),
            params,
        }
    }
}

/// Statement preparation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepare {
    pub statement: String,
    /// Keyspace to prepare against (v5).
    pub keyspace: Option<String>,
}

impl Prepare {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            keyspace: None,
        }
    }
}

/// Execution of a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execute {
    pub id: Bytes,
    /// Result metadata id returned by PREPARE (required from v5).
    pub result_metadata_id: Option<Bytes>,
    pub params: QueryParams,
}

impl Execute {
    pub fn new(id: Bytes, params: QueryParams) -> Self {
        Self {
            id,
            result_metadata_id: None,
            params,
        }
    }
}

/// Atomicity of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BatchKind {
    #[default]
    Logged,
    Unlogged,
    Counter,
}

impl BatchKind {
    pub fn to_u8(self) -> u8 {
        match self {
            BatchKind::Logged => 0,
            BatchKind::Unlogged => 1,
            BatchKind::Counter => 2,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(BatchKind::Logged),
            1 => Ok(BatchKind::Unlogged),
            2 => Ok(BatchKind::Counter),
            other => Err(Error::InvalidBody(format!("unknown batch kind {other}"))),
        }
    }
}

/// One statement inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatement {
    Text {
        statement: String,
        values: Vec<QueryValue>,
    },
    Prepared {
        id: Bytes,
        values: Vec<QueryValue>,
    },
}

impl BatchStatement {
    pub fn text(statement: impl Into<String>, values: Vec<QueryValue>) -> Self {
        BatchStatement::Text {
            statement: statement.into(),
            values,
        }
    }

    pub fn prepared(id: Bytes, values: Vec<QueryValue>) -> Self {
        BatchStatement::Prepared { id, values }
    }

    pub fn values(&self) -> &[QueryValue] {
        match self {
            BatchStatement::Text { values, .. } | BatchStatement::Prepared { values, .. } => values,
        }
    }
}

/// Several statements applied together.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Batch {
    pub kind: BatchKind,
    pub statements: Vec<BatchStatement>,
    pub consistency: Consistency,
    pub serial_consistency: Option<Consistency>,
    pub timestamp: Option<i64>,
    /// Keyspace override (v5).
    pub keyspace: Option<String>,
}

impl Batch {
    pub fn new(kind: BatchKind, consistency: Consistency) -> Self {
        Self {
            kind,
            consistency,
            ..Self::default()
        }
    }

    pub fn with_statement(mut self, statement: BatchStatement) -> Self {
        self.statements.push(statement);
        self
    }

    pub fn with_serial_consistency(mut self, consistency: Consistency) -> Self {
        self.serial_consistency = Some(consistency);
        self
    }

    pub fn with_timestamp(mut self, micros: i64) -> Self {
        self.timestamp = Some(micros);
        self
    }
}

/// Event subscription.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Register {
    pub events: Vec<String>,
}

impl Register {
    pub fn new<I, S>(events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            events: events.into_iter().map(Into::into).collect(),
        }
    }
}

/// SASL token answering an AUTHENTICATE or AUTH_CHALLENGE.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthResponse {
    pub token: Option<Bytes>,
}

/// Any request the client can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Startup(Startup),
    Options,
    Query(Query),
    Prepare(Prepare),
    Execute(Execute),
    Batch(Batch),
    Register(Register),
    AuthResponse(AuthResponse),
}

/// Size facts gathered while encoding a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BodyStats {
    /// Sum of raw bound-value payload lengths.
    pub values_size: usize,
    /// Statements carried: 1 for QUERY/EXECUTE, N for BATCH, 0 otherwise.
    pub count: usize,
}

impl Request {
    /// Opcode the request is framed with.
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Startup(_) => Opcode::Startup,
            Request::Options => Opcode::Options,
            Request::Query(_) => Opcode::Query,
            Request::Prepare(_) => Opcode::Prepare,
            Request::Execute(_) => Opcode::Execute,
            Request::Batch(_) => Opcode::Batch,
            Request::Register(_) => Opcode::Register,
            Request::AuthResponse(_) => Opcode::AuthResponse,
        }
    }

    /// STARTUP and OPTIONS go out before compression is negotiated.
    pub fn compressible(&self) -> bool {
        !matches!(self, Request::Startup(_) | Request::Options)
    }

    /// Write the body for `version`.
    pub fn encode_body(&self, version: ProtocolVersion, w: &mut WireWriter) -> Result<BodyStats> {
        match self {
            Request::Startup(startup) => {
                w.write_string_map("startup options", &startup.options)?;
                Ok(BodyStats::default())
            }
            Request::Options => Ok(BodyStats::default()),
            Request::Query(query) => {
                w.write_long_string("statement", &query.statement)?;
                query.params.encode(version, w)?;
                Ok(BodyStats {
                    values_size: query.params.values_size(),
                    count: 1,
                })
            }
            Request::Prepare(prepare) => {
                encode_prepare(prepare, version, w)?;
                Ok(BodyStats::default())
            }
            Request::Execute(execute) => {
                encode_execute(execute, version, w)?;
                Ok(BodyStats {
                    values_size: execute.params.values_size(),
                    count: 1,
                })
            }
            Request::Batch(batch) => encode_batch(batch, version, w),
            Request::Register(register) => {
                w.write_string_list("event type", &register.events)?;
                Ok(BodyStats::default())
            }
            Request::AuthResponse(auth) => {
                w.write_bytes("auth token", auth.token.as_deref())?;
                Ok(BodyStats::default())
            }
        }
    }

    /// Decode a request body; the whole body must be consumed.
    pub fn decode(opcode: Opcode, version: ProtocolVersion, body: Bytes) -> Result<Self> {
        let mut r = WireReader::new(body);
        let request = match opcode {
            Opcode::Startup => Request::Startup(Startup {
                options: r.read_string_map("startup options")?,
            }),
            Opcode::Options => Request::Options,
            Opcode::Query => {
                let statement = r.read_long_string("statement")?;
                let params = QueryParams::decode(version, &mut r)?;
                Request::Query(Query { statement, params })
            }
            Opcode::Prepare => Request::Prepare(decode_prepare(version, &mut r)?),
            Opcode::Execute => Request::Execute(decode_execute(version, &mut r)?),
            Opcode::Batch => Request::Batch(decode_batch(version, &mut r)?),
            Opcode::Register => Request::Register(Register {
                events: r.read_string_list("event type")?,
            }),
            Opcode::AuthResponse => Request::AuthResponse(AuthResponse {
                token: r.read_bytes("auth token")?,
            }),
            other => {
                return Err(Error::InvalidBody(format!(
                    "opcode {other} is not a request"
                )))
            }
        };
        r.finish("request body")?;
        Ok(request)
    }
}

fn encode_prepare(prepare: &Prepare, version: ProtocolVersion, w: &mut WireWriter) -> Result<()> {
    w.write_long_string("statement", &prepare.statement)?;
    if version.wide_query_flags() {
        match &prepare.keyspace {
            Some(keyspace) => {
                w.write_uint(PrepareFlags::KEYSPACE.bits());
                w.write_string("keyspace", keyspace)?;
            }
            None => w.write_uint(PrepareFlags::empty().bits()),
        }
    } else {
        check_version(prepare.keyspace.is_none(), "prepare keyspace", version)?;
    }
    Ok(())
}

fn decode_prepare(version: ProtocolVersion, r: &mut WireReader) -> Result<Prepare> {
    let statement = r.read_long_string("statement")?;
    let mut keyspace = None;
    if version.wide_query_flags() {
        let bits = r.read_uint("prepare flags")?;
        let flags = PrepareFlags::from_bits(bits)
            .ok_or_else(|| Error::InvalidBody(format!("unknown prepare flags {bits:#x}")))?;
        if flags.contains(PrepareFlags::KEYSPACE) {
            keyspace = Some(r.read_string("keyspace")?);
        }
    }
    Ok(Prepare {
        statement,
        keyspace,
    })
}

fn encode_execute(execute: &Execute, version: ProtocolVersion, w: &mut WireWriter) -> Result<()> {
    w.write_short_bytes("prepared id", &execute.id)?;
    if version >= ProtocolVersion::V5 {
        let metadata_id = execute.result_metadata_id.as_ref().ok_or_else(|| {
            Error::InvalidRequest("EXECUTE on v5 requires a result metadata id".to_string())
        })?;
        w.write_short_bytes("result metadata id", metadata_id)?;
    }
    if version == ProtocolVersion::V1 {
        // v1 carries values before the consistency and nothing else.
        let params = &execute.params;
        check_version(
            params.flags()?.difference(QueryFlags::VALUES).is_empty(),
            "EXECUTE options",
            version,
        )?;
        write_values(w, &params.values, version, false)?;
        w.write_consistency(params.consistency);
        return Ok(());
    }
    execute.params.encode(version, w)
}

fn decode_execute(version: ProtocolVersion, r: &mut WireReader) -> Result<Execute> {
    let id = r.read_short_bytes("prepared id")?;
    let result_metadata_id = if version >= ProtocolVersion::V5 {
        Some(r.read_short_bytes("result metadata id")?)
    } else {
        None
    };
    let params = if version == ProtocolVersion::V1 {
        let values = read_values(r, false)?;
        let consistency = r.read_consistency("consistency")?;
        QueryParams::new(consistency).with_values(values)
    } else {
        QueryParams::decode(version, r)?
    };
    Ok(Execute {
        id,
        result_metadata_id,
        params,
    })
}

fn encode_batch(batch: &Batch, version: ProtocolVersion, w: &mut WireWriter) -> Result<BodyStats> {
    check_version(version >= ProtocolVersion::V2, "BATCH", version)?;
    let v3 = version >= ProtocolVersion::V3;
    check_version(batch.serial_consistency.is_none() || v3, "batch serial consistency", version)?;
    check_version(batch.timestamp.is_none() || v3, "batch timestamp", version)?;
    check_version(
        batch.keyspace.is_none() || version >= ProtocolVersion::V5,
        "batch keyspace",
        version,
    )?;
    if let Some(serial) = batch.serial_consistency {
        check_serial(serial)?;
    }

    let count = u16::try_from(batch.statements.len()).map_err(|_| Error::ValueTooLarge {
        field: "batch statements",
        size: batch.statements.len(),
        max: u16::MAX as usize,
    })?;

    w.write_u8(batch.kind.to_u8());
    w.write_short(count);
    let mut stats = BodyStats {
        values_size: 0,
        count: batch.statements.len(),
    };
    for statement in &batch.statements {
        if uses_names(statement.values())? {
            return Err(Error::InvalidRequest(
                "named values are not supported in batches".to_string(),
            ));
        }
        match statement {
            BatchStatement::Text { statement, .. } => {
                w.write_u8(0);
                w.write_long_string("statement", statement)?;
            }
            BatchStatement::Prepared { id, .. } => {
                w.write_u8(1);
                w.write_short_bytes("prepared id", id)?;
            }
        }
        write_values(w, statement.values(), version, false)?;
        stats.values_size += values_size(statement.values());
    }

    w.write_consistency(batch.consistency);
    if v3 {
        let mut flags = QueryFlags::empty();
        flags.set(QueryFlags::SERIAL_CONSISTENCY, batch.serial_consistency.is_some());
        flags.set(QueryFlags::DEFAULT_TIMESTAMP, batch.timestamp.is_some());
        flags.set(QueryFlags::KEYSPACE, batch.keyspace.is_some());
        flags.write(version, w);
        if let Some(serial) = batch.serial_consistency {
            w.write_consistency(serial);
        }
        if let Some(ts) = batch.timestamp {
            w.write_long(ts);
        }
        if let Some(keyspace) = &batch.keyspace {
            w.write_string("keyspace", keyspace)?;
        }
    }
    Ok(stats)
}

fn decode_batch(version: ProtocolVersion, r: &mut WireReader) -> Result<Batch> {
    check_version(version >= ProtocolVersion::V2, "BATCH", version)?;
    let kind = BatchKind::from_u8(r.read_u8("batch kind")?)?;
    // discriminator + shortest id prefix + value count
    let count = r.read_short_count("batch statements", 5)?;
    let mut statements = Vec::with_capacity(count);
    for _ in 0..count {
        let statement = match r.read_u8("batch statement kind")? {
            0 => {
                let statement = r.read_long_string("statement")?;
                let values = read_values(r, false)?;
                BatchStatement::Text { statement, values }
            }
            1 => {
                let id = r.read_short_bytes("prepared id")?;
                let values = read_values(r, false)?;
                BatchStatement::Prepared { id, values }
            }
            other => {
                return Err(Error::InvalidBody(format!(
                    "unknown batch statement kind {other}"
                )))
            }
        };
        statements.push(statement);
    }

    let mut batch = Batch {
        kind,
        statements,
        consistency: r.read_consistency("consistency")?,
        ..Batch::default()
    };
    if version >= ProtocolVersion::V3 {
        let flags = QueryFlags::read(version, r, "batch flags", QueryFlags::BATCH)?;
        if flags.contains(QueryFlags::SERIAL_CONSISTENCY) {
            batch.serial_consistency = Some(r.read_consistency("serial consistency")?);
        }
        if flags.contains(QueryFlags::DEFAULT_TIMESTAMP) {
            batch.timestamp = Some(r.read_long("timestamp")?);
        }
        if flags.contains(QueryFlags::KEYSPACE) {
            batch.keyspace = Some(r.read_string("keyspace")?);
        }
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Value;

    fn roundtrip(request: &Request, version: ProtocolVersion) -> Request {
        let mut w = WireWriter::new();
        request.encode_body(version, &mut w).unwrap();
        Request::decode(request.opcode(), version, Bytes::from(w.into_inner())).unwrap()
    }

    #[test]
    fn test_startup_roundtrip() {
        let startup = Request::Startup(Startup::default().with_compression("deflate"));
        assert_eq!(roundtrip(&startup, ProtocolVersion::V4), startup);
        assert!(!startup.compressible());
    }

    #[test]
    fn test_prepare_keyspace_v5_only() {
        let mut prepare = Prepare::new("SELECT * FROM t");
        prepare.keyspace = Some("ks".into());
        let request = Request::Prepare(prepare);
        assert_eq!(roundtrip(&request, ProtocolVersion::V5), request);

        let mut w = WireWriter::new();
        assert!(request.encode_body(ProtocolVersion::V4, &mut w).is_err());
    }

    #[test]
    fn test_execute_v1_layout() {
        let execute = Execute::new(
            Bytes::from_static(&[9, 9]),
            QueryParams::new(Consistency::One).with_value(QueryValue::positional(vec![1u8])),
        );
        let request = Request::Execute(execute);
        let mut w = WireWriter::new();
        request.encode_body(ProtocolVersion::V1, &mut w).unwrap();
        assert_eq!(
            w.as_slice(),
            &[0, 2, 9, 9, 0, 1, 0, 0, 0, 1, 1, 0, 1]
        );
        assert_eq!(roundtrip(&request, ProtocolVersion::V1), request);
    }

    #[test]
    fn test_execute_v5_requires_metadata_id() {
        let mut execute = Execute::new(Bytes::from_static(&[1]), QueryParams::new(Consistency::One));
        let mut w = WireWriter::new();
        assert!(Request::Execute(execute.clone())
            .encode_body(ProtocolVersion::V5, &mut w)
            .is_err());

        execute.result_metadata_id = Some(Bytes::from_static(&[2]));
        let request = Request::Execute(execute);
        assert_eq!(roundtrip(&request, ProtocolVersion::V5), request);
    }

    #[test]
    fn test_batch_rejects_named_values() {
        let batch = Batch::new(BatchKind::Logged, Consistency::One).with_statement(
            BatchStatement::text("INSERT", vec![QueryValue::named("a", vec![1u8])]),
        );
        let mut w = WireWriter::new();
        assert!(matches!(
            Request::Batch(batch).encode_body(ProtocolVersion::V4, &mut w),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_batch_v2_has_no_flags() {
        let batch = Batch::new(BatchKind::Counter, Consistency::Quorum)
            .with_statement(BatchStatement::text("UPDATE c", vec![]));
        let request = Request::Batch(batch);
        let mut w = WireWriter::new();
        request.encode_body(ProtocolVersion::V2, &mut w).unwrap();
        // kind, count, discriminator, long string, value count, consistency
        assert_eq!(w.len(), 1 + 2 + 1 + 4 + 8 + 2 + 2);
        assert_eq!(roundtrip(&request, ProtocolVersion::V2), request);
    }

    #[test]
    fn test_batch_unset_needs_v4() {
        let batch = Batch::new(BatchKind::Logged, Consistency::One)
            .with_statement(BatchStatement::text("INSERT", vec![QueryValue::positional(Value::Unset)]));
        let request = Request::Batch(batch);
        let mut w = WireWriter::new();
        assert!(matches!(
            request.encode_body(ProtocolVersion::V3, &mut w),
            Err(Error::UnsupportedFeature { version: 3, .. })
        ));
        assert_eq!(roundtrip(&request, ProtocolVersion::V4), request);
    }

    #[test]
    fn test_batch_flags_outside_trailer_rejected() {
        let batch = Batch::new(BatchKind::Logged, Consistency::One)
            .with_statement(BatchStatement::text("INSERT", vec![]));
        let mut w = WireWriter::new();
        Request::Batch(batch).encode_body(ProtocolVersion::V4, &mut w).unwrap();
        let mut body = w.into_inner();
        // trailing flag byte: set VALUES, which only a parameter block may carry
        *body.last_mut().unwrap() = QueryFlags::VALUES.bits() as u8;
        assert!(matches!(
            Request::decode(Opcode::Batch, ProtocolVersion::V4, Bytes::from(body)),
            Err(Error::InvalidBody(_))
        ));
    }

    #[test]
    fn test_batch_stats() {
        let batch = Batch::new(BatchKind::Unlogged, Consistency::One)
            .with_statement(BatchStatement::text("A", vec![QueryValue::positional(vec![0u8; 3])]))
            .with_statement(BatchStatement::prepared(
                Bytes::from_static(&[1, 2]),
                vec![QueryValue::positional(Value::Null), QueryValue::positional(vec![0u8; 4])],
            ));
        let mut w = WireWriter::new();
        let stats = Request::Batch(batch).encode_body(ProtocolVersion::V4, &mut w).unwrap();
        assert_eq!(stats, BodyStats { values_size: 7, count: 2 });
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        assert!(Request::decode(Opcode::Options, ProtocolVersion::V4, Bytes::from_static(&[0])).is_err());
    }

    #[test]
    fn test_response_opcode_rejected() {
        assert!(Request::decode(Opcode::Result, ProtocolVersion::V4, Bytes::new()).is_err());
    }
}
