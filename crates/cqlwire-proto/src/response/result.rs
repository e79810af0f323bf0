//! RESULT bodies.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::flags::MetadataFlags;
use crate::primitives::{WireReader, WireWriter};
use crate::version::ProtocolVersion;

use super::types::ColumnType;

/// RESULT kind discriminators.
pub mod kinds {
    pub const VOID: i32 = 0x0001;
    pub const ROWS: i32 = 0x0002;
    pub const SET_KEYSPACE: i32 = 0x0003;
    pub const PREPARED: i32 = 0x0004;
    pub const SCHEMA_CHANGE: i32 = 0x0005;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub keyspace: String,
    pub table: String,
    pub name: String,
    pub ty: ColumnType,
}

impl ColumnSpec {
    pub fn new(
        keyspace: impl Into<String>,
        table: impl Into<String>,
        name: impl Into<String>,
        ty: ColumnType,
    ) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
            name: name.into(),
            ty,
        }
    }
}

/// Shape of a result set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultMetadata {
    /// Number of columns per row, present even when `columns` is omitted.
    pub columns_count: usize,
    /// Token to fetch the next page.
    pub paging_state: Option<Bytes>,
    /// Replacement result metadata id (v5).
    pub new_metadata_id: Option<Bytes>,
    /// Empty when the server was asked to skip metadata.
    pub columns: Vec<ColumnSpec>,
    pub no_metadata: bool,
}

impl ResultMetadata {
    pub fn with_columns(columns: Vec<ColumnSpec>) -> Self {
        Self {
            columns_count: columns.len(),
            columns,
            ..Self::default()
        }
    }

    /// Decode rows metadata; column specs are absent when the server skipped them.
    pub fn decode(r: &mut WireReader) -> Result<Self> {
        let flags = MetadataFlags::from_bits_retain(r.read_uint("metadata flags")?);
        let columns_count = r.read_int("column count")?;
        let columns_count = usize::try_from(columns_count).map_err(|_| Error::NegativeLength {
            field: "column count",
            value: i64::from(columns_count),
        })?;

        let mut metadata = ResultMetadata {
            columns_count,
            ..Self::default()
        };
        if flags.contains(MetadataFlags::HAS_MORE_PAGES) {
            metadata.paging_state = Some(r.read_bytes("paging state")?.unwrap_or_default());
        }
        if flags.contains(MetadataFlags::METADATA_CHANGED) {
            metadata.new_metadata_id = Some(r.read_short_bytes("new metadata id")?);
        }
        if flags.contains(MetadataFlags::NO_METADATA) {
            metadata.no_metadata = true;
            return Ok(metadata);
        }
        metadata.columns = decode_columns(r, flags, columns_count)?;
        Ok(metadata)
    }

    pub fn encode(&self, w: &mut WireWriter) -> Result<()> {
        let global = if self.no_metadata { None } else { global_spec(&self.columns) };
        let mut flags = MetadataFlags::empty();
        flags.set(MetadataFlags::GLOBAL_TABLES_SPEC, global.is_some());
        flags.set(MetadataFlags::HAS_MORE_PAGES, self.paging_state.is_some());
        flags.set(MetadataFlags::METADATA_CHANGED, self.new_metadata_id.is_some());
        flags.set(MetadataFlags::NO_METADATA, self.no_metadata);
        w.write_uint(flags.bits());
        w.write_int(int_count("column count", self.columns_count)?);
        if let Some(state) = &self.paging_state {
            w.write_bytes("paging state", Some(state.as_ref()))?;
        }
        if let Some(id) = &self.new_metadata_id {
            w.write_short_bytes("new metadata id", id)?;
        }
        if !self.no_metadata {
            encode_columns(w, &self.columns, global)?;
        }
        Ok(())
    }
}

/// Bind-variable metadata returned by PREPARE.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreparedMetadata {
    /// Indexes of bind variables forming the partition key (v4+).
    pub pk_indexes: Vec<u16>,
    pub columns: Vec<ColumnSpec>,
}

impl PreparedMetadata {
    pub fn decode(version: ProtocolVersion, r: &mut WireReader) -> Result<Self> {
        let flags = MetadataFlags::from_bits_retain(r.read_uint("prepared metadata flags")?);
        let columns_count = r.read_count("bind marker count", 0)?;
        let mut pk_indexes = Vec::new();
        if version >= ProtocolVersion::V4 {
            let pk_count = r.read_count("partition key count", 2)?;
            pk_indexes.reserve(pk_count);
            for _ in 0..pk_count {
                pk_indexes.push(r.read_short("partition key index")?);
            }
        }
        let columns = decode_columns(r, flags, columns_count)?;
        Ok(Self {
            pk_indexes,
            columns,
        })
    }

    pub fn encode(&self, version: ProtocolVersion, w: &mut WireWriter) -> Result<()> {
        let global = global_spec(&self.columns);
        let mut flags = MetadataFlags::empty();
        flags.set(MetadataFlags::GLOBAL_TABLES_SPEC, global.is_some());
        w.write_uint(flags.bits());
        w.write_int(int_count("bind marker count", self.columns.len())?);
        if version >= ProtocolVersion::V4 {
            w.write_int(int_count("partition key count", self.pk_indexes.len())?);
            for index in &self.pk_indexes {
                w.write_short(*index);
            }
        }
        encode_columns(w, &self.columns, global)
    }
}

/// A prepared statement descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    pub id: Bytes,
    /// Result metadata id (v5).
    pub result_metadata_id: Option<Bytes>,
    pub metadata: PreparedMetadata,
    /// Result-set shape (v2+).
    pub result_metadata: ResultMetadata,
}

/// Rows returned by a query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rows {
    pub metadata: ResultMetadata,
    /// Raw cell bytes; `None` is a null cell.
    pub rows: Vec<Vec<Option<Bytes>>>,
}

impl Rows {
    pub fn decode(r: &mut WireReader) -> Result<Self> {
        let metadata = ResultMetadata::decode(r)?;
        let width = metadata.columns_count;
        let min_row = width.saturating_mul(4).max(1);
        let count = r.read_count("row count", min_row)?;
        let mut rows = Vec::with_capacity(count);
        for _ in 0..count {
            let mut row = Vec::with_capacity(width);
            for _ in 0..width {
                row.push(r.read_bytes("cell")?);
            }
            rows.push(row);
        }
        Ok(Self { metadata, rows })
    }

    pub fn encode(&self, w: &mut WireWriter) -> Result<()> {
        self.metadata.encode(w)?;
        w.write_int(int_count("row count", self.rows.len())?);
        for row in &self.rows {
            if row.len() != self.metadata.columns_count {
                return Err(Error::InvalidRequest(format!(
                    "row has {} cells, metadata declares {}",
                    row.len(),
                    self.metadata.columns_count
                )));
            }
            for cell in row {
                w.write_bytes("cell", cell.as_deref())?;
            }
        }
        Ok(())
    }
}

/// Schema change notification, shared by RESULT and EVENT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChange {
    /// CREATED, UPDATED or DROPPED.
    pub change: String,
    /// KEYSPACE, TABLE, TYPE, FUNCTION or AGGREGATE.
    pub target: String,
    pub keyspace: String,
    pub name: Option<String>,
    /// Argument types for FUNCTION and AGGREGATE targets.
    pub arguments: Vec<String>,
}

impl SchemaChange {
    pub fn decode(version: ProtocolVersion, r: &mut WireReader) -> Result<Self> {
        let change = r.read_string("schema change")?;
        if version < ProtocolVersion::V3 {
            // v1/v2: keyspace then table, empty table meaning the keyspace
            let keyspace = r.read_string("keyspace")?;
            let table = r.read_string("table")?;
            let (target, name) = if table.is_empty() {
                ("KEYSPACE".to_string(), None)
            } else {
                ("TABLE".to_string(), Some(table))
            };
            return Ok(Self {
                change,
                target,
                keyspace,
                name,
                arguments: Vec::new(),
            });
        }

        let target = r.read_string("schema target")?;
        let keyspace = r.read_string("keyspace")?;
        let (name, arguments) = match target.as_str() {
            "KEYSPACE" => (None, Vec::new()),
            "TABLE" | "TYPE" => (Some(r.read_string("name")?), Vec::new()),
            "FUNCTION" | "AGGREGATE" => {
                let name = r.read_string("name")?;
                (Some(name), r.read_string_list("arguments")?)
            }
            other => {
                return Err(Error::InvalidBody(format!(
                    "unknown schema change target {other:?}"
                )))
            }
        };
        Ok(Self {
            change,
            target,
            keyspace,
            name,
            arguments,
        })
    }

    pub fn encode(&self, version: ProtocolVersion, w: &mut WireWriter) -> Result<()> {
        w.write_string("schema change", &self.change)?;
        if version < ProtocolVersion::V3 {
            w.write_string("keyspace", &self.keyspace)?;
            return w.write_string("table", self.name.as_deref().unwrap_or_default());
        }
        w.write_string("schema target", &self.target)?;
        w.write_string("keyspace", &self.keyspace)?;
        if let Some(name) = &self.name {
            w.write_string("name", name)?;
        }
        if matches!(self.target.as_str(), "FUNCTION" | "AGGREGATE") {
            w.write_string_list("arguments", &self.arguments)?;
        }
        Ok(())
    }
}

/// Typed RESULT body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultBody {
    Void,
    Rows(Rows),
    SetKeyspace(String),
    Prepared(Prepared),
    SchemaChange(SchemaChange),
}

impl ResultBody {
    pub fn decode(version: ProtocolVersion, r: &mut WireReader) -> Result<Self> {
        let body = match r.read_int("result kind")? {
            kinds::VOID => ResultBody::Void,
            kinds::ROWS => ResultBody::Rows(Rows::decode(r)?),
            kinds::SET_KEYSPACE => ResultBody::SetKeyspace(r.read_string("keyspace")?),
            kinds::PREPARED => {
                let id = r.read_short_bytes("prepared id")?;
                let result_metadata_id = if version >= ProtocolVersion::V5 {
                    Some(r.read_short_bytes("result metadata id")?)
                } else {
                    None
                };
                let metadata = PreparedMetadata::decode(version, r)?;
                let result_metadata = if version >= ProtocolVersion::V2 {
                    ResultMetadata::decode(r)?
                } else {
                    ResultMetadata::default()
                };
                ResultBody::Prepared(Prepared {
                    id,
                    result_metadata_id,
                    metadata,
                    result_metadata,
                })
            }
            kinds::SCHEMA_CHANGE => ResultBody::SchemaChange(SchemaChange::decode(version, r)?),
            other => return Err(Error::InvalidBody(format!("unknown result kind {other}"))),
        };
        Ok(body)
    }

    pub fn encode(&self, version: ProtocolVersion, w: &mut WireWriter) -> Result<()> {
        match self {
            ResultBody::Void => w.write_int(kinds::VOID),
            ResultBody::Rows(rows) => {
                w.write_int(kinds::ROWS);
                rows.encode(w)?;
            }
            ResultBody::SetKeyspace(keyspace) => {
                w.write_int(kinds::SET_KEYSPACE);
                w.write_string("keyspace", keyspace)?;
            }
            ResultBody::Prepared(prepared) => {
                w.write_int(kinds::PREPARED);
                w.write_short_bytes("prepared id", &prepared.id)?;
                if version >= ProtocolVersion::V5 {
                    let id = prepared.result_metadata_id.as_deref().unwrap_or_default();
                    w.write_short_bytes("result metadata id", id)?;
                }
                prepared.metadata.encode(version, w)?;
                if version >= ProtocolVersion::V2 {
                    prepared.result_metadata.encode(w)?;
                }
            }
            ResultBody::SchemaChange(change) => {
                w.write_int(kinds::SCHEMA_CHANGE);
                change.encode(version, w)?;
            }
        }
        Ok(())
    }
}

fn decode_columns(r: &mut WireReader, flags: MetadataFlags, count: usize) -> Result<Vec<ColumnSpec>> {
    let global = if flags.contains(MetadataFlags::GLOBAL_TABLES_SPEC) {
        Some((r.read_string("keyspace")?, r.read_string("table")?))
    } else {
        None
    };
    // name + type id at minimum
    let needed = count.saturating_mul(4);
    if needed > r.remaining() {
        return Err(Error::truncated("column specs", needed, r.remaining()));
    }
    let mut columns = Vec::with_capacity(count);
    for _ in 0..count {
        let (keyspace, table) = match &global {
            Some((keyspace, table)) => (keyspace.clone(), table.clone()),
            None => (r.read_string("keyspace")?, r.read_string("table")?),
        };
        let name = r.read_string("column name")?;
        let ty = ColumnType::decode(r)?;
        columns.push(ColumnSpec {
            keyspace,
            table,
            name,
            ty,
        });
    }
    Ok(columns)
}

fn encode_columns(
    w: &mut WireWriter,
    columns: &[ColumnSpec],
    global: Option<(&str, &str)>,
) -> Result<()> {
    if let Some((keyspace, table)) = global {
        w.write_string("keyspace", keyspace)?;
        w.write_string("table", table)?;
    }
    for column in columns {
        if global.is_none() {
            w.write_string("keyspace", &column.keyspace)?;
            w.write_string("table", &column.table)?;
        }
        w.write_string("column name", &column.name)?;
        column.ty.encode(w)?;
    }
    Ok(())
}

/// Shared keyspace and table when every column agrees on them.
fn global_spec(columns: &[ColumnSpec]) -> Option<(&str, &str)> {
    let first = columns.first()?;
    columns
        .iter()
        .all(|c| c.keyspace == first.keyspace && c.table == first.table)
        .then_some((first.keyspace.as_str(), first.table.as_str()))
}

pub(super) fn int_count(field: &'static str, len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| Error::ValueTooLarge {
        field,
        size: len,
        max: i32::MAX as usize,
    })
}
