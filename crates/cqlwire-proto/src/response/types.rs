//! Column type descriptors (`[option]` on the wire).
//!
//! Types are decoded structurally only; values stay as raw cell bytes.

use crate::error::{Error, Result};
use crate::primitives::{WireReader, WireWriter};

/// Nesting limit for collection, UDT and tuple types.
pub const MAX_TYPE_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Custom(String),
    Ascii,
    Bigint,
    Blob,
    Boolean,
    Counter,
    Decimal,
    Double,
    Float,
    Int,
    Timestamp,
    Uuid,
    Varchar,
    Varint,
    Timeuuid,
    Inet,
    Date,
    Time,
    Smallint,
    Tinyint,
    Duration,
    List(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
    Set(Box<ColumnType>),
    Udt {
        keyspace: String,
        name: String,
        fields: Vec<(String, ColumnType)>,
    },
    Tuple(Vec<ColumnType>),
}

impl ColumnType {
    /// Decode an `[option]` type descriptor.
    ///
    /// Collection, tuple and UDT descriptors nest; nesting deeper than
    /// [`MAX_TYPE_DEPTH`] is rejected rather than recursed into.
    pub fn decode(r: &mut WireReader) -> Result<Self> {
        Self::decode_at(r, 0)
    }

    fn decode_at(r: &mut WireReader, depth: usize) -> Result<Self> {
        if depth > MAX_TYPE_DEPTH {
            return Err(Error::InvalidBody(format!(
                "column type nested deeper than {MAX_TYPE_DEPTH}"
            )));
        }
        let id = r.read_short("column type")?;
        let ty = match id {
            0x0000 => ColumnType::Custom(r.read_string("custom type")?),
            0x0001 => ColumnType::Ascii,
            0x0002 => ColumnType::Bigint,
            0x0003 => ColumnType::Blob,
            0x0004 => ColumnType::Boolean,
            0x0005 => ColumnType::Counter,
            0x0006 => ColumnType::Decimal,
            0x0007 => ColumnType::Double,
            0x0008 => ColumnType::Float,
            0x0009 => ColumnType::Int,
            // 0x000A is the v1 text alias of varchar
            0x000A | 0x000D => ColumnType::Varchar,
            0x000B => ColumnType::Timestamp,
            0x000C => ColumnType::Uuid,
            0x000E => ColumnType::Varint,
            0x000F => ColumnType::Timeuuid,
            0x0010 => ColumnType::Inet,
            0x0011 => ColumnType::Date,
            0x0012 => ColumnType::Time,
            0x0013 => ColumnType::Smallint,
            0x0014 => ColumnType::Tinyint,
            0x0015 => ColumnType::Duration,
            0x0020 => ColumnType::List(Box::new(Self::decode_at(r, depth + 1)?)),
            0x0021 => {
                let key = Self::decode_at(r, depth + 1)?;
                let value = Self::decode_at(r, depth + 1)?;
                ColumnType::Map(Box::new(key), Box::new(value))
            }
            0x0022 => ColumnType::Set(Box::new(Self::decode_at(r, depth + 1)?)),
            0x0030 => {
                let keyspace = r.read_string("udt keyspace")?;
                let name = r.read_string("udt name")?;
                let count = r.read_short_count("udt fields", 4)?;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    let field = r.read_string("udt field")?;
                    fields.push((field, Self::decode_at(r, depth + 1)?));
                }
                ColumnType::Udt {
                    keyspace,
                    name,
                    fields,
                }
            }
            0x0031 => {
                let count = r.read_short_count("tuple types", 2)?;
                let mut types = Vec::with_capacity(count);
                for _ in 0..count {
                    types.push(Self::decode_at(r, depth + 1)?);
                }
                ColumnType::Tuple(types)
            }
            other => {
                return Err(Error::InvalidBody(format!("unknown column type {other:#06x}")))
            }
        };
        Ok(ty)
    }

    pub fn encode(&self, w: &mut WireWriter) -> Result<()> {
        match self {
            ColumnType::Custom(class) => {
                w.write_short(0x0000);
                w.write_string("custom type", class)?;
            }
            ColumnType::List(inner) => {
                w.write_short(0x0020);
                inner.encode(w)?;
            }
            ColumnType::Map(key, value) => {
                w.write_short(0x0021);
                key.encode(w)?;
                value.encode(w)?;
            }
            ColumnType::Set(inner) => {
                w.write_short(0x0022);
                inner.encode(w)?;
            }
            ColumnType::Udt {
                keyspace,
                name,
                fields,
            } => {
                w.write_short(0x0030);
                w.write_string("udt keyspace", keyspace)?;
                w.write_string("udt name", name)?;
                w.write_short(short_count("udt fields", fields.len())?);
                for (field, ty) in fields {
                    w.write_string("udt field", field)?;
                    ty.encode(w)?;
                }
            }
            ColumnType::Tuple(types) => {
                w.write_short(0x0031);
                w.write_short(short_count("tuple types", types.len())?);
                for ty in types {
                    ty.encode(w)?;
                }
            }
            native => w.write_short(native.native_id()),
        }
        Ok(())
    }

    fn native_id(&self) -> u16 {
        match self {
            ColumnType::Ascii => 0x0001,
            ColumnType::Bigint => 0x0002,
            ColumnType::Blob => 0x0003,
            ColumnType::Boolean => 0x0004,
            ColumnType::Counter => 0x0005,
            ColumnType::Decimal => 0x0006,
            ColumnType::Double => 0x0007,
            ColumnType::Float => 0x0008,
            ColumnType::Int => 0x0009,
            ColumnType::Timestamp => 0x000B,
            ColumnType::Uuid => 0x000C,
            ColumnType::Varchar => 0x000D,
            ColumnType::Varint => 0x000E,
            ColumnType::Timeuuid => 0x000F,
            ColumnType::Inet => 0x0010,
            ColumnType::Date => 0x0011,
            ColumnType::Time => 0x0012,
            ColumnType::Smallint => 0x0013,
            ColumnType::Tinyint => 0x0014,
            ColumnType::Duration => 0x0015,
            ColumnType::Custom(_)
            | ColumnType::List(_)
            | ColumnType::Map(..)
            | ColumnType::Set(_)
            | ColumnType::Udt { .. }
            | ColumnType::Tuple(_) => 0x0000,
        }
    }
}

pub(crate) fn short_count(field: &'static str, len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| Error::ValueTooLarge {
        field,
        size: len,
        max: u16::MAX as usize,
    })
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn roundtrip(ty: &ColumnType) -> ColumnType {
        let mut w = WireWriter::new();
        ty.encode(&mut w).unwrap();
        let mut r = WireReader::new(Bytes::from(w.into_inner()));
        let decoded = ColumnType::decode(&mut r).unwrap();
        assert!(r.is_empty());
        decoded
    }

    #[test]
    fn test_nested_types() {
        let ty = ColumnType::Map(
            Box::new(ColumnType::Varchar),
            Box::new(ColumnType::List(Box::new(ColumnType::Tuple(vec![
                ColumnType::Int,
                ColumnType::Udt {
                    keyspace: "ks".into(),
                    name: "addr".into(),
                    fields: vec![("street".into(), ColumnType::Varchar)],
                },
            ])))),
        );
        assert_eq!(roundtrip(&ty), ty);
    }

    #[test]
    fn test_text_alias() {
        let mut r = WireReader::new(Bytes::from_static(&[0x00, 0x0A]));
        assert_eq!(ColumnType::decode(&mut r).unwrap(), ColumnType::Varchar);
    }

    #[test]
    fn test_depth_limit() {
        // list<list<list<...>>> deeper than the limit
        let bytes: Vec<u8> = std::iter::repeat([0x00u8, 0x20])
            .take(MAX_TYPE_DEPTH + 2)
            .flatten()
            .chain([0x00, 0x09])
            .collect();
        let mut r = WireReader::new(Bytes::from(bytes));
        assert!(matches!(ColumnType::decode(&mut r), Err(Error::InvalidBody(_))));
    }

    #[test]
    fn test_unknown_type_id() {
        let mut r = WireReader::new(Bytes::from_static(&[0x00, 0x40]));
        assert!(ColumnType::decode(&mut r).is_err());
    }
}
