//! Query parameters shared by QUERY and EXECUTE.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::consistency::Consistency;
use crate::error::{Error, Result};
use crate::flags::QueryFlags;
use crate::primitives::{Value, WireReader, WireWriter};
use crate::version::ProtocolVersion;

/// A bound value, optionally named.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryValue {
    pub name: Option<String>,
    pub value: Value,
}

impl QueryValue {
    pub fn positional(value: impl Into<Value>) -> Self {
        Self {
            name: None,
            value: value.into(),
        }
    }

    pub fn named(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: Some(name.into()),
            value: value.into(),
        }
    }
}

/// Per-request execution parameters.
///
/// Every optional field maps to one flag bit and is left out of the frame
/// entirely when absent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryParams {
    pub consistency: Consistency,
    pub skip_metadata: bool,
    pub values: Vec<QueryValue>,
    pub page_size: Option<i32>,
    pub paging_state: Option<Bytes>,
    pub serial_consistency: Option<Consistency>,
    /// Client-side write timestamp in microseconds since the epoch.
    pub timestamp: Option<i64>,
    /// Per-query keyspace override (v5).
    pub keyspace: Option<String>,
}

impl QueryParams {
    pub fn new(consistency: Consistency) -> Self {
        Self {
            consistency,
            ..Self::default()
        }
    }

    pub fn with_values(mut self, values: Vec<QueryValue>) -> Self {
        self.values = values;
        self
    }

    pub fn with_value(mut self, value: QueryValue) -> Self {
        self.values.push(value);
        self
    }

    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_paging_state(mut self, state: Bytes) -> Self {
        self.paging_state = Some(state);
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

    /// Stamp the request with the current wall-clock time.
    pub fn with_current_timestamp(self) -> Self {
        self.with_timestamp(now_micros())
    }

    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    pub fn skip_metadata(mut self, skip: bool) -> Self {
        self.skip_metadata = skip;
        self
    }

    /// Sum of raw bound-value payload lengths.
    pub fn values_size(&self) -> usize {
        values_size(&self.values)
    }

    fn uses_names(&self) -> Result<bool> {
        uses_names(&self.values)
    }

    /// Flag word describing which optional fields are present.
    pub fn flags(&self) -> Result<QueryFlags> {
        let mut flags = QueryFlags::empty();
        flags.set(QueryFlags::VALUES, !self.values.is_empty());
        flags.set(QueryFlags::SKIP_METADATA, self.skip_metadata);
        flags.set(QueryFlags::PAGE_SIZE, self.page_size.is_some());
        flags.set(QueryFlags::PAGING_STATE, self.paging_state.is_some());
        flags.set(QueryFlags::SERIAL_CONSISTENCY, self.serial_consistency.is_some());
        flags.set(QueryFlags::DEFAULT_TIMESTAMP, self.timestamp.is_some());
        flags.set(QueryFlags::NAMES_FOR_VALUES, self.uses_names()?);
        flags.set(QueryFlags::KEYSPACE, self.keyspace.is_some());
        Ok(flags)
    }

    /// Encode the parameter block for `version`.
    pub fn encode(&self, version: ProtocolVersion, w: &mut WireWriter) -> Result<()> {
        if version == ProtocolVersion::V1 {
            return self.encode_v1(w);
        }
        let flags = self.flags()?;
        let v3 = version >= ProtocolVersion::V3;
        check_version(
            !flags.contains(QueryFlags::DEFAULT_TIMESTAMP) || v3,
            "default timestamp",
            version,
        )?;
        let named = flags.contains(QueryFlags::NAMES_FOR_VALUES);
        check_version(!named || v3, "named values", version)?;
        check_version(
            !flags.contains(QueryFlags::KEYSPACE) || version >= ProtocolVersion::V5,
            "per-query keyspace",
            version,
        )?;
        if let Some(serial) = self.serial_consistency {
            check_serial(serial)?;
        }

        w.write_consistency(self.consistency);
        flags.write(version, w);
        if !self.values.is_empty() {
            write_values(w, &self.values, version, named)?;
        }
        if let Some(page_size) = self.page_size {
            w.write_int(page_size);
        }
        if let Some(state) = &self.paging_state {
            w.write_bytes("paging state", Some(state.as_ref()))?;
        }
        if let Some(serial) = self.serial_consistency {
            w.write_consistency(serial);
        }
        if let Some(ts) = self.timestamp {
            w.write_long(ts);
        }
        if let Some(keyspace) = &self.keyspace {
            w.write_string("keyspace", keyspace)?;
        }
        Ok(())
    }

    fn encode_v1(&self, w: &mut WireWriter) -> Result<()> {
        let v1 = ProtocolVersion::V1;
        check_version(self.values.is_empty(), "bound values in QUERY", v1)?;
        check_version(!self.skip_metadata, "skip metadata", v1)?;
        check_version(self.page_size.is_none() && self.paging_state.is_none(), "paging", v1)?;
        check_version(self.serial_consistency.is_none(), "serial consistency", v1)?;
        check_version(self.timestamp.is_none(), "default timestamp", v1)?;
        check_version(self.keyspace.is_none(), "per-query keyspace", v1)?;
        w.write_consistency(self.consistency);
        Ok(())
    }

    /// Decode the parameter block written by [`encode`](Self::encode).
    pub fn decode(version: ProtocolVersion, r: &mut WireReader) -> Result<Self> {
        let consistency = r.read_consistency("consistency")?;
        let mut params = Self::new(consistency);
        if version == ProtocolVersion::V1 {
            return Ok(params);
        }

        let flags = QueryFlags::read(version, r, "query flags", QueryFlags::all())?;
        params.skip_metadata = flags.contains(QueryFlags::SKIP_METADATA);
        if flags.contains(QueryFlags::VALUES) {
            params.values = read_values(r, flags.contains(QueryFlags::NAMES_FOR_VALUES))?;
        }
        if flags.contains(QueryFlags::PAGE_SIZE) {
            params.page_size = Some(r.read_int("page size")?);
        }
        if flags.contains(QueryFlags::PAGING_STATE) {
            params.paging_state = Some(r.read_bytes("paging state")?.unwrap_or_default());
        }
        if flags.contains(QueryFlags::SERIAL_CONSISTENCY) {
            params.serial_consistency = Some(r.read_consistency("serial consistency")?);
        }
        if flags.contains(QueryFlags::DEFAULT_TIMESTAMP) {
            params.timestamp = Some(r.read_long("timestamp")?);
        }
        if flags.contains(QueryFlags::KEYSPACE) {
            params.keyspace = Some(r.read_string("keyspace")?);
        }
        Ok(params)
    }
}

/// Current wall-clock time in microseconds since the Unix epoch.
pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}

pub(crate) fn values_size(values: &[QueryValue]) -> usize {
    values.iter().map(|v| v.value.payload_len()).sum()
}

/// All values named or all positional; mixing is rejected.
pub(crate) fn uses_names(values: &[QueryValue]) -> Result<bool> {
    let Some(first) = values.first() else {
        return Ok(false);
    };
    let named = first.name.is_some();
    if values.iter().any(|v| v.name.is_some() != named) {
        return Err(Error::InvalidRequest(
            "cannot mix named and positional values".to_string(),
        ));
    }
    Ok(named)
}

/// Write a `[short]` count and the values. UNSET needs v4 or later.
pub(crate) fn write_values(
    w: &mut WireWriter,
    values: &[QueryValue],
    version: ProtocolVersion,
    names: bool,
) -> Result<()> {
    check_version(
        version >= ProtocolVersion::V4 || !values.iter().any(|v| v.value == Value::Unset),
        "unset values",
        version,
    )?;
    let count = u16::try_from(values.len()).map_err(|_| Error::ValueTooLarge {
        field: "value count",
        size: values.len(),
        max: u16::MAX as usize,
    })?;
    w.write_short(count);
    for value in values {
        if names {
            w.write_string("value name", value.name.as_deref().unwrap_or_default())?;
        }
        w.write_value("value", &value.value)?;
    }
    Ok(())
}

pub(crate) fn read_values(r: &mut WireReader, names: bool) -> Result<Vec<QueryValue>> {
    let count = r.read_short_count("value count", 4)?;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let name = if names {
            Some(r.read_string("value name")?)
        } else {
            None
        };
        let value = r.read_value("value")?;
        values.push(QueryValue { name, value });
    }
    Ok(values)
}

pub(crate) fn check_version(ok: bool, feature: &'static str, version: ProtocolVersion) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::UnsupportedFeature {
            feature,
            version: version.as_u8(),
        })
    }
}

pub(crate) fn check_serial(consistency: Consistency) -> Result<()> {
    if consistency.is_serial() {
        Ok(())
    } else {
        Err(Error::InvalidRequest(format!(
            "serial consistency must be SERIAL or LOCAL_SERIAL, got {consistency}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(params: &QueryParams, version: ProtocolVersion) -> Result<Vec<u8>> {
        let mut w = WireWriter::new();
        params.encode(version, &mut w)?;
        Ok(w.into_inner())
    }

    fn decode(bytes: Vec<u8>, version: ProtocolVersion) -> QueryParams {
        let mut r = WireReader::new(Bytes::from(bytes));
        let params = QueryParams::decode(version, &mut r).unwrap();
        r.finish("params").unwrap();
        params
    }

    #[test]
    fn test_minimal_encoding() {
        let bytes = encode(&QueryParams::new(Consistency::One), ProtocolVersion::V4).unwrap();
        assert_eq!(bytes, vec![0, 1, 0]);
    }

    #[test]
    fn test_absent_fields_omitted() {
        let params = QueryParams::new(Consistency::Quorum).with_page_size(100);
        let bytes = encode(&params, ProtocolVersion::V4).unwrap();
        assert_eq!(bytes, vec![0, 4, QueryFlags::PAGE_SIZE.bits() as u8, 0, 0, 0, 100]);
    }

    #[test]
    fn test_full_roundtrip_v5() {
        let params = QueryParams::new(Consistency::LocalQuorum)
            .with_value(QueryValue::named("id", vec![1u8, 2, 3]))
            .with_value(QueryValue::named("x", Value::Unset))
            .with_page_size(5000)
            .with_paging_state(Bytes::from_static(b"state"))
            .with_serial_consistency(Consistency::LocalSerial)
            .with_timestamp(1_700_000_000_000_000)
            .with_keyspace("ks")
            .skip_metadata(true);
        let bytes = encode(&params, ProtocolVersion::V5).unwrap();
        assert_eq!(decode(bytes, ProtocolVersion::V5), params);
    }

    #[test]
    fn test_version_gating() {
        let ks = QueryParams::new(Consistency::One).with_keyspace("ks");
        assert!(matches!(
            encode(&ks, ProtocolVersion::V4),
            Err(Error::UnsupportedFeature { version: 4, .. })
        ));

        let ts = QueryParams::new(Consistency::One).with_timestamp(1);
        assert!(encode(&ts, ProtocolVersion::V2).is_err());
        assert!(encode(&ts, ProtocolVersion::V3).is_ok());

        let values = QueryParams::new(Consistency::One).with_value(QueryValue::positional(vec![1u8]));
        assert!(encode(&values, ProtocolVersion::V1).is_err());
    }

    #[test]
    fn test_unset_needs_v4() {
        let params = QueryParams::new(Consistency::One).with_value(QueryValue::positional(Value::Unset));
        for version in [ProtocolVersion::V2, ProtocolVersion::V3] {
            assert!(matches!(
                encode(&params, version),
                Err(Error::UnsupportedFeature { feature: "unset values", .. })
            ));
        }
        let bytes = encode(&params, ProtocolVersion::V4).unwrap();
        assert_eq!(&bytes[bytes.len() - 4..], &[0xff, 0xff, 0xff, 0xfe]);
    }

    #[test]
    fn test_mixed_names_rejected() {
        let params = QueryParams::new(Consistency::One)
            .with_value(QueryValue::named("a", vec![1u8]))
            .with_value(QueryValue::positional(vec![2u8]));
        assert!(matches!(
            encode(&params, ProtocolVersion::V4),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_non_serial_serial_consistency_rejected() {
        let params = QueryParams::new(Consistency::One).with_serial_consistency(Consistency::Quorum);
        assert!(matches!(
            encode(&params, ProtocolVersion::V4),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_values_size_counts_payload_only() {
        let params = QueryParams::new(Consistency::One)
            .with_value(QueryValue::positional(vec![0u8; 10]))
            .with_value(QueryValue::positional(Value::Null));
        assert_eq!(params.values_size(), 10);
    }

    #[test]
    fn test_unknown_flag_bits_rejected() {
        let mut r = WireReader::new(Bytes::from_static(&[0, 1, 0, 0, 1, 0]));
        assert!(QueryParams::decode(ProtocolVersion::V5, &mut r).is_err());
    }
}
