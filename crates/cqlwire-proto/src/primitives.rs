//! Wire primitives.
//!
//! All multi-byte integers are big-endian. Every length or count read from
//! the wire is checked against the bytes actually remaining before it is
//! used, so adversarial input yields an [`Error`] instead of a panic or an
//! oversized allocation.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{Buf, BufMut, Bytes};

use crate::consistency::Consistency;
use crate::error::{Error, Result};

/// `[bytes]` length marking a null value.
pub const NULL_LENGTH: i32 = -1;

/// `[bytes]` length marking an unset bound value (v4+).
pub const UNSET_LENGTH: i32 = -2;

/// A `[bytes]` value as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    #[default]
    Null,
    Unset,
    Set(Bytes),
}

impl Value {
    /// Byte length of the payload; zero for null and unset.
    pub fn payload_len(&self) -> usize {
        match self {
            Value::Set(bytes) => bytes.len(),
            Value::Null | Value::Unset => 0,
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Set(Bytes::from(value))
    }
}

impl From<&'static [u8]> for Value {
    fn from(value: &'static [u8]) -> Self {
        Value::Set(Bytes::from_static(value))
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Set(value)
    }
}

impl From<Option<Bytes>> for Value {
    fn from(value: Option<Bytes>) -> Self {
        value.map_or(Value::Null, Value::Set)
    }
}

/// Append-only writer for frame bodies.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    /// Empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Take the written bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// `[byte]`.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// `[short]`: unsigned, big-endian.
    pub fn write_short(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    /// `[int]`: signed, big-endian.
    pub fn write_int(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    /// Unsigned four-byte word, used for flag words.
    pub fn write_uint(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    /// `[long]`.
    pub fn write_long(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    /// Bytes with no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// `[consistency]`: the level as a `[short]`.
    pub fn write_consistency(&mut self, consistency: Consistency) {
        self.write_short(consistency.to_u16());
    }

    /// `[string]`: short length then UTF-8 bytes.
    pub fn write_string(&mut self, field: &'static str, value: &str) -> Result<()> {
        let len = short_len(field, value.len())?;
        self.write_short(len);
        self.write_raw(value.as_bytes());
        Ok(())
    }

    /// `[long string]`: int length then UTF-8 bytes.
    pub fn write_long_string(&mut self, field: &'static str, value: &str) -> Result<()> {
        let len = int_len(field, value.len())?;
        self.write_int(len);
        self.write_raw(value.as_bytes());
        Ok(())
    }

    /// `[short bytes]`.
    pub fn write_short_bytes(&mut self, field: &'static str, value: &[u8]) -> Result<()> {
        let len = short_len(field, value.len())?;
        self.write_short(len);
        self.write_raw(value);
        Ok(())
    }

    /// `[value]`: `[bytes]` with the null and unset markers. Unset needs v4,
    /// which the parameter and batch encoders check.
    pub fn write_value(&mut self, field: &'static str, value: &Value) -> Result<()> {
        match value {
            Value::Null => self.write_int(NULL_LENGTH),
            Value::Unset => self.write_int(UNSET_LENGTH),
            Value::Set(bytes) => {
                let len = int_len(field, bytes.len())?;
                self.write_int(len);
                self.write_raw(bytes);
            }
        }
        Ok(())
    }

    /// `[bytes]` where `None` is null.
    pub fn write_bytes(&mut self, field: &'static str, value: Option<&[u8]>) -> Result<()> {
        match value {
            None => self.write_int(NULL_LENGTH),
            Some(bytes) => {
                let len = int_len(field, bytes.len())?;
                self.write_int(len);
                self.write_raw(bytes);
            }
        }
        Ok(())
    }

    /// `[string list]`: a `[short]` count then each `[string]`.
    pub fn write_string_list(&mut self, field: &'static str, values: &[String]) -> Result<()> {
        self.write_short(short_len(field, values.len())?);
        for value in values {
            self.write_string(field, value)?;
        }
        Ok(())
    }

    /// `[string map]`, written in key order so output is deterministic.
    pub fn write_string_map(
        &mut self,
        field: &'static str,
        map: &HashMap<String, String>,
    ) -> Result<()> {
        self.write_short(short_len(field, map.len())?);
        let mut entries: Vec<_> = map.iter().collect();
        entries.sort();
        for (key, value) in entries {
            self.write_string(field, key)?;
            self.write_string(field, value)?;
        }
        Ok(())
    }

    /// `[string multimap]`: `[short]` count of `[string]` to `[string list]` pairs.
    pub fn write_string_multimap(
        &mut self,
        field: &'static str,
        map: &HashMap<String, Vec<String>>,
    ) -> Result<()> {
        self.write_short(short_len(field, map.len())?);
        let mut entries: Vec<_> = map.iter().collect();
        entries.sort();
        for (key, values) in entries {
            self.write_string(field, key)?;
            self.write_string_list(field, values)?;
        }
        Ok(())
    }

    /// `[inet]`: address size, address bytes, `[int]` port.
    pub fn write_inet(&mut self, addr: &SocketAddr) {
        self.write_inetaddr(&addr.ip());
        self.write_int(i32::from(addr.port()));
    }

    /// `[inetaddr]`: address size and address bytes, no port.
    pub fn write_inetaddr(&mut self, ip: &IpAddr) {
        match ip {
            IpAddr::V4(ip) => {
                self.write_u8(4);
                self.write_raw(&ip.octets());
            }
            IpAddr::V6(ip) => {
                self.write_u8(16);
                self.write_raw(&ip.octets());
            }
        }
    }
}

fn short_len(field: &'static str, len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| Error::ValueTooLarge {
        field,
        size: len,
        max: u16::MAX as usize,
    })
}

fn int_len(field: &'static str, len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| Error::ValueTooLarge {
        field,
        size: len,
        max: i32::MAX as usize,
    })
}

/// Bounds-checked reader over a frame body.
///
/// Every read names the field it is reading; running out of bytes yields
/// [`Error::Truncated`] with that name.
#[derive(Debug, Clone)]
pub struct WireReader {
    buf: Bytes,
}

impl WireReader {
    /// Reader over `buf`, positioned at its start.
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Fail unless the body has been fully consumed.
    pub fn finish(&self, what: &'static str) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidBody(format!(
                "{} trailing bytes after {what}",
                self.buf.len()
            )))
        }
    }

    fn need(&self, field: &'static str, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            Err(Error::truncated(field, n, self.buf.remaining()))
        } else {
            Ok(())
        }
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8> {
        self.need(field, 1)?;
        Ok(self.buf.get_u8())
    }

    /// `[short]`.
    pub fn read_short(&mut self, field: &'static str) -> Result<u16> {
        self.need(field, 2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_int(&mut self, field: &'static str) -> Result<i32> {
        self.need(field, 4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_uint(&mut self, field: &'static str) -> Result<u32> {
        self.need(field, 4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_long(&mut self, field: &'static str) -> Result<i64> {
        self.need(field, 8)?;
        Ok(self.buf.get_i64())
    }

    /// Take `n` raw bytes without copying.
    pub fn read_raw(&mut self, field: &'static str, n: usize) -> Result<Bytes> {
        self.need(field, n)?;
        Ok(self.buf.split_to(n))
    }

    /// Read an `[int]` count and check that at least `min_item_len` bytes
    /// per item remain, so the count can safely size an allocation.
    pub fn read_count(&mut self, field: &'static str, min_item_len: usize) -> Result<usize> {
        let count = self.read_int(field)?;
        let count = usize::try_from(count).map_err(|_| Error::NegativeLength {
            field,
            value: i64::from(count),
        })?;
        self.check_count(field, count, min_item_len)?;
        Ok(count)
    }

    /// Same as [`read_count`](Self::read_count) for `[short]` counts.
    pub fn read_short_count(&mut self, field: &'static str, min_item_len: usize) -> Result<usize> {
        let count = usize::from(self.read_short(field)?);
        self.check_count(field, count, min_item_len)?;
        Ok(count)
    }

    fn check_count(&self, field: &'static str, count: usize, min_item_len: usize) -> Result<()> {
        let needed = count.saturating_mul(min_item_len);
        if needed > self.remaining() {
            return Err(Error::truncated(field, needed, self.remaining()));
        }
        Ok(())
    }

    pub fn read_consistency(&mut self, field: &'static str) -> Result<Consistency> {
        Consistency::from_u16(self.read_short(field)?)
    }

    /// `[string]`: `[short]` length and UTF-8 bytes.
    pub fn read_string(&mut self, field: &'static str) -> Result<String> {
        let len = usize::from(self.read_short(field)?);
        let raw = self.read_raw(field, len)?;
        utf8(field, raw)
    }

    /// `[long string]`: `[int]` length and UTF-8 bytes.
    pub fn read_long_string(&mut self, field: &'static str) -> Result<String> {
        let len = self.read_int(field)?;
        let len = usize::try_from(len).map_err(|_| Error::NegativeLength {
            field,
            value: i64::from(len),
        })?;
        let raw = self.read_raw(field, len)?;
        utf8(field, raw)
    }

    /// `[short bytes]`. Shares the underlying buffer.
    pub fn read_short_bytes(&mut self, field: &'static str) -> Result<Bytes> {
        let len = usize::from(self.read_short(field)?);
        self.read_raw(field, len)
    }

    /// `[bytes]` that may be null or unset.
    pub fn read_value(&mut self, field: &'static str) -> Result<Value> {
        match self.read_int(field)? {
            NULL_LENGTH => Ok(Value::Null),
            UNSET_LENGTH => Ok(Value::Unset),
            len if len < 0 => Err(Error::NegativeLength {
                field,
                value: i64::from(len),
            }),
            len => Ok(Value::Set(self.read_raw(field, len as usize)?)),
        }
    }

    /// `[bytes]` where any negative length is null.
    pub fn read_bytes(&mut self, field: &'static str) -> Result<Option<Bytes>> {
        let len = self.read_int(field)?;
        if len < 0 {
            return Ok(None);
        }
        self.read_raw(field, len as usize).map(Some)
    }

    pub fn read_string_list(&mut self, field: &'static str) -> Result<Vec<String>> {
        let count = self.read_short_count(field, 2)?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.read_string(field)?);
        }
        Ok(values)
    }

    pub fn read_string_map(&mut self, field: &'static str) -> Result<HashMap<String, String>> {
        let count = self.read_short_count(field, 4)?;
        let mut map = HashMap::with_capacity(count);
        for _ in 0..count {
            let key = self.read_string(field)?;
            let value = self.read_string(field)?;
            map.insert(key, value);
        }
        Ok(map)
    }

    pub fn read_string_multimap(
        &mut self,
        field: &'static str,
    ) -> Result<HashMap<String, Vec<String>>> {
        let count = self.read_short_count(field, 4)?;
        let mut map = HashMap::with_capacity(count);
        for _ in 0..count {
            let key = self.read_string(field)?;
            let values = self.read_string_list(field)?;
            map.insert(key, values);
        }
        Ok(map)
    }

    pub fn read_inet(&mut self, field: &'static str) -> Result<SocketAddr> {
        let ip = self.read_inetaddr(field)?;
        let port = self.read_int(field)?;
        let port = u16::try_from(port)
            .map_err(|_| Error::InvalidBody(format!("invalid port {port} for {field}")))?;
        Ok(SocketAddr::new(ip, port))
    }

    /// `[inetaddr]`: a size byte of 4 or 16 then the address.
    pub fn read_inetaddr(&mut self, field: &'static str) -> Result<IpAddr> {
        let size = self.read_u8(field)?;
        let ip = match size {
            4 => {
                let raw = self.read_raw(field, 4)?;
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&raw);
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            16 => {
                let raw = self.read_raw(field, 16)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&raw);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => {
                return Err(Error::InvalidBody(format!(
                    "invalid inet address size {other} for {field}"
                )))
            }
        };
        Ok(ip)
    }
}

fn utf8(field: &'static str, raw: Bytes) -> Result<String> {
    String::from_utf8(raw.to_vec())
        .map_err(|e| Error::InvalidBody(format!("{field} is not valid UTF-8: {e}")))
}
