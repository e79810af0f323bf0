//! EVENT bodies pushed on stream -1.

use std::net::SocketAddr;

use crate::error::{Error, Result};
use crate::primitives::{WireReader, WireWriter};
use crate::request::events;
use crate::version::ProtocolVersion;

use super::result::SchemaChange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// NEW_NODE, REMOVED_NODE or MOVED_NODE.
    TopologyChange { change: String, node: SocketAddr },
    /// UP or DOWN.
    StatusChange { change: String, node: SocketAddr },
    SchemaChange(SchemaChange),
}

impl Event {
    /// Name used in REGISTER and on the wire.
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::TopologyChange { .. } => events::TOPOLOGY_CHANGE,
            Event::StatusChange { .. } => events::STATUS_CHANGE,
            Event::SchemaChange(_) => events::SCHEMA_CHANGE,
        }
    }

    pub fn decode(version: ProtocolVersion, r: &mut WireReader) -> Result<Self> {
        let kind = r.read_string("event type")?;
        let event = match kind.as_str() {
            events::TOPOLOGY_CHANGE => Event::TopologyChange {
                change: r.read_string("topology change")?,
                node: r.read_inet("node")?,
            },
            events::STATUS_CHANGE => Event::StatusChange {
                change: r.read_string("status change")?,
                node: r.read_inet("node")?,
            },
            events::SCHEMA_CHANGE => Event::SchemaChange(SchemaChange::decode(version, r)?),
            other => return Err(Error::InvalidBody(format!("unknown event type {other:?}"))),
        };
        Ok(event)
    }

    pub fn encode(&self, version: ProtocolVersion, w: &mut WireWriter) -> Result<()> {
        w.write_string("event type", self.event_type())?;
        match self {
            Event::TopologyChange { change, node } | Event::StatusChange { change, node } => {
                w.write_string("change", change)?;
                w.write_inet(node);
            }
            Event::SchemaChange(change) => change.encode(version, w)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_status_change_roundtrip() {
        let event = Event::StatusChange {
            change: "DOWN".into(),
            node: "10.0.0.7:9042".parse().unwrap(),
        };
        let mut w = WireWriter::new();
        event.encode(ProtocolVersion::V4, &mut w).unwrap();
        let mut r = WireReader::new(Bytes::from(w.into_inner()));
        assert_eq!(Event::decode(ProtocolVersion::V4, &mut r).unwrap(), event);
        assert!(r.is_empty());
    }

    #[test]
    fn test_unknown_event_rejected() {
        let mut w = WireWriter::new();
        w.write_string("event type", "CLUSTER_EXPLODED").unwrap();
        let mut r = WireReader::new(Bytes::from(w.into_inner()));
        assert!(matches!(
            Event::decode(ProtocolVersion::V4, &mut r),
            Err(Error::InvalidBody(_))
        ));
    }
}
