//! Node identity.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Opaque address of a cluster node.
///
/// Supplied by host selection and used verbatim as the limiter key and as
/// part of the prepared-statement cache key. Never resolved or validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddr(String);

impl NodeAddr {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// Address as given, e.g. `10.0.0.1:9042`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeAddr {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NodeAddr {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<SocketAddr> for NodeAddr {
    fn from(value: SocketAddr) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_addr_form() {
        let addr: SocketAddr = "127.0.0.1:9042".parse().unwrap();
        assert_eq!(NodeAddr::from(addr).as_str(), "127.0.0.1:9042");
    }

    #[test]
    fn test_serde_transparent() {
        let node = NodeAddr::new("10.0.0.1:9042");
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(json, "\"10.0.0.1:9042\"");
        assert_eq!(serde_json::from_str::<NodeAddr>(&json).unwrap(), node);
    }
}
