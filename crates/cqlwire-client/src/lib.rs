//! Request path for the CQL native protocol.
//!
//! The pieces between a caller and a node connection:
//! - [`PreparedCache`]: LRU of prepared statements with single-flight
//!   preparation per key
//! - [`ConcurrencyLimiter`]: admission contract, with [`SemaphoreLimiter`]
//!   and [`PerNodeLimiter`] implementations
//! - [`RequestContext`]: deadline and cancellation carried by one request
//! - [`Logger`]: injected `tracing` dispatcher, a no-op by default
//! - [`RequestPath`]: composes the above with the frame codec and a
//!   [`Connection`] supplied by the pool
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use cqlwire_client::{NodeAddr, RequestContext, RequestPath, SessionConfig};
//! use cqlwire_proto::{Consistency, QueryParams};
//!
//! let path = RequestPath::new(SessionConfig::default(), Arc::new(pool));
//! let ctx = RequestContext::with_timeout(std::time::Duration::from_secs(2));
//! let rows = path
//!     .execute(&ctx, &NodeAddr::new("10.0.0.1:9042"), "SELECT * FROM t WHERE id = ?",
//!         QueryParams::new(Consistency::LocalQuorum))
//!     .await?;
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod limiter;
pub mod logger;
pub mod lru;
pub mod node;
pub mod prepared;
pub mod session;

pub use config::{Compression, SessionConfig};
pub use context::{Interrupted, RequestContext};
pub use error::{Error, Result};
pub use limiter::{admit, AdmissionGuard, ConcurrencyLimiter, LimiterError, PerNodeLimiter, SemaphoreLimiter};
pub use logger::Logger;
pub use lru::Lru;
pub use node::NodeAddr;
pub use prepared::{CacheStats, PreparedCache};
pub use session::{Connection, RequestPath, RequestPathBuilder};

/// Re-export protocol types.
pub use cqlwire_proto as proto;
