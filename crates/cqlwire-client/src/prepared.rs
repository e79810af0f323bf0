//! Prepared-statement cache with single-flight preparation.
//!
//! Keys are the exact concatenation of node address, keyspace and statement
//! text. A key is either pending, with one preparation in flight that every
//! caller for the key waits on, or ready with the server's descriptor.
//! Failures are handed to the waiters and never stored.
//!
//! Capacity eviction only ever drops ready entries. A pending entry stays
//! until its preparation settles, so a burst of new keys cannot start a
//! second preparation for a key already in flight. Explicit [`remove`] and
//! [`clear`] do drop pending entries; their preparation still completes for
//! the callers already waiting but is not installed.
//!
//! [`remove`]: PreparedCache::remove
//! [`clear`]: PreparedCache::clear

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cqlwire_proto::Prepared;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::lru::Lru;
use crate::node::NodeAddr;

/// Default number of cached statements.
pub const DEFAULT_MAX_PREPARED_STATEMENTS: usize = 1000;

type Outcome = std::result::Result<Arc<Prepared>, Arc<Error>>;

enum Entry {
    Pending {
        generation: u64,
        outcome: watch::Receiver<Option<Outcome>>,
    },
    Ready(Arc<Prepared>),
}

impl Entry {
    fn is_pending(&self) -> bool {
        matches!(self, Entry::Pending { .. })
    }
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Lookups answered by a ready or in-flight entry.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that started a preparation.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }

    fn record_evictions(&self, n: usize) {
        if n > 0 {
            self.evictions.fetch_add(n as u64, Ordering::Relaxed);
        }
    }
}

struct Shared {
    lru: RwLock<Lru<Entry>>,
    next_generation: AtomicU64,
    stats: CacheStats,
    logger: Logger,
}

/// Shared handle to the prepared-statement cache. Clones share state.
#[derive(Clone)]
pub struct PreparedCache {
    shared: Arc<Shared>,
}

impl PreparedCache {
    pub fn new(max_entries: usize) -> Self {
        Self::with_logger(max_entries, Logger::noop())
    }

    pub fn with_logger(max_entries: usize, logger: Logger) -> Self {
        Self {
            shared: Arc::new(Shared {
                lru: RwLock::new(Lru::new(max_entries)),
                next_generation: AtomicU64::new(1),
                stats: CacheStats::default(),
                logger,
            }),
        }
    }

    /// Cache key for a statement prepared on `node` in `keyspace`.
    pub fn key_for(node: &NodeAddr, keyspace: &str, statement: &str) -> String {
        let mut key = String::with_capacity(node.as_str().len() + keyspace.len() + statement.len());
        key.push_str(node.as_str());
        key.push_str(keyspace);
        key.push_str(statement);
        key
    }

    /// Resolved descriptor for `key`, if any. Never waits for a preparation
    /// in flight. A hit marks the entry as recently used.
    pub fn get(&self, key: &str) -> Option<Arc<Prepared>> {
        let mut lru = self.shared.lru.write();
        match lru.get(key) {
            Some(Entry::Ready(prepared)) => {
                self.shared.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(prepared.clone())
            }
            _ => None,
        }
    }

    /// Resolved descriptor for `key` without touching recency.
    pub fn peek(&self, key: &str) -> Option<Arc<Prepared>> {
        match self.shared.lru.read().peek(key) {
            Some(Entry::Ready(prepared)) => Some(prepared.clone()),
            _ => None,
        }
    }

    /// Return the descriptor for `key`, preparing it if needed.
    ///
    /// At most one `prepare` runs per key at a time; concurrent callers wait
    /// for it and all observe the same outcome. `prepare` is called inside
    /// its own task, so a caller giving up through `ctx` does not abort it
    /// for the others, and a panic in the closure or its future reaches the
    /// waiters as an error.
    pub async fn get_or_prepare<F, Fut>(
        &self,
        ctx: &RequestContext,
        key: &str,
        prepare: F,
    ) -> Result<Arc<Prepared>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Prepared>> + Send + 'static,
    {
        let outcome = {
            let mut lru = self.shared.lru.write();
            match lru.get(key) {
                Some(Entry::Ready(prepared)) => {
                    self.shared.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(prepared.clone());
                }
                Some(Entry::Pending { outcome, .. }) => {
                    self.shared.stats.hits.fetch_add(1, Ordering::Relaxed);
                    outcome.clone()
                }
                None => {
                    self.shared.stats.misses.fetch_add(1, Ordering::Relaxed);
                    let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    let evicted = lru.insert_with(
                        key.to_string(),
                        Entry::Pending {
                            generation,
                            outcome: rx.clone(),
                        },
                        Entry::is_pending,
                    );
                    self.shared.stats.record_evictions(evicted.len());
                    drop(lru);
                    self.spawn_prepare(key.to_string(), generation, tx, prepare);
                    rx
                }
            }
        };

        match ctx.run(wait_outcome(outcome)).await? {
            Ok(prepared) => Ok(prepared),
            Err(err) => Err(Error::Prepare(err)),
        }
    }

    fn spawn_prepare<F, Fut>(
        &self,
        key: String,
        generation: u64,
        tx: watch::Sender<Option<Outcome>>,
        prepare: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Prepared>> + Send + 'static,
    {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let run = async move { prepare().await };
            let outcome = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(Ok(prepared)) => Ok(Arc::new(prepared)),
                Ok(Err(err)) => Err(Arc::new(err)),
                Err(_) => Err(Arc::new(Error::Internal(
                    "prepare task panicked".to_string(),
                ))),
            };
            shared.complete(&key, generation, &outcome);
            // no receivers left is fine
            let _ = tx.send(Some(outcome));
        });
    }

    /// Drop `key`, e.g. after the server reports it unprepared.
    pub fn remove(&self, key: &str) -> bool {
        self.shared.lru.write().remove(key).is_some()
    }

    /// Change the capacity, evicting least recently used ready entries to
    /// fit. Pending entries are kept.
    pub fn set_max_entries(&self, max: usize) {
        let evicted = self.shared.lru.write().set_capacity_with(max, Entry::is_pending);
        self.shared.stats.record_evictions(evicted.len());
    }

    pub fn max_entries(&self) -> usize {
        self.shared.lru.read().capacity()
    }

    /// Drop every entry, pending ones included.
    pub fn clear(&self) {
        let evicted = self.shared.lru.write().clear();
        self.shared.stats.record_evictions(evicted.len());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.shared.lru.read().contains(key)
    }

    /// Entries, pending ones included.
    pub fn len(&self) -> usize {
        self.shared.lru.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.lru.read().is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.shared.stats
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        self.shared.lru.read().keys().map(str::to_string).collect()
    }
}

impl Shared {
    /// Settle the pending entry for `key` if it is still `generation`.
    fn complete(&self, key: &str, generation: u64, outcome: &Outcome) {
        let mut lru = self.lru.write();
        let current = matches!(
            lru.peek(key),
            Some(Entry::Pending { generation: g, .. }) if *g == generation
        );
        if !current {
            // removed or replaced while in flight
            return;
        }
        match outcome {
            Ok(prepared) => {
                if let Some(entry) = lru.peek_mut(key) {
                    *entry = Entry::Ready(prepared.clone());
                }
                // entries kept over capacity while pending can go now
                let evicted = lru.shrink_with(Entry::is_pending);
                self.stats.record_evictions(evicted.len());
            }
            Err(err) => {
                lru.remove(key);
                drop(lru);
                self.logger.scope(|| {
                    tracing::debug!(key = %key, error = %err, "prepare failed, entry dropped");
                });
            }
        }
    }
}

async fn wait_outcome(mut rx: watch::Receiver<Option<Outcome>>) -> Outcome {
    loop {
        let current = rx.borrow_and_update().clone();
        if let Some(outcome) = current {
            return outcome;
        }
        if rx.changed().await.is_err() {
            return Err(Arc::new(Error::Internal(
                "prepare task ended without a result".to_string(),
            )));
        }
    }
}

impl std::fmt::Debug for PreparedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedCache")
            .field("len", &self.len())
            .field("max_entries", &self.max_entries())
            .finish()
    }
}
