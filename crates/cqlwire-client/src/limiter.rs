//! Admission control for in-flight requests.
//!
//! A caller must win [`ConcurrencyLimiter::wait`] before touching the network
//! for a node and must call [`ConcurrencyLimiter::done`] exactly once after
//! the attempt, whatever its outcome. [`AdmissionGuard`] ties the second half
//! to scope exit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::context::{Interrupted, RequestContext};
use crate::logger::Logger;
use crate::node::NodeAddr;

/// Admission failures. The attempt must not be sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimiterError {
    #[error("admission wait interrupted: {0}")]
    Interrupted(#[from] Interrupted),

    #[error("limiter is closed")]
    Closed,

    #[error("admission rejected: {0}")]
    Rejected(String),
}

/// Cooperative admission contract.
pub trait ConcurrencyLimiter: Send + Sync {
    /// Wait for a slot to send to `node`. Returns promptly, holding no slot,
    /// once `ctx` is cancelled or its deadline passes.
    fn wait<'a>(
        &'a self,
        ctx: &'a RequestContext,
        node: &'a NodeAddr,
    ) -> BoxFuture<'a, Result<(), LimiterError>>;

    /// Release the slot taken by a successful [`wait`](Self::wait) for `node`.
    fn done(&self, node: &NodeAddr);
}

/// Wait for admission and return a guard that releases the slot on drop.
pub async fn admit<'a>(
    limiter: &'a dyn ConcurrencyLimiter,
    ctx: &RequestContext,
    node: &NodeAddr,
) -> Result<AdmissionGuard<'a>, LimiterError> {
    limiter.wait(ctx, node).await?;
    Ok(AdmissionGuard {
        limiter,
        node: node.clone(),
    })
}

/// Calls [`ConcurrencyLimiter::done`] once when dropped.
pub struct AdmissionGuard<'a> {
    limiter: &'a dyn ConcurrencyLimiter,
    node: NodeAddr,
}

impl AdmissionGuard<'_> {
    pub fn node(&self) -> &NodeAddr {
        &self.node
    }
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        self.limiter.done(&self.node);
    }
}

/// Bounds in-flight requests with a fixed number of slots.
pub struct SemaphoreLimiter {
    semaphore: Semaphore,
    max: usize,
    in_flight: AtomicUsize,
    logger: Logger,
}

impl SemaphoreLimiter {
    /// Limiter admitting at most `max` requests at once, across all nodes.
    pub fn new(max: usize) -> Self {
        Self {
            semaphore: Semaphore::new(max),
            max,
            in_flight: AtomicUsize::new(0),
            logger: Logger::noop(),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Slots free right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Fail every current and future wait.
    pub fn close(&self) {
        self.semaphore.close();
    }

    async fn acquire(&self, ctx: &RequestContext) -> Result<(), LimiterError> {
        let permit = ctx
            .run(self.semaphore.acquire())
            .await?
            .map_err(|_| LimiterError::Closed)?;
        // returned by done(), not by drop
        permit.forget();
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn release(&self, node: &NodeAddr) {
        let released = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if released {
            self.semaphore.add_permits(1);
        } else {
            self.logger.scope(|| {
                tracing::warn!(node = %node, "done() called without a matching wait()");
            });
        }
    }
}

impl ConcurrencyLimiter for SemaphoreLimiter {
    fn wait<'a>(
        &'a self,
        ctx: &'a RequestContext,
        _node: &'a NodeAddr,
    ) -> BoxFuture<'a, Result<(), LimiterError>> {
        Box::pin(self.acquire(ctx))
    }

    fn done(&self, node: &NodeAddr) {
        self.release(node);
    }
}

/// A [`SemaphoreLimiter`] per node, created on first use.
pub struct PerNodeLimiter {
    per_node: usize,
    nodes: DashMap<NodeAddr, Arc<SemaphoreLimiter>>,
    logger: Logger,
}

impl PerNodeLimiter {
    pub fn new(per_node: usize) -> Self {
        Self {
            per_node,
            nodes: DashMap::new(),
            logger: Logger::noop(),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn per_node(&self) -> usize {
        self.per_node
    }

    /// Requests currently admitted for `node`.
    pub fn in_flight(&self, node: &NodeAddr) -> usize {
        self.nodes.get(node).map(|l| l.in_flight()).unwrap_or(0)
    }

    fn limiter_for(&self, node: &NodeAddr) -> Arc<SemaphoreLimiter> {
        self.nodes
            .entry(node.clone())
            .or_insert_with(|| {
                Arc::new(SemaphoreLimiter::new(self.per_node).with_logger(self.logger.clone()))
            })
            .clone()
    }
}

impl ConcurrencyLimiter for PerNodeLimiter {
    fn wait<'a>(
        &'a self,
        ctx: &'a RequestContext,
        node: &'a NodeAddr,
    ) -> BoxFuture<'a, Result<(), LimiterError>> {
        // the map guard must not live across the await
        let limiter = self.limiter_for(node);
        Box::pin(async move { limiter.acquire(ctx).await })
    }

    fn done(&self, node: &NodeAddr) {
        let limiter = self.nodes.get(node).map(|l| l.value().clone());
        match limiter {
            Some(limiter) => limiter.release(node),
            None => self.logger.scope(|| {
                tracing::warn!(node = %node, "done() for a node that never waited");
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::logger::capture;

    fn node() -> NodeAddr {
        NodeAddr::new("10.0.0.1:9042")
    }

    #[tokio::test]
    async fn test_guard_releases_slot() {
        let limiter = SemaphoreLimiter::new(1);
        let ctx = RequestContext::new();
        {
            let _guard = admit(&limiter, &ctx, &node()).await.unwrap();
            assert_eq!(limiter.available(), 0);
            assert_eq!(limiter.in_flight(), 1);
        }
        assert_eq!(limiter.available(), 1);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_while_full() {
        let limiter = SemaphoreLimiter::new(1);
        let held = RequestContext::new();
        limiter.wait(&held, &node()).await.unwrap();

        let ctx = RequestContext::with_timeout(Duration::from_millis(10));
        let err = limiter.wait(&ctx, &node()).await.unwrap_err();
        assert_eq!(err, LimiterError::Interrupted(Interrupted::DeadlineExceeded));
        assert_eq!(limiter.in_flight(), 1);

        limiter.done(&node());
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_done_is_ignored() {
        let (logger, buf) = capture::logger();
        let limiter = SemaphoreLimiter::new(2).with_logger(logger);
        limiter.done(&node());
        assert_eq!(limiter.available(), 2);
        assert!(capture::text(&buf).contains("without a matching wait"));
    }

    #[tokio::test]
    async fn test_closed() {
        let limiter = SemaphoreLimiter::new(1);
        limiter.close();
        let err = limiter.wait(&RequestContext::new(), &node()).await.unwrap_err();
        assert_eq!(err, LimiterError::Closed);
    }

    #[tokio::test]
    async fn test_per_node_isolation() {
        let limiter = PerNodeLimiter::new(1);
        let ctx = RequestContext::new();
        let a = NodeAddr::new("a");
        let b = NodeAddr::new("b");
        limiter.wait(&ctx, &a).await.unwrap();
        // a is full, b is not
        limiter.wait(&ctx, &b).await.unwrap();

        let blocked = RequestContext::new();
        blocked.cancel();
        assert!(limiter.wait(&blocked, &a).await.is_err());

        limiter.done(&a);
        limiter.done(&b);
        assert_eq!(limiter.in_flight(&a), 0);
        assert_eq!(limiter.in_flight(&b), 0);
    }
}
