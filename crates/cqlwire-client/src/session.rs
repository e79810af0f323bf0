//! Request path: limiter, prepared cache, codec and connection composed.
//!
//! The connection pool, host selection and retry policy live outside this
//! crate. A [`RequestPath`] is handed a node and a [`Connection`] capability
//! and does everything between "send this to that node" and a typed result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use cqlwire_proto::{
    Batch, Execute, Frame, FrameInfo, Framer, Opcode, Prepare, Prepared, Query, QueryParams,
    Register, Request, Response, ResultBody,
};
use futures::future::BoxFuture;

use crate::config::SessionConfig;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::limiter::{admit, ConcurrencyLimiter, PerNodeLimiter};
use crate::logger::Logger;
use crate::node::NodeAddr;
use crate::prepared::PreparedCache;

/// Transport capability supplied by the connection pool.
pub trait Connection: Send + Sync {
    /// Write one complete request frame to `node` and return the response
    /// frame carrying the same stream id.
    fn round_trip<'a>(&'a self, node: &'a NodeAddr, frame: Vec<u8>) -> BoxFuture<'a, Result<Frame>>;
}

struct Inner {
    config: SessionConfig,
    framer: Framer,
    cache: PreparedCache,
    limiter: Arc<dyn ConcurrencyLimiter>,
    connection: Arc<dyn Connection>,
    logger: Logger,
    next_stream: AtomicU32,
}

/// Issues requests to nodes. Clones share the cache, limiter and connection.
///
/// # Example
///
/// ```ignore
/// use cqlwire_client::{NodeAddr, RequestContext, RequestPath, SessionConfig};
/// use cqlwire_proto::{Consistency, QueryParams};
///
/// let path = RequestPath::new(SessionConfig::default().with_keyspace("app"), pool);
/// let node = NodeAddr::new("10.0.0.1:9042");
/// let ctx = RequestContext::new();
///
/// let params = QueryParams::new(Consistency::One);
/// let result = path
///     .execute(&ctx, &node, "SELECT * FROM users WHERE id = ?", params)
///     .await?;
/// ```
#[derive(Clone)]
pub struct RequestPath {
    inner: Arc<Inner>,
}

/// Builder for a [`RequestPath`] with a custom limiter or logger.
pub struct RequestPathBuilder {
    config: SessionConfig,
    connection: Arc<dyn Connection>,
    limiter: Option<Arc<dyn ConcurrencyLimiter>>,
    logger: Logger,
}

impl RequestPathBuilder {
    /// Use `limiter` instead of a [`PerNodeLimiter`] sized from the config.
    pub fn limiter(mut self, limiter: Arc<dyn ConcurrencyLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn build(self) -> RequestPath {
        let mut framer = Framer::new(self.config.protocol_version);
        if let Some(compressor) = self.config.compression.compressor() {
            framer = framer.with_compressor(compressor);
        }
        let limiter = self.limiter.unwrap_or_else(|| {
            Arc::new(
                PerNodeLimiter::new(self.config.max_requests_per_node)
                    .with_logger(self.logger.clone()),
            )
        });
        let cache =
            PreparedCache::with_logger(self.config.max_prepared_statements, self.logger.clone());

        RequestPath {
            inner: Arc::new(Inner {
                config: self.config,
                framer,
                cache,
                limiter,
                connection: self.connection,
                logger: self.logger,
                next_stream: AtomicU32::new(0),
            }),
        }
    }
}

impl RequestPath {
    /// Request path with a per-node limiter sized from `config` and no logging.
    pub fn new(config: SessionConfig, connection: Arc<dyn Connection>) -> Self {
        Self::builder(config, connection).build()
    }

    pub fn builder(config: SessionConfig, connection: Arc<dyn Connection>) -> RequestPathBuilder {
        RequestPathBuilder {
            config,
            connection,
            limiter: None,
            logger: Logger::noop(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn framer(&self) -> &Framer {
        &self.inner.framer
    }

    /// The prepared-statement cache, shared by clones of this path.
    pub fn cache(&self) -> &PreparedCache {
        &self.inner.cache
    }

    /// Run an ad-hoc statement.
    pub async fn query(
        &self,
        ctx: &RequestContext,
        node: &NodeAddr,
        query: Query,
    ) -> Result<ResultBody> {
        let ctx = self.scoped(ctx);
        let response = self.send(&ctx, node, &Request::Query(query)).await?;
        expect_result(response)
    }

    /// Prepared descriptor for `statement` on `node`, from the cache or a
    /// single PREPARE shared by every concurrent caller.
    pub async fn prepare(
        &self,
        ctx: &RequestContext,
        node: &NodeAddr,
        statement: &str,
    ) -> Result<Arc<Prepared>> {
        let ctx = self.scoped(ctx);
        let key = self.cache_key(node, statement);
        self.prepare_keyed(&ctx, node, &key, statement).await
    }

    /// Execute `statement` through its prepared form.
    ///
    /// If the server no longer knows the prepared id, the cache entry is
    /// dropped and the statement is prepared and executed once more.
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        node: &NodeAddr,
        statement: &str,
        params: QueryParams,
    ) -> Result<ResultBody> {
        let ctx = self.scoped(ctx);
        let key = self.cache_key(node, statement);

        let prepared = self.prepare_keyed(&ctx, node, &key, statement).await?;
        match self.execute_prepared(&ctx, node, &prepared, params.clone()).await {
            Err(err) if err.is_unprepared() => {
                self.inner.logger.scope(|| {
                    tracing::warn!(node = %node, statement, "prepared id unknown to node, re-preparing");
                });
                self.inner.cache.remove(&key);
                let prepared = self.prepare_keyed(&ctx, node, &key, statement).await?;
                self.execute_prepared(&ctx, node, &prepared, params).await
            }
            other => other,
        }
    }

    pub async fn batch(
        &self,
        ctx: &RequestContext,
        node: &NodeAddr,
        batch: Batch,
    ) -> Result<ResultBody> {
        let ctx = self.scoped(ctx);
        let response = self.send(&ctx, node, &Request::Batch(batch)).await?;
        expect_result(response)
    }

    /// Ask `node` which STARTUP options it supports.
    pub async fn options(
        &self,
        ctx: &RequestContext,
        node: &NodeAddr,
    ) -> Result<HashMap<String, Vec<String>>> {
        let ctx = self.scoped(ctx);
        match self.send(&ctx, node, &Request::Options).await? {
            Response::Supported(options) => Ok(options),
            other => Err(Error::UnexpectedResponse(other.opcode())),
        }
    }

    /// Subscribe the connection to `node` to server events.
    pub async fn register(
        &self,
        ctx: &RequestContext,
        node: &NodeAddr,
        register: Register,
    ) -> Result<()> {
        let ctx = self.scoped(ctx);
        match self.send(&ctx, node, &Request::Register(register)).await? {
            Response::Ready => Ok(()),
            other => Err(Error::UnexpectedResponse(other.opcode())),
        }
    }

    /// Build, admit, send and decode one request.
    ///
    /// The frame is built before admission so an encode failure never holds
    /// a slot, and nothing reaches the connection unless admission succeeded.
    async fn send(
        &self,
        ctx: &RequestContext,
        node: &NodeAddr,
        request: &Request,
    ) -> Result<Response> {
        let frame = self.inner.framer.build(request, self.next_stream())?;
        let _slot = admit(self.inner.limiter.as_ref(), ctx, node).await?;

        self.trace_frame(node, &frame.info);
        let reply = ctx
            .run(self.inner.connection.round_trip(node, frame.bytes))
            .await??;
        let (envelope, response) = reply.response()?;

        if !envelope.warnings.is_empty() {
            self.inner.logger.scope(|| {
                for warning in &envelope.warnings {
                    tracing::warn!(node = %node, warning = %warning, "server warning");
                }
            });
        }

        match response {
            Response::Error(err) => Err(Error::Server(err)),
            other => Ok(other),
        }
    }

    async fn prepare_keyed(
        &self,
        ctx: &RequestContext,
        node: &NodeAddr,
        key: &str,
        statement: &str,
    ) -> Result<Arc<Prepared>> {
        let this = self.clone();
        let node = node.clone();
        let statement = statement.to_string();
        self.inner
            .cache
            .get_or_prepare(ctx, key, move || async move {
                this.prepare_uncached(&node, statement).await
            })
            .await
    }

    /// One PREPARE round trip. Runs detached from any single caller, so it
    /// gets its own deadline rather than a waiter's.
    async fn prepare_uncached(&self, node: &NodeAddr, statement: String) -> Result<Prepared> {
        let ctx = RequestContext::with_timeout(self.inner.config.request_timeout);
        let request = Request::Prepare(Prepare::new(statement));
        match self.send(&ctx, node, &request).await? {
            Response::Result(ResultBody::Prepared(prepared)) => Ok(prepared),
            Response::Result(_) => Err(Error::UnexpectedResponse(Opcode::Result)),
            other => Err(Error::UnexpectedResponse(other.opcode())),
        }
    }

    async fn execute_prepared(
        &self,
        ctx: &RequestContext,
        node: &NodeAddr,
        prepared: &Prepared,
        params: QueryParams,
    ) -> Result<ResultBody> {
        let mut execute = Execute::new(prepared.id.clone(), params);
        execute.result_metadata_id = prepared.result_metadata_id.clone();
        let response = self.send(ctx, node, &Request::Execute(execute)).await?;
        expect_result(response)
    }

    fn cache_key(&self, node: &NodeAddr, statement: &str) -> String {
        let keyspace = self.inner.config.keyspace.as_deref().unwrap_or_default();
        PreparedCache::key_for(node, keyspace, statement)
    }

    /// Apply the configured timeout to contexts that carry no deadline.
    fn scoped(&self, ctx: &RequestContext) -> RequestContext {
        match ctx.deadline() {
            Some(_) => ctx.clone(),
            None => ctx.child().deadline_after(self.inner.config.request_timeout),
        }
    }

    /// Next stream id in `1..=max` for the negotiated version.
    fn next_stream(&self) -> i16 {
        let max = self.inner.framer.version().max_stream_id() as u32;
        let n = self.inner.next_stream.fetch_add(1, Ordering::Relaxed);
        (n % max + 1) as i16
    }

    fn trace_frame(&self, node: &NodeAddr, info: &FrameInfo) {
        self.inner.logger.scope(|| {
            tracing::debug!(
                node = %node,
                opcode = %info.opcode,
                uncompressed = info.uncompressed_size,
                compressed = info.compressed_size,
                values = info.values_size,
                count = info.count,
                "sending frame"
            );
        });
    }
}

fn expect_result(response: Response) -> Result<ResultBody> {
    match response {
        Response::Result(body) => Ok(body),
        other => Err(Error::UnexpectedResponse(other.opcode())),
    }
}

impl std::fmt::Debug for RequestPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPath")
            .field("config", &self.inner.config)
            .field("cache", &self.inner.cache)
            .finish_non_exhaustive()
    }
}
