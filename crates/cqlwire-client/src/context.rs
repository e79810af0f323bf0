//! Per-request deadline and cancellation.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a wait ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Deadline and cancellation signal carried by one request.
///
/// Cloning shares the same token. [`child`](Self::child) derives a context
/// that is cancelled with its parent but can also be cancelled alone.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl RequestContext {
    /// No deadline, fresh cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline_after(timeout)
    }

    /// Set the deadline to `timeout` from now, keeping an earlier one.
    pub fn deadline_after(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Set the deadline, keeping an earlier one.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Context cancelled along with `self`, keeping its deadline.
    ///
    /// Cancelling the child does not cancel the parent.
    pub fn child(&self) -> Self {
        Self {
            deadline: self.deadline,
            token: self.token.child_token(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel this context and every child.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Current interruption, if any, without waiting.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.token.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Interrupted::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drive `fut` until it completes or this context is interrupted.
    ///
    /// An interruption that is already pending wins over a ready future.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Interrupted::Cancelled),
            _ = sleep_until(self.deadline) => Err(Interrupted::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
