//! Per-operation cancellation and deadlines
//!
//! Every backend call made by an adapter goes through [`OperationContext::run`] or
//! [`OperationContext::guard`]. A cancelled or expired context aborts the call at that
//! boundary. Effects the backend already committed are not undone.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::warn;

use crate::error::{BoxError, BrokerError, Result};

/// Cancellation token plus optional deadline shared by all steps of one request
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OperationContext {
    /// Context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Context expiring `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Attach an existing cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Child context sharing the deadline; cancelling the parent cancels the child
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Guard that cancels this context when dropped, e.g. with an abandoned request
    pub fn cancel_on_drop(&self) -> DropGuard {
        self.cancel.clone().drop_guard()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail fast if the context is already cancelled or expired
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(BrokerError::Cancelled(operation.to_string()));
        }
        if matches!(self.deadline, Some(deadline) if Instant::now() >= deadline) {
            return Err(BrokerError::DeadlineExceeded(operation.to_string()));
        }
        Ok(())
    }

    /// Drive `fut` unless the context is cancelled or expires first.
    ///
    /// The future's own output is returned untouched, so callers can inspect backend
    /// error codes before deciding how to report them.
    pub async fn guard<F, T>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        self.check(operation)?;

        let guarded = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    Err(BrokerError::Cancelled(operation.to_string()))
                }
                output = fut => Ok(output),
            }
        };

        match self.deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, guarded).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(operation = operation, "Backend operation exceeded its deadline");
                    Err(BrokerError::DeadlineExceeded(operation.to_string()))
                }
            },
            None => guarded.await,
        }
    }

    /// Like [`guard`](Self::guard), wrapping any backend error with `operation`
    pub async fn run<F, T, E>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        self.guard(operation, fut)
            .await?
            .map_err(|e| BrokerError::backend(operation, e))
    }
}
