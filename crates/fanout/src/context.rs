//! Cancellation scope and request-scoped values threaded through a fanout.

use std::future::Future;
use std::time::Duration;

use http::Extensions;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::Error;

/// A cancellation/deadline scope plus typed values.
///
/// Cloning shares the scope. Deriving (`with_cancel`, `with_timeout`) creates
/// a child scope: cancelling the child never cancels the parent, cancelling
/// the parent cancels every child.
#[derive(Debug, Clone, Default)]
pub struct FanoutContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    values: Extensions,
}

impl FanoutContext {
    /// A root scope with no deadline and no values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a child scope that can be cancelled independently.
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            values: self.values.clone(),
        }
    }

    /// Derive a child scope whose deadline is at most `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let mut child = self.with_cancel();
        child.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        child
    }

    /// Derive a context carrying `value`, sharing this scope.
    pub fn with_value<T: Clone + Send + Sync + 'static>(&self, value: T) -> Self {
        let mut next = self.clone();
        next.values.insert(value);
        next
    }

    pub fn value<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values.get::<T>()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this scope and every scope derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel this scope when the returned guard is dropped.
    pub fn cancel_on_drop(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }

    /// The reason this scope is finished, or `None` while it is live.
    pub fn err(&self) -> Option<Error> {
        if self.token.is_cancelled() {
            return Some(Error::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the scope is cancelled or its deadline passes.
    pub async fn done(&self) -> Error {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Error::Canceled,
                    _ = tokio::time::sleep_until(deadline) => Error::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                Error::Canceled
            }
        }
    }

    /// Run `fut` inside this scope, abandoning it when the scope finishes.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        if let Some(e) = self.err() {
            return Err(e);
        }
        tokio::select! {
            biased;
            e = self.done() => Err(e),
            result = fut => result,
        }
    }
}
