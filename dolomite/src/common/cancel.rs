use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cooperative cancellation token.
///
/// Long-running operations check the token between pipeline stages, between
/// cursor batches and between documents. Cancellation aborts the operation
/// with a `QueryCanceled` error; partial results already handed to the caller
/// are not rolled back. A deadline maps onto the same mechanism and surfaces
/// as `MaxTimeMSExpired`.
///
/// Cloning shares the underlying state, so a token handed to a worker can be
/// cancelled from the outside.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

impl CancellationToken {
    /// Creates a token that never expires on its own.
    pub fn new() -> Self {
        CancellationToken::default()
    }

    /// Creates a token that expires after the given budget.
    pub fn with_timeout(budget: Duration) -> Self {
        CancellationToken {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                deadline: Some(Instant::now() + budget),
            }),
        }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Returns an error if the token was cancelled or its deadline passed.
    pub fn check(&self) -> DolomiteResult<()> {
        if self.is_cancelled() {
            return Err(DolomiteError::new(
                "operation was interrupted",
                ErrorKind::QueryCanceled,
            ));
        }
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() > deadline {
                return Err(DolomiteError::new(
                    "operation exceeded time limit",
                    ErrorKind::MaxTimeMSExpired,
                ));
            }
        }
        Ok(())
    }
}
