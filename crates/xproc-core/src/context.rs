//! Caller-supplied cancellation and deadline for lifecycle calls
//!
//! Every remote call made by the core runs through [`ReconcileContext::run`]
//! so a worker can abandon it. Abandoning a call only stops waiting: the
//! remote system may still complete the operation, so callers must assume
//! at-least-once side effects.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Phase, Result};

/// Cancellation token plus optional deadline
#[derive(Debug, Clone, Default)]
pub struct ReconcileContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl ReconcileContext {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Context driven by an existing token
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Child context that also expires after `timeout`
    ///
    /// Cancelling the parent cancels the child; the earlier deadline wins.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(match self.deadline {
                Some(parent) if parent < deadline => parent,
                _ => deadline,
            }),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Run `fut`, abandoning it on cancellation or deadline expiry
    pub async fn run<T, F>(&self, phase: Phase, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled { phase });
        }

        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled { phase }),
            _ = deadline => Err(Error::DeadlineExceeded { phase }),
            result = fut => result,
        }
    }
}
