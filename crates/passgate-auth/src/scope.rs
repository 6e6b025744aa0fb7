//! Per-request cancellation and deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Cancellation token and optional deadline of the inbound request.
///
/// Passed explicitly to every [`PrincipalGetter`](crate::PrincipalGetter) call; outbound work
/// is raced against both and dropped as soon as either fires.
#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestScope {
    /// A scope that is never canceled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tie the scope to an existing cancellation token.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drive `fut` unless the request is canceled or its deadline passes first.
    ///
    /// Cancellation wins over a simultaneously ready result.
    pub async fn guard<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            () = deadline => Err(Error::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}
