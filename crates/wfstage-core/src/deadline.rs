use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::Interrupted;

/// Timeout plus cancellation signal applied to one blocking external step
/// (a git subprocess, an HTTP download, a docker call).
///
/// Clones share the cancellation token, so cancelling the run's root deadline
/// interrupts whichever step is currently in flight.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl Deadline {
    pub fn new(timeout: Option<Duration>, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    /// No timeout, fresh token.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Same cancellation token, different timeout.
    pub fn with_timeout(&self, timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            cancel: self.cancel.clone(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drive `fut` to completion unless the timeout expires or the token is
    /// cancelled first. Dropping `fut` on interruption is what stops the step,
    /// so subprocess futures must be built with `kill_on_drop`.
    pub async fn run<F, T>(&self, what: &str, fut: F) -> Result<T, Interrupted>
    where
        F: Future<Output = T>,
    {
        if self.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled { what: what.into() });
        }

        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                    Interrupted::TimedOut {
                        what: what.into(),
                        secs: limit.as_secs(),
                    }
                }),
                None => Ok(fut.await),
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::warn!(step = what, "Step cancelled");
                Err(Interrupted::Cancelled { what: what.into() })
            }
            result = bounded => result,
        }
    }
}
