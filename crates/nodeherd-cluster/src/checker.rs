//! Polls cluster membership until it reaches an expected shape.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::admin::AdminClient;
use crate::snapshot::ClusterSnapshot;
use crate::{Error, Result};

/// Default pause between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Read-only convergence checker.
///
/// Each poll fetches a fresh [`ClusterSnapshot`]; only the last one is kept,
/// for diagnostics when the deadline passes. Failed reads are retried until
/// the deadline.
#[derive(Clone)]
pub struct ClusterStateChecker {
    admin: Arc<dyn AdminClient>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl ClusterStateChecker {
    pub fn new(admin: Arc<dyn AdminClient>) -> Self {
        Self {
            admin,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// One fetch, no retry.
    pub async fn snapshot(&self) -> Result<ClusterSnapshot> {
        Ok(self.admin.snapshot().await?)
    }

    /// Waits until exactly `expected` dnodes are listed and ready.
    pub async fn wait_for_dnode_count(
        &self,
        expected: usize,
        within: Duration,
    ) -> Result<ClusterSnapshot> {
        self.wait_for("dnode count", expected, within, |s| {
            s.has_dnode_count(expected)
        })
        .await
    }

    /// Waits until exactly `expected` mnodes are ready under one leader.
    pub async fn wait_for_mnode_count(
        &self,
        expected: usize,
        within: Duration,
    ) -> Result<ClusterSnapshot> {
        self.wait_for("mnode count", expected, within, |s| {
            s.has_mnode_count(expected)
        })
        .await
    }

    /// Polls until `converged` holds for a fetched snapshot.
    pub async fn wait_for<F>(
        &self,
        what: &str,
        expected: usize,
        within: Duration,
        converged: F,
    ) -> Result<ClusterSnapshot>
    where
        F: Fn(&ClusterSnapshot) -> bool,
    {
        let deadline = Instant::now() + within;
        let mut last: Option<ClusterSnapshot> = None;
        let mut polls = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            polls += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining.max(Duration::from_millis(1)), self.admin.snapshot()).await {
                Ok(Ok(snapshot)) => {
                    if converged(&snapshot) {
                        debug!(what, expected, polls, "converged");
                        return Ok(snapshot);
                    }
                    last = Some(snapshot);
                }
                Ok(Err(e)) if e.is_transient() => debug!(what, polls, "poll failed: {e}"),
                Ok(Err(e)) => warn!(what, polls, "poll failed: {e}"),
                Err(_) => debug!(what, polls, "poll timed out"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::ConvergenceTimeout {
                    what: what.to_string(),
                    expected,
                    last: last.map(Box::new),
                });
            }

            tokio::select! {
                () = self.cancel.cancelled() => return Err(Error::Cancelled),
                () = sleep(self.poll_interval.min(deadline - now)) => {}
            }
        }
    }
}
