use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::StoreErrorPolicy;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::store::{self, BoxedClient, KvClient};
use crate::workload::{ReadAction, StreamKind, WriteAction};

// ─── Actions against the store ───────────────────────────────────

/// A unit of work a worker can issue against its store client.
#[async_trait::async_trait]
pub trait Action: Send + 'static {
    const STREAM: StreamKind;

    /// Runs the store operation. The result content is discarded: only
    /// completion and timing matter.
    async fn issue(self, client: &mut dyn KvClient, scan_limit: usize) -> Result<()>;
}

#[async_trait::async_trait]
impl Action for ReadAction {
    const STREAM: StreamKind = StreamKind::Read;

    async fn issue(self, client: &mut dyn KvClient, scan_limit: usize) -> Result<()> {
        store::scan(client, &self.collection, scan_limit).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Action for WriteAction {
    const STREAM: StreamKind = StreamKind::Write;

    async fn issue(self, client: &mut dyn KvClient, _scan_limit: usize) -> Result<()> {
        store::put(client, &self.collection, &self.key, &self.value).await
    }
}

// ─── Worker ──────────────────────────────────────────────────────

/// Per-worker tallies, reported when the worker stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub failed: u64,
}

/// Pulls actions of one stream, issues them through its own client and
/// pushes the elapsed time of every completed action to the timing queue.
pub struct Worker<A> {
    pub id: usize,
    pub client: BoxedClient,
    pub actions: Receiver<A>,
    pub timings: Sender<Duration>,
    pub scan_limit: usize,
    pub policy: StoreErrorPolicy,
    pub metrics: Arc<MetricsCollector>,
    pub cancel: CancellationToken,
}

impl<A: Action> Worker<A> {
    /// Runs until the action queue is closed and drained, the timing queue
    /// is closed, or the worker is cancelled.
    ///
    /// Under [`StoreErrorPolicy::FailFast`] the first failed store operation
    /// ends the worker and is returned.
    pub async fn run(mut self) -> Result<WorkerStats> {
        let stream = A::STREAM;
        let id = self.id;
        let mut stats = WorkerStats::default();

        loop {
            let action = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(%stream, worker = id, "worker cancelled");
                    break;
                }
                res = self.actions.recv() => match res {
                    Ok(action) => action,
                    Err(_) => {
                        warn!(%stream, worker = id, "channel has closed");
                        break;
                    }
                },
            };

            // ── Timed section ───────────────────────────────────
            let start = Instant::now();
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(%stream, worker = id, "worker cancelled mid-operation");
                    break;
                }
                res = action.issue(self.client.as_mut(), self.scan_limit) => res,
            };
            let elapsed = start.elapsed();
            // ────────────────────────────────────────────────────

            if let Err(err) = result {
                stats.failed += 1;
                self.metrics.record_error(stream);
                match self.policy {
                    StoreErrorPolicy::Skip => {
                        warn!(%stream, worker = id, error = %err, "store operation failed, skipping");
                        continue;
                    }
                    StoreErrorPolicy::FailFast => {
                        error!(%stream, worker = id, error = %err, "store operation failed, stopping worker");
                        return Err(err);
                    }
                }
            }
            stats.completed += 1;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(%stream, worker = id, "worker cancelled");
                    break;
                }
                res = self.timings.send(elapsed) => {
                    if res.is_err() {
                        warn!(%stream, worker = id, "channel has closed");
                        break;
                    }
                }
            }
        }

        Ok(stats)
    }
}

// ─── Tests ───────────────────────────────────────────────────────
