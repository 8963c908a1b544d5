use std::iter;
use std::sync::Arc;
use std::time::Instant;

use futures::future::FutureExt;

use crate::connectivity::ReconnectCallback;
use crate::metrics::ReplayMetrics;
use crate::queue::{FileQueue, QueueRecord};

use super::{RecordReplayer, ReplayError};

/// Outcome of one replay pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Records the backend accepted
    pub replayed: usize,
    /// Records put back at the head of the queue
    pub requeued: usize,
    /// Why the pass stopped early, if it did
    pub failure: Option<String>,
}

impl ReplayReport {
    pub fn is_complete(&self) -> bool {
        self.requeued == 0 && self.failure.is_none()
    }
}

/// Drains the queue into a [`RecordReplayer`] in insertion order.
pub struct ReplayCoordinator {
    queue: Arc<FileQueue>,
    replayer: Arc<dyn RecordReplayer>,
}

impl ReplayCoordinator {
    pub fn new(queue: Arc<FileQueue>, replayer: Arc<dyn RecordReplayer>) -> Self {
        Self { queue, replayer }
    }

    pub fn queue(&self) -> &Arc<FileQueue> {
        &self.queue
    }

    /// Replay everything currently buffered.
    ///
    /// Stops at the first rejected record; that record and everything after
    /// it go back to the head of the queue so the next pass retries them in
    /// the same order.
    #[tracing::instrument(skip_all)]
    pub async fn replay_pending(&self) -> Result<ReplayReport, ReplayError> {
        let start = Instant::now();
        let records = self.queue.pop_all().await?;
        let mut report = ReplayReport::default();

        if records.is_empty() {
            return Ok(report);
        }

        let total = records.len();
        let mut pending = records.into_iter();

        while let Some(record) = pending.next() {
            if let Err(e) = self.replayer.replay(&record).await {
                let remaining: Vec<QueueRecord> = iter::once(record).chain(pending).collect();
                tracing::warn!(
                    error = %e,
                    replayed = report.replayed,
                    remaining = remaining.len(),
                    "Replay stopped, requeueing remaining records"
                );

                if let Err(requeue_err) = self.queue.requeue(&remaining).await {
                    tracing::error!(
                        error = %requeue_err,
                        lost = remaining.len(),
                        "Failed to requeue records after replay failure"
                    );
                    ReplayMetrics::record_replayed(report.replayed as u64);
                    return Err(requeue_err.into());
                }

                report.requeued = remaining.len();
                report.failure = Some(e.to_string());
                break;
            }
            report.replayed += 1;
        }

        ReplayMetrics::record_replayed(report.replayed as u64);
        ReplayMetrics::record_requeued(report.requeued as u64);
        ReplayMetrics::record_duration_ms(start.elapsed().as_millis() as u64);

        tracing::info!(
            total,
            replayed = report.replayed,
            requeued = report.requeued,
            "Replay pass finished"
        );

        Ok(report)
    }

    /// Adapt into a watcher reconnect callback.
    ///
    /// An incomplete pass is reported as an error so the watcher logs it; the
    /// requeued records are retried on the next reconnect.
    pub fn into_callback(self: Arc<Self>) -> ReconnectCallback {
        Arc::new(move || {
            let coordinator = Arc::clone(&self);
            async move {
                let report = coordinator.replay_pending().await?;
                match report.failure {
                    Some(reason) => Err(anyhow::anyhow!(
                        "replay incomplete: {} replayed, {} requeued: {}",
                        report.replayed,
                        report.requeued,
                        reason
                    )),
                    None => Ok(()),
                }
            }
            .boxed()
        })
    }
}
