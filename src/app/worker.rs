use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::app::pipeline::ConversionPipeline;
use crate::app::queue::WorkReceiver;
use crate::model::{ChapterOutcome, ChapterResult};

/// A fixed number of workers draining the work queue.
pub struct ChapterWorkerPool {
    workers: JoinSet<()>,
}

impl ChapterWorkerPool {
    /// Workers exit when the queue is closed and empty, or on cancellation
    /// once their current item is done.
    pub fn spawn(
        count: usize,
        receiver: WorkReceiver,
        pipeline: Arc<ConversionPipeline>,
        results: mpsc::UnboundedSender<ChapterResult>,
        cancel: CancellationToken,
    ) -> Self {
        let mut workers = JoinSet::new();
        for worker in 0..count.max(1) {
            workers.spawn(worker_loop(
                worker,
                receiver.clone(),
                Arc::clone(&pipeline),
                results.clone(),
                cancel.clone(),
            ));
        }
        Self { workers }
    }

    pub async fn join(mut self) {
        while let Some(joined) = self.workers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(?err, "chapter worker ended abnormally");
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    receiver: WorkReceiver,
    pipeline: Arc<ConversionPipeline>,
    results: mpsc::UnboundedSender<ChapterResult>,
    cancel: CancellationToken,
) {
    tracing::debug!(worker, "chapter worker started");
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = receiver.take() => item,
        };
        let Some(item) = item else {
            break;
        };
        let chapter = item.chapter;

        // A panicking stage takes down only this task, not the worker.
        let task = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.process(&item).await })
        };
        match task.await {
            Ok(Ok(ChapterOutcome::Completed(result))) => {
                if results.send(result).is_err() {
                    tracing::warn!(worker, chapter, "batch coordinator is gone; result dropped");
                }
            }
            Ok(Ok(ChapterOutcome::Discarded(reason))) => {
                tracing::debug!(worker, chapter, ?reason, "work item discarded");
            }
            Ok(Err(err)) => {
                tracing::error!(worker, chapter, ?err, "work item failed");
            }
            Err(err) => {
                tracing::error!(worker, chapter, ?err, "work item panicked");
            }
        }
    }
    tracing::debug!(worker, "chapter worker stopped");
}
