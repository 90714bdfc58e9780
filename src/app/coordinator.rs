use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use crate::model::{Batch, BatchOutcome, ChapterNumber, ChapterResult, SeriesIdentity};
use crate::publish::{Notifier, Publisher, VideoMetadata};
use crate::settings::StorageLayout;
use crate::video::VideoMerger;

/// Merges a batch's chapter videos and publishes the result.
pub struct AggregationStage {
    merger: Arc<dyn VideoMerger>,
    publisher: Arc<dyn Publisher>,
    layout: StorageLayout,
}

impl AggregationStage {
    pub fn new(
        merger: Arc<dyn VideoMerger>,
        publisher: Arc<dyn Publisher>,
        layout: StorageLayout,
    ) -> Self {
        Self {
            merger,
            publisher,
            layout,
        }
    }

    /// Returns the published identifier.
    pub async fn aggregate(
        &self,
        batch: &Batch,
        min: ChapterNumber,
        max: ChapterNumber,
    ) -> anyhow::Result<String> {
        let videos = batch.video_paths();
        let out = self.layout.merged_path(&batch.series, min, max);
        let merged = self
            .merger
            .merge(&videos, &out)
            .await
            .with_context(|| format!("merge chapters {min}-{max}"))?;

        let metadata = VideoMetadata::for_range(&batch.series, min, max);
        self.publisher
            .publish(&merged, &metadata)
            .await
            .with_context(|| format!("publish chapters {min}-{max}"))
    }
}

pub struct BatchCoordinator {
    series: SeriesIdentity,
    results: mpsc::UnboundedReceiver<ChapterResult>,
    window: Duration,
    already_batched: HashSet<ChapterNumber>,
    aggregation: AggregationStage,
    notifier: Arc<dyn Notifier>,
}

impl BatchCoordinator {
    pub fn new(
        series: SeriesIdentity,
        results: mpsc::UnboundedReceiver<ChapterResult>,
        window: Duration,
        aggregation: AggregationStage,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            series,
            results,
            window,
            already_batched: HashSet::new(),
            aggregation,
            notifier,
        }
    }

    /// Closes and handles batches until the result stream ends or `cancel`
    /// fires. A batch still open at cancellation is dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        while let Some(batch) = self.next_batch(&cancel).await {
            let outcome = self.finalize(batch).await;
            tracing::debug!(?outcome, "batch handled");
        }
        tracing::info!(series = %self.series.name, "batch coordinator stopped");
    }

    /// Accumulates results until a full window passes without a new one, or
    /// until every producer is gone.
    ///
    /// Returns `None` on cancellation, or when the stream ends with nothing
    /// accumulated.
    pub async fn next_batch(&mut self, cancel: &CancellationToken) -> Option<Batch> {
        let mut batch = Batch::new(self.series.clone());
        loop {
            loop {
                match self.results.try_recv() {
                    Ok(result) => self.admit(&mut batch, result),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return (!batch.is_empty()).then_some(batch),
                }
            }

            let waited = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if !batch.is_empty() {
                        tracing::info!(
                            results = batch.len(),
                            "shutting down; dropping unclosed batch"
                        );
                    }
                    return None;
                }
                waited = tokio::time::timeout(self.window, self.results.recv()) => waited,
            };
            match waited {
                Ok(Some(result)) => self.admit(&mut batch, result),
                Ok(None) => return (!batch.is_empty()).then_some(batch),
                Err(_) if !batch.is_empty() => return Some(batch),
                Err(_) => {}
            }
        }
    }

    /// Accumulates every result until all producers are gone, however long
    /// conversions take. Used when the whole workload is known up front.
    ///
    /// Returns `None` on cancellation, or when nothing was accumulated.
    pub async fn collect_until_closed(&mut self, cancel: &CancellationToken) -> Option<Batch> {
        let mut batch = Batch::new(self.series.clone());
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if !batch.is_empty() {
                        tracing::info!(
                            results = batch.len(),
                            "shutting down; dropping unclosed batch"
                        );
                    }
                    return None;
                }
                received = self.results.recv() => received,
            };
            match received {
                Some(result) => self.admit(&mut batch, result),
                None => return (!batch.is_empty()).then_some(batch),
            }
        }
    }

    fn admit(&mut self, batch: &mut Batch, result: ChapterResult) {
        match result {
            ChapterResult::Converted(converted) => {
                if !self.already_batched.insert(converted.chapter) {
                    tracing::debug!(chapter = converted.chapter, "chapter already batched; ignoring");
                    return;
                }
                batch.results.insert(converted.chapter, converted);
            }
            ChapterResult::Failed { chapter, reason } => {
                tracing::warn!(chapter, reason = %reason, "chapter failed conversion; left out of batch");
                batch.failed.push(chapter);
            }
        }
    }

    /// Applies the size gate, then aggregates, publishes and notifies.
    pub async fn finalize(&self, batch: Batch) -> BatchOutcome {
        let (Some(min), Some(max)) = (batch.min_chapter(), batch.max_chapter()) else {
            return self.skip(&batch);
        };
        if batch.len() <= 1 {
            return self.skip(&batch);
        }

        tracing::info!(
            series = %batch.series.name,
            min,
            max,
            chapters = batch.len(),
            "aggregating batch"
        );
        match self.aggregation.aggregate(&batch, min, max).await {
            Ok(published_id) => {
                let message = format!(
                    "{}: published chapters {min}-{max} ({} videos) as {published_id}",
                    batch.series.name,
                    batch.len()
                );
                self.notifier.notify(true, &message).await;
                BatchOutcome::Published {
                    min_chapter: min,
                    max_chapter: max,
                    published_id,
                }
            }
            Err(err) => {
                tracing::error!(series = %batch.series.name, min, max, ?err, "batch aggregation failed");
                let message = format!("{}: chapters {min}-{max} failed: {err:#}", batch.series.name);
                self.notifier.notify(false, &message).await;
                BatchOutcome::Failed { message }
            }
        }
    }

    fn skip(&self, batch: &Batch) -> BatchOutcome {
        tracing::warn!(
            series = %batch.series.name,
            results = batch.len(),
            failed = ?batch.failed,
            "batch too small to aggregate; skipping"
        );
        BatchOutcome::Skipped {
            results: batch.len(),
        }
    }
}
