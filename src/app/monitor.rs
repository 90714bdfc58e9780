use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::app::archive::ChapterArchive;
use crate::app::queue::WorkQueue;
use crate::app::state_store::ChapterStateStore;
use crate::model::{ChapterNumber, DiscoveryState, SeriesIdentity, WorkItem};
use crate::source::ChapterSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleReport {
    /// The newest-chapter indicator could not be read; nothing changed.
    SourceUnavailable,
    Advanced {
        from: ChapterNumber,
        to: ChapterNumber,
        enqueued: Vec<ChapterNumber>,
    },
    Rechecked {
        newest: ChapterNumber,
        enqueued: Vec<ChapterNumber>,
    },
}

impl CycleReport {
    pub fn enqueued(&self) -> &[ChapterNumber] {
        match self {
            Self::SourceUnavailable => &[],
            Self::Advanced { enqueued, .. } | Self::Rechecked { enqueued, .. } => enqueued,
        }
    }
}

/// Discovery tuning for one monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Watermark used when the series has never been tracked.
    pub initial_chapter: ChapterNumber,
    pub poll_interval: Duration,
    pub recheck_window: u32,
}

/// Single writer of a series' discovery watermark.
pub struct ChapterMonitor {
    state: DiscoveryState,
    state_store: Arc<dyn ChapterStateStore>,
    archive: Arc<dyn ChapterArchive>,
    source: Arc<dyn ChapterSource>,
    queue: WorkQueue,
    config: MonitorConfig,
}

impl ChapterMonitor {
    /// Resumes from the persisted watermark, or starts at
    /// `config.initial_chapter` when the series has never been tracked.
    pub async fn load(
        series: SeriesIdentity,
        state_store: Arc<dyn ChapterStateStore>,
        archive: Arc<dyn ChapterArchive>,
        source: Arc<dyn ChapterSource>,
        queue: WorkQueue,
        config: MonitorConfig,
    ) -> anyhow::Result<Self> {
        let state = match state_store
            .load(&series)
            .await
            .context("load discovery state")?
        {
            Some(state) => {
                tracing::info!(
                    series = %series.name,
                    watermark = state.last_known_chapter,
                    "resuming discovery"
                );
                DiscoveryState {
                    series,
                    ..state
                }
            }
            None => {
                tracing::info!(
                    series = %series.name,
                    watermark = config.initial_chapter,
                    "starting discovery from initial chapter"
                );
                DiscoveryState::new(series, config.initial_chapter)
            }
        };
        Ok(Self {
            state,
            state_store,
            archive,
            source,
            queue,
            config,
        })
    }

    pub fn watermark(&self) -> ChapterNumber {
        self.state.last_known_chapter
    }

    pub fn series(&self) -> &SeriesIdentity {
        &self.state.series
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.run_cycle() => result,
            };
            match result {
                Ok(report) => tracing::debug!(?report, "discovery cycle finished"),
                Err(err) => tracing::error!(
                    series = %self.state.series.name,
                    watermark = self.state.last_known_chapter,
                    ?err,
                    "discovery cycle failed"
                ),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        tracing::info!(series = %self.state.series.name, "discovery stopped");
    }

    pub async fn run_cycle(&mut self) -> anyhow::Result<CycleReport> {
        let series = self.state.series.clone();
        let watermark = self.state.last_known_chapter;

        let newest = match self.source.newest_chapter(&series).await {
            Ok(newest) => newest,
            Err(err) => {
                tracing::warn!(series = %series.name, watermark, ?err, "newest chapter unavailable");
                return Ok(CycleReport::SourceUnavailable);
            }
        };

        if newest > watermark {
            let enqueued = self
                .enqueue_missing(watermark + 1..=newest)
                .await
                .context("enqueue new chapters")?;

            let next = self.state.advanced_to(newest);
            self.state_store
                .save(&next)
                .await
                .context("persist discovery watermark")?;
            self.state = next;

            tracing::info!(
                series = %series.name,
                from = watermark,
                to = newest,
                enqueued = enqueued.len(),
                "discovered new chapters"
            );
            return Ok(CycleReport::Advanced {
                from: watermark,
                to: newest,
                enqueued,
            });
        }

        if newest < watermark {
            tracing::warn!(
                series = %series.name,
                newest,
                watermark,
                "upstream newest chapter is below the watermark; treating as no new chapters"
            );
        }

        let enqueued = self
            .enqueue_missing(recheck_range(watermark, self.config.recheck_window))
            .await
            .context("recheck recent chapters")?;
        if enqueued.is_empty() {
            tracing::info!(series = %series.name, newest, watermark, "no new chapters");
        } else {
            tracing::info!(
                series = %series.name,
                watermark,
                chapters = ?enqueued,
                "re-enqueued missing chapters"
            );
        }
        Ok(CycleReport::Rechecked { newest, enqueued })
    }

    /// Pushes every chapter in `range` the archive does not hold, in
    /// ascending order. Stops at the first failure.
    async fn enqueue_missing(
        &self,
        range: RangeInclusive<ChapterNumber>,
    ) -> anyhow::Result<Vec<ChapterNumber>> {
        let series = &self.state.series;
        let mut enqueued = Vec::new();
        for chapter in range {
            let present = self
                .archive
                .exists(series, chapter)
                .await
                .with_context(|| format!("check archive for chapter {chapter}"))?;
            if present {
                tracing::debug!(series = %series.name, chapter, "already captured");
                continue;
            }
            self.queue.push(WorkItem::new(series, chapter))?;
            enqueued.push(chapter);
        }
        Ok(enqueued)
    }
}

/// The last `window` chapters up to and including the watermark.
pub fn recheck_range(watermark: ChapterNumber, window: u32) -> RangeInclusive<ChapterNumber> {
    if watermark == 0 || window == 0 {
        return RangeInclusive::new(1, 0);
    }
    let start = watermark.saturating_sub(window - 1).max(1);
    start..=watermark
}
