use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::app::archive::{ChapterArchive, LocalFsChapterArchive};
use crate::app::coordinator::{AggregationStage, BatchCoordinator};
use crate::app::monitor::{ChapterMonitor, MonitorConfig};
use crate::app::pipeline::{ConversionPipeline, MediaStages, TextStages};
use crate::app::queue::work_queue;
use crate::app::state_store::{ChapterStateStore, LocalFsStateStore};
use crate::app::worker::ChapterWorkerPool;
use crate::cli::{RunArgs, StateSetArgs, StateShowArgs, WatchArgs};
use crate::imagery::PlaceholderImageSupplier;
use crate::model::{BatchOutcome, ChapterNumber, ChapterResult, DiscoveryState, SeriesIdentity, WorkItem};
use crate::narration::{HttpNarrator, TtsConfig};
use crate::publish::{DirectoryPublisher, Notifier, Publisher, notifier_from_env};
use crate::settings::{PipelineSettings, StorageLayout};
use crate::source::HttpChapterSource;
use crate::text::{AdFilterCleaner, SelectorExtractor};
use crate::video::{Ffmpeg, FfmpegConfig, VideoMerger};

/// Everything outside the core the service talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub text: TextStages,
    pub media: MediaStages,
    pub merger: Arc<dyn VideoMerger>,
    pub publisher: Arc<dyn Publisher>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// Production wiring: HTTP source, HTTP TTS, placeholder imagery, ffmpeg,
    /// directory outbox.
    pub fn from_env(layout: &StorageLayout) -> anyhow::Result<Self> {
        let ffmpeg = Arc::new(Ffmpeg::new(FfmpegConfig::from_env()));
        Ok(Self {
            text: TextStages {
                source: Arc::new(HttpChapterSource::from_env().context("chapter source")?),
                extractor: Arc::new(SelectorExtractor::from_env().context("text extractor")?),
                cleaner: Arc::new(AdFilterCleaner::new().context("text cleaner")?),
            },
            media: MediaStages {
                narrator: Arc::new(
                    HttpNarrator::new(TtsConfig::from_env().context("tts config")?)
                        .context("narrator")?,
                ),
                images: Arc::new(PlaceholderImageSupplier::from_env().context("image supplier")?),
                composer: ffmpeg.clone(),
            },
            merger: ffmpeg,
            publisher: Arc::new(DirectoryPublisher::new(layout.published_dir())),
            notifier: notifier_from_env().context("notifier")?,
        })
    }
}

pub struct NovelService {
    series: SeriesIdentity,
    settings: PipelineSettings,
    layout: StorageLayout,
    state_store: Arc<dyn ChapterStateStore>,
    archive: Arc<dyn ChapterArchive>,
    collaborators: Collaborators,
}

impl NovelService {
    pub fn new(
        series: SeriesIdentity,
        settings: PipelineSettings,
        layout: StorageLayout,
        collaborators: Collaborators,
    ) -> Self {
        let state_store = Arc::new(LocalFsStateStore::new(layout.data_dir()));
        let archive = Arc::new(LocalFsChapterArchive::new(layout.data_dir()));
        Self {
            series,
            settings,
            layout,
            state_store,
            archive,
            collaborators,
        }
    }

    /// Swaps the local filesystem stores for other implementations.
    pub fn with_stores(
        mut self,
        state_store: Arc<dyn ChapterStateStore>,
        archive: Arc<dyn ChapterArchive>,
    ) -> Self {
        self.state_store = state_store;
        self.archive = archive;
        self
    }

    pub fn state_store(&self) -> Arc<dyn ChapterStateStore> {
        Arc::clone(&self.state_store)
    }

    pub fn archive(&self) -> Arc<dyn ChapterArchive> {
        Arc::clone(&self.archive)
    }

    fn pipeline(&self) -> Arc<ConversionPipeline> {
        Arc::new(ConversionPipeline::new(
            Arc::clone(&self.archive),
            self.collaborators.text.clone(),
            self.collaborators.media.clone(),
            self.layout.clone(),
        ))
    }

    fn coordinator(&self, results: mpsc::UnboundedReceiver<ChapterResult>) -> BatchCoordinator {
        BatchCoordinator::new(
            self.series.clone(),
            results,
            self.settings.batch_window,
            AggregationStage::new(
                Arc::clone(&self.collaborators.merger),
                Arc::clone(&self.collaborators.publisher),
                self.layout.clone(),
            ),
            Arc::clone(&self.collaborators.notifier),
        )
    }

    /// Runs discovery, the worker pool and the coordinator until `cancel`.
    pub async fn watch(
        &self,
        initial_chapter: ChapterNumber,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        self.settings.validate()?;
        let (queue, receiver) = work_queue();
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let monitor = ChapterMonitor::load(
            self.series.clone(),
            Arc::clone(&self.state_store),
            Arc::clone(&self.archive),
            Arc::clone(&self.collaborators.text.source),
            queue,
            MonitorConfig {
                initial_chapter,
                poll_interval: self.settings.poll_interval,
                recheck_window: self.settings.recheck_window,
            },
        )
        .await?;

        tracing::info!(
            series = %self.series.name,
            workers = self.settings.workers,
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            "watching series"
        );
        let pool = ChapterWorkerPool::spawn(
            self.settings.workers,
            receiver,
            self.pipeline(),
            results_tx,
            cancel.clone(),
        );
        let monitor = tokio::spawn(monitor.run(cancel.clone()));
        let coordinator = tokio::spawn(self.coordinator(results_rx).run(cancel.clone()));

        monitor.await.context("join chapter monitor")?;
        pool.join().await;
        coordinator.await.context("join batch coordinator")?;
        Ok(())
    }

    /// Converts `[start, end]` once; `end` defaults to the upstream newest.
    ///
    /// The watermark is not touched. Chapters already archived are skipped.
    pub async fn run_range(
        &self,
        start: ChapterNumber,
        end: Option<ChapterNumber>,
        cancel: CancellationToken,
    ) -> anyhow::Result<Vec<BatchOutcome>> {
        self.settings.validate()?;
        if start == 0 {
            anyhow::bail!("--start must be >= 1");
        }
        let end = match end {
            Some(end) => end,
            None => self
                .collaborators
                .text
                .source
                .newest_chapter(&self.series)
                .await
                .context("resolve newest chapter")?,
        };
        if start > end {
            anyhow::bail!("--start ({start}) must not exceed --end ({end})");
        }

        let (queue, receiver) = work_queue();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let pool = ChapterWorkerPool::spawn(
            self.settings.workers,
            receiver,
            self.pipeline(),
            results_tx,
            cancel.clone(),
        );

        let mut enqueued = 0usize;
        for chapter in start..=end {
            if self
                .archive
                .exists(&self.series, chapter)
                .await
                .with_context(|| format!("check archive for chapter {chapter}"))?
            {
                tracing::debug!(chapter, "already captured");
                continue;
            }
            queue.push(WorkItem::new(&self.series, chapter))?;
            enqueued += 1;
        }
        queue.close();
        tracing::info!(series = %self.series.name, start, end, enqueued, "chapter range queued");

        // The range is one batch; it closes when the workers are done.
        let mut coordinator = self.coordinator(results_rx);
        let batches = async {
            match coordinator.collect_until_closed(&cancel).await {
                Some(batch) => vec![coordinator.finalize(batch).await],
                None => Vec::new(),
            }
        };
        let (outcomes, ()) = tokio::join!(batches, pool.join());
        Ok(outcomes)
    }
}

pub async fn watch(args: WatchArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let series = args.series.identity()?;
    let settings = args.pipeline.settings()?;
    let layout = StorageLayout::new(&args.storage.data_dir);
    let collaborators = Collaborators::from_env(&layout)?;
    NovelService::new(series, settings, layout, collaborators)
        .watch(args.initial_chapter, cancel)
        .await
}

pub async fn run(args: RunArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let series = args.series.identity()?;
    let settings = args.pipeline.settings()?;
    let layout = StorageLayout::new(&args.storage.data_dir);
    let collaborators = Collaborators::from_env(&layout)?;
    let outcomes = NovelService::new(series, settings, layout, collaborators)
        .run_range(args.start, args.end, cancel)
        .await?;

    for outcome in &outcomes {
        match outcome {
            BatchOutcome::Published {
                min_chapter,
                max_chapter,
                published_id,
            } => println!("published chapters {min_chapter}-{max_chapter}: {published_id}"),
            BatchOutcome::Skipped { results } => {
                println!("skipped batch with {results} converted chapter(s)")
            }
            BatchOutcome::Failed { message } => println!("failed: {message}"),
        }
    }
    if outcomes
        .iter()
        .any(|outcome| matches!(outcome, BatchOutcome::Failed { .. }))
    {
        anyhow::bail!("one or more batches failed to publish");
    }
    Ok(())
}

pub async fn show_state(args: StateShowArgs) -> anyhow::Result<()> {
    let series = args.series.identity()?;
    let store = LocalFsStateStore::new(&args.storage.data_dir);
    match store.load(&series).await? {
        Some(state) => {
            let json = serde_json::to_string_pretty(&state).context("serialize state")?;
            println!("{json}");
        }
        None => println!("no discovery state for {:?}", series.name),
    }
    Ok(())
}

pub async fn set_state(args: StateSetArgs) -> anyhow::Result<()> {
    let series = args.series.identity()?;
    let store = LocalFsStateStore::new(&args.storage.data_dir);
    let previous = store.load(&series).await?.map(|state| state.last_known_chapter);
    store
        .reset(&DiscoveryState::new(series.clone(), args.chapter))
        .await
        .context("write state")?;
    match previous {
        Some(previous) => println!("{}: watermark {previous} -> {}", series.name, args.chapter),
        None => println!("{}: watermark set to {}", series.name, args.chapter),
    }
    Ok(())
}
