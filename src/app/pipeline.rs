use std::sync::Arc;

use anyhow::Context as _;

use crate::app::archive::{ArchiveWrite, ChapterArchive};
use crate::imagery::ImageSupplier;
use crate::model::{
    ChapterOutcome, ChapterResult, ConvertedChapter, DiscardReason, SeriesIdentity, WorkItem,
};
use crate::narration::Narrator;
use crate::publish::VideoMetadata;
use crate::settings::StorageLayout;
use crate::source::ChapterSource;
use crate::text::{TextCleaner, TextExtractor, split_sentences};
use crate::video::{ComposeRequest, VideoComposer};

/// Capture stages: fetch, extract, clean.
#[derive(Clone)]
pub struct TextStages {
    pub source: Arc<dyn ChapterSource>,
    pub extractor: Arc<dyn TextExtractor>,
    pub cleaner: Arc<dyn TextCleaner>,
}

/// Conversion stages run after a chapter is archived.
#[derive(Clone)]
pub struct MediaStages {
    pub narrator: Arc<dyn Narrator>,
    pub images: Arc<dyn ImageSupplier>,
    pub composer: Arc<dyn VideoComposer>,
}

pub struct ConversionPipeline {
    archive: Arc<dyn ChapterArchive>,
    text: TextStages,
    media: MediaStages,
    layout: StorageLayout,
}

impl ConversionPipeline {
    pub fn new(
        archive: Arc<dyn ChapterArchive>,
        text: TextStages,
        media: MediaStages,
        layout: StorageLayout,
    ) -> Self {
        Self {
            archive,
            text,
            media,
            layout,
        }
    }

    /// Runs one work item to completion.
    ///
    /// Expected negative signals come back as [`ChapterOutcome::Discarded`];
    /// `Err` is reserved for archive I/O problems. Once the text is archived
    /// the item always completes, with a failure marker if a media stage
    /// fails.
    pub async fn process(&self, item: &WorkItem) -> anyhow::Result<ChapterOutcome> {
        let series = &item.series;
        let chapter = item.chapter;

        if self
            .archive
            .exists(series, chapter)
            .await
            .context("check archive")?
        {
            tracing::debug!(series = %series.name, chapter, "already captured; skipping");
            return Ok(ChapterOutcome::Discarded(DiscardReason::AlreadyCaptured));
        }

        let raw = match self.text.source.fetch_chapter(series, chapter).await {
            Ok(Some(raw)) if !raw.trim().is_empty() => raw,
            Ok(_) => {
                tracing::debug!(series = %series.name, chapter, "chapter not available yet");
                return Ok(ChapterOutcome::Discarded(DiscardReason::NotYetAvailable));
            }
            Err(err) => {
                tracing::warn!(series = %series.name, chapter, ?err, "chapter fetch failed");
                return Ok(ChapterOutcome::Discarded(DiscardReason::NotYetAvailable));
            }
        };

        let extracted = self.text.extractor.extract(&raw);
        if extracted.trim().is_empty() {
            tracing::debug!(series = %series.name, chapter, "no chapter text in page");
            return Ok(ChapterOutcome::Discarded(DiscardReason::EmptyExtraction));
        }

        let cleaned = self.text.cleaner.clean(&extracted);
        if cleaned.trim().is_empty() {
            tracing::warn!(
                series = %series.name,
                chapter,
                extracted_chars = extracted.chars().count(),
                "chapter text empty after cleaning"
            );
            return Ok(ChapterOutcome::Discarded(DiscardReason::DataQuality));
        }

        match self
            .archive
            .write(series, chapter, &cleaned)
            .await
            .context("archive chapter text")?
        {
            ArchiveWrite::Stored => {
                tracing::info!(series = %series.name, chapter, "chapter captured");
            }
            ArchiveWrite::AlreadyPresent => {
                tracing::debug!(series = %series.name, chapter, "another worker captured chapter first");
                return Ok(ChapterOutcome::Discarded(DiscardReason::LostWriteRace));
            }
        }

        let result = match self.convert(series, chapter, cleaned).await {
            Ok(converted) => ChapterResult::Converted(converted),
            Err(err) => {
                tracing::error!(series = %series.name, chapter, ?err, "chapter conversion failed");
                // Discovery treats archived text as done and never requeues it.
                tracing::warn!(
                    series = %series.name,
                    chapter,
                    "chapter stranded without a video; delete its archived text and `run` the chapter again"
                );
                ChapterResult::Failed {
                    chapter,
                    reason: format!("{err:#}"),
                }
            }
        };
        Ok(ChapterOutcome::Completed(result))
    }

    async fn convert(
        &self,
        series: &SeriesIdentity,
        chapter: u32,
        cleaned_text: String,
    ) -> anyhow::Result<ConvertedChapter> {
        let mut sentences = split_sentences(&cleaned_text);
        if sentences.is_empty() {
            sentences.push(cleaned_text.clone());
        }

        let audio_path = self
            .media
            .narrator
            .synthesize(
                series,
                chapter,
                &cleaned_text,
                &self.layout.audio_path(series, chapter),
            )
            .await
            .context("narration")?;

        let image_paths = self
            .media
            .images
            .supply(&sentences, &self.layout.images_dir(series, chapter))
            .await
            .context("imagery")?;
        if image_paths.is_empty() {
            anyhow::bail!("imagery produced no images for chapter {chapter}");
        }

        let metadata = VideoMetadata::for_chapter(series, chapter);
        let video_path = self
            .media
            .composer
            .compose(ComposeRequest {
                sentences: &sentences,
                audio: &audio_path,
                images: &image_paths,
                title: &metadata.title,
                description: &metadata.description,
                out: &self.layout.video_path(series, chapter),
            })
            .await
            .context("compose chapter video")?;

        tracing::info!(series = %series.name, chapter, video = %video_path.display(), "chapter converted");
        Ok(ConvertedChapter {
            chapter,
            cleaned_text,
            audio_path,
            image_paths,
            video_path,
        })
    }
}
