use std::path::PathBuf;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;

use crate::fs_util::tmp_sibling;
use crate::model::{ChapterNumber, SeriesIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveWrite {
    Stored,
    /// Another writer published a non-empty entry first; ours was dropped.
    AlreadyPresent,
}

#[async_trait]
pub trait ChapterArchive: Send + Sync {
    /// True iff the chapter is captured with non-empty content.
    async fn exists(&self, series: &SeriesIdentity, chapter: ChapterNumber)
    -> anyhow::Result<bool>;

    async fn read(
        &self,
        series: &SeriesIdentity,
        chapter: ChapterNumber,
    ) -> anyhow::Result<Option<String>>;

    async fn write(
        &self,
        series: &SeriesIdentity,
        chapter: ChapterNumber,
        text: &str,
    ) -> anyhow::Result<ArchiveWrite>;
}

#[derive(Debug, Clone)]
pub struct LocalFsChapterArchive {
    base_dir: PathBuf,
}

impl LocalFsChapterArchive {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn series_dir(&self, series: &SeriesIdentity) -> PathBuf {
        self.base_dir.join("archive").join(series.slug())
    }

    pub fn chapter_path(&self, series: &SeriesIdentity, chapter: ChapterNumber) -> PathBuf {
        self.series_dir(series).join(format!("chapter-{chapter}.txt"))
    }
}

#[async_trait]
impl ChapterArchive for LocalFsChapterArchive {
    async fn exists(
        &self,
        series: &SeriesIdentity,
        chapter: ChapterNumber,
    ) -> anyhow::Result<bool> {
        let path = self.chapter_path(series, chapter);
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file() && meta.len() > 0),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("stat: {}", path.display())),
        }
    }

    async fn read(
        &self,
        series: &SeriesIdentity,
        chapter: ChapterNumber,
    ) -> anyhow::Result<Option<String>> {
        let path = self.chapter_path(series, chapter);
        match fs::read_to_string(&path).await {
            Ok(text) if text.is_empty() => Ok(None),
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read: {}", path.display())),
        }
    }

    async fn write(
        &self,
        series: &SeriesIdentity,
        chapter: ChapterNumber,
        text: &str,
    ) -> anyhow::Result<ArchiveWrite> {
        if text.is_empty() {
            anyhow::bail!("refusing to archive empty text for chapter {chapter}");
        }

        let dir = self.series_dir(series);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create archive dir: {}", dir.display()))?;

        let path = self.chapter_path(series, chapter);
        let tmp_path = tmp_sibling(&path);
        fs::write(&tmp_path, text)
            .await
            .with_context(|| format!("write tmp: {}", tmp_path.display()))?;

        // Hard-linking never replaces an existing entry, so exactly one
        // concurrent writer wins and readers never see a partial file.
        let published = publish_no_clobber(&tmp_path, &path).await;
        if let Err(err) = fs::remove_file(&tmp_path).await {
            tracing::warn!(path = %tmp_path.display(), ?err, "failed to remove archive tmp file");
        }
        let outcome = published?;

        if !self.exists(series, chapter).await? {
            anyhow::bail!("archive entry missing after write: {}", path.display());
        }
        Ok(outcome)
    }
}

async fn publish_no_clobber(
    tmp_path: &std::path::Path,
    path: &std::path::Path,
) -> anyhow::Result<ArchiveWrite> {
    for _ in 0..2 {
        match fs::hard_link(tmp_path, path).await {
            Ok(()) => return Ok(ArchiveWrite::Stored),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let len = fs::metadata(path)
                    .await
                    .with_context(|| format!("stat: {}", path.display()))?
                    .len();
                if len > 0 {
                    return Ok(ArchiveWrite::AlreadyPresent);
                }
                // An empty entry counts as never captured; replace it.
                tracing::warn!(path = %path.display(), "replacing empty archive entry");
                match fs::remove_file(path).await {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => {
                        return Err(err)
                            .with_context(|| format!("remove empty entry: {}", path.display()));
                    }
                }
            }
            Err(err) => {
                return Err(err).with_context(|| format!("publish: {}", path.display()));
            }
        }
    }
    anyhow::bail!("archive entry kept changing under us: {}", path.display())
}
