use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;

use crate::model::SeriesIdentity;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Concurrent chapter workers.
    pub workers: usize,
    /// Delay between discovery cycles.
    pub poll_interval: Duration,
    /// Quiet period after which an accumulating batch is closed.
    pub batch_window: Duration,
    /// How many chapters at and below the watermark are re-verified when
    /// nothing new was published.
    pub recheck_window: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: Self::default_workers(),
            poll_interval: Duration::from_secs(Self::default_poll_interval_secs()),
            batch_window: Duration::from_secs(Self::default_batch_window_secs()),
            recheck_window: Self::default_recheck_window(),
        }
    }
}

impl PipelineSettings {
    pub fn default_workers() -> usize {
        5
    }
    pub fn default_poll_interval_secs() -> u64 {
        600
    }
    pub fn default_batch_window_secs() -> u64 {
        60
    }
    pub fn default_recheck_window() -> u32 {
        5
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            anyhow::bail!("--workers must be > 0");
        }
        if self.batch_window.is_zero() {
            anyhow::bail!("--batch-window-secs must be > 0");
        }
        Ok(())
    }
}

/// Where everything for a data directory lives.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    data_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn output_dir(&self, series: &SeriesIdentity) -> PathBuf {
        self.data_dir.join("output").join(series.slug())
    }

    pub fn audio_path(&self, series: &SeriesIdentity, chapter: u32) -> PathBuf {
        self.output_dir(series)
            .join("audio")
            .join(format!("chapter-{chapter}.wav"))
    }

    pub fn images_dir(&self, series: &SeriesIdentity, chapter: u32) -> PathBuf {
        self.output_dir(series)
            .join("images")
            .join(format!("chapter-{chapter}"))
    }

    pub fn video_path(&self, series: &SeriesIdentity, chapter: u32) -> PathBuf {
        self.output_dir(series)
            .join("video")
            .join(format!("chapter-{chapter}.mp4"))
    }

    pub fn merged_path(&self, series: &SeriesIdentity, min: u32, max: u32) -> PathBuf {
        self.output_dir(series)
            .join("merged")
            .join(format!("chapters-{min}-{max}.mp4"))
    }

    pub fn published_dir(&self) -> PathBuf {
        self.data_dir.join("published")
    }
}

pub(crate) fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_string(key)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("invalid {key}={raw:?}"))
        })
        .transpose()
}
