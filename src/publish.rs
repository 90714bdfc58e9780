use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fs_util::{ensure_non_empty_file, tmp_sibling, write_bytes_atomic};
use crate::model::{ChapterNumber, SeriesIdentity};
use crate::settings::env_string;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
}

impl VideoMetadata {
    pub fn for_chapter(series: &SeriesIdentity, chapter: ChapterNumber) -> Self {
        Self {
            title: format!("{} - Chapter {chapter}", series.name),
            description: format!("{}: chapter {chapter}.", series.name),
        }
    }

    pub fn for_range(series: &SeriesIdentity, min: ChapterNumber, max: ChapterNumber) -> Self {
        if min == max {
            return Self {
                title: format!("{} (Chapter {min})", series.name),
                description: format!("{}: chapter {min}.", series.name),
            };
        }
        Self {
            title: format!("{} (Chapters {min}-{max})", series.name),
            description: format!("{}: chapters {min} to {max}.", series.name),
        }
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Hands a finished video off and returns its published identifier.
    async fn publish(&self, video: &Path, metadata: &VideoMetadata) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub source: PathBuf,
    pub published_at: DateTime<Utc>,
}

/// Publishes into an outbox directory: `<id>.mp4` plus a `<id>.json` sidecar
/// that an uploader can pick up.
#[derive(Debug, Clone)]
pub struct DirectoryPublisher {
    dir: PathBuf,
}

impl DirectoryPublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn video_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.mp4"))
    }

    pub fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl Publisher for DirectoryPublisher {
    async fn publish(&self, video: &Path, metadata: &VideoMetadata) -> anyhow::Result<String> {
        ensure_non_empty_file(video).await?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create publish dir: {}", self.dir.display()))?;

        let id = uuid::Uuid::new_v4().simple().to_string();
        let dest = self.video_path(&id);
        let tmp = tmp_sibling(&dest);
        tokio::fs::copy(video, &tmp)
            .await
            .with_context(|| format!("copy {} to {}", video.display(), tmp.display()))?;
        tokio::fs::rename(&tmp, &dest)
            .await
            .with_context(|| format!("rename tmp to final: {}", dest.display()))?;

        let record = PublishedRecord {
            id: id.clone(),
            title: metadata.title.clone(),
            description: metadata.description.clone(),
            source: video.to_path_buf(),
            published_at: Utc::now(),
        };
        let data = serde_json::to_vec_pretty(&record).context("serialize publish record")?;
        write_bytes_atomic(&self.record_path(&id), &data)
            .await
            .context("write publish record")?;

        tracing::info!(id = %id, title = %metadata.title, "published video");
        Ok(id)
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Best effort; delivery problems are logged, never returned.
    async fn notify(&self, success: bool, message: &str);
}

#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, success: bool, message: &str) {
        if success {
            tracing::info!(text = message, "notification");
        } else {
            tracing::error!(text = message, "failure notification");
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    success: bool,
    message: &'a str,
    sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("build webhook http client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn post(&self, success: bool, message: &str) -> anyhow::Result<()> {
        let payload = WebhookPayload {
            success,
            message,
            sent_at: Utc::now(),
        };
        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("POST {}", self.url))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("webhook rejected notification ({status}): {body}");
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, success: bool, message: &str) {
        LogNotifier.notify(success, message).await;
        if let Err(err) = self.post(success, message).await {
            tracing::warn!(?err, "failed to deliver webhook notification");
        }
    }
}

pub fn notifier_from_env() -> anyhow::Result<Arc<dyn Notifier>> {
    match env_string("NOVELCAST_NOTIFY_WEBHOOK") {
        Some(url) => {
            tracing::info!(url = %url, "using webhook notifier");
            Ok(Arc::new(WebhookNotifier::new(url)?))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}
