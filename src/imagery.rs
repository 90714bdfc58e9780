use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;

use crate::settings::{env_parse, env_string};

#[async_trait]
pub trait ImageSupplier: Send + Sync {
    /// One illustration per prompt (possibly capped), written under `out_dir`.
    async fn supply(&self, prompts: &[String], out_dir: &Path) -> anyhow::Result<Vec<PathBuf>>;
}

/// Stands in for an image generator by copying one still per prompt.
#[derive(Debug, Clone)]
pub struct PlaceholderImageSupplier {
    placeholder: PathBuf,
    max_images: usize,
}

impl PlaceholderImageSupplier {
    pub fn new(placeholder: impl Into<PathBuf>, max_images: usize) -> Self {
        Self {
            placeholder: placeholder.into(),
            max_images: max_images.max(1),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let placeholder = env_string("NOVELCAST_PLACEHOLDER_IMAGE").ok_or_else(|| {
            anyhow::anyhow!("NOVELCAST_PLACEHOLDER_IMAGE is required for chapter imagery")
        })?;
        let max_images = env_parse::<usize>("NOVELCAST_MAX_IMAGES")?.unwrap_or(12);
        Ok(Self::new(placeholder, max_images))
    }
}

#[async_trait]
impl ImageSupplier for PlaceholderImageSupplier {
    async fn supply(&self, prompts: &[String], out_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        fs::create_dir_all(out_dir)
            .await
            .with_context(|| format!("create images dir: {}", out_dir.display()))?;

        let ext = self
            .placeholder
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("jpg");
        let count = prompts.len().min(self.max_images).max(1);

        let mut paths = Vec::with_capacity(count);
        for idx in 0..count {
            let path = out_dir.join(format!("img-{idx:03}.{ext}"));
            fs::copy(&self.placeholder, &path).await.with_context(|| {
                format!(
                    "copy placeholder {} to {}",
                    self.placeholder.display(),
                    path.display()
                )
            })?;
            paths.push(path);
        }
        Ok(paths)
    }
}
