use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;

use crate::fs_util::write_bytes_atomic;
use crate::model::{DiscoveryState, SeriesIdentity};

#[async_trait]
pub trait ChapterStateStore: Send + Sync {
    async fn load(&self, series: &SeriesIdentity) -> anyhow::Result<Option<DiscoveryState>>;

    /// Persists `state` and confirms it reads back identically.
    ///
    /// Refuses to move the watermark below the persisted one.
    async fn save(&self, state: &DiscoveryState) -> anyhow::Result<()>;

    /// Operator override: persists `state` even if it lowers the watermark.
    async fn reset(&self, state: &DiscoveryState) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct LocalFsStateStore {
    base_dir: PathBuf,
}

impl LocalFsStateStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn state_dir(&self) -> PathBuf {
        self.base_dir.join("state")
    }

    pub fn state_path(&self, series: &SeriesIdentity) -> PathBuf {
        self.state_dir().join(format!("{}.json", series.slug()))
    }

    async fn write_confirmed(&self, state: &DiscoveryState) -> anyhow::Result<()> {
        let path = self.state_path(&state.series);
        write_json_atomic(&path, state)
            .await
            .with_context(|| format!("write state: {}", path.display()))?;

        let persisted: Option<DiscoveryState> = read_json(&path)
            .await
            .with_context(|| format!("read back state: {}", path.display()))?;
        match persisted {
            Some(persisted) if &persisted == state => Ok(()),
            Some(persisted) => anyhow::bail!(
                "state read back differs from written state: wrote {}, read {}",
                state.last_known_chapter,
                persisted.last_known_chapter
            ),
            None => anyhow::bail!("state missing after write: {}", path.display()),
        }
    }
}

#[async_trait]
impl ChapterStateStore for LocalFsStateStore {
    async fn load(&self, series: &SeriesIdentity) -> anyhow::Result<Option<DiscoveryState>> {
        let path = self.state_path(series);
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn save(&self, state: &DiscoveryState) -> anyhow::Result<()> {
        if let Some(current) = self.load(&state.series).await? {
            if state.last_known_chapter < current.last_known_chapter {
                anyhow::bail!(
                    "refusing to lower watermark for {:?} from {} to {}",
                    state.series.name,
                    current.last_known_chapter,
                    state.last_known_chapter
                );
            }
        }
        self.write_confirmed(state).await
    }

    async fn reset(&self, state: &DiscoveryState) -> anyhow::Result<()> {
        tracing::warn!(
            series = %state.series.name,
            watermark = state.last_known_chapter,
            "operator reset of discovery watermark"
        );
        self.write_confirmed(state).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> anyhow::Result<()> {
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    write_bytes_atomic(path, &data).await
}
