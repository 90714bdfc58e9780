use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tokio::fs;

/// Writes through a uniquely named sibling and renames it into place.
pub(crate) async fn write_bytes_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = tmp_sibling(path);
    fs::write(&tmp_path, data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

pub(crate) fn tmp_sibling(path: &Path) -> PathBuf {
    path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()))
}

pub(crate) async fn ensure_non_empty_file(path: &Path) -> anyhow::Result<()> {
    let meta = fs::metadata(path)
        .await
        .with_context(|| format!("expected output missing: {}", path.display()))?;
    if !meta.is_file() || meta.len() == 0 {
        anyhow::bail!("expected output is empty: {}", path.display());
    }
    Ok(())
}
