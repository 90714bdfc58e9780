use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::process::Command;

use crate::fs_util::{ensure_non_empty_file, tmp_sibling};
use crate::settings::env_string;
use crate::subtitle;

#[derive(Debug, Clone)]
pub struct ComposeRequest<'a> {
    pub sentences: &'a [String],
    pub audio: &'a Path,
    pub images: &'a [PathBuf],
    pub title: &'a str,
    pub description: &'a str,
    pub out: &'a Path,
}

#[async_trait]
pub trait VideoComposer: Send + Sync {
    async fn compose(&self, request: ComposeRequest<'_>) -> anyhow::Result<PathBuf>;
}

#[async_trait]
pub trait VideoMerger: Send + Sync {
    /// Concatenates `videos` in the given order into `out`.
    async fn merge(&self, videos: &[PathBuf], out: &Path) -> anyhow::Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
}

impl FfmpegConfig {
    pub fn from_env() -> Self {
        Self {
            ffmpeg_bin: env_string("NOVELCAST_FFMPEG_BIN").unwrap_or_else(|| "ffmpeg".to_owned()),
            ffprobe_bin: env_string("NOVELCAST_FFPROBE_BIN")
                .unwrap_or_else(|| "ffprobe".to_owned()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    config: FfmpegConfig,
}

impl Ffmpeg {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    pub async fn probe_duration(&self, media: &Path) -> anyhow::Result<f64> {
        let output = Command::new(&self.config.ffprobe_bin)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(media)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("spawn ffprobe: {}", self.config.ffprobe_bin))?;
        if !output.status.success() {
            anyhow::bail!(
                "ffprobe failed ({}) for {}: {}",
                output.status,
                media.display(),
                stderr_tail(&output.stderr)
            );
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let secs = stdout
            .trim()
            .parse::<f64>()
            .with_context(|| format!("parse ffprobe duration {:?}", stdout.trim()))?;
        if !secs.is_finite() || secs <= 0.0 {
            anyhow::bail!("ffprobe reported no duration for {}", media.display());
        }
        Ok(secs)
    }

    async fn run(&self, args: &[String], cwd: Option<&Path>) -> anyhow::Result<()> {
        tracing::debug!(bin = %self.config.ffmpeg_bin, ?args, "ffmpeg");
        let mut cmd = Command::new(&self.config.ffmpeg_bin);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        let output = cmd
            .output()
            .await
            .with_context(|| format!("spawn ffmpeg: {}", self.config.ffmpeg_bin))?;
        if !output.status.success() {
            anyhow::bail!(
                "ffmpeg failed ({}): {}",
                output.status,
                stderr_tail(&output.stderr)
            );
        }
        Ok(())
    }
}

#[async_trait]
impl VideoComposer for Ffmpeg {
    async fn compose(&self, request: ComposeRequest<'_>) -> anyhow::Result<PathBuf> {
        if request.images.is_empty() {
            anyhow::bail!("no images to compose {}", request.out.display());
        }
        let out_dir = request
            .out
            .parent()
            .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", request.out.display()))?;
        tokio::fs::create_dir_all(out_dir)
            .await
            .with_context(|| format!("create video dir: {}", out_dir.display()))?;

        let duration = self
            .probe_duration(request.audio)
            .await
            .context("probe narration duration")?;

        let ass_path = request.out.with_extension("ass");
        let lines = subtitle::timed_lines(request.sentences, duration);
        tokio::fs::write(&ass_path, subtitle::render_ass(&lines))
            .await
            .with_context(|| format!("write subtitles: {}", ass_path.display()))?;

        let images = absolute_all(request.images)?;
        let list = tempfile::Builder::new()
            .suffix(".txt")
            .tempfile_in(out_dir)
            .context("create slideshow list")?;
        let per_image = duration / images.len() as f64;
        tokio::fs::write(list.path(), concat_list(&images, Some(per_image)))
            .await
            .context("write slideshow list")?;

        let ass_name = ass_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("bad subtitle path: {}", ass_path.display()))?;
        let audio = std::path::absolute(request.audio).context("resolve audio path")?;
        let tmp_out = std::path::absolute(tmp_sibling(request.out)).context("resolve output")?;
        let list_path = std::path::absolute(list.path()).context("resolve slideshow list")?;
        let args = compose_args(
            &list_path,
            &audio,
            ass_name,
            request.title,
            request.description,
            &tmp_out,
        );

        tracing::info!(out = %request.out.display(), images = images.len(), duration, "compose chapter video");
        let result = self.run(&args, Some(out_dir)).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp_out).await;
        }
        result?;

        tokio::fs::rename(&tmp_out, request.out)
            .await
            .with_context(|| format!("rename video into place: {}", request.out.display()))?;
        ensure_non_empty_file(request.out).await?;
        Ok(request.out.to_path_buf())
    }
}

#[async_trait]
impl VideoMerger for Ffmpeg {
    async fn merge(&self, videos: &[PathBuf], out: &Path) -> anyhow::Result<PathBuf> {
        if videos.is_empty() {
            anyhow::bail!("nothing to merge into {}", out.display());
        }
        for video in videos {
            ensure_non_empty_file(video).await?;
        }
        let out_dir = out
            .parent()
            .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", out.display()))?;
        tokio::fs::create_dir_all(out_dir)
            .await
            .with_context(|| format!("create merge dir: {}", out_dir.display()))?;

        let videos = absolute_all(videos)?;
        let list = tempfile::Builder::new()
            .suffix(".txt")
            .tempfile_in(out_dir)
            .context("create concat list")?;
        tokio::fs::write(list.path(), concat_list(&videos, None))
            .await
            .context("write concat list")?;

        let tmp_out = tmp_sibling(out);
        let args = merge_args(list.path(), &tmp_out);
        tracing::info!(out = %out.display(), videos = videos.len(), "merge chapter videos");
        let result = self.run(&args, None).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp_out).await;
        }
        result?;

        tokio::fs::rename(&tmp_out, out)
            .await
            .with_context(|| format!("rename merged video into place: {}", out.display()))?;
        ensure_non_empty_file(out).await?;
        Ok(out.to_path_buf())
    }
}

/// ffmpeg concat-demuxer list. With `per_item`, every entry is shown for that
/// many seconds (the last entry is repeated so its duration is honored).
pub fn concat_list(paths: &[PathBuf], per_item: Option<f64>) -> String {
    let mut out = String::new();
    for path in paths {
        out.push_str(&format!("file '{}'\n", escape_concat_path(path)));
        if let Some(secs) = per_item {
            out.push_str(&format!("duration {secs:.3}\n"));
        }
    }
    if per_item.is_some()
        && let Some(last) = paths.last()
    {
        out.push_str(&format!("file '{}'\n", escape_concat_path(last)));
    }
    out
}

fn escape_concat_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace('\'', r"'\''")
}

pub fn compose_args(
    slideshow_list: &Path,
    audio: &Path,
    subtitles_file: &str,
    title: &str,
    description: &str,
    out: &Path,
) -> Vec<String> {
    let filters = format!(
        "scale=1920:1080:force_original_aspect_ratio=decrease,\
         pad=1920:1080:(ow-iw)/2:(oh-ih)/2,\
         subtitles={subtitles_file},format=yuv420p"
    );
    let mut args = ["-y", "-f", "concat", "-safe", "0", "-i"]
        .into_iter()
        .map(str::to_owned)
        .collect::<Vec<_>>();
    args.push(slideshow_list.to_string_lossy().to_string());
    args.push("-i".to_owned());
    args.push(audio.to_string_lossy().to_string());
    args.push("-vf".to_owned());
    args.push(filters);
    args.extend(
        ["-r", "25", "-c:v", "libx264", "-c:a", "aac", "-shortest"]
            .into_iter()
            .map(str::to_owned),
    );
    args.push("-metadata".to_owned());
    args.push(format!("title={title}"));
    args.push("-metadata".to_owned());
    args.push(format!("comment={description}"));
    args.extend(["-f", "mp4"].into_iter().map(str::to_owned));
    args.push(out.to_string_lossy().to_string());
    args
}

pub fn merge_args(concat_list: &Path, out: &Path) -> Vec<String> {
    let mut args = ["-y", "-f", "concat", "-safe", "0", "-i"]
        .into_iter()
        .map(str::to_owned)
        .collect::<Vec<_>>();
    args.push(concat_list.to_string_lossy().to_string());
    args.extend(["-c", "copy", "-f", "mp4"].into_iter().map(str::to_owned));
    args.push(out.to_string_lossy().to_string());
    args
}

fn absolute_all(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    paths
        .iter()
        .map(|p| std::path::absolute(p).with_context(|| format!("resolve: {}", p.display())))
        .collect()
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines = text.lines().collect::<Vec<_>>();
    let start = lines.len().saturating_sub(10);
    lines[start..].join("\n")
}
