use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;

use crate::fs_util::write_bytes_atomic;
use crate::model::{ChapterNumber, SeriesIdentity};
use crate::settings::{env_parse, env_string};

#[async_trait]
pub trait Narrator: Send + Sync {
    /// Synthesizes `text` into an audio file at `out` and returns its path.
    async fn synthesize(
        &self,
        series: &SeriesIdentity,
        chapter: ChapterNumber,
        text: &str,
        out: &Path,
    ) -> anyhow::Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub endpoint: String,
    pub voice: String,
    pub speed: u32,
}

impl TtsConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let endpoint = env_string("NOVELCAST_TTS_URL")
            .ok_or_else(|| anyhow::anyhow!("NOVELCAST_TTS_URL is required for narration"))?;
        let voice = env_string("NOVELCAST_TTS_VOICE").unwrap_or_else(|| "vi+f3".to_owned());
        let speed = env_parse::<u32>("NOVELCAST_TTS_SPEED")?.unwrap_or(150);
        Ok(Self {
            endpoint,
            voice,
            speed,
        })
    }
}

/// Posts the text as a form to an HTTP text-to-speech service and stores the
/// returned audio bytes.
#[derive(Debug, Clone)]
pub struct HttpNarrator {
    client: reqwest::Client,
    config: TtsConfig,
}

impl HttpNarrator {
    pub fn new(config: TtsConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("build tts http client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Narrator for HttpNarrator {
    async fn synthesize(
        &self,
        series: &SeriesIdentity,
        chapter: ChapterNumber,
        text: &str,
        out: &Path,
    ) -> anyhow::Result<PathBuf> {
        if text.trim().is_empty() {
            anyhow::bail!("narration text is empty");
        }
        tracing::info!(
            series = %series.name,
            chapter,
            chars = text.chars().count(),
            voice = %self.config.voice,
            "synthesize narration"
        );

        let speed = self.config.speed.to_string();
        let resp = self
            .client
            .post(&self.config.endpoint)
            .form(&[
                ("text", text),
                ("voice", self.config.voice.as_str()),
                ("speed", speed.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("POST {}", self.config.endpoint))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("tts request failed ({status}): {body}");
        }
        let audio = resp.bytes().await.context("read tts audio")?;
        if audio.is_empty() {
            anyhow::bail!("tts returned no audio for chapter {chapter}");
        }

        write_bytes_atomic(out, &audio)
            .await
            .with_context(|| format!("write audio: {}", out.display()))?;
        Ok(out.to_path_buf())
    }
}
