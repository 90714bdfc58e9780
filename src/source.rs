use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::StatusCode;
use scraper::{Html, Selector};

use crate::model::{ChapterNumber, SeriesIdentity};
use crate::settings::env_string;

#[async_trait]
pub trait ChapterSource: Send + Sync {
    /// Highest chapter number currently listed upstream.
    async fn newest_chapter(&self, series: &SeriesIdentity) -> anyhow::Result<ChapterNumber>;

    /// Raw chapter page. `None` means the chapter is not published (yet).
    async fn fetch_chapter(
        &self,
        series: &SeriesIdentity,
        chapter: ChapterNumber,
    ) -> anyhow::Result<Option<String>>;
}

pub const DEFAULT_LIST_SELECTOR: &str = "div.list-chapter a";
pub const DEFAULT_PATH_MARKER: &str = "chuong-";

#[derive(Debug, Clone)]
pub struct HttpChapterSource {
    client: reqwest::Client,
    list_selector: Selector,
    path_marker: String,
}

impl HttpChapterSource {
    pub fn new(list_selector: &str, path_marker: impl Into<String>) -> anyhow::Result<Self> {
        let list_selector = Selector::parse(list_selector)
            .map_err(|err| anyhow::anyhow!("invalid chapter list selector {list_selector:?}: {err}"))?;
        let path_marker = path_marker.into();
        if path_marker.is_empty() {
            anyhow::bail!("chapter path marker is empty");
        }
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; novelcast)")
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            list_selector,
            path_marker,
        })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let list_selector = env_string("NOVELCAST_CHAPTER_LIST_SELECTOR")
            .unwrap_or_else(|| DEFAULT_LIST_SELECTOR.to_owned());
        let path_marker = env_string("NOVELCAST_CHAPTER_PATH_MARKER")
            .unwrap_or_else(|| DEFAULT_PATH_MARKER.to_owned());
        Self::new(&list_selector, path_marker)
    }

    pub fn chapter_url(&self, series: &SeriesIdentity, chapter: ChapterNumber) -> String {
        format!("{}/{}{chapter}/", series.base_url, self.path_marker)
    }
}

#[async_trait]
impl ChapterSource for HttpChapterSource {
    async fn newest_chapter(&self, series: &SeriesIdentity) -> anyhow::Result<ChapterNumber> {
        let url = &series.base_url;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("chapter listing request failed ({status}): {url}");
        }
        let html = resp.text().await.context("read chapter listing body")?;

        newest_from_listing(&html, &self.list_selector, &self.path_marker)
            .ok_or_else(|| anyhow::anyhow!("no chapter links found on {url}"))
    }

    async fn fetch_chapter(
        &self,
        series: &SeriesIdentity,
        chapter: ChapterNumber,
    ) -> anyhow::Result<Option<String>> {
        let url = self.chapter_url(series, chapter);
        tracing::debug!(%url, chapter, "fetch chapter");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            anyhow::bail!("chapter request failed ({status}): {url}");
        }
        let html = resp.text().await.context("read chapter body")?;
        if html.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(html))
    }
}

pub fn newest_from_listing(html: &str, selector: &Selector, marker: &str) -> Option<ChapterNumber> {
    let doc = Html::parse_document(html);
    doc.select(selector)
        .filter_map(|link| link.value().attr("href"))
        .filter_map(|href| chapter_number_from_href(href, marker))
        .max()
}

/// Reads the digits right after `marker`, e.g. `/truyen/chuong-20/` -> 20.
pub fn chapter_number_from_href(href: &str, marker: &str) -> Option<ChapterNumber> {
    let idx = href.find(marker)?;
    let digits = href[idx + marker.len()..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>();
    digits.parse().ok().filter(|n| *n > 0)
}
