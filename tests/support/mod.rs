#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use novelcast::app::pipeline::{MediaStages, TextStages};
use novelcast::app::service::Collaborators;
use novelcast::imagery::ImageSupplier;
use novelcast::model::{ChapterNumber, SeriesIdentity};
use novelcast::narration::Narrator;
use novelcast::publish::{Notifier, Publisher, VideoMetadata};
use novelcast::source::ChapterSource;
use novelcast::text::{AdFilterCleaner, SelectorExtractor};
use novelcast::video::{ComposeRequest, VideoComposer, VideoMerger};

pub fn series() -> SeriesIdentity {
    SeriesIdentity::new("Thay Phong Thuy", "http://novel.test/thay-phong-thuy")
}

pub fn chapter_page(chapter: ChapterNumber) -> String {
    format!(
        r#"<html><body>
<div class="chapter-c">
  <p>Chapter {chapter} opens at dawn. The old geomancer walks north.</p>
  <p>Đọc truyện tại truyen.example</p>
  <p>He stops at the river!</p>
</div>
</body></html>"#
    )
}

/// In-memory upstream site.
#[derive(Default)]
pub struct FakeSource {
    newest: Mutex<Option<ChapterNumber>>,
    pages: Mutex<HashMap<ChapterNumber, String>>,
    fetch_delay: Mutex<Duration>,
    pub newest_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
}

impl FakeSource {
    /// Publishes chapters `1..=newest` and lists `newest` as the newest.
    pub fn with_chapters(newest: ChapterNumber) -> Self {
        let source = Self::default();
        for chapter in 1..=newest {
            source.put_page(chapter, chapter_page(chapter));
        }
        source.set_newest(Some(newest));
        source
    }

    /// `None` makes the newest-chapter lookup fail.
    pub fn set_newest(&self, newest: Option<ChapterNumber>) {
        *self.newest.lock().unwrap() = newest;
    }

    pub fn put_page(&self, chapter: ChapterNumber, html: String) {
        self.pages.lock().unwrap().insert(chapter, html);
    }

    pub fn remove_page(&self, chapter: ChapterNumber) {
        self.pages.lock().unwrap().remove(&chapter);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChapterSource for FakeSource {
    async fn newest_chapter(&self, _series: &SeriesIdentity) -> anyhow::Result<ChapterNumber> {
        self.newest_calls.fetch_add(1, Ordering::SeqCst);
        let newest = *self.newest.lock().unwrap();
        newest.ok_or_else(|| anyhow::anyhow!("listing unavailable"))
    }

    async fn fetch_chapter(
        &self,
        _series: &SeriesIdentity,
        chapter: ChapterNumber,
    ) -> anyhow::Result<Option<String>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let page = self.pages.lock().unwrap().get(&chapter).cloned();
        Ok(page)
    }
}

fn write_file(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[derive(Default)]
pub struct FakeNarrator {
    pub calls: Mutex<Vec<ChapterNumber>>,
    pub fail_on: Mutex<Option<ChapterNumber>>,
    pub panic_on: Mutex<Option<ChapterNumber>>,
}

impl FakeNarrator {
    pub fn chapters(&self) -> Vec<ChapterNumber> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort_unstable();
        calls
    }
}

#[async_trait]
impl Narrator for FakeNarrator {
    async fn synthesize(
        &self,
        _series: &SeriesIdentity,
        chapter: ChapterNumber,
        text: &str,
        out: &Path,
    ) -> anyhow::Result<PathBuf> {
        if *self.panic_on.lock().unwrap() == Some(chapter) {
            panic!("narrator exploded on chapter {chapter}");
        }
        self.calls.lock().unwrap().push(chapter);
        if *self.fail_on.lock().unwrap() == Some(chapter) {
            anyhow::bail!("tts backend refused chapter {chapter}");
        }
        write_file(out, text.as_bytes())?;
        Ok(out.to_path_buf())
    }
}

pub struct FakeImages;

#[async_trait]
impl ImageSupplier for FakeImages {
    async fn supply(&self, prompts: &[String], out_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let path = out_dir.join("img-000.png");
        write_file(&path, prompts.join("\n").as_bytes())?;
        Ok(vec![path])
    }
}

#[derive(Default)]
pub struct FakeComposer {
    pub titles: Mutex<Vec<String>>,
}

#[async_trait]
impl VideoComposer for FakeComposer {
    async fn compose(&self, request: ComposeRequest<'_>) -> anyhow::Result<PathBuf> {
        self.titles.lock().unwrap().push(request.title.to_owned());
        write_file(request.out, request.title.as_bytes())?;
        Ok(request.out.to_path_buf())
    }
}

#[derive(Default)]
pub struct FakeMerger {
    pub calls: Mutex<Vec<Vec<PathBuf>>>,
    pub fail: Mutex<bool>,
}

impl FakeMerger {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl VideoMerger for FakeMerger {
    async fn merge(&self, videos: &[PathBuf], out: &Path) -> anyhow::Result<PathBuf> {
        self.calls.lock().unwrap().push(videos.to_vec());
        if *self.fail.lock().unwrap() {
            anyhow::bail!("ffmpeg concat failed");
        }
        write_file(out, b"merged")?;
        Ok(out.to_path_buf())
    }
}

#[derive(Default)]
pub struct FakePublisher {
    pub published: Mutex<Vec<VideoMetadata>>,
}

impl FakePublisher {
    pub fn call_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(&self, _video: &Path, metadata: &VideoMetadata) -> anyhow::Result<String> {
        let mut published = self.published.lock().unwrap();
        published.push(metadata.clone());
        Ok(format!("pub-{}", published.len()))
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub sent: Mutex<Vec<(bool, String)>>,
}

impl FakeNotifier {
    pub fn sent(&self) -> Vec<(bool, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, success: bool, message: &str) {
        self.sent.lock().unwrap().push((success, message.to_owned()));
    }
}

/// The fakes behind one [`Collaborators`] set, kept for assertions.
pub struct Fakes {
    pub source: Arc<FakeSource>,
    pub narrator: Arc<FakeNarrator>,
    pub composer: Arc<FakeComposer>,
    pub merger: Arc<FakeMerger>,
    pub publisher: Arc<FakePublisher>,
    pub notifier: Arc<FakeNotifier>,
}

impl Fakes {
    pub fn new(source: FakeSource) -> Self {
        Self {
            source: Arc::new(source),
            narrator: Arc::new(FakeNarrator::default()),
            composer: Arc::new(FakeComposer::default()),
            merger: Arc::new(FakeMerger::default()),
            publisher: Arc::new(FakePublisher::default()),
            notifier: Arc::new(FakeNotifier::default()),
        }
    }

    pub fn text_stages(&self) -> TextStages {
        TextStages {
            source: self.source.clone(),
            extractor: Arc::new(SelectorExtractor::new(".chapter-c").unwrap()),
            cleaner: Arc::new(AdFilterCleaner::new().unwrap()),
        }
    }

    pub fn media_stages(&self) -> MediaStages {
        MediaStages {
            narrator: self.narrator.clone(),
            images: Arc::new(FakeImages),
            composer: self.composer.clone(),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            text: self.text_stages(),
            media: self.media_stages(),
            merger: self.merger.clone(),
            publisher: self.publisher.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

/// Polls `cond` until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
