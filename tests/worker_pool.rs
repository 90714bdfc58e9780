mod support;

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use novelcast::app::archive::{ChapterArchive, LocalFsChapterArchive};
use novelcast::app::pipeline::ConversionPipeline;
use novelcast::app::queue::work_queue;
use novelcast::app::worker::ChapterWorkerPool;
use novelcast::model::{ChapterNumber, ChapterOutcome, ChapterResult, WorkItem};
use novelcast::settings::StorageLayout;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use support::{FakeSource, Fakes, series, wait_until};

struct Fixture {
    temp: tempfile::TempDir,
    archive: Arc<LocalFsChapterArchive>,
    fakes: Fakes,
}

impl Fixture {
    fn new(source: FakeSource) -> anyhow::Result<Self> {
        let temp = tempfile::TempDir::new()?;
        let archive = Arc::new(LocalFsChapterArchive::new(temp.path()));
        Ok(Self {
            temp,
            archive,
            fakes: Fakes::new(source),
        })
    }

    fn pipeline(&self) -> Arc<ConversionPipeline> {
        Arc::new(ConversionPipeline::new(
            self.archive.clone(),
            self.fakes.text_stages(),
            self.fakes.media_stages(),
            StorageLayout::new(self.temp.path()),
        ))
    }

    /// Pushes `chapters`, closes the queue and waits for `workers` to drain it.
    async fn process(&self, workers: usize, chapters: &[ChapterNumber]) -> Vec<ChapterResult> {
        let (queue, receiver) = work_queue();
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        for chapter in chapters {
            queue.push(WorkItem::new(&series(), *chapter)).unwrap();
        }
        queue.close();

        let pool = ChapterWorkerPool::spawn(
            workers,
            receiver,
            self.pipeline(),
            results_tx,
            CancellationToken::new(),
        );
        tokio::time::timeout(Duration::from_secs(10), pool.join())
            .await
            .expect("workers finish once the queue is drained");

        let mut results = Vec::new();
        while let Ok(result) = results_rx.try_recv() {
            results.push(result);
        }
        results.sort_by_key(ChapterResult::chapter);
        results
    }
}

#[tokio::test]
async fn same_chapter_twice_is_captured_once() -> anyhow::Result<()> {
    let source = FakeSource::with_chapters(7);
    source.set_fetch_delay(Duration::from_millis(30));
    let fixture = Fixture::new(source)?;

    let results = fixture.process(5, &[7, 7]).await;

    assert_eq!(results.len(), 1);
    assert!(matches!(&results[0], ChapterResult::Converted(c) if c.chapter == 7));
    assert_eq!(fixture.fakes.narrator.chapters(), vec![7]);
    let archived = fixture.archive.read(&series(), 7).await?.unwrap_or_default();
    assert!(archived.starts_with("Chapter 7 opens at dawn."));
    Ok(())
}

#[tokio::test]
async fn converts_each_chapter_with_its_artifacts() -> anyhow::Result<()> {
    let fixture = Fixture::new(FakeSource::with_chapters(3))?;

    let results = fixture.process(2, &[3, 1, 2]).await;

    assert_eq!(results.iter().map(ChapterResult::chapter).collect::<Vec<_>>(), vec![1, 2, 3]);
    for result in &results {
        let ChapterResult::Converted(converted) = result else {
            panic!("expected a converted chapter, got {result:?}");
        };
        assert!(!converted.cleaned_text.contains("Đọc truyện"));
        for path in converted.derived_artifact_paths() {
            assert!(path.is_file(), "missing artifact {}", path.display());
        }
    }
    let titles = fixture.fakes.composer.titles.lock().unwrap().clone();
    assert!(titles.contains(&"Thay Phong Thuy - Chapter 2".to_owned()));
    Ok(())
}

#[tokio::test]
async fn archived_chapter_is_not_fetched_or_rewritten() -> anyhow::Result<()> {
    let fixture = Fixture::new(FakeSource::with_chapters(3))?;
    fixture.archive.write(&series(), 3, "original text").await?;

    let results = fixture.process(3, &[3]).await;

    assert!(results.is_empty());
    assert_eq!(fixture.fakes.source.fetches(), 0);
    assert_eq!(
        fixture.archive.read(&series(), 3).await?.as_deref(),
        Some("original text")
    );
    Ok(())
}

#[tokio::test]
async fn unpublished_chapter_is_discarded_quietly() -> anyhow::Result<()> {
    let fixture = Fixture::new(FakeSource::with_chapters(3))?;

    let results = fixture.process(2, &[4]).await;

    assert!(results.is_empty());
    assert_eq!(fixture.fakes.source.fetches(), 1);
    assert!(!fixture.archive.exists(&series(), 4).await?);
    Ok(())
}

#[tokio::test]
async fn page_without_chapter_body_is_discarded() -> anyhow::Result<()> {
    let source = FakeSource::with_chapters(1);
    source.put_page(2, "<html><body><p>Coming soon</p></body></html>".to_owned());
    let fixture = Fixture::new(source)?;

    let results = fixture.process(1, &[2]).await;

    assert!(results.is_empty());
    assert!(!fixture.archive.exists(&series(), 2).await?);
    Ok(())
}

#[tokio::test]
async fn chapter_that_cleans_to_nothing_is_not_archived() -> anyhow::Result<()> {
    let source = FakeSource::with_chapters(1);
    source.put_page(
        2,
        r#"<div class="chapter-c"><p>Đọc truyện tại truyen.example</p><p>***</p></div>"#.to_owned(),
    );
    let fixture = Fixture::new(source)?;

    let results = fixture.process(1, &[2]).await;

    assert!(results.is_empty());
    assert!(!fixture.archive.exists(&series(), 2).await?);
    assert!(fixture.fakes.narrator.chapters().is_empty());
    Ok(())
}

#[tokio::test]
async fn media_failure_yields_failure_marker() -> anyhow::Result<()> {
    let fixture = Fixture::new(FakeSource::with_chapters(2))?;
    *fixture.fakes.narrator.fail_on.lock().unwrap() = Some(2);

    let results = fixture.process(2, &[1, 2]).await;

    assert_eq!(results.len(), 2);
    assert!(matches!(&results[0], ChapterResult::Converted(_)));
    match &results[1] {
        ChapterResult::Failed { chapter, reason } => {
            assert_eq!(*chapter, 2);
            assert!(reason.contains("tts backend refused"), "reason: {reason}");
        }
        other => panic!("expected a failure marker, got {other:?}"),
    }
    assert!(fixture.archive.exists(&series(), 2).await?);
    Ok(())
}

#[tokio::test]
async fn panicking_chapter_does_not_stop_the_pool() -> anyhow::Result<()> {
    let fixture = Fixture::new(FakeSource::with_chapters(3))?;
    *fixture.fakes.narrator.panic_on.lock().unwrap() = Some(1);

    let results = fixture.process(1, &[1, 2, 3]).await;

    assert_eq!(results.iter().map(ChapterResult::chapter).collect::<Vec<_>>(), vec![2, 3]);
    Ok(())
}

#[tokio::test]
async fn cancelled_workers_leave_remaining_items() -> anyhow::Result<()> {
    let fixture = Fixture::new(FakeSource::with_chapters(3))?;
    let (queue, receiver) = work_queue();
    let (results_tx, _results_rx) = mpsc::unbounded_channel();
    for chapter in 1..=3 {
        queue.push(WorkItem::new(&series(), chapter))?;
    }
    let cancel = CancellationToken::new();
    cancel.cancel();

    let pool = ChapterWorkerPool::spawn(2, receiver.clone(), fixture.pipeline(), results_tx, cancel);
    tokio::time::timeout(Duration::from_secs(5), pool.join()).await?;

    assert_eq!(fixture.fakes.source.fetches(), 0);
    assert_eq!(receiver.take().await.map(|item| item.chapter), Some(1));
    drop(queue);
    Ok(())
}

#[tokio::test]
async fn cancelled_worker_finishes_its_current_chapter_first() -> anyhow::Result<()> {
    let source = FakeSource::with_chapters(3);
    source.set_fetch_delay(Duration::from_millis(200));
    let fixture = Fixture::new(source)?;
    let (queue, receiver) = work_queue();
    let (results_tx, mut results_rx) = mpsc::unbounded_channel();
    for chapter in 1..=3 {
        queue.push(WorkItem::new(&series(), chapter))?;
    }
    let cancel = CancellationToken::new();

    let pool = ChapterWorkerPool::spawn(
        1,
        receiver.clone(),
        fixture.pipeline(),
        results_tx,
        cancel.clone(),
    );
    assert!(wait_until(Duration::from_secs(5), || fixture.fakes.source.fetches() >= 1).await);
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), pool.join()).await?;

    assert_eq!(fixture.fakes.source.fetches(), 1);
    assert!(fixture.archive.exists(&series(), 1).await?);
    assert!(matches!(
        results_rx.try_recv(),
        Ok(ChapterResult::Converted(converted)) if converted.chapter == 1
    ));
    assert!(results_rx.try_recv().is_err());
    assert_eq!(receiver.take().await.map(|item| item.chapter), Some(2));
    drop(queue);
    Ok(())
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn media_failure_logs_the_stranded_chapter() -> anyhow::Result<()> {
    let fixture = Fixture::new(FakeSource::with_chapters(6))?;
    *fixture.fakes.narrator.fail_on.lock().unwrap() = Some(6);
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let outcome = fixture
        .pipeline()
        .process(&WorkItem::new(&series(), 6))
        .await?;

    assert!(matches!(
        outcome,
        ChapterOutcome::Completed(ChapterResult::Failed { chapter: 6, .. })
    ));
    let text = logs.text();
    assert!(text.contains("chapter stranded without a video"), "logs: {text}");
    assert!(text.contains("chapter=6"), "logs: {text}");
    Ok(())
}
