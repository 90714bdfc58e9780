use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chapters are numbered contiguously from 1.
pub type ChapterNumber = u32;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesIdentity {
    pub name: String,
    pub base_url: String,
}

impl SeriesIdentity {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Filesystem-safe key used for every per-series path.
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }
}

pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        } else {
            pending_sep = true;
        }
    }
    if out.is_empty() {
        out.push_str("series");
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryState {
    pub series: SeriesIdentity,
    pub last_known_chapter: ChapterNumber,
    pub updated_at: DateTime<Utc>,
}

impl DiscoveryState {
    pub fn new(series: SeriesIdentity, last_known_chapter: ChapterNumber) -> Self {
        Self {
            series,
            last_known_chapter,
            updated_at: Utc::now(),
        }
    }

    pub fn advanced_to(&self, chapter: ChapterNumber) -> Self {
        Self {
            series: self.series.clone(),
            last_known_chapter: chapter,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub series: SeriesIdentity,
    pub chapter: ChapterNumber,
}

impl WorkItem {
    pub fn new(series: &SeriesIdentity, chapter: ChapterNumber) -> Self {
        Self {
            series: series.clone(),
            chapter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedChapter {
    pub chapter: ChapterNumber,
    pub cleaned_text: String,
    pub audio_path: PathBuf,
    pub image_paths: Vec<PathBuf>,
    pub video_path: PathBuf,
}

impl ConvertedChapter {
    pub fn derived_artifact_paths(&self) -> Vec<&PathBuf> {
        let mut paths = vec![&self.audio_path];
        paths.extend(self.image_paths.iter());
        paths.push(&self.video_path);
        paths
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterResult {
    Converted(ConvertedChapter),
    Failed {
        chapter: ChapterNumber,
        reason: String,
    },
}

impl ChapterResult {
    pub fn chapter(&self) -> ChapterNumber {
        match self {
            Self::Converted(converted) => converted.chapter,
            Self::Failed { chapter, .. } => *chapter,
        }
    }
}

/// Why a worker dropped a work item without producing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    AlreadyCaptured,
    NotYetAvailable,
    EmptyExtraction,
    DataQuality,
    LostWriteRace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterOutcome {
    Discarded(DiscardReason),
    Completed(ChapterResult),
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub series: SeriesIdentity,
    pub results: BTreeMap<ChapterNumber, ConvertedChapter>,
    pub failed: Vec<ChapterNumber>,
}

impl Batch {
    pub fn new(series: SeriesIdentity) -> Self {
        Self {
            series,
            results: BTreeMap::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty() && self.failed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn min_chapter(&self) -> Option<ChapterNumber> {
        self.results.keys().next().copied()
    }

    pub fn max_chapter(&self) -> Option<ChapterNumber> {
        self.results.keys().next_back().copied()
    }

    /// Chapter videos in ascending chapter order.
    pub fn video_paths(&self) -> Vec<PathBuf> {
        self.results
            .values()
            .map(|converted| converted.video_path.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Skipped { results: usize },
    Published {
        min_chapter: ChapterNumber,
        max_chapter: ChapterNumber,
        published_id: String,
    },
    Failed { message: String },
}
