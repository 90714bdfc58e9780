use regex::Regex;
use scraper::{Html, Selector};

use crate::settings::env_string;

pub trait TextExtractor: Send + Sync {
    /// Chapter body as plain text, one line per text run. Empty if the page
    /// carries no chapter body.
    fn extract(&self, html: &str) -> String;
}

pub trait TextCleaner: Send + Sync {
    fn clean(&self, raw: &str) -> String;
}

pub const DEFAULT_CONTENT_SELECTOR: &str = ".chapter-c";

#[derive(Debug)]
pub struct SelectorExtractor {
    selector: Selector,
}

impl SelectorExtractor {
    pub fn new(selector: &str) -> anyhow::Result<Self> {
        let selector = Selector::parse(selector)
            .map_err(|err| anyhow::anyhow!("invalid content selector {selector:?}: {err}"))?;
        Ok(Self { selector })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let selector = env_string("NOVELCAST_CHAPTER_CONTENT_SELECTOR")
            .unwrap_or_else(|| DEFAULT_CONTENT_SELECTOR.to_owned());
        Self::new(&selector)
    }
}

impl TextExtractor for SelectorExtractor {
    fn extract(&self, html: &str) -> String {
        let doc = Html::parse_document(html);
        let Some(body) = doc.select(&self.selector).next() else {
            tracing::debug!("chapter content element not found");
            return String::new();
        };
        body.text()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Boilerplate lines that reading sites inject into chapter bodies.
const AD_LINE_PREFIXES: &[&str] = &[
    "Đọc truyện tại",
    "Nhấn theo dõi",
    "Chương mới nhất tại",
    "Truyện được đăng tải",
    "Website chính",
    "Theo dõi để cập nhật",
    "Cập nhật sớm nhất tại",
    "Fanpage",
    "Donate",
];

#[derive(Debug)]
pub struct AdFilterCleaner {
    ads: Regex,
}

impl AdFilterCleaner {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_prefixes(AD_LINE_PREFIXES)
    }

    pub fn with_prefixes(prefixes: &[&str]) -> anyhow::Result<Self> {
        let alternatives = prefixes
            .iter()
            .map(|p| regex::escape(p))
            .collect::<Vec<_>>()
            .join("|");
        let ads = Regex::new(&format!("(?i)(?:{alternatives})[^\\n]*"))
            .map_err(|err| anyhow::anyhow!("build ad filter: {err}"))?;
        Ok(Self { ads })
    }
}

impl TextCleaner for AdFilterCleaner {
    fn clean(&self, raw: &str) -> String {
        let without_ads = self.ads.replace_all(raw, "");
        let kept = without_ads
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace() || matches!(c, '.' | ',' | '!' | '?'))
            .collect::<String>();
        kept.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Splits after `.`, `!` or `?` when followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let at_boundary =
            matches!(c, '.' | '!' | '?') && chars.peek().is_some_and(|next| next.is_whitespace());
        if at_boundary {
            push_trimmed(&mut sentences, &current);
            current.clear();
            while chars.peek().is_some_and(|next| next.is_whitespace()) {
                chars.next();
            }
        }
    }
    push_trimmed(&mut sentences, &current);
    sentences
}

fn push_trimmed(out: &mut Vec<String>, s: &str) {
    let s = s.trim();
    if !s.is_empty() {
        out.push(s.to_owned());
    }
}
