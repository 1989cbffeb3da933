//! Typed records produced by the pipeline.
//!
//! `detail_url` is the primary key across the whole system; `chapter_url` is
//! the secondary key, unique within one manga's chapter list. Everything here
//! is an immutable snapshot derived fresh per request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in a popular/latest/search listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MangaSummary {
    pub title: String,
    /// Canonical identifier: the manga's detail-page URL, absolute.
    pub detail_url: String,
    pub cover_url: Option<String>,
    pub latest_chapter_label: Option<String>,
}

/// Publication status, parsed from Spanish or English status strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MangaStatus {
    Ongoing,
    Completed,
    Unknown,
}

impl MangaStatus {
    pub fn parse(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        if ["ongoing", "publicándose", "publicandose", "en curso"]
            .iter()
            .any(|s| lower.contains(s))
        {
            MangaStatus::Ongoing
        } else if ["completed", "finalizado", "completado"]
            .iter()
            .any(|s| lower.contains(s))
        {
            MangaStatus::Completed
        } else {
            MangaStatus::Unknown
        }
    }
}

/// Full detail-page record, including the normalized chapter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MangaDetail {
    pub detail_url: String,
    pub title: String,
    pub cover_url: Option<String>,
    pub author: Option<String>,
    pub artist: Option<String>,
    pub genres: Vec<String>,
    pub status: MangaStatus,
    pub synopsis: Option<String>,
    /// Ascending canonical reading order; callers reverse for display.
    pub chapters: Vec<ChapterRef>,
}

/// One chapter, normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRef {
    /// Unique within one manga's list, absolute.
    pub chapter_url: String,
    /// Upstream display label, verbatim.
    pub name: String,
    /// Monotonically comparable; supports fractional chapters like 10.5.
    pub chapter_number: f64,
    pub date: Option<DateTime<Utc>>,
    /// True when no numeric token was found in the label and the number was
    /// assigned from the chapter's position in the upstream list.
    #[serde(default)]
    pub number_inferred: bool,
}

/// One page of a listing operation, with an upstream pagination hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingPage {
    pub entries: Vec<MangaSummary>,
    pub page: u32,
    pub has_next: bool,
}

/// Ordered page-image URLs for one chapter. Order is reading order.
pub type PageImageSet = Vec<String>;

/// Raw fetch output. Ephemeral; never persisted.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub raw_content: String,
    /// URL after redirects; base for resolving relative links.
    pub final_url: reqwest::Url,
    /// Whether headless JS execution produced the content.
    pub rendered: bool,
}
