//! Canonicalization of raw extracted fields into the stable data model.
//!
//! Chapter numbers become comparable decimals, Spanish dates become UTC
//! timestamps, duplicate chapter URLs collapse to the most complete record,
//! and the output is always sorted into ascending reading order.

use crate::extract::RawChapter;
use crate::models::{ChapterRef, MangaSummary};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use regex::Regex;

/// Site suffixes the upstream appends to titles.
const TITLE_SUFFIXES: &[&str] = &[
    " - Read Manga Online leercapitulo.co",
    " - Leer Manga Online leercapitulo.co",
    " - leercapitulo.co",
];

/// Strip site suffixes from a title string.
pub fn clean_title(title: &str) -> String {
    let mut out = title.trim();
    for suffix in TITLE_SUFFIXES {
        if let Some(stripped) = out.strip_suffix(suffix) {
            out = stripped;
        }
    }
    out.trim().to_string()
}

/// First decimal numeric token in a chapter label ("Capítulo 10.5" -> 10.5,
/// "Ch. 3" -> 3.0). `None` when the label carries no numeric token at all.
pub fn chapter_number(raw: &str) -> Option<f64> {
    let re = Regex::new(r"(\d+(?:\.\d+)?)").ok()?;
    re.captures(raw)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Parse an upstream date string: Spanish relative dates ("hace 2 horas")
/// or dd/MM/yyyy. `None` for anything else; a missing date is not an error.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(dt) = parse_relative_date(trimmed) {
        return Some(dt);
    }
    NaiveDate::parse_from_str(trimmed, "%d/%m/%Y")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}

fn parse_relative_date(raw: &str) -> Option<DateTime<Utc>> {
    let lower = raw.to_lowercase();
    if !lower.contains("hace") {
        return None;
    }

    let number: i64 = Regex::new(r"\d+")
        .ok()?
        .find(&lower)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);
    let now = Utc::now();

    if lower.contains("hora") {
        Some(now - Duration::hours(number))
    } else if lower.contains("día") || lower.contains("dia") {
        Some(now - Duration::days(number))
    } else if lower.contains("semana") {
        Some(now - Duration::weeks(number))
    } else if lower.contains("mes") {
        Some(now - Duration::days(number * 30))
    } else {
        None
    }
}

/// Turn raw chapters (in upstream display order, newest first) into the
/// canonical chapter list: numbered, deduplicated by URL, ascending.
///
/// Labels without a numeric token get a number from their position in
/// reading order and are flagged `number_inferred`, so every chapter stays
/// orderable even when upstream naming is free text.
pub fn normalize_chapters(raw: Vec<RawChapter>) -> Vec<ChapterRef> {
    let total = raw.len();
    let mut out: Vec<ChapterRef> = Vec::with_capacity(total);
    let mut index_by_url: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut discarded = 0usize;

    for (i, ch) in raw.into_iter().enumerate() {
        let (number, inferred) = match chapter_number(&ch.name) {
            Some(n) => (n, false),
            // Upstream lists newest first; position from the end is the
            // reading-order index.
            None => ((total - i) as f64, true),
        };
        let candidate = ChapterRef {
            chapter_url: ch.url,
            name: ch.name,
            chapter_number: number,
            date: ch.date_text.as_deref().and_then(parse_date),
            number_inferred: inferred,
        };

        match index_by_url.get(&candidate.chapter_url) {
            Some(&existing_idx) => {
                discarded += 1;
                // Pagination overlap: keep the most complete record
                if out[existing_idx].date.is_none() && candidate.date.is_some() {
                    out[existing_idx] = candidate;
                }
            }
            None => {
                index_by_url.insert(candidate.chapter_url.clone(), out.len());
                out.push(candidate);
            }
        }
    }

    if discarded > 0 {
        log::debug!("normalize: discarded {} duplicate chapter entries", discarded);
    }

    // Stable sort keeps reading order for equal numbers
    out.sort_by(|a, b| a.chapter_number.total_cmp(&b.chapter_number));
    out
}

/// Case-insensitive substring title filter; the upstream search page
/// filters client-side, so the pipeline does the same after extraction.
pub fn filter_by_title(entries: Vec<MangaSummary>, query: &str) -> Vec<MangaSummary> {
    let needle = query.to_lowercase();
    if needle.is_empty() {
        return entries;
    }
    entries
        .into_iter()
        .filter(|m| m.title.to_lowercase().contains(&needle))
        .collect()
}
