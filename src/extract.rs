//! Structural extraction of typed records from fetched markup.
//!
//! All knowledge of the upstream page layout lives here, expressed as
//! prioritized selector-rule tables rather than imperative string scanning.
//! A layout change upstream means editing a table, not rewriting control
//! flow. Extractors tolerate missing optional fields; an entry missing its
//! identifying field is dropped and counted, and zero matches of the
//! expected repeated element is a `ParseError`, never a silent empty result.

use crate::error::ParseError;
use crate::models::{MangaDetail, MangaStatus, MangaSummary};
use crate::normalize;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

/// Where a rule reads its value from once its selector matches.
#[derive(Debug, Clone, Copy)]
enum ValueSource {
    /// Collected text content, trimmed.
    Text,
    /// The `content` attribute (meta tags).
    Content,
    /// Lazy-load aware image source: data-src, then data-lazy, then src.
    ImageSrc,
}

/// One declarative extraction rule: a selector plus a value source.
#[derive(Debug, Clone, Copy)]
struct FieldRule {
    selector: &'static str,
    source: ValueSource,
}

const TITLE_RULES: &[FieldRule] = &[
    FieldRule { selector: "h1", source: ValueSource::Text },
    FieldRule { selector: ".manga-title", source: ValueSource::Text },
    FieldRule { selector: r#"meta[property="og:title"]"#, source: ValueSource::Content },
];

const COVER_RULES: &[FieldRule] = &[
    FieldRule { selector: r#"meta[property="og:image"]"#, source: ValueSource::Content },
    FieldRule { selector: r#"img[src*="/covers/"]"#, source: ValueSource::ImageSrc },
    FieldRule { selector: r#"img[src*="/uploads/"]"#, source: ValueSource::ImageSrc },
    FieldRule { selector: ".cover img", source: ValueSource::ImageSrc },
    FieldRule { selector: ".manga-cover img", source: ValueSource::ImageSrc },
    FieldRule { selector: ".thumb img", source: ValueSource::ImageSrc },
    FieldRule { selector: ".poster img", source: ValueSource::ImageSrc },
    FieldRule { selector: "article img", source: ValueSource::ImageSrc },
    FieldRule { selector: ".entry-content img", source: ValueSource::ImageSrc },
];

const AUTHOR_RULES: &[FieldRule] = &[
    FieldRule { selector: ".author", source: ValueSource::Text },
    FieldRule { selector: ".autor", source: ValueSource::Text },
];

const ARTIST_RULES: &[FieldRule] = &[
    FieldRule { selector: ".artist", source: ValueSource::Text },
    FieldRule { selector: ".artista", source: ValueSource::Text },
];

const SYNOPSIS_RULES: &[FieldRule] = &[
    FieldRule { selector: ".synopsis", source: ValueSource::Text },
    FieldRule { selector: ".sinopsis", source: ValueSource::Text },
    FieldRule { selector: ".description", source: ValueSource::Text },
    FieldRule { selector: ".descripcion", source: ValueSource::Text },
    FieldRule { selector: "div.manga-desc", source: ValueSource::Text },
    FieldRule { selector: "p.summary", source: ValueSource::Text },
];

const STATUS_RULES: &[FieldRule] = &[
    FieldRule { selector: ".status", source: ValueSource::Text },
    FieldRule { selector: ".estado", source: ValueSource::Text },
];

const GENRE_SELECTOR: &str =
    ".genres a, .generos a, span.genre, a[href*='genero'], a[href*='genre']";

/// Status labels and format names that show up in genre link lists but are
/// not genres.
const NON_GENRE_WORDS: &[&str] = &[
    "manga", "manhwa", "manhua", "novel", "one shot", "oneshot", "ongoing", "completed",
    "hiatus", "cancelled", "en curso", "finalizado", "publicándose", "cancelado",
];

const LISTING_ANCHOR: &str = r#"a[href*="/manga/"]"#;
const CHAPTER_ANCHOR_PRIMARY: &str = r#"h4 > a[href*="/leer/"]"#;
const CHAPTER_ANCHOR_FALLBACK: &str = r#"a[href*="/leer/"]"#;
const CHAPTER_DATE_SELECTOR: &str = ".date, .fecha, time, span.time";

/// One chapter straight out of the markup, pre-normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChapter {
    /// Absolute chapter URL.
    pub url: String,
    /// Display label, verbatim.
    pub name: String,
    /// Raw date text, if the layout carried one near the link.
    pub date_text: Option<String>,
}

/// Listing extraction output: entries plus the upstream pagination hint.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingExtraction {
    pub entries: Vec<MangaSummary>,
    pub has_next: bool,
}

fn sel(s: &str) -> Selector {
    Selector::parse(s).expect("static selector must parse")
}

fn first_rule_match(document: &Html, rules: &[FieldRule]) -> Option<String> {
    for rule in rules {
        if let Some(value) = document
            .select(&sel(rule.selector))
            .next()
            .and_then(|el| read_value(el, rule.source))
        {
            return Some(value);
        }
    }
    None
}

fn read_value(el: ElementRef<'_>, source: ValueSource) -> Option<String> {
    let value = match source {
        ValueSource::Text => el.text().collect::<String>(),
        ValueSource::Content => el.value().attr("content")?.to_string(),
        ValueSource::ImageSrc => el
            .value()
            .attr("data-src")
            .or_else(|| el.value().attr("data-lazy"))
            .or_else(|| el.value().attr("src"))?
            .to_string(),
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Resolve a possibly relative href against the page's post-redirect URL.
fn absolutize(base: &Url, href: &str) -> Option<String> {
    let trimmed = href.trim();
    if trimmed.is_empty() {
        return None;
    }
    base.join(trimmed).ok().map(|u| u.to_string())
}

fn is_image_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    [".jpg", ".jpeg", ".png", ".webp", ".gif"]
        .iter()
        .any(|ext| lower.contains(ext))
}

/// Parse one listing page (popular, latest or search) into summaries plus a
/// next-page hint.
pub fn extract_listing_page(
    html: &str,
    final_url: &Url,
    page: u32,
    operation: &'static str,
) -> Result<ListingExtraction, ParseError> {
    let document = Html::parse_document(html);
    let anchors: Vec<ElementRef<'_>> = document.select(&sel(LISTING_ANCHOR)).collect();

    if anchors.is_empty() {
        return Err(ParseError {
            operation,
            url: final_url.to_string(),
        });
    }

    let mut entries = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut dropped = 0usize;

    for link in anchors {
        let href = link.value().attr("href").unwrap_or("");
        if href.contains("/leer/") {
            continue;
        }
        let title_raw = link.text().collect::<String>();
        let title = normalize::clean_title(&title_raw);
        if title.is_empty() {
            dropped += 1;
            continue;
        }
        let detail_url = match absolutize(final_url, href) {
            Some(u) => u,
            None => {
                dropped += 1;
                continue;
            }
        };
        if !seen.insert(detail_url.clone()) {
            continue;
        }

        entries.push(MangaSummary {
            title,
            detail_url,
            cover_url: find_thumbnail(link).and_then(|src| absolutize(final_url, &src)),
            latest_chapter_label: find_latest_chapter_label(link),
        });
    }

    if dropped > 0 {
        log::debug!(
            "{}: dropped {} listing entries missing title or url at {}",
            operation,
            dropped,
            final_url
        );
    }

    Ok(ListingExtraction {
        has_next: has_next_page(&document, page),
        entries,
    })
}

/// Covers are often in a separate image link near the title anchor: look
/// inside the link, then its parent, grandparent, and sibling anchors.
fn find_thumbnail(link: ElementRef<'_>) -> Option<String> {
    let img_sel = sel("img");
    if let Some(img) = link.select(&img_sel).next() {
        return read_value(img, ValueSource::ImageSrc);
    }

    let parent = link.parent().and_then(ElementRef::wrap)?;
    if let Some(img) = parent.select(&img_sel).next() {
        return read_value(img, ValueSource::ImageSrc);
    }
    if let Some(grandparent) = parent.parent().and_then(ElementRef::wrap) {
        if let Some(img) = grandparent.select(&img_sel).next() {
            return read_value(img, ValueSource::ImageSrc);
        }
    }
    for sibling in parent.select(&sel("a")) {
        if let Some(img) = sibling.select(&img_sel).next() {
            return read_value(img, ValueSource::ImageSrc);
        }
    }
    None
}

/// Listings on the latest page put the newest chapter link next to the
/// title anchor; surface its label when present.
fn find_latest_chapter_label(link: ElementRef<'_>) -> Option<String> {
    let parent = link.parent().and_then(ElementRef::wrap)?;
    parent
        .select(&sel(CHAPTER_ANCHOR_FALLBACK))
        .next()
        .and_then(|el| read_value(el, ValueSource::Text))
}

fn has_next_page(document: &Html, page: u32) -> bool {
    let by_number = format!("a[href*='page={}']", page + 1);
    for selector in [by_number.as_str(), "a.next", "a[rel='next']"] {
        if let Ok(parsed) = Selector::parse(selector) {
            if document.select(&parsed).next().is_some() {
                return true;
            }
        }
    }
    false
}

/// Parse a manga detail page. The chapter list is extracted separately by
/// [`extract_chapters`]; the returned record carries an empty one.
pub fn extract_detail(html: &str, final_url: &Url) -> Result<MangaDetail, ParseError> {
    let document = Html::parse_document(html);

    let title = first_rule_match(&document, TITLE_RULES)
        .map(|t| normalize::clean_title(&t))
        .filter(|t| !t.is_empty())
        .ok_or(ParseError {
            operation: "detail",
            url: final_url.to_string(),
        })?;

    let cover_url = first_rule_match(&document, COVER_RULES)
        .and_then(|src| absolutize(final_url, &src));

    let synopsis = first_rule_match(&document, SYNOPSIS_RULES).or_else(|| {
        // Fallback: first substantial paragraph
        document
            .select(&sel("p"))
            .map(|p| p.text().collect::<String>().trim().to_string())
            .find(|text| text.len() > 100)
    });

    let status = first_rule_match(&document, STATUS_RULES)
        .map(|raw| MangaStatus::parse(&raw))
        .unwrap_or(MangaStatus::Unknown);

    Ok(MangaDetail {
        detail_url: final_url.to_string(),
        title,
        cover_url,
        author: first_rule_match(&document, AUTHOR_RULES),
        artist: first_rule_match(&document, ARTIST_RULES),
        genres: extract_genres(&document),
        status,
        synopsis,
        chapters: Vec::new(),
    })
}

fn extract_genres(document: &Html) -> Vec<String> {
    document
        .select(&sel(GENRE_SELECTOR))
        .filter_map(|el| read_value(el, ValueSource::Text))
        .filter(|g| !NON_GENRE_WORDS.contains(&g.to_lowercase().as_str()))
        .collect()
}

/// Parse the chapter list off a detail page.
///
/// Zero matching chapter links is a `ParseError`: it distinguishes "the
/// layout broke" from a legitimately short list.
pub fn extract_chapters(html: &str, final_url: &Url) -> Result<Vec<RawChapter>, ParseError> {
    let document = Html::parse_document(html);

    let mut anchors: Vec<ElementRef<'_>> =
        document.select(&sel(CHAPTER_ANCHOR_PRIMARY)).collect();
    if anchors.is_empty() {
        anchors = document
            .select(&sel(CHAPTER_ANCHOR_FALLBACK))
            .filter(|a| {
                a.text()
                    .collect::<String>()
                    .to_lowercase()
                    .contains("cap")
            })
            .collect();
    }

    if anchors.is_empty() {
        return Err(ParseError {
            operation: "chapters",
            url: final_url.to_string(),
        });
    }

    let mut chapters = Vec::new();
    let mut dropped = 0usize;

    for link in anchors {
        let href = link.value().attr("href").unwrap_or("");
        let url = match absolutize(final_url, href) {
            Some(u) => u,
            None => {
                dropped += 1;
                continue;
            }
        };
        let name = read_value(link, ValueSource::Text)
            .or_else(|| link.value().attr("title").map(|t| t.trim().to_string()))
            .unwrap_or_default();

        chapters.push(RawChapter {
            url,
            name,
            date_text: find_chapter_date(link),
        });
    }

    if dropped > 0 {
        log::debug!(
            "chapters: dropped {} entries missing a url at {}",
            dropped,
            final_url
        );
    }

    Ok(chapters)
}

/// Dates sit near the chapter link, not inside it: check the parent row,
/// then the grandparent.
fn find_chapter_date(link: ElementRef<'_>) -> Option<String> {
    let date_sel = sel(CHAPTER_DATE_SELECTOR);
    let parent = link.parent().and_then(ElementRef::wrap)?;
    if let Some(el) = parent.select(&date_sel).next() {
        return read_value(el, ValueSource::Text);
    }
    parent
        .parent()
        .and_then(ElementRef::wrap)?
        .select(&date_sel)
        .next()
        .and_then(|el| read_value(el, ValueSource::Text))
}

/// Extract ordered page-image URLs from a rendered reader page.
///
/// The reader renders `<select>` dropdowns whose option values are the page
/// image URLs (option text is "1/15", "2/15", ...). When no dropdown
/// carries image URLs, fall back to images loaded on the page, skipping
/// site chrome under `/assets/`.
pub fn extract_images(html: &str, final_url: &Url) -> Result<Vec<String>, ParseError> {
    let document = Html::parse_document(html);

    let has_selects = document.select(&sel("select")).next().is_some();
    let has_imgs = document.select(&sel("img")).next().is_some();
    if !has_selects && !has_imgs {
        return Err(ParseError {
            operation: "chapter_images",
            url: final_url.to_string(),
        });
    }

    let mut urls = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for option in document.select(&sel("select option")) {
        if let Some(value) = option.value().attr("value") {
            let value = value.trim();
            if !is_image_url(value) {
                continue;
            }
            if let Some(abs) = absolutize(final_url, value) {
                if seen.insert(abs.clone()) {
                    urls.push(abs);
                }
            }
        }
    }

    if urls.is_empty() {
        for img in document.select(&sel("img")) {
            let src = img
                .value()
                .attr("data-src")
                .or_else(|| img.value().attr("data-original"))
                .or_else(|| img.value().attr("src"))
                .unwrap_or("")
                .trim();
            if !is_image_url(src) || src.contains("/assets/") {
                continue;
            }
            if let Some(abs) = absolutize(final_url, src) {
                if seen.insert(abs.clone()) {
                    urls.push(abs);
                }
            }
        }
    }

    Ok(urls)
}
