//! Integration tests for the pipeline surface.
//!
//! Everything here runs offline: validation gates, the extract/normalize
//! path over fixture HTML, and the relay's allow-list. Tests that need the
//! live upstream or a local Chrome are `#[ignore]`d.

use fiebre_scraper::error::{Error, RelayError, ValidationError};
use fiebre_scraper::extract;
use fiebre_scraper::normalize;
use fiebre_scraper::{Config, MangaStatus, Pipeline};
use reqwest::Url;

fn base_url() -> Url {
    Url::parse("https://www.leercapitulo.co/").unwrap()
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[tokio::test]
async fn listing_operations_reject_page_zero() {
    let pipeline = Pipeline::new(Config::default()).unwrap();
    for result in [
        pipeline.popular(0).await,
        pipeline.latest(0).await,
        pipeline.search("one piece", 0).await,
    ] {
        assert!(matches!(
            result.unwrap_err(),
            Error::Validation(ValidationError::BadPageNumber(0))
        ));
    }
}

#[tokio::test]
async fn detail_operations_reject_foreign_hosts() {
    let pipeline = Pipeline::new(Config::default()).unwrap();

    let err = pipeline
        .detail("https://attacker.example/manga/one-piece/")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::DisallowedHost(_))
    ));

    let err = pipeline
        .chapters("https://attacker.example/manga/one-piece/")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::DisallowedHost(_))
    ));

    let err = pipeline
        .chapter_images("https://attacker.example/leer/one-piece/1/")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::DisallowedHost(_))
    ));
}

#[tokio::test]
async fn relay_rejects_foreign_hosts_without_network() {
    let pipeline = Pipeline::new(Config::default()).unwrap();
    let err = pipeline
        .relay_image("https://attacker.example/page-001.jpg")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Relay(RelayError::Disallowed { .. })));
}

#[test]
fn listing_fixture_extracts_summaries_and_pagination() {
    let html = r#"
        <html><body>
        <div class="manga-list">
            <div class="item">
                <a href="/manga/one-piece/">One Piece</a>
                <img data-src="/uploads/covers/one-piece.jpg">
                <a href="/leer/one-piece/1100/">Capítulo 1100</a>
            </div>
            <div class="item">
                <a href="/manga/berserk/">Berserk</a>
                <img src="/uploads/covers/berserk.jpg">
            </div>
            <div class="item">
                <a href="/manga/one-piece/">One Piece duplicate</a>
            </div>
        </div>
        <a href="/status/ongoing/?page=2">2</a>
        </body></html>
    "#;

    let extraction = extract::extract_listing_page(html, &base_url(), 1, "popular").unwrap();
    assert_eq!(extraction.entries.len(), 2, "duplicate detail URL collapses");
    assert!(extraction.has_next);

    let one_piece = &extraction.entries[0];
    assert_eq!(one_piece.title, "One Piece");
    assert_eq!(
        one_piece.detail_url,
        "https://www.leercapitulo.co/manga/one-piece/"
    );
    assert_eq!(
        one_piece.cover_url.as_deref(),
        Some("https://www.leercapitulo.co/uploads/covers/one-piece.jpg")
    );
}

#[test]
fn detail_and_chapters_fixture_produce_canonical_order() {
    let html = r#"
        <html><head>
        <meta property="og:image" content="/uploads/covers/test.jpg">
        </head><body>
        <h1>Test Manga - leercapitulo.co</h1>
        <p class="description">A long enough synopsis for the record.</p>
        <div class="chapter-list">
            <h4><a href="/leer/test/3/">Capítulo 3</a></h4><span class="date">hace 2 horas</span>
            <h4><a href="/leer/test/2/">Capítulo 2</a></h4><span class="date">01/02/2024</span>
            <h4><a href="/leer/test/1/">Capítulo 1</a></h4><span class="date">25/01/2024</span>
        </div>
        </body></html>
    "#;

    let detail = extract::extract_detail(html, &base_url()).unwrap();
    assert_eq!(detail.title, "Test Manga");
    assert!(detail.cover_url.is_some());
    assert_eq!(detail.status, MangaStatus::Unknown);

    let chapters = normalize::normalize_chapters(
        extract::extract_chapters(html, &base_url()).unwrap(),
    );
    assert_eq!(chapters.len(), 3);
    let numbers: Vec<f64> = chapters.iter().map(|c| c.chapter_number).collect();
    assert_eq!(numbers, vec![1.0, 2.0, 3.0]);
    assert!(chapters.iter().all(|c| !c.number_inferred));
    assert!(chapters[0].date.is_some());
}

#[test]
fn detail_page_with_no_chapters_is_a_parse_error() {
    let html = "<html><body><h1>Test Manga</h1></body></html>";
    assert!(extract::extract_chapters(html, &base_url()).is_err());
}

#[test]
fn reader_fixture_preserves_page_order() {
    let html = r#"
        <html><body>
        <select class="page-select">
            <option value="/uploads/pages/test/1/p1.jpg">1</option>
            <option value="/uploads/pages/test/1/p2.jpg">2</option>
            <option value="/uploads/pages/test/1/p3.jpg">3</option>
        </select>
        </body></html>
    "#;

    let images = extract::extract_images(html, &base_url()).unwrap();
    assert_eq!(
        images,
        vec![
            "https://www.leercapitulo.co/uploads/pages/test/1/p1.jpg",
            "https://www.leercapitulo.co/uploads/pages/test/1/p2.jpg",
            "https://www.leercapitulo.co/uploads/pages/test/1/p3.jpg",
        ]
    );
}

// Live tests against the real upstream; run manually with
// `cargo test -- --ignored` when the site and a local Chrome are reachable.

#[tokio::test]
#[ignore]
async fn live_popular_listing_returns_entries() {
    init_logging();
    let pipeline = Pipeline::new(Config::default()).unwrap();
    let page = pipeline.popular(1).await.unwrap();
    assert!(!page.entries.is_empty());
    assert!(page.entries.iter().all(|m| !m.title.is_empty()));
    assert!(page
        .entries
        .iter()
        .all(|m| m.detail_url.starts_with("https://")));
}

#[tokio::test]
#[ignore]
async fn live_detail_includes_ordered_chapters() {
    init_logging();
    let pipeline = Pipeline::new(Config::default()).unwrap();
    let listing = pipeline.popular(1).await.unwrap();
    let first = &listing.entries[0];
    let detail = pipeline.detail(&first.detail_url).await.unwrap();
    assert!(!detail.chapters.is_empty());
    assert!(detail
        .chapters
        .windows(2)
        .all(|w| w[0].chapter_number <= w[1].chapter_number));
}

#[tokio::test]
#[ignore]
async fn live_chapter_images_render_in_order() {
    init_logging();
    let pipeline = Pipeline::new(Config::default()).unwrap();
    let listing = pipeline.popular(1).await.unwrap();
    let detail = pipeline.detail(&listing.entries[0].detail_url).await.unwrap();
    let chapter = detail.chapters.first().unwrap();
    let images = pipeline.chapter_images(&chapter.chapter_url).await.unwrap();
    assert!(!images.is_empty());
}
