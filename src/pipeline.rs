//! Pipeline orchestrator: validate, consult the cache, then run
//! fetch -> extract -> normalize for each operation.
//!
//! Extraction and normalization are pure, synchronous transforms; the only
//! suspension points are the HTTP fetch and the headless render. The
//! orchestrator holds no per-request state beyond the bounded caches.

use crate::browser_client::RenderPool;
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::error::{Error, FetchError, ValidationError};
use crate::extract;
use crate::http_client::HttpClient;
use crate::metrics::MetricsTracker;
use crate::models::{ChapterRef, FetchResult, ListingPage, MangaDetail, PageImageSet};
use crate::normalize;
use crate::relay::{ImageRelay, RelayedImage};
use reqwest::Url;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

/// Content-ready signal for the rendered reader page: either the page
/// selector dropdown or the first page image.
const IMAGE_READY_SELECTOR: &str = "select, img";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ListingKind {
    Popular,
    Latest,
    Search,
}

impl ListingKind {
    fn name(self) -> &'static str {
        match self {
            ListingKind::Popular => "popular",
            ListingKind::Latest => "latest",
            ListingKind::Search => "search",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ListingKey {
    kind: ListingKind,
    query: String,
    page: u32,
}

pub struct Pipeline {
    config: Config,
    http: HttpClient,
    render: OnceCell<RenderPool>,
    relay: ImageRelay,
    metrics: MetricsTracker,
    listing_cache: ResponseCache<ListingKey, ListingPage>,
    detail_cache: ResponseCache<String, MangaDetail>,
    chapters_cache: ResponseCache<String, Vec<ChapterRef>>,
    images_cache: ResponseCache<String, PageImageSet>,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self, Error> {
        let http = HttpClient::new(config.fetch.clone()).map_err(|e| {
            Error::Fetch(FetchError::Upstream {
                url: config.base_url.clone(),
                detail: format!("http client construction: {}", e),
            })
        })?;
        let relay = ImageRelay::new(config.clone(), http.inner().clone());
        let ttl = Duration::from_secs(config.cache.ttl_secs);
        let capacity = config.cache.capacity;

        Ok(Self {
            http,
            relay,
            render: OnceCell::new(),
            metrics: MetricsTracker::new(),
            listing_cache: ResponseCache::new(ttl, capacity),
            detail_cache: ResponseCache::new(ttl, capacity),
            chapters_cache: ResponseCache::new(ttl, capacity),
            images_cache: ResponseCache::new(ttl, capacity),
            config,
        })
    }

    /// Popular (ongoing) manga, one upstream page per call.
    pub async fn popular(&self, page: u32) -> Result<ListingPage, Error> {
        validate_page(page)?;
        let url = self.popular_url(page);
        self.listing(ListingKind::Popular, url, String::new(), page)
            .await
    }

    /// Latest updated manga, one upstream page per call.
    pub async fn latest(&self, page: u32) -> Result<ListingPage, Error> {
        validate_page(page)?;
        let url = self.latest_url(page);
        self.listing(ListingKind::Latest, url, String::new(), page)
            .await
    }

    /// Title search. The upstream filters client-side, so the pipeline
    /// fetches the listing and applies the title filter itself.
    pub async fn search(&self, query: &str, page: u32) -> Result<ListingPage, Error> {
        validate_page(page)?;
        let url = self.search_url(query, page)?;
        self.listing(ListingKind::Search, url, query.to_string(), page)
            .await
    }

    /// Full detail record for one manga, chapters included.
    pub async fn detail(&self, url: &str) -> Result<MangaDetail, Error> {
        let canonical = self.validate_upstream_url(url)?;
        let target = canonical.clone();
        self.detail_cache
            .get_or_fetch(canonical.clone(), || async move {
                let fetched = self.timed_fetch("detail", &target).await?;
                let mut detail =
                    extract::extract_detail(&fetched.raw_content, &fetched.final_url)?;
                let raw = extract::extract_chapters(&fetched.raw_content, &fetched.final_url)?;
                detail.chapters = normalize::normalize_chapters(raw);
                // Keep the caller's canonical key, not the post-redirect URL,
                // so downstream joins stay stable
                detail.detail_url = target;
                Ok(detail)
            })
            .await
    }

    /// Chapter list in ascending canonical order.
    pub async fn chapters(&self, url: &str) -> Result<Vec<ChapterRef>, Error> {
        let canonical = self.validate_upstream_url(url)?;
        let target = canonical.clone();
        self.chapters_cache
            .get_or_fetch(canonical, || async move {
                let fetched = self.timed_fetch("chapters", &target).await?;
                let raw = extract::extract_chapters(&fetched.raw_content, &fetched.final_url)?;
                Ok(normalize::normalize_chapters(raw))
            })
            .await
    }

    /// Ordered page-image URLs for one chapter. The reader page hydrates
    /// client-side, so this always goes through the render pool.
    pub async fn chapter_images(&self, url: &str) -> Result<PageImageSet, Error> {
        let canonical = self.validate_upstream_url(url)?;
        let target = canonical.clone();
        self.images_cache
            .get_or_fetch(canonical, || async move {
                let fetched = self.timed_render("chapter_images", &target).await?;
                let images = extract::extract_images(&fetched.raw_content, &fetched.final_url)?;
                if images.is_empty() {
                    return Err(Error::NoContent {
                        operation: "chapter_images",
                        url: target,
                    });
                }
                Ok(images)
            })
            .await
    }

    /// Stream one upstream image through the service identity.
    pub async fn relay_image(&self, url: &str) -> Result<RelayedImage, Error> {
        let start = Instant::now();
        match self.relay.relay(url).await {
            Ok(image) => {
                self.metrics.record_success("relay", start.elapsed());
                Ok(image)
            }
            Err(e) => {
                self.metrics.record_failure("relay", e.to_string());
                Err(Error::Relay(e))
            }
        }
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    async fn listing(
        &self,
        kind: ListingKind,
        url: String,
        query: String,
        page: u32,
    ) -> Result<ListingPage, Error> {
        let key = ListingKey {
            kind,
            query: query.clone(),
            page,
        };
        let operation = kind.name();
        self.listing_cache
            .get_or_fetch(key, || async move {
                let fetched = self.timed_fetch(operation, &url).await?;
                let extraction = extract::extract_listing_page(
                    &fetched.raw_content,
                    &fetched.final_url,
                    page,
                    operation,
                )?;
                let entries = if kind == ListingKind::Search {
                    normalize::filter_by_title(extraction.entries, &query)
                } else {
                    extraction.entries
                };
                Ok(ListingPage {
                    entries,
                    page,
                    has_next: extraction.has_next,
                })
            })
            .await
    }

    async fn timed_fetch(&self, operation: &'static str, url: &str) -> Result<FetchResult, Error> {
        let start = Instant::now();
        match self.http.fetch(url).await {
            Ok(fetched) => {
                self.metrics.record_success(operation, start.elapsed());
                Ok(fetched)
            }
            Err(e) => {
                self.metrics.record_failure(operation, e.to_string());
                Err(Error::Fetch(e))
            }
        }
    }

    async fn timed_render(&self, operation: &'static str, url: &str) -> Result<FetchResult, Error> {
        let pool = self.render_pool().await?;
        let start = Instant::now();
        match pool.render(url, IMAGE_READY_SELECTOR).await {
            Ok(fetched) => {
                self.metrics.record_success(operation, start.elapsed());
                Ok(fetched)
            }
            Err(e) => {
                self.metrics.record_failure(operation, e.to_string());
                Err(Error::Fetch(e))
            }
        }
    }

    /// The browser is expensive; launch it on first use only.
    async fn render_pool(&self) -> Result<&RenderPool, Error> {
        self.render
            .get_or_try_init(|| async {
                RenderPool::new(self.config.render.clone()).map_err(Error::Fetch)
            })
            .await
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn popular_url(&self, page: u32) -> String {
        format!("{}/status/ongoing/?page={}", self.base(), page)
    }

    fn latest_url(&self, page: u32) -> String {
        if page == 1 {
            self.base().to_string()
        } else {
            format!("{}/?page={}", self.base(), page)
        }
    }

    fn search_url(&self, query: &str, page: u32) -> Result<String, ValidationError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|_| ValidationError::MalformedUrl(self.config.base_url.clone()))?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("page", &page.to_string());
        Ok(url.to_string())
    }

    /// Resolve and allow-list a caller-supplied URL before any network call.
    /// Relative paths are resolved against the configured upstream.
    fn validate_upstream_url(&self, url: &str) -> Result<String, ValidationError> {
        let resolved = if url.starts_with('/') {
            Url::parse(&self.config.base_url)
                .and_then(|base| base.join(url))
                .map_err(|_| ValidationError::MalformedUrl(url.to_string()))?
        } else {
            Url::parse(url).map_err(|_| ValidationError::MalformedUrl(url.to_string()))?
        };

        let host = resolved.host_str().unwrap_or("");
        if !self.config.is_upstream_host(host) {
            return Err(ValidationError::DisallowedHost(host.to_string()));
        }
        Ok(resolved.to_string())
    }
}

fn validate_page(page: u32) -> Result<(), ValidationError> {
    if page < 1 {
        return Err(ValidationError::BadPageNumber(page));
    }
    Ok(())
}
