//! Scrape-and-normalize pipeline for a JS-rendering manga catalog site.
//!
//! Turns the upstream's HTML into typed data: paged listings, manga detail,
//! canonically ordered chapter lists, and ordered page-image URLs, plus an
//! image relay that streams page images through the service identity.
//!
//! [`Pipeline`] is the entry point; everything else is the machinery behind
//! its six operations.

pub mod browser_client;
pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod http_client;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod relay;

pub use config::Config;
pub use error::{Error, FetchError, ParseError, RelayError, ValidationError};
pub use models::{
    ChapterRef, FetchResult, ListingPage, MangaDetail, MangaStatus, MangaSummary, PageImageSet,
};
pub use pipeline::Pipeline;
pub use relay::RelayedImage;
