//! Error taxonomy for the pipeline.
//!
//! Every public operation returns a typed `Result`; nothing in this crate is
//! allowed to panic its way out of a bad upstream response.

use std::sync::Arc;
use thiserror::Error;

/// Errors from the fetch layer (plain HTTP or headless render).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("upstream returned 403 for {url}")]
    Forbidden { url: String },

    #[error("upstream returned 404 for {url}")]
    NotFound { url: String },

    #[error("upstream rate limited requests to {url}")]
    RateLimited { url: String },

    #[error("upstream request to {url} failed: {detail}")]
    Upstream { url: String, detail: String },

    #[error("headless render of {url} failed: {detail}")]
    Render { url: String, detail: String },
}

/// The document structure did not match what the extractor expects.
///
/// Never retried: a structure mismatch means the upstream layout changed and
/// a selector table needs updating, not that the network hiccuped.
#[derive(Debug, Error)]
#[error("{operation}: expected page elements missing at {url}")]
pub struct ParseError {
    pub operation: &'static str,
    pub url: String,
}

/// Errors from the image relay path.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay refused for non-allow-listed url {url}")]
    Disallowed { url: String },

    #[error("upstream image unavailable at {url}: {detail}")]
    UpstreamUnavailable { url: String, detail: String },
}

/// Input rejected before any network call was made.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("page number must be >= 1, got {0}")]
    BadPageNumber(u32),

    #[error("url host does not belong to the configured upstream: {0}")]
    DisallowedHost(String),

    #[error("malformed url: {0}")]
    MalformedUrl(String),
}

/// Top-level pipeline error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The page parsed fine but held no content for this operation
    /// (e.g. an empty chapter image set). Distinct from `Parse`, which
    /// signals a broken layout.
    #[error("no content found for {operation} at {url}")]
    NoContent {
        operation: &'static str,
        url: String,
    },

    /// An error produced by the single in-flight fetch for a cache key and
    /// shared with every caller that was awaiting it.
    #[error("{0}")]
    Shared(Arc<Error>),

    /// The in-flight fetch this caller was awaiting went away before
    /// completing (its leader was canceled).
    #[error("in-flight fetch for this key was canceled")]
    Canceled,
}

impl Error {
    /// True when a retry at the caller level could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Fetch(FetchError::Timeout { .. })
            | Error::Fetch(FetchError::RateLimited { .. })
            | Error::Fetch(FetchError::Upstream { .. })
            | Error::Canceled => true,
            Error::Shared(inner) => inner.is_transient(),
            _ => false,
        }
    }
}
