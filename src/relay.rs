//! Image relay: streams one upstream image through the service identity.
//!
//! The relay bypasses the extractor and normalizer entirely. It refuses any
//! URL whose host is not allow-listed before touching the network, sends the
//! same spoofed browser identity as the fetch path plus an upstream Referer,
//! and hands the body back as a byte stream without buffering the image.
//! No retry here: image loads tolerate client-side retry instead of
//! amplifying load against the upstream.

use crate::config::Config;
use crate::error::RelayError;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{Client, Url};

const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8";
const FALLBACK_CONTENT_TYPE: &str = "image/jpeg";

/// One relayed image: upstream content type plus the body as a stream.
pub struct RelayedImage {
    pub content_type: String,
    pub content_length: Option<u64>,
    pub stream: BoxStream<'static, Result<Bytes, RelayError>>,
}

impl std::fmt::Debug for RelayedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayedImage")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("stream", &"<stream>")
            .finish()
    }
}

pub struct ImageRelay {
    client: Client,
    config: Config,
}

impl ImageRelay {
    /// Shares the fetch path's reqwest client so the relay presents the
    /// same identity and connection pool.
    pub fn new(config: Config, client: Client) -> Self {
        Self { client, config }
    }

    pub async fn relay(&self, url: &str) -> Result<RelayedImage, RelayError> {
        let parsed = Url::parse(url).map_err(|_| RelayError::Disallowed {
            url: url.to_string(),
        })?;
        let host = parsed.host_str().unwrap_or("");
        if !self.config.is_allowed_image_host(host) {
            log::warn!("relay refused for host {:?} ({})", host, url);
            return Err(RelayError::Disallowed {
                url: url.to_string(),
            });
        }

        let response = self
            .client
            .get(parsed)
            .header("Accept", IMAGE_ACCEPT)
            .header("Referer", self.config.base_url.as_str())
            .send()
            .await
            .map_err(|e| RelayError::UpstreamUnavailable {
                url: url.to_string(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::UpstreamUnavailable {
                url: url.to_string(),
                detail: format!("status {}", status),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(FALLBACK_CONTENT_TYPE)
            .to_string();
        let content_length = response.content_length();

        let target = url.to_string();
        let stream = response
            .bytes_stream()
            .map_err(move |e| RelayError::UpstreamUnavailable {
                url: target.clone(),
                detail: e.to_string(),
            })
            .boxed();

        Ok(RelayedImage {
            content_type,
            content_length,
            stream,
        })
    }
}
