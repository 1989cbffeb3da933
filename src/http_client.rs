use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::models::FetchResult;
use rand::Rng;
use reqwest::{Client, ClientBuilder, StatusCode};
use std::time::Duration;
use tokio::time::sleep;

/// User agents to rotate through to avoid bot detection
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

/// HTTP fetch path: direct GET with a realistic browser identity, bounded
/// retry with exponential backoff for transient failures.
pub struct HttpClient {
    client: Client,
    config: FetchConfig,
}

impl HttpClient {
    pub fn new(config: FetchConfig) -> Result<Self, reqwest::Error> {
        let mut builder = ClientBuilder::new()
            .timeout(config.timeout())
            .user_agent(random_user_agent())
            .cookie_store(config.enable_cookies)
            .gzip(config.enable_compression)
            .brotli(config.enable_compression)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .pool_idle_timeout(Some(Duration::from_secs(90)));

        // Default headers that mimic a real browser
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8".parse().unwrap());
        headers.insert("Accept-Language", "es-ES,es;q=0.9,en;q=0.8".parse().unwrap());
        headers.insert("DNT", "1".parse().unwrap());
        headers.insert("Connection", "keep-alive".parse().unwrap());
        headers.insert("Upgrade-Insecure-Requests", "1".parse().unwrap());
        headers.insert("Sec-Fetch-Dest", "document".parse().unwrap());
        headers.insert("Sec-Fetch-Mode", "navigate".parse().unwrap());
        headers.insert("Sec-Fetch-Site", "none".parse().unwrap());
        headers.insert("Cache-Control", "no-cache".parse().unwrap());
        builder = builder.default_headers(headers);

        let client = builder.build()?;
        Ok(Self { client, config })
    }

    /// Fetch a page, retrying transient failures per the configured bounds.
    ///
    /// Retry policy: connection errors, timeouts and 5xx are retried up to
    /// `max_retries` with exponential backoff and jitter. A 429 gets a single
    /// longer backoff retry. Other 4xx surface immediately.
    pub async fn fetch(&self, url: &str) -> Result<FetchResult, FetchError> {
        let mut attempt = 0usize;
        let mut rate_limit_retried = false;

        loop {
            let request = self
                .client
                .get(url)
                .header("User-Agent", random_user_agent());

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let final_url = response.url().clone();
                        let raw_content =
                            response.text().await.map_err(|e| FetchError::Upstream {
                                url: url.to_string(),
                                detail: format!("body read failed: {}", e),
                            })?;
                        return Ok(FetchResult {
                            raw_content,
                            final_url,
                            rendered: false,
                        });
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        if rate_limit_retried {
                            return Err(FetchError::RateLimited {
                                url: url.to_string(),
                            });
                        }
                        rate_limit_retried = true;
                        log::warn!(
                            "429 from {}, backing off {}ms before the one retry",
                            url,
                            self.config.rate_limit_backoff_ms
                        );
                        sleep(Duration::from_millis(self.config.rate_limit_backoff_ms)).await;
                        continue;
                    }

                    if let Some(err) = classify_terminal_status(status, url) {
                        return Err(err);
                    }

                    // Retryable server-side status
                    if attempt < self.config.max_retries {
                        log::warn!(
                            "status {} from {}, attempt {}/{}",
                            status,
                            url,
                            attempt + 1,
                            self.config.max_retries + 1
                        );
                        sleep(self.retry_delay(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::Upstream {
                        url: url.to_string(),
                        detail: format!("status {} after {} attempts", status, attempt + 1),
                    });
                }
                Err(e) => {
                    let transient = e.is_timeout() || e.is_connect() || e.is_request();
                    if transient && attempt < self.config.max_retries {
                        log::warn!(
                            "request to {} failed, attempt {}/{}: {}",
                            url,
                            attempt + 1,
                            self.config.max_retries + 1,
                            e
                        );
                        sleep(self.retry_delay(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(if e.is_timeout() {
                        FetchError::Timeout {
                            url: url.to_string(),
                        }
                    } else {
                        FetchError::Upstream {
                            url: url.to_string(),
                            detail: e.to_string(),
                        }
                    });
                }
            }
        }
    }

    /// Exponential backoff with jitter to avoid thundering herd
    fn retry_delay(&self, attempt: usize) -> Duration {
        let base_delay = self.config.initial_retry_delay_ms;
        let max_delay = self.config.max_retry_delay_ms;
        let delay_ms = (base_delay * 2u64.pow(attempt as u32)).min(max_delay);

        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(0.75..=1.25);
        Duration::from_millis((delay_ms as f64 * jitter) as u64)
    }

    /// The underlying reqwest client, shared with the image relay.
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Pick a random browser identity from the pool
fn random_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    let index = rng.gen_range(0..USER_AGENTS.len());
    USER_AGENTS[index]
}

/// Map a non-retryable error status to its typed error, or `None` when the
/// status should go through the retry path (5xx and Cloudflare's 52x family).
fn classify_terminal_status(status: StatusCode, url: &str) -> Option<FetchError> {
    match status.as_u16() {
        404 | 410 => Some(FetchError::NotFound {
            url: url.to_string(),
        }),
        401 | 403 => Some(FetchError::Forbidden {
            url: url.to_string(),
        }),
        // Server and Cloudflare errors are retryable
        500..=599 => None,
        s if (400..500).contains(&s) => Some(FetchError::Upstream {
            url: url.to_string(),
            detail: format!("unexpected status {}", status),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use mockito::Server;

    /// Short backoff windows so retry tests finish quickly.
    fn quick_config() -> FetchConfig {
        FetchConfig {
            timeout_secs: 5,
            max_retries: 3,
            initial_retry_delay_ms: 300,
            max_retry_delay_ms: 600,
            rate_limit_backoff_ms: 50,
            enable_cookies: false,
            enable_compression: false,
        }
    }

    #[test]
    fn client_creation() {
        let client = HttpClient::new(FetchConfig::default());
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn transient_server_errors_retry_until_success() {
        let mut server = Server::new_async().await;
        let url = format!("{}/manga/x/", server.url());
        let failing = server
            .mock("GET", "/manga/x/")
            .with_status(500)
            .create_async()
            .await;

        let client = HttpClient::new(quick_config()).unwrap();
        let fetch = client.fetch(&url);
        let heal = async {
            // Let the first attempt hit the 500, then heal the upstream
            // before the first backoff elapses
            tokio::time::sleep(Duration::from_millis(100)).await;
            failing.remove_async().await;
            server
                .mock("GET", "/manga/x/")
                .with_status(200)
                .with_body("<html><h1>ok</h1></html>")
                .create_async()
                .await
        };

        let (result, _healthy) = tokio::join!(fetch, heal);
        let fetched = result.unwrap();
        assert!(fetched.raw_content.contains("ok"));
        assert!(!fetched.rendered);
    }

    #[tokio::test]
    async fn rate_limit_gets_exactly_one_retry() {
        let mut server = Server::new_async().await;
        let url = format!("{}/manga/x/", server.url());
        let mock = server
            .mock("GET", "/manga/x/")
            .with_status(429)
            .expect(2)
            .create_async()
            .await;

        let client = HttpClient::new(quick_config()).unwrap();
        let err = client.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimited { .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn not_found_is_terminal_without_retry() {
        let mut server = Server::new_async().await;
        let url = format!("{}/manga/gone/", server.url());
        let mock = server
            .mock("GET", "/manga/gone/")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let client = HttpClient::new(quick_config()).unwrap();
        let err = client.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound { .. }));
        mock.assert_async().await;
    }

    #[test]
    fn random_user_agent_comes_from_pool() {
        let ua = random_user_agent();
        assert!(USER_AGENTS.contains(&ua));
    }

    #[test]
    fn retry_delay_grows() {
        let client = HttpClient::new(FetchConfig::default()).unwrap();
        let d0 = client.retry_delay(0);
        let d3 = client.retry_delay(3);
        assert!(d0.as_millis() > 0);
        // 500 * 2^3 = 4000ms, jitter bounded by ±25%
        assert!(d3.as_millis() >= 3000);
        assert!(d3.as_millis() <= 5000);
    }

    #[test]
    fn terminal_status_classification() {
        let url = "https://www.leercapitulo.co/manga/x";
        assert!(matches!(
            classify_terminal_status(StatusCode::NOT_FOUND, url),
            Some(FetchError::NotFound { .. })
        ));
        assert!(matches!(
            classify_terminal_status(StatusCode::FORBIDDEN, url),
            Some(FetchError::Forbidden { .. })
        ));
        assert!(matches!(
            classify_terminal_status(StatusCode::BAD_REQUEST, url),
            Some(FetchError::Upstream { .. })
        ));
        // 5xx goes through the retry path
        assert!(classify_terminal_status(StatusCode::BAD_GATEWAY, url).is_none());
        assert!(classify_terminal_status(StatusCode::SERVICE_UNAVAILABLE, url).is_none());
    }
}
