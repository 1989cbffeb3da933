use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default upstream host being scraped.
pub const DEFAULT_BASE_URL: &str = "https://www.leercapitulo.co";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Upstream site root; its host is the fetch allow-list.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Additional hosts the image relay may proxy (cover/page CDNs).
    #[serde(default)]
    pub extra_image_hosts: Vec<String>,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    /// Timeout for a single HTTP request in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum number of retry attempts for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial retry delay in milliseconds
    #[serde(default = "default_initial_retry_delay")]
    pub initial_retry_delay_ms: u64,

    /// Maximum retry delay in milliseconds
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    /// Backoff before the single retry after a 429
    #[serde(default = "default_rate_limit_backoff")]
    pub rate_limit_backoff_ms: u64,

    /// Enable cookie support
    #[serde(default = "default_true")]
    pub enable_cookies: bool,

    /// Enable gzip/brotli compression
    #[serde(default = "default_true")]
    pub enable_compression: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    /// Browser headless mode
    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default = "default_window_width")]
    pub window_width: u32,

    #[serde(default = "default_window_height")]
    pub window_height: u32,

    /// Timeout for one render (navigation + hydration) in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Disable image loading in the browser (faster hydration)
    #[serde(default = "default_true")]
    pub disable_images: bool,

    /// Maximum concurrent render tabs; callers beyond this queue
    #[serde(default = "default_max_concurrent_renders")]
    pub max_concurrent: usize,

    /// How long a caller may wait in the render queue, in seconds
    #[serde(default = "default_queue_timeout")]
    pub queue_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Time-to-live for cached responses in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Maximum cached entries per operation kind
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_true() -> bool {
    true
}
fn default_timeout() -> u64 {
    30
}
fn default_max_retries() -> usize {
    3
}
fn default_initial_retry_delay() -> u64 {
    500
}
fn default_max_retry_delay() -> u64 {
    8000
}
fn default_rate_limit_backoff() -> u64 {
    5000
}
fn default_window_width() -> u32 {
    1920
}
fn default_window_height() -> u32 {
    1080
}
fn default_max_concurrent_renders() -> usize {
    2
}
fn default_queue_timeout() -> u64 {
    20
}
fn default_cache_ttl() -> u64 {
    600
}
fn default_cache_capacity() -> usize {
    256
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            initial_retry_delay_ms: 500,
            max_retry_delay_ms: 8000,
            rate_limit_backoff_ms: 5000,
            enable_cookies: true,
            enable_compression: true,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            timeout_secs: 30,
            disable_images: true,
            max_concurrent: 2,
            queue_timeout_secs: 20,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            capacity: 256,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            extra_image_hosts: Vec::new(),
            fetch: FetchConfig::default(),
            render: RenderConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let path = Path::new("config.toml");
        if path.exists() {
            if let Ok(content) = fs::read_to_string(path) {
                if let Ok(cfg) = toml::from_str::<Config>(&content) {
                    return cfg;
                }
            }
        }
        Self::default()
    }

    /// Host of the upstream site, if `base_url` parses.
    pub fn upstream_host(&self) -> Option<String> {
        reqwest::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
    }

    /// True when `host` is the configured upstream (www-insensitive).
    pub fn is_upstream_host(&self, host: &str) -> bool {
        match self.upstream_host() {
            Some(upstream) => hosts_match(&upstream, host),
            None => false,
        }
    }

    /// True when `host` may be proxied by the image relay: the upstream
    /// itself plus any configured image CDN hosts.
    pub fn is_allowed_image_host(&self, host: &str) -> bool {
        self.is_upstream_host(host)
            || self
                .extra_image_hosts
                .iter()
                .any(|allowed| hosts_match(allowed, host))
    }
}

fn hosts_match(a: &str, b: &str) -> bool {
    let strip = |h: &str| {
        h.strip_prefix("www.")
            .map(|s| s.to_string())
            .unwrap_or_else(|| h.to_string())
            .to_lowercase()
    };
    strip(a) == strip(b)
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RenderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout_secs)
    }
}
