//! Rendering fetch path for pages that hydrate content client-side.
//!
//! One shared headless Chrome instance, one tab per render, bounded by a
//! semaphore so concurrent callers queue instead of spawning unbounded
//! browser contexts. Tabs are always closed when a render finishes, whether
//! it succeeded or not.

use crate::config::RenderConfig;
use crate::error::FetchError;
use crate::models::FetchResult;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const ACCEPT_LANGUAGE: &str = "es-ES,es";

/// Bounded pool of render slots over a single shared browser.
pub struct RenderPool {
    browser: Arc<Browser>,
    permits: Arc<Semaphore>,
    config: RenderConfig,
}

impl RenderPool {
    pub fn new(config: RenderConfig) -> Result<Self, FetchError> {
        let images_arg = if config.disable_images {
            Some("--blink-settings=imagesEnabled=false".to_string())
        } else {
            None
        };
        let user_agent_arg = format!("--user-agent={}", USER_AGENT);

        let mut args: Vec<&OsStr> = vec![
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-setuid-sandbox"),
        ];
        if let Some(ref img) = images_arg {
            args.push(OsStr::new(img));
        }
        args.push(OsStr::new(&user_agent_arg));

        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .window_size(Some((config.window_width, config.window_height)))
            .args(args)
            .build()
            .map_err(|e| FetchError::Render {
                url: String::new(),
                detail: format!("launch options: {}", e),
            })?;

        let browser = Browser::new(launch_options).map_err(|e| FetchError::Render {
            url: String::new(),
            detail: format!("browser launch: {}", e),
        })?;

        Ok(Self {
            browser: Arc::new(browser),
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
        })
    }

    /// Load `url`, wait until `ready_selector` matches (the content-ready
    /// signal), and return the fully hydrated document.
    ///
    /// Queues behind the pool's concurrency limit; queueing beyond
    /// `queue_timeout` fails instead of piling up. The render itself runs on
    /// the blocking thread pool with an overall timeout.
    pub async fn render(&self, url: &str, ready_selector: &str) -> Result<FetchResult, FetchError> {
        let permit = tokio::time::timeout(
            self.config.queue_timeout(),
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| FetchError::Timeout {
            url: url.to_string(),
        })?
        .map_err(|_| FetchError::Render {
            url: url.to_string(),
            detail: "render pool closed".to_string(),
        })?;

        let browser = Arc::clone(&self.browser);
        let target = url.to_string();
        let selector = ready_selector.to_string();
        let wait_timeout = self.config.timeout();

        let handle = tokio::task::spawn_blocking(move || {
            // Permit held for the lifetime of the tab
            let _permit = permit;
            render_blocking(&browser, &target, &selector, wait_timeout)
        });

        // Queue time is already spent; allow the render itself its full
        // timeout plus slack for navigation setup.
        let overall = wait_timeout + Duration::from_secs(10);
        let joined = tokio::time::timeout(overall, handle)
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.to_string(),
            })?
            .map_err(|e| FetchError::Render {
                url: url.to_string(),
                detail: format!("render task failed: {}", e),
            })?;

        let (raw_content, final_url) = joined.map_err(|detail| FetchError::Render {
            url: url.to_string(),
            detail,
        })?;

        let final_url = reqwest::Url::parse(&final_url)
            .or_else(|_| reqwest::Url::parse(url))
            .map_err(|e| FetchError::Render {
                url: url.to_string(),
                detail: format!("bad final url: {}", e),
            })?;

        Ok(FetchResult {
            raw_content,
            final_url,
            rendered: true,
        })
    }
}

/// Navigate and harvest inside one tab, closing it on every exit path.
fn render_blocking(
    browser: &Browser,
    url: &str,
    ready_selector: &str,
    wait_timeout: Duration,
) -> Result<(String, String), String> {
    let tab = browser.new_tab().map_err(|e| e.to_string())?;
    let result = harvest(&tab, url, ready_selector, wait_timeout);
    if let Err(e) = tab.close(true) {
        log::debug!("tab close after render of {}: {}", url, e);
    }
    result
}

fn harvest(
    tab: &Arc<Tab>,
    url: &str,
    ready_selector: &str,
    wait_timeout: Duration,
) -> Result<(String, String), String> {
    log::info!("rendering {}", url);

    // Registered before navigation: the navigator overrides are installed
    // into every new document, not just about:blank
    tab.enable_stealth_mode().map_err(|e| e.to_string())?;
    tab.set_user_agent(USER_AGENT, Some(ACCEPT_LANGUAGE), None)
        .map_err(|e| e.to_string())?;

    tab.navigate_to(url)
        .map_err(|e| e.to_string())?
        .wait_until_navigated()
        .map_err(|e| e.to_string())?;

    tab.wait_for_element_with_custom_timeout(ready_selector, wait_timeout)
        .map_err(|e| format!("content-ready selector '{}' never matched: {}", ready_selector, e))?;

    // Let late hydration settle
    std::thread::sleep(Duration::from_millis(500));

    let html = tab.get_content().map_err(|e| e.to_string())?;
    Ok((html, tab.get_url()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_defaults() {
        let config = RenderConfig::default();
        assert!(config.headless);
        assert_eq!(config.max_concurrent, 2);
        assert!(config.disable_images);
    }

    #[test]
    #[ignore] // Requires Chrome/Chromium
    fn pool_creation() {
        let pool = RenderPool::new(RenderConfig::default());
        assert!(pool.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires Chrome/Chromium and internet
    async fn render_simple_page() {
        let pool = RenderPool::new(RenderConfig::default()).unwrap();
        let result = pool.render("https://example.com", "body").await;
        assert!(result.is_ok());
        let fetched = result.unwrap();
        assert!(fetched.rendered);
        assert!(fetched.raw_content.contains("Example Domain"));
    }
}
