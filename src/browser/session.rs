//! Chromium-backed implementation of the browser facade

use super::BrowserError;
use chromiumoxide::{
    browser::{Browser, BrowserConfig},
    cdp::browser_protocol::input::InsertTextParams,
    cdp::browser_protocol::network::{CookieParam, TimeSinceEpoch},
    cdp::browser_protocol::page::CaptureScreenshotFormat,
    cdp::js_protocol::runtime::{AddBindingParams, EventBindingCalled},
    page::ScreenshotParams,
    Page,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Navigation deadline
const NAV_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval for element waits
const ELEMENT_POLL: Duration = Duration::from_millis(250);

/// Default viewport dimensions
const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
const DEFAULT_VIEWPORT_HEIGHT: u32 = 800;

/// Desktop user agent. The chat site serves a degraded page to headless UAs.
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/118 Safari/537.36";

/// The one persistent browser context/page the whole process shares.
///
/// There is no internal concurrency control: exactly one caller may drive
/// mutating operations at a time. The conversation queue is the enforcement
/// point for that.
pub struct BrowserSession {
    #[allow(dead_code)] // Browser must stay alive
    browser: Browser,
    #[allow(dead_code)] // Task must stay alive
    handler_task: JoinHandle<()>,
    page: Page,
}

impl BrowserSession {
    /// Directory where the fetcher caches downloaded Chrome binaries
    fn fetcher_cache_dir() -> PathBuf {
        let base = std::env::var("HOME").map_or_else(|_| PathBuf::from("/tmp"), PathBuf::from);
        base.join(".cache/chatghost/chromium")
    }

    fn browser_config(executable: Option<&Path>) -> Result<BrowserConfig, BrowserError> {
        // Per-launch profile dir; login state is carried by the cookie blob,
        // not the profile, so a stale dir must never shadow it.
        let user_data_dir = format!("/tmp/chatghost-profile-{}", uuid::Uuid::new_v4());

        let mut builder = BrowserConfig::builder()
            .new_headless_mode()
            .no_sandbox()
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .user_data_dir(&user_data_dir)
            .viewport(chromiumoxide::handler::viewport::Viewport {
                width: DEFAULT_VIEWPORT_WIDTH,
                height: DEFAULT_VIEWPORT_HEIGHT,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            });

        if let Some(path) = executable {
            builder = builder.chrome_executable(path);
        }

        builder.build().map_err(BrowserError::Launch)
    }

    async fn launch_and_init(executable: Option<&Path>) -> Result<Self, BrowserError> {
        let config = Self::browser_config(executable)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!("CDP handler error: {e}");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        page.set_user_agent(USER_AGENT).await?;

        Ok(Self {
            browser,
            handler_task,
            page,
        })
    }

    /// Launch the browser session.
    ///
    /// Tries system Chrome first (zero download). On failure, downloads a
    /// compatible Chromium via the fetcher and caches it for future runs.
    pub async fn launch() -> Result<Self, BrowserError> {
        match Self::launch_and_init(None).await {
            Ok(session) => return Ok(session),
            Err(e) => {
                tracing::info!("System Chrome not available ({e}), trying fetcher...");
            }
        }

        let cache_dir = Self::fetcher_cache_dir();
        tracing::info!("Downloading Chrome to {cache_dir:?} (first run only)...");

        std::fs::create_dir_all(&cache_dir).map_err(|e| {
            BrowserError::Launch(format!(
                "Failed to create cache dir {}: {e}",
                cache_dir.display()
            ))
        })?;

        let fetcher_opts = chromiumoxide::fetcher::BrowserFetcherOptions::builder()
            .with_path(&cache_dir)
            .build()
            .map_err(|e| BrowserError::Launch(format!("Fetcher config error: {e}")))?;

        let fetcher = chromiumoxide::fetcher::BrowserFetcher::new(fetcher_opts);
        let info = fetcher
            .fetch()
            .await
            .map_err(|e| BrowserError::Launch(format!("Chrome download failed: {e:#}")))?;

        tracing::info!("Using Chrome at {:?}", info.executable_path);

        Self::launch_and_init(Some(&info.executable_path)).await
    }

    pub async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        match tokio::time::timeout(NAV_TIMEOUT, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BrowserError::Operation(format!("navigation failed: {e}"))),
            Err(_) => Err(BrowserError::Operation(format!(
                "timeout after {NAV_TIMEOUT:?} waiting for {url}"
            ))),
        }
    }

    /// Wait until `selector` matches, polling up to `timeout`.
    pub async fn wait_for_element(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::ElementNotFound(selector.to_string()));
            }
            tokio::time::sleep(ELEMENT_POLL).await;
        }
    }

    /// Number of elements currently matching `selector`. Query errors read
    /// as zero matches.
    pub async fn query_all(&self, selector: &str) -> usize {
        self.page
            .find_elements(selector)
            .await
            .map(|els| els.len())
            .unwrap_or(0)
    }

    pub async fn exists(&self, selector: &str) -> bool {
        self.query_all(selector).await > 0
    }

    /// Click the first element matching `selector`.
    pub async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;
        element.click().await?;
        Ok(())
    }

    /// Type text into the first element matching `selector` with the
    /// driver's per-key pacing.
    pub async fn type_into(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;
        element.focus().await?;
        element.type_str(text).await?;
        Ok(())
    }

    /// Press a named key while `selector` has focus.
    pub async fn press_key(&self, selector: &str, key: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;
        element.press_key(key).await?;
        Ok(())
    }

    /// Insert raw text at the current focus without key events. A `"\n"`
    /// lands as a soft newline: the input grows a line, nothing submits.
    pub async fn insert_text(&self, text: &str) -> Result<(), BrowserError> {
        let params = InsertTextParams::builder()
            .text(text)
            .build()
            .map_err(BrowserError::Operation)?;
        self.page.execute(params).await?;
        Ok(())
    }

    pub async fn evaluate(&self, js: &str) -> Result<serde_json::Value, BrowserError> {
        let result = self.page.evaluate(js).await?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    /// Full-page screenshot written to `path`.
    pub async fn screenshot_page(&self, path: &Path) -> Result<(), BrowserError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        self.page.save_screenshot(params, path).await?;
        Ok(())
    }

    /// PNG screenshot of the first element matching `selector`.
    pub async fn screenshot_element(&self, selector: &str) -> Result<Vec<u8>, BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;
        let bytes = element.screenshot(CaptureScreenshotFormat::Png).await?;
        Ok(bytes)
    }

    /// Register a page→host binding callable as `window.<name>(payload)`.
    pub async fn install_binding(&self, name: &str) -> Result<(), BrowserError> {
        let params = AddBindingParams::builder()
            .name(name)
            .build()
            .map_err(BrowserError::Operation)?;
        self.page.execute(params).await?;
        Ok(())
    }

    /// Stream of payload strings delivered through the named binding.
    pub async fn binding_payloads(
        &self,
        name: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = String> + Send>>, BrowserError> {
        let name = name.to_string();
        let events = self.page.event_listener::<EventBindingCalled>().await?;
        let stream = events.filter_map(move |event| {
            let name = name.clone();
            async move {
                if event.name == name {
                    Some(event.payload.clone())
                } else {
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }

    /// Snapshot the session cookies to a JSON blob at `path`. Idempotent:
    /// repeated calls overwrite the same blob.
    pub async fn persist_session(&self, path: &Path) -> Result<(), BrowserError> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| BrowserError::SessionPersist(e.to_string()))?;

        let blob: Vec<SessionCookie> = cookies
            .into_iter()
            .map(|c| SessionCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires: c.expires,
                http_only: c.http_only,
                secure: c.secure,
            })
            .collect();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BrowserError::SessionPersist(e.to_string()))?;
        }
        write_session_blob(path, &blob)
            .await
            .map_err(|e| BrowserError::SessionPersist(e.to_string()))?;

        tracing::info!(path = %path.display(), cookies = blob.len(), "session blob persisted");
        Ok(())
    }

    /// Restore a previously persisted session blob, if one exists.
    ///
    /// Returns false (not an error) when there is nothing to restore. Must
    /// run before the first navigation to the chat URL to take effect.
    pub async fn restore_session(&self, path: &Path) -> Result<bool, BrowserError> {
        let blob = match read_session_blob(path).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return Ok(false),
            Err(e) => {
                // A corrupt blob is equivalent to no blob; the operator
                // re-scans the login code.
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable session blob");
                return Ok(false);
            }
        };

        let params: Vec<CookieParam> = blob
            .iter()
            .filter_map(|c| cookie_param(c).ok())
            .collect();

        let count = params.len();
        self.page.set_cookies(params).await?;
        tracing::info!(path = %path.display(), cookies = count, "session blob restored");
        Ok(true)
    }
}

/// One cookie in the session blob. The blob schema is ours, not the
/// driver's, so a driver upgrade cannot silently invalidate stored sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: f64,
    pub http_only: bool,
    pub secure: bool,
}

fn cookie_param(c: &SessionCookie) -> Result<CookieParam, String> {
    let mut builder = CookieParam::builder()
        .name(&c.name)
        .value(&c.value)
        .domain(&c.domain)
        .path(&c.path)
        .http_only(c.http_only)
        .secure(c.secure);
    if c.expires > 0.0 {
        builder = builder.expires(TimeSinceEpoch::new(c.expires));
    }
    builder.build()
}

async fn write_session_blob(path: &Path, blob: &[SessionCookie]) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(blob)?;
    tokio::fs::write(path, json).await
}

async fn read_session_blob(path: &Path) -> std::io::Result<Option<Vec<SessionCookie>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod blob_tests {
    use super::*;

    fn sample() -> Vec<SessionCookie> {
        vec![
            SessionCookie {
                name: "wa_session".to_string(),
                value: "abc123".to_string(),
                domain: ".web.whatsapp.com".to_string(),
                path: "/".to_string(),
                expires: 1_900_000_000.0,
                http_only: true,
                secure: true,
            },
            SessionCookie {
                name: "transient".to_string(),
                value: "x".to_string(),
                domain: "web.whatsapp.com".to_string(),
                path: "/".to_string(),
                expires: -1.0,
                http_only: false,
                secure: false,
            },
        ]
    }

    #[tokio::test]
    async fn blob_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let blob = sample();
        write_session_blob(&path, &blob).await.unwrap();
        let restored = read_session_blob(&path).await.unwrap().unwrap();
        assert_eq!(restored, blob);
    }

    #[tokio::test]
    async fn missing_blob_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(read_session_blob(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overwrite_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        write_session_blob(&path, &sample()).await.unwrap();
        write_session_blob(&path, &sample()).await.unwrap();
        let restored = read_session_blob(&path).await.unwrap().unwrap();
        assert_eq!(restored.len(), 2);
    }

    #[test]
    fn session_cookies_skip_expiry() {
        let blob = sample();
        let param = cookie_param(&blob[0]).unwrap();
        assert!(param.expires.is_some());
        let param = cookie_param(&blob[1]).unwrap();
        assert!(param.expires.is_none());
    }
}
