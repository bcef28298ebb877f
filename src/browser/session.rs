//! CDP-backed browser session
//!
//! Launches and controls a single Chrome instance over the DevTools
//! protocol and implements [`BrowserControl`] on top of it. Element lookups
//! run as JavaScript snippets that park matched nodes in a page-side
//! registry; handles index into that registry and go stale whenever a
//! reload or navigation replaces the page's window object.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::control::{BrowserControl, Element, ElementId, Locator, Probe};
use super::BrowserError;
use crate::config::Settings;

/// Find Chrome/Chromium executable on the system
fn find_chrome() -> Option<std::path::PathBuf> {
    let candidates: Vec<std::path::PathBuf> = if cfg!(target_os = "windows") {
        let mut paths = vec![
            std::path::PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            std::path::PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        ];
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            paths.push(std::path::PathBuf::from(format!(
                r"{}\Google\Chrome\Application\chrome.exe",
                local
            )));
        }
        paths
    } else if cfg!(target_os = "macos") {
        vec![std::path::PathBuf::from(
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        )]
    } else {
        vec![
            std::path::PathBuf::from("/usr/bin/google-chrome"),
            std::path::PathBuf::from("/usr/bin/google-chrome-stable"),
            std::path::PathBuf::from("/usr/bin/chromium"),
            std::path::PathBuf::from("/usr/bin/chromium-browser"),
        ]
    };

    candidates.into_iter().find(|p| p.exists())
}

/// Configuration for the browser session
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpBrowserConfig {
    /// Path to Chrome/Chromium executable
    pub chrome_path: Option<String>,
    /// Run in headless mode
    pub headless: bool,
    /// Window width
    pub window_width: u32,
    /// Window height
    pub window_height: u32,
    /// Timeout for individual script evaluations
    pub script_timeout_secs: u64,
}

impl Default for CdpBrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: false,
            window_width: 1920,
            window_height: 1080,
            script_timeout_secs: 10,
        }
    }
}

impl CdpBrowserConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            chrome_path: settings.chrome_path.clone(),
            headless: settings.headless,
            ..Default::default()
        }
    }
}

/// A CDP browser session implementing [`BrowserControl`]
pub struct CdpBrowser {
    /// The browser instance
    browser: RwLock<Option<Browser>>,
    /// Current active page
    page: RwLock<Option<Page>>,
    /// Session configuration
    config: CdpBrowserConfig,
    /// Whether the session is alive
    alive: Arc<AtomicBool>,
}

impl CdpBrowser {
    /// Launch a browser session with the given config
    pub async fn launch(config: CdpBrowserConfig) -> Result<Self, BrowserError> {
        info!("Launching browser session (headless: {})", config.headless);

        if config.chrome_path.is_none() && find_chrome().is_none() {
            return Err(BrowserError::LaunchFailed(
                "Chrome not found. Install Google Chrome or Chromium, or set chromePath in the config.".to_string(),
            ));
        }

        let mut builder = BrowserConfig::builder();

        if config.headless {
            // Modern Chrome requires --headless=new for proper headless
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        if let Some(ref path) = config.chrome_path {
            builder = builder.chrome_executable(path);
        } else if let Some(chrome_path) = find_chrome() {
            info!("Auto-detected Chrome at: {}", chrome_path.display());
            builder = builder.chrome_executable(chrome_path);
        }

        builder = builder
            // Anti-detection basics
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-default-browser-check")
            // The ticket site renders English when the browser asks for it
            .arg("--lang=en-US")
            // UI suppression
            .arg("--disable-notifications")
            .arg("--disable-translate")
            .arg("--disable-session-crashed-bubble")
            // Required when running as root (e.g., in Docker or on a VPS)
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .window_size(config.window_width, config.window_height);

        let browser_config = builder
            .build()
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        // Spawn handler in background - when the handler ends, Chrome has
        // disconnected
        let alive_flag = Arc::new(AtomicBool::new(true));
        let alive_for_handler = alive_flag.clone();
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Browser event: {:?}", event);
            }
            warn!("Chrome disconnected (event handler ended)");
            alive_for_handler.store(false, Ordering::Relaxed);
        });

        // Take the tab Chrome opens at startup; close any extras
        let page = {
            let mut pages = browser
                .pages()
                .await
                .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

            let main_page = if !pages.is_empty() {
                pages.remove(0)
            } else {
                browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?
            };

            for extra_page in pages {
                debug!("Closing extra blank tab");
                let _ = extra_page.close().await;
            }

            main_page
        };

        info!("Browser session created");

        Ok(Self {
            browser: RwLock::new(Some(browser)),
            page: RwLock::new(Some(page)),
            config,
            alive: alive_flag,
        })
    }

    /// Check if the session is alive
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Execute JavaScript on the page with the configured default timeout
    pub async fn execute_js(&self, script: &str) -> Result<serde_json::Value, BrowserError> {
        self.execute_js_with_timeout(script, Duration::from_secs(self.config.script_timeout_secs))
            .await
    }

    /// Execute JavaScript on the page with a custom timeout
    pub async fn execute_js_with_timeout(
        &self,
        script: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value, BrowserError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        let result = tokio::time::timeout(timeout, page.evaluate(script))
            .await
            .map_err(|_| {
                BrowserError::Timeout(format!(
                    "JavaScript execution timed out after {}ms",
                    timeout.as_millis()
                ))
            })?
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    /// Run an element query and parse the registry reply.
    async fn query(
        &self,
        scope: Option<ElementId>,
        locator: &Locator,
        all: bool,
    ) -> Result<Vec<Element>, BrowserError> {
        let script = query_script(scope, locator, all);
        let value = self.execute_js(&script).await?;

        let reply: QueryReply = serde_json::from_value(value)
            .map_err(|e| BrowserError::JavaScriptError(format!("Bad query reply: {}", e)))?;

        if reply.stale {
            let scope = scope.map(|s| s.0).unwrap_or_default();
            return Err(BrowserError::StaleElement(format!(
                "Scope element #{} is gone",
                scope
            )));
        }

        Ok(reply
            .elements
            .into_iter()
            .map(|e| Element {
                id: ElementId(e.id),
                text: e.text,
                y: e.y,
                visible: e.visible,
                enabled: e.enabled,
            })
            .collect())
    }
}

#[async_trait]
impl BrowserControl for CdpBrowser {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        debug!("Navigating to: {}", url);
        page.goto(url)
            .await
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;

        Ok(())
    }

    async fn reload(&self, bypass_cache: bool) -> Result<(), BrowserError> {
        // JS reload is faster than a CDP Page.reload round-trip and the
        // boolean argument forces a cache bypass on the engines that honor it
        let script = if bypass_cache {
            "window.location.reload(true)"
        } else {
            "window.location.reload()"
        };
        self.execute_js_with_timeout(script, Duration::from_secs(5))
            .await?;
        Ok(())
    }

    async fn find_element(&self, locator: &Locator) -> Result<Probe, BrowserError> {
        let mut found = self.query(None, locator, false).await?;
        Ok(match found.pop() {
            Some(el) => Probe::Found(el),
            None => Probe::NotFound,
        })
    }

    async fn find_in(&self, scope: ElementId, locator: &Locator) -> Result<Probe, BrowserError> {
        let mut found = self.query(Some(scope), locator, false).await?;
        Ok(match found.pop() {
            Some(el) => Probe::Found(el),
            None => Probe::NotFound,
        })
    }

    async fn find_all_in(
        &self,
        scope: ElementId,
        locator: &Locator,
    ) -> Result<Vec<Element>, BrowserError> {
        self.query(Some(scope), locator, true).await
    }

    async fn wait_for(
        &self,
        locator: &Locator,
        timeout: Duration,
        poll: Duration,
    ) -> Result<Probe, BrowserError> {
        let start = Instant::now();
        loop {
            match self.find_element(locator).await {
                Ok(Probe::Found(el)) => return Ok(Probe::Found(el)),
                Ok(Probe::NotFound) => {}
                // The page may be mid-load; treat as not-there-yet until the
                // timeout elapses
                Err(e) => debug!("Probe for {} errored: {}", locator, e),
            }
            if start.elapsed() >= timeout {
                return Ok(Probe::NotFound);
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn click(&self, element: ElementId) -> Result<(), BrowserError> {
        let script = format!(
            r#"(function() {{
                const reg = window.__sniperReg;
                const node = reg && reg[{id}];
                if (!node || !node.isConnected) return {{ stale: true }};
                node.click();
                return {{ stale: false }};
            }})()"#,
            id = element.0
        );

        let value = self.execute_js(&script).await?;
        if value.get("stale").and_then(|v| v.as_bool()) == Some(true) {
            return Err(BrowserError::StaleElement(format!(
                "Element #{} is gone",
                element.0
            )));
        }
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), BrowserError> {
        let page = self.page.read().await;
        let page = page
            .as_ref()
            .ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        page.save_screenshot(
            ScreenshotParams::builder()
                .format(chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat::Png)
                .full_page(true)
                .build(),
            path,
        )
        .await
        .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        // Mark as not alive first to prevent new operations
        self.alive.store(false, Ordering::Relaxed);

        // 1. Close page first (stops navigation/JS execution)
        {
            let mut page = self.page.write().await;
            if let Some(p) = page.take() {
                let _ = p.close().await;
            }
        }

        // 2. Close browser - try graceful close, give it a moment, then
        //    force kill so no Chrome child process is left behind
        {
            let mut browser = self.browser.write().await;
            if let Some(mut b) = browser.take() {
                let _ = b.close().await;
                tokio::time::sleep(Duration::from_millis(500)).await;
                let _ = b.kill().await;
            }
        }

        info!("Browser session closed");
        Ok(())
    }
}

/// Build the element-query snippet. Matched nodes are pushed into
/// `window.__sniperReg` and addressed by index from then on.
fn query_script(scope: Option<ElementId>, locator: &Locator, all: bool) -> String {
    let scope_expr = match scope {
        None => "document".to_string(),
        Some(id) => format!("(window.__sniperReg || [])[{}]", id.0),
    };

    // serde_json turns the selector into a safely quoted JS string literal
    let query_stmt = match locator {
        Locator::Css(sel) => format!(
            "nodes = Array.from(scope.querySelectorAll({}));",
            serde_json::Value::String(sel.clone())
        ),
        Locator::XPath(expr) => format!(
            r#"const res = document.evaluate({}, scope, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
               for (let i = 0; i < res.snapshotLength; i++) nodes.push(res.snapshotItem(i));"#,
            serde_json::Value::String(expr.clone())
        ),
    };

    format!(
        r#"(function() {{
            const reg = (window.__sniperReg = window.__sniperReg || []);
            const scope = {scope_expr};
            if (!scope) return {{ stale: true, elements: [] }};
            let nodes = [];
            {query_stmt}
            const out = [];
            for (const node of nodes) {{
                const idx = reg.push(node) - 1;
                const rect = node.getBoundingClientRect();
                const ownDisabled = !!node.disabled || (node.hasAttribute && node.hasAttribute('disabled'));
                const innerDisabled = !!(node.querySelector && node.querySelector('input[disabled]'));
                out.push({{
                    id: idx,
                    text: (node.innerText || node.textContent || '').trim(),
                    y: rect.top + window.scrollY,
                    visible: !!(node.getClientRects().length && rect.width > 0 && rect.height > 0),
                    enabled: !(ownDisabled || innerDisabled),
                }});
                if (!{all} && out.length) break;
            }}
            return {{ stale: false, elements: out }};
        }})()"#,
        scope_expr = scope_expr,
        query_stmt = query_stmt,
        all = all,
    )
}

#[derive(serde::Deserialize)]
struct QueryReply {
    stale: bool,
    elements: Vec<ElementReply>,
}

#[derive(serde::Deserialize)]
struct ElementReply {
    id: u64,
    text: String,
    y: f64,
    visible: bool,
    enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_script_escapes_selector() {
        let script = query_script(None, &Locator::css(r#"a[href="x"]"#), true);
        assert!(script.contains(r#""a[href=\"x\"]""#));
        assert!(script.contains("document"));
    }

    #[test]
    fn test_query_script_scopes_to_registry_entry() {
        let script = query_script(Some(ElementId(7)), &Locator::xpath("./div/span"), false);
        assert!(script.contains("(window.__sniperReg || [])[7]"));
        assert!(script.contains("document.evaluate"));
    }
}
