//! Browser control layer
//!
//! The automation core drives the abstract [`BrowserControl`] trait; the
//! CDP-backed [`CdpBrowser`] is the production implementation behind it.

mod control;
mod errors;
mod session;

#[cfg(test)]
pub(crate) mod mock;

pub use control::{BrowserControl, Element, ElementId, Locator, Probe};
pub use errors::BrowserError;
pub use session::{CdpBrowser, CdpBrowserConfig};

use std::path::Path;

use tracing::{info, warn};

/// Best-effort diagnostic screenshot named by a reason tag and timestamp.
/// Failures are logged and swallowed; diagnostics never abort the run.
pub async fn capture_screenshot(browser: &dyn BrowserControl, dir: &Path, reason: &str) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!("Could not create screenshot directory {:?}: {}", dir, e);
        return;
    }

    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f");
    let path = dir.join(format!("{}_{}.png", reason, stamp));

    match browser.screenshot(&path).await {
        Ok(()) => info!("Saved screenshot: {}", path.display()),
        Err(e) => warn!("Could not save screenshot '{}': {}", reason, e),
    }
}
