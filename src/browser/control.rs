//! Abstract browser-control surface driven by the automation core.
//!
//! The clock, refresh and interaction layers only ever see this trait, so
//! they run unchanged against the CDP backend in production and a scripted
//! double in tests. Which concrete automation library backs the trait is
//! decided outside the core.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use super::BrowserError;

/// How to find something on the page.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", tag = "by", content = "query")]
pub enum Locator {
    Css(String),
    #[serde(rename = "xpath")]
    XPath(String),
}

impl Locator {
    pub fn css(query: impl Into<String>) -> Self {
        Locator::Css(query.into())
    }

    pub fn xpath(query: impl Into<String>) -> Self {
        Locator::XPath(query.into())
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Css(q) => write!(f, "css:{}", q),
            Locator::XPath(q) => write!(f, "xpath:{}", q),
        }
    }
}

/// Handle to an element returned by a find call.
///
/// Handles are invalidated by any reload or navigation; operations on an
/// invalidated handle fail with [`BrowserError::StaleElement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub u64);

/// Snapshot of a matched element, taken at find time.
#[derive(Debug, Clone)]
pub struct Element {
    pub id: ElementId,
    /// Trimmed rendered text.
    pub text: String,
    /// Vertical position of the top edge, in page coordinates.
    pub y: f64,
    pub visible: bool,
    /// False when the element (or a form control inside it) is disabled.
    pub enabled: bool,
}

/// Outcome of a presence probe. "Not there yet" is an expected value during
/// the race around the release instant, not an error.
#[derive(Debug, Clone)]
pub enum Probe {
    Found(Element),
    NotFound,
}

impl Probe {
    pub fn is_found(&self) -> bool {
        matches!(self, Probe::Found(_))
    }

    pub fn found(self) -> Option<Element> {
        match self {
            Probe::Found(el) => Some(el),
            Probe::NotFound => None,
        }
    }
}

/// The one external collaborator the automation core talks to.
#[async_trait]
pub trait BrowserControl: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// Reload the current page, optionally bypassing the HTTP cache.
    async fn reload(&self, bypass_cache: bool) -> Result<(), BrowserError>;

    /// Immediate presence check at document scope.
    async fn find_element(&self, locator: &Locator) -> Result<Probe, BrowserError>;

    /// Immediate presence check scoped under a previously found element.
    async fn find_in(&self, scope: ElementId, locator: &Locator) -> Result<Probe, BrowserError>;

    /// All current matches scoped under a previously found element, in
    /// document order.
    async fn find_all_in(
        &self,
        scope: ElementId,
        locator: &Locator,
    ) -> Result<Vec<Element>, BrowserError>;

    /// Poll for presence until the timeout elapses.
    async fn wait_for(
        &self,
        locator: &Locator,
        timeout: Duration,
        poll: Duration,
    ) -> Result<Probe, BrowserError>;

    /// Script-driven click. Dispatches directly on the node, bypassing hit
    /// testing, so a half-covered control still receives the click.
    async fn click(&self, element: ElementId) -> Result<(), BrowserError>;

    async fn screenshot(&self, path: &Path) -> Result<(), BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}
