//! Scripted browser double used by the timing and interaction tests.
//!
//! The page model is a map from locator (optionally scoped under a parent
//! element) to a list of elements. Click outcomes can be scripted per
//! element; everything else just records what the core asked for.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::control::{BrowserControl, Element, ElementId, Locator, Probe};
use super::BrowserError;

#[derive(Default)]
pub struct MockBrowser {
    /// Document-scope page model: locator -> elements in document order.
    dom: Mutex<HashMap<String, Vec<Element>>>,
    /// Scoped page model: (parent element, locator) -> elements.
    scoped: Mutex<HashMap<(u64, String), Vec<Element>>>,
    /// Locators that only start matching after N reloads have been issued.
    gates: Mutex<HashMap<String, usize>>,
    /// Scripted click outcomes per element; once drained, clicks succeed.
    click_queue: Mutex<HashMap<u64, VecDeque<Result<(), BrowserError>>>>,
    next_id: AtomicU64,

    pub reloads: AtomicUsize,
    pub navigations: Mutex<Vec<String>>,
    pub clicks: Mutex<Vec<u64>>,
    pub finds: Mutex<Vec<String>>,
    pub screenshots: Mutex<Vec<PathBuf>>,
    pub closed: AtomicUsize,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh visible, enabled element.
    pub fn element(&self, text: &str, y: f64) -> Element {
        self.element_detailed(text, y, true, true)
    }

    pub fn element_detailed(&self, text: &str, y: f64, visible: bool, enabled: bool) -> Element {
        Element {
            id: ElementId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            text: text.to_string(),
            y,
            visible,
            enabled,
        }
    }

    pub fn insert(&self, locator: &Locator, elements: Vec<Element>) {
        self.dom
            .lock()
            .unwrap()
            .insert(locator.to_string(), elements);
    }

    pub fn insert_under(&self, scope: ElementId, locator: &Locator, elements: Vec<Element>) {
        self.scoped
            .lock()
            .unwrap()
            .insert((scope.0, locator.to_string()), elements);
    }

    /// Make a locator answer NotFound until `reloads` reloads have happened.
    pub fn appear_after_reloads(&self, locator: &Locator, reloads: usize) {
        self.gates
            .lock()
            .unwrap()
            .insert(locator.to_string(), reloads);
    }

    pub fn script_clicks(&self, element: ElementId, results: Vec<Result<(), BrowserError>>) {
        self.click_queue
            .lock()
            .unwrap()
            .insert(element.0, results.into());
    }

    pub fn clicks_on(&self, element: ElementId) -> usize {
        self.clicks
            .lock()
            .unwrap()
            .iter()
            .filter(|&&id| id == element.0)
            .count()
    }

    pub fn found_locator(&self, locator: &Locator) -> bool {
        self.finds.lock().unwrap().iter().any(|l| l == &locator.to_string())
    }

    fn lookup(&self, scope: Option<ElementId>, locator: &Locator) -> Vec<Element> {
        let key = locator.to_string();
        self.finds.lock().unwrap().push(key.clone());

        if let Some(min) = self.gates.lock().unwrap().get(&key) {
            if self.reloads.load(Ordering::Relaxed) < *min {
                return Vec::new();
            }
        }

        if let Some(scope) = scope {
            if let Some(els) = self.scoped.lock().unwrap().get(&(scope.0, key.clone())) {
                return els.clone();
            }
        }
        self.dom.lock().unwrap().get(&key).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl BrowserControl for MockBrowser {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.navigations.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn reload(&self, _bypass_cache: bool) -> Result<(), BrowserError> {
        self.reloads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn find_element(&self, locator: &Locator) -> Result<Probe, BrowserError> {
        Ok(match self.lookup(None, locator).into_iter().next() {
            Some(el) => Probe::Found(el),
            None => Probe::NotFound,
        })
    }

    async fn find_in(&self, scope: ElementId, locator: &Locator) -> Result<Probe, BrowserError> {
        Ok(match self.lookup(Some(scope), locator).into_iter().next() {
            Some(el) => Probe::Found(el),
            None => Probe::NotFound,
        })
    }

    async fn find_all_in(
        &self,
        scope: ElementId,
        locator: &Locator,
    ) -> Result<Vec<Element>, BrowserError> {
        Ok(self.lookup(Some(scope), locator))
    }

    async fn wait_for(
        &self,
        locator: &Locator,
        _timeout: Duration,
        _poll: Duration,
    ) -> Result<Probe, BrowserError> {
        self.find_element(locator).await
    }

    async fn click(&self, element: ElementId) -> Result<(), BrowserError> {
        self.clicks.lock().unwrap().push(element.0);
        if let Some(queue) = self.click_queue.lock().unwrap().get_mut(&element.0) {
            if let Some(result) = queue.pop_front() {
                return result;
            }
        }
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), BrowserError> {
        self.screenshots.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.closed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
