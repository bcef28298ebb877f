//! Run configuration
//!
//! Every knob lives in one immutable [`Settings`] value constructed at
//! startup and passed by reference to each component. Defaults are the
//! tuned production values; a config file only needs the fields it wants
//! to override.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::browser::Locator;
use crate::lang::TourLanguage;

/// Fatal configuration problems. Surfaced before any browser work starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid target date '{value}': {reason}")]
    InvalidDate { value: String, reason: String },

    #[error("Invalid activation time '{value}': {reason}")]
    InvalidTime { value: String, reason: String },

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("Activation time {0} does not exist in the target timezone (DST gap)")]
    NonexistentLocalTime(String),

    #[error("Activation time {0} is ambiguous in the target timezone (DST overlap)")]
    AmbiguousLocalTime(String),

    #[error("Invalid base URL '{value}': {reason}")]
    InvalidUrl { value: String, reason: String },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Application configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Event page URL; the visit date is appended as the `t` query parameter
    pub base_url: String,
    /// Visit date, YYYY-MM-DD
    pub target_date: String,
    /// Release time of day in the site's timezone, HH:MM:SS
    pub activation_time: String,
    /// IANA timezone the release time is expressed in
    pub timezone: String,

    /// Requested ticket counts per category
    pub full_price_tickets: u32,
    pub reduced_fare_tickets: u32,
    /// Guided-tour language to buy slots for
    pub preferred_language: TourLanguage,

    /// Run the browser in headless mode
    pub headless: bool,
    /// Explicit Chrome/Chromium path (auto-detected when unset)
    pub chrome_path: Option<String>,
    /// Where diagnostic screenshots land
    pub screenshot_dir: PathBuf,

    pub timing: Timing,
    pub locators: Locators,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url:
                "https://ticketing.colosseo.it/en/eventi/full-experience-sotterranei-e-arena-percorso-didattico"
                    .to_string(),
            target_date: "2026-05-24".to_string(),
            activation_time: "09:00:00".to_string(),
            timezone: "Europe/Rome".to_string(),
            full_price_tickets: 1,
            reduced_fare_tickets: 1,
            preferred_language: TourLanguage::English,
            headless: false,
            chrome_path: None,
            screenshot_dir: default_screenshot_dir(),
            timing: Timing::default(),
            locators: Locators::default(),
        }
    }
}

fn default_screenshot_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("colosseo-sniper").join("screenshots"))
        .unwrap_or_else(|| PathBuf::from("screenshots"))
}

impl Settings {
    /// Default config file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("colosseo-sniper").join("config.json"))
    }

    /// Load settings from the given path, or the default location.
    /// A missing file yields the defaults; an unreadable or malformed file
    /// is fatal.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => {
                    warn!("No config directory available, using default settings");
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            info!("No config file at {:?}, using default settings", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;

        let settings = serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;

        info!("Loaded config from {:?}", path);
        Ok(settings)
    }

    /// Event URL with the visit date appended as the `t` query parameter
    pub fn event_url(&self, visit_date: chrono::NaiveDate) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidUrl {
            value: self.base_url.clone(),
            reason: e.to_string(),
        })?;

        let date = visit_date.format("%Y-%m-%d").to_string();
        if url.query_pairs().any(|(k, _)| k == "t") {
            warn!("Base URL already carries a 't' parameter, leaving it alone");
        } else {
            url.query_pairs_mut().append_pair("t", &date);
        }
        Ok(url)
    }
}

/// Timing table. Values trade server load against detection latency; every
/// one of them was tuned against the live site, so change with care.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timing {
    /// How long before the activation instant the refresh loop arms itself
    pub lead_time_ms: u64,
    /// Refresh window bounds around the activation instant
    pub window_before_ms: u64,
    pub window_after_ms: u64,
    /// Cadence between cache-bypassing reloads inside the window
    pub refresh_interval_ms: u64,
    /// Pause after a failed reload before trying again
    pub reload_failure_backoff_ms: u64,
    /// Probe timeout immediately after each reload
    pub container_probe_timeout_ms: u64,
    /// Poll interval for short element waits
    pub probe_poll_ms: u64,
    /// Longer visibility confirmation once the refresh loop exits
    pub post_refresh_container_timeout_ms: u64,
    /// Base pause between sequencer attempts
    pub fast_check_interval_ms: u64,
    /// Element waits inside a sequencer attempt
    pub step_wait_timeout_ms: u64,
    /// Attempt budget for the fast check loop
    pub max_attempts: u32,
    pub delay_after_slot_click_ms: u64,
    pub delay_between_categories_ms: u64,
    pub delay_between_plus_clicks_ms: u64,
    pub delay_after_quantities_ms: u64,
    pub delay_after_continue_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            lead_time_ms: 800,
            window_before_ms: 500,
            window_after_ms: 700,
            refresh_interval_ms: 75,
            reload_failure_backoff_ms: 100,
            container_probe_timeout_ms: 100,
            probe_poll_ms: 50,
            post_refresh_container_timeout_ms: 1500,
            fast_check_interval_ms: 50,
            step_wait_timeout_ms: 750,
            max_attempts: 400,
            delay_after_slot_click_ms: 50,
            delay_between_categories_ms: 20,
            delay_between_plus_clicks_ms: 30,
            delay_after_quantities_ms: 50,
            delay_after_continue_ms: 1500,
        }
    }
}

impl Timing {
    pub fn lead_time(&self) -> Duration {
        Duration::from_millis(self.lead_time_ms)
    }

    pub fn window_before(&self) -> Duration {
        Duration::from_millis(self.window_before_ms)
    }

    pub fn window_after(&self) -> Duration {
        Duration::from_millis(self.window_after_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn reload_failure_backoff(&self) -> Duration {
        Duration::from_millis(self.reload_failure_backoff_ms)
    }

    pub fn container_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.container_probe_timeout_ms)
    }

    pub fn probe_poll(&self) -> Duration {
        Duration::from_millis(self.probe_poll_ms)
    }

    pub fn post_refresh_container_timeout(&self) -> Duration {
        Duration::from_millis(self.post_refresh_container_timeout_ms)
    }

    pub fn fast_check_interval(&self) -> Duration {
        Duration::from_millis(self.fast_check_interval_ms)
    }

    pub fn step_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.step_wait_timeout_ms)
    }

    pub fn delay_after_slot_click(&self) -> Duration {
        Duration::from_millis(self.delay_after_slot_click_ms)
    }

    pub fn delay_between_categories(&self) -> Duration {
        Duration::from_millis(self.delay_between_categories_ms)
    }

    pub fn delay_between_plus_clicks(&self) -> Duration {
        Duration::from_millis(self.delay_between_plus_clicks_ms)
    }

    pub fn delay_after_quantities(&self) -> Duration {
        Duration::from_millis(self.delay_after_quantities_ms)
    }

    pub fn delay_after_continue(&self) -> Duration {
        Duration::from_millis(self.delay_after_continue_ms)
    }
}

/// Selector table for the target site. Verify against the live page before
/// a real drop; the site occasionally renames classes.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Locators {
    /// The element whose presence means the ticket-selection UI has loaded
    pub primary_container: Locator,
    /// Container holding the time-slot list
    pub slot_container: Locator,
    /// Per-language section headers inside the slot list
    pub language_header: Locator,
    /// Selectable (not sold out, not disabled) slot entries
    pub slot_label: Locator,
    /// The displayed time, relative to a slot entry
    pub slot_time_text: Locator,
    /// Container holding the ticket-category rows
    pub ticket_container: Locator,
    /// One row per ticket category
    pub category_row: Locator,
    /// The category label, relative to a row
    pub category_title: Locator,
    /// The quantity increment control, relative to a row
    pub plus_button: Locator,
    /// The checkout-continue control
    pub continue_button: Locator,
}

impl Default for Locators {
    fn default() -> Self {
        Self {
            primary_container: Locator::css("div.abc-slotpicker-group"),
            slot_container: Locator::css("div.abc-slotpicker-group"),
            language_header: Locator::css("h3.lang_section"),
            slot_label: Locator::xpath(
                ".//label[not(contains(@class, 'unselectable'))][descendant::input[@type='radio' and @name='slot' and not(@disabled)]]",
            ),
            slot_time_text: Locator::xpath("./div/span"),
            ticket_container: Locator::css("div.abc-tariffpicker"),
            category_row: Locator::css("div.tariff-option"),
            category_title: Locator::css("span.title"),
            plus_button: Locator::css("button.plus"),
            continue_button: Locator::css("a#buy-button"),
        }
    }
}
