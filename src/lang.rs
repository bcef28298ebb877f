//! Site-language detection and localized text lookup
//!
//! The ticketing site renders either English or Italian depending on the
//! visitor; labels the sequencer matches against differ accordingly. The
//! buyer's tour language is a separate axis: an Italian page spells the
//! English-language tour "INGLESE".

use std::time::Duration;

use tracing::{info, warn};

use crate::browser::{BrowserControl, Locator, Probe};
use crate::config::Locators;

/// Language the site is currently rendering in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SiteLanguage {
    #[default]
    English,
    Italian,
}

/// Guided-tour language to buy slots for
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TourLanguage {
    English,
    Italian,
    Spanish,
    French,
}

impl SiteLanguage {
    /// Label on the full-price category row
    pub fn full_price(self) -> &'static str {
        match self {
            SiteLanguage::English => "Full price",
            SiteLanguage::Italian => "Prezzo intero",
        }
    }

    /// Label on the reduced-fare category row
    pub fn reduced_fare(self) -> &'static str {
        match self {
            SiteLanguage::English => "Reduced fare",
            SiteLanguage::Italian => "Tariffa ridotta",
        }
    }

    pub fn continue_label(self) -> &'static str {
        match self {
            SiteLanguage::English => "CONTINUE",
            SiteLanguage::Italian => "CONTINUA",
        }
    }

    /// Prefix of the per-language section headers in the slot list
    pub fn activity_in(self) -> &'static str {
        match self {
            SiteLanguage::English => "ACTIVITY IN",
            SiteLanguage::Italian => "ATTIVITÀ IN",
        }
    }

    /// How the given tour language is spelled in this site language
    pub fn tour_language(self, tour: TourLanguage) -> &'static str {
        match (self, tour) {
            (SiteLanguage::English, TourLanguage::English) => "ENGLISH",
            (SiteLanguage::English, TourLanguage::Italian) => "ITALIAN",
            (SiteLanguage::English, TourLanguage::Spanish) => "SPANISH",
            (SiteLanguage::English, TourLanguage::French) => "FRENCH",
            (SiteLanguage::Italian, TourLanguage::English) => "INGLESE",
            (SiteLanguage::Italian, TourLanguage::Italian) => "ITALIANO",
            (SiteLanguage::Italian, TourLanguage::Spanish) => "SPAGNOLO",
            (SiteLanguage::Italian, TourLanguage::French) => "FRANCESE",
        }
    }
}

/// Words that only show up on the Italian rendering of the page
const ITALIAN_MARKERS: [&str; 4] = ["continua", "intero", "ridotta", "attività"];

/// Detect which language the site is rendering in.
///
/// Reads the continue button's label; falls back to scanning the body text
/// when the button is not up yet. Non-critical: on any failure the prior
/// value is kept.
pub async fn detect_site_language(
    browser: &dyn BrowserControl,
    locators: &Locators,
    current: SiteLanguage,
) -> SiteLanguage {
    let detected = match browser
        .wait_for(
            &locators.continue_button,
            Duration::from_millis(500),
            Duration::from_millis(50),
        )
        .await
    {
        Ok(Probe::Found(button)) => {
            if button.text.to_uppercase().contains("CONTINUA") {
                SiteLanguage::Italian
            } else {
                SiteLanguage::English
            }
        }
        Ok(Probe::NotFound) => {
            warn!("Continue button not found quickly for language detection");
            match browser.find_element(&Locator::css("body")).await {
                Ok(Probe::Found(body)) => {
                    let text = body.text.to_lowercase();
                    if ITALIAN_MARKERS.iter().any(|w| text.contains(w)) {
                        SiteLanguage::Italian
                    } else {
                        SiteLanguage::English
                    }
                }
                _ => return current,
            }
        }
        Err(e) => {
            warn!("Error detecting site language: {}. Keeping {:?}.", e, current);
            return current;
        }
    };

    if detected != current {
        info!("Detected site language: {:?}", detected);
    }
    detected
}
