//! Three-step purchase interaction: slot, quantities, continue
//!
//! Each step is independently failable and reports a typed outcome; a
//! failure aborts only the current attempt. The orchestrator always
//! restarts a failed attempt from slot selection - after a stale DOM the
//! earlier selections may be gone, so resuming mid-sequence is not safe.

use tracing::{debug, error, info, warn};

use crate::browser::{BrowserControl, BrowserError, Element, ElementId, Probe};
use crate::clock::Clock;
use crate::config::Settings;
use crate::lang::SiteLanguage;

/// Outcome of one full pass over the three steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    Success,
    SlotNotFound,
    QuantityFailed,
    ContinueFailed,
    Transient(TransientKind),
}

/// What kind of transient condition aborted the attempt. The orchestrator
/// scales its between-attempt pause by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// An element went stale mid-interaction; the DOM re-rendered under us
    Stale,
    /// Element machinery timed out below the step level
    NotReady,
    /// Anything else; worth a diagnostic capture
    Unexpected,
}

/// Runs the slot -> quantities -> continue interaction against the page
pub struct InteractionSequencer<'a> {
    browser: &'a dyn BrowserControl,
    clock: &'a dyn Clock,
    settings: &'a Settings,
    /// Exact displayed-time string the desired slot must carry
    desired_slot_text: &'a str,
    site_language: SiteLanguage,
}

impl<'a> InteractionSequencer<'a> {
    pub fn new(
        browser: &'a dyn BrowserControl,
        clock: &'a dyn Clock,
        settings: &'a Settings,
        desired_slot_text: &'a str,
        site_language: SiteLanguage,
    ) -> Self {
        Self {
            browser,
            clock,
            settings,
            desired_slot_text,
            site_language,
        }
    }

    /// One full pass: select the slot, set quantities, click continue.
    pub async fn run_attempt(&self) -> AttemptResult {
        match self.select_time_slot().await {
            Ok(true) => {}
            Ok(false) => return AttemptResult::SlotNotFound,
            Err(e) => return self.classify(e, "slot selection"),
        }

        debug!("Slot selected. Setting quantities...");
        match self.set_quantities().await {
            Ok(true) => {}
            Ok(false) => return AttemptResult::QuantityFailed,
            Err(e) => return self.classify(e, "quantity entry"),
        }

        info!("Quantities set! Clicking continue...");
        match self.click_continue().await {
            Ok(true) => AttemptResult::Success,
            Ok(false) => AttemptResult::ContinueFailed,
            Err(e) => self.classify(e, "continue click"),
        }
    }

    /// Map a browser error to the transient kind the orchestrator keys its
    /// backoff on. Expected UI-timing conditions never escape as errors.
    fn classify(&self, err: BrowserError, step: &str) -> AttemptResult {
        match err {
            BrowserError::StaleElement(msg) => {
                warn!("Stale element during {}: {}", step, msg);
                AttemptResult::Transient(TransientKind::Stale)
            }
            BrowserError::Timeout(msg) | BrowserError::ElementNotFound(msg) => {
                debug!("Element not ready during {}: {}", step, msg);
                AttemptResult::Transient(TransientKind::NotReady)
            }
            other => {
                error!("Unexpected error during {}: {}", step, other);
                AttemptResult::Transient(TransientKind::Unexpected)
            }
        }
    }

    /// Step 1: find and click the slot whose displayed time exactly matches
    /// the desired time text.
    async fn select_time_slot(&self) -> Result<bool, BrowserError> {
        let timing = &self.settings.timing;
        let locators = &self.settings.locators;

        let container = match self
            .browser
            .wait_for(&locators.slot_container, timing.step_wait_timeout(), timing.probe_poll())
            .await?
        {
            Probe::Found(el) => el,
            Probe::NotFound => {
                debug!("Time slot container not found within fast loop timeout");
                return Ok(false);
            }
        };

        let candidates = self.language_section_slots(container.id).await?;

        for slot in candidates {
            if !slot.visible || !slot.enabled {
                continue;
            }

            let time_text = match self.browser.find_in(slot.id, &locators.slot_time_text).await? {
                Probe::Found(span) => span.text,
                Probe::NotFound => continue,
            };

            // Exact match only: "9:00 AM" must not match "9:00 PM", nor a
            // differently formatted "09:00 AM"
            if time_text == self.desired_slot_text {
                info!(
                    "Found desired slot: '{}' for {:?}",
                    time_text, self.settings.preferred_language
                );
                self.browser.click(slot.id).await?;
                self.clock.sleep(timing.delay_after_slot_click()).await;
                return Ok(true);
            }
        }

        info!(
            "Target slot '{}' for {:?} not found among available slots",
            self.desired_slot_text, self.settings.preferred_language
        );
        Ok(false)
    }

    /// Slot entries under the preferred tour-language header, excluding the
    /// trailing run that belongs to the next header. Falls back to every
    /// available entry when the header cannot be located quickly.
    async fn language_section_slots(
        &self,
        container: ElementId,
    ) -> Result<Vec<Element>, BrowserError> {
        let locators = &self.settings.locators;
        let all_slots = self.browser.find_all_in(container, &locators.slot_label).await?;
        let headers = self
            .browser
            .find_all_in(container, &locators.language_header)
            .await?;

        // Header matching is case-normalized; the time-value comparison in
        // the caller is not
        let activity = self.site_language.activity_in().to_lowercase();
        let wanted = self
            .site_language
            .tour_language(self.settings.preferred_language)
            .to_lowercase();

        let section = headers.iter().find(|h| {
            let text = h.text.to_lowercase();
            text.contains(&activity) && text.contains(&wanted)
        });

        let Some(section) = section else {
            warn!(
                "Language header for {:?} not found quickly. Checking all available slots.",
                self.settings.preferred_language
            );
            return Ok(all_slots);
        };

        let section_y = section.y;
        let next_y = headers
            .iter()
            .map(|h| h.y)
            .filter(|&y| y > section_y)
            .fold(f64::INFINITY, f64::min);

        Ok(all_slots
            .into_iter()
            .filter(|s| s.y > section_y && s.y < next_y)
            .collect())
    }

    /// Step 2: set quantities for each category with a non-zero request, in
    /// fixed order.
    async fn set_quantities(&self) -> Result<bool, BrowserError> {
        let timing = &self.settings.timing;
        let locators = &self.settings.locators;

        let container = match self
            .browser
            .wait_for(&locators.ticket_container, timing.step_wait_timeout(), timing.probe_poll())
            .await?
        {
            Probe::Found(el) => el,
            Probe::NotFound => {
                debug!("Ticket type container not found within fast loop timeout");
                return Ok(false);
            }
        };

        let categories = [
            (self.site_language.full_price(), self.settings.full_price_tickets),
            (self.site_language.reduced_fare(), self.settings.reduced_fare_tickets),
        ];

        let mut first = true;
        for (label, count) in categories {
            if count == 0 {
                continue;
            }
            if !first {
                self.clock.sleep(timing.delay_between_categories()).await;
            }
            first = false;

            if !self.increment_category(container.id, label, count).await? {
                return Ok(false);
            }
        }

        self.clock.sleep(timing.delay_after_quantities()).await;
        Ok(true)
    }

    /// Click a category's increment control exactly `count` times.
    async fn increment_category(
        &self,
        container: ElementId,
        label: &str,
        count: u32,
    ) -> Result<bool, BrowserError> {
        let locators = &self.settings.locators;
        let wanted = label.to_lowercase();

        let rows = self.browser.find_all_in(container, &locators.category_row).await?;
        let mut row = None;
        for candidate in rows {
            if let Probe::Found(title) =
                self.browser.find_in(candidate.id, &locators.category_title).await?
            {
                if title.text.to_lowercase() == wanted {
                    row = Some(candidate);
                    break;
                }
            }
        }

        let Some(row) = row else {
            warn!("Ticket category row '{}' not found", label);
            return Ok(false);
        };

        let plus = match self.browser.find_in(row.id, &locators.plus_button).await? {
            Probe::Found(el) => el,
            Probe::NotFound => {
                warn!("Increment control missing for '{}'", label);
                return Ok(false);
            }
        };

        for i in 0..count {
            if let Err(e) = self.browser.click(plus.id).await {
                if matches!(e, BrowserError::StaleElement(_)) {
                    return Err(e);
                }
                error!("Increment click {} failed for '{}': {}", i + 1, label, e);
                return Ok(false);
            }
            self.clock.sleep(self.settings.timing.delay_between_plus_clicks()).await;
        }

        debug!("Set '{}' quantity to {}", label, count);
        Ok(true)
    }

    /// Step 3: click the checkout-continue control and allow the page
    /// transition to happen.
    async fn click_continue(&self) -> Result<bool, BrowserError> {
        let timing = &self.settings.timing;
        let locators = &self.settings.locators;

        match self
            .browser
            .wait_for(&locators.continue_button, timing.step_wait_timeout(), timing.probe_poll())
            .await?
        {
            Probe::Found(button) => {
                if let Err(e) = self.browser.click(button.id).await {
                    if matches!(e, BrowserError::StaleElement(_)) {
                        return Err(e);
                    }
                    warn!("Continue button click failed: {}", e);
                    return Ok(false);
                }
                info!("Continue button clicked successfully");
                self.clock.sleep(timing.delay_after_continue()).await;
                Ok(true)
            }
            Probe::NotFound => {
                warn!("Continue button not found");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::browser::mock::MockBrowser;
    use crate::clock::mock::MockClock;
    use crate::lang::TourLanguage;

    struct Fixture {
        browser: MockBrowser,
        clock: MockClock,
        settings: Settings,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                browser: MockBrowser::new(),
                clock: MockClock::at(Utc.with_ymd_and_hms(2026, 5, 24, 7, 0, 0).unwrap()),
                settings: Settings::default(),
            }
        }

        fn sequencer(&self) -> InteractionSequencer<'_> {
            InteractionSequencer::new(
                &self.browser,
                &self.clock,
                &self.settings,
                "9:00 AM",
                SiteLanguage::English,
            )
        }

        /// Page with the slot list: one English section header and the
        /// given slot entries.
        fn with_slot_section(&self, slots: Vec<(Element, &str)>) {
            let locators = &self.settings.locators;
            let container = self.browser.element("", 0.0);
            self.browser.insert(&locators.slot_container, vec![container.clone()]);
            self.browser.insert(&locators.primary_container, vec![container]);

            let header = self.browser.element("ACTIVITY IN ENGLISH", 100.0);
            self.browser.insert(&locators.language_header, vec![header]);

            let mut labels = Vec::new();
            for (slot, time_text) in slots {
                let span = self.browser.element(time_text, slot.y);
                self.browser.insert_under(slot.id, &locators.slot_time_text, vec![span]);
                labels.push(slot);
            }
            self.browser.insert(&locators.slot_label, labels);
        }

        /// Page with the ticket category table and a continue button.
        /// Returns (full plus, reduced plus, continue button) handles.
        fn with_ticket_table(&self) -> (ElementId, ElementId, ElementId) {
            let locators = &self.settings.locators;
            let container = self.browser.element("", 400.0);
            self.browser.insert(&locators.ticket_container, vec![container]);

            let full_row = self.browser.element("", 420.0);
            let full_title = self.browser.element("Full price", 420.0);
            let full_plus = self.browser.element("+", 420.0);
            self.browser
                .insert_under(full_row.id, &locators.category_title, vec![full_title]);
            self.browser
                .insert_under(full_row.id, &locators.plus_button, vec![full_plus.clone()]);

            let reduced_row = self.browser.element("", 460.0);
            let reduced_title = self.browser.element("Reduced fare", 460.0);
            let reduced_plus = self.browser.element("+", 460.0);
            self.browser
                .insert_under(reduced_row.id, &locators.category_title, vec![reduced_title]);
            self.browser
                .insert_under(reduced_row.id, &locators.plus_button, vec![reduced_plus.clone()]);

            self.browser
                .insert(&locators.category_row, vec![full_row, reduced_row]);

            let continue_button = self.browser.element("CONTINUE", 900.0);
            self.browser
                .insert(&locators.continue_button, vec![continue_button.clone()]);

            (full_plus.id, reduced_plus.id, continue_button.id)
        }
    }

    #[tokio::test]
    async fn test_full_attempt_succeeds() {
        let f = Fixture::new();
        let slot = f.browser.element("", 120.0);
        let slot_id = slot.id;
        f.with_slot_section(vec![(slot, "9:00 AM")]);
        let (full_plus, reduced_plus, continue_id) = f.with_ticket_table();

        let result = f.sequencer().run_attempt().await;

        assert_eq!(result, AttemptResult::Success);
        assert_eq!(f.browser.clicks_on(slot_id), 1);
        assert_eq!(f.browser.clicks_on(full_plus), 1);
        assert_eq!(f.browser.clicks_on(reduced_plus), 1);
        assert_eq!(f.browser.clicks_on(continue_id), 1);
    }

    #[tokio::test]
    async fn test_slot_match_is_exact_not_case_or_format_tolerant() {
        let f = Fixture::new();
        let pm = f.browser.element("", 120.0);
        let padded = f.browser.element("", 130.0);
        let pm_id = pm.id;
        let padded_id = padded.id;
        // Same clock position, wrong meridiem / wrong zero padding
        f.with_slot_section(vec![(pm, "9:00 PM"), (padded, "09:00 AM")]);

        let result = f.sequencer().run_attempt().await;

        assert_eq!(result, AttemptResult::SlotNotFound);
        assert_eq!(f.browser.clicks_on(pm_id), 0);
        assert_eq!(f.browser.clicks_on(padded_id), 0);
    }

    #[tokio::test]
    async fn test_slots_below_next_language_header_are_excluded() {
        let f = Fixture::new();
        let locators = f.settings.locators.clone();

        let container = f.browser.element("", 0.0);
        f.browser.insert(&locators.slot_container, vec![container]);

        let english = f.browser.element("ACTIVITY IN ENGLISH", 100.0);
        let italian = f.browser.element("ACTIVITY IN ITALIAN", 200.0);
        f.browser.insert(&locators.language_header, vec![english, italian]);

        // The only "9:00 AM" slot sits under the Italian header
        let italian_slot = f.browser.element("", 220.0);
        let italian_slot_id = italian_slot.id;
        let span = f.browser.element("9:00 AM", 220.0);
        f.browser
            .insert_under(italian_slot.id, &locators.slot_time_text, vec![span]);
        f.browser.insert(&locators.slot_label, vec![italian_slot]);

        let result = f.sequencer().run_attempt().await;

        assert_eq!(result, AttemptResult::SlotNotFound);
        assert_eq!(f.browser.clicks_on(italian_slot_id), 0);
    }

    #[tokio::test]
    async fn test_missing_language_header_falls_back_to_all_slots() {
        let f = Fixture::new();
        let locators = f.settings.locators.clone();

        let container = f.browser.element("", 0.0);
        f.browser.insert(&locators.slot_container, vec![container]);
        // No language headers at all

        let slot = f.browser.element("", 220.0);
        let slot_id = slot.id;
        let span = f.browser.element("9:00 AM", 220.0);
        f.browser.insert_under(slot.id, &locators.slot_time_text, vec![span]);
        f.browser.insert(&locators.slot_label, vec![slot]);
        f.with_ticket_table();

        let result = f.sequencer().run_attempt().await;

        assert_eq!(result, AttemptResult::Success);
        assert_eq!(f.browser.clicks_on(slot_id), 1);
    }

    #[tokio::test]
    async fn test_invisible_and_disabled_slots_are_skipped() {
        let f = Fixture::new();
        let hidden = f.browser.element_detailed("", 120.0, false, true);
        let disabled = f.browser.element_detailed("", 130.0, true, false);
        let hidden_id = hidden.id;
        let disabled_id = disabled.id;
        f.with_slot_section(vec![(hidden, "9:00 AM"), (disabled, "9:00 AM")]);

        let result = f.sequencer().run_attempt().await;

        assert_eq!(result, AttemptResult::SlotNotFound);
        assert_eq!(f.browser.clicks_on(hidden_id), 0);
        assert_eq!(f.browser.clicks_on(disabled_id), 0);
    }

    #[tokio::test]
    async fn test_quantities_click_exactly_the_requested_count() {
        let mut f = Fixture::new();
        f.settings.full_price_tickets = 3;
        f.settings.reduced_fare_tickets = 2;

        let slot = f.browser.element("", 120.0);
        f.with_slot_section(vec![(slot, "9:00 AM")]);
        let (full_plus, reduced_plus, _) = f.with_ticket_table();

        let result = f.sequencer().run_attempt().await;

        assert_eq!(result, AttemptResult::Success);
        assert_eq!(f.browser.clicks_on(full_plus), 3);
        assert_eq!(f.browser.clicks_on(reduced_plus), 2);
    }

    #[tokio::test]
    async fn test_zero_count_category_is_skipped_without_row_lookup() {
        let mut f = Fixture::new();
        f.settings.full_price_tickets = 2;
        f.settings.reduced_fare_tickets = 0;

        let slot = f.browser.element("", 120.0);
        f.with_slot_section(vec![(slot, "9:00 AM")]);

        // Only the full-price row exists; a reduced-fare lookup would fail
        let locators = f.settings.locators.clone();
        let container = f.browser.element("", 400.0);
        f.browser.insert(&locators.ticket_container, vec![container]);

        let full_row = f.browser.element("", 420.0);
        let full_title = f.browser.element("Full price", 420.0);
        let full_plus = f.browser.element("+", 420.0);
        let full_plus_id = full_plus.id;
        f.browser
            .insert_under(full_row.id, &locators.category_title, vec![full_title]);
        f.browser
            .insert_under(full_row.id, &locators.plus_button, vec![full_plus]);
        f.browser.insert(&locators.category_row, vec![full_row]);

        let continue_button = f.browser.element("CONTINUE", 900.0);
        f.browser.insert(&locators.continue_button, vec![continue_button]);

        let result = f.sequencer().run_attempt().await;

        assert_eq!(result, AttemptResult::Success);
        assert_eq!(f.browser.clicks_on(full_plus_id), 2);
    }

    #[tokio::test]
    async fn test_missing_category_row_fails_quantities() {
        let mut f = Fixture::new();
        f.settings.reduced_fare_tickets = 1;

        let slot = f.browser.element("", 120.0);
        f.with_slot_section(vec![(slot, "9:00 AM")]);

        // Ticket container present but empty: no rows at all
        let locators = f.settings.locators.clone();
        let container = f.browser.element("", 400.0);
        f.browser.insert(&locators.ticket_container, vec![container]);

        let result = f.sequencer().run_attempt().await;
        assert_eq!(result, AttemptResult::QuantityFailed);
    }

    #[tokio::test]
    async fn test_continue_click_error_reports_continue_failed() {
        let f = Fixture::new();
        let slot = f.browser.element("", 120.0);
        f.with_slot_section(vec![(slot, "9:00 AM")]);
        let (_, _, continue_id) = f.with_ticket_table();

        f.browser.script_clicks(
            continue_id,
            vec![Err(BrowserError::ElementNotFound("covered by overlay".into()))],
        );

        let result = f.sequencer().run_attempt().await;
        assert_eq!(result, AttemptResult::ContinueFailed);
    }

    #[tokio::test]
    async fn test_stale_click_surfaces_as_stale_transient() {
        let f = Fixture::new();
        let slot = f.browser.element("", 120.0);
        let slot_id = slot.id;
        f.with_slot_section(vec![(slot, "9:00 AM")]);

        f.browser.script_clicks(
            slot_id,
            vec![Err(BrowserError::StaleElement("slot re-rendered".into()))],
        );

        let result = f.sequencer().run_attempt().await;
        assert_eq!(result, AttemptResult::Transient(TransientKind::Stale));
    }

    #[tokio::test]
    async fn test_italian_site_language_matches_localized_labels() {
        let mut f = Fixture::new();
        f.settings.preferred_language = TourLanguage::English;
        let locators = f.settings.locators.clone();

        let container = f.browser.element("", 0.0);
        f.browser.insert(&locators.slot_container, vec![container]);

        // Italian page: the English tour section is titled "ATTIVITÀ IN INGLESE"
        let header = f.browser.element("ATTIVITÀ IN INGLESE", 100.0);
        f.browser.insert(&locators.language_header, vec![header]);

        let slot = f.browser.element("", 120.0);
        let slot_id = slot.id;
        let span = f.browser.element("9:00 AM", 120.0);
        f.browser.insert_under(slot.id, &locators.slot_time_text, vec![span]);
        f.browser.insert(&locators.slot_label, vec![slot]);

        let ticket_container = f.browser.element("", 400.0);
        f.browser.insert(&locators.ticket_container, vec![ticket_container]);

        let full_row = f.browser.element("", 420.0);
        let full_title = f.browser.element("Prezzo intero", 420.0);
        let full_plus = f.browser.element("+", 420.0);
        f.browser
            .insert_under(full_row.id, &locators.category_title, vec![full_title]);
        f.browser
            .insert_under(full_row.id, &locators.plus_button, vec![full_plus]);

        let reduced_row = f.browser.element("", 460.0);
        let reduced_title = f.browser.element("Tariffa ridotta", 460.0);
        let reduced_plus = f.browser.element("+", 460.0);
        f.browser
            .insert_under(reduced_row.id, &locators.category_title, vec![reduced_title]);
        f.browser
            .insert_under(reduced_row.id, &locators.plus_button, vec![reduced_plus]);

        f.browser.insert(&locators.category_row, vec![full_row, reduced_row]);

        let continue_button = f.browser.element("CONTINUA", 900.0);
        f.browser.insert(&locators.continue_button, vec![continue_button]);

        let sequencer = InteractionSequencer::new(
            &f.browser,
            &f.clock,
            &f.settings,
            "9:00 AM",
            SiteLanguage::Italian,
        );

        assert_eq!(sequencer.run_attempt().await, AttemptResult::Success);
        assert_eq!(f.browser.clicks_on(slot_id), 1);
    }
}
