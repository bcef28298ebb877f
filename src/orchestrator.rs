//! End-to-end run sequencing
//!
//! Drives one full session: initial load and manual CAPTCHA gate, the
//! precise wait to the activation instant, the micro-refresh window, the
//! bounded fast-check loop, and the manual payment gate on success.

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::{capture_screenshot, BrowserControl, BrowserError, Probe};
use crate::checkpoint::Checkpoint;
use crate::clock::{self, ActivationPlan, Clock};
use crate::config::Settings;
use crate::lang::{detect_site_language, SiteLanguage};
use crate::refresh::{RefreshDriver, RefreshWindow};
use crate::sequencer::{AttemptResult, InteractionSequencer, TransientKind};

/// Final status of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The continue click went through; a human finishes payment
    Secured { attempts: u32 },
    /// The ticket UI never appeared inside the refresh window
    ContainerNotFound,
    /// The fast-check budget ran out without a successful pass
    AttemptsExhausted { attempts: u32 },
}

/// Errors that abort a run outright. Everything UI-timing related is
/// handled inside the attempt loop instead.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Initial page load failed: {0}")]
    InitialLoad(#[from] BrowserError),

    #[error("Human checkpoint failed: {0}")]
    Checkpoint(#[from] std::io::Error),
}

pub struct SessionOrchestrator<'a> {
    browser: &'a dyn BrowserControl,
    clock: &'a dyn Clock,
    checkpoint: &'a dyn Checkpoint,
    settings: &'a Settings,
    plan: &'a ActivationPlan,
    event_url: Url,
    site_language: SiteLanguage,
}

impl<'a> SessionOrchestrator<'a> {
    pub fn new(
        browser: &'a dyn BrowserControl,
        clock: &'a dyn Clock,
        checkpoint: &'a dyn Checkpoint,
        settings: &'a Settings,
        plan: &'a ActivationPlan,
        event_url: Url,
    ) -> Self {
        Self {
            browser,
            clock,
            checkpoint,
            settings,
            plan,
            event_url,
            site_language: SiteLanguage::default(),
        }
    }

    pub async fn run(&mut self) -> Result<RunOutcome, RunError> {
        let timing = &self.settings.timing;

        // === Step 1: initial load and manual CAPTCHA gate ===
        info!("Loading URL: {}", self.event_url);
        self.browser.navigate(self.event_url.as_str()).await?;

        self.checkpoint
            .confirm(
                "Solve any CAPTCHA / anti-bot checks in the browser NOW, wait for the page to settle, then press Enter...",
            )
            .await?;
        info!("Resuming automation...");

        // Content may already be up well before the drop
        match self
            .browser
            .wait_for(
                &self.settings.locators.primary_container,
                std::time::Duration::from_secs(1),
                timing.probe_poll(),
            )
            .await
        {
            Ok(Probe::Found(_)) => {
                info!("Primary container found quickly after manual step");
                self.site_language =
                    detect_site_language(self.browser, &self.settings.locators, self.site_language)
                        .await;
            }
            _ => {
                warn!("Primary container not immediately present. Micro-refresh will handle it.");
            }
        }

        // === Step 2: wait for the micro-refresh trigger ===
        let arm_at = self.plan.activation.clone()
            - chrono::Duration::from_std(timing.lead_time()).unwrap_or_default();
        info!(
            "Waiting until ~{} to start micro-refresh...",
            arm_at.format("%H:%M:%S%.3f %Z")
        );
        clock::wait_until(self.clock, &arm_at).await;
        info!("Trigger time reached. Starting micro-refresh sequence.");

        // === Step 3: micro-refresh window ===
        let window = RefreshWindow::around(
            &self.plan.activation,
            timing.window_before(),
            timing.window_after(),
            timing.refresh_interval(),
        );
        let driver = RefreshDriver::new(self.browser, self.clock, self.settings);

        if !driver.run(&window).await {
            capture_screenshot(
                self.browser,
                &self.settings.screenshot_dir,
                "container_not_found_after_microrefresh",
            )
            .await;
            return Ok(RunOutcome::ContainerNotFound);
        }

        // Container is stable; pin down which language the site came up in
        self.site_language =
            detect_site_language(self.browser, &self.settings.locators, self.site_language).await;
        info!("Site language: {:?}", self.site_language);

        // === Step 4: fast check loop ===
        info!("=== STARTING FAST CHECK LOOP ===");
        let sequencer = InteractionSequencer::new(
            self.browser,
            self.clock,
            self.settings,
            &self.plan.desired_slot_text,
            self.site_language,
        );
        let base = timing.fast_check_interval();

        for attempt in 1..=timing.max_attempts {
            debug!("Fast check attempt {}...", attempt);

            match sequencer.run_attempt().await {
                AttemptResult::Success => {
                    info!("SUCCESS on fast check attempt {}!", attempt);
                    self.ticket_secured().await?;
                    return Ok(RunOutcome::Secured { attempts: attempt });
                }
                AttemptResult::SlotNotFound => {
                    self.clock.sleep(base).await;
                }
                AttemptResult::QuantityFailed => {
                    warn!("Attempt {}: failed to set quantities", attempt);
                    self.clock.sleep(base * 3 / 2).await;
                }
                AttemptResult::ContinueFailed => {
                    warn!("Attempt {}: failed to click continue", attempt);
                    self.clock.sleep(base * 3 / 2).await;
                }
                AttemptResult::Transient(TransientKind::Stale) => {
                    warn!("Attempt {}: stale element, retrying from slot selection", attempt);
                    self.clock.sleep(base / 2).await;
                }
                AttemptResult::Transient(TransientKind::NotReady) => {
                    debug!("Attempt {}: elements not ready yet", attempt);
                    self.clock.sleep(base).await;
                }
                AttemptResult::Transient(TransientKind::Unexpected) => {
                    capture_screenshot(
                        self.browser,
                        &self.settings.screenshot_dir,
                        &format!("fast_loop_error_attempt_{}", attempt),
                    )
                    .await;
                    self.clock.sleep(base * 2).await;
                }
            }
        }

        warn!(
            "Fast check loop completed {} attempts without securing tickets",
            timing.max_attempts
        );
        capture_screenshot(self.browser, &self.settings.screenshot_dir, "fast_loop_exhausted")
            .await;
        Ok(RunOutcome::AttemptsExhausted {
            attempts: timing.max_attempts,
        })
    }

    /// Success banner plus the manual payment gate. The browser stays open
    /// for the human to finish checkout.
    async fn ticket_secured(&self) -> Result<(), RunError> {
        info!("{}", "=".repeat(60));
        info!(" TICKET ACQUISITION LIKELY SUCCESSFUL!");
        info!(" Browser window remains open. COMPLETE PURCHASE MANUALLY NOW!");
        info!(" Check the website for the cart time limit (usually 10-15 mins).");
        info!("{}", "=".repeat(60));

        self.checkpoint
            .confirm("Press Enter here ONLY after finishing/abandoning the purchase...")
            .await?;
        Ok(())
    }
}
