//! Micro-refresh loop around the activation instant
//!
//! The site exposes no event for "inventory just appeared", so the most
//! deterministic way to catch the drop is to reload the page on a fixed
//! short cadence inside a tight window straddling the release instant and
//! probe for the ticket UI after each reload.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, error, info, warn};

use crate::browser::{BrowserControl, Probe};
use crate::clock::{self, Clock};
use crate::config::Settings;

/// The interval around the activation instant during which reloads are
/// issued, plus the reload cadence. Consumed once per run.
#[derive(Debug, Clone)]
pub struct RefreshWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval: Duration,
}

impl RefreshWindow {
    pub fn around<Z: TimeZone>(
        activation: &DateTime<Z>,
        before: Duration,
        after: Duration,
        interval: Duration,
    ) -> Self {
        let activation = activation.with_timezone(&Utc);
        Self {
            start: activation - chrono::Duration::from_std(before).unwrap_or_default(),
            end: activation + chrono::Duration::from_std(after).unwrap_or_default(),
            interval,
        }
    }
}

/// Idle sleep between cadence checks. Keeps the loop from spinning without
/// adding meaningful reload latency.
const CADENCE_TICK: Duration = Duration::from_millis(5);

/// Drives rapid cache-bypassing reloads until the primary content
/// container shows up or the window closes.
pub struct RefreshDriver<'a> {
    browser: &'a dyn BrowserControl,
    clock: &'a dyn Clock,
    settings: &'a Settings,
}

impl<'a> RefreshDriver<'a> {
    pub fn new(
        browser: &'a dyn BrowserControl,
        clock: &'a dyn Clock,
        settings: &'a Settings,
    ) -> Self {
        Self {
            browser,
            clock,
            settings,
        }
    }

    /// Run the micro-refresh loop. Returns true once the primary content
    /// container is confirmed present.
    pub async fn run(&self, window: &RefreshWindow) -> bool {
        let timing = &self.settings.timing;
        let locator = &self.settings.locators.primary_container;
        let interval =
            chrono::Duration::from_std(window.interval).unwrap_or_else(|_| chrono::Duration::zero());

        info!(
            "Starting micro-refresh window: {} to {} (interval: {}ms)",
            window.start.format("%H:%M:%S%.3f"),
            window.end.format("%H:%M:%S%.3f"),
            window.interval.as_millis()
        );

        clock::wait_until(self.clock, &window.start).await;
        info!("Micro-refresh window entered");

        let mut refresh_count: u32 = 0;
        let mut found = false;
        let mut last_reload: Option<DateTime<Utc>> = None;

        while self.clock.now() < window.end {
            let now = self.clock.now();
            let due = match last_reload {
                None => true,
                Some(prev) => now - prev >= interval,
            };

            if due {
                match self.browser.reload(true).await {
                    Ok(()) => {
                        refresh_count += 1;
                        last_reload = Some(now);
                        debug!(
                            "[Micro refresh {}] {}",
                            refresh_count,
                            now.format("%H:%M:%S%.3f")
                        );

                        // Quick probe right after the reload; don't wait for
                        // the window to close if the container is up
                        match self
                            .browser
                            .wait_for(locator, timing.container_probe_timeout(), timing.probe_poll())
                            .await
                        {
                            Ok(Probe::Found(_)) => {
                                info!(
                                    "*** Primary container FOUND during micro-refresh (reload {}) ***",
                                    refresh_count
                                );
                                found = true;
                                break;
                            }
                            Ok(Probe::NotFound) => {}
                            Err(e) => debug!("Container probe errored: {}", e),
                        }
                    }
                    Err(e) => {
                        warn!("Reload failed: {} - backing off", e);
                        self.clock.sleep(timing.reload_failure_backoff()).await;
                        // Reset the cadence timer after the failure delay
                        last_reload = Some(self.clock.now());
                        continue;
                    }
                }
            }

            self.clock.sleep(CADENCE_TICK).await;
        }

        info!(
            "Micro-refresh window finished. Total refreshes: {}. Container found: {}",
            refresh_count, found
        );

        if found {
            // Give the container a longer confirmation wait so the
            // interaction loop starts against a stable DOM
            match self
                .browser
                .wait_for(
                    locator,
                    timing.post_refresh_container_timeout(),
                    Duration::from_millis(100),
                )
                .await
            {
                Ok(Probe::Found(_)) => {
                    info!("Primary container visibility confirmed after micro-refresh");
                    true
                }
                Ok(Probe::NotFound) => {
                    error!("Container found during micro-refresh, but disappeared during confirmation");
                    false
                }
                Err(e) => {
                    error!("Container confirmation failed: {}", e);
                    false
                }
            }
        } else {
            // One last check in case it appeared right at the window edge
            match self
                .browser
                .wait_for(locator, Duration::from_millis(500), Duration::from_millis(100))
                .await
            {
                Ok(Probe::Found(_)) => {
                    info!("Container found in final check after micro-refresh window");
                    true
                }
                _ => {
                    error!("Micro-refresh failed to find the primary container");
                    false
                }
            }
        }
    }
}
