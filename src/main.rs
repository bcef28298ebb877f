//! Colosseo Sniper - standalone runner
//!
//! Usage: `colosseo-sniper [config.json]`
//!
//! Loads settings, validates the activation instant, launches the browser
//! and runs one orchestrated session. The browser session is closed on
//! every exit path - success, failure, error, or Ctrl-C.

use std::path::PathBuf;

use tracing::{error, info, warn};

use colosseo_sniper::browser::{self, BrowserControl, CdpBrowser, CdpBrowserConfig};
use colosseo_sniper::checkpoint::StdinCheckpoint;
use colosseo_sniper::clock::{ActivationPlan, SystemClock};
use colosseo_sniper::config::Settings;
use colosseo_sniper::orchestrator::{RunOutcome, SessionOrchestrator};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _guard = colosseo_sniper::init_logging();

    info!("Starting Colosseo Sniper");
    if let Some(dir) = colosseo_sniper::log_dir() {
        info!("Log files saved to: {}", dir.display());
    }

    // All configuration problems are fatal before any browser work
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let settings = Settings::load(config_path.as_deref())?;
    let plan = ActivationPlan::from_settings(&settings)?;
    let event_url = settings.event_url(plan.visit_date)?;

    info!("{}", "=".repeat(60));
    info!(" Target date: {}", plan.visit_date);
    info!(" Activation time: {} ({})", settings.activation_time, settings.timezone);
    info!(
        " Desired slot match: '{}' ({:?})",
        plan.desired_slot_text, settings.preferred_language
    );
    info!(
        " Tickets: {} full / {} reduced",
        settings.full_price_tickets, settings.reduced_fare_tickets
    );
    info!(
        " Micro-refresh: lead={}ms, window={}ms+{}ms, interval={}ms",
        settings.timing.lead_time_ms,
        settings.timing.window_before_ms,
        settings.timing.window_after_ms,
        settings.timing.refresh_interval_ms
    );
    info!(
        " Fast check: interval={}ms, max attempts={}",
        settings.timing.fast_check_interval_ms, settings.timing.max_attempts
    );
    info!("{}", "=".repeat(60));
    warn!("Run close to the site's region and keep the system clock NTP-synced.");

    let browser = CdpBrowser::launch(CdpBrowserConfig::from_settings(&settings)).await?;
    let clock = SystemClock;
    let checkpoint = StdinCheckpoint;

    let mut orchestrator =
        SessionOrchestrator::new(&browser, &clock, &checkpoint, &settings, &plan, event_url);

    let mut secured = false;
    tokio::select! {
        result = orchestrator.run() => match result {
            Ok(RunOutcome::Secured { attempts }) => {
                secured = true;
                info!("Ticket secured after {} attempt(s)", attempts);
            }
            Ok(RunOutcome::ContainerNotFound) => {
                error!("Ticket UI never appeared inside the refresh window. Aborting run.");
            }
            Ok(RunOutcome::AttemptsExhausted { attempts }) => {
                warn!("Gave up after {} attempts without securing a ticket", attempts);
            }
            Err(e) => {
                error!("Run aborted: {}", e);
                browser::capture_screenshot(&browser, &settings.screenshot_dir, "run_aborted").await;
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted by user (Ctrl+C). Capturing diagnostics before shutdown.");
            browser::capture_screenshot(&browser, &settings.screenshot_dir, "user_interrupt").await;
        }
    }

    info!("Script finished. Ticket secured status: {}", secured);
    if let Err(e) = browser.close().await {
        warn!("Ignoring error during browser close: {}", e);
    }
    info!("Cleanup complete. Exiting.");

    Ok(())
}
