//! Release-instant timing
//!
//! Computes the activation instant in the site's timezone and provides the
//! high-precision wait used to arm the refresh loop. All waiting goes
//! through the [`Clock`] trait so the timing-critical paths can be driven
//! by a simulated clock in tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::info;

use crate::config::{ConfigError, Settings};

/// Time source abstraction
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation used in production
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Minimum single sleep while waiting for a target instant
const MIN_SLEEP: Duration = Duration::from_millis(1);
/// Maximum single sleep while waiting for a target instant. Kept short so
/// the final wake-up lands within a few milliseconds of the target.
const MAX_SLEEP: Duration = Duration::from_millis(10);

/// Block until wall-clock time reaches `target`.
///
/// Sleeps in adaptive increments of half the remaining time, clamped to
/// [1ms, 10ms], instead of one coarse sleep. Overshoot stays in the low
/// single-digit milliseconds regardless of how far away the target is.
/// Targets are timezone-aware by type; a target already in the past
/// returns immediately.
pub async fn wait_until<Z: TimeZone>(clock: &dyn Clock, target: &DateTime<Z>) {
    let target = target.with_timezone(&Utc);
    loop {
        let remaining = target - clock.now();
        let Ok(remaining) = remaining.to_std() else {
            break;
        };
        if remaining.is_zero() {
            break;
        }
        clock.sleep((remaining / 2).clamp(MIN_SLEEP, MAX_SLEEP)).await;
    }
}

/// Everything derived from the configured release date and time, computed
/// once at startup.
#[derive(Debug, Clone)]
pub struct ActivationPlan {
    /// The moment inventory is expected to become purchasable. Carries its
    /// timezone; a naive instant cannot be constructed.
    pub activation: DateTime<Tz>,
    /// Visit date as it appears in the URL query parameter
    pub visit_date: NaiveDate,
    /// Slot time formatted the way the site displays it, e.g. "9:00 AM".
    /// Exact-match target during slot selection.
    pub desired_slot_text: String,
}

impl ActivationPlan {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let tz: Tz = settings
            .timezone
            .parse()
            .map_err(|_| ConfigError::UnknownTimezone(settings.timezone.clone()))?;

        let date = NaiveDate::parse_from_str(&settings.target_date, "%Y-%m-%d").map_err(|e| {
            ConfigError::InvalidDate {
                value: settings.target_date.clone(),
                reason: e.to_string(),
            }
        })?;

        let time = NaiveTime::parse_from_str(&settings.activation_time, "%H:%M:%S").map_err(
            |e| ConfigError::InvalidTime {
                value: settings.activation_time.clone(),
                reason: e.to_string(),
            },
        )?;

        let naive = NaiveDateTime::new(date, time);
        let activation = match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt,
            LocalResult::None => return Err(ConfigError::NonexistentLocalTime(naive.to_string())),
            LocalResult::Ambiguous(_, _) => {
                return Err(ConfigError::AmbiguousLocalTime(naive.to_string()))
            }
        };

        let desired_slot_text = activation.format("%-I:%M %p").to_string();

        info!(
            "Target activation: {} ({})",
            activation.format("%Y-%m-%d %H:%M:%S%.3f %Z"),
            settings.timezone
        );
        info!("Desired slot text (exact match target): '{}'", desired_slot_text);

        Ok(Self {
            activation,
            visit_date: date,
            desired_slot_text,
        })
    }
}
