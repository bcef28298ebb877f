//! Colosseo Sniper
//!
//! Buys a timed-entry Colosseum ticket the instant new inventory is
//! released: sleeps until the release instant with millisecond accuracy,
//! hammers cache-bypassing reloads in a tight window around it, then
//! retries the slot / quantities / continue interaction until it sticks or
//! the attempt budget runs out.

pub mod browser;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod lang;
pub mod orchestrator;
pub mod refresh;
pub mod sequencer;

use std::path::PathBuf;

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("colosseo-sniper").join("logs"))
}

/// Initialize logging: console plus a daily rolling file when a log
/// directory is available.
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "colosseo-sniper.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}
