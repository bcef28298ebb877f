//! Blocking human checkpoints
//!
//! Two moments in a run require a human: clearing the anti-bot challenge
//! before automation starts, and completing payment after a successful
//! attempt. Both are plain prompt-and-wait gates, kept well away from the
//! timing-critical sections.

use async_trait::async_trait;
use tracing::info;

/// A synchronous "wait for the human to say go" gate
#[async_trait]
pub trait Checkpoint: Send + Sync {
    async fn confirm(&self, prompt: &str) -> std::io::Result<()>;
}

/// Reads a confirmation line from stdin
pub struct StdinCheckpoint;

#[async_trait]
impl Checkpoint for StdinCheckpoint {
    async fn confirm(&self, prompt: &str) -> std::io::Result<()> {
        info!(">>> ACTION REQUIRED: {}", prompt);
        let prompt = prompt.to_string();

        tokio::task::spawn_blocking(move || {
            use std::io::{BufRead, Write};

            let mut out = std::io::stdout().lock();
            writeln!(out, "{}", "-".repeat(60))?;
            write!(out, ">>> {} ", prompt)?;
            out.flush()?;

            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;

            writeln!(out, "{}", "-".repeat(60))?;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)?
    }
}
