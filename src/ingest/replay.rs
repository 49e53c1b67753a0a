use std::path::Path;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::info;

use super::Batch;
use crate::event::RawEvent;

/// Loads a capture file: either a JSON array of events or one JSON object
/// per line. The whole file becomes one delivery batch, preserving capture
/// order.
pub fn load_events(path: &Path) -> Result<Vec<RawEvent>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading capture file {}", path.display()))?;

    let trimmed = data.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(&data)
            .with_context(|| format!("parsing capture file {}", path.display()));
    }

    let mut events = Vec::new();
    for (lineno, line) in data.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: RawEvent = serde_json::from_str(line)
            .with_context(|| format!("parsing {} line {}", path.display(), lineno + 1))?;
        events.push(event);
    }

    Ok(events)
}

/// Replays a capture file into the delivery channel as a single batch.
pub async fn run(path: &Path, tx: mpsc::Sender<Batch>) -> Result<()> {
    let events = load_events(path)?;
    let count = events.len();

    tx.send(events)
        .await
        .context("delivering replayed capture batch")?;

    info!(path = %path.display(), events = count, "capture replay delivered");

    Ok(())
}
