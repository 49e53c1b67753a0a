use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Batch;
use crate::config::PollConfig;
use crate::event::RawEvent;

/// Polls an upstream collector for event batches at a fixed interval.
///
/// A failed poll is logged and skipped; the collector owns retry and
/// connection-level timeout semantics beyond the per-request timeout here.
pub struct Poller {
    http: reqwest::Client,
    endpoint: String,
    interval: Duration,
}

impl Poller {
    /// Create a new poller from configuration.
    pub fn new(cfg: &PollConfig) -> Result<Self> {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(10)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
            interval: cfg.interval,
        })
    }

    /// Fetch one batch from the collector.
    async fn fetch(&self) -> Result<Vec<RawEvent>> {
        let response = self
            .http
            .get(&self.endpoint)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("requesting {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("unexpected status {} from collector: {}", status, body);
        }

        response
            .json()
            .await
            .context("decoding collector response")
    }

    /// Polls until shutdown, delivering each non-empty fetch as a batch.
    pub async fn run(self, tx: mpsc::Sender<Batch>, cancel: CancellationToken) {
        info!(endpoint = %self.endpoint, interval = ?self.interval, "collector polling started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => break,
            }

            let events = match self.fetch().await {
                Ok(events) => events,
                Err(err) => {
                    warn!(error = %err, "collector poll failed");
                    continue;
                }
            };

            if events.is_empty() {
                debug!("collector returned no events");
                continue;
            }

            if tx.send(events).await.is_err() {
                // Engine side gone; nothing left to deliver to.
                break;
            }
        }

        info!("collector polling stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_configured_endpoint() {
        let cfg = PollConfig {
            enabled: true,
            endpoint: "http://collector:9000/events".to_string(),
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(5),
        };
        let poller = Poller::new(&cfg).expect("builds");
        assert_eq!(poller.endpoint, "http://collector:9000/events");
        assert_eq!(poller.interval, Duration::from_secs(2));
    }

    #[test]
    fn test_new_defaults_zero_timeout() {
        let cfg = PollConfig {
            enabled: true,
            endpoint: "http://collector:9000/events".to_string(),
            interval: Duration::from_secs(2),
            timeout: Duration::ZERO,
        };
        assert!(Poller::new(&cfg).is_ok());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let cfg = PollConfig {
            enabled: true,
            endpoint: "http://127.0.0.1:1/events".to_string(),
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(1),
        };
        let poller = Poller::new(&cfg).expect("builds");
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(poller.run(tx, cancel.clone()));
        cancel.cancel();
        task.await.expect("task completes");
    }
}
