use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::Engine;
use crate::export::health::HealthMetrics;
use crate::export::ApiServer;
use crate::ingest::{self, poll::Poller, replay};

/// Agent orchestrates all components: the engine task, delivery sources
/// and the API server.
pub struct Agent {
    cfg: Config,
    engine: Arc<Mutex<Engine>>,
    health: Arc<HealthMetrics>,
    api: Option<ApiServer>,
    engine_task: Option<tokio::task::JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Agent {
    /// Creates a new Agent, initializing the engine and health metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.api.addr).context("creating health metrics")?);
        let engine = Arc::new(Mutex::new(Engine::new(
            cfg.analysis.high_latency_threshold,
        )));

        Ok(Self {
            cfg,
            engine,
            health,
            api: None,
            engine_task: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Start all components and begin accepting deliveries.
    pub async fn start(&mut self) -> Result<()> {
        let (tx, rx) = mpsc::channel(self.cfg.channel_capacity);

        // 1. Engine ingest task: the single writer behind the channel.
        self.engine_task = Some(tokio::spawn(ingest::run_engine(
            self.engine.clone(),
            rx,
            self.health.clone(),
            self.cancel.clone(),
        )));

        // 2. API server (also accepts pushed batches via tx).
        let api = ApiServer::new(self.engine.clone(), self.health.clone(), tx.clone());
        api.start().await.context("starting api server")?;
        self.api = Some(api);

        // 3. Capture replay, delivered once at startup.
        if !self.cfg.delivery.replay.path.is_empty() {
            let path = self.cfg.delivery.replay.path.clone();
            let replay_tx = tx.clone();
            tokio::spawn(async move {
                if let Err(e) = replay::run(Path::new(&path), replay_tx).await {
                    warn!(error = %e, path, "capture replay failed");
                }
            });
        }

        // 4. Collector polling.
        if self.cfg.delivery.poll.enabled {
            let poller = Poller::new(&self.cfg.delivery.poll).context("creating poller")?;
            tokio::spawn(poller.run(tx, self.cancel.clone()));
        }

        info!("agent started");

        Ok(())
    }

    /// Gracefully stop all components.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        if let Some(api) = self.api.take() {
            api.stop().await.context("stopping api server")?;
        }

        if let Some(task) = self.engine_task.take() {
            let _ = task.await;
        }

        info!("agent stopped");

        Ok(())
    }
}
