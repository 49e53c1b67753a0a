use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use linklens::agent::Agent;
use linklens::config::Config;
use linklens::engine::{Engine, StructuralFilter, TextFilter};
use linklens::ingest::replay;

/// Control-plane link analytics agent.
#[derive(Parser)]
#[command(name = "linklens", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,

    /// Analyze a capture file offline and print the snapshot as JSON.
    Replay {
        /// Path to a JSON capture file (array or one object per line).
        file: PathBuf,

        /// Restrict analysis to one link.
        #[arg(long)]
        link: Option<u32>,

        /// Restrict analysis to one endpoint on that link.
        #[arg(long, requires = "link")]
        endpoint: Option<u32>,

        /// Free-text filter for the surfaced-event count.
        #[arg(long, default_value = "")]
        text: String,
    },
}

/// Build-time version info, injected via RUSTFLAGS or build.rs.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Target OS.
    pub fn target_os() -> &'static str {
        std::env::consts::OS
    }

    /// Target architecture.
    pub fn target_arch() -> &'static str {
        std::env::consts::ARCH
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            target_os(),
            target_arch(),
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("linklens {}", version::full());
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    // Offline replay needs no config or runtime services.
    if let Some(Command::Replay {
        file,
        link,
        endpoint,
        text,
    }) = cli.command
    {
        return replay_file(&file, link, endpoint, &text);
    }

    // Config is required for the main agent run.
    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;

    let cfg = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting linklens",
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
    // Set up signal handling.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        let _ = shutdown_tx.send(());
    });

    // Start the agent.
    let mut agent = Agent::new(cfg)?;
    agent.start().await?;

    // Wait for shutdown signal.
    let _ = shutdown_rx.await;

    // Graceful shutdown.
    agent.stop().await?;

    tracing::info!("linklens stopped");

    Ok(())
}

/// One-shot offline analysis of a capture file.
fn replay_file(
    file: &std::path::Path,
    link: Option<u32>,
    endpoint: Option<u32>,
    text: &str,
) -> Result<()> {
    let events = replay::load_events(file)?;

    let mut engine = Engine::new(Duration::from_secs(1));
    let accepted = engine.ingest(events);

    let structural = StructuralFilter {
        link_id: link,
        endpoint_id: endpoint,
    };
    let snapshot = engine.reanalyze(structural, TextFilter::new(text));

    tracing::info!(
        accepted,
        surfaced = engine.surfaced_events().count(),
        "capture analyzed",
    );

    let json = serde_json::to_string_pretty(&snapshot).context("encoding snapshot")?;
    println!("{json}");

    Ok(())
}
