use std::net::SocketAddr;
use std::path::PathBuf;

use abyss_sniffer::agent::Agent;
use abyss_sniffer::capture;
use abyss_sniffer::config::Config;
use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

/// Local packet sniffer streaming flow telemetry over WebSocket.
#[derive(Parser)]
#[command(name = "abyss-sniffer", about, disable_version_flag = true)]
struct Cli {
    /// Interface to capture on (auto-selected when omitted).
    #[arg(short, long)]
    interface: Option<String>,

    /// WebSocket port to publish telemetry on.
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,

    /// List capture interfaces and exit.
    #[arg(short, long)]
    list: bool,

    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print version information and exit.
    #[arg(short = 'V', long)]
    version: bool,
}

/// Build-time version info, injected via RUSTFLAGS or build.rs.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("abyss-sniffer {}", version::full());
        return Ok(());
    }

    if cli.list {
        let interfaces = capture::list_interfaces().context("listing capture interfaces")?;
        for iface in &interfaces {
            println!("{iface}");
        }
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    // Flags override the file.
    if let Some(interface) = cli.interface {
        cfg.interface = interface;
    }
    if let Some(port) = cli.port {
        cfg.publisher.addr = SocketAddr::new(cfg.publisher.addr.ip(), port);
    }
    cfg.validate().context("validating configuration")?;

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting abyss-sniffer",
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("registering SIGTERM handler")?;

    // Set up signal handling.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
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
    if let Err(e) = agent.start().await {
        let _ = agent.stop().await;
        return Err(e);
    }

    // Wait for shutdown signal.
    let _ = shutdown_rx.await;

    // Graceful shutdown.
    agent.stop().await?;

    tracing::info!("abyss-sniffer stopped");

    Ok(())
}
