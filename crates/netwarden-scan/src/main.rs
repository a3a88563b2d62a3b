//! CLI entry point for the netwarden scan daemon.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use netwarden_core::events::TracingSink;
use netwarden_core::ScanError;

use netwarden_scan::config::ScanConfig;
use netwarden_scan::probe::TcpProber;
use netwarden_scan::store::{MemoryDeviceStore, MemoryNetworkRegistry};
use netwarden_scan::ScanManager;

#[derive(Parser)]
#[command(name = "netwarden-scan")]
#[command(about = "LAN reconnaissance daemon for the netwarden inventory")]
struct Cli {
    /// Target to scan (IPv4 CIDR, e.g., 192.168.1.0/24).
    #[arg(short, long)]
    target: Option<String>,

    /// Run a single one-shot sweep and exit.
    #[arg(long)]
    once: bool,

    /// Run as daemon with scheduled sweeps and liveness aging.
    #[arg(long)]
    daemon: bool,

    /// Config file prefix (default: netwarden).
    #[arg(short, long, default_value = "netwarden")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let scan_config = load_scan_config(&cli.config)?;

    let registry = Arc::new(MemoryNetworkRegistry::new());
    let devices = Arc::new(MemoryDeviceStore::new());
    let prober = Arc::new(TcpProber::new(&scan_config));
    let events = Arc::new(TracingSink);

    let manager = Arc::new(ScanManager::new(
        registry,
        devices,
        prober,
        events,
        scan_config.clone(),
    ));

    if cli.once {
        let target = cli
            .target
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--target is required in --once mode"))?;
        run_once(&manager, target).await
    } else if cli.daemon {
        run_daemon(manager, &scan_config).await
    } else {
        anyhow::bail!("Specify --once (one-shot sweep) or --daemon (scheduled scanning)");
    }
}

/// Sweep one ad-hoc target to completion.
async fn run_once(manager: &ScanManager, target: &str) -> anyhow::Result<()> {
    let network = manager.create_network(target, target, "ad-hoc target").await?;
    manager.start_scan(network.id).await?;
    wait_until_idle(manager).await;

    let state = manager.get_state();
    if let Some(error) = state.error {
        anyhow::bail!("sweep failed: {error}");
    }

    let summary = manager.status_summary(network.id).await?;
    tracing::info!(
        cidr = %network.cidr,
        online = summary.online,
        idle = summary.idle,
        offline = summary.offline,
        "Sweep complete"
    );
    Ok(())
}

/// Scheduled sweeps per configured network plus a liveness ticker.
async fn run_daemon(manager: Arc<ScanManager>, config: &ScanConfig) -> anyhow::Result<()> {
    let mut handles = Vec::new();

    for schedule in &config.networks {
        if !schedule.enabled {
            tracing::info!(cidr = %schedule.cidr, "Network disabled, skipping");
            continue;
        }
        let name = schedule.name.clone().unwrap_or_else(|| schedule.cidr.clone());
        let network = manager
            .create_network(&schedule.cidr, &name, "scheduled target")
            .await?;

        let manager = manager.clone();
        let interval_secs = schedule.interval_secs;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                match manager.start_scan(network.id).await {
                    Ok(()) => wait_until_idle(&manager).await,
                    // Another network's sweep is in flight; retry next tick.
                    Err(ScanError::AlreadyRunning) => {
                        tracing::warn!(cidr = %network.cidr, "Sweep already active, deferring");
                    }
                    Err(e) => {
                        tracing::error!(cidr = %network.cidr, error = %e, "Scheduled sweep failed");
                    }
                }
            }
        }));
    }

    if handles.is_empty() {
        anyhow::bail!("No enabled networks configured; add [[scan.networks]] entries");
    }

    let liveness_manager = manager.clone();
    let tick = Duration::from_secs(config.liveness_tick_secs.max(1));
    handles.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        loop {
            ticker.tick().await;
            if let Err(e) = liveness_manager.evaluate_liveness().await {
                tracing::error!(error = %e, "Liveness pass failed");
            }
        }
    }));

    tracing::info!(networks = handles.len() - 1, "Daemon started");

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Daemon task panicked");
        }
    }
    Ok(())
}

async fn wait_until_idle(manager: &ScanManager) {
    while manager.is_running() {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

fn load_scan_config(file_prefix: &str) -> anyhow::Result<ScanConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("NETWARDEN_SCAN")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match cfg.get::<ScanConfig>("scan") {
        Ok(c) => Ok(c),
        Err(_) => Ok(ScanConfig::default()),
    }
}
