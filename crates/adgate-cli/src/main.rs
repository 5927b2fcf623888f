use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use adgate::{AdGate, GateConfig, GateEvent, Host, HttpTransport, MemoryHost};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "adgate", version, about = "Ad-blocker detection gate")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one detection cycle against a live site and print the report
    Probe {
        /// Site the bait URLs are resolved against
        #[arg(long)]
        base_url: String,
        /// JSON or TOML options file (defaults to ADGATE_* env vars)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Drive the full gate against an in-memory page
    Simulate {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Class names the simulated blocker hides
        #[arg(long = "block-class")]
        block_class: Vec<String>,
        /// URL fragments the simulated blocker cancels
        #[arg(long = "block-url")]
        block_url: Vec<String>,
        /// Report a Brave browser
        #[arg(long)]
        brave: bool,
        /// Turn the blocker off after this many seconds and dismiss the gate
        #[arg(long)]
        unblock_after: Option<u64>,
        /// Total simulated run time in seconds
        #[arg(long, default_value_t = 30)]
        run_for: u64,
    },
}

fn load_config(path: Option<&Path>) -> Result<GateConfig> {
    match path {
        Some(path) => GateConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => GateConfig::from_env().context("invalid ADGATE_* environment"),
    }
}

async fn probe(base_url: &str, config: GateConfig) -> Result<()> {
    let transport = HttpTransport::new(base_url).context("failed to build HTTP transport")?;
    let host = Host::memory(MemoryHost::new().shared()).with_transport(Arc::new(transport));
    let gate = AdGate::new(config, host);

    let blocked = gate.detect().await;
    info!(blocked, base_url, "Probe finished");

    let report = gate
        .last_report()
        .context("detection cycle produced no report")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn simulate(
    config: GateConfig,
    block_class: Vec<String>,
    block_url: Vec<String>,
    brave: bool,
    unblock_after: Option<u64>,
    run_for: u64,
) -> Result<()> {
    let host = MemoryHost::new().shared();
    for class in &block_class {
        host.block_class(class);
    }
    for url in &block_url {
        host.block_url(url);
    }
    host.set_brave(brave);

    let gate = AdGate::new(config, Host::memory(host.clone()));
    gate.init();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(run_for);
    let mut unblock_at =
        unblock_after.map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        ticker.tick().await;
        let now = tokio::time::Instant::now();
        if now >= deadline {
            break;
        }
        if unblock_at.is_some_and(|at| now >= at) {
            unblock_at = None;
            host.unblock_all();
            info!("Simulated blocker disabled; dismissing gate");
            gate.handle_event(GateEvent::DismissRequested);
        }

        let snapshot = gate.snapshot();
        info!(
            state = %snapshot.state,
            gate_visible = snapshot.gate_visible,
            seconds_remaining = ?snapshot.seconds_remaining,
            checks = snapshot.check_count,
            "Gate status"
        );
        if snapshot.redirected {
            break;
        }
    }

    let snapshot = gate.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    for url in host.navigations() {
        println!("navigated: {url}");
    }
    gate.destroy();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Probe { base_url, config } => {
            let config = load_config(config.as_deref())?;
            probe(&base_url, config).await
        }
        Command::Simulate {
            config,
            block_class,
            block_url,
            brave,
            unblock_after,
            run_for,
        } => {
            let config = load_config(config.as_deref())?;
            simulate(config, block_class, block_url, brave, unblock_after, run_for).await
        }
    }
}
