//! rpcwatchd — the rpcwatch daemon.
//!
//! Single binary that assembles every rpcwatch subsystem:
//! - Status store (JSON snapshot on disk)
//! - JSON-RPC prober
//! - Alert sink (Lark webhook, or log-only)
//! - Scheduler + cron trigger
//! - Read API
//!
//! # Usage
//!
//! ```text
//! RPC_LIST_JSON='{"eth":[{"name":"public","rpc":"https://..."}]}' rpcwatchd run
//! rpcwatchd run --config /etc/rpcwatch.toml --port 8080
//! rpcwatchd check --config /etc/rpcwatch.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use rpcwatch_api::{ApiState, build_router};
use rpcwatch_core::{MonitorConfig, interval_minutes};
use rpcwatch_health::{AlertSink, LarkWebhook, NoopSink, RpcProber};
use rpcwatch_scheduler::{Scheduler, spawn_cron_trigger};
use rpcwatch_state::StatusStore;

const DEFAULT_LOG_FILTER: &str = "info,rpcwatchd=debug,rpcwatch=debug";

#[derive(Parser)]
#[command(name = "rpcwatchd", version, about = "RPC endpoint health monitor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe endpoints on schedule and serve the read API.
    Run(ConfigArgs),
    /// Validate the configuration and print what would be monitored.
    Check(ConfigArgs),
}

/// Settings that override the config file.
#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// Path to a TOML config file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Cron expression for the sweep cadence.
    #[arg(long, env = "CRON_EXPRESSION")]
    schedule: Option<String>,

    /// Samples kept per endpoint.
    #[arg(long, env = "MAX_ENTRIES")]
    max_entries: Option<usize>,

    /// Endpoint registry as JSON: chain → list of {name, rpc}.
    #[arg(long = "rpc-list", env = "RPC_LIST_JSON")]
    rpc_list: Option<String>,

    /// Status snapshot path.
    #[arg(long)]
    data_file: Option<PathBuf>,

    /// Address to bind the API to.
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Port to bind the API to.
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Lark/Feishu bot webhook for alerts.
    #[arg(long, env = "LARK_WEBHOOK_URL")]
    webhook_url: Option<String>,
}

impl ConfigArgs {
    /// Defaults, then the config file, then flags and environment.
    fn load(&self) -> anyhow::Result<MonitorConfig> {
        let mut config = match &self.config {
            Some(path) => MonitorConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => MonitorConfig::default(),
        };

        if let Some(schedule) = non_empty(&self.schedule) {
            config.schedule = schedule.to_string();
        }
        if let Some(max_entries) = self.max_entries {
            config.max_entries = max_entries;
        }
        if let Some(raw) = non_empty(&self.rpc_list) {
            config.set_registry_json(raw)?;
        }
        if let Some(data_file) = &self.data_file {
            config.data_file = data_file.clone();
        }
        if let Some(host) = non_empty(&self.host) {
            config.server.host = host.to_string();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(url) = non_empty(&self.webhook_url) {
            config.alert.webhook_url = Some(url.to_string());
        }
        Ok(config)
    }
}

/// Empty environment variables count as unset.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args.load()?).await,
        Command::Check(args) => check(&args.load()?),
    }
}

async fn run(config: MonitorConfig) -> anyhow::Result<()> {
    // ── Validate configuration ─────────────────────────────────

    let registry = Arc::new(config.registry()?);
    let schedule = config.cron()?;
    let request_timeout = config.request_timeout()?;
    let probe_delay = config.probe_delay()?;
    info!(
        chains = registry.chains().count(),
        endpoints = registry.len(),
        schedule = schedule.expression(),
        max_entries = config.max_entries,
        "rpcwatchd starting"
    );
    if config.history_too_short_for_alerts() {
        warn!(
            max_entries = config.max_entries,
            "history shorter than 3 samples, every consecutive failure will alert"
        );
    }

    // ── Initialize subsystems ──────────────────────────────────

    let store = StatusStore::open(&config.data_file, config.max_entries);

    let prober = Arc::new(RpcProber::new(request_timeout));

    let alerts: Arc<dyn AlertSink> = match &config.alert.webhook_url {
        Some(url) => {
            info!("lark webhook alerts enabled");
            Arc::new(LarkWebhook::new(url.clone(), config.alert_timeout()?)?)
        }
        None => {
            warn!("no webhook configured, alerts will only be logged");
            Arc::new(NoopSink)
        }
    };

    let scheduler = Arc::new(
        Scheduler::new(Arc::clone(&registry), store.clone(), prober, alerts)
            .with_probe_delay(probe_delay),
    );

    // ── Start background tasks ─────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (tick_tx, tick_rx) = mpsc::channel(1);

    let trigger_handle = spawn_cron_trigger(schedule, tick_tx, shutdown_rx.clone());
    let scheduler_handle = tokio::spawn(Arc::clone(&scheduler).run(tick_rx, shutdown_rx));

    // ── Start API server ───────────────────────────────────────

    let router = build_router(ApiState {
        store,
        registry,
        interval_minutes: interval_minutes(&config.schedule),
    });
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = trigger_handle.await;
    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "scheduler task failed");
    }

    info!("rpcwatchd stopped");
    Ok(())
}

/// Print the effective configuration without probing anything.
fn check(config: &MonitorConfig) -> anyhow::Result<()> {
    let registry = config.registry()?;
    let schedule = config.cron()?;
    config.request_timeout()?;
    config.probe_delay()?;
    config.alert_timeout()?;

    println!("schedule: {}", schedule.expression());
    match interval_minutes(&config.schedule) {
        Some(minutes) => println!("interval: every {minutes} minutes"),
        None => println!("interval: irregular"),
    }
    let mut after = Utc::now();
    for _ in 0..3 {
        let Some(next) = schedule.next_after(after) else {
            break;
        };
        println!("next sweep: {next}");
        after = next;
    }
    println!("history: {} samples per endpoint", config.max_entries);
    if config.history_too_short_for_alerts() {
        println!("warning: history shorter than 3 samples, every consecutive failure will alert");
    }
    println!("snapshot: {}", config.data_file.display());
    println!(
        "alerts: {}",
        if config.alert.webhook_url.is_some() { "lark webhook" } else { "log only" }
    );
    println!("endpoints: {}", registry.len());
    for (chain, endpoints) in registry.chains() {
        println!("  {chain}");
        for endpoint in endpoints {
            println!("    {:<16} {}", endpoint.name, endpoint.target);
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
