//! DCA Engine
//!
//! Runs scheduled dollar-cost-averaging purchases and keeps the payment
//! ledger consistent with on-chain `Payment` events:
//! - Daily and weekly execution cycles driven by cron expressions
//! - Periodic reconciliation sweeps over recent blocks
//! - One-shot maintenance commands for operators

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use dca_engine::config::AppConfig;
use dca_engine::execution::{ExecutorSettings, HttpQuoteClient, PaymentExecutor};
use dca_engine::feeds::HttpRateOracle;
use dca_engine::ledger::{ConservationViolation, PaymentLedger};
use dca_engine::network::RpcChainClient;
use dca_engine::notifications::WebhookNotifier;
use dca_engine::reconciler::{EventReconciler, ReconcilerSettings};
use dca_engine::scheduling::Scheduler;
use dca_engine::secrets::provider_from_config;
use dca_engine::telemetry::{init_logging, init_metrics};
use dca_engine::utils::{Cadence, PaymentStatus};

/// DCA Engine - scheduled on-chain purchases with an idempotent ledger
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until interrupted (default)
    Serve,
    /// Run a single execution cycle
    RunCycle {
        #[arg(long)]
        cadence: Cadence,
    },
    /// Run a single reconciliation sweep
    Reconcile {
        /// Blocks to look back from head; defaults to schedule.lookback_blocks
        #[arg(long)]
        lookback: Option<u64>,
    },
    /// Check ledger conservation
    Audit {
        /// Recompute totals for users whose recorded total drifted
        #[arg(long)]
        repair: bool,
    },
    /// Manually set a payment record's status
    MarkStatus {
        #[arg(long)]
        tx: String,
        #[arg(long)]
        status: PaymentStatus,
    },
}

struct Services {
    ledger: Arc<PaymentLedger>,
    executor: Arc<PaymentExecutor>,
    reconciler: Arc<EventReconciler>,
}

async fn build_services(config: &AppConfig) -> Result<Services> {
    let ledger = Arc::new(
        PaymentLedger::open(&config.ledger)
            .await
            .context("Failed to open payment ledger")?,
    );
    let chain = Arc::new(RpcChainClient::new(&config.rpc)?);
    let oracle = Arc::new(HttpRateOracle::new(&config.oracle)?);
    let quotes = Arc::new(HttpQuoteClient::new(&config.quote)?);
    let notifier = Arc::new(WebhookNotifier::new(&config.notifications)?);
    let secrets = provider_from_config(&config.secrets);

    let executor = Arc::new(PaymentExecutor::new(
        ExecutorSettings::from_config(config)?,
        ledger.clone(),
        chain.clone(),
        quotes,
        oracle.clone(),
        secrets,
        notifier,
    ));
    let reconciler = Arc::new(EventReconciler::new(
        ReconcilerSettings::from_config(config)?,
        ledger.clone(),
        chain,
        oracle,
    ));

    Ok(Services {
        ledger,
        executor,
        reconciler,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)?;
    if let Some(level) = args.log_level {
        config.telemetry.log_level = level;
    }

    // Hold the guard so the file writer flushes on exit
    let _log_guard = init_logging(&config.telemetry)?;

    info!("Starting DCA Engine v{}", env!("CARGO_PKG_VERSION"));
    info!("Chain id: {}", config.rpc.chain_id);

    if config.telemetry.enable_metrics {
        init_metrics(config.telemetry.metrics_port)?;
        info!("Metrics server started on port {}", config.telemetry.metrics_port);
    }

    let services = build_services(&config).await?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, services).await?,
        Command::RunCycle { cadence } => {
            let report = services.executor.run_cycle(cadence).await?;
            info!(
                "{} cycle: attempted={} committed={} duplicates={} skipped={} failed={}",
                cadence,
                report.attempted,
                report.committed.len(),
                report.duplicates.len(),
                report.skipped.len(),
                report.failures.len()
            );
            for failure in &report.failures {
                warn!("{} failed ({}): {}", failure.user_address, failure.kind, failure.reason);
            }
        }
        Command::Reconcile { lookback } => {
            let lookback = lookback.unwrap_or(config.schedule.lookback_blocks);
            let report = services.reconciler.reconcile_window(lookback).await?;
            info!(
                "Blocks {}..={}: events={} reconciled={} duplicates={} orphans={} errors={}",
                report.from_block,
                report.to_block,
                report.events_seen,
                report.reconciled.len(),
                report.duplicates,
                report.orphans.len(),
                report.errors.len()
            );
        }
        Command::Audit { repair } => audit(&services.ledger, repair).await?,
        Command::MarkStatus { tx, status } => {
            let record = services.ledger.patch_status(&tx, status).await?;
            info!("Payment {} now {}", record.tx_hash, record.status);
        }
    }

    info!("DCA Engine stopped");
    Ok(())
}

async fn serve(config: &AppConfig, services: Services) -> Result<()> {
    let scheduler = Scheduler::new(config.schedule.clone(), services.executor, services.reconciler);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = scheduler.spawn(shutdown_rx)?;
    info!("Scheduler running {} jobs", handles.len());

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, gracefully stopping..."),
        Err(err) => error!("Error listening for shutdown signal: {}", err),
    }

    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Scheduler job ended abnormally: {}", e);
        }
    }
    Ok(())
}

async fn audit(ledger: &PaymentLedger, repair: bool) -> Result<()> {
    let violations = ledger.audit().await;
    if violations.is_empty() {
        info!("Ledger conserved: no violations");
        return Ok(());
    }

    for violation in &violations {
        warn!("{:?}", violation);
    }

    if repair {
        for violation in &violations {
            if let ConservationViolation::TotalMismatch { user, .. } = violation {
                let totals = ledger.rebuild_user_totals(user).await?;
                info!("Rebuilt {} total_invested={}", user, totals.total_invested);
            }
        }
    }

    anyhow::ensure!(repair, "{} conservation violations found", violations.len());
    Ok(())
}
