//! Prometheus metrics export

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use crate::utils::{Cadence, FailureKind, PaymentSource};

pub fn init_metrics(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    register_metrics();
    info!("Prometheus metrics server started on {}", addr);
    Ok(())
}

fn register_metrics() {
    // Ledger
    describe_counter!("dca_engine_payments_committed_total", "Payments recorded in the ledger");
    describe_counter!("dca_engine_payments_duplicate_total", "Commits skipped as already recorded");
    describe_counter!("dca_engine_commits_flagged_total", "Commits that could not be persisted");

    // Executor
    describe_counter!("dca_engine_user_failures_total", "Failed per-user purchase attempts");
    describe_counter!("dca_engine_users_skipped_total", "Users skipped as already paid this period");
    describe_histogram!("dca_engine_cycle_latency_ms", "Execution cycle duration");
    describe_gauge!("dca_engine_cycle_last_committed", "Payments committed by the last cycle");

    // Reconciler
    describe_counter!("dca_engine_events_reconciled_total", "Payment events healed into the ledger");
    describe_counter!("dca_engine_events_orphaned_total", "Payment events without a matching plan or user");
    describe_counter!("dca_engine_accruals_backfilled_total", "Deferred plan accruals applied by the reconciler");
    describe_counter!("dca_engine_event_errors_total", "Payment events that failed processing");
    describe_gauge!("dca_engine_reconcile_head_block", "Head block of the last reconcile sweep");
}

fn source_label(source: PaymentSource) -> &'static str {
    match source {
        PaymentSource::Executor => "executor",
        PaymentSource::Reconciler => "reconciler",
    }
}

pub fn record_payment_committed(source: PaymentSource) {
    counter!("dca_engine_payments_committed_total", "source" => source_label(source)).increment(1);
}

pub fn record_duplicate(source: PaymentSource) {
    counter!("dca_engine_payments_duplicate_total", "source" => source_label(source)).increment(1);
}

pub fn record_flagged_commit() {
    counter!("dca_engine_commits_flagged_total").increment(1);
}

pub fn record_user_failure(kind: FailureKind) {
    counter!("dca_engine_user_failures_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_user_skipped() {
    counter!("dca_engine_users_skipped_total").increment(1);
}

pub fn record_cycle(cadence: Cadence, latency_ms: f64, committed: usize) {
    histogram!("dca_engine_cycle_latency_ms", "cadence" => cadence.as_str()).record(latency_ms);
    gauge!("dca_engine_cycle_last_committed", "cadence" => cadence.as_str()).set(committed as f64);
}

pub fn record_reconciled() {
    counter!("dca_engine_events_reconciled_total").increment(1);
}

pub fn record_accrual_backfilled() {
    counter!("dca_engine_accruals_backfilled_total").increment(1);
}

pub fn record_orphan() {
    counter!("dca_engine_events_orphaned_total").increment(1);
}

pub fn record_event_error() {
    counter!("dca_engine_event_errors_total").increment(1);
}

pub fn record_reconcile_head(block: u64) {
    gauge!("dca_engine_reconcile_head_block").set(block as f64);
}
