//! Event Reconciler
//!
//! Rolling-window scan of the DCA program's `Payment` events. Anything the
//! executor failed to record (crash after submit, failed commit, payments
//! initiated elsewhere) is healed into the ledger here.

pub mod events;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::execution::interpreter::ReceiptInterpreter;
use crate::feeds::{OracleError, RateOracle};
use crate::ledger::settlement::{block_time, implied_price, plan_accrual};
use crate::ledger::{LedgerError, PaymentCommit, PaymentLedger, PaymentRecord};
use crate::network::{ChainClient, ChainError, ChainLog, LogQuery};
use crate::telemetry::metrics;
use crate::utils::helpers::{normalize_hex, to_smallest_unit};
use crate::utils::PaymentSource;

use events::{decode_payment, payment_signatures, EventDecodeError, PaymentEvent};

/// Errors that abort a sweep
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to read head block: {0}")]
    Head(ChainError),
    #[error("failed to query payment logs: {0}")]
    Logs(ChainError),
}

/// Per-event failures; logged and skipped
#[derive(Debug, Error)]
pub enum EventError {
    #[error(transparent)]
    Decode(#[from] EventDecodeError),
    #[error("log carries no transaction hash")]
    MissingTxHash,
    #[error("valuation failed: {0}")]
    Oracle(#[from] OracleError),
    #[error("ledger commit failed: {0}")]
    Ledger(#[from] LedgerError),
}

enum EventOutcome {
    Reconciled(String),
    Backfilled(String),
    Duplicate,
    Orphan,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub from_block: u64,
    pub to_block: u64,
    pub events_seen: usize,
    /// Transaction hashes newly recorded
    pub reconciled: Vec<String>,
    /// Transaction hashes whose deferred plan accrual was applied
    pub backfilled: Vec<String>,
    pub duplicates: usize,
    /// Payment ids without a matching plan or user
    pub orphans: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub dca_contract: Address,
    pub swap_pool: Address,
    pub input_decimals: u8,
    pub output_decimals: u8,
    pub lookback_blocks: u64,
}

impl ReconcilerSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            dca_contract: Address::from_str(&config.contracts.dca_contract)
                .context("Invalid DCA contract address")?,
            swap_pool: Address::from_str(&config.contracts.swap_pool).context("Invalid pool address")?,
            input_decimals: config.contracts.input_token.decimals,
            output_decimals: config.contracts.output_token.decimals,
            lookback_blocks: config.schedule.lookback_blocks,
        })
    }
}

pub struct EventReconciler {
    settings: ReconcilerSettings,
    ledger: Arc<PaymentLedger>,
    chain: Arc<dyn ChainClient>,
    oracle: Arc<dyn RateOracle>,
    interpreter: ReceiptInterpreter,
}

impl EventReconciler {
    pub fn new(
        settings: ReconcilerSettings,
        ledger: Arc<PaymentLedger>,
        chain: Arc<dyn ChainClient>,
        oracle: Arc<dyn RateOracle>,
    ) -> Self {
        let interpreter = ReceiptInterpreter::new(
            settings.swap_pool,
            settings.dca_contract,
            settings.input_decimals,
            settings.output_decimals,
        );
        Self {
            settings,
            ledger,
            chain,
            oracle,
            interpreter,
        }
    }

    /// Sweep the configured lookback window
    pub async fn reconcile(&self) -> Result<ReconcileReport, ReconcileError> {
        self.reconcile_window(self.settings.lookback_blocks).await
    }

    /// Sweep `[head - lookback_blocks, head]`
    pub async fn reconcile_window(&self, lookback_blocks: u64) -> Result<ReconcileReport, ReconcileError> {
        let head = self.chain.block_number().await.map_err(ReconcileError::Head)?;
        let from = head.saturating_sub(lookback_blocks);
        metrics::record_reconcile_head(head);

        let logs = self
            .chain
            .query_logs(LogQuery {
                address: self.settings.dca_contract,
                event_signatures: payment_signatures(),
                from_block: from,
                to_block: head,
            })
            .await
            .map_err(ReconcileError::Logs)?;

        info!("Found {} Payment events in blocks {}..={}", logs.len(), from, head);

        let mut report = ReconcileReport {
            from_block: from,
            to_block: head,
            events_seen: logs.len(),
            ..Default::default()
        };

        for log in &logs {
            match self.process_log(log, head).await {
                Ok(EventOutcome::Reconciled(hash)) => {
                    metrics::record_reconciled();
                    report.reconciled.push(hash);
                }
                Ok(EventOutcome::Backfilled(hash)) => {
                    metrics::record_accrual_backfilled();
                    report.backfilled.push(hash);
                }
                Ok(EventOutcome::Duplicate) => report.duplicates += 1,
                Ok(EventOutcome::Orphan) => {
                    metrics::record_orphan();
                    report.orphans.push(describe(log));
                }
                Err(e) => {
                    metrics::record_event_error();
                    warn!("Skipping Payment event {}: {}", describe(log), e);
                    report.errors.push(format!("{}: {}", describe(log), e));
                }
            }
        }

        info!(
            "Reconcile sweep done: reconciled={} backfilled={} duplicates={} orphans={} errors={}",
            report.reconciled.len(),
            report.backfilled.len(),
            report.duplicates,
            report.orphans.len(),
            report.errors.len()
        );
        Ok(report)
    }

    async fn process_log(&self, log: &ChainLog, head: u64) -> Result<EventOutcome, EventError> {
        let event = decode_payment(log)?;
        let tx_hash = event.tx_hash.ok_or(EventError::MissingTxHash)?;
        let tx_key = normalize_hex(&tx_hash.to_string());
        let user_address = normalize_hex(&event.user.to_string());

        debug!(
            "Processing Payment: plan={} user={} amount={} payment={}",
            event.plan_id, user_address, event.amount, event.payment_id
        );

        let existing = match self.ledger.payment_by_payment_id(&event.payment_id).await {
            Some(record) => Some(record),
            None => self.ledger.payment_by_tx(&tx_key).await,
        };
        if let Some(record) = existing {
            if record.accrual_pending {
                return self.backfill_accrual(&record, &event).await;
            }
            debug!("Payment {} already processed, skipping", event.payment_id);
            return Ok(EventOutcome::Duplicate);
        }

        let Some(plan) = self.ledger.plan_for(&event.plan_id, &user_address).await else {
            error!("Plan not found for plan={} user={}", event.plan_id, user_address);
            return Ok(EventOutcome::Orphan);
        };
        let Some(user) = self.ledger.user(&user_address).await else {
            error!("User {} not enrolled for plan {}", user_address, event.plan_id);
            return Ok(EventOutcome::Orphan);
        };

        let block = event.block_number.unwrap_or(head);
        let executed_at = block_time(self.chain.as_ref(), block).await;

        let receipt = match self.chain.get_receipt(tx_hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                debug!("Receipt for {} unavailable: {}", tx_key, e);
                None
            }
        };
        let facts = receipt.as_ref().and_then(|r| self.interpreter.interpret(r));

        let mut commit = PaymentCommit::new(&user, &tx_key, PaymentSource::Reconciler);
        commit = match &facts {
            Some(facts) => commit.with_swap(facts),
            None => self.fallback_amounts(commit, &event, &user.amount),
        };
        commit = match &receipt {
            Some(r) => commit.with_receipt(r),
            None => commit.with_block(block, executed_at),
        };
        commit = commit.executed_at(executed_at);

        let accrual = plan_accrual(self.oracle.as_ref(), &plan, &event, self.settings.output_decimals).await?;
        let outcome = self
            .ledger
            .commit_payment(commit.with_payment(&event, Some(accrual)))
            .await?;

        if outcome.created {
            info!(
                "Marked payment {} for plan {} (tx {})",
                event.payment_id, plan.plan_id, tx_key
            );
            Ok(EventOutcome::Reconciled(tx_key))
        } else {
            Ok(EventOutcome::Duplicate)
        }
    }

    /// Value and apply the plan accrual of a payment recorded without one
    async fn backfill_accrual(&self, record: &PaymentRecord, event: &PaymentEvent) -> Result<EventOutcome, EventError> {
        let Some(plan) = self.ledger.plan_for(&event.plan_id, &record.user_address).await else {
            error!(
                "Plan not found for deferred accrual plan={} user={}",
                event.plan_id, record.user_address
            );
            return Ok(EventOutcome::Orphan);
        };

        let accrual = plan_accrual(self.oracle.as_ref(), &plan, event, self.settings.output_decimals).await?;
        if self.ledger.apply_accrual(&record.tx_hash, accrual).await? {
            info!(
                "Backfilled plan {} accrual for payment {} (tx {})",
                plan.plan_id, event.payment_id, record.tx_hash
            );
            Ok(EventOutcome::Backfilled(record.tx_hash.clone()))
        } else {
            Ok(EventOutcome::Duplicate)
        }
    }

    /// Without a decodable swap: the event amount is the output, the
    /// planned amount the input.
    fn fallback_amounts(&self, commit: PaymentCommit, event: &PaymentEvent, planned: &rust_decimal::Decimal) -> PaymentCommit {
        let input_raw = to_smallest_unit(*planned, self.settings.input_decimals as u32).unwrap_or(0);
        let price = implied_price(
            input_raw,
            self.settings.input_decimals,
            event.amount,
            self.settings.output_decimals,
        );
        warn!(
            "No swap facts for payment {}, using event amount {}",
            event.payment_id, event.amount
        );
        commit.with_amounts(input_raw, event.amount, price)
    }
}

fn describe(log: &ChainLog) -> String {
    match (log.transaction_hash, log.log_index) {
        (Some(hash), Some(index)) => format!("{}#{}", hash, index),
        (Some(hash), None) => hash.to_string(),
        _ => "<unknown log>".to_string(),
    }
}
