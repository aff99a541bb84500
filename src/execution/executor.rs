//! Payment Executor
//!
//! Runs one execution cycle for a cadence:
//! - Resolves the signing credential and observed gas price up front
//! - Attempts every due user in order, isolating each attempt
//! - Commits confirmed swaps through the ledger and sends notices

use alloy::primitives::{Address, TxHash, U256};
use alloy::sol_types::SolCall;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::feeds::RateOracle;
use crate::ledger::settlement::{block_time, plan_accrual};
use crate::ledger::{CommitOutcome, LedgerError, PaymentCommit, PaymentLedger, PaymentRecord, User};
use crate::network::abi::executeSwapCall;
use crate::network::{ChainClient, ChainError, GasBid, TxSubmission};
use crate::notifications::Notifier;
use crate::reconciler::events::PaymentEvent;
use crate::scheduling::DueUserSelector;
use crate::secrets::{ExecutorCredential, SecretError, SecretProvider};
use crate::telemetry::metrics;
use crate::utils::helpers::{elapsed_ms, to_smallest_unit};
use crate::utils::{Cadence, FailureKind, PaymentSource};

use super::interpreter::ReceiptInterpreter;
use super::milestones::crossed_milestones;
use super::quote::{QuoteError, QuoteRequest, QuoteService};

/// Errors that abort a whole cycle
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor credential unavailable: {0}")]
    FatalCredential(SecretError),
    #[error("gas price unavailable: {0}")]
    FatalGasPrice(ChainError),
    #[error("due-user selection failed: {0}")]
    FatalSelection(LedgerError),
}

/// Why a single user's attempt failed
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("invalid purchase amount {0}")]
    InvalidAmount(Decimal),
    #[error("invalid user address {0}")]
    InvalidAddress(String),
    #[error("quote failed: {0}")]
    Quote(#[from] QuoteError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("transaction {0} reverted")]
    Reverted(TxHash),
    #[error("no attributable swap log in {0}")]
    NoSwapLog(TxHash),
    #[error("ledger commit failed: {0}")]
    Ledger(#[from] LedgerError),
}

impl AttemptError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AttemptError::Chain(ChainError::InsufficientFunds(_)) => FailureKind::InsufficientFunds,
            other => classify_failure(&other.to_string()),
        }
    }

    fn tx_hash(&self) -> Option<TxHash> {
        match self {
            AttemptError::Reverted(hash) | AttemptError::NoSwapLog(hash) => Some(*hash),
            AttemptError::Chain(ChainError::ConfirmationTimeout(hash, _)) => Some(*hash),
            _ => None,
        }
    }
}

/// Heuristic classification of free-form node and contract errors
pub fn classify_failure(message: &str) -> FailureKind {
    let message = message.to_lowercase();
    if message.contains("insufficient") || message.contains("funds") || message.contains("balance") {
        FailureKind::InsufficientFunds
    } else {
        FailureKind::Other
    }
}

/// One failed user attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFailure {
    pub user_address: String,
    pub kind: FailureKind,
    pub reason: String,
    /// Set when the failure happened after broadcast
    pub tx_hash: Option<String>,
}

/// Outcome of one execution cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cadence: Cadence,
    pub attempted: usize,
    /// Records created by this cycle
    pub committed: Vec<PaymentRecord>,
    /// Transaction hashes already recorded by another path
    pub duplicates: Vec<String>,
    /// Users skipped as already paid this period
    pub skipped: Vec<String>,
    pub failures: Vec<UserFailure>,
}

impl CycleReport {
    fn new(cadence: Cadence) -> Self {
        Self {
            cadence,
            attempted: 0,
            committed: Vec::new(),
            duplicates: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        }
    }
}

/// Executor parameters resolved from configuration
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub chain_id: u64,
    pub dca_contract: Address,
    pub swap_pool: Address,
    pub input_token: Address,
    pub output_token: Address,
    pub input_decimals: u8,
    pub output_decimals: u8,
    pub gas_price_markup_pct: u64,
    pub priority_fee_divisor: u64,
    pub slippage_bps: u32,
    pub quote_deadline_secs: u64,
    pub skip_paid_this_period: bool,
    pub milestones: Vec<u32>,
}

impl ExecutorSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let contracts = &config.contracts;
        Ok(Self {
            chain_id: config.rpc.chain_id,
            dca_contract: Address::from_str(&contracts.dca_contract).context("Invalid DCA contract address")?,
            swap_pool: Address::from_str(&contracts.swap_pool).context("Invalid pool address")?,
            input_token: Address::from_str(&contracts.input_token.address).context("Invalid input token address")?,
            output_token: Address::from_str(&contracts.output_token.address)
                .context("Invalid output token address")?,
            input_decimals: contracts.input_token.decimals,
            output_decimals: contracts.output_token.decimals,
            gas_price_markup_pct: config.execution.gas_price_markup_pct,
            priority_fee_divisor: config.execution.priority_fee_divisor,
            slippage_bps: config.quote.slippage_bps,
            quote_deadline_secs: config.quote.deadline_secs,
            skip_paid_this_period: config.execution.skip_paid_this_period,
            milestones: config.execution.milestones.clone(),
        })
    }
}

/// Per-cycle purchase orchestration
pub struct PaymentExecutor {
    settings: ExecutorSettings,
    ledger: Arc<PaymentLedger>,
    selector: DueUserSelector,
    interpreter: ReceiptInterpreter,
    chain: Arc<dyn ChainClient>,
    quotes: Arc<dyn QuoteService>,
    oracle: Arc<dyn RateOracle>,
    secrets: Arc<dyn SecretProvider>,
    notifier: Arc<dyn Notifier>,
    /// Held from submission until the receipt lands
    submission_lock: Mutex<()>,
}

impl PaymentExecutor {
    pub fn new(
        settings: ExecutorSettings,
        ledger: Arc<PaymentLedger>,
        chain: Arc<dyn ChainClient>,
        quotes: Arc<dyn QuoteService>,
        oracle: Arc<dyn RateOracle>,
        secrets: Arc<dyn SecretProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let interpreter = ReceiptInterpreter::new(
            settings.swap_pool,
            settings.dca_contract,
            settings.input_decimals,
            settings.output_decimals,
        );

        Self {
            selector: DueUserSelector::new(ledger.clone()),
            settings,
            ledger,
            interpreter,
            chain,
            quotes,
            oracle,
            secrets,
            notifier,
            submission_lock: Mutex::new(()),
        }
    }

    /// Run one cycle for `cadence`. Only credential, gas and selection
    /// failures abort; every per-user failure lands in the report.
    pub async fn run_cycle(&self, cadence: Cadence) -> Result<CycleReport, ExecutorError> {
        let start = Instant::now();
        info!("Starting {} execution cycle", cadence);

        let credential = self
            .secrets
            .executor_credential()
            .await
            .map_err(ExecutorError::FatalCredential)?;

        let (gas, due) = tokio::join!(self.chain.gas_price(), self.selector.find_due(cadence));
        let observed_gas = gas.map_err(ExecutorError::FatalGasPrice)?;
        let users = due.map_err(ExecutorError::FatalSelection)?;

        info!("{} users due, observed gas price {} wei", users.len(), observed_gas);

        let mut report = CycleReport::new(cadence);
        let now = Utc::now();

        for user in users {
            if self.settings.skip_paid_this_period && paid_this_period(&user, cadence, now) {
                debug!("{} already paid this {} period, skipping", user.address, cadence);
                metrics::record_user_skipped();
                report.skipped.push(user.address.clone());
                continue;
            }

            report.attempted += 1;
            info!("Executing {} purchase for {}", cadence, user.address);

            match self.execute_for_user(&credential, &user, observed_gas).await {
                Ok(outcome) => self.on_success(&user, outcome, &mut report).await,
                Err(err) => self.on_failure(&user, err, &mut report).await,
            }
        }

        let latency = elapsed_ms(start);
        metrics::record_cycle(cadence, latency as f64, report.committed.len());
        info!(
            "{} cycle finished in {}ms: attempted={} committed={} duplicates={} skipped={} failed={}",
            cadence,
            latency,
            report.attempted,
            report.committed.len(),
            report.duplicates.len(),
            report.skipped.len(),
            report.failures.len()
        );

        Ok(report)
    }

    async fn execute_for_user(
        &self,
        credential: &ExecutorCredential,
        user: &User,
        cycle_gas: u128,
    ) -> Result<CommitOutcome, AttemptError> {
        let s = &self.settings;

        let amount_in = to_smallest_unit(user.amount, s.input_decimals as u32)
            .filter(|a| *a > 0)
            .ok_or(AttemptError::InvalidAmount(user.amount))?;
        let user_address =
            Address::from_str(&user.address).map_err(|_| AttemptError::InvalidAddress(user.address.clone()))?;

        let deadline = (Utc::now() + ChronoDuration::seconds(s.quote_deadline_secs as i64)).timestamp();
        let request = QuoteRequest {
            token_in: s.input_token,
            amount_in,
            token_out: s.output_token,
            recipient: s.dca_contract,
            chain_id: s.chain_id,
            token_in_decimals: s.input_decimals,
            token_out_decimals: s.output_decimals,
            slippage_bps: s.slippage_bps,
            deadline: deadline.max(0) as u64,
        };

        let (quote, fresh_gas) = tokio::join!(self.quotes.quote(&request), self.chain.gas_price());
        let quote = quote?;
        let observed = match fresh_gas {
            Ok(price) => price,
            Err(e) => {
                debug!("Fresh gas read failed, using cycle price: {}", e);
                cycle_gas
            }
        };
        debug!("Route for {} via {}", user.address, quote.to);

        let call = executeSwapCall {
            swapCalldata: quote.calldata,
            user: user_address,
            amount: U256::from(amount_in),
        };
        let submission = TxSubmission {
            to: s.dca_contract,
            calldata: call.abi_encode().into(),
            value: U256::ZERO,
            gas: GasBid::from_observed(observed, s.gas_price_markup_pct, s.priority_fee_divisor),
        };

        let (tx_hash, receipt) = {
            // Daily and weekly cycles share the signer
            let _signer = self.submission_lock.lock().await;
            let tx_hash = self.chain.submit_transaction(credential, submission).await?;
            info!("Swap submitted for {}: {}", user.address, tx_hash);
            let receipt = self.chain.wait_for_receipt(tx_hash).await?;
            (tx_hash, receipt)
        };
        if !receipt.success {
            return Err(AttemptError::Reverted(tx_hash));
        }

        let facts = self
            .interpreter
            .interpret(&receipt)
            .ok_or(AttemptError::NoSwapLog(tx_hash))?;

        let executed_at = block_time(self.chain.as_ref(), receipt.block_number).await;
        let mut commit = PaymentCommit::new(user, &tx_hash.to_string(), PaymentSource::Executor)
            .with_swap(&facts)
            .with_receipt(&receipt)
            .executed_at(executed_at);

        if let Some(event) = &facts.payment_event {
            commit = self.attach_payment(commit, user, event).await;
        }

        Ok(self.ledger.commit_payment(commit).await?)
    }

    /// Attach an event seen in our own receipt. When the plan can't be
    /// valued right now the accrual is deferred to the reconciler.
    async fn attach_payment(&self, commit: PaymentCommit, user: &User, event: &PaymentEvent) -> PaymentCommit {
        let Some(plan) = self.ledger.plan_for(&event.plan_id, &user.address).await else {
            warn!("Payment {} names unknown plan {}", event.payment_id, event.plan_id);
            return commit.with_payment(event, None);
        };

        match plan_accrual(self.oracle.as_ref(), &plan, event, self.settings.output_decimals).await {
            Ok(accrual) => commit.with_payment(event, Some(accrual)),
            Err(e) => {
                warn!(
                    "Could not value payment {} for plan {}, deferring accrual: {}",
                    event.payment_id, plan.plan_id, e
                );
                commit.with_payment(event, None).defer_accrual()
            }
        }
    }

    async fn on_success(&self, user: &User, outcome: CommitOutcome, report: &mut CycleReport) {
        if let Err(e) = self.notifier.purchase_confirmation(user, user.amount).await {
            warn!("Purchase confirmation for {} failed: {}", user.address, e);
        }

        if !outcome.created {
            info!("Payment {} was already recorded", outcome.record.tx_hash);
            report.duplicates.push(outcome.record.tx_hash);
            return;
        }

        let crossed = crossed_milestones(
            outcome.totals_before.total_invested,
            outcome.totals_after.total_invested,
            user.target_amount,
            &self.settings.milestones,
        );
        for milestone in crossed {
            info!("{} reached {}% of target", user.address, milestone);
            if let Err(e) = self
                .notifier
                .milestone_achieved(user, milestone, outcome.totals_after.total_invested)
                .await
            {
                warn!("Milestone notice for {} failed: {}", user.address, e);
            }
        }

        report.committed.push(outcome.record);
    }

    async fn on_failure(&self, user: &User, err: AttemptError, report: &mut CycleReport) {
        let kind = err.kind();
        metrics::record_user_failure(kind);

        match &err {
            AttemptError::Ledger(_) => error!("Purchase for {} confirmed but not recorded: {}", user.address, err),
            _ => warn!("Purchase for {} failed ({}): {}", user.address, kind, err),
        }

        if kind == FailureKind::InsufficientFunds {
            if let Err(e) = self.notifier.lack_of_funds(user, user.amount).await {
                warn!("Low-funds notice for {} failed: {}", user.address, e);
            }
        }

        report.failures.push(UserFailure {
            user_address: user.address.clone(),
            kind,
            reason: err.to_string(),
            tx_hash: err.tx_hash().map(|h| h.to_string()),
        });
    }
}

fn paid_this_period(user: &User, cadence: Cadence, now: DateTime<Utc>) -> bool {
    user.last_paid_at
        .map(|paid| paid >= cadence.period_start(now))
        .unwrap_or(false)
}
