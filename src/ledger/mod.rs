//! Payment Ledger
//!
//! Single source of truth for users, plans and payment records:
//! - Idempotent commits keyed by transaction hash (and event payment id)
//! - Copy-on-write mutations, persisted before they become visible
//! - Conservation audit and per-user total rebuilds

pub mod models;
pub mod settlement;
pub mod store;

pub use models::{LedgerState, NotificationSettings, PaymentRecord, Plan, PlanStatus, User};
pub use settlement::{PaymentCommit, PlanAccrual};
pub use store::{JsonFileStore, MemoryStore, SnapshotStore};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

use crate::config::LedgerConfig;
use crate::telemetry::metrics;
use crate::utils::helpers::{generate_id, normalize_hex, retry_with_backoff};
use crate::utils::PaymentStatus;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("unknown user {0}")]
    UnknownUser(String),
    #[error("unknown plan {0}")]
    UnknownPlan(String),
    #[error("no payment recorded for {0}")]
    UnknownPayment(String),
    #[error("user {0} is already enrolled")]
    AlreadyEnrolled(String),
    #[error("ledger persistence failed: {0}")]
    Persistence(String),
    #[error("ledger document is corrupt: {0}")]
    Corrupt(String),
}

/// A user's running totals at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Totals {
    pub total_invested: Decimal,
    pub total_invested_raw: u128,
}

impl Totals {
    fn of(user: &User) -> Self {
        Self {
            total_invested: user.total_invested,
            total_invested_raw: user.total_invested_raw,
        }
    }
}

/// Result of `commit_payment`
#[derive(Debug, Clone, PartialEq)]
pub struct CommitOutcome {
    /// False when the payment was already recorded
    pub created: bool,
    pub record: PaymentRecord,
    pub totals_before: Totals,
    pub totals_after: Totals,
}

/// A breach of the per-user conservation invariant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConservationViolation {
    /// `total_invested_raw` differs from the sum over the user's records
    TotalMismatch { user: String, recorded: u128, computed: u128 },
    /// Listed on the user but no record exists
    MissingRecord { user: String, tx_hash: String },
    /// Record owned by the user but absent from their list
    UnlistedRecord { user: String, tx_hash: String },
    DuplicateHash { user: String, tx_hash: String },
    /// Record pointing at a user that is not enrolled
    OrphanRecord { user: String, tx_hash: String },
}

/// Persistent payment ledger
pub struct PaymentLedger {
    state: RwLock<LedgerState>,
    store: Arc<dyn SnapshotStore>,
    persist_retries: u32,
    retry_delay_ms: u64,
    /// Hashes whose commit could not be persisted, in memory only
    flagged: Mutex<Vec<String>>,
}

impl PaymentLedger {
    /// Open the JSON ledger named in configuration
    pub async fn open(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let store = Arc::new(JsonFileStore::new(&config.path));
        Self::with_store(store, config.persist_retries, config.retry_delay_ms).await
    }

    pub async fn with_store(
        store: Arc<dyn SnapshotStore>,
        persist_retries: u32,
        retry_delay_ms: u64,
    ) -> Result<Self, LedgerError> {
        let state = store.load().await?.unwrap_or_default();
        info!(
            "Ledger ready: {} users, {} plans, {} payments",
            state.users.len(),
            state.plans.len(),
            state.payments.len()
        );

        Ok(Self {
            state: RwLock::new(state),
            store,
            persist_retries,
            retry_delay_ms,
            flagged: Mutex::new(Vec::new()),
        })
    }

    /// Ledger that never touches disk
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            store: Arc::new(MemoryStore),
            persist_retries: 0,
            retry_delay_ms: 0,
            flagged: Mutex::new(Vec::new()),
        }
    }

    /// Persist `next` and, only on success, make it the visible state
    async fn persist_and_swap(
        &self,
        guard: &mut RwLockWriteGuard<'_, LedgerState>,
        mut next: LedgerState,
    ) -> Result<(), LedgerError> {
        next.updated_at = Some(Utc::now());

        retry_with_backoff(
            || self.store.persist(&next),
            self.persist_retries,
            self.retry_delay_ms,
        )
        .await?;

        **guard = next;
        Ok(())
    }

    /// Record a payment and update the owner's totals, exactly once per
    /// transaction hash.
    pub async fn commit_payment(&self, commit: PaymentCommit) -> Result<CommitOutcome, LedgerError> {
        let tx_hash = normalize_hex(&commit.tx_hash);
        let user_address = normalize_hex(&commit.user_address);

        let mut guard = self.state.write().await;

        let existing = guard.payments.get(&tx_hash).or_else(|| {
            commit
                .payment_id
                .as_deref()
                .and_then(|id| guard.payment_by_payment_id(id))
        });
        if let Some(record) = existing {
            debug!("Payment {} already recorded, skipping", tx_hash);
            metrics::record_duplicate(commit.source);
            let totals = guard
                .users
                .get(&record.user_address)
                .map(Totals::of)
                .unwrap_or_default();
            return Ok(CommitOutcome {
                created: false,
                record: record.clone(),
                totals_before: totals,
                totals_after: totals,
            });
        }

        let Some(user) = guard.users.get(&user_address) else {
            return Err(LedgerError::UnknownUser(user_address));
        };
        if let Some(accrual) = &commit.plan_accrual {
            owned_plan(&guard, &accrual.plan_id, &user_address)?;
        }
        let totals_before = Totals::of(user);

        let record = PaymentRecord {
            id: generate_id(),
            user_address: user_address.clone(),
            tx_hash: tx_hash.clone(),
            payment_id: commit.payment_id.clone(),
            plan_id: commit.plan_id.clone(),
            cadence: commit.cadence,
            planned_amount: commit.planned_amount,
            input_raw: commit.input_raw,
            output_raw: commit.output_raw,
            price: commit.price,
            sqrt_price_x96: commit.sqrt_price_x96.clone(),
            block_number: commit.block_number,
            gas_used: commit.gas_used,
            gas_price: commit.gas_price,
            status: PaymentStatus::Completed,
            executed_at: commit.executed_at,
            source: commit.source,
            accrual_pending: commit.accrual_pending && commit.plan_accrual.is_none(),
        };

        let mut next = guard.clone();
        next.payments.insert(tx_hash.clone(), record.clone());

        let totals_after = match next.users.get_mut(&user_address) {
            Some(user) => {
                user.total_invested += commit.planned_amount;
                user.total_invested_raw = user.total_invested_raw.saturating_add(commit.output_raw);
                user.last_paid_at = Some(commit.executed_at);
                user.payments.push(tx_hash.clone());
                Totals::of(user)
            }
            None => return Err(LedgerError::UnknownUser(user_address)),
        };

        if let Some(accrual) = &commit.plan_accrual {
            if let Some(plan) = next.plans.get_mut(&accrual.plan_id) {
                accrue(plan, accrual, &tx_hash, commit.executed_at);
            }
        }

        if let Err(e) = self.persist_and_swap(&mut guard, next).await {
            error!(
                "Payment {} for {} could not be persisted, flagged for reconciliation: {}",
                tx_hash, user_address, e
            );
            metrics::record_flagged_commit();
            self.flagged.lock().await.push(tx_hash);
            return Err(e);
        }

        info!(
            "Committed payment {} for {}: +{} raw (total {})",
            tx_hash, user_address, commit.output_raw, totals_after.total_invested_raw
        );
        metrics::record_payment_committed(commit.source);

        Ok(CommitOutcome {
            created: true,
            record,
            totals_before,
            totals_after,
        })
    }

    /// Apply a plan accrual that was deferred when its payment was
    /// committed. Returns false when nothing is pending for `tx_hash`, so
    /// an accrual lands at most once per transaction.
    pub async fn apply_accrual(&self, tx_hash: &str, accrual: PlanAccrual) -> Result<bool, LedgerError> {
        let tx_hash = normalize_hex(tx_hash);
        let mut guard = self.state.write().await;

        let (pending, owner, executed_at) = match guard.payments.get(&tx_hash) {
            Some(record) => (record.accrual_pending, record.user_address.clone(), record.executed_at),
            None => return Err(LedgerError::UnknownPayment(tx_hash)),
        };
        if !pending {
            debug!("No accrual pending for {}", tx_hash);
            return Ok(false);
        }
        owned_plan(&guard, &accrual.plan_id, &owner)?;

        let mut next = guard.clone();
        if let Some(plan) = next.plans.get_mut(&accrual.plan_id) {
            accrue(plan, &accrual, &tx_hash, executed_at);
        }
        if let Some(record) = next.payments.get_mut(&tx_hash) {
            record.accrual_pending = false;
            record.plan_id = Some(accrual.plan_id.clone());
        }

        self.persist_and_swap(&mut guard, next).await?;
        info!(
            "Applied deferred accrual for {} to plan {}: +{}",
            tx_hash, accrual.plan_id, accrual.asset_amount
        );
        Ok(true)
    }

    /// Enroll a new user
    pub async fn enroll_user(&self, user: User) -> Result<(), LedgerError> {
        let address = normalize_hex(&user.address);
        let mut guard = self.state.write().await;
        if guard.users.contains_key(&address) {
            return Err(LedgerError::AlreadyEnrolled(address));
        }

        let mut next = guard.clone();
        next.users.insert(address.clone(), User { address, ..user });
        self.persist_and_swap(&mut guard, next).await
    }

    pub async fn upsert_plan(&self, plan: Plan) -> Result<(), LedgerError> {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        let plan = Plan {
            user_address: normalize_hex(&plan.user_address),
            ..plan
        };
        next.plans.insert(plan.plan_id.clone(), plan);
        self.persist_and_swap(&mut guard, next).await
    }

    pub async fn set_paused(&self, address: &str, paused: bool) -> Result<(), LedgerError> {
        let address = normalize_hex(address);
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        let user = next
            .users
            .get_mut(&address)
            .ok_or_else(|| LedgerError::UnknownUser(address.clone()))?;
        user.paused = paused;
        self.persist_and_swap(&mut guard, next).await
    }

    /// Change a record's status. The only mutation a record ever sees.
    pub async fn patch_status(&self, tx_hash: &str, status: PaymentStatus) -> Result<PaymentRecord, LedgerError> {
        let tx_hash = normalize_hex(tx_hash);
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        let record = next
            .payments
            .get_mut(&tx_hash)
            .ok_or_else(|| LedgerError::UnknownPayment(tx_hash.clone()))?;

        let previous = record.status;
        record.status = status;
        let patched = record.clone();

        self.persist_and_swap(&mut guard, next).await?;
        info!("Payment {} status {} -> {}", tx_hash, previous, status);
        Ok(patched)
    }

    /// Recompute a user's totals, payment list and last payment time from
    /// their records.
    pub async fn rebuild_user_totals(&self, address: &str) -> Result<Totals, LedgerError> {
        let address = normalize_hex(address);
        let mut guard = self.state.write().await;
        let mut next = guard.clone();

        let mut records: Vec<PaymentRecord> = next.payments_for_user(&address).cloned().collect();
        records.sort_by(|a, b| a.executed_at.cmp(&b.executed_at).then(a.tx_hash.cmp(&b.tx_hash)));

        let user = next
            .users
            .get_mut(&address)
            .ok_or_else(|| LedgerError::UnknownUser(address.clone()))?;

        let before = Totals::of(user);
        user.total_invested_raw = records.iter().map(|r| r.output_raw).sum();
        user.total_invested = records.iter().map(|r| r.planned_amount).sum();
        user.payments = records.iter().map(|r| r.tx_hash.clone()).collect();
        user.last_paid_at = records.last().map(|r| r.executed_at);
        let after = Totals::of(user);

        self.persist_and_swap(&mut guard, next).await?;

        if before != after {
            warn!(
                "Rebuilt totals for {}: raw {} -> {}, fiat {} -> {}",
                address,
                before.total_invested_raw,
                after.total_invested_raw,
                before.total_invested,
                after.total_invested
            );
        }
        Ok(after)
    }

    /// Check the conservation invariant for every user
    pub async fn audit(&self) -> Vec<ConservationViolation> {
        let state = self.state.read().await;
        audit_state(&state)
    }

    pub async fn user(&self, address: &str) -> Option<User> {
        self.state.read().await.users.get(&normalize_hex(address)).cloned()
    }

    pub async fn users(&self) -> Vec<User> {
        self.state.read().await.users.values().cloned().collect()
    }

    /// Plan with `plan_id` owned by `user_address`
    pub async fn plan_for(&self, plan_id: &str, user_address: &str) -> Option<Plan> {
        let user_address = normalize_hex(user_address);
        self.state
            .read()
            .await
            .plans
            .get(plan_id)
            .filter(|p| p.user_address == user_address)
            .cloned()
    }

    pub async fn payment_by_tx(&self, tx_hash: &str) -> Option<PaymentRecord> {
        self.state.read().await.payments.get(&normalize_hex(tx_hash)).cloned()
    }

    pub async fn payment_by_payment_id(&self, payment_id: &str) -> Option<PaymentRecord> {
        self.state.read().await.payment_by_payment_id(payment_id).cloned()
    }

    pub async fn payments_for_user(&self, address: &str) -> Vec<PaymentRecord> {
        let address = normalize_hex(address);
        let state = self.state.read().await;
        let mut records: Vec<PaymentRecord> = state.payments_for_user(&address).cloned().collect();
        records.sort_by(|a, b| a.executed_at.cmp(&b.executed_at));
        records
    }

    pub async fn snapshot(&self) -> LedgerState {
        self.state.read().await.clone()
    }

    /// Hashes flagged since this process started. The list is not
    /// persisted; after a restart the reconciler's lookback window is what
    /// re-commits these payments from their on-chain events.
    pub async fn flagged_for_reconciliation(&self) -> Vec<String> {
        self.flagged.lock().await.clone()
    }
}

/// Plan `plan_id`, provided `owner` holds it
fn owned_plan<'a>(state: &'a LedgerState, plan_id: &str, owner: &str) -> Result<&'a Plan, LedgerError> {
    state
        .plans
        .get(plan_id)
        .filter(|plan| plan.user_address == owner)
        .ok_or_else(|| LedgerError::UnknownPlan(plan_id.to_string()))
}

fn accrue(plan: &mut Plan, accrual: &PlanAccrual, tx_hash: &str, executed_at: DateTime<Utc>) {
    plan.value_accrued += accrual.asset_amount;
    plan.remaining_to_be_paid -= accrual.fiat_amount;
    plan.total_paid += accrual.asset_amount;
    plan.streak += 1;
    plan.payments.push(tx_hash.to_string());
    plan.last_payment_at = Some(executed_at);
}

fn audit_state(state: &LedgerState) -> Vec<ConservationViolation> {
    let mut violations = Vec::new();

    for (address, user) in &state.users {
        let owned: Vec<&PaymentRecord> = state.payments_for_user(address).collect();
        let computed: u128 = owned.iter().map(|r| r.output_raw).sum();
        if computed != user.total_invested_raw {
            violations.push(ConservationViolation::TotalMismatch {
                user: address.clone(),
                recorded: user.total_invested_raw,
                computed,
            });
        }

        let mut seen = HashSet::new();
        for hash in &user.payments {
            if !seen.insert(hash.as_str()) {
                violations.push(ConservationViolation::DuplicateHash {
                    user: address.clone(),
                    tx_hash: hash.clone(),
                });
            }
            let owned_by_user = state
                .payments
                .get(hash)
                .map(|r| &r.user_address == address)
                .unwrap_or(false);
            if !owned_by_user {
                violations.push(ConservationViolation::MissingRecord {
                    user: address.clone(),
                    tx_hash: hash.clone(),
                });
            }
        }

        for record in owned {
            if !seen.contains(record.tx_hash.as_str()) {
                violations.push(ConservationViolation::UnlistedRecord {
                    user: address.clone(),
                    tx_hash: record.tx_hash.clone(),
                });
            }
        }
    }

    for record in state.payments.values() {
        if !state.users.contains_key(&record.user_address) {
            violations.push(ConservationViolation::OrphanRecord {
                user: record.user_address.clone(),
                tx_hash: record.tx_hash.clone(),
            });
        }
    }

    violations
}
