//! Ledger document model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::utils::{Cadence, PaymentSource, PaymentStatus};

/// Per-category notification opt-ins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "enabled")]
    pub purchase_confirmations: bool,
    #[serde(default = "enabled")]
    pub lack_of_funds: bool,
    #[serde(default = "enabled")]
    pub milestones_achieved: bool,
}

fn enabled() -> bool {
    true
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            purchase_confirmations: true,
            lack_of_funds: true,
            milestones_achieved: true,
        }
    }
}

/// Enrolled participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Lower-case `0x` address, the identity key
    pub address: String,
    pub cadence: Cadence,
    /// Fiat amount purchased every period
    pub amount: Decimal,
    pub target_amount: Decimal,
    #[serde(default)]
    pub total_invested: Decimal,
    /// Output-asset smallest units received across all payments
    #[serde(default)]
    pub total_invested_raw: u128,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub last_paid_at: Option<DateTime<Utc>>,
    /// Transaction hashes of applied payments, in commit order
    #[serde(default)]
    pub payments: Vec<String>,
    #[serde(default)]
    pub notification_settings: NotificationSettings,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(address: &str, cadence: Cadence, amount: Decimal, target_amount: Decimal) -> Self {
        Self {
            address: crate::utils::helpers::normalize_hex(address),
            cadence,
            amount,
            target_amount,
            total_invested: Decimal::ZERO,
            total_invested_raw: 0,
            paused: false,
            last_paid_at: None,
            payments: Vec::new(),
            notification_settings: NotificationSettings::default(),
            created_at: Utc::now(),
        }
    }

    /// Progress towards the target as a percentage, `None` without a target
    pub fn progress_pct(&self) -> Option<Decimal> {
        progress_pct(self.total_invested, self.target_amount)
    }
}

pub fn progress_pct(invested: Decimal, target: Decimal) -> Option<Decimal> {
    if target <= Decimal::ZERO {
        return None;
    }
    invested
        .checked_div(target)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Active,
    Liquidating,
    Inactive,
    Liquidated,
}

/// Accrual record for an on-chain plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub user_address: String,
    pub status: PlanStatus,
    /// Asset units accrued so far
    #[serde(default)]
    pub value_accrued: Decimal,
    /// Fiat still owed against the plan
    pub remaining_to_be_paid: Decimal,
    #[serde(default)]
    pub total_paid: Decimal,
    #[serde(default)]
    pub streak: u32,
    #[serde(default)]
    pub payments: Vec<String>,
    #[serde(default)]
    pub last_payment_at: Option<DateTime<Utc>>,
}

impl Plan {
    pub fn new(plan_id: impl Into<String>, user_address: &str, remaining_to_be_paid: Decimal) -> Self {
        Self {
            plan_id: plan_id.into(),
            user_address: crate::utils::helpers::normalize_hex(user_address),
            status: PlanStatus::Active,
            value_accrued: Decimal::ZERO,
            remaining_to_be_paid,
            total_paid: Decimal::ZERO,
            streak: 0,
            payments: Vec::new(),
            last_payment_at: None,
        }
    }
}

/// Immutable record of one settled swap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: String,
    pub user_address: String,
    /// Idempotency key
    pub tx_hash: String,
    /// Id carried by the on-chain `Payment` event, when known
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    pub cadence: Cadence,
    pub planned_amount: Decimal,
    pub input_raw: u128,
    pub output_raw: u128,
    /// Output asset price in input units, 2 dp
    pub price: Decimal,
    #[serde(default)]
    pub sqrt_price_x96: Option<String>,
    pub block_number: u64,
    pub gas_used: u64,
    pub gas_price: u128,
    pub status: PaymentStatus,
    pub executed_at: DateTime<Utc>,
    pub source: PaymentSource,
    /// Plan accrual could not be valued at commit time and is still owed
    #[serde(default)]
    pub accrual_pending: bool,
}

/// The whole persisted ledger document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerState {
    #[serde(default)]
    pub users: BTreeMap<String, User>,
    #[serde(default)]
    pub plans: BTreeMap<String, Plan>,
    /// Keyed by transaction hash
    #[serde(default)]
    pub payments: BTreeMap<String, PaymentRecord>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LedgerState {
    pub fn payment_by_payment_id(&self, payment_id: &str) -> Option<&PaymentRecord> {
        self.payments
            .values()
            .find(|p| p.payment_id.as_deref() == Some(payment_id))
    }

    pub fn payments_for_user<'a>(&'a self, address: &'a str) -> impl Iterator<Item = &'a PaymentRecord> + 'a {
        self.payments.values().filter(move |p| p.user_address == address)
    }
}
