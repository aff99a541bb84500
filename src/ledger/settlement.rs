//! Commit construction shared by both ingestion paths
//!
//! The executor and the reconciler build their commits through the same
//! builder and the same accrual valuation, so a payment observed by either
//! path lands in the ledger identically.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::execution::interpreter::SwapFacts;
use crate::feeds::{OracleError, RateOracle};
use crate::network::{ChainClient, TxReceipt};
use crate::reconciler::events::PaymentEvent;
use crate::utils::helpers::{from_smallest_unit, normalize_hex};
use crate::utils::{Cadence, PaymentSource};

use super::models::{Plan, User};

/// Plan-side effects of a payment
#[derive(Debug, Clone, PartialEq)]
pub struct PlanAccrual {
    pub plan_id: String,
    /// Asset units added to `value_accrued` and `total_paid`
    pub asset_amount: Decimal,
    /// Fiat removed from `remaining_to_be_paid`
    pub fiat_amount: Decimal,
}

/// A fully-described payment ready for the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentCommit {
    pub user_address: String,
    pub tx_hash: String,
    pub payment_id: Option<String>,
    pub plan_id: Option<String>,
    pub cadence: Cadence,
    pub planned_amount: Decimal,
    pub input_raw: u128,
    pub output_raw: u128,
    pub price: Decimal,
    pub sqrt_price_x96: Option<String>,
    pub block_number: u64,
    pub gas_used: u64,
    pub gas_price: u128,
    pub executed_at: DateTime<Utc>,
    pub source: PaymentSource,
    pub plan_accrual: Option<PlanAccrual>,
    pub accrual_pending: bool,
}

impl PaymentCommit {
    /// Start a commit for `user`'s scheduled purchase settled by `tx_hash`
    pub fn new(user: &User, tx_hash: &str, source: PaymentSource) -> Self {
        Self {
            user_address: user.address.clone(),
            tx_hash: normalize_hex(tx_hash),
            payment_id: None,
            plan_id: None,
            cadence: user.cadence,
            planned_amount: user.amount,
            input_raw: 0,
            output_raw: 0,
            price: Decimal::ZERO,
            sqrt_price_x96: None,
            block_number: 0,
            gas_used: 0,
            gas_price: 0,
            executed_at: Utc::now(),
            source,
            plan_accrual: None,
            accrual_pending: false,
        }
    }

    pub fn with_swap(mut self, facts: &SwapFacts) -> Self {
        self.input_raw = facts.input_raw;
        self.output_raw = facts.output_raw;
        self.price = facts.price;
        self.sqrt_price_x96 = Some(facts.sqrt_price_x96.to_string());
        self
    }

    /// Amounts known without a decodable swap log
    pub fn with_amounts(mut self, input_raw: u128, output_raw: u128, price: Decimal) -> Self {
        self.input_raw = input_raw;
        self.output_raw = output_raw;
        self.price = price;
        self
    }

    pub fn with_receipt(mut self, receipt: &TxReceipt) -> Self {
        self.block_number = receipt.block_number;
        self.gas_used = receipt.gas_used;
        self.gas_price = receipt.effective_gas_price;
        self
    }

    pub fn with_block(mut self, block_number: u64, executed_at: DateTime<Utc>) -> Self {
        self.block_number = block_number;
        self.executed_at = executed_at;
        self
    }

    pub fn executed_at(mut self, executed_at: DateTime<Utc>) -> Self {
        self.executed_at = executed_at;
        self
    }

    /// Attach the on-chain payment identity and, when resolved, its plan accrual
    pub fn with_payment(mut self, event: &PaymentEvent, accrual: Option<PlanAccrual>) -> Self {
        self.payment_id = Some(event.payment_id.clone());
        self.plan_id = Some(event.plan_id.clone());
        self.plan_accrual = accrual;
        self
    }

    /// Record the payment now and leave its plan accrual for the reconciler
    pub fn defer_accrual(mut self) -> Self {
        self.plan_accrual = None;
        self.accrual_pending = true;
        self
    }
}

/// Value a `Payment` event against its plan. The asset amount is the event
/// amount; its fiat equivalent comes from the oracle.
pub async fn plan_accrual(
    oracle: &dyn RateOracle,
    plan: &Plan,
    event: &PaymentEvent,
    output_decimals: u8,
) -> Result<PlanAccrual, OracleError> {
    let asset_amount = from_smallest_unit(event.amount, output_decimals as u32).ok_or_else(|| {
        OracleError::InvalidResponse(format!("payment amount {} out of range", event.amount))
    })?;

    let fiat_amount = oracle.asset_to_fiat(asset_amount).await?;

    Ok(PlanAccrual {
        plan_id: plan.plan_id.clone(),
        asset_amount,
        fiat_amount,
    })
}

/// Timestamp of `block`, or now when the node can't say
pub async fn block_time(chain: &dyn ChainClient, block: u64) -> DateTime<Utc> {
    match chain.block_timestamp(block).await {
        Ok(Some(ts)) => DateTime::from_timestamp(ts as i64, 0).unwrap_or_else(Utc::now),
        Ok(None) => Utc::now(),
        Err(e) => {
            debug!("Block {} timestamp unavailable: {}", block, e);
            Utc::now()
        }
    }
}

/// Price implied by raw amounts: input per output, in human units, 2 dp
pub fn implied_price(input_raw: u128, input_decimals: u8, output_raw: u128, output_decimals: u8) -> Decimal {
    let input = from_smallest_unit(input_raw, input_decimals as u32);
    let output = from_smallest_unit(output_raw, output_decimals as u32);

    match (input, output) {
        (Some(i), Some(o)) if !o.is_zero() => i
            .checked_div(o)
            .map(|p| p.round_dp_with_strategy(2, rust_decimal::RoundingStrategy::MidpointAwayFromZero))
            .unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}
