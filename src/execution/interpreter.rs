//! Receipt Interpreter
//!
//! Turns a confirmed receipt into authoritative payment facts:
//! - Locates the pool `Swap` log and reads swapped amounts
//! - Derives the execution price from `sqrtPriceX96` with exact integer math
//! - Picks up the DCA program's `Payment` event when the receipt carries one

use alloy::primitives::{Address, U256, U512};
use alloy::sol_types::SolEvent;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::network::abi::Swap;
use crate::network::TxReceipt;
use crate::reconciler::events::{decode_payment, PaymentEvent};

/// Facts derived from one swap receipt
#[derive(Debug, Clone, PartialEq)]
pub struct SwapFacts {
    /// Output asset price denominated in the input asset, 2 dp
    pub price: Decimal,
    /// Input asset spent (smallest units)
    pub input_raw: u128,
    /// Output asset received (smallest units)
    pub output_raw: u128,
    pub sqrt_price_x96: U256,
    pub payment_event: Option<PaymentEvent>,
}

/// Receipt decoder bound to one pool and one DCA program
#[derive(Debug, Clone)]
pub struct ReceiptInterpreter {
    pool: Address,
    dca_contract: Address,
    input_decimals: u8,
    output_decimals: u8,
}

impl ReceiptInterpreter {
    pub fn new(pool: Address, dca_contract: Address, input_decimals: u8, output_decimals: u8) -> Self {
        Self {
            pool,
            dca_contract,
            input_decimals,
            output_decimals,
        }
    }

    /// Interpret a receipt. `None` when there are no logs, no log from the
    /// pool, or the pool log does not decode.
    pub fn interpret(&self, receipt: &TxReceipt) -> Option<SwapFacts> {
        let hash = receipt.transaction_hash;

        if receipt.logs.is_empty() {
            warn!("No logs found for transaction {}", hash);
            return None;
        }

        let Some(swap_log) = receipt.logs.iter().find(|log| log.address == self.pool) else {
            warn!("No swap log found for transaction {}", hash);
            return None;
        };

        let swap = match Swap::decode_raw_log(swap_log.topics.iter().copied(), &swap_log.data) {
            Ok(swap) => swap,
            Err(e) => {
                warn!("Swap log in {} failed to decode: {}", hash, e);
                return None;
            }
        };

        // token0 is the input asset
        let input_raw = u128::try_from(swap.amount0.unsigned_abs()).ok()?;
        let output_raw = u128::try_from(swap.amount1.unsigned_abs()).ok()?;
        let sqrt_price_x96 = U256::from(swap.sqrtPriceX96);

        let price = price_from_sqrt_price_x96(sqrt_price_x96, self.input_decimals, self.output_decimals)?;

        debug!(
            "Transaction {}: in={} out={} price={}",
            hash, input_raw, output_raw, price
        );

        Some(SwapFacts {
            price,
            input_raw,
            output_raw,
            sqrt_price_x96,
            payment_event: self.payment_event(receipt),
        })
    }

    /// First `Payment` event emitted by the DCA program in the receipt
    pub fn payment_event(&self, receipt: &TxReceipt) -> Option<PaymentEvent> {
        receipt
            .logs
            .iter()
            .filter(|log| log.address == self.dca_contract)
            .find_map(|log| decode_payment(log).ok())
    }
}

/// `price = 10^(out - in) * 2^192 / sqrtP^2`, rounded half-up to 2 dp.
///
/// Computed in 512-bit integers so no intermediate loses precision; only the
/// final quotient is converted to `Decimal`. `None` for a zero price input or
/// a result beyond `Decimal` range.
pub fn price_from_sqrt_price_x96(sqrt_price_x96: U256, input_decimals: u8, output_decimals: u8) -> Option<Decimal> {
    if sqrt_price_x96.is_zero() {
        return None;
    }

    let sqrt = U512::from(sqrt_price_x96);
    let ten = U512::from(10u64);
    let q192 = U512::from(1u64) << 192;

    let (mut numerator, mut denominator) = (q192, sqrt * sqrt);
    if output_decimals >= input_decimals {
        numerator *= ten.pow(U512::from(output_decimals - input_decimals));
    } else {
        denominator *= ten.pow(U512::from(input_decimals - output_decimals));
    }

    // Two decimal places
    numerator *= U512::from(100u64);

    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    let rounded = if remainder * U512::from(2u64) >= denominator {
        quotient + U512::from(1u64)
    } else {
        quotient
    };

    let mantissa = i128::try_from(u128::try_from(rounded).ok()?).ok()?;
    Decimal::try_from_i128_with_scale(mantissa, 2).ok()
}
