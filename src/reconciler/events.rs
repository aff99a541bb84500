//! `Payment` event decoding
//!
//! The DCA program has emitted two shapes of `Payment` over its lifetime.
//! The variant carrying a trailing `token` field is tried first.

use alloy::primitives::{Address, TxHash, B256};
use alloy::sol_types::SolEvent;
use thiserror::Error;

use crate::network::abi::{payment, payment_with_token};
use crate::network::ChainLog;

#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("log matches no known Payment schema: {0}")]
    Undecodable(String),
    #[error("payment amount does not fit in 128 bits")]
    AmountOverflow,
}

/// Decoded `Payment` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    pub user: Address,
    /// Output-asset smallest units
    pub amount: u128,
    pub plan_id: String,
    pub payment_id: String,
    pub token: Option<String>,
    pub tx_hash: Option<TxHash>,
    pub block_number: Option<u64>,
}

/// Topic0 values of every accepted `Payment` schema
pub fn payment_signatures() -> Vec<B256> {
    vec![
        payment_with_token::Payment::SIGNATURE_HASH,
        payment::Payment::SIGNATURE_HASH,
    ]
}

pub fn decode_payment(log: &ChainLog) -> Result<PaymentEvent, EventDecodeError> {
    let topics = log.topics.iter().copied();

    if let Ok(event) = payment_with_token::Payment::decode_raw_log(topics.clone(), &log.data) {
        return Ok(PaymentEvent {
            user: event.user,
            amount: u128::try_from(event.amount).map_err(|_| EventDecodeError::AmountOverflow)?,
            plan_id: event.planId,
            payment_id: event.paymentId,
            token: Some(event.token),
            tx_hash: log.transaction_hash,
            block_number: log.block_number,
        });
    }

    let event = payment::Payment::decode_raw_log(topics, &log.data)
        .map_err(|e| EventDecodeError::Undecodable(e.to_string()))?;

    Ok(PaymentEvent {
        user: event.user,
        amount: u128::try_from(event.amount).map_err(|_| EventDecodeError::AmountOverflow)?,
        plan_id: event.planId,
        payment_id: event.paymentId,
        token: None,
        tx_hash: log.transaction_hash,
        block_number: log.block_number,
    })
}
