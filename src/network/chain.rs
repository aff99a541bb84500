//! Chain access seam
//!
//! Everything the engine needs from a node, expressed in plain domain types
//! so executor and reconciler logic can run against an in-memory chain.

use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::secrets::ExecutorCredential;

/// A log entry as observed on chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLog {
    /// Emitting contract
    pub address: Address,
    /// Indexed topics, signature first
    pub topics: Vec<B256>,
    /// ABI-encoded non-indexed data
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<TxHash>,
    pub log_index: Option<u64>,
}

/// Confirmed execution record of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    /// False when the transaction reverted
    pub success: bool,
    pub logs: Vec<ChainLog>,
}

/// EIP-1559 fee parameters for a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasBid {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// A fully-encoded call ready for signing
#[derive(Debug, Clone)]
pub struct TxSubmission {
    pub to: Address,
    pub calldata: Bytes,
    pub value: U256,
    pub gas: GasBid,
}

/// Historical log query
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub address: Address,
    /// Accepted event signatures (topic0), any of which matches
    pub event_signatures: Vec<B256>,
    pub from_block: u64,
    pub to_block: u64,
}

/// Chain access errors
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("invalid signer: {0}")]
    Signer(String),
    #[error("transaction {0} not confirmed within {1:?}")]
    ConfirmationTimeout(TxHash, Duration),
}

/// Node operations used by the executor and reconciler
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current network gas price in wei
    async fn gas_price(&self) -> Result<u128, ChainError>;

    /// Current head block number
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Timestamp (unix seconds) of a block, `None` if the node doesn't know it
    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>, ChainError>;

    /// Sign and broadcast, returning the transaction hash without waiting
    async fn submit_transaction(
        &self,
        credential: &ExecutorCredential,
        submission: TxSubmission,
    ) -> Result<TxHash, ChainError>;

    /// Block until the transaction is mined or the confirmation timeout elapses
    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt, ChainError>;

    /// Receipt lookup without waiting
    async fn get_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, ChainError>;

    async fn query_logs(&self, query: LogQuery) -> Result<Vec<ChainLog>, ChainError>;
}
