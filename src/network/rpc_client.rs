//! EVM JSON-RPC client
//!
//! Provides node access over HTTP with:
//! - Per-request timeouts
//! - Receipt polling bounded by a confirmation timeout
//! - Structured classification of funding errors

use alloy::eips::BlockNumberOrTag;
use alloy::network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy::primitives::TxHash;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log, TransactionReceipt, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::{RpcError, TransportErrorKind};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::future::{Future, IntoFuture};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::RpcConfig;
use crate::network::chain::{
    ChainClient, ChainError, ChainLog, LogQuery, TxReceipt, TxSubmission,
};
use crate::secrets::ExecutorCredential;

/// JSON-RPC error code some nodes use for underfunded senders
const INSUFFICIENT_FUNDS_CODE: i64 = -32003;

/// Node client backed by an alloy HTTP provider
pub struct RpcChainClient {
    /// Read-only provider
    provider: DynProvider,
    /// Endpoint, reused for signing providers
    url: Url,
    chain_id: u64,
    request_timeout: Duration,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl RpcChainClient {
    /// Create a new client
    pub fn new(config: &RpcConfig) -> Result<Self> {
        let url: Url = config.url.parse().context("Invalid RPC url")?;
        let provider = ProviderBuilder::new().connect_http(url.clone()).erased();

        info!("RPC client initialized for chain {}", config.chain_id);

        Ok(Self {
            provider,
            url,
            chain_id: config.chain_id,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            confirmation_timeout: Duration::from_secs(config.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }

    async fn timed<T, F>(&self, what: &str, fut: F) -> Result<T, ChainError>
    where
        F: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(classify_rpc_error),
            Err(_) => Err(ChainError::Rpc(format!(
                "{} timed out after {:?}",
                what, self.request_timeout
            ))),
        }
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.timed("eth_gasPrice", self.provider.get_gas_price()).await
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.timed("eth_blockNumber", self.provider.get_block_number()).await
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>, ChainError> {
        let block = self
            .timed(
                "eth_getBlockByNumber",
                self.provider
                    .get_block_by_number(BlockNumberOrTag::Number(number))
                    .into_future(),
            )
            .await?;
        Ok(block.map(|b| b.header.timestamp))
    }

    async fn submit_transaction(
        &self,
        credential: &ExecutorCredential,
        submission: TxSubmission,
    ) -> Result<TxHash, ChainError> {
        let signer: PrivateKeySigner = credential
            .expose()
            .parse()
            .map_err(|e| ChainError::Signer(format!("{}", e)))?;
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(self.url.clone());

        let request = TransactionRequest::default()
            .with_to(submission.to)
            .with_input(submission.calldata)
            .with_value(submission.value)
            .with_chain_id(self.chain_id)
            .with_max_fee_per_gas(submission.gas.max_fee_per_gas)
            .with_max_priority_fee_per_gas(submission.gas.max_priority_fee_per_gas);

        let pending = self
            .timed("eth_sendRawTransaction", provider.send_transaction(request))
            .await?;
        let hash = *pending.tx_hash();
        debug!("Transaction broadcast: {}", hash);
        Ok(hash)
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt, ChainError> {
        let start = Instant::now();

        loop {
            if start.elapsed() > self.confirmation_timeout {
                return Err(ChainError::ConfirmationTimeout(hash, self.confirmation_timeout));
            }

            match self.get_receipt(hash).await {
                Ok(Some(receipt)) => {
                    debug!(
                        "Transaction {} mined in block {} after {:?}",
                        hash,
                        receipt.block_number,
                        start.elapsed()
                    );
                    return Ok(receipt);
                }
                Ok(None) => sleep(self.poll_interval).await,
                Err(e) => {
                    warn!("Error checking receipt for {}: {}", hash, e);
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn get_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, ChainError> {
        let receipt = self
            .timed(
                "eth_getTransactionReceipt",
                self.provider.get_transaction_receipt(hash).into_future(),
            )
            .await?;

        match receipt {
            // Pending receipts carry no block yet
            Some(r) if r.block_number.is_some() => Ok(Some(convert_receipt(&r))),
            _ => Ok(None),
        }
    }

    async fn query_logs(&self, query: LogQuery) -> Result<Vec<ChainLog>, ChainError> {
        let filter = Filter::new()
            .address(query.address)
            .event_signature(query.event_signatures)
            .from_block(query.from_block)
            .to_block(query.to_block);

        let logs = self.timed("eth_getLogs", self.provider.get_logs(&filter)).await?;
        Ok(logs.iter().map(convert_log).collect())
    }
}

fn convert_receipt(receipt: &TransactionReceipt) -> TxReceipt {
    TxReceipt {
        transaction_hash: receipt.transaction_hash,
        block_number: receipt.block_number.unwrap_or_default(),
        gas_used: receipt.gas_used,
        effective_gas_price: receipt.effective_gas_price,
        success: receipt.status(),
        logs: receipt.inner.logs().iter().map(convert_log).collect(),
    }
}

fn convert_log(log: &Log) -> ChainLog {
    ChainLog {
        address: log.address(),
        topics: log.topics().to_vec(),
        data: log.data().data.clone(),
        block_number: log.block_number,
        transaction_hash: log.transaction_hash,
        log_index: log.log_index,
    }
}

/// Map node errors onto the engine's taxonomy, using the JSON-RPC error
/// payload when the node provides one.
fn classify_rpc_error(err: RpcError<TransportErrorKind>) -> ChainError {
    if let Some(payload) = err.as_error_resp() {
        let message = payload.message.to_lowercase();
        if payload.code == INSUFFICIENT_FUNDS_CODE
            || message.contains("insufficient funds")
            || message.contains("exceeds balance")
        {
            return ChainError::InsufficientFunds(payload.message.to_string());
        }
        return ChainError::Rpc(format!("{} (code {})", payload.message, payload.code));
    }
    ChainError::Rpc(err.to_string())
}
