//! Swap Router Client
//!
//! Fetches executable swap calldata from an external routing service:
//! - Exact-input quotes for the configured token pair
//! - Slippage tolerance and absolute deadline baked into the request
//! - `NoRoute` when the router cannot produce method parameters

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::QuoteConfig;

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("no route available")]
    NoRoute,
    #[error("quote request failed: {0}")]
    Request(String),
    #[error("router returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("router response unusable: {0}")]
    InvalidResponse(String),
}

/// Exact-input swap request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub token_in: Address,
    /// Input amount in the input token's smallest units
    #[serde(with = "u128_string")]
    pub amount_in: u128,
    pub token_out: Address,
    pub recipient: Address,
    pub chain_id: u64,
    pub token_in_decimals: u8,
    pub token_out_decimals: u8,
    pub slippage_bps: u32,
    /// Unix seconds after which the swap must revert
    pub deadline: u64,
}

/// Router output: the call the DCA program forwards to the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapQuote {
    pub to: Address,
    pub calldata: Bytes,
    pub value: U256,
    pub deadline: u64,
}

#[async_trait]
pub trait QuoteService: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote, QuoteError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteResponse {
    method_parameters: Option<MethodParameters>,
}

#[derive(Debug, Deserialize)]
struct MethodParameters {
    to: String,
    calldata: String,
    #[serde(default)]
    value: Option<String>,
}

/// HTTP client for the routing service
pub struct HttpQuoteClient {
    client: Client,
    api_url: String,
}

impl HttpQuoteClient {
    pub fn new(config: &QuoteConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl QuoteService for HttpQuoteClient {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote, QuoteError> {
        let url = format!("{}/quote", self.api_url);
        debug!("Requesting route for {} units of {}", request.amount_in, request.token_in);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| QuoteError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(QuoteError::Status { status, body });
        }

        let route: RouteResponse = response
            .json()
            .await
            .map_err(|e| QuoteError::InvalidResponse(e.to_string()))?;

        let quote = parse_route(route, request.deadline)?;
        info!(
            "Route ready: {} units of {} via {}",
            request.amount_in, request.token_in, quote.to
        );
        Ok(quote)
    }
}

fn parse_route(route: RouteResponse, deadline: u64) -> Result<SwapQuote, QuoteError> {
    let params = route.method_parameters.ok_or(QuoteError::NoRoute)?;

    let to = Address::from_str(&params.to)
        .map_err(|e| QuoteError::InvalidResponse(format!("to: {}", e)))?;
    let calldata = Bytes::from_str(&params.calldata)
        .map_err(|e| QuoteError::InvalidResponse(format!("calldata: {}", e)))?;
    let value = match params.value.as_deref() {
        Some(v) if !v.is_empty() => {
            U256::from_str(v).map_err(|e| QuoteError::InvalidResponse(format!("value: {}", e)))?
        }
        _ => U256::ZERO,
    };

    Ok(SwapQuote {
        to,
        calldata,
        value,
        deadline,
    })
}

/// Large integers travel as decimal strings
mod u128_string {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }
}
