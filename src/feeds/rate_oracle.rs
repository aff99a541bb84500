//! Asset <-> fiat conversion
//!
//! Backed by a price server exposing
//! `GET /coins/price-convert?amount=&symbol=&convert=`.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::OracleConfig;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("price server request failed: {0}")]
    Request(String),
    #[error("price server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("price server response unusable: {0}")]
    InvalidResponse(String),
}

/// Stateless conversion between the output asset and fiat
#[async_trait]
pub trait RateOracle: Send + Sync {
    /// Fiat value of `amount` asset units
    async fn asset_to_fiat(&self, amount: Decimal) -> Result<Decimal, OracleError>;

    /// Asset units purchasable with `amount` fiat
    async fn fiat_to_asset(&self, amount: Decimal) -> Result<Decimal, OracleError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConvertResponse {
    converted_price: Option<serde_json::Value>,
}

/// HTTP price server client
pub struct HttpRateOracle {
    client: Client,
    api_url: String,
    asset_symbol: String,
    fiat_symbol: String,
}

impl HttpRateOracle {
    pub fn new(config: &OracleConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            asset_symbol: config.asset_symbol.clone(),
            fiat_symbol: config.fiat_symbol.clone(),
        })
    }

    async fn convert(&self, amount: Decimal, symbol: &str, convert: &str) -> Result<Decimal, OracleError> {
        let url = format!("{}/coins/price-convert", self.api_url);
        let amount_param = amount.normalize().to_string();

        let response = self
            .client
            .get(&url)
            .query(&[("amount", amount_param.as_str()), ("symbol", symbol), ("convert", convert)])
            .send()
            .await
            .map_err(|e| OracleError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status { status, body });
        }

        let parsed: ConvertResponse = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        let value = parse_converted_price(parsed.converted_price)?;
        debug!("{} {} = {} {}", amount, symbol, value, convert);
        Ok(value)
    }
}

#[async_trait]
impl RateOracle for HttpRateOracle {
    async fn asset_to_fiat(&self, amount: Decimal) -> Result<Decimal, OracleError> {
        self.convert(amount, &self.asset_symbol, &self.fiat_symbol).await
    }

    async fn fiat_to_asset(&self, amount: Decimal) -> Result<Decimal, OracleError> {
        self.convert(amount, &self.fiat_symbol, &self.asset_symbol).await
    }
}

/// Accepts the converted price as a JSON number or numeric string,
/// including scientific notation for tiny amounts.
fn parse_converted_price(value: Option<serde_json::Value>) -> Result<Decimal, OracleError> {
    let text = match value {
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::String(s)) => s,
        other => {
            return Err(OracleError::InvalidResponse(format!(
                "convertedPrice missing or not numeric: {:?}",
                other
            )))
        }
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| OracleError::InvalidResponse(format!("{}: {}", text, e)))
}
