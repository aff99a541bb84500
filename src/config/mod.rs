//! Configuration module
//!
//! Handles loading and validation of the application configuration.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::scheduling::CronSchedule;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub rpc: RpcConfig,
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    pub quote: QuoteConfig,
    pub oracle: OracleConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_yaml_str(&content)?;
        info!("Configuration loaded from {:?}", path);
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.rpc.chain_id > 0, "chain_id must be positive");
        anyhow::ensure!(
            self.rpc.confirmation_timeout_secs > 0,
            "confirmation_timeout_secs must be positive"
        );
        anyhow::ensure!(
            self.execution.gas_price_markup_pct <= 1000,
            "gas_price_markup_pct must be between 0 and 1000"
        );
        anyhow::ensure!(
            self.execution.priority_fee_divisor > 0,
            "priority_fee_divisor must be positive"
        );
        anyhow::ensure!(
            self.execution.milestones.windows(2).all(|w| w[0] < w[1]),
            "milestones must be strictly ascending"
        );
        anyhow::ensure!(
            self.execution.milestones.iter().all(|m| *m > 0 && *m <= 100),
            "milestones must be between 1 and 100"
        );
        anyhow::ensure!(
            self.quote.slippage_bps > 0 && self.quote.slippage_bps <= 5000,
            "slippage_bps must be between 1 and 5000"
        );
        anyhow::ensure!(self.quote.deadline_secs > 0, "quote deadline_secs must be positive");
        anyhow::ensure!(
            self.contracts.input_token.decimals <= 36 && self.contracts.output_token.decimals <= 36,
            "token decimals must be at most 36"
        );
        anyhow::ensure!(self.schedule.lookback_blocks > 0, "lookback_blocks must be positive");

        for (name, value) in [
            ("contracts.dca_contract", &self.contracts.dca_contract),
            ("contracts.swap_pool", &self.contracts.swap_pool),
            ("contracts.input_token.address", &self.contracts.input_token.address),
            ("contracts.output_token.address", &self.contracts.output_token.address),
        ] {
            Address::from_str(value).with_context(|| format!("Invalid address for {}", name))?;
        }

        for (name, expr) in [
            ("schedule.daily", &self.schedule.daily),
            ("schedule.weekly", &self.schedule.weekly),
            ("schedule.reconcile", &self.schedule.reconcile),
        ] {
            CronSchedule::parse(expr).with_context(|| format!("Invalid cron expression for {}", name))?;
        }

        if self.secrets.source == SecretSource::File {
            anyhow::ensure!(
                self.secrets.file_path.is_some(),
                "secrets.file_path is required when secrets.source is 'file'"
            );
        }

        Ok(())
    }

    /// Create a default config for testing
    #[cfg(test)]
    pub fn default_for_test() -> Self {
        Self {
            rpc: RpcConfig {
                url: "http://localhost:8545".to_string(),
                chain_id: 8453,
                request_timeout_ms: 10000,
                confirmation_timeout_secs: 120,
                poll_interval_ms: 1000,
            },
            contracts: ContractsConfig {
                dca_contract: "0x1111111111111111111111111111111111111111".to_string(),
                swap_pool: "0xfBB6Eed8e7aa03B138556eeDaF5D271A5E1e43ef".to_string(),
                input_token: TokenConfig {
                    address: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".to_string(),
                    symbol: "USDC".to_string(),
                    decimals: 6,
                },
                output_token: TokenConfig {
                    address: "0xcbB7C0000aB88B473b1f5aFd9ef808440eed33Bf".to_string(),
                    symbol: "cbBTC".to_string(),
                    decimals: 8,
                },
            },
            execution: ExecutionConfig::default(),
            quote: QuoteConfig {
                api_url: "http://localhost:3000".to_string(),
                slippage_bps: 500,
                deadline_secs: 1800,
                timeout_ms: 10000,
            },
            oracle: OracleConfig {
                api_url: "http://localhost:3001".to_string(),
                asset_symbol: "cbBTC".to_string(),
                fiat_symbol: "USD".to_string(),
                timeout_ms: 10000,
            },
            secrets: SecretsConfig::default(),
            schedule: ScheduleConfig::default(),
            ledger: LedgerConfig::default(),
            notifications: NotificationsConfig::default(),
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
                json_logs: false,
                log_file: None,
                metrics_port: 9090,
                enable_metrics: false,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_chain_id() -> u64 { 8453 }
fn default_request_timeout() -> u64 { 10000 }
fn default_confirmation_timeout() -> u64 { 120 }
fn default_poll_interval() -> u64 { 1000 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// DCA program that executes swaps and emits `Payment`
    pub dca_contract: String,
    /// Pool whose `Swap` log carries the execution price
    pub swap_pool: String,
    pub input_token: TokenConfig,
    pub output_token: TokenConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_gas_markup")]
    pub gas_price_markup_pct: u64,
    #[serde(default = "default_priority_fee_divisor")]
    pub priority_fee_divisor: u64,
    /// Skip users already paid in the current period before requesting a quote
    #[serde(default = "default_true")]
    pub skip_paid_this_period: bool,
    /// Target-progress percentages that trigger milestone notifications
    #[serde(default = "default_milestones")]
    pub milestones: Vec<u32>,
}

fn default_gas_markup() -> u64 { 20 }
fn default_priority_fee_divisor() -> u64 { 4 }
fn default_milestones() -> Vec<u32> { vec![25, 50, 75, 100] }
fn default_true() -> bool { true }

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            gas_price_markup_pct: default_gas_markup(),
            priority_fee_divisor: default_priority_fee_divisor(),
            skip_paid_this_period: true,
            milestones: default_milestones(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteConfig {
    pub api_url: String,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,
    #[serde(default = "default_quote_deadline")]
    pub deadline_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub timeout_ms: u64,
}

fn default_slippage_bps() -> u32 { 500 }
fn default_quote_deadline() -> u64 { 1800 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    pub api_url: String,
    pub asset_symbol: String,
    #[serde(default = "default_fiat_symbol")]
    pub fiat_symbol: String,
    #[serde(default = "default_request_timeout")]
    pub timeout_ms: u64,
}

fn default_fiat_symbol() -> String { "USD".to_string() }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretSource {
    Env,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    #[serde(default = "default_secret_source")]
    pub source: SecretSource,
    #[serde(default = "default_secret_name")]
    pub env_var: String,
    pub file_path: Option<String>,
    /// Key inside the JSON secret document
    #[serde(default = "default_secret_name")]
    pub secret_key: String,
}

fn default_secret_source() -> SecretSource { SecretSource::Env }
fn default_secret_name() -> String { "DCA_EXECUTOR_PRIVATE_KEY".to_string() }

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            source: default_secret_source(),
            env_var: default_secret_name(),
            file_path: None,
            secret_key: default_secret_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_daily_cron")]
    pub daily: String,
    #[serde(default = "default_weekly_cron")]
    pub weekly: String,
    #[serde(default = "default_reconcile_cron")]
    pub reconcile: String,
    #[serde(default = "default_lookback_blocks")]
    pub lookback_blocks: u64,
}

fn default_daily_cron() -> String { "0 0 * * *".to_string() }
fn default_weekly_cron() -> String { "0 0 * * 1".to_string() }
fn default_reconcile_cron() -> String { "*/5 * * * *".to_string() }
fn default_lookback_blocks() -> u64 { 100 }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            daily: default_daily_cron(),
            weekly: default_weekly_cron(),
            reconcile: default_reconcile_cron(),
            lookback_blocks: default_lookback_blocks(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: String,
    #[serde(default = "default_persist_retries")]
    pub persist_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_ledger_path() -> String { "data/ledger.json".to_string() }
fn default_persist_retries() -> u32 { 3 }
fn default_retry_delay() -> u64 { 100 }

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            persist_retries: default_persist_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub enabled: bool,
    pub webhook_url: Option<String>,
    #[serde(default = "default_target_url")]
    pub target_url: String,
    #[serde(default = "default_request_timeout")]
    pub timeout_ms: u64,
}

fn default_target_url() -> String { "https://dca.bitmor.xyz/".to_string() }

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            target_url: default_target_url(),
            timeout_ms: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    pub log_file: Option<String>,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default)]
    pub enable_metrics: bool,
}

fn default_metrics_port() -> u16 { 9090 }
