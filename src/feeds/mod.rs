//! Price Feeds Module
//!
//! Provides fiat valuation of the purchased asset.

pub mod rate_oracle;

pub use rate_oracle::{HttpRateOracle, OracleError, RateOracle};
