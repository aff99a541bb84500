//! Helper functions

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Instant;

pub fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Canonical form for addresses and hashes used as store keys.
pub fn normalize_hex(value: &str) -> String {
    let trimmed = value.trim().to_lowercase();
    if trimmed.starts_with("0x") {
        trimmed
    } else {
        format!("0x{}", trimmed)
    }
}

/// Convert a human-scale amount into the token's smallest unit, truncating
/// any precision below one unit. Negative or overflowing amounts yield `None`.
pub fn to_smallest_unit(amount: Decimal, decimals: u32) -> Option<u128> {
    if amount.is_sign_negative() {
        return None;
    }
    let factor = Decimal::from_i128_with_scale(10i128.checked_pow(decimals)?, 0);
    amount.checked_mul(factor)?.trunc().to_u128()
}

/// Convert a smallest-unit amount back into a human-scale decimal.
pub fn from_smallest_unit(raw: u128, decimals: u32) -> Option<Decimal> {
    let raw = i128::try_from(raw).ok()?;
    Decimal::try_from_i128_with_scale(raw, decimals)
        .ok()
        .map(|d| d.normalize())
}

pub async fn retry_with_backoff<T, E, F, Fut>(
    mut operation: F,
    max_retries: u32,
    initial_delay_ms: u64,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = initial_delay_ms;
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_retries => {
                tracing::warn!("Attempt {} failed, retrying in {}ms: {}", attempt + 1, delay, e);
                tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
