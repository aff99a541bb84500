//! Common types used throughout the application

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Recurrence tag governing how often a plan executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Daily,
    Weekly,
}

impl Cadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
        }
    }

    /// Start of the period containing `now`: UTC midnight for daily plans,
    /// Monday 00:00 UTC for weekly plans.
    pub fn period_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let day_start = Utc
            .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
            .single()
            .unwrap_or(now);

        match self {
            Cadence::Daily => day_start,
            Cadence::Weekly => {
                let days_from_monday = now.weekday().num_days_from_monday() as i64;
                day_start - Duration::days(days_from_monday)
            }
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cadence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Cadence::Daily),
            "weekly" => Ok(Cadence::Weekly),
            other => Err(format!("unknown cadence: {other}")),
        }
    }
}

/// Lifecycle status of a payment record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Completed,
    Failed,
    Pending,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Completed => write!(f, "completed"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Pending => write!(f, "pending"),
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "pending" => Ok(PaymentStatus::Pending),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// Which ingestion path created a payment record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentSource {
    Executor,
    Reconciler,
}

/// Coarse classification of a failed per-user attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    InsufficientFunds,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InsufficientFunds => write!(f, "insufficient_funds"),
            FailureKind::Other => write!(f, "other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadence_parse() {
        assert_eq!("daily".parse::<Cadence>().unwrap(), Cadence::Daily);
        assert_eq!(" Weekly ".parse::<Cadence>().unwrap(), Cadence::Weekly);
        assert!("monthly".parse::<Cadence>().is_err());
    }

    #[test]
    fn test_period_start() {
        // 2024-05-15 is a Wednesday
        let now = Utc.with_ymd_and_hms(2024, 5, 15, 13, 45, 0).unwrap();
        assert_eq!(
            Cadence::Daily.period_start(now),
            Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(
            Cadence::Weekly.period_start(now),
            Utc.with_ymd_and_hms(2024, 5, 13, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&PaymentStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
        assert_eq!("FAILED".parse::<PaymentStatus>().unwrap(), PaymentStatus::Failed);
    }
}
