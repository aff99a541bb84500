//! Shared types and helpers

pub mod helpers;
pub mod types;

pub use types::{Cadence, FailureKind, PaymentSource, PaymentStatus};
