//! DCA Engine Library
//!
//! Scheduled dollar-cost-averaging purchases on an EVM chain, with an
//! idempotent payment ledger fed by both the executor and an on-chain
//! event reconciler.

pub mod config;
pub mod execution;
pub mod feeds;
pub mod ledger;
pub mod network;
pub mod notifications;
pub mod reconciler;
pub mod scheduling;
pub mod secrets;
pub mod telemetry;
pub mod utils;

// Re-export main types
pub use config::AppConfig;
pub use execution::{CycleReport, PaymentExecutor};
pub use ledger::{PaymentLedger, PaymentRecord};
pub use reconciler::{EventReconciler, ReconcileReport};
pub use scheduling::Scheduler;
