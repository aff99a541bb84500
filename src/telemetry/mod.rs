//! Telemetry Module

mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use self::metrics::init_metrics;
