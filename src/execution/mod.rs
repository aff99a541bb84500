//! Execution
//!
//! Per-cycle purchase pipeline: quote, submit, confirm, interpret the
//! receipt, commit, notify.

pub mod executor;
pub mod gas;
pub mod interpreter;
pub mod milestones;
pub mod quote;

pub use executor::{
    classify_failure, AttemptError, CycleReport, ExecutorError, ExecutorSettings, PaymentExecutor, UserFailure,
};
pub use interpreter::{price_from_sqrt_price_x96, ReceiptInterpreter, SwapFacts};
pub use milestones::crossed_milestones;
pub use quote::{HttpQuoteClient, QuoteError, QuoteRequest, QuoteService, SwapQuote};
