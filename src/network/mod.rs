//! Network module
//!
//! Provides the chain access trait, its JSON-RPC implementation, and the
//! contract ABI surfaces the engine consumes.

pub mod abi;
pub mod chain;
pub mod rpc_client;

pub use chain::{ChainClient, ChainError, ChainLog, GasBid, LogQuery, TxReceipt, TxSubmission};
pub use rpc_client::RpcChainClient;
