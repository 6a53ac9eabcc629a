//! Ledger access for the vault order filler.
//!
//! - `RetryPolicy`: bounded retry with exponential backoff
//! - `LedgerRpc` / `JsonRpcLedger`: ledger queries and transaction submission
//! - `TransactionFeed` / `LogsTransactionFeed`: confirmed-transaction stream

pub mod error;
pub mod feed;
pub mod heartbeat;
pub mod json_rpc;
pub mod mock;
pub mod retry;
pub mod rpc;

pub use error::{LedgerError, LedgerResult};
pub use feed::{logs_mention_instruction, FeedConfig, LogsTransactionFeed, TransactionFeed};
pub use json_rpc::{encode_transaction, JsonRpcLedger};
pub use mock::{MockLedger, MockTransactionFeed};
pub use retry::RetryPolicy;
pub use rpc::{
    AccountInfo, BlockhashInfo, Confirmation, LedgerRpc, ObservedInstruction, ObservedTransaction,
    Simulation,
};
