//! Executor error types.

use fill_core::ProtocolError;
use fill_discovery::DiscoveryError;
use fill_ledger::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FillError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Indexer error: {0}")]
    Index(#[from] DiscoveryError),

    #[error("Transaction build failed: {0}")]
    Build(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    /// On-chain failure that matched no known business rule.
    #[error("Unclassified transaction failure: {message}")]
    Unclassified { message: String, logs: Vec<String> },
}

pub type FillResult<T> = Result<T, FillError>;
