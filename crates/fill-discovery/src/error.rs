//! Discovery error types.

use fill_core::ProtocolError;
use fill_ledger::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Instruction {instruction} has no account at position {position}")]
    MissingAccount {
        instruction: String,
        position: usize,
    },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
