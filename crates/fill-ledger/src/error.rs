//! Ledger error types.

use solana_sdk::signature::Signature;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Submission rejected during preflight simulation.
    #[error("Transaction preflight failed: {message}")]
    PreflightFailed { message: String, logs: Vec<String> },

    #[error("Transaction {0} expired before confirmation")]
    Expired(Signature),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Subscription failed: {0}")]
    Subscription(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LedgerError {
    /// Program logs carried by the error, if any.
    #[must_use]
    pub fn logs(&self) -> &[String] {
        match self {
            LedgerError::PreflightFailed { logs, .. } => logs,
            _ => &[],
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
