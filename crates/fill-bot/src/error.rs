//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] fill_ledger::LedgerError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] fill_discovery::DiscoveryError),

    #[error("Executor error: {0}")]
    Fill(#[from] fill_executor::FillError),

    #[error("Key error: {0}")]
    Key(#[from] fill_executor::KeyError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] fill_telemetry::TelemetryError),

    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
