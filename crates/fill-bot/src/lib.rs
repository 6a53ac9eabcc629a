//! Vault order filler service.
//!
//! [`FillBot`] wires the order producers (ledger listener, periodic
//! discovery, deposit scanner) to the scheduler and executor. The protocol
//! client is supplied by the embedding binary through [`Components`].

pub mod app;
pub mod config;
pub mod error;

pub use app::{Components, FillBot};
pub use config::{resolve_config_path, AppConfig, CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH};
pub use error::{AppError, AppResult};
