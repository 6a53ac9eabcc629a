//! Order scheduling and execution for the vault order filler.
//!
//! - `Scheduler` / `InflightOrders`: de-duplicated per-order tasks that wait
//!   for release and run the executor
//! - `Executor`: pre-conditions, fill transaction cycle, outcome resolution
//! - `TransactionBuilder`: compute budget, priority fee and fee ceiling
//! - `classify_failure`: business-rule rejections from program logs
//! - `BalanceMonitor`: operator balance floor alerts
//! - `KeyManager`: operator keypair loading

pub mod balance;
pub mod classify;
pub mod error;
pub mod executor;
pub mod scheduler;
pub mod signer;
pub mod transaction;

pub use balance::BalanceMonitor;
pub use classify::{classify_failure, FailureClass};
pub use error::{FillError, FillResult};
pub use executor::{covers_safety_ratio, Executor, ExecutorConfig, FillPlan, FillTarget};
pub use scheduler::{unlock_delay, InflightOrders, Scheduler, SchedulerConfig};
pub use signer::{KeyError, KeyManager, KeySource};
pub use transaction::{
    compute_unit_limit, priority_fee_from_samples, projected_fee, BuildOutcome,
    PreparedTransaction, TransactionBuilder, TransactionConfig, LAMPORTS_PER_SIGNATURE,
};
