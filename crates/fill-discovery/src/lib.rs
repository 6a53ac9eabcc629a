//! Order discovery for the vault order filler.
//!
//! Three producers feed the scheduler through `OrderSink`:
//! - `LedgerEventListener`: new orders from confirmed transactions
//! - `OrderDiscovery`: periodic open-order passes (indexer, then ledger)
//! - `DepositCreditScanner`: non-zero deposit-address balances

pub mod deposits;
pub mod discovery;
pub mod error;
pub mod index;
pub mod listener;
pub mod mock;

pub use deposits::{deposit_credits, DepositCreditScanner, DepositScanConfig, ScanReport};
pub use discovery::{
    filter_missed, DiscoveryConfig, DiscoveryMode, DiscoverySource, OrderDiscovery, PassReport,
};
pub use error::{DiscoveryError, DiscoveryResult};
pub use index::{parse_deposit_balances, parse_open_orders, IndexerClient, OrderIndex, LAMPORTS_RENT};
pub use listener::{
    anchor_discriminator, extract_order_accounts, LedgerEventListener, ListenerConfig,
    WatchedInstruction, ORDER_ACCOUNT_POSITION,
};
pub use mock::{MockOrderIndex, RecordingSink};
