//! Core domain types for the vault order filler.
//!
//! - `Order`, `OrderKind`, `OrderKey`: the unit of work and its identity
//! - `FillOutcome`: final result of an execution attempt
//! - `ProtocolClient`: seam to the external protocol client
//! - `OrderSink`: entry point shared by every order producer

pub mod error;
pub mod mock;
pub mod order;
pub mod outcome;
pub mod protocol;
pub mod sink;
pub mod wallet;

pub use error::{CoreError, CoreResult};
pub use mock::{BuiltFill, MockProtocol, MOCK_PROGRAM_ID};
pub use order::{AssetIndex, Order, OrderKey, OrderKind, OrderPayload, OrderStatus, TimeLock};
pub use outcome::{BusinessRejection, FillOutcome, SkipReason};
pub use protocol::{
    asset_for_mint, AssetInfo, BoxFuture, DepositBalances, FillInstructions, ProtocolClient,
    ProtocolError, ProtocolResult,
};
pub use sink::{OrderSink, SubmitResult};
pub use wallet::{lamports_to_sol, WalletState, LAMPORTS_PER_SOL};
