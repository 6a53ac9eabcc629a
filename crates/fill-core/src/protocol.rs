//! Protocol client seam.
//!
//! Decoding order and vault accounts, computing withdrawal limits and building
//! the protocol-specific fill instructions are owned by the protocol client.
//! The filler only consumes it through [`ProtocolClient`].

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use solana_sdk::address_lookup_table::AddressLookupTableAccount;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use thiserror::Error;

use crate::order::{AssetIndex, Order, OrderKind};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Protocol client errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The account does not exist or has no data.
    #[error("Account does not exist or has no data {0}")]
    NotFound(Pubkey),

    #[error("Account decode failed: {0}")]
    Decode(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Protocol error: {0}")]
    Other(String),
}

impl ProtocolError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProtocolError::NotFound(_))
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Instructions returned by a protocol fill builder.
#[derive(Debug, Default)]
pub struct FillInstructions {
    pub instructions: Vec<Instruction>,
    pub lookup_tables: Vec<AddressLookupTableAccount>,
    /// Signers required in addition to the operator wallet.
    pub signers: Vec<Keypair>,
}

/// Supported asset and its mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetInfo {
    pub index: AssetIndex,
    pub mint: Pubkey,
}

/// Deposit-address balances of one vault owner, in base units per asset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepositBalances {
    pub owner: Pubkey,
    pub balances: BTreeMap<AssetIndex, u64>,
}

impl DepositBalances {
    #[must_use]
    pub fn new(owner: Pubkey) -> Self {
        Self {
            owner,
            balances: BTreeMap::new(),
        }
    }

    /// Non-zero balances only.
    pub fn non_zero(&self) -> impl Iterator<Item = (AssetIndex, u64)> + '_ {
        self.balances
            .iter()
            .filter(|(_, amount)| **amount > 0)
            .map(|(asset, amount)| (*asset, *amount))
    }
}

/// External protocol client.
pub trait ProtocolClient: Send + Sync {
    /// Fetch and decode an open order account.
    ///
    /// Returns [`ProtocolError::NotFound`] when the account is gone.
    fn parse_order(&self, kind: OrderKind, account: Pubkey) -> BoxFuture<'_, ProtocolResult<Order>>;

    /// All open withdraw and spend-limit orders, read directly from the ledger.
    fn open_orders(&self) -> BoxFuture<'_, ProtocolResult<Vec<Order>>>;

    /// Owners of every vault.
    fn vault_owners(&self) -> BoxFuture<'_, ProtocolResult<Vec<Pubkey>>>;

    /// Batch fetch deposit-address balances for the given owners.
    ///
    /// Owners whose vault cannot be loaded are omitted.
    fn deposit_balances(&self, owners: Vec<Pubkey>) -> BoxFuture<'_, ProtocolResult<Vec<DepositBalances>>>;

    /// Supported assets.
    fn assets(&self) -> Vec<AssetInfo>;

    /// Token account the destination must hold to receive `asset`.
    ///
    /// `None` for the native asset.
    fn destination_token_account(
        &self,
        destination: Pubkey,
        asset: AssetIndex,
    ) -> BoxFuture<'_, ProtocolResult<Option<Pubkey>>>;

    /// Current maximum withdrawable amount for the owner's vault.
    fn withdrawal_limit(
        &self,
        owner: Pubkey,
        asset: AssetIndex,
        reduce_only: bool,
    ) -> BoxFuture<'_, ProtocolResult<u64>>;

    /// Fill instructions for a withdraw order, optionally scaled to `amount`.
    fn build_withdraw_fill(
        &self,
        order_account: Pubkey,
        filler: Pubkey,
        amount: Option<u64>,
    ) -> BoxFuture<'_, ProtocolResult<FillInstructions>>;

    /// Fill instructions for a spend-limit update order.
    fn build_spend_limit_fill(
        &self,
        order_account: Pubkey,
        filler: Pubkey,
    ) -> BoxFuture<'_, ProtocolResult<FillInstructions>>;

    /// Instructions crediting a deposit-address balance into the vault.
    fn build_deposit_fill(
        &self,
        owner: Pubkey,
        asset: AssetIndex,
        filler: Pubkey,
    ) -> BoxFuture<'_, ProtocolResult<FillInstructions>>;
}

/// Resolve an asset index from its mint.
#[must_use]
pub fn asset_for_mint(assets: &[AssetInfo], mint: &Pubkey) -> Option<AssetIndex> {
    assets
        .iter()
        .find(|asset| asset.mint == *mint)
        .map(|asset| asset.index)
}
