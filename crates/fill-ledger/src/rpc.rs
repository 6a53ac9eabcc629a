//! Ledger RPC seam.

use fill_core::BoxFuture;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;

use crate::error::LedgerResult;

/// Latest blockhash and the last block height at which it is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockhashInfo {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

/// Account as returned by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub lamports: u64,
    pub owner: Pubkey,
    pub data: Vec<u8>,
}

/// Result of simulating a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Simulation {
    /// Ledger-reported error, rendered as text.
    pub err: Option<String>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

/// Confirmed transaction status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub slot: u64,
    /// On-chain execution error, rendered as text.
    pub err: Option<String>,
}

impl Confirmation {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.err.is_none()
    }
}

/// Top-level instruction of an observed transaction, with accounts resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedInstruction {
    pub program_id: Pubkey,
    pub accounts: Vec<Pubkey>,
    pub data: Vec<u8>,
}

/// Confirmed transaction fetched from the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTransaction {
    pub signature: Signature,
    pub slot: u64,
    /// Static keys followed by loaded writable and loaded readonly addresses.
    pub account_keys: Vec<Pubkey>,
    pub instructions: Vec<ObservedInstruction>,
    pub logs: Vec<String>,
    pub failed: bool,
}

/// Ledger RPC operations used by the filler.
pub trait LedgerRpc: Send + Sync {
    /// Current slot.
    fn get_slot(&self) -> BoxFuture<'_, LedgerResult<u64>>;

    /// Current block height.
    fn get_block_height(&self) -> BoxFuture<'_, LedgerResult<u64>>;

    fn get_latest_blockhash(&self) -> BoxFuture<'_, LedgerResult<BlockhashInfo>>;

    /// Fetch an account. `None` when it does not exist.
    fn get_account(&self, address: Pubkey) -> BoxFuture<'_, LedgerResult<Option<AccountInfo>>>;

    /// Native balance in lamports. Zero for a missing account.
    fn get_balance(&self, address: Pubkey) -> BoxFuture<'_, LedgerResult<u64>>;

    fn get_minimum_balance_for_rent_exemption(
        &self,
        data_len: usize,
    ) -> BoxFuture<'_, LedgerResult<u64>>;

    /// Recent prioritization fees (micro-lamports per compute unit) for
    /// transactions touching `accounts`.
    fn get_recent_prioritization_fees(
        &self,
        accounts: Vec<Pubkey>,
    ) -> BoxFuture<'_, LedgerResult<Vec<u64>>>;

    fn simulate_transaction<'a>(
        &'a self,
        transaction: &'a VersionedTransaction,
    ) -> BoxFuture<'a, LedgerResult<Simulation>>;

    /// Submit a signed transaction.
    ///
    /// Preflight rejections surface as `LedgerError::PreflightFailed` with
    /// the program logs.
    fn send_transaction<'a>(
        &'a self,
        transaction: &'a VersionedTransaction,
    ) -> BoxFuture<'a, LedgerResult<Signature>>;

    /// Wait until the signature is confirmed or its blockhash expires.
    fn confirm_transaction(
        &self,
        signature: Signature,
        last_valid_block_height: u64,
    ) -> BoxFuture<'_, LedgerResult<Confirmation>>;

    /// Fetch a confirmed transaction. `None` when not (yet) available.
    fn get_transaction(
        &self,
        signature: Signature,
    ) -> BoxFuture<'_, LedgerResult<Option<ObservedTransaction>>>;
}
