//! Scripted protocol client for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;

use crate::order::{AssetIndex, Order, OrderKey, OrderKind};
use crate::protocol::{
    AssetInfo, BoxFuture, DepositBalances, FillInstructions, ProtocolClient, ProtocolError,
    ProtocolResult,
};

/// Program id used for instructions built by [`MockProtocol`].
pub const MOCK_PROGRAM_ID: Pubkey = Pubkey::new_from_array([7; 32]);

/// A fill instruction requested from the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltFill {
    pub kind: OrderKind,
    pub key: OrderKey,
    pub amount: Option<u64>,
}

/// Mock protocol client.
///
/// Orders registered with [`MockProtocol::insert_order`] exist until removed;
/// every other address parses as `NotFound`.
#[derive(Debug)]
pub struct MockProtocol {
    orders: Mutex<HashMap<Pubkey, Order>>,
    owners: Mutex<Vec<Pubkey>>,
    deposits: Mutex<Vec<DepositBalances>>,
    assets: Vec<AssetInfo>,
    withdrawal_limits: Mutex<HashMap<Pubkey, u64>>,
    fail_listing: AtomicBool,
    build_failures: AtomicU32,
    parse_calls: AtomicU32,
    built: Mutex<Vec<BuiltFill>>,
}

impl Default for MockProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProtocol {
    /// Mock with two assets: index 0 (token) and the native asset.
    pub fn new() -> Self {
        Self {
            orders: Mutex::new(HashMap::new()),
            owners: Mutex::new(Vec::new()),
            deposits: Mutex::new(Vec::new()),
            assets: vec![
                AssetInfo {
                    index: AssetIndex(0),
                    mint: Pubkey::new_from_array([1; 32]),
                },
                AssetInfo {
                    index: AssetIndex::NATIVE,
                    mint: Pubkey::new_from_array([2; 32]),
                },
            ],
            withdrawal_limits: Mutex::new(HashMap::new()),
            fail_listing: AtomicBool::new(false),
            build_failures: AtomicU32::new(0),
            parse_calls: AtomicU32::new(0),
            built: Mutex::new(Vec::new()),
        }
    }

    pub fn insert_order(&self, order: Order) {
        if let Some(account) = order.key.account() {
            self.orders.lock().insert(account, order);
        }
    }

    pub fn remove_order(&self, account: &Pubkey) {
        self.orders.lock().remove(account);
    }

    pub fn set_owners(&self, owners: Vec<Pubkey>) {
        *self.owners.lock() = owners;
    }

    pub fn set_deposits(&self, deposits: Vec<DepositBalances>) {
        *self.deposits.lock() = deposits;
    }

    /// Withdrawal limit for an owner. Unset owners can withdraw anything.
    pub fn set_withdrawal_limit(&self, owner: Pubkey, limit: u64) {
        self.withdrawal_limits.lock().insert(owner, limit);
    }

    /// Make listing calls (open orders, owners) fail.
    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` fill builds.
    pub fn fail_next_builds(&self, count: u32) {
        self.build_failures.store(count, Ordering::SeqCst);
    }

    pub fn parse_calls(&self) -> u32 {
        self.parse_calls.load(Ordering::SeqCst)
    }

    pub fn built(&self) -> Vec<BuiltFill> {
        self.built.lock().clone()
    }

    /// Token account derived for `destination` and `asset`.
    #[must_use]
    pub fn token_account_for(destination: &Pubkey, asset: AssetIndex) -> Pubkey {
        Pubkey::find_program_address(
            &[destination.as_ref(), &asset.0.to_le_bytes()],
            &MOCK_PROGRAM_ID,
        )
        .0
    }

    fn listing_guard(&self) -> ProtocolResult<()> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(ProtocolError::Rpc("mock listing failure".to_string()));
        }
        Ok(())
    }

    fn build(
        &self,
        kind: OrderKind,
        key: OrderKey,
        filler: Pubkey,
        amount: Option<u64>,
    ) -> ProtocolResult<FillInstructions> {
        let failed = self
            .build_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ProtocolError::Rpc("mock build failure".to_string()));
        }

        if let OrderKey::Account(account) = key {
            if !self.orders.lock().contains_key(&account) {
                return Err(ProtocolError::NotFound(account));
            }
        }

        self.built.lock().push(BuiltFill { kind, key, amount });
        let target = match key {
            OrderKey::Account(account) => account,
            OrderKey::Deposit { owner, .. } => owner,
        };
        Ok(FillInstructions {
            instructions: vec![Instruction::new_with_bytes(
                MOCK_PROGRAM_ID,
                &[kind as u8],
                vec![AccountMeta::new(target, false), AccountMeta::new(filler, true)],
            )],
            lookup_tables: Vec::new(),
            signers: Vec::new(),
        })
    }
}

impl ProtocolClient for MockProtocol {
    fn parse_order(&self, kind: OrderKind, account: Pubkey) -> BoxFuture<'_, ProtocolResult<Order>> {
        Box::pin(async move {
            self.parse_calls.fetch_add(1, Ordering::SeqCst);
            self.orders
                .lock()
                .get(&account)
                .filter(|order| order.kind() == kind)
                .cloned()
                .ok_or(ProtocolError::NotFound(account))
        })
    }

    fn open_orders(&self) -> BoxFuture<'_, ProtocolResult<Vec<Order>>> {
        Box::pin(async move {
            self.listing_guard()?;
            Ok(self.orders.lock().values().cloned().collect())
        })
    }

    fn vault_owners(&self) -> BoxFuture<'_, ProtocolResult<Vec<Pubkey>>> {
        Box::pin(async move {
            self.listing_guard()?;
            Ok(self.owners.lock().clone())
        })
    }

    fn deposit_balances(&self, owners: Vec<Pubkey>) -> BoxFuture<'_, ProtocolResult<Vec<DepositBalances>>> {
        Box::pin(async move {
            Ok(self
                .deposits
                .lock()
                .iter()
                .filter(|deposit| owners.contains(&deposit.owner))
                .cloned()
                .collect())
        })
    }

    fn assets(&self) -> Vec<AssetInfo> {
        self.assets.clone()
    }

    fn destination_token_account(
        &self,
        destination: Pubkey,
        asset: AssetIndex,
    ) -> BoxFuture<'_, ProtocolResult<Option<Pubkey>>> {
        Box::pin(async move {
            if asset.is_native() {
                return Ok(None);
            }
            Ok(Some(Self::token_account_for(&destination, asset)))
        })
    }

    fn withdrawal_limit(
        &self,
        owner: Pubkey,
        _asset: AssetIndex,
        _reduce_only: bool,
    ) -> BoxFuture<'_, ProtocolResult<u64>> {
        Box::pin(async move {
            Ok(self
                .withdrawal_limits
                .lock()
                .get(&owner)
                .copied()
                .unwrap_or(u64::MAX))
        })
    }

    fn build_withdraw_fill(
        &self,
        order_account: Pubkey,
        filler: Pubkey,
        amount: Option<u64>,
    ) -> BoxFuture<'_, ProtocolResult<FillInstructions>> {
        Box::pin(async move {
            self.build(
                OrderKind::Withdraw,
                OrderKey::Account(order_account),
                filler,
                amount,
            )
        })
    }

    fn build_spend_limit_fill(
        &self,
        order_account: Pubkey,
        filler: Pubkey,
    ) -> BoxFuture<'_, ProtocolResult<FillInstructions>> {
        Box::pin(async move {
            self.build(
                OrderKind::SpendLimitUpdate,
                OrderKey::Account(order_account),
                filler,
                None,
            )
        })
    }

    fn build_deposit_fill(
        &self,
        owner: Pubkey,
        asset: AssetIndex,
        filler: Pubkey,
    ) -> BoxFuture<'_, ProtocolResult<FillInstructions>> {
        Box::pin(async move {
            self.build(
                OrderKind::DepositCredit,
                OrderKey::Deposit { owner, asset },
                filler,
                None,
            )
        })
    }
}
