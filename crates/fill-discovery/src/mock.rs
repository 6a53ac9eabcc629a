//! Test doubles for the indexer and order sink.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use fill_core::{
    AssetInfo, BoxFuture, DepositBalances, Order, OrderKey, OrderKind, OrderSink, SubmitResult,
};
use parking_lot::Mutex;
use solana_sdk::pubkey::Pubkey;

use crate::error::{DiscoveryError, DiscoveryResult};
use crate::index::OrderIndex;

/// Mock indexer.
///
/// `order_exists` answers from [`MockOrderIndex::set_exists`]; unknown
/// accounts are reported as present.
#[derive(Debug, Default)]
pub struct MockOrderIndex {
    orders: Mutex<Vec<Order>>,
    deposits: Mutex<Vec<DepositBalances>>,
    exists: Mutex<HashMap<Pubkey, bool>>,
    fail: AtomicBool,
    fail_exists: AtomicBool,
}

impl MockOrderIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_orders(&self, orders: Vec<Order>) {
        *self.orders.lock() = orders;
    }

    pub fn set_deposits(&self, deposits: Vec<DepositBalances>) {
        *self.deposits.lock() = deposits;
    }

    pub fn set_exists(&self, account: Pubkey, exists: bool) {
        self.exists.lock().insert(account, exists);
    }

    /// Fail bulk requests.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Fail existence checks.
    pub fn set_fail_exists(&self, fail: bool) {
        self.fail_exists.store(fail, Ordering::SeqCst);
    }

    fn guard(&self, flag: &AtomicBool) -> DiscoveryResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Http("HTTP 503 Service Unavailable: mock".to_string()));
        }
        Ok(())
    }
}

impl OrderIndex for MockOrderIndex {
    fn open_orders(&self) -> BoxFuture<'_, DiscoveryResult<Vec<Order>>> {
        Box::pin(async move {
            self.guard(&self.fail)?;
            Ok(self.orders.lock().clone())
        })
    }

    fn deposit_balances<'a>(
        &'a self,
        _assets: &'a [AssetInfo],
    ) -> BoxFuture<'a, DiscoveryResult<Vec<DepositBalances>>> {
        Box::pin(async move {
            self.guard(&self.fail)?;
            Ok(self.deposits.lock().clone())
        })
    }

    fn order_exists(&self, _kind: OrderKind, account: Pubkey) -> BoxFuture<'_, DiscoveryResult<bool>> {
        Box::pin(async move {
            self.guard(&self.fail_exists)?;
            Ok(self.exists.lock().get(&account).copied().unwrap_or(true))
        })
    }
}

/// Sink that records submitted orders.
#[derive(Debug, Default)]
pub struct RecordingSink {
    submitted: Mutex<Vec<Order>>,
    duplicates: Mutex<HashSet<OrderKey>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `key` as a duplicate on submit.
    pub fn mark_duplicate(&self, key: OrderKey) {
        self.duplicates.lock().insert(key);
    }

    pub fn submitted(&self) -> Vec<Order> {
        self.submitted.lock().clone()
    }
}

impl OrderSink for RecordingSink {
    fn submit(&self, order: Order) -> SubmitResult {
        if self.duplicates.lock().contains(&order.key) {
            return SubmitResult::Duplicate;
        }
        self.submitted.lock().push(order);
        SubmitResult::Accepted
    }
}
