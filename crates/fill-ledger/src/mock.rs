//! In-memory ledger and feed for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use fill_core::BoxFuture;
use parking_lot::Mutex;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{LedgerError, LedgerResult};
use crate::feed::TransactionFeed;
use crate::rpc::{
    AccountInfo, BlockhashInfo, Confirmation, LedgerRpc, ObservedTransaction, Simulation,
};

/// Mock ledger with scripted responses.
#[derive(Debug)]
pub struct MockLedger {
    slot: AtomicU64,
    slot_failures: AtomicU32,
    balances: Mutex<HashMap<Pubkey, u64>>,
    accounts: Mutex<HashMap<Pubkey, AccountInfo>>,
    balance_failures: AtomicU32,
    rent_minimum: AtomicU64,
    priority_fees: Mutex<Vec<u64>>,
    simulation: Mutex<Simulation>,
    send_results: Mutex<VecDeque<LedgerResult<Signature>>>,
    confirmation_err: Mutex<Option<String>>,
    confirm_expires: AtomicBool,
    transactions: Mutex<HashMap<Signature, ObservedTransaction>>,
    simulated: AtomicU32,
    sent: Mutex<Vec<VersionedTransaction>>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            slot: AtomicU64::new(0),
            slot_failures: AtomicU32::new(0),
            balances: Mutex::new(HashMap::new()),
            accounts: Mutex::new(HashMap::new()),
            balance_failures: AtomicU32::new(0),
            rent_minimum: AtomicU64::new(890_880),
            priority_fees: Mutex::new(Vec::new()),
            simulation: Mutex::new(Simulation {
                err: None,
                logs: Vec::new(),
                units_consumed: Some(100_000),
            }),
            send_results: Mutex::new(VecDeque::new()),
            confirmation_err: Mutex::new(None),
            confirm_expires: AtomicBool::new(false),
            transactions: Mutex::new(HashMap::new()),
            simulated: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_slot(&self, slot: u64) {
        self.slot.store(slot, Ordering::SeqCst);
    }

    /// Fail the next `count` slot queries.
    pub fn fail_next_slots(&self, count: u32) {
        self.slot_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_balance(&self, address: Pubkey, lamports: u64) {
        self.balances.lock().insert(address, lamports);
    }

    /// Fail the next `count` balance queries.
    pub fn fail_next_balances(&self, count: u32) {
        self.balance_failures.store(count, Ordering::SeqCst);
    }

    pub fn insert_account(&self, address: Pubkey, account: AccountInfo) {
        self.accounts.lock().insert(address, account);
    }

    pub fn set_rent_minimum(&self, lamports: u64) {
        self.rent_minimum.store(lamports, Ordering::SeqCst);
    }

    pub fn set_priority_fees(&self, fees: Vec<u64>) {
        *self.priority_fees.lock() = fees;
    }

    pub fn set_simulation(&self, simulation: Simulation) {
        *self.simulation.lock() = simulation;
    }

    /// Queue a result for the next submission. Unscripted submissions succeed.
    pub fn push_send_result(&self, result: LedgerResult<Signature>) {
        self.send_results.lock().push_back(result);
    }

    /// On-chain error reported for every confirmation.
    pub fn set_confirmation_err(&self, err: Option<String>) {
        *self.confirmation_err.lock() = err;
    }

    /// Make every confirmation expire.
    pub fn set_confirm_expires(&self, expires: bool) {
        self.confirm_expires.store(expires, Ordering::SeqCst);
    }

    pub fn insert_transaction(&self, transaction: ObservedTransaction) {
        self.transactions
            .lock()
            .insert(transaction.signature, transaction);
    }

    /// Transactions submitted so far.
    pub fn sent(&self) -> Vec<VersionedTransaction> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn simulated_count(&self) -> u32 {
        self.simulated.load(Ordering::SeqCst)
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl LedgerRpc for MockLedger {
    fn get_slot(&self) -> BoxFuture<'_, LedgerResult<u64>> {
        Box::pin(async move {
            if take_failure(&self.slot_failures) {
                return Err(LedgerError::Http("mock slot failure".to_string()));
            }
            Ok(self.slot.load(Ordering::SeqCst))
        })
    }

    fn get_block_height(&self) -> BoxFuture<'_, LedgerResult<u64>> {
        Box::pin(async move { Ok(self.slot.load(Ordering::SeqCst)) })
    }

    fn get_latest_blockhash(&self) -> BoxFuture<'_, LedgerResult<BlockhashInfo>> {
        Box::pin(async move {
            Ok(BlockhashInfo {
                blockhash: Hash::new_unique(),
                last_valid_block_height: self.slot.load(Ordering::SeqCst) + 150,
            })
        })
    }

    fn get_account(&self, address: Pubkey) -> BoxFuture<'_, LedgerResult<Option<AccountInfo>>> {
        Box::pin(async move { Ok(self.accounts.lock().get(&address).cloned()) })
    }

    fn get_balance(&self, address: Pubkey) -> BoxFuture<'_, LedgerResult<u64>> {
        Box::pin(async move {
            if take_failure(&self.balance_failures) {
                return Err(LedgerError::Http("mock balance failure".to_string()));
            }
            Ok(self.balances.lock().get(&address).copied().unwrap_or(0))
        })
    }

    fn get_minimum_balance_for_rent_exemption(
        &self,
        _data_len: usize,
    ) -> BoxFuture<'_, LedgerResult<u64>> {
        Box::pin(async move { Ok(self.rent_minimum.load(Ordering::SeqCst)) })
    }

    fn get_recent_prioritization_fees(
        &self,
        _accounts: Vec<Pubkey>,
    ) -> BoxFuture<'_, LedgerResult<Vec<u64>>> {
        Box::pin(async move { Ok(self.priority_fees.lock().clone()) })
    }

    fn simulate_transaction<'a>(
        &'a self,
        _transaction: &'a VersionedTransaction,
    ) -> BoxFuture<'a, LedgerResult<Simulation>> {
        Box::pin(async move {
            self.simulated.fetch_add(1, Ordering::SeqCst);
            Ok(self.simulation.lock().clone())
        })
    }

    fn send_transaction<'a>(
        &'a self,
        transaction: &'a VersionedTransaction,
    ) -> BoxFuture<'a, LedgerResult<Signature>> {
        Box::pin(async move {
            let result = self
                .send_results
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(Signature::new_unique()));
            if result.is_ok() {
                self.sent.lock().push(transaction.clone());
            }
            result
        })
    }

    fn confirm_transaction(
        &self,
        signature: Signature,
        _last_valid_block_height: u64,
    ) -> BoxFuture<'_, LedgerResult<Confirmation>> {
        Box::pin(async move {
            if self.confirm_expires.load(Ordering::SeqCst) {
                return Err(LedgerError::Expired(signature));
            }
            Ok(Confirmation {
                slot: self.slot.load(Ordering::SeqCst),
                err: self.confirmation_err.lock().clone(),
            })
        })
    }

    fn get_transaction(
        &self,
        signature: Signature,
    ) -> BoxFuture<'_, LedgerResult<Option<ObservedTransaction>>> {
        Box::pin(async move { Ok(self.transactions.lock().get(&signature).cloned()) })
    }
}

/// Mock transaction feed driven by [`MockTransactionFeed::push`].
#[derive(Debug, Default)]
pub struct MockTransactionFeed {
    sender: Mutex<Option<mpsc::Sender<ObservedTransaction>>>,
    fail_subscribe: AtomicBool,
    subscribed_names: Mutex<Vec<String>>,
}

impl MockTransactionFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `subscribe` fail.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Deliver a transaction to the subscriber. Returns false when nobody
    /// is subscribed.
    pub fn push(&self, transaction: ObservedTransaction) -> bool {
        self.sender
            .lock()
            .as_ref()
            .is_some_and(|sender| sender.try_send(transaction).is_ok())
    }

    /// Instruction names passed to the last `subscribe`.
    pub fn subscribed_names(&self) -> Vec<String> {
        self.subscribed_names.lock().clone()
    }
}

impl TransactionFeed for MockTransactionFeed {
    fn subscribe(
        &self,
        instruction_names: Vec<String>,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, LedgerResult<mpsc::Receiver<ObservedTransaction>>> {
        Box::pin(async move {
            if self.fail_subscribe.load(Ordering::SeqCst) {
                return Err(LedgerError::Subscription("mock subscribe failure".to_string()));
            }
            let (tx, rx) = mpsc::channel(64);
            *self.sender.lock() = Some(tx);
            *self.subscribed_names.lock() = instruction_names;
            Ok(rx)
        })
    }
}
