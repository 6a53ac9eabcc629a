//! Order execution.
//!
//! One call to [`Executor::execute`] is one attempt at filling an order:
//!
//! 1. Time-locked orders are checked against the indexer; a confirmed
//!    absence resolves as `Gone`.
//! 2. Kind-specific pre-conditions decide the fill plan or skip.
//! 3. The build/submit/confirm cycle runs under its own retry policy.
//! 4. Confirmed failures are classified from program logs.
//!
//! Errors returned here are transient; every [`FillOutcome`] is final for
//! the attempt.

use std::sync::Arc;

use fill_core::{
    AssetIndex, FillInstructions, FillOutcome, Order, OrderKind, OrderPayload, ProtocolClient,
    SkipReason,
};
use fill_discovery::OrderIndex;
use fill_ledger::{LedgerError, LedgerRpc, RetryPolicy};
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use tracing::{debug, error, info, warn};

use crate::balance::BalanceMonitor;
use crate::classify::{classify_failure, FailureClass};
use crate::error::{FillError, FillResult};
use crate::transaction::{BuildOutcome, TransactionBuilder, TransactionConfig};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Minimum share of a withdrawal the vault must currently allow.
    pub safety_ratio: Decimal,
    pub transaction: TransactionConfig,
    /// Retry policy for the build/submit/confirm cycle.
    pub cycle_retry: RetryPolicy,
    pub send_retry: RetryPolicy,
    pub confirm_retry: RetryPolicy,
    /// Retry policy for pre-condition and log queries.
    pub query_retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            safety_ratio: Decimal::new(85, 2),
            transaction: TransactionConfig::default(),
            cycle_retry: RetryPolicy::default(),
            send_retry: RetryPolicy::once(),
            confirm_retry: RetryPolicy::default().with_max_retries(1),
            query_retry: RetryPolicy::default(),
        }
    }
}

/// What a fill transaction consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillTarget {
    Withdraw { account: Pubkey, amount: u64 },
    SpendLimitUpdate { account: Pubkey },
    DepositCredit { owner: Pubkey, asset: AssetIndex },
}

impl FillTarget {
    /// Order account the fill consumes, if any.
    fn order_account(&self) -> Option<Pubkey> {
        match self {
            FillTarget::Withdraw { account, .. } | FillTarget::SpendLimitUpdate { account } => {
                Some(*account)
            }
            FillTarget::DepositCredit { .. } => None,
        }
    }
}

/// Result of the pre-conditions for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillPlan {
    Fill(FillTarget),
    Skip(SkipReason),
}

/// Whether `fillable` covers `amount * ratio`.
#[must_use]
pub fn covers_safety_ratio(fillable: u64, amount: u64, ratio: Decimal) -> bool {
    Decimal::from(fillable) >= Decimal::from(amount) * ratio
}

pub struct Executor {
    protocol: Arc<dyn ProtocolClient>,
    ledger: Arc<dyn LedgerRpc>,
    index: Arc<dyn OrderIndex>,
    operator: Arc<Keypair>,
    builder: TransactionBuilder,
    balance: Arc<BalanceMonitor>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        protocol: Arc<dyn ProtocolClient>,
        ledger: Arc<dyn LedgerRpc>,
        index: Arc<dyn OrderIndex>,
        operator: Arc<Keypair>,
        balance: Arc<BalanceMonitor>,
        config: ExecutorConfig,
    ) -> Self {
        let builder = TransactionBuilder::new(ledger.clone(), config.transaction.clone());
        Self {
            protocol,
            ledger,
            index,
            operator,
            builder,
            balance,
            config,
        }
    }

    pub fn operator(&self) -> Pubkey {
        self.operator.pubkey()
    }

    /// Run one fill attempt for `order`.
    pub async fn execute(&self, order: &Order) -> FillResult<FillOutcome> {
        if order.kind().is_time_locked() {
            if let Some(account) = order.key.account() {
                if !self.index_reports_open(order.kind(), account).await {
                    return Ok(FillOutcome::Gone);
                }
            }
        }

        let target = match self.plan(order).await? {
            FillPlan::Fill(target) => target,
            FillPlan::Skip(reason) => return Ok(FillOutcome::Skipped(reason)),
        };

        let target = &target;
        self.config
            .cycle_retry
            .run("fill_cycle", move || self.fill_cycle(order, target))
            .await
    }

    /// Indexer existence check. A failed check counts as present.
    async fn index_reports_open(&self, kind: OrderKind, account: Pubkey) -> bool {
        match self.index.order_exists(kind, account).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(order = %account, error = %e, "Indexer existence check failed, assuming open");
                true
            }
        }
    }

    /// Pre-conditions per order kind.
    async fn plan(&self, order: &Order) -> FillResult<FillPlan> {
        match &order.payload {
            OrderPayload::Withdraw {
                amount_base_units,
                asset,
                reduce_only,
                destination,
            } => {
                let account = time_locked_account(order)?;
                self.plan_withdraw(
                    account,
                    order.owner,
                    *amount_base_units,
                    *asset,
                    *reduce_only,
                    *destination,
                )
                .await
            }
            OrderPayload::SpendLimitUpdate { .. } => {
                Ok(FillPlan::Fill(FillTarget::SpendLimitUpdate {
                    account: time_locked_account(order)?,
                }))
            }
            OrderPayload::DepositCredit { asset, .. } => {
                Ok(FillPlan::Fill(FillTarget::DepositCredit {
                    owner: order.owner,
                    asset: *asset,
                }))
            }
        }
    }

    async fn plan_withdraw(
        &self,
        account: Pubkey,
        owner: Pubkey,
        amount: u64,
        asset: AssetIndex,
        reduce_only: bool,
        destination: Pubkey,
    ) -> FillResult<FillPlan> {
        let retry = &self.config.query_retry;
        let protocol = &self.protocol;
        let ledger = &self.ledger;

        let token_account = retry
            .run("destination_token_account", move || {
                protocol.destination_token_account(destination, asset)
            })
            .await?;

        match token_account {
            Some(token_account) => {
                let existing = retry
                    .run("get_account", move || ledger.get_account(token_account))
                    .await?;
                if existing.is_none() {
                    debug!(order = %account, %destination, %token_account, "Destination token account missing");
                    return Ok(FillPlan::Skip(SkipReason::MissingDestinationAccount));
                }
            }
            None => {
                let balance = retry
                    .run("get_balance", move || ledger.get_balance(destination))
                    .await?;
                let minimum = retry
                    .run("get_minimum_balance_for_rent_exemption", move || {
                        ledger.get_minimum_balance_for_rent_exemption(0)
                    })
                    .await?;
                if balance.saturating_add(amount) < minimum {
                    debug!(order = %account, %destination, balance, amount, minimum, "Destination below rent-exempt minimum");
                    return Ok(FillPlan::Skip(SkipReason::RentShortfall {
                        balance,
                        amount,
                        minimum,
                    }));
                }
            }
        }

        let fillable = retry
            .run("withdrawal_limit", move || {
                protocol.withdrawal_limit(owner, asset, reduce_only)
            })
            .await?;
        if !covers_safety_ratio(fillable, amount, self.config.safety_ratio) {
            debug!(order = %account, fillable, requested = amount, "Withdrawal limit below safety ratio");
            return Ok(FillPlan::Skip(SkipReason::InsufficientFillable {
                fillable,
                requested: amount,
            }));
        }

        Ok(FillPlan::Fill(FillTarget::Withdraw {
            account,
            amount: fillable.min(amount),
        }))
    }

    /// Build, submit and confirm one fill transaction.
    async fn fill_cycle(&self, order: &Order, target: &FillTarget) -> FillResult<FillOutcome> {
        if let Some(account) = target.order_account() {
            if self.ledger.get_account(account).await?.is_none() {
                debug!(order = %account, "Order account closed before fill");
                return Ok(FillOutcome::Gone);
            }
        }

        let instructions = match self.fill_instructions(target).await {
            Ok(instructions) => instructions,
            Err(FillError::Protocol(e)) if e.is_not_found() => return Ok(FillOutcome::Gone),
            Err(e) => return Err(e),
        };

        let prepared = match self.builder.build(&self.operator, &instructions).await? {
            BuildOutcome::Ready(prepared) => prepared,
            BuildOutcome::Skipped(reason) => return Ok(FillOutcome::Skipped(reason)),
        };

        let ledger = &self.ledger;
        let transaction = &prepared.transaction;
        let signature = match self
            .config
            .send_retry
            .run("send_transaction", move || ledger.send_transaction(transaction))
            .await
        {
            Ok(signature) => signature,
            Err(e) => {
                let message = e.to_string();
                let preflight = matches!(e, LedgerError::PreflightFailed { .. });
                if !preflight && classify_failure(&message, e.logs()) == FailureClass::Unclassified {
                    return Err(e.into());
                }
                let logs = e.logs().to_vec();
                return self.resolve_failure(order, None, message, logs);
            }
        };
        debug!(order = %order.key, %signature, "Fill transaction sent");

        let last_valid_block_height = prepared.last_valid_block_height;
        let confirmation = self
            .config
            .confirm_retry
            .run("confirm_transaction", move || {
                ledger.confirm_transaction(signature, last_valid_block_height)
            })
            .await?;

        self.balance.check().await;

        match confirmation.err {
            None => Ok(FillOutcome::Executed { signature }),
            Some(err) => {
                let logs = self.transaction_logs(signature).await;
                self.resolve_failure(order, Some(signature), err, logs)
            }
        }
    }

    /// Fill instructions for the target.
    async fn fill_instructions(&self, target: &FillTarget) -> FillResult<FillInstructions> {
        let filler = self.operator.pubkey();
        let instructions = match *target {
            FillTarget::Withdraw { account, amount } => {
                self.protocol
                    .build_withdraw_fill(account, filler, Some(amount))
                    .await?
            }
            FillTarget::SpendLimitUpdate { account } => {
                self.protocol.build_spend_limit_fill(account, filler).await?
            }
            FillTarget::DepositCredit { owner, asset } => {
                self.protocol.build_deposit_fill(owner, asset, filler).await?
            }
        };
        Ok(instructions)
    }

    /// Logs of a confirmed transaction; empty when unavailable.
    async fn transaction_logs(&self, signature: Signature) -> Vec<String> {
        let ledger = &self.ledger;
        match self
            .config
            .query_retry
            .run("get_transaction", move || ledger.get_transaction(signature))
            .await
        {
            Ok(Some(transaction)) => transaction.logs,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(%signature, error = %e, "Failed to fetch transaction logs");
                Vec::new()
            }
        }
    }

    fn resolve_failure(
        &self,
        order: &Order,
        signature: Option<Signature>,
        message: String,
        logs: Vec<String>,
    ) -> FillResult<FillOutcome> {
        match classify_failure(&message, &logs) {
            FailureClass::Rejected(rejection) => Ok(FillOutcome::Rejected(rejection)),
            FailureClass::AccountMissing => {
                info!(order = %order.key, "Fill referenced a closed account");
                Ok(FillOutcome::Gone)
            }
            FailureClass::Unclassified => {
                error!(
                    order = %order.key,
                    kind = %order.kind(),
                    signature = ?signature,
                    error = %message,
                    logs = ?logs,
                    "Unclassified fill failure"
                );
                Err(FillError::Unclassified { message, logs })
            }
        }
    }
}

fn time_locked_account(order: &Order) -> FillResult<Pubkey> {
    order.key.account().ok_or_else(|| {
        FillError::Build(format!("{} order {} has no order account", order.kind(), order.key))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fill_core::{BusinessRejection, MockProtocol, TimeLock};
    use fill_discovery::MockOrderIndex;
    use fill_ledger::{AccountInfo, MockLedger, ObservedTransaction};
    use fill_telemetry::{AlertKind, RecordingAlertSink};
    use rust_decimal_macros::dec;

    struct Harness {
        protocol: Arc<MockProtocol>,
        ledger: Arc<MockLedger>,
        index: Arc<MockOrderIndex>,
        alerts: Arc<RecordingAlertSink>,
        executor: Executor,
    }

    fn harness() -> Harness {
        let protocol = Arc::new(MockProtocol::new());
        let ledger = Arc::new(MockLedger::new());
        let index = Arc::new(MockOrderIndex::new());
        let alerts = Arc::new(RecordingAlertSink::new());
        let operator = Arc::new(Keypair::new());
        ledger.set_balance(operator.pubkey(), 10_000_000_000);
        let balance = Arc::new(
            BalanceMonitor::new(ledger.clone(), alerts.clone(), operator.pubkey(), 300_000_000)
                .with_retry(RetryPolicy::once()),
        );
        let config = ExecutorConfig {
            cycle_retry: RetryPolicy::once(),
            confirm_retry: RetryPolicy::once(),
            query_retry: RetryPolicy::once(),
            ..ExecutorConfig::default()
        };
        let executor = Executor::new(
            protocol.clone(),
            ledger.clone(),
            index.clone(),
            operator,
            balance,
            config,
        );
        Harness {
            protocol,
            ledger,
            index,
            alerts,
            executor,
        }
    }

    fn account_info() -> AccountInfo {
        AccountInfo {
            lamports: 1_000_000,
            owner: Pubkey::new_unique(),
            data: vec![0; 8],
        }
    }

    /// Withdraw order registered with the protocol and present on the ledger.
    fn open_withdraw(h: &Harness, amount: u64, asset: AssetIndex) -> Order {
        let account = Pubkey::new_unique();
        let destination = Pubkey::new_unique();
        let order = Order::withdraw(
            account,
            TimeLock {
                owner: Pubkey::new_unique(),
                is_owner_payer: false,
                release_slot: 10,
            },
            amount,
            asset,
            false,
            destination,
        );
        h.protocol.insert_order(order.clone());
        h.ledger.insert_account(account, account_info());
        if !asset.is_native() {
            h.ledger.insert_account(
                MockProtocol::token_account_for(&destination, asset),
                account_info(),
            );
        }
        order
    }

    #[test]
    fn test_covers_safety_ratio() {
        assert!(!covers_safety_ratio(50, 100, dec!(0.85)));
        assert!(covers_safety_ratio(85, 100, dec!(0.85)));
        assert!(covers_safety_ratio(100, 100, dec!(0.85)));
        assert!(covers_safety_ratio(0, 0, dec!(0.85)));
    }

    #[tokio::test]
    async fn test_plan_targets_per_kind() {
        let h = harness();
        let withdraw = open_withdraw(&h, 100, AssetIndex(0));
        h.protocol.set_withdrawal_limit(withdraw.owner, 90);
        let account = withdraw.key.account().unwrap();
        assert_eq!(
            h.executor.plan(&withdraw).await.unwrap(),
            FillPlan::Fill(FillTarget::Withdraw { account, amount: 90 })
        );

        let owner = Pubkey::new_unique();
        let deposit = Order::deposit_credit(owner, AssetIndex(0), 500);
        assert_eq!(
            h.executor.plan(&deposit).await.unwrap(),
            FillPlan::Fill(FillTarget::DepositCredit {
                owner,
                asset: AssetIndex(0)
            })
        );

        h.protocol.set_withdrawal_limit(withdraw.owner, 10);
        assert!(matches!(
            h.executor.plan(&withdraw).await.unwrap(),
            FillPlan::Skip(SkipReason::InsufficientFillable { .. })
        ));
        assert!(h.protocol.built().is_empty());
    }

    #[tokio::test]
    async fn test_withdraw_executes_with_full_amount() {
        let h = harness();
        let order = open_withdraw(&h, 100, AssetIndex(0));

        let outcome = h.executor.execute(&order).await.unwrap();
        assert!(matches!(outcome, FillOutcome::Executed { .. }));
        assert_eq!(h.ledger.sent_count(), 1);
        assert_eq!(h.protocol.built()[0].amount, Some(100));
    }

    #[tokio::test]
    async fn test_withdraw_scaled_to_fillable() {
        let h = harness();
        let order = open_withdraw(&h, 100, AssetIndex(0));
        h.protocol.set_withdrawal_limit(order.owner, 90);

        let outcome = h.executor.execute(&order).await.unwrap();
        assert!(matches!(outcome, FillOutcome::Executed { .. }));
        assert_eq!(h.protocol.built()[0].amount, Some(90));
    }

    #[tokio::test]
    async fn test_insufficient_fillable_skips_without_sending() {
        let h = harness();
        let order = open_withdraw(&h, 100, AssetIndex(0));
        h.protocol.set_withdrawal_limit(order.owner, 50);

        let outcome = h.executor.execute(&order).await.unwrap();
        assert_eq!(
            outcome,
            FillOutcome::Skipped(SkipReason::InsufficientFillable {
                fillable: 50,
                requested: 100
            })
        );
        assert_eq!(h.ledger.sent_count(), 0);
        assert!(h.protocol.built().is_empty());
    }

    #[tokio::test]
    async fn test_missing_destination_token_account_skips() {
        let h = harness();
        let account = Pubkey::new_unique();
        let order = Order::withdraw(
            account,
            TimeLock {
                owner: Pubkey::new_unique(),
                is_owner_payer: true,
                release_slot: 10,
            },
            100,
            AssetIndex(0),
            false,
            Pubkey::new_unique(),
        );
        h.protocol.insert_order(order.clone());
        h.ledger.insert_account(account, account_info());

        let outcome = h.executor.execute(&order).await.unwrap();
        assert_eq!(
            outcome,
            FillOutcome::Skipped(SkipReason::MissingDestinationAccount)
        );
    }

    #[tokio::test]
    async fn test_native_rent_shortfall_skips() {
        let h = harness();
        let order = open_withdraw(&h, 1_000, AssetIndex::NATIVE);

        let outcome = h.executor.execute(&order).await.unwrap();
        assert_eq!(
            outcome,
            FillOutcome::Skipped(SkipReason::RentShortfall {
                balance: 0,
                amount: 1_000,
                minimum: 890_880
            })
        );
    }

    #[tokio::test]
    async fn test_native_withdraw_covering_rent_executes() {
        let h = harness();
        let order = open_withdraw(&h, 1_000_000, AssetIndex::NATIVE);

        let outcome = h.executor.execute(&order).await.unwrap();
        assert!(matches!(outcome, FillOutcome::Executed { .. }));
    }

    #[tokio::test]
    async fn test_index_absence_is_gone() {
        let h = harness();
        let order = open_withdraw(&h, 100, AssetIndex(0));
        h.index.set_exists(order.key.account().unwrap(), false);

        assert_eq!(h.executor.execute(&order).await.unwrap(), FillOutcome::Gone);
        assert_eq!(h.ledger.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_index_failure_assumes_present() {
        let h = harness();
        let order = open_withdraw(&h, 100, AssetIndex(0));
        h.index.set_fail_exists(true);

        let outcome = h.executor.execute(&order).await.unwrap();
        assert!(matches!(outcome, FillOutcome::Executed { .. }));
    }

    #[tokio::test]
    async fn test_closed_order_account_is_gone() {
        let h = harness();
        let account = Pubkey::new_unique();
        let order = Order::spend_limit(
            account,
            TimeLock {
                owner: Pubkey::new_unique(),
                is_owner_payer: false,
                release_slot: 10,
            },
            1,
            2,
            3,
            4,
        );

        assert_eq!(h.executor.execute(&order).await.unwrap(), FillOutcome::Gone);
        assert!(h.protocol.built().is_empty());
    }

    #[tokio::test]
    async fn test_preflight_business_rejection() {
        let h = harness();
        let order = open_withdraw(&h, 100, AssetIndex(0));
        h.ledger.push_send_result(Err(LedgerError::PreflightFailed {
            message: "Transaction simulation failed".to_string(),
            logs: vec![
                "Program log: AnchorError occurred. Error Code: InsufficientDeposit. Error Number: 6002. Error Message: Insufficient deposit."
                    .to_string(),
            ],
        }));

        let outcome = h.executor.execute(&order).await.unwrap();
        assert_eq!(
            outcome,
            FillOutcome::Rejected(BusinessRejection::InsufficientDeposit)
        );
        assert!(h.alerts.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_unclassified_preflight_is_error() {
        let h = harness();
        let order = open_withdraw(&h, 100, AssetIndex(0));
        h.ledger.push_send_result(Err(LedgerError::PreflightFailed {
            message: "Transaction simulation failed".to_string(),
            logs: vec!["Program log: something else".to_string()],
        }));

        let err = h.executor.execute(&order).await.unwrap_err();
        assert!(matches!(err, FillError::Unclassified { .. }));
    }

    #[tokio::test]
    async fn test_onchain_failure_classified_from_transaction_logs() {
        let h = harness();
        let order = open_withdraw(&h, 100, AssetIndex(0));
        let signature = Signature::new_unique();
        h.ledger.push_send_result(Ok(signature));
        h.ledger.set_confirmation_err(Some("InstructionError(2, Custom(6128))".to_string()));
        h.ledger.insert_transaction(ObservedTransaction {
            signature,
            slot: 1,
            account_keys: Vec::new(),
            instructions: Vec::new(),
            logs: vec![
                "Program log: AnchorError occurred. Error Code: DailyWithdrawLimit. Error Number: 6128."
                    .to_string(),
            ],
            failed: true,
        });

        let outcome = h.executor.execute(&order).await.unwrap();
        assert_eq!(
            outcome,
            FillOutcome::Rejected(BusinessRejection::DailyWithdrawLimit)
        );
    }

    #[tokio::test]
    async fn test_deposit_credit_builds_for_owner() {
        let h = harness();
        let owner = Pubkey::new_unique();
        let order = Order::deposit_credit(owner, AssetIndex(0), 500);

        let outcome = h.executor.execute(&order).await.unwrap();
        assert!(matches!(outcome, FillOutcome::Executed { .. }));
        assert_eq!(h.protocol.built()[0].kind, OrderKind::DepositCredit);
    }

    #[tokio::test]
    async fn test_low_balance_after_fill_alerts_once() {
        let h = harness();
        let order = open_withdraw(&h, 100, AssetIndex(0));
        h.ledger.set_balance(h.executor.operator(), 1_000);

        let outcome = h.executor.execute(&order).await.unwrap();
        assert!(matches!(outcome, FillOutcome::Executed { .. }));
        assert_eq!(h.alerts.count(AlertKind::LowBalance), 1);
    }
}
