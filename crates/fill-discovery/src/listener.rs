//! Real-time order discovery from confirmed transactions.
//!
//! Watched instructions are Anchor instructions identified by their 8-byte
//! discriminator. The created order account sits at a fixed position in the
//! instruction's account list.

use std::sync::Arc;

use fill_core::{OrderKind, OrderSink, ProtocolClient, SubmitResult};
use fill_ledger::{ObservedInstruction, ObservedTransaction, RetryPolicy, TransactionFeed};
use fill_telemetry::Metrics;
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DiscoveryError, DiscoveryResult};

/// Position of the order account in `InitiateWithdraw` and
/// `InitiateSpendLimits`.
pub const ORDER_ACCOUNT_POSITION: usize = 2;

/// Anchor instruction discriminator: `sha256("global:<snake_name>")[..8]`.
#[must_use]
pub fn anchor_discriminator(instruction_name: &str) -> [u8; 8] {
    let preimage = format!("global:{}", to_snake_case(instruction_name));
    let hash = Sha256::digest(preimage.as_bytes());
    let mut discriminator = [0u8; 8];
    discriminator.copy_from_slice(&hash[..8]);
    discriminator
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// An instruction that creates a time-locked order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedInstruction {
    /// Instruction name as it appears in `Instruction: <Name>` logs.
    pub name: String,
    pub kind: OrderKind,
    pub order_account_position: usize,
    pub discriminator: [u8; 8],
}

impl WatchedInstruction {
    pub fn anchor(name: impl Into<String>, kind: OrderKind, order_account_position: usize) -> Self {
        let name = name.into();
        Self {
            discriminator: anchor_discriminator(&name),
            name,
            kind,
            order_account_position,
        }
    }

    /// `InitiateWithdraw` and `InitiateSpendLimits`.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::anchor("InitiateWithdraw", OrderKind::Withdraw, ORDER_ACCOUNT_POSITION),
            Self::anchor(
                "InitiateSpendLimits",
                OrderKind::SpendLimitUpdate,
                ORDER_ACCOUNT_POSITION,
            ),
        ]
    }

    #[must_use]
    pub fn matches(&self, instruction: &ObservedInstruction, program_id: &Pubkey) -> bool {
        instruction.program_id == *program_id && instruction.data.starts_with(&self.discriminator)
    }

    /// Order account of a matching instruction.
    pub fn order_account(&self, instruction: &ObservedInstruction) -> DiscoveryResult<Pubkey> {
        instruction
            .accounts
            .get(self.order_account_position)
            .copied()
            .ok_or_else(|| DiscoveryError::MissingAccount {
                instruction: self.name.clone(),
                position: self.order_account_position,
            })
    }
}

/// Order accounts created by `transaction`, one entry per watched
/// top-level instruction.
pub fn extract_order_accounts<'w>(
    transaction: &ObservedTransaction,
    program_id: &Pubkey,
    watched: &'w [WatchedInstruction],
) -> Vec<(&'w WatchedInstruction, DiscoveryResult<Pubkey>)> {
    transaction
        .instructions
        .iter()
        .filter_map(|instruction| {
            watched
                .iter()
                .find(|w| w.matches(instruction, program_id))
                .map(|w| (w, w.order_account(instruction)))
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub program_id: Pubkey,
    pub instructions: Vec<WatchedInstruction>,
    /// Retry policy for fetching the created order.
    pub parse_retry: RetryPolicy,
}

impl ListenerConfig {
    #[must_use]
    pub fn new(program_id: Pubkey) -> Self {
        Self {
            program_id,
            instructions: WatchedInstruction::defaults(),
            parse_retry: RetryPolicy::default().with_max_retries(10),
        }
    }
}

/// Forwards newly created orders to the sink as they are confirmed.
pub struct LedgerEventListener {
    feed: Arc<dyn TransactionFeed>,
    protocol: Arc<dyn ProtocolClient>,
    sink: Arc<dyn OrderSink>,
    config: ListenerConfig,
}

impl LedgerEventListener {
    pub fn new(
        feed: Arc<dyn TransactionFeed>,
        protocol: Arc<dyn ProtocolClient>,
        sink: Arc<dyn OrderSink>,
        config: ListenerConfig,
    ) -> Self {
        Self {
            feed,
            protocol,
            sink,
            config,
        }
    }

    /// Subscribe and spawn the listening loop.
    ///
    /// Fails if the subscription cannot be established.
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) -> DiscoveryResult<JoinHandle<()>> {
        let names: Vec<String> = self
            .config
            .instructions
            .iter()
            .map(|w| w.name.clone())
            .collect();
        let rx = self.feed.subscribe(names.clone(), cancel.clone()).await?;
        info!(instructions = ?names, program = %self.config.program_id, "Listening for new orders");

        Ok(tokio::spawn(self.run(rx, cancel)))
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<ObservedTransaction>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Ledger event listener stopped");
                    return;
                }
                received = rx.recv() => match received {
                    Some(transaction) => self.handle_transaction(&transaction),
                    None => {
                        error!("Transaction feed closed, listener stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Extract created orders and forward each on its own task.
    pub fn handle_transaction(self: &Arc<Self>, transaction: &ObservedTransaction) {
        let extracted = extract_order_accounts(
            transaction,
            &self.config.program_id,
            &self.config.instructions,
        );
        if extracted.is_empty() {
            debug!(signature = %transaction.signature, "No top-level watched instruction");
        }

        for (watched, result) in extracted {
            match result {
                Ok(account) => {
                    let listener = Arc::clone(self);
                    let name = watched.name.clone();
                    let kind = watched.kind;
                    tokio::spawn(async move {
                        listener.forward(&name, kind, account).await;
                    });
                }
                Err(e) => {
                    Metrics::listener_event(&watched.name, "extract_failed");
                    error!(
                        signature = %transaction.signature,
                        error = %e,
                        "Error finding order account"
                    );
                }
            }
        }
    }

    /// Fetch the created order and submit it. `None` when the order is
    /// already gone or could not be fetched.
    pub async fn forward(&self, instruction: &str, kind: OrderKind, account: Pubkey) -> Option<SubmitResult> {
        let protocol = &self.protocol;
        let parsed = self
            .config
            .parse_retry
            .run("parse_order", || async move {
                match protocol.parse_order(kind, account).await {
                    Ok(order) => Ok(Some(order)),
                    Err(e) if e.is_not_found() => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await;

        match parsed {
            Ok(Some(order)) => {
                Metrics::listener_event(instruction, "forwarded");
                let result = self.sink.submit(order);
                debug!(order = %account, ?result, "Forwarded new order");
                Some(result)
            }
            Ok(None) => {
                Metrics::listener_event(instruction, "gone");
                debug!(order = %account, "Order already gone");
                None
            }
            Err(e) => {
                Metrics::listener_event(instruction, "parse_failed");
                warn!(order = %account, error = %e, "Error processing order instruction");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingSink;
    use fill_core::{AssetIndex, MockProtocol, Order, OrderKey, TimeLock};
    use fill_ledger::MockTransactionFeed;
    use solana_sdk::signature::Signature;
    use std::time::Duration;

    fn program_id() -> Pubkey {
        Pubkey::new_from_array([42; 32])
    }

    fn instruction(name: &str, accounts: Vec<Pubkey>) -> ObservedInstruction {
        let mut data = anchor_discriminator(name).to_vec();
        data.extend_from_slice(&[0, 1, 2]);
        ObservedInstruction {
            program_id: program_id(),
            accounts,
            data,
        }
    }

    fn transaction(instructions: Vec<ObservedInstruction>) -> ObservedTransaction {
        ObservedTransaction {
            signature: Signature::new_unique(),
            slot: 1,
            account_keys: Vec::new(),
            instructions,
            logs: Vec::new(),
            failed: false,
        }
    }

    fn withdraw_order(account: Pubkey) -> Order {
        Order::withdraw(
            account,
            TimeLock {
                owner: Pubkey::new_unique(),
                is_owner_payer: false,
                release_slot: 100,
            },
            100,
            AssetIndex(0),
            false,
            Pubkey::new_unique(),
        )
    }

    fn listener(
        feed: Arc<MockTransactionFeed>,
        protocol: Arc<MockProtocol>,
        sink: Arc<RecordingSink>,
    ) -> Arc<LedgerEventListener> {
        let mut config = ListenerConfig::new(program_id());
        config.parse_retry = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(1));
        Arc::new(LedgerEventListener::new(feed, protocol, sink, config))
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn test_anchor_discriminators() {
        assert_eq!(
            anchor_discriminator("InitiateWithdraw"),
            [156, 172, 140, 245, 182, 250, 239, 160]
        );
        assert_eq!(
            anchor_discriminator("InitiateSpendLimits"),
            [170, 196, 24, 105, 5, 194, 250, 90]
        );
    }

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("InitiateSpendLimits"), "initiate_spend_limits");
        assert_eq!(to_snake_case("initiate"), "initiate");
    }

    #[test]
    fn test_extract_order_account_at_position() {
        let order = Pubkey::new_unique();
        let tx = transaction(vec![instruction(
            "InitiateWithdraw",
            vec![Pubkey::new_unique(), Pubkey::new_unique(), order],
        )]);
        let watched = WatchedInstruction::defaults();

        let extracted = extract_order_accounts(&tx, &program_id(), &watched);
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].0.kind, OrderKind::Withdraw);
        assert_eq!(extracted[0].1.as_ref().unwrap(), &order);
    }

    #[test]
    fn test_extract_short_account_list_fails() {
        let tx = transaction(vec![instruction(
            "InitiateSpendLimits",
            vec![Pubkey::new_unique()],
        )]);
        let watched = WatchedInstruction::defaults();

        let extracted = extract_order_accounts(&tx, &program_id(), &watched);
        assert!(matches!(
            extracted[0].1,
            Err(DiscoveryError::MissingAccount { position: 2, .. })
        ));
    }

    #[test]
    fn test_extract_ignores_other_programs_and_instructions() {
        let mut foreign = instruction("InitiateWithdraw", vec![Pubkey::new_unique(); 3]);
        foreign.program_id = Pubkey::new_unique();
        let other = instruction("Deposit", vec![Pubkey::new_unique(); 3]);
        let tx = transaction(vec![foreign, other]);

        assert!(extract_order_accounts(&tx, &program_id(), &WatchedInstruction::defaults()).is_empty());
    }

    #[tokio::test]
    async fn test_start_fails_when_subscription_fails() {
        let feed = Arc::new(MockTransactionFeed::new());
        feed.set_fail_subscribe(true);
        let l = listener(
            feed,
            Arc::new(MockProtocol::new()),
            Arc::new(RecordingSink::new()),
        );

        assert!(l.start(CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_new_order_is_forwarded_to_sink() {
        let feed = Arc::new(MockTransactionFeed::new());
        let protocol = Arc::new(MockProtocol::new());
        let sink = Arc::new(RecordingSink::new());
        let account = Pubkey::new_unique();
        protocol.insert_order(withdraw_order(account));

        let cancel = CancellationToken::new();
        let l = listener(feed.clone(), protocol, sink.clone());
        let handle = l.start(cancel.clone()).await.unwrap();
        assert_eq!(
            feed.subscribed_names(),
            vec!["InitiateWithdraw".to_string(), "InitiateSpendLimits".to_string()]
        );

        assert!(feed.push(transaction(vec![instruction(
            "InitiateWithdraw",
            vec![Pubkey::new_unique(), Pubkey::new_unique(), account],
        )])));

        wait_until(|| !sink.submitted().is_empty()).await;
        assert_eq!(sink.submitted()[0].key, OrderKey::Account(account));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_gone_order_is_ignored_without_retry() {
        let protocol = Arc::new(MockProtocol::new());
        let sink = Arc::new(RecordingSink::new());
        let l = listener(
            Arc::new(MockTransactionFeed::new()),
            protocol.clone(),
            sink.clone(),
        );

        let result = l
            .forward("InitiateWithdraw", OrderKind::Withdraw, Pubkey::new_unique())
            .await;

        assert!(result.is_none());
        assert_eq!(protocol.parse_calls(), 1);
        assert!(sink.submitted().is_empty());
    }
}
