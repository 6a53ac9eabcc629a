//! Service wiring tests.
//!
//! `FillBot` runs against in-memory protocol, ledger, indexer and feed
//! doubles; orders enter through discovery or the transaction feed.

use std::sync::Arc;
use std::time::Duration;

use fill_bot::{AppConfig, AppError, Components, FillBot};
use fill_core::{AssetIndex, MockProtocol, Order, TimeLock, LAMPORTS_PER_SOL};
use fill_discovery::{anchor_discriminator, MockOrderIndex};
use fill_ledger::{
    AccountInfo, MockLedger, MockTransactionFeed, ObservedInstruction, ObservedTransaction,
};
use fill_telemetry::{AlertKind, RecordingAlertSink};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;

struct Harness {
    program_id: Pubkey,
    protocol: Arc<MockProtocol>,
    ledger: Arc<MockLedger>,
    index: Arc<MockOrderIndex>,
    feed: Arc<MockTransactionFeed>,
    alerts: Arc<RecordingAlertSink>,
    bot: FillBot,
}

fn config(program_id: Pubkey) -> AppConfig {
    AppConfig::from_toml(&format!(
        r#"
[ledger]
program_id = "{program_id}"

[scheduler]
max_jitter_ms = 0

[discovery]
interval_secs = 3600
deposit_interval_secs = 3600
"#
    ))
    .unwrap()
}

fn harness() -> Harness {
    let program_id = Pubkey::new_unique();
    let protocol = Arc::new(MockProtocol::new());
    let ledger = Arc::new(MockLedger::new());
    let index = Arc::new(MockOrderIndex::new());
    let feed = Arc::new(MockTransactionFeed::new());
    let alerts = Arc::new(RecordingAlertSink::new());
    let operator = Arc::new(Keypair::new());
    ledger.set_slot(2_000);
    ledger.set_balance(operator.pubkey(), 10 * LAMPORTS_PER_SOL);

    let components = Components {
        protocol: protocol.clone(),
        ledger: ledger.clone(),
        index: index.clone(),
        feed: feed.clone(),
        alerts: alerts.clone(),
        operator,
    };
    Harness {
        program_id,
        protocol,
        ledger,
        index,
        feed,
        alerts,
        bot: FillBot::new(config(program_id), components),
    }
}

fn account_info() -> AccountInfo {
    AccountInfo {
        lamports: 2_000_000,
        owner: Pubkey::new_unique(),
        data: vec![0; 16],
    }
}

/// Released token withdraw order, open on the ledger.
fn open_withdraw(h: &Harness) -> Order {
    let account = Pubkey::new_unique();
    let destination = Pubkey::new_unique();
    let asset = AssetIndex(0);
    let order = Order::withdraw(
        account,
        TimeLock {
            owner: Pubkey::new_unique(),
            is_owner_payer: false,
            release_slot: 1_000,
        },
        100,
        asset,
        false,
        destination,
    );
    h.protocol.insert_order(order.clone());
    h.ledger.insert_account(account, account_info());
    h.ledger
        .insert_account(MockProtocol::token_account_for(&destination, asset), account_info());
    order
}

async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_start_subscribes_to_order_instructions() {
    let mut h = harness();
    h.bot.start().await.unwrap();

    assert_eq!(
        h.feed.subscribed_names(),
        vec!["InitiateWithdraw".to_string(), "InitiateSpendLimits".to_string()]
    );
    assert!(h.bot.scheduler().is_some());
    h.bot.shutdown().await;
}

#[tokio::test]
async fn test_discovered_order_is_filled() {
    let mut h = harness();
    let order = open_withdraw(&h);
    h.index.set_orders(vec![order]);

    h.bot.start().await.unwrap();
    assert!(wait_until(|| h.ledger.sent_count() == 1).await);
    h.bot.shutdown().await;
    assert_eq!(h.ledger.sent_count(), 1);
}

#[tokio::test]
async fn test_observed_order_is_filled() {
    let mut h = harness();
    h.bot.start().await.unwrap();
    let order = open_withdraw(&h);
    let account = order.key.account().unwrap();

    let mut data = anchor_discriminator("InitiateWithdraw").to_vec();
    data.extend_from_slice(&[0; 8]);
    let pushed = h.feed.push(ObservedTransaction {
        signature: Signature::new_unique(),
        slot: 1_990,
        account_keys: Vec::new(),
        instructions: vec![ObservedInstruction {
            program_id: h.program_id,
            accounts: vec![Pubkey::new_unique(), Pubkey::new_unique(), account],
            data,
        }],
        logs: vec!["Program log: Instruction: InitiateWithdraw".to_string()],
        failed: false,
    });
    assert!(pushed);

    assert!(wait_until(|| h.ledger.sent_count() == 1).await);
    h.bot.shutdown().await;
}

#[tokio::test]
async fn test_subscription_failure_aborts_start() {
    let mut h = harness();
    h.feed.set_fail_subscribe(true);

    let err = h.bot.start().await.unwrap_err();
    assert!(matches!(err, AppError::Startup(_)));
    assert!(h.bot.scheduler().is_none());
}

#[tokio::test]
async fn test_shutdown_raises_alert() {
    let mut h = harness();
    h.bot.start().await.unwrap();
    h.bot.shutdown().await;

    assert_eq!(h.alerts.count(AlertKind::Shutdown), 1);
    assert_eq!(h.alerts.count(AlertKind::LowBalance), 0);
}

#[tokio::test]
async fn test_low_balance_at_startup_raises_alert() {
    let mut h = harness();
    h.ledger.set_balance(h.bot.operator(), LAMPORTS_PER_SOL / 10);

    h.bot.start().await.unwrap();
    assert_eq!(h.alerts.count(AlertKind::LowBalance), 1);
    h.bot.shutdown().await;
}
