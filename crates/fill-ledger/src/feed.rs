//! Confirmed-transaction feed.
//!
//! [`LogsTransactionFeed`] keeps a `logsSubscribe` websocket subscription on
//! the program, reconnecting with exponential backoff. Notifications are
//! pre-filtered on Anchor `Instruction: <Name>` log markers before the full
//! transaction is fetched over RPC.

use std::sync::Arc;
use std::time::Duration;

use fill_core::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::heartbeat::Heartbeat;
use crate::retry::RetryPolicy;
use crate::rpc::{LedgerRpc, ObservedTransaction};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long to wait for the subscription acknowledgement.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

const SUBSCRIBE_REQUEST_ID: u64 = 1;

/// Stream of confirmed transactions touching the program.
pub trait TransactionFeed: Send + Sync {
    /// Open the subscription.
    ///
    /// Resolves once the first subscription is acknowledged; an error here
    /// means the feed could not be established at all. Afterwards the feed
    /// reconnects on its own until `cancel` fires. Only successful
    /// transactions whose logs mark one of `instruction_names` are delivered.
    fn subscribe(
        &self,
        instruction_names: Vec<String>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, LedgerResult<mpsc::Receiver<ObservedTransaction>>>;
}

/// Feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub ws_url: String,
    pub program_id: Pubkey,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub channel_capacity: usize,
    /// Retry policy for fetching a notified transaction.
    pub fetch_retry: RetryPolicy,
}

impl FeedConfig {
    #[must_use]
    pub fn new(ws_url: impl Into<String>, program_id: Pubkey) -> Self {
        Self {
            ws_url: ws_url.into(),
            program_id,
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 60_000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
            channel_capacity: 1024,
            fetch_retry: RetryPolicy::default(),
        }
    }

    fn reconnect_delay(&self, attempt: u32) -> Duration {
        let policy = RetryPolicy::new(
            0,
            Duration::from_millis(self.reconnect_base_delay_ms),
            Duration::from_millis(self.reconnect_max_delay_ms),
        );
        let jitter = rand::rng().random_range(0..=1000u64);
        policy.delay_for(attempt) + Duration::from_millis(jitter)
    }
}

/// `logsSubscribe` based feed.
pub struct LogsTransactionFeed {
    config: FeedConfig,
    ledger: Arc<dyn LedgerRpc>,
}

impl LogsTransactionFeed {
    pub fn new(config: FeedConfig, ledger: Arc<dyn LedgerRpc>) -> Self {
        Self { config, ledger }
    }

    async fn open(
        &self,
        instruction_names: Vec<String>,
        cancel: CancellationToken,
    ) -> LedgerResult<mpsc::Receiver<ObservedTransaction>> {
        let stream = connect_and_subscribe(&self.config).await?;
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);

        let worker = FeedWorker {
            heartbeat: Heartbeat::new(
                Duration::from_millis(self.config.heartbeat_interval_ms),
                Duration::from_millis(self.config.heartbeat_timeout_ms),
            ),
            config: self.config.clone(),
            ledger: self.ledger.clone(),
            instruction_names,
            tx,
            cancel,
        };
        tokio::spawn(worker.run(stream));

        Ok(rx)
    }
}

impl TransactionFeed for LogsTransactionFeed {
    fn subscribe(
        &self,
        instruction_names: Vec<String>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, LedgerResult<mpsc::Receiver<ObservedTransaction>>> {
        Box::pin(self.open(instruction_names, cancel))
    }
}

async fn connect_and_subscribe(config: &FeedConfig) -> LedgerResult<WsStream> {
    info!(url = %config.ws_url, program = %config.program_id, "Connecting transaction feed");
    let (mut stream, _response) = connect_async(config.ws_url.as_str()).await?;

    let request = json!({
        "jsonrpc": "2.0",
        "id": SUBSCRIBE_REQUEST_ID,
        "method": "logsSubscribe",
        "params": [
            { "mentions": [config.program_id.to_string()] },
            { "commitment": "confirmed" }
        ]
    });
    stream.send(Message::Text(request.to_string())).await?;

    let ack = tokio::time::timeout(SUBSCRIBE_TIMEOUT, async {
        while let Some(message) = stream.next().await {
            match message? {
                Message::Text(text) => {
                    let value: Value = serde_json::from_str(&text)?;
                    if value.get("id").and_then(Value::as_u64) != Some(SUBSCRIBE_REQUEST_ID) {
                        continue;
                    }
                    if let Some(error) = value.get("error") {
                        return Err(LedgerError::Subscription(error.to_string()));
                    }
                    return value
                        .get("result")
                        .and_then(Value::as_u64)
                        .ok_or_else(|| LedgerError::Subscription(format!("Unexpected ack: {text}")));
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Err(LedgerError::ConnectionClosed {
            code: 1006,
            reason: "Stream ended before subscription ack".to_string(),
        })
    })
    .await
    .map_err(|_| LedgerError::Subscription("Timed out waiting for subscription ack".to_string()))??;

    info!(subscription = ack, "Transaction feed subscribed");
    Ok(stream)
}

/// Whether program logs mark one of the watched Anchor instructions.
#[must_use]
pub fn logs_mention_instruction(logs: &[String], instruction_names: &[String]) -> bool {
    logs.iter().any(|line| {
        line.strip_prefix("Program log: Instruction: ")
            .is_some_and(|name| instruction_names.iter().any(|watched| watched == name))
    })
}

/// A `logsNotification` that passed the pre-filter.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogsNotification {
    signature: Signature,
    failed: bool,
    logs: Vec<String>,
}

fn parse_logs_notification(value: &Value) -> Option<LogsNotification> {
    if value.get("method").and_then(Value::as_str) != Some("logsNotification") {
        return None;
    }
    let inner = value.pointer("/params/result/value")?;
    let signature = inner.get("signature")?.as_str()?.parse::<Signature>().ok()?;
    let failed = inner.get("err").is_some_and(|err| !err.is_null());
    let logs = inner
        .get("logs")
        .and_then(Value::as_array)
        .map(|logs| {
            logs.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(LogsNotification {
        signature,
        failed,
        logs,
    })
}

struct FeedWorker {
    config: FeedConfig,
    ledger: Arc<dyn LedgerRpc>,
    instruction_names: Vec<String>,
    heartbeat: Heartbeat,
    tx: mpsc::Sender<ObservedTransaction>,
    cancel: CancellationToken,
}

impl FeedWorker {
    async fn run(self, initial: WsStream) {
        let mut pending = Some(initial);
        let mut attempt = 0u32;

        loop {
            if self.cancel.is_cancelled() || self.tx.is_closed() {
                info!("Transaction feed stopped");
                return;
            }

            let connected = match pending.take() {
                Some(stream) => Ok(stream),
                None => connect_and_subscribe(&self.config).await,
            };

            match connected {
                Ok(stream) => {
                    attempt = 0;
                    match self.pump(stream).await {
                        Ok(()) => info!("Transaction feed connection closed"),
                        Err(e) => error!(error = %e, "Transaction feed connection error"),
                    }
                }
                Err(e) => error!(error = %e, "Transaction feed reconnect failed"),
            }

            if self.cancel.is_cancelled() {
                info!("Transaction feed stopped");
                return;
            }

            attempt += 1;
            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(attempt, "Transaction feed max reconnection attempts reached");
                return;
            }

            let delay = self.config.reconnect_delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting transaction feed");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.cancel.cancelled() => {
                    info!("Transaction feed stopped during backoff");
                    return;
                }
            }
        }
    }

    async fn pump(&self, stream: WsStream) -> LedgerResult<()> {
        let (mut write, mut read) = stream.split();
        self.heartbeat.reset();

        let mut check = tokio::time::interval(self.heartbeat.check_period());
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        check.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(error = %e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(());
                }

                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            self.heartbeat.record_message();
                            self.handle_text(&text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_message();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => self.heartbeat.record_pong(),
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            return Err(LedgerError::ConnectionClosed { code, reason });
                        }
                        Some(Ok(_)) => self.heartbeat.record_message(),
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                    }
                }

                _ = check.tick() => {
                    if self.heartbeat.is_timed_out() {
                        return Err(LedgerError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_ping() {
                        write.send(Message::Ping(Vec::new())).await?;
                        self.heartbeat.record_ping();
                        debug!("Sent feed ping");
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Unparseable feed message");
                return;
            }
        };

        let Some(notification) = parse_logs_notification(&value) else {
            return;
        };
        if notification.failed {
            debug!(signature = %notification.signature, "Skipping failed transaction");
            return;
        }
        if !logs_mention_instruction(&notification.logs, &self.instruction_names) {
            return;
        }

        debug!(signature = %notification.signature, "Watched instruction observed");
        let ledger = self.ledger.clone();
        let tx = self.tx.clone();
        let retry = self.config.fetch_retry;
        let signature = notification.signature;

        tokio::spawn(async move {
            let fetched = retry
                .run("get_transaction", || {
                    let ledger = ledger.clone();
                    async move {
                        ledger.get_transaction(signature).await?.ok_or_else(|| {
                            LedgerError::Decode(format!(
                                "transaction {signature} not yet available"
                            ))
                        })
                    }
                })
                .await;

            match fetched {
                Ok(observed) if observed.failed => {
                    debug!(%signature, "Fetched transaction failed on-chain, skipping");
                }
                Ok(observed) => {
                    if tx.send(observed).await.is_err() {
                        debug!(%signature, "Feed receiver dropped");
                    }
                }
                Err(e) => error!(%signature, error = %e, "Failed to fetch observed transaction"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| (*name).to_string()).collect()
    }

    #[test]
    fn test_logs_mention_instruction() {
        let watched = names(&["InitiateWithdraw", "InitiateSpendLimits"]);
        let logs = names(&[
            "Program Vault111 invoke [1]",
            "Program log: Instruction: InitiateWithdraw",
            "Program Vault111 success",
        ]);
        assert!(logs_mention_instruction(&logs, &watched));

        let other = names(&["Program log: Instruction: Deposit"]);
        assert!(!logs_mention_instruction(&other, &watched));

        let prefix_only = names(&["Program log: Instruction: InitiateWithdrawal"]);
        assert!(!logs_mention_instruction(&prefix_only, &watched));
    }

    #[test]
    fn test_parse_logs_notification() {
        let signature = Signature::default();
        let value = json!({
            "jsonrpc": "2.0",
            "method": "logsNotification",
            "params": {
                "result": {
                    "context": { "slot": 5 },
                    "value": {
                        "signature": signature.to_string(),
                        "err": null,
                        "logs": ["Program log: Instruction: InitiateWithdraw"]
                    }
                },
                "subscription": 3
            }
        });

        let notification = parse_logs_notification(&value).unwrap();
        assert_eq!(notification.signature, signature);
        assert!(!notification.failed);
        assert_eq!(notification.logs.len(), 1);
    }

    #[test]
    fn test_parse_failed_notification() {
        let value = json!({
            "method": "logsNotification",
            "params": { "result": { "value": {
                "signature": Signature::default().to_string(),
                "err": { "InstructionError": [0, { "Custom": 1 }] },
                "logs": []
            }}}
        });

        assert!(parse_logs_notification(&value).unwrap().failed);
    }

    #[test]
    fn test_non_notification_ignored() {
        assert!(parse_logs_notification(&json!({ "id": 1, "result": 7 })).is_none());
    }

    #[test]
    fn test_reconnect_delay_bounds() {
        let config = FeedConfig::new("ws://localhost:8900", Pubkey::new_unique());
        let first = config.reconnect_delay(1);
        assert!(first >= Duration::from_millis(1000));
        assert!(first <= Duration::from_millis(2000));

        let capped = config.reconnect_delay(30);
        assert!(capped <= Duration::from_millis(61_000));
    }
}
