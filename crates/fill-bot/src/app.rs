//! Service orchestration.
//!
//! Wires the producers to the scheduler and owns the background tasks:
//! - Ledger event listener (fatal if the subscription fails)
//! - Periodic open-order discovery
//! - Periodic deposit credit scan
//! - Daily heartbeat log and settled-entry pruning

use std::sync::Arc;
use std::time::Duration;

use fill_core::{lamports_to_sol, OrderSink, ProtocolClient};
use fill_discovery::{DepositCreditScanner, IndexerClient, LedgerEventListener, OrderDiscovery, OrderIndex};
use fill_executor::{BalanceMonitor, Executor, KeyManager, Scheduler};
use fill_ledger::{JsonRpcLedger, LedgerRpc, LogsTransactionFeed, TransactionFeed};
use fill_telemetry::{Alert, AlertKind, AlertSink, TracingAlertSink};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};

/// How long shutdown waits for each background task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Interval between pruning passes over settled orders.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// External collaborators of the service.
pub struct Components {
    pub protocol: Arc<dyn ProtocolClient>,
    pub ledger: Arc<dyn LedgerRpc>,
    pub index: Arc<dyn OrderIndex>,
    pub feed: Arc<dyn TransactionFeed>,
    pub alerts: Arc<dyn AlertSink>,
    pub operator: Arc<Keypair>,
}

impl Components {
    /// Network-backed components around a protocol client.
    pub fn connect(
        config: &AppConfig,
        protocol: Arc<dyn ProtocolClient>,
        keys: KeyManager,
    ) -> AppResult<Self> {
        let program_id = config.program_id()?;
        if config.indexer.base_url.trim().is_empty() {
            return Err(AppError::Config("indexer.base_url is not set".to_string()));
        }

        let ledger: Arc<dyn LedgerRpc> = Arc::new(JsonRpcLedger::with_timeout(
            config.ledger.rpc_url.clone(),
            config.request_timeout(),
        )?);
        let index = Arc::new(IndexerClient::with_timeout(
            config.indexer.base_url.clone(),
            config.indexer_timeout(),
        )?);
        let feed = Arc::new(LogsTransactionFeed::new(
            config.feed_config(program_id),
            ledger.clone(),
        ));

        Ok(Self {
            protocol,
            ledger,
            index,
            feed,
            alerts: Arc::new(TracingAlertSink),
            operator: Arc::new(keys.into_keypair()),
        })
    }
}

/// The filler service.
pub struct FillBot {
    config: AppConfig,
    components: Components,
    cancel: CancellationToken,
    scheduler: Option<Arc<Scheduler>>,
    tasks: Vec<JoinHandle<()>>,
}

impl FillBot {
    pub fn new(config: AppConfig, components: Components) -> Self {
        Self {
            config,
            components,
            cancel: CancellationToken::new(),
            scheduler: None,
            tasks: Vec::new(),
        }
    }

    pub fn operator(&self) -> Pubkey {
        self.components.operator.pubkey()
    }

    /// Scheduler, once started.
    pub fn scheduler(&self) -> Option<&Arc<Scheduler>> {
        self.scheduler.as_ref()
    }

    /// Start listening and periodic discovery.
    ///
    /// Fails if the transaction subscription cannot be established.
    pub async fn start(&mut self) -> AppResult<()> {
        if self.scheduler.is_some() {
            return Err(AppError::Startup("already started".to_string()));
        }
        let program_id = self.config.program_id()?;
        let floor = self.config.balance.min_balance_lamports()?;
        let components = &self.components;
        let operator = components.operator.pubkey();

        let balance = Arc::new(BalanceMonitor::new(
            components.ledger.clone(),
            components.alerts.clone(),
            operator,
            floor,
        ));
        match balance.check().await {
            Some(state) => info!(
                %operator,
                balance_sol = state.balance_sol(),
                floor_sol = lamports_to_sol(floor),
                "Operator wallet"
            ),
            None => warn!(%operator, "Operator balance unavailable at startup"),
        }

        let executor = Arc::new(Executor::new(
            components.protocol.clone(),
            components.ledger.clone(),
            components.index.clone(),
            components.operator.clone(),
            balance,
            self.config.executor_config(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            executor,
            components.ledger.clone(),
            self.config.scheduler_config(),
            self.cancel.child_token(),
        ));
        let sink: Arc<dyn OrderSink> = scheduler.clone();

        let listener = Arc::new(LedgerEventListener::new(
            components.feed.clone(),
            components.protocol.clone(),
            sink.clone(),
            self.config.listener_config(program_id),
        ));
        let listener_task = listener
            .start(self.cancel.clone())
            .await
            .map_err(|e| AppError::Startup(format!("transaction subscription failed: {e}")))?;
        self.tasks.push(listener_task);

        let discovery = Arc::new(OrderDiscovery::new(
            components.index.clone(),
            components.protocol.clone(),
            components.ledger.clone(),
            sink.clone(),
            self.config.discovery_config(),
        ));
        self.tasks.push(tokio::spawn(discovery.run(self.cancel.clone())));

        let scanner = Arc::new(DepositCreditScanner::new(
            components.index.clone(),
            components.protocol.clone(),
            sink,
            self.config.deposit_scan_config(),
        ));
        self.tasks.push(tokio::spawn(scanner.run(self.cancel.clone())));

        self.tasks.push(tokio::spawn(heartbeat(
            operator,
            self.config.heartbeat_log_interval(),
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(prune_settled(
            scheduler.clone(),
            self.cancel.clone(),
        )));

        self.scheduler = Some(scheduler);
        info!(%operator, program = %program_id, "Fill bot started");
        Ok(())
    }

    /// Send the final alert and stop background tasks.
    pub async fn shutdown(&mut self) {
        self.components.alerts.alert(Alert::new(
            AlertKind::Shutdown,
            format!("Fill bot {} shutting down", self.operator()),
        ));
        self.cancel.cancel();

        for task in self.tasks.drain(..) {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("Background task did not stop within the grace period");
            }
        }
        info!("Fill bot stopped");
    }

    /// Start, run until Ctrl-C, then shut down.
    pub async fn run_until_shutdown(mut self) -> AppResult<()> {
        self.start().await?;
        let signal = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
        self.shutdown().await;
        signal?;
        Ok(())
    }
}

async fn heartbeat(operator: Pubkey, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    // First tick completes immediately; startup already logged.
    ticker.tick().await;
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => info!(%operator, "Fill bot heartbeat"),
        }
    }
}

async fn prune_settled(scheduler: Arc<Scheduler>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let removed = scheduler.prune_settled();
                debug!(removed, "Pruned settled orders");
            }
        }
    }
}
