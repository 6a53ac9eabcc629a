//! Periodic open-order discovery.
//!
//! Orders come from the indexer first and from the protocol client when the
//! indexer fails for any reason. The first pass after start submits every
//! open order; later passes only submit orders whose release slot is well
//! in the past, catching anything the listener missed.

use std::sync::Arc;
use std::time::Duration;

use fill_core::{Order, OrderSink, ProtocolClient};
use fill_ledger::{LedgerRpc, RetryPolicy};
use fill_telemetry::Metrics;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::DiscoveryResult;
use crate::index::OrderIndex;

/// Which orders a pass submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Every open order.
    Full,
    /// Only orders released at least the missed threshold ago.
    MissedOnly,
}

impl DiscoveryMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DiscoveryMode::Full => "full",
            DiscoveryMode::MissedOnly => "missed_only",
        }
    }
}

/// Where a pass got its orders from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverySource {
    Indexer,
    Ledger,
}

impl DiscoverySource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DiscoverySource::Indexer => "indexer",
            DiscoverySource::Ledger => "ledger",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub interval: Duration,
    /// Slots after release before an order counts as missed.
    pub missed_threshold_slots: u64,
    /// Retry policy for ledger listing.
    pub ledger_retry: RetryPolicy,
    /// Retry policy for the current-slot query.
    pub slot_retry: RetryPolicy,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(180),
            missed_threshold_slots: 150,
            ledger_retry: RetryPolicy::default().with_max_retries(10),
            slot_retry: RetryPolicy::default(),
        }
    }
}

/// Summary of one discovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub source: DiscoverySource,
    /// Orders that passed the mode filter.
    pub found: usize,
    /// Orders the sink accepted as new.
    pub accepted: usize,
}

/// Orders released before `current_slot - threshold`.
#[must_use]
pub fn filter_missed(orders: Vec<Order>, current_slot: u64, threshold: u64) -> Vec<Order> {
    let cutoff = current_slot.saturating_sub(threshold);
    orders
        .into_iter()
        .filter(|order| order.release_slot() < cutoff)
        .collect()
}

pub struct OrderDiscovery {
    index: Arc<dyn OrderIndex>,
    protocol: Arc<dyn ProtocolClient>,
    ledger: Arc<dyn LedgerRpc>,
    sink: Arc<dyn OrderSink>,
    config: DiscoveryConfig,
}

impl OrderDiscovery {
    pub fn new(
        index: Arc<dyn OrderIndex>,
        protocol: Arc<dyn ProtocolClient>,
        ledger: Arc<dyn LedgerRpc>,
        sink: Arc<dyn OrderSink>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            index,
            protocol,
            ledger,
            sink,
            config,
        }
    }

    /// Fetch open orders, indexer first.
    pub async fn fetch_open_orders(&self) -> DiscoveryResult<(Vec<Order>, DiscoverySource)> {
        match self.index.open_orders().await {
            Ok(orders) => return Ok((orders, DiscoverySource::Indexer)),
            Err(e) => warn!(error = %e, "Indexer open orders failed, falling back to ledger"),
        }

        let orders = self
            .config
            .ledger_retry
            .run("open_orders", || self.protocol.open_orders())
            .await?;
        Ok((orders, DiscoverySource::Ledger))
    }

    /// Run one pass and submit the selected orders.
    pub async fn run_pass(&self, mode: DiscoveryMode) -> DiscoveryResult<PassReport> {
        let (orders, source) = match self.fetch_open_orders().await {
            Ok(result) => result,
            Err(e) => {
                Metrics::discovery_pass(mode.as_str(), "failed");
                return Err(e);
            }
        };

        let orders = match mode {
            DiscoveryMode::Full => orders,
            DiscoveryMode::MissedOnly => {
                let current_slot = self
                    .config
                    .slot_retry
                    .run("get_slot", || self.ledger.get_slot())
                    .await?;
                filter_missed(orders, current_slot, self.config.missed_threshold_slots)
            }
        };

        let found = orders.len();
        let accepted = orders
            .into_iter()
            .filter(|order| self.sink.submit(order.clone()).is_accepted())
            .count();

        Metrics::discovery_pass(mode.as_str(), source.as_str());
        info!(
            mode = mode.as_str(),
            source = source.as_str(),
            found,
            accepted,
            "Checked for open orders"
        );

        Ok(PassReport {
            source,
            found,
            accepted,
        })
    }

    /// Full pass once, then missed-only passes every interval until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        if let Err(e) = self.run_pass(DiscoveryMode::Full).await {
            error!(error = %e, "Initial discovery pass failed");
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Order discovery stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_pass(DiscoveryMode::MissedOnly).await {
                        error!(error = %e, "Discovery pass failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockOrderIndex, RecordingSink};
    use fill_core::{AssetIndex, MockProtocol, TimeLock};
    use fill_ledger::MockLedger;
    use solana_sdk::pubkey::Pubkey;

    fn withdraw(release_slot: u64) -> Order {
        Order::withdraw(
            Pubkey::new_unique(),
            TimeLock {
                owner: Pubkey::new_unique(),
                is_owner_payer: false,
                release_slot,
            },
            100,
            AssetIndex(0),
            false,
            Pubkey::new_unique(),
        )
    }

    fn fast_config() -> DiscoveryConfig {
        DiscoveryConfig {
            ledger_retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)),
            slot_retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)),
            ..DiscoveryConfig::default()
        }
    }

    struct Harness {
        index: Arc<MockOrderIndex>,
        protocol: Arc<MockProtocol>,
        ledger: Arc<MockLedger>,
        sink: Arc<RecordingSink>,
        discovery: OrderDiscovery,
    }

    fn harness() -> Harness {
        let index = Arc::new(MockOrderIndex::new());
        let protocol = Arc::new(MockProtocol::new());
        let ledger = Arc::new(MockLedger::new());
        let sink = Arc::new(RecordingSink::new());
        let discovery = OrderDiscovery::new(
            index.clone(),
            protocol.clone(),
            ledger.clone(),
            sink.clone(),
            fast_config(),
        );
        Harness {
            index,
            protocol,
            ledger,
            sink,
            discovery,
        }
    }

    #[test]
    fn test_filter_missed() {
        let orders = vec![withdraw(700), withdraw(849), withdraw(850), withdraw(990)];
        let missed = filter_missed(orders, 1000, 150);
        let slots: Vec<u64> = missed.iter().map(Order::release_slot).collect();
        assert_eq!(slots, vec![700, 849]);
    }

    #[test]
    fn test_filter_missed_early_chain() {
        assert!(filter_missed(vec![withdraw(0)], 100, 150).is_empty());
    }

    #[tokio::test]
    async fn test_full_pass_uses_indexer() {
        let h = harness();
        h.index.set_orders(vec![withdraw(10), withdraw(20)]);
        h.protocol.insert_order(withdraw(30));

        let report = h.discovery.run_pass(DiscoveryMode::Full).await.unwrap();

        assert_eq!(report.source, DiscoverySource::Indexer);
        assert_eq!(report.found, 2);
        assert_eq!(report.accepted, 2);
        assert_eq!(h.sink.submitted().len(), 2);
    }

    #[tokio::test]
    async fn test_indexer_failure_falls_back_to_ledger() {
        let h = harness();
        h.index.set_fail(true);
        let order = withdraw(30);
        h.protocol.insert_order(order.clone());

        let report = h.discovery.run_pass(DiscoveryMode::Full).await.unwrap();

        assert_eq!(report.source, DiscoverySource::Ledger);
        assert_eq!(h.sink.submitted(), vec![order]);
    }

    #[tokio::test]
    async fn test_both_sources_failing_is_error() {
        let h = harness();
        h.index.set_fail(true);
        h.protocol.set_fail_listing(true);

        assert!(h.discovery.run_pass(DiscoveryMode::Full).await.is_err());
        assert!(h.sink.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_missed_only_pass_filters_recent_orders() {
        let h = harness();
        h.ledger.set_slot(1000);
        let old = withdraw(500);
        h.index.set_orders(vec![old.clone(), withdraw(900), withdraw(2000)]);

        let report = h
            .discovery
            .run_pass(DiscoveryMode::MissedOnly)
            .await
            .unwrap();

        assert_eq!(report.found, 1);
        assert_eq!(h.sink.submitted(), vec![old]);
    }

    #[tokio::test]
    async fn test_duplicates_are_not_counted_as_accepted() {
        let h = harness();
        let order = withdraw(10);
        h.index.set_orders(vec![order.clone()]);
        h.sink.mark_duplicate(order.key);

        let report = h.discovery.run_pass(DiscoveryMode::Full).await.unwrap();
        assert_eq!(report.found, 1);
        assert_eq!(report.accepted, 0);
    }
}
