//! Deposit-address scanning.
//!
//! Every non-zero deposit-address balance of a supported asset becomes a
//! deposit-credit order.

use std::sync::Arc;
use std::time::Duration;

use fill_core::{DepositBalances, Order, OrderSink, ProtocolClient};
use fill_ledger::RetryPolicy;
use fill_telemetry::Metrics;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::discovery::DiscoverySource;
use crate::error::DiscoveryResult;
use crate::index::OrderIndex;

#[derive(Debug, Clone)]
pub struct DepositScanConfig {
    pub interval: Duration,
    /// Retry policy for owner listing and vault loading on the ledger path.
    pub ledger_retry: RetryPolicy,
}

impl Default for DepositScanConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(180),
            ledger_retry: RetryPolicy::default(),
        }
    }
}

/// Summary of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub source: DiscoverySource,
    pub users: usize,
    pub credits: usize,
    pub accepted: usize,
}

/// Deposit-credit orders for every non-zero balance.
pub fn deposit_credits(deposits: &[DepositBalances]) -> Vec<Order> {
    deposits
        .iter()
        .flat_map(|deposit| {
            let owner = deposit.owner;
            deposit
                .non_zero()
                .map(move |(asset, amount)| Order::deposit_credit(owner, asset, amount))
        })
        .collect()
}

pub struct DepositCreditScanner {
    index: Arc<dyn OrderIndex>,
    protocol: Arc<dyn ProtocolClient>,
    sink: Arc<dyn OrderSink>,
    config: DepositScanConfig,
}

impl DepositCreditScanner {
    pub fn new(
        index: Arc<dyn OrderIndex>,
        protocol: Arc<dyn ProtocolClient>,
        sink: Arc<dyn OrderSink>,
        config: DepositScanConfig,
    ) -> Self {
        Self {
            index,
            protocol,
            sink,
            config,
        }
    }

    async fn fetch_deposits(&self) -> DiscoveryResult<(Vec<DepositBalances>, DiscoverySource)> {
        let assets = self.protocol.assets();
        match self.index.deposit_balances(&assets).await {
            Ok(deposits) => return Ok((deposits, DiscoverySource::Indexer)),
            Err(e) => warn!(error = %e, "Indexer deposit balances failed, falling back to ledger"),
        }

        let retry = self.config.ledger_retry;
        let owners = retry
            .run("vault_owners", || self.protocol.vault_owners())
            .await?;
        let deposits = retry
            .run("deposit_balances", || {
                self.protocol.deposit_balances(owners.clone())
            })
            .await?;
        Ok((deposits, DiscoverySource::Ledger))
    }

    /// Scan once and submit a credit for every non-zero balance.
    pub async fn scan_once(&self) -> DiscoveryResult<ScanReport> {
        let (deposits, source) = match self.fetch_deposits().await {
            Ok(result) => result,
            Err(e) => {
                Metrics::discovery_pass("deposits", "failed");
                return Err(e);
            }
        };

        let credits = deposit_credits(&deposits);
        let total = credits.len();
        let accepted = credits
            .into_iter()
            .filter(|order| self.sink.submit(order.clone()).is_accepted())
            .count();

        Metrics::discovery_pass("deposits", source.as_str());
        info!(
            users = deposits.len(),
            credits = total,
            accepted,
            source = source.as_str(),
            "Processed deposit addresses"
        );

        Ok(ScanReport {
            source,
            users: deposits.len(),
            credits: total,
            accepted,
        })
    }

    /// Scan immediately, then every interval until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Deposit scanner stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        error!(error = %e, "Error processing deposit addresses");
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
    use fill_core::{AssetIndex, MockProtocol, OrderKey};
    use solana_sdk::pubkey::Pubkey;

    fn balances(owner: Pubkey, entries: &[(u16, u64)]) -> DepositBalances {
        let mut deposit = DepositBalances::new(owner);
        for (asset, amount) in entries {
            deposit.balances.insert(AssetIndex(*asset), *amount);
        }
        deposit
    }

    fn scanner(
        index: Arc<MockOrderIndex>,
        protocol: Arc<MockProtocol>,
        sink: Arc<RecordingSink>,
    ) -> DepositCreditScanner {
        DepositCreditScanner::new(
            index,
            protocol,
            sink,
            DepositScanConfig {
                interval: Duration::from_secs(180),
                ledger_retry: RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1)),
            },
        )
    }

    #[test]
    fn test_deposit_credits_skip_zero_balances() {
        let owner = Pubkey::new_unique();
        let credits = deposit_credits(&[balances(owner, &[(0, 0), (1, 5000)])]);

        assert_eq!(credits.len(), 1);
        assert_eq!(
            credits[0].key,
            OrderKey::Deposit {
                owner,
                asset: AssetIndex(1)
            }
        );
        assert_eq!(credits[0].release_slot(), 0);
    }

    #[tokio::test]
    async fn test_scan_from_indexer() {
        let index = Arc::new(MockOrderIndex::new());
        let protocol = Arc::new(MockProtocol::new());
        let sink = Arc::new(RecordingSink::new());
        index.set_deposits(vec![
            balances(Pubkey::new_unique(), &[(0, 42), (1, 1)]),
            balances(Pubkey::new_unique(), &[(1, 0)]),
        ]);

        let report = scanner(index, protocol, sink.clone())
            .scan_once()
            .await
            .unwrap();

        assert_eq!(report.source, DiscoverySource::Indexer);
        assert_eq!(report.users, 2);
        assert_eq!(report.credits, 2);
        assert_eq!(sink.submitted().len(), 2);
    }

    #[tokio::test]
    async fn test_scan_falls_back_to_protocol() {
        let index = Arc::new(MockOrderIndex::new());
        index.set_fail(true);
        let protocol = Arc::new(MockProtocol::new());
        let owner = Pubkey::new_unique();
        protocol.set_owners(vec![owner]);
        protocol.set_deposits(vec![balances(owner, &[(0, 10)])]);
        let sink = Arc::new(RecordingSink::new());

        let report = scanner(index, protocol, sink.clone())
            .scan_once()
            .await
            .unwrap();

        assert_eq!(report.source, DiscoverySource::Ledger);
        assert_eq!(sink.submitted()[0].owner, owner);
    }
}
