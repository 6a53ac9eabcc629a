//! Operator balance monitoring.

use std::sync::Arc;

use fill_core::WalletState;
use fill_ledger::{LedgerRpc, RetryPolicy};
use fill_telemetry::{Alert, AlertKind, AlertSink, Metrics};
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

use crate::error::FillResult;

/// Checks the operator wallet after confirmed submissions.
///
/// Each check that observes a balance below the floor raises exactly one
/// alert. A failed balance query is logged and does not alert.
pub struct BalanceMonitor {
    ledger: Arc<dyn LedgerRpc>,
    alerts: Arc<dyn AlertSink>,
    operator: Pubkey,
    min_balance_floor: u64,
    retry: RetryPolicy,
}

impl BalanceMonitor {
    pub fn new(
        ledger: Arc<dyn LedgerRpc>,
        alerts: Arc<dyn AlertSink>,
        operator: Pubkey,
        min_balance_floor: u64,
    ) -> Self {
        Self {
            ledger,
            alerts,
            operator,
            min_balance_floor,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Current wallet snapshot.
    pub async fn wallet_state(&self) -> FillResult<WalletState> {
        let ledger = &self.ledger;
        let operator = self.operator;
        let balance = self
            .retry
            .run("get_balance", || async move { ledger.get_balance(operator).await })
            .await?;
        Metrics::operator_balance(fill_core::lamports_to_sol(balance));
        Ok(WalletState::new(operator, balance, self.min_balance_floor))
    }

    /// Fetch the balance and alert when it is below the floor.
    ///
    /// Returns the observed state, or `None` when the query failed.
    pub async fn check(&self) -> Option<WalletState> {
        let state = match self.wallet_state().await {
            Ok(state) => state,
            Err(e) => {
                warn!(operator = %self.operator, error = %e, "Operator balance check failed");
                return None;
            }
        };

        if state.is_below_floor() {
            self.alerts.alert(Alert::new(
                AlertKind::LowBalance,
                format!(
                    "Operator {} balance {:.4} SOL is below the floor of {:.4} SOL",
                    state.address,
                    state.balance_sol(),
                    fill_core::lamports_to_sol(state.min_balance_floor)
                ),
            ));
        } else {
            debug!(operator = %state.address, balance_sol = state.balance_sol(), "Operator balance ok");
        }
        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fill_core::LAMPORTS_PER_SOL;
    use fill_ledger::MockLedger;
    use fill_telemetry::RecordingAlertSink;

    const FLOOR: u64 = 3 * LAMPORTS_PER_SOL / 10;

    fn monitor(ledger: Arc<MockLedger>, alerts: Arc<RecordingAlertSink>, operator: Pubkey) -> BalanceMonitor {
        BalanceMonitor::new(ledger, alerts, operator, FLOOR).with_retry(RetryPolicy::once())
    }

    #[tokio::test]
    async fn test_below_floor_alerts_once_per_check() {
        let ledger = Arc::new(MockLedger::new());
        let alerts = Arc::new(RecordingAlertSink::new());
        let operator = Pubkey::new_unique();
        ledger.set_balance(operator, FLOOR - 1);
        let monitor = monitor(ledger, alerts.clone(), operator);

        let state = monitor.check().await.unwrap();
        assert!(state.is_below_floor());
        assert_eq!(alerts.count(AlertKind::LowBalance), 1);

        monitor.check().await;
        assert_eq!(alerts.count(AlertKind::LowBalance), 2);
    }

    #[tokio::test]
    async fn test_at_floor_does_not_alert() {
        let ledger = Arc::new(MockLedger::new());
        let alerts = Arc::new(RecordingAlertSink::new());
        let operator = Pubkey::new_unique();
        ledger.set_balance(operator, FLOOR);

        let state = monitor(ledger, alerts.clone(), operator).check().await.unwrap();
        assert!(!state.is_below_floor());
        assert!(alerts.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_query_failure_does_not_alert() {
        let ledger = Arc::new(MockLedger::new());
        let alerts = Arc::new(RecordingAlertSink::new());
        ledger.fail_next_balances(1);

        let state = monitor(ledger, alerts.clone(), Pubkey::new_unique()).check().await;
        assert!(state.is_none());
        assert!(alerts.alerts().is_empty());
    }
}
