//! De-duplicating order scheduler.
//!
//! Every accepted order gets its own task: wait until the release slot has
//! passed, then run the executor under the execution retry policy. The
//! in-flight set is the only state shared between tasks and producers.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fill_core::{BusinessRejection, FillOutcome, Order, OrderKey, OrderSink, OrderStatus, SubmitResult};
use fill_ledger::{LedgerRpc, RetryPolicy};
use fill_telemetry::Metrics;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::executor::Executor;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Expected duration of one slot.
    pub tick: Duration,
    /// Upper bound of the random delay added to unlock waits.
    pub max_jitter: Duration,
    /// Retry policy wrapping each execution attempt.
    pub execute_retry: RetryPolicy,
    /// Retry policy for the current-slot query.
    pub slot_retry: RetryPolicy,
    /// How long executed and gone orders stay de-duplicated.
    pub settled_ttl: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(400),
            max_jitter: Duration::from_secs(10),
            execute_retry: RetryPolicy::default(),
            slot_retry: RetryPolicy::default(),
            settled_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Wait before an order becomes executable.
///
/// Execution is allowed from `release_slot + 1`; `None` means run now.
#[must_use]
pub fn unlock_delay(release_slot: u64, current_slot: u64, tick: Duration) -> Option<Duration> {
    let remaining = release_slot.saturating_add(1).saturating_sub(current_slot);
    if remaining == 0 {
        return None;
    }
    let tick_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX);
    Some(Duration::from_millis(tick_ms.saturating_mul(remaining)))
}

fn jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Active(OrderStatus),
    Settled { status: OrderStatus, at: Instant },
}

/// Orders with a live task, plus tombstones of settled ones.
///
/// A key is claimed at most once while active. Executed and gone order
/// accounts stay claimed until their tombstone expires.
#[derive(Debug)]
pub struct InflightOrders {
    entries: DashMap<OrderKey, Slot>,
    settled_ttl: Duration,
}

impl InflightOrders {
    #[must_use]
    pub fn new(settled_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            settled_ttl,
        }
    }

    /// Claim `key` for a new task. False when it is active or settled.
    pub fn try_claim(&self, key: OrderKey) -> bool {
        match self.entries.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(Slot::Active(OrderStatus::Scheduled));
                true
            }
            Entry::Occupied(mut entry) => match *entry.get() {
                Slot::Settled { at, .. } if at.elapsed() >= self.settled_ttl => {
                    entry.insert(Slot::Active(OrderStatus::Scheduled));
                    true
                }
                _ => false,
            },
        }
    }

    pub fn set_status(&self, key: &OrderKey, status: OrderStatus) {
        if let Some(mut slot) = self.entries.get_mut(key) {
            if let Slot::Active(current) = slot.value_mut() {
                *current = status;
            }
        }
    }

    /// Record a final status.
    ///
    /// Settled order accounts are tombstoned; everything else is released
    /// so a later discovery pass can schedule it again.
    pub fn settle(&self, key: OrderKey, status: OrderStatus) {
        if status.is_settled() && matches!(key, OrderKey::Account(_)) {
            self.entries.insert(
                key,
                Slot::Settled {
                    status,
                    at: Instant::now(),
                },
            );
        } else {
            self.entries.remove(&key);
        }
    }

    pub fn release(&self, key: &OrderKey) {
        self.entries.remove(key);
    }

    #[must_use]
    pub fn status(&self, key: &OrderKey) -> Option<OrderStatus> {
        self.entries.get(key).map(|slot| match *slot {
            Slot::Active(status) | Slot::Settled { status, .. } => status,
        })
    }

    /// Orders with a live task.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Active(_)))
            .count()
    }

    /// Drop expired tombstones. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| match slot {
            Slot::Settled { at, .. } => at.elapsed() < self.settled_ttl,
            Slot::Active(_) => true,
        });
        before.saturating_sub(self.entries.len())
    }
}

/// Order scheduler; the [`OrderSink`] every producer submits to.
pub struct Scheduler {
    executor: Arc<Executor>,
    ledger: Arc<dyn LedgerRpc>,
    inflight: Arc<InflightOrders>,
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        executor: Arc<Executor>,
        ledger: Arc<dyn LedgerRpc>,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            ledger,
            inflight: Arc::new(InflightOrders::new(config.settled_ttl)),
            config,
            cancel,
        }
    }

    pub fn inflight(&self) -> &Arc<InflightOrders> {
        &self.inflight
    }

    /// Start a task for `order` unless one exists.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, order: Order) -> Option<JoinHandle<()>> {
        if !self.inflight.try_claim(order.key) {
            debug!(order = %order.key, kind = %order.kind(), "Order already tracked");
            Metrics::order_deduplicated(order.kind().as_str());
            return None;
        }
        Metrics::inflight_set(self.inflight.active_count() as i64);

        let task = OrderTask {
            executor: self.executor.clone(),
            ledger: self.ledger.clone(),
            inflight: self.inflight.clone(),
            config: self.config.clone(),
            cancel: self.cancel.clone(),
        };
        Some(tokio::spawn(task.run(order)))
    }

    /// Drop expired settled entries.
    pub fn prune_settled(&self) -> usize {
        self.inflight.prune()
    }
}

impl OrderSink for Scheduler {
    fn submit(&self, order: Order) -> SubmitResult {
        match self.schedule(order) {
            Some(_) => SubmitResult::Accepted,
            None => SubmitResult::Duplicate,
        }
    }
}

struct OrderTask {
    executor: Arc<Executor>,
    ledger: Arc<dyn LedgerRpc>,
    inflight: Arc<InflightOrders>,
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl OrderTask {
    async fn run(self, order: Order) {
        let key = order.key;
        let kind = order.kind();

        let waited = if kind.is_time_locked() {
            self.wait_for_release(&order).await
        } else {
            Metrics::order_scheduled(kind.as_str(), "immediate");
            true
        };
        if !waited {
            self.inflight.release(&key);
            Metrics::inflight_set(self.inflight.active_count() as i64);
            return;
        }

        self.inflight.set_status(&key, OrderStatus::Executing);
        let executor = &self.executor;
        let order_ref = &order;
        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!(order = %key, "Execution abandoned on shutdown");
                self.inflight.release(&key);
                return;
            }
            result = self.config.execute_retry.run("execute_order", move || async move {
                let result = executor.execute(order_ref).await;
                if result.is_err() {
                    Metrics::fill_attempt_error(kind.as_str());
                }
                result
            }) => result,
        };

        match result {
            Ok(outcome) => {
                Metrics::fill_outcome(kind.as_str(), outcome.as_str());
                log_outcome(&order, &outcome);
                self.inflight.settle(key, outcome.status());
            }
            Err(e) => {
                Metrics::fill_outcome(kind.as_str(), "failed");
                error!(order = %key, kind = %kind, error = %e, "Order abandoned after retries");
                self.inflight.release(&key);
            }
        }
        Metrics::inflight_set(self.inflight.active_count() as i64);
    }

    /// Sleep until the ledger reports a slot past the release slot. False
    /// when the wait was abandoned.
    ///
    /// The slot is re-read after every sleep; slots slower than the
    /// configured tick extend the wait.
    async fn wait_for_release(&self, order: &Order) -> bool {
        let release_slot = order.release_slot();
        let Some(mut current_slot) = self.current_slot(order).await else {
            return false;
        };
        let Some(delay) = unlock_delay(release_slot, current_slot, self.config.tick) else {
            Metrics::order_scheduled(order.kind().as_str(), "immediate");
            debug!(order = %order.key, release_slot, current_slot, "Order already released");
            return true;
        };

        let mut delay = delay + jitter(self.config.max_jitter);
        Metrics::order_scheduled(order.kind().as_str(), "waiting");
        Metrics::wait_scheduled(order.kind().as_str(), delay.as_secs_f64());
        info!(
            order = %order.key,
            kind = %order.kind(),
            release_slot,
            current_slot,
            wait_ms = delay.as_millis() as u64,
            "Waiting for release"
        );
        self.inflight.set_status(&order.key, OrderStatus::Waiting);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(order = %order.key, "Wait abandoned on shutdown");
                    return false;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            current_slot = match self.current_slot(order).await {
                Some(slot) => slot,
                None => return false,
            };
            match unlock_delay(release_slot, current_slot, self.config.tick) {
                None => return true,
                Some(remaining) => {
                    debug!(
                        order = %order.key,
                        release_slot,
                        current_slot,
                        wait_ms = remaining.as_millis() as u64,
                        "Release slot not reached yet"
                    );
                    delay = remaining;
                }
            }
        }
    }

    /// Current ledger slot under the slot retry policy. `None` drops the
    /// order until the next discovery pass.
    async fn current_slot(&self, order: &Order) -> Option<u64> {
        let ledger = &self.ledger;
        match self
            .config
            .slot_retry
            .run("get_slot", move || ledger.get_slot())
            .await
        {
            Ok(slot) => Some(slot),
            Err(e) => {
                error!(order = %order.key, error = %e, "Failed to read current slot, dropping order");
                None
            }
        }
    }
}

fn log_outcome(order: &Order, outcome: &FillOutcome) {
    let kind = order.kind();
    match outcome {
        FillOutcome::Executed { signature } => {
            info!(order = %order.key, kind = %kind, %signature, "Order executed");
        }
        FillOutcome::Gone => {
            info!(order = %order.key, kind = %kind, "Order no longer exists");
        }
        FillOutcome::Rejected(BusinessRejection::DailyWithdrawLimit) => {
            warn!(order = %order.key, kind = %kind, "Daily withdraw limit reached");
        }
        FillOutcome::Rejected(rejection) => {
            info!(order = %order.key, kind = %kind, %rejection, "Fill rejected by program");
        }
        FillOutcome::Skipped(reason) => {
            info!(order = %order.key, kind = %kind, reason = reason.as_str(), detail = ?reason, "Order skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::pubkey::Pubkey;

    #[test]
    fn test_unlock_delay() {
        let tick = Duration::from_millis(400);
        assert_eq!(unlock_delay(1000, 990, tick), Some(Duration::from_millis(4_400)));
        assert_eq!(unlock_delay(1000, 1000, tick), Some(Duration::from_millis(400)));
        assert_eq!(unlock_delay(1000, 1001, tick), None);
        assert_eq!(unlock_delay(1000, 5000, tick), None);
        assert_eq!(unlock_delay(0, 0, tick), Some(Duration::from_millis(400)));
    }

    #[test]
    fn test_jitter_bounds() {
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(jitter(Duration::from_millis(50)) <= Duration::from_millis(50));
        }
    }

    #[tokio::test]
    async fn test_claim_once_while_active() {
        let inflight = InflightOrders::new(Duration::from_secs(60));
        let key = OrderKey::Account(Pubkey::new_unique());

        assert!(inflight.try_claim(key));
        assert!(!inflight.try_claim(key));
        assert_eq!(inflight.status(&key), Some(OrderStatus::Scheduled));
        assert_eq!(inflight.active_count(), 1);

        inflight.set_status(&key, OrderStatus::Waiting);
        assert_eq!(inflight.status(&key), Some(OrderStatus::Waiting));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_account_tombstone_expires() {
        let inflight = InflightOrders::new(Duration::from_secs(60));
        let key = OrderKey::Account(Pubkey::new_unique());

        assert!(inflight.try_claim(key));
        inflight.settle(key, OrderStatus::Gone);
        assert_eq!(inflight.active_count(), 0);
        assert!(!inflight.try_claim(key));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(inflight.prune(), 1);
        assert!(inflight.try_claim(key));
    }

    #[tokio::test]
    async fn test_unsettled_outcome_releases() {
        let inflight = InflightOrders::new(Duration::from_secs(60));
        let key = OrderKey::Account(Pubkey::new_unique());

        assert!(inflight.try_claim(key));
        inflight.settle(key, OrderStatus::FailedTerminal);
        assert_eq!(inflight.status(&key), None);
        assert!(inflight.try_claim(key));
    }

    #[tokio::test]
    async fn test_deposit_keys_are_not_tombstoned() {
        let inflight = InflightOrders::new(Duration::from_secs(60));
        let key = OrderKey::Deposit {
            owner: Pubkey::new_unique(),
            asset: fill_core::AssetIndex(0),
        };

        assert!(inflight.try_claim(key));
        inflight.settle(key, OrderStatus::Executed);
        assert!(inflight.try_claim(key));
    }
}
