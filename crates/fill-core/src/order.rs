//! Order domain types.
//!
//! An [`Order`] is the unit of work handled by the filler: a time-locked
//! withdrawal, a time-locked spend-limit update, or a deposit credit observed
//! from a non-zero deposit-address balance.

use std::fmt;

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// Protocol asset (market) index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetIndex(pub u16);

impl AssetIndex {
    /// Native ledger asset (lamports).
    pub const NATIVE: AssetIndex = AssetIndex(1);

    #[must_use]
    pub fn is_native(self) -> bool {
        self == Self::NATIVE
    }
}

impl fmt::Display for AssetIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order kind. Closed set; the executor dispatches on it in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Withdraw,
    SpendLimitUpdate,
    DepositCredit,
}

impl OrderKind {
    /// Label used for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OrderKind::Withdraw => "withdraw",
            OrderKind::SpendLimitUpdate => "spend_limit",
            OrderKind::DepositCredit => "deposit",
        }
    }

    /// Whether orders of this kind carry a time lock.
    #[must_use]
    pub fn is_time_locked(self) -> bool {
        !matches!(self, OrderKind::DepositCredit)
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time lock embedded in withdraw and spend-limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeLock {
    pub owner: Pubkey,
    /// Who gets the rent refund on completion. Informational only.
    pub is_owner_payer: bool,
    pub release_slot: u64,
}

/// Kind-specific order fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderPayload {
    Withdraw {
        amount_base_units: u64,
        asset: AssetIndex,
        reduce_only: bool,
        destination: Pubkey,
    },
    SpendLimitUpdate {
        spend_limit_per_transaction: u64,
        spend_limit_per_timeframe: u64,
        timeframe_in_seconds: u64,
        next_timeframe_reset_timestamp: u64,
    },
    DepositCredit {
        asset: AssetIndex,
        amount_base_units: u64,
    },
}

impl OrderPayload {
    #[must_use]
    pub fn kind(&self) -> OrderKind {
        match self {
            OrderPayload::Withdraw { .. } => OrderKind::Withdraw,
            OrderPayload::SpendLimitUpdate { .. } => OrderKind::SpendLimitUpdate,
            OrderPayload::DepositCredit { .. } => OrderKind::DepositCredit,
        }
    }
}

/// Identity of a unit of work.
///
/// Time-locked orders are identified by their ledger account. Deposit credits
/// have no order account and are keyed by `(owner, asset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderKey {
    Account(Pubkey),
    Deposit { owner: Pubkey, asset: AssetIndex },
}

impl OrderKey {
    /// Order account address, if this key names one.
    #[must_use]
    pub fn account(&self) -> Option<Pubkey> {
        match self {
            OrderKey::Account(pubkey) => Some(*pubkey),
            OrderKey::Deposit { .. } => None,
        }
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKey::Account(pubkey) => write!(f, "{pubkey}"),
            OrderKey::Deposit { owner, asset } => write!(f, "deposit:{owner}:{asset}"),
        }
    }
}

/// A unit of work for the filler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub key: OrderKey,
    /// Vault owner this order acts on behalf of.
    pub owner: Pubkey,
    /// Time lock, absent for deposit credits.
    pub time_lock: Option<TimeLock>,
    pub payload: OrderPayload,
}

impl Order {
    /// Build a withdraw order.
    #[must_use]
    pub fn withdraw(
        account: Pubkey,
        time_lock: TimeLock,
        amount_base_units: u64,
        asset: AssetIndex,
        reduce_only: bool,
        destination: Pubkey,
    ) -> Self {
        Self {
            key: OrderKey::Account(account),
            owner: time_lock.owner,
            time_lock: Some(time_lock),
            payload: OrderPayload::Withdraw {
                amount_base_units,
                asset,
                reduce_only,
                destination,
            },
        }
    }

    /// Build a spend-limit update order.
    #[must_use]
    pub fn spend_limit(
        account: Pubkey,
        time_lock: TimeLock,
        spend_limit_per_transaction: u64,
        spend_limit_per_timeframe: u64,
        timeframe_in_seconds: u64,
        next_timeframe_reset_timestamp: u64,
    ) -> Self {
        Self {
            key: OrderKey::Account(account),
            owner: time_lock.owner,
            time_lock: Some(time_lock),
            payload: OrderPayload::SpendLimitUpdate {
                spend_limit_per_transaction,
                spend_limit_per_timeframe,
                timeframe_in_seconds,
                next_timeframe_reset_timestamp,
            },
        }
    }

    /// Build a deposit credit for a non-zero deposit-address balance.
    #[must_use]
    pub fn deposit_credit(owner: Pubkey, asset: AssetIndex, amount_base_units: u64) -> Self {
        Self {
            key: OrderKey::Deposit { owner, asset },
            owner,
            time_lock: None,
            payload: OrderPayload::DepositCredit {
                asset,
                amount_base_units,
            },
        }
    }

    #[must_use]
    pub fn kind(&self) -> OrderKind {
        self.payload.kind()
    }

    /// Release height; zero when the order has no time lock.
    #[must_use]
    pub fn release_slot(&self) -> u64 {
        self.time_lock.map_or(0, |lock| lock.release_slot)
    }
}

/// Lifecycle status of an order inside the filler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Discovered,
    Scheduled,
    Waiting,
    Executing,
    Executed,
    /// The order account no longer exists on the ledger.
    Gone,
    FailedTerminal,
}

impl OrderStatus {
    /// Settled statuses are never rescheduled.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, OrderStatus::Executed | OrderStatus::Gone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock(release_slot: u64) -> TimeLock {
        TimeLock {
            owner: Pubkey::new_unique(),
            is_owner_payer: false,
            release_slot,
        }
    }

    #[test]
    fn test_withdraw_order_uses_time_lock_owner() {
        let account = Pubkey::new_unique();
        let time_lock = lock(1000);
        let order = Order::withdraw(
            account,
            time_lock,
            100,
            AssetIndex(0),
            false,
            Pubkey::new_unique(),
        );

        assert_eq!(order.key, OrderKey::Account(account));
        assert_eq!(order.owner, time_lock.owner);
        assert_eq!(order.kind(), OrderKind::Withdraw);
        assert_eq!(order.release_slot(), 1000);
    }

    #[test]
    fn test_deposit_credit_has_no_time_lock() {
        let owner = Pubkey::new_unique();
        let order = Order::deposit_credit(owner, AssetIndex::NATIVE, 5);

        assert_eq!(order.release_slot(), 0);
        assert!(!order.kind().is_time_locked());
        assert!(order.key.account().is_none());
        assert!(order.key.to_string().starts_with("deposit:"));
    }

    #[test]
    fn test_settled_statuses() {
        assert!(OrderStatus::Executed.is_settled());
        assert!(OrderStatus::Gone.is_settled());
        assert!(!OrderStatus::FailedTerminal.is_settled());
        assert!(!OrderStatus::Waiting.is_settled());
    }
}
